//! Code regions of a Markdown document, where nothing is a link.

use std::ops::Range;

/// Byte ranges covered by fenced code blocks and inline code spans,
/// sorted and non-overlapping.
pub(crate) fn code_regions(content: &str) -> Vec<Range<usize>> {
    let fences = fenced_blocks(content);
    let mut regions = Vec::with_capacity(fences.len());
    let mut cursor = 0;
    for fence in fences {
        regions.extend(code_spans(content, cursor..fence.start));
        cursor = fence.end;
        regions.push(fence);
    }
    regions.extend(code_spans(content, cursor..content.len()));
    regions
}

/// Whether `offset` falls inside any of the sorted `regions`.
pub(crate) fn in_regions(regions: &[Range<usize>], offset: usize) -> bool {
    let idx = regions.partition_point(|r| r.end <= offset);
    regions.get(idx).is_some_and(|r| r.contains(&offset))
}

/// Fenced blocks opened by three or more backticks or tildes, indented by
/// at most three spaces. An unclosed fence runs to the end of the document.
fn fenced_blocks(content: &str) -> Vec<Range<usize>> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, char, usize)> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent > 3 {
            continue;
        }
        let trimmed = &line[indent..];
        let Some(marker) = trimmed.chars().next().filter(|c| *c == '`' || *c == '~') else {
            continue;
        };
        let run = trimmed.len() - trimmed.trim_start_matches(marker).len();
        if run < 3 {
            continue;
        }

        match open {
            None => open = Some((line_start, marker, run)),
            Some((start, open_marker, open_run)) => {
                let rest = trimmed[run..].trim();
                if marker == open_marker && run >= open_run && rest.is_empty() {
                    blocks.push(start..offset);
                    open = None;
                }
            }
        }
    }

    if let Some((start, _, _)) = open {
        blocks.push(start..content.len());
    }
    blocks
}

/// Inline code spans inside `range`: a run of N backticks closed by the next
/// run of exactly N backticks.
fn code_spans(content: &str, range: Range<usize>) -> Vec<Range<usize>> {
    let bytes = content.as_bytes();
    let mut spans = Vec::new();
    let mut i = range.start;

    while i < range.end {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let open_start = i;
        while i < range.end && bytes[i] == b'`' {
            i += 1;
        }
        let run = i - open_start;

        let mut j = i;
        let mut closed = None;
        while j < range.end {
            if bytes[j] != b'`' {
                j += 1;
                continue;
            }
            let close_start = j;
            while j < range.end && bytes[j] == b'`' {
                j += 1;
            }
            if j - close_start == run {
                closed = Some(j);
                break;
            }
        }

        // An unmatched run is literal text.
        if let Some(end) = closed {
            spans.push(open_start..end);
            i = end;
        }
    }
    spans
}
