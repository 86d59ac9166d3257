//! Link extraction and in-place link rewriting for Markdown documents.
//!
//! Recognised forms:
//! - inline links `[text](dest "title")` and images `![alt](dest)`, with
//!   plain or `<angle bracket>` destinations
//! - reference definitions `[id]: dest`
//! - autolinks `<https://...>`
//! - HTML `href` and `src` attributes, single or double quoted
//!
//! Fenced code blocks and inline code spans are never searched. Each
//! [`Link`] carries the byte span of its destination so [`rewrite`] can
//! replace destinations and leave every other byte untouched.

mod code;

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Syntax a link was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Inline,
    Image,
    Reference,
    Autolink,
    /// HTML `href` attribute.
    Href,
    /// HTML `src` attribute.
    Src,
}

/// A link destination found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    pub destination: String,
    /// Byte range of the destination in the document.
    pub span: Range<usize>,
}

impl Link {
    /// Whether the target is embedded in the page (images, `src`) rather
    /// than navigated to.
    pub fn is_embeddable(&self) -> bool {
        matches!(self.kind, LinkKind::Image | LinkKind::Src)
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// `[text](dest "title")` with one level of nested brackets in the text.
static INLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(!?)\[((?:[^\[\]\n]|\[[^\[\]\n]*\])*)\]\(\s*(?:<([^<>\n]*)>|([^\s()<>]*(?:\([^\s()]*\)[^\s()<>]*)*))(?:\s+(?:"[^"]*"|'[^']*'|\([^()]*\)))?\s*\)"#,
    )
    .expect("valid regex")
});

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^ {0,3}\[[^\]\n]+\]:[ \t]*(?:<([^<>\n]*)>|(\S+))").expect("valid regex")
});

static AUTOLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<((?:https?|ftp)://[^\s<>]+)>").expect("valid regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<[a-z][a-z0-9-]*\b[^>]*>").expect("valid regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s(href|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// All links of `content` in document order.
pub fn parse_links(content: &str) -> Vec<Link> {
    let code = code::code_regions(content);
    let mut found = Vec::new();

    inline_links(content, 0..content.len(), &mut found);

    for caps in REFERENCE_RE.captures_iter(content) {
        if let Some(dest) = caps.get(1).or_else(|| caps.get(2)) {
            found.push(link(LinkKind::Reference, content, dest.range()));
        }
    }
    for caps in AUTOLINK_RE.captures_iter(content) {
        if let Some(dest) = caps.get(1) {
            found.push(link(LinkKind::Autolink, content, dest.range()));
        }
    }
    for tag in TAG_RE.find_iter(content) {
        for caps in ATTR_RE.captures_iter(tag.as_str()) {
            let kind = if caps[1].eq_ignore_ascii_case("src") {
                LinkKind::Src
            } else {
                LinkKind::Href
            };
            if let Some(dest) = caps.get(2).or_else(|| caps.get(3)) {
                let range = tag.start() + dest.start()..tag.start() + dest.end();
                found.push(link(kind, content, range));
            }
        }
    }

    // Earlier patterns win on overlap; code never holds links.
    found.retain(|l| !code::in_regions(&code, l.span.start));
    found.sort_by_key(|l| l.span.start);
    let mut links: Vec<Link> = Vec::with_capacity(found.len());
    for candidate in found {
        let overlaps = links
            .last()
            .is_some_and(|last| candidate.span.start < last.span.end);
        if !overlaps {
            links.push(candidate);
        }
    }
    links
}

/// Inline links and images in `range`, including those nested in link text.
fn inline_links(content: &str, range: Range<usize>, out: &mut Vec<Link>) {
    let haystack = &content[range.clone()];
    for caps in INLINE_RE.captures_iter(haystack) {
        let kind = if caps[1].is_empty() {
            LinkKind::Inline
        } else {
            LinkKind::Image
        };
        if let Some(text) = caps.get(2) {
            inline_links(content, range.start + text.start()..range.start + text.end(), out);
        }
        if let Some(dest) = caps.get(3).or_else(|| caps.get(4)) {
            let span = range.start + dest.start()..range.start + dest.end();
            out.push(link(kind, content, span));
        }
    }
}

fn link(kind: LinkKind, content: &str, span: Range<usize>) -> Link {
    Link {
        kind,
        destination: content[span.clone()].to_string(),
        span,
    }
}

// ---------------------------------------------------------------------------
// Rewriting
// ---------------------------------------------------------------------------

/// Replace link destinations. `f` returns the new destination, or `None`
/// to keep a link as written.
pub fn rewrite(content: &str, mut f: impl FnMut(&Link) -> Option<String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for link in parse_links(content) {
        if let Some(replacement) = f(&link) {
            out.push_str(&content[cursor..link.span.start]);
            out.push_str(&replacement);
            cursor = link.span.end;
        }
    }
    out.push_str(&content[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destinations(content: &str) -> Vec<(LinkKind, String)> {
        parse_links(content)
            .into_iter()
            .map(|l| (l.kind, l.destination))
            .collect()
    }

    #[test]
    fn inline_links_and_images() {
        let md = r#"See [the guide](./guide.md "Guide") and ![logo](img/logo.png)."#;
        assert_eq!(
            destinations(md),
            vec![
                (LinkKind::Inline, "./guide.md".to_string()),
                (LinkKind::Image, "img/logo.png".to_string()),
            ]
        );
    }

    #[test]
    fn angle_bracket_destinations() {
        let md = "[spaced](<docs/my file.md>)";
        let links = parse_links(md);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].destination, "docs/my file.md");
        assert_eq!(&md[links[0].span.clone()], "docs/my file.md");
    }

    #[test]
    fn nested_image_in_link() {
        let md = "[![badge](https://img.shields.io/x.svg)](https://ci.example.com)";
        assert_eq!(
            destinations(md),
            vec![
                (LinkKind::Image, "https://img.shields.io/x.svg".to_string()),
                (LinkKind::Inline, "https://ci.example.com".to_string()),
            ]
        );
    }

    #[test]
    fn destinations_with_parentheses() {
        let md = "[wiki](https://en.wikipedia.org/wiki/Rust_(language))";
        assert_eq!(
            destinations(md)[0].1,
            "https://en.wikipedia.org/wiki/Rust_(language)"
        );
    }

    #[test]
    fn references_autolinks_and_html() {
        let md = "\
[ref]: ../api/README.md
Visit <https://example.com/docs>.
<a class=\"x\" href=\"setup.md#install\">setup</a>
<img src='diagram.svg' alt=\"d\">
";
        assert_eq!(
            destinations(md),
            vec![
                (LinkKind::Reference, "../api/README.md".to_string()),
                (LinkKind::Autolink, "https://example.com/docs".to_string()),
                (LinkKind::Href, "setup.md#install".to_string()),
                (LinkKind::Src, "diagram.svg".to_string()),
            ]
        );
    }

    #[test]
    fn code_is_ignored() {
        let md = "\
Real [link](a.md) and `[fake](b.md)`.
```markdown
[also fake](c.md)
```
";
        assert_eq!(destinations(md), vec![(LinkKind::Inline, "a.md".to_string())]);
    }

    #[test]
    fn embeddable_kinds() {
        let links = parse_links("![i](a.png) [l](b.md) <img src=\"c.png\">");
        let embeddable: Vec<bool> = links.iter().map(Link::is_embeddable).collect();
        assert_eq!(embeddable, vec![true, false, true]);
    }

    #[test]
    fn rewrite_replaces_only_destinations() {
        let md = "# Title\n\n[a](one.md \"t\") ![b](two.png) [c](three.md)\n";
        let out = rewrite(md, |link| match link.destination.as_str() {
            "one.md" => Some("../one/".to_string()),
            "two.png" => Some("__resources/1234.png".to_string()),
            _ => None,
        });
        assert_eq!(
            out,
            "# Title\n\n[a](../one/ \"t\") ![b](__resources/1234.png) [c](three.md)\n"
        );
    }
}
