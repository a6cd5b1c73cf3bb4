//! Link extraction.
//!
//! Finds every dynamic link form in a markdown document:
//!
//! | Kind       | Form                                                   |
//! |------------|--------------------------------------------------------|
//! | `Inline`   | ``[`VALUE`](codebook:TEMPLATE)``                       |
//! | `Url`      | `[text](URL "codebook:TEMPLATE")`                      |
//! | `Span`     | `<span data-codebook="TEMPLATE">VALUE</span>`          |
//! | `Div`      | `<div data-codebook="TEMPLATE">\nVALUE\n</div>`        |
//! | `Markdown` | `[text](other.md)`                                     |
//! | `Backlink` | `[name](path "codebook:backlink")`                     |
//! | `Exec`     | `<exec lang="L">CODE</exec>` + `<output>VALUE</output>`|
//! | `Query`    | `<query endpoint="E" ...>VALUE</query>`                |
//!
//! Extraction is a pure function of the text. Fenced code blocks and the
//! frontmatter block are skipped. Returned spans never overlap.

pub mod fence;
pub mod frontmatter;
pub mod tag;

use crate::utils::path::is_external_link;
use regex::Regex;
use std::{ops::Range, sync::OnceLock};
use tag::{OpenTag, TagScan, scan_open_tag};

/// Link scheme prefix.
pub const SCHEME: &str = "codebook:";

/// Template name that marks an auto-maintained backlink.
pub const BACKLINK_TEMPLATE: &str = "backlink";

/// What a link is, with the data specific to its form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Inline { template: String },
    Url { template: String, label: String },
    Span { template: String },
    Div { template: String },
    Markdown { target: String, label: String },
    Backlink { target: String, label: String },
    Exec { lang: String, code: String },
    Query { endpoint: String, params: Vec<(String, String)> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    /// The whole construct.
    pub span: Range<usize>,
    /// The region a render may rewrite. Empty for markdown and backlinks.
    pub value: Range<usize>,
    /// Block content region lacks its surrounding newlines, so the first
    /// rewrite must add them.
    pub bare: bool,
}

impl Link {
    /// Template name for value links.
    pub fn template(&self) -> Option<&str> {
        match &self.kind {
            LinkKind::Inline { template }
            | LinkKind::Url { template, .. }
            | LinkKind::Span { template }
            | LinkKind::Div { template } => Some(template),
            _ => None,
        }
    }

    /// Current displayed value.
    pub fn value<'a>(&self, text: &'a str) -> &'a str {
        &text[self.value.clone()]
    }
}

// ============================================================================
// Patterns
// ============================================================================

fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[`?([^`\]\n]*)`?\]\(codebook:([^)\s]+)\)").unwrap())
}

/// `[text](URL "codebook:TEMPLATE")`, both value links and backlinks.
fn titled_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[([^\]\n]+)\]\(([^"\s)]+)\s+"codebook:([^"\n]+)"\)"#).unwrap()
    })
}

fn markdown_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[([^\]\n]+)\]\((?:<([^<>\n]+\.md)>|([^"\s)<>]+\.md))\)"#).unwrap()
    })
}

/// Openers handled by the tag state machine.
fn opener_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(span|div|exec|query)\b").unwrap())
}

// ============================================================================
// Extraction
// ============================================================================

/// Byte ranges that extraction skips: fenced code and the frontmatter block.
pub fn excluded_regions(text: &str) -> Vec<Range<usize>> {
    let mut regions = fence::fenced_regions(text);
    if let Some((block, _)) = frontmatter::block(text) {
        regions.retain(|r| r.start >= block.end);
        regions.insert(0, block);
    }
    regions
}

/// Find all links in document order.
pub fn find_links(text: &str) -> Vec<Link> {
    let excluded = excluded_regions(text);
    let skip = |pos: usize| fence::in_regions(&excluded, pos);

    let mut candidates = Vec::new();

    for caps in inline_re().captures_iter(text) {
        let (Some(whole), Some(value), Some(template)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        candidates.push(Link {
            kind: LinkKind::Inline {
                template: template.as_str().to_owned(),
            },
            span: whole.range(),
            value: value.range(),
            bare: false,
        });
    }

    for caps in titled_re().captures_iter(text) {
        let (Some(whole), Some(label), Some(url), Some(template)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let kind = match template.as_str() {
            BACKLINK_TEMPLATE => LinkKind::Backlink {
                target: url.as_str().to_owned(),
                label: label.as_str().to_owned(),
            },
            "link" => continue,
            template => LinkKind::Url {
                template: template.to_owned(),
                label: label.as_str().to_owned(),
            },
        };
        let value = match kind {
            LinkKind::Backlink { .. } => url.end()..url.end(),
            _ => url.range(),
        };
        candidates.push(Link {
            kind,
            span: whole.range(),
            value,
            bare: false,
        });
    }

    for caps in markdown_re().captures_iter(text) {
        let (Some(whole), Some(label), Some(target)) =
            (caps.get(0), caps.get(1), caps.get(2).or_else(|| caps.get(3)))
        else {
            continue;
        };
        if is_external_link(target.as_str()) {
            continue;
        }
        candidates.push(Link {
            kind: LinkKind::Markdown {
                target: target.as_str().to_owned(),
                label: label.as_str().to_owned(),
            },
            span: whole.range(),
            value: whole.end()..whole.end(),
            bare: false,
        });
    }

    for m in opener_re().find_iter(text) {
        if let TagScan::Complete(tag) = scan_open_tag(text, m.start())
            && let Some(link) = tag_link(text, &tag)
        {
            candidates.push(link);
        }
    }

    candidates.retain(|link| !skip(link.span.start));
    resolve_overlaps(candidates)
}

/// Keep the earliest-starting candidate of any overlapping group, preferring
/// the longer one on ties.
fn resolve_overlaps(mut candidates: Vec<Link>) -> Vec<Link> {
    candidates.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then(b.span.end.cmp(&a.span.end))
    });

    let mut links: Vec<Link> = Vec::with_capacity(candidates.len());
    for link in candidates {
        if links.last().is_none_or(|last| link.span.start >= last.span.end) {
            links.push(link);
        }
    }
    links
}

/// Build a link from a complete opening tag, if it is one of ours and closed.
fn tag_link(text: &str, tag: &OpenTag<'_>) -> Option<Link> {
    let body_start = tag.span.end;
    match tag.name {
        "span" => {
            let template = tag.attr("data-codebook")?.unescaped().into_owned();
            let close = find_close(text, body_start, "span")?;
            Some(Link {
                kind: LinkKind::Span { template },
                span: tag.span.start..close.end,
                value: body_start..close.start,
                bare: false,
            })
        }
        "div" => {
            let template = tag.attr("data-codebook")?.unescaped().into_owned();
            let close = find_close(text, body_start, "div")?;
            let (value, bare) = block_content(text, body_start..close.start);
            Some(Link {
                kind: LinkKind::Div { template },
                span: tag.span.start..close.end,
                value,
                bare,
            })
        }
        "exec" => exec_link(text, tag),
        "query" => {
            let close = find_close(text, body_start, "query")?;
            let endpoint = tag
                .attr("endpoint")
                .map_or_else(|| "query".to_owned(), |a| a.unescaped().into_owned());
            let params = tag
                .attrs
                .iter()
                .filter(|a| a.name != "endpoint")
                .map(|a| (a.name.to_owned(), a.unescaped().into_owned()))
                .collect();
            let (value, bare) = block_content(text, body_start..close.start);
            Some(Link {
                kind: LinkKind::Query { endpoint, params },
                span: tag.span.start..close.end,
                value,
                bare,
            })
        }
        _ => None,
    }
}

/// `<exec lang="L">CODE</exec>` followed by `<output>RESULT</output>`.
fn exec_link(text: &str, tag: &OpenTag<'_>) -> Option<Link> {
    let close = find_close(text, tag.span.end, "exec")?;
    let lang = tag
        .attr("lang")
        .map_or_else(|| "python".to_owned(), |a| a.unescaped().into_owned());
    let (code_range, _) = block_content(text, tag.span.end..close.start);
    let code = text[code_range].to_owned();

    let after = close.end + leading_whitespace(&text[close.end..]);
    if !text[after..].starts_with("<output") {
        return None;
    }
    let TagScan::Complete(output) = scan_open_tag(text, after) else {
        return None;
    };
    if output.name != "output" {
        return None;
    }
    let output_close = find_close(text, output.span.end, "output")?;
    let (value, bare) = block_content(text, output.span.end..output_close.start);

    Some(Link {
        kind: LinkKind::Exec { lang, code },
        span: tag.span.start..output_close.end,
        value,
        bare,
    })
}

fn leading_whitespace(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// Range of the first `</name>` at or after `from`.
fn find_close(text: &str, from: usize, name: &str) -> Option<Range<usize>> {
    let needle = format!("</{name}>");
    text[from..]
        .find(&needle)
        .map(|pos| from + pos..from + pos + needle.len())
}

/// Block content with one leading and one trailing newline excluded.
///
/// Returns `bare = true` when there is no leading newline; such blocks are
/// rewritten as `\nVALUE\n`.
fn block_content(text: &str, range: Range<usize>) -> (Range<usize>, bool) {
    let inner = &text[range.clone()];
    let Some(rest) = inner.strip_prefix('\n') else {
        return (range, true);
    };
    let start = range.start + 1;
    let end = if rest.ends_with('\n') {
        range.end - 1
    } else {
        range.end
    };
    (start..end.max(start), false)
}

/// Distinct template names, in first-appearance order.
pub fn find_templates(links: &[Link]) -> Vec<String> {
    let mut seen = rustc_hash::FxHashSet::default();
    links
        .iter()
        .filter_map(Link::template)
        .filter(|t| seen.insert(*t))
        .map(str::to_owned)
        .collect()
}

// ============================================================================
// Incomplete tag detection
// ============================================================================

/// Check whether the document has a tag that is still being written.
///
/// Reports an opener missing its `>`, an unterminated attribute quote, or an
/// opener with no matching closing tag. Callers defer the render instead of
/// treating this as an error.
pub fn has_incomplete_tags(text: &str) -> bool {
    let excluded = excluded_regions(text);

    for m in opener_re().find_iter(text) {
        if fence::in_regions(&excluded, m.start()) {
            continue;
        }
        let name = &text[m.start() + 1..m.end()];
        let ours = |partial: &str| match name {
            "span" | "div" => partial.contains("data-codebook"),
            _ => true,
        };

        match scan_open_tag(text, m.start()) {
            TagScan::Incomplete { stop, .. } => {
                if ours(&text[m.start()..stop]) {
                    return true;
                }
            }
            TagScan::Complete(tag) => {
                if (name == "span" || name == "div") && tag.attr("data-codebook").is_none() {
                    continue;
                }
                let Some(close) = find_close(text, tag.span.end, name) else {
                    return true;
                };
                if name == "exec" && output_incomplete(text, close.end) {
                    return true;
                }
            }
            TagScan::Malformed => {}
        }
    }
    false
}

/// An `<output>` following an exec block that is not finished yet.
fn output_incomplete(text: &str, from: usize) -> bool {
    let at = from + leading_whitespace(&text[from..]);
    if !text[at..].starts_with("<output") {
        return false;
    }
    match scan_open_tag(text, at) {
        TagScan::Incomplete { .. } => true,
        TagScan::Complete(tag) => find_close(text, tag.span.end, "output").is_none(),
        TagScan::Malformed => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<LinkKind> {
        find_links(text).into_iter().map(|l| l.kind).collect()
    }

    #[test]
    fn test_inline_link() {
        let text = "Count: [`old`](codebook:a.b) items";
        let links = find_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].template(), Some("a.b"));
        assert_eq!(links[0].value(text), "old");
        assert_eq!(&text[links[0].span.clone()], "[`old`](codebook:a.b)");
    }

    #[test]
    fn test_inline_without_backticks() {
        let text = "[42](codebook:stats.count)";
        let links = find_links(text);
        assert_eq!(links[0].value(text), "42");
    }

    #[test]
    fn test_multiple_links_per_line_and_duplicates() {
        let text = "[`1`](codebook:x) and [`2`](codebook:y) and [`1`](codebook:x)";
        let links = find_links(text);
        assert_eq!(links.len(), 3);
        assert_eq!(find_templates(&links), vec!["x", "y"]);
    }

    #[test]
    fn test_url_link() {
        let text = r#"[Dashboard](http://old/url "codebook:dash.url")"#;
        let links = find_links(text);
        assert_eq!(
            links[0].kind,
            LinkKind::Url {
                template: "dash.url".into(),
                label: "Dashboard".into()
            }
        );
        assert_eq!(links[0].value(text), "http://old/url");
    }

    #[test]
    fn test_backlink_and_markdown() {
        let text = "See [B](b.md).\n[A](../a.md \"codebook:backlink\")\n";
        assert_eq!(
            kinds(text),
            vec![
                LinkKind::Markdown {
                    target: "b.md".into(),
                    label: "B".into()
                },
                LinkKind::Backlink {
                    target: "../a.md".into(),
                    label: "A".into()
                },
            ]
        );
    }

    #[test]
    fn test_markdown_link_with_spaces() {
        let text = "[N](My%20Notes.md) [O](<Old Notes.md>) [bad](Old Notes.md)";
        assert_eq!(
            kinds(text),
            vec![
                LinkKind::Markdown {
                    target: "My%20Notes.md".into(),
                    label: "N".into()
                },
                LinkKind::Markdown {
                    target: "Old Notes.md".into(),
                    label: "O".into()
                },
            ]
        );
    }

    #[test]
    fn test_external_md_is_not_markdown_link() {
        assert!(find_links("[x](https://example.com/readme.md)").is_empty());
    }

    #[test]
    fn test_link_template_is_ignored() {
        assert!(find_links(r#"[x](a.md "codebook:link")"#).is_empty());
    }

    #[test]
    fn test_span_and_div() {
        let text = "<span data-codebook=\"v\">1.0</span>\n<div data-codebook=\"t\">\nrow\n</div>";
        let links = find_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].value(text), "1.0");
        assert_eq!(links[1].template(), Some("t"));
        assert_eq!(links[1].value(text), "row");
        assert!(!links[1].bare);
    }

    #[test]
    fn test_span_without_data_attr_ignored() {
        assert!(find_links("<span class=\"x\">1</span>").is_empty());
    }

    #[test]
    fn test_escaped_quote_in_template() {
        let text = r#"<span data-codebook="a\"b">v</span>"#;
        let links = find_links(text);
        assert_eq!(links[0].template(), Some("a\"b"));
        assert_eq!(links[0].value(text), "v");
    }

    #[test]
    fn test_exec_block() {
        let text = "<exec lang=\"python\">\nprint(1)\n</exec>\n<output>\n1\n</output>\n";
        let links = find_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].kind,
            LinkKind::Exec {
                lang: "python".into(),
                code: "print(1)".into()
            }
        );
        assert_eq!(links[0].value(text), "1");
    }

    #[test]
    fn test_exec_without_output_is_not_a_link() {
        assert!(find_links("<exec lang=\"python\">\nx\n</exec>\n").is_empty());
    }

    #[test]
    fn test_query_block_bare_content() {
        let text = "<query endpoint=\"search\" keywords=\"a,b\" jq=\".x\"></query>";
        let links = find_links(text);
        let link = &links[0];
        assert!(link.bare);
        assert!(link.value.is_empty());
        match &link.kind {
            LinkKind::Query { endpoint, params } => {
                assert_eq!(endpoint, "search");
                assert_eq!(
                    params,
                    &vec![
                        ("keywords".to_string(), "a,b".to_string()),
                        ("jq".to_string(), ".x".to_string())
                    ]
                );
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_fenced_code_is_skipped() {
        let text = "```md\n[`1`](codebook:x)\n```\n[`2`](codebook:y)\n";
        let links = find_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].template(), Some("y"));
    }

    #[test]
    fn test_frontmatter_is_skipped() {
        let text = "---\nnote: \"[`1`](codebook:x)\"\n---\n[`2`](codebook:y)\n";
        let links = find_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].template(), Some("y"));
    }

    #[test]
    fn test_overlap_earliest_wins() {
        // The inline link sits inside the div; the div starts first
        let text = "<div data-codebook=\"t\">\n[`1`](codebook:x)\n</div>";
        let links = find_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].template(), Some("t"));
    }

    #[test]
    fn test_spans_are_ordered_and_disjoint() {
        let text = "[a](b.md) [`1`](codebook:x) <span data-codebook=\"s\">2</span> [c](d.md \"codebook:backlink\")";
        let links = find_links(text);
        assert_eq!(links.len(), 4);
        for pair in links.windows(2) {
            assert!(pair[0].span.end <= pair[1].span.start);
        }
    }

    #[test]
    fn test_incomplete_tags() {
        assert!(has_incomplete_tags("<span data-codebook=\"a"));
        assert!(has_incomplete_tags("<span data-codebook=\"a\">1"));
        assert!(has_incomplete_tags("<exec lang=\"python\">\nprint(1)\n"));
        assert!(has_incomplete_tags("<exec lang=\"py\">x</exec>\n<output>\n1\n"));
        assert!(has_incomplete_tags("<query endpoint=\"a\""));
        assert!(has_incomplete_tags("<div data-codebook=\"x\">\nrow\n"));
    }

    #[test]
    fn test_complete_tags() {
        assert!(!has_incomplete_tags("plain text"));
        assert!(!has_incomplete_tags("<span data-codebook=\"a\">1</span>"));
        assert!(!has_incomplete_tags("<span class=\"x\">unclosed"));
        assert!(!has_incomplete_tags("<div class=\"note\""));
        assert!(!has_incomplete_tags(
            "<exec lang=\"py\">x</exec>\n<output>\n1\n</output>"
        ));
    }

    #[test]
    fn test_incomplete_inside_fence_ignored() {
        assert!(!has_incomplete_tags("```\n<span data-codebook=\"a\n```\n"));
    }

    #[test]
    fn test_extraction_is_restartable() {
        let text = "[`1`](codebook:x)";
        assert_eq!(find_links(text), find_links(text));
    }
}
