//! The trailing backlinks section.
//!
//! ```markdown
//! ...document body...
//!
//! --- BACKLINKS ---
//! [overview](../overview.md "codebook:backlink")
//! [design](design.md "codebook:backlink")
//! ```
//!
//! The real marker is the last marker line outside fenced code, so example
//! sections inside code blocks are left alone.

use crate::{
    link::fence::{fenced_regions, in_regions},
    utils::path::{decode_link_path, encode_link_path},
};
use regex::Regex;
use std::sync::OnceLock;

pub const MARKER: &str = "--- BACKLINKS ---";

/// One line of the section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Entry(Entry),
    /// Anything that is not a backlink entry, kept verbatim.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub label: String,
    /// Path from the target's directory to the source, decoded.
    pub target: String,
}

impl Entry {
    /// The entry line. The path is percent-encoded so it never holds spaces.
    pub fn render(&self) -> String {
        format!(
            "[{}]({} \"codebook:backlink\")",
            self.label,
            encode_link_path(&self.target)
        )
    }
}

fn entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\[([^\]\n]+)\]\((<[^<>\n]+>|[^"\s)<>]+)\s+"codebook:backlink"\)$"#)
            .unwrap()
    })
}

fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    match entry_re().captures(trimmed) {
        Some(caps) => Line::Entry(Entry {
            label: caps[1].to_owned(),
            target: decode_link_path(&caps[2]).into_owned(),
        }),
        None => Line::Other(trimmed.to_owned()),
    }
}

/// A document split into its body and backlinks section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document<'a> {
    pub body: &'a str,
    /// `None` when the document has no section.
    pub lines: Option<Vec<Line>>,
}

impl<'a> Document<'a> {
    pub fn parse(text: &'a str) -> Self {
        match find_marker(text) {
            Some(pos) => {
                let after = &text[pos + MARKER.len()..];
                let lines = after
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(parse_line)
                    .collect();
                Self {
                    body: &text[..pos],
                    lines: Some(lines),
                }
            }
            None => Self {
                body: text,
                lines: None,
            },
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.lines.iter().flatten().filter_map(|line| match line {
            Line::Entry(entry) => Some(entry),
            Line::Other(_) => None,
        })
    }
}

/// Byte offset of the real marker line.
fn find_marker(text: &str) -> Option<usize> {
    let fences = fenced_regions(text);
    let mut offset = 0;
    let mut found = None;
    for line in text.split_inclusive('\n') {
        if line.trim() == MARKER && !in_regions(&fences, offset) {
            found = Some(offset + (line.len() - line.trim_start().len()));
        }
        offset += line.len();
    }
    found
}

/// Join a body with section lines. An empty section is dropped entirely.
pub fn join(body: &str, lines: &[Line]) -> String {
    let body = body.trim_end();
    if lines.is_empty() {
        return if body.is_empty() {
            String::new()
        } else {
            format!("{body}\n")
        };
    }

    let mut out = String::with_capacity(body.len() + 64 * lines.len());
    if !body.is_empty() {
        out.push_str(body);
        out.push_str("\n\n");
    }
    out.push_str(MARKER);
    out.push('\n');
    for line in lines {
        match line {
            Line::Entry(entry) => out.push_str(&entry.render()),
            Line::Other(text) => out.push_str(text),
        }
        out.push('\n');
    }
    out
}
