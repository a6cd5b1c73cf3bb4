//! YAML frontmatter.
//!
//! ```markdown
//! ---
//! title: Design notes
//! tags: [arch, backend]
//! disable: [links]
//! ---
//! ```

use crate::log;
use serde::Deserialize;
use std::ops::Range;

/// Parsed frontmatter. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub tags: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub disable: Vec<String>,
}

impl Frontmatter {
    /// Value rewriting is turned off for this document.
    pub fn links_disabled(&self) -> bool {
        self.disable.iter().any(|d| d == "links")
    }

    /// The document neither generates nor receives backlinks.
    pub fn backlinks_disabled(&self) -> bool {
        self.disable.iter().any(|d| d == "backlinks")
    }
}

/// Accept `disable: links` as well as `disable: [links, backlinks]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Locate the frontmatter block.
///
/// Returns the byte range of the whole block (both delimiter lines included)
/// and the range of the YAML body between them.
pub fn block(text: &str) -> Option<(Range<usize>, Range<usize>)> {
    let first = text.split_inclusive('\n').next()?;
    if first.trim_end() != "---" || !first.ends_with('\n') {
        return None;
    }

    let body_start = first.len();
    let mut offset = body_start;
    for line in text[body_start..].split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim_end() == "---" {
            return Some((0..offset, body_start..line_start));
        }
    }
    None
}

/// Parse the frontmatter of `text`.
///
/// Missing frontmatter yields the default; malformed YAML is logged and
/// treated as empty.
pub fn parse(text: &str) -> Frontmatter {
    let Some((_, body)) = block(text) else {
        return Frontmatter::default();
    };
    let yaml = &text[body];
    if yaml.trim().is_empty() {
        return Frontmatter::default();
    }

    match serde_yaml::from_str::<Frontmatter>(yaml) {
        Ok(fm) => fm,
        Err(e) => {
            log!("frontmatter"; "ignoring malformed frontmatter: {e}");
            Frontmatter::default()
        }
    }
}
