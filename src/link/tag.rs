//! HTML-style opening tag scanner.
//!
//! A small state machine over `<name attr="value" ...>`. It reports whether
//! the tag is complete, still being typed (missing `>`, unterminated quote),
//! or not a tag we understand at all.
//!
//! ```text
//!           ws                      name char        \
//!          ┌──┐                     ┌──┐          ┌──────┐
//!          ▼  │   name char         ▼  │    = ws  │      ▼
//!   ──▶ BeforeAttr ─────────▶ AttrName ──▶ BeforeValue ──"──▶ Value ◀─▶ Escape
//!          │  ▲                                               │
//!          │  └───────────────────── closing quote ───────────┘
//!          └─ > ──▶ Complete
//! ```

use std::{borrow::Cow, ops::Range};

/// A parsed attribute. `value` is the raw text between the quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl Attr<'_> {
    /// Attribute value with backslash escapes removed.
    pub fn unescaped(&self) -> Cow<'_, str> {
        if !self.value.contains('\\') {
            return Cow::Borrowed(self.value);
        }
        let mut out = String::with_capacity(self.value.len());
        let mut chars = self.value.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        Cow::Owned(out)
    }
}

/// A complete opening tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTag<'a> {
    pub name: &'a str,
    pub attrs: Vec<Attr<'a>>,
    /// From `<` to just past `>`.
    pub span: Range<usize>,
}

impl<'a> OpenTag<'a> {
    pub fn attr(&self, name: &str) -> Option<&Attr<'a>> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// Why a tag is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incomplete {
    /// End of text (or a new `<`) before the closing `>`.
    MissingClose,
    /// A quoted attribute value hit a newline, `<` or end of text.
    UnterminatedQuote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagScan<'a> {
    Complete(OpenTag<'a>),
    /// `stop` is where scanning gave up.
    Incomplete { reason: Incomplete, stop: usize },
    /// Not a tag this scanner understands (e.g. unquoted attribute value).
    Malformed,
}

#[derive(Clone, Copy)]
enum State {
    BeforeAttr,
    AttrName { start: usize },
    AfterAttrName { name: (usize, usize) },
    BeforeValue { name: (usize, usize) },
    Value { name: (usize, usize), quote: u8, start: usize },
    Escape { name: (usize, usize), quote: u8, start: usize },
}

#[inline]
const fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

/// Scan the opening tag that starts at `start` (which must point at `<`).
pub fn scan_open_tag(text: &str, start: usize) -> TagScan<'_> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'<') {
        return TagScan::Malformed;
    }

    let name_start = start + 1;
    let name_len = bytes[name_start..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    if name_len == 0 {
        return TagScan::Malformed;
    }
    let name = &text[name_start..name_start + name_len];

    let mut attrs = Vec::new();
    let mut state = State::BeforeAttr;
    let mut i = name_start + name_len;

    // The tag name must be followed by whitespace, `>` or end of text
    match bytes.get(i) {
        Some(b) if b.is_ascii_whitespace() || *b == b'>' => {}
        Some(_) => return TagScan::Malformed,
        None => {
            return TagScan::Incomplete {
                reason: Incomplete::MissingClose,
                stop: i,
            };
        }
    }

    while i < bytes.len() {
        let b = bytes[i];
        state = match state {
            State::BeforeAttr => match b {
                b'>' => return complete(name, attrs, start..i + 1),
                b'<' => return incomplete(Incomplete::MissingClose, i),
                _ if b.is_ascii_whitespace() => State::BeforeAttr,
                _ if is_name_byte(b) => State::AttrName { start: i },
                _ => return TagScan::Malformed,
            },
            State::AttrName { start: s } => match b {
                b'=' => State::BeforeValue { name: (s, i) },
                b'>' => {
                    attrs.push(Attr { name: &text[s..i], value: "" });
                    return complete(name, attrs, start..i + 1);
                }
                b'<' => return incomplete(Incomplete::MissingClose, i),
                _ if b.is_ascii_whitespace() => State::AfterAttrName { name: (s, i) },
                _ if is_name_byte(b) => state,
                _ => return TagScan::Malformed,
            },
            State::AfterAttrName { name: n } => match b {
                b'=' => State::BeforeValue { name: n },
                b'>' => {
                    attrs.push(Attr { name: sub(text, n), value: "" });
                    return complete(name, attrs, start..i + 1);
                }
                b'<' => return incomplete(Incomplete::MissingClose, i),
                _ if b.is_ascii_whitespace() => state,
                _ if is_name_byte(b) => {
                    attrs.push(Attr { name: sub(text, n), value: "" });
                    State::AttrName { start: i }
                }
                _ => return TagScan::Malformed,
            },
            State::BeforeValue { name: n } => match b {
                b'"' | b'\'' => State::Value {
                    name: n,
                    quote: b,
                    start: i + 1,
                },
                b'<' => return incomplete(Incomplete::MissingClose, i),
                b' ' | b'\t' => state,
                _ => return TagScan::Malformed,
            },
            State::Value {
                name: n,
                quote,
                start: s,
            } => match b {
                b'\\' => State::Escape {
                    name: n,
                    quote,
                    start: s,
                },
                b'\n' | b'<' => return incomplete(Incomplete::UnterminatedQuote, i),
                _ if b == quote => {
                    attrs.push(Attr {
                        name: sub(text, n),
                        value: &text[s..i],
                    });
                    State::BeforeAttr
                }
                _ => state,
            },
            State::Escape {
                name: n,
                quote,
                start: s,
            } => match b {
                b'\n' => return incomplete(Incomplete::UnterminatedQuote, i),
                _ => State::Value {
                    name: n,
                    quote,
                    start: s,
                },
            },
        };
        i += 1;
    }

    let reason = match state {
        State::Value { .. } | State::Escape { .. } => Incomplete::UnterminatedQuote,
        _ => Incomplete::MissingClose,
    };
    incomplete(reason, bytes.len())
}

#[inline]
fn sub(text: &str, (s, e): (usize, usize)) -> &str {
    &text[s..e]
}

#[inline]
fn complete<'a>(name: &'a str, attrs: Vec<Attr<'a>>, span: Range<usize>) -> TagScan<'a> {
    TagScan::Complete(OpenTag { name, attrs, span })
}

#[inline]
fn incomplete<'a>(reason: Incomplete, stop: usize) -> TagScan<'a> {
    TagScan::Incomplete { reason, stop }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(text: &str) -> OpenTag<'_> {
        match scan_open_tag(text, 0) {
            TagScan::Complete(tag) => tag,
            other => panic!("expected complete tag, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_tag() {
        let tag = open(r#"<span data-codebook="a.b">"#);
        assert_eq!(tag.name, "span");
        assert_eq!(tag.attr("data-codebook").unwrap().value, "a.b");
        assert_eq!(tag.span, 0..26);
    }

    #[test]
    fn test_multiple_attrs_and_quotes() {
        let tag = open("<query endpoint=\"find\" keywords='a,b' limit=\"5\">");
        assert_eq!(tag.name, "query");
        let names: Vec<_> = tag.attrs.iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["endpoint", "keywords", "limit"]);
        assert_eq!(tag.attr("keywords").unwrap().value, "a,b");
    }

    #[test]
    fn test_escaped_quote_in_value() {
        let tag = open(r#"<span data-codebook="say \"hi\"">"#);
        let attr = tag.attr("data-codebook").unwrap();
        assert_eq!(attr.value, r#"say \"hi\""#);
        assert_eq!(attr.unescaped(), r#"say "hi""#);
    }

    #[test]
    fn test_multiline_attributes() {
        let tag = open("<exec\n  lang=\"python\"\n>");
        assert_eq!(tag.attr("lang").unwrap().value, "python");
    }

    #[test]
    fn test_boolean_attr() {
        let tag = open("<div hidden data-codebook=\"x\">");
        assert_eq!(tag.attr("hidden").unwrap().value, "");
        assert_eq!(tag.attr("data-codebook").unwrap().value, "x");
    }

    #[test]
    fn test_missing_close() {
        assert_eq!(
            scan_open_tag(r#"<span data-codebook="a""#, 0),
            TagScan::Incomplete {
                reason: Incomplete::MissingClose,
                stop: 23
            }
        );
        assert!(matches!(
            scan_open_tag("<exec lang=\"py\"\n<p>", 0),
            TagScan::Incomplete {
                reason: Incomplete::MissingClose,
                ..
            }
        ));
        assert!(matches!(
            scan_open_tag("<exec", 0),
            TagScan::Incomplete {
                reason: Incomplete::MissingClose,
                ..
            }
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        for text in [
            "<span data-codebook=\"a.b",
            "<span data-codebook=\"a.b\n\">",
            "<span data-codebook=\"a<b\">",
            "<span data-codebook=\"a\\",
        ] {
            assert!(
                matches!(
                    scan_open_tag(text, 0),
                    TagScan::Incomplete {
                        reason: Incomplete::UnterminatedQuote,
                        ..
                    }
                ),
                "{text:?}"
            );
        }
    }

    #[test]
    fn test_malformed() {
        assert_eq!(scan_open_tag("<span a=b>", 0), TagScan::Malformed);
        assert_eq!(scan_open_tag("< span>", 0), TagScan::Malformed);
        assert_eq!(scan_open_tag("<spanx!>", 0), TagScan::Malformed);
        assert_eq!(scan_open_tag("x", 0), TagScan::Malformed);
    }

    #[test]
    fn test_offset_start() {
        let text = "text <div data-codebook=\"t\">";
        match scan_open_tag(text, 5) {
            TagScan::Complete(tag) => assert_eq!(tag.span, 5..text.len()),
            other => panic!("{other:?}"),
        }
    }
}
