//! Minimal path extraction over JSON values.
//!
//! Supports:
//! - `.a.b.c` / `$.a.b.c` / `a.b.c` (dot notation)
//! - `.a[0].b` / `items.0` (array index)
//! - `.` / `$` (whole value)
//!
//! Does NOT support filters, wildcards or slices.

use serde_json::Value;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// Parse a path expression into segments
///
/// Examples:
/// - ".price.currency" → [Field("price"), Field("currency")]
/// - "$.items[0].name" → [Field("items"), Index(0), Field("name")]
pub fn parse(path: &str) -> Result<Vec<Segment>, String> {
    let unsupported = || format!("unsupported path expression `{path}`");

    let trimmed = path.trim();
    let rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for part in rest.split('.') {
        if part.is_empty() {
            return Err(unsupported());
        }

        let (field, mut brackets) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if !field.is_empty() {
            match field.parse::<usize>() {
                // Numeric segment treated as array index (e.g., "items.0")
                Ok(index) if brackets.is_empty() => segments.push(Segment::Index(index)),
                _ => segments.push(Segment::Field(field.to_owned())),
            }
        }

        while !brackets.is_empty() {
            let close = brackets.find(']').ok_or_else(unsupported)?;
            let index = brackets[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| unsupported())?;
            segments.push(Segment::Index(index));
            brackets = &brackets[close + 1..];
            if !brackets.is_empty() && !brackets.starts_with('[') {
                return Err(unsupported());
            }
        }
    }

    Ok(segments)
}

/// Select the sub-value addressed by `path`.
pub fn extract(value: &Value, path: &str) -> Result<Value, String> {
    let mut current = value;
    for segment in parse(path)? {
        current = match (&segment, current) {
            (Segment::Field(name), Value::Object(map)) => map
                .get(name)
                .ok_or_else(|| format!("key `{name}` not found"))?,
            (Segment::Index(i), Value::Array(items)) => items
                .get(*i)
                .ok_or_else(|| format!("index {i} out of range"))?,
            (Segment::Field(name), _) => return Err(format!("cannot read `{name}` of non-object")),
            (Segment::Index(i), _) => return Err(format!("cannot index [{i}] into non-array")),
        };
    }
    Ok(current.clone())
}

/// Format an extracted value for embedding in markdown.
///
/// Strings are verbatim, scalars use their display form, lists of strings
/// become markdown lines joined by hard breaks, and anything else is pretty
/// JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("  \n"),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}
