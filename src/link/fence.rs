//! Fenced code region detection.
//!
//! Links and tags inside fenced code blocks are documentation examples, not
//! live links, so the extractor skips every byte range returned here.

use std::ops::Range;

/// An open fence: the fence character, its run length and where it started.
struct Fence {
    ch: u8,
    len: usize,
    start: usize,
}

/// Parse a fence marker at the start of `line`.
///
/// Up to three spaces of indentation are allowed, followed by a run of at
/// least three backticks or tildes.
fn fence_marker(line: &str) -> Option<(u8, usize, &str)> {
    let indent = line.bytes().take_while(|&b| b == b' ').count();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let ch = *rest.as_bytes().first()?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let len = rest.bytes().take_while(|&b| b == ch).count();
    if len < 3 {
        return None;
    }
    Some((ch, len, &rest[len..]))
}

/// Byte ranges of all fenced code blocks, including the fence lines.
///
/// An unclosed fence runs to the end of the text.
pub fn fenced_regions(text: &str) -> Vec<Range<usize>> {
    let mut regions = Vec::new();
    let mut open: Option<Fence> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        match &open {
            None => {
                if let Some((ch, len, info)) = fence_marker(content) {
                    // Backtick fences cannot carry backticks in their info string
                    if ch == b'`' && info.contains('`') {
                        continue;
                    }
                    open = Some(Fence {
                        ch,
                        len,
                        start: line_start,
                    });
                }
            }
            Some(fence) => {
                if let Some((ch, len, rest)) = fence_marker(content)
                    && ch == fence.ch
                    && len >= fence.len
                    && rest.trim().is_empty()
                {
                    regions.push(fence.start..offset);
                    open = None;
                }
            }
        }
    }

    if let Some(fence) = open {
        regions.push(fence.start..text.len());
    }

    regions
}

/// Check whether `pos` falls inside any of the (sorted, disjoint) regions.
pub fn in_regions(regions: &[Range<usize>], pos: usize) -> bool {
    let idx = regions.partition_point(|r| r.end <= pos);
    regions.get(idx).is_some_and(|r| r.contains(&pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtick_fence() {
        let text = "before\n```rust\nlet x = 1;\n```\nafter\n";
        let regions = fenced_regions(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(&text[regions[0].clone()], "```rust\nlet x = 1;\n```\n");
    }

    #[test]
    fn test_tilde_fence_requires_same_char() {
        let text = "~~~\n```\nstill code\n~~~\nout\n";
        let regions = fenced_regions(text);
        assert_eq!(regions.len(), 1);
        assert!(text[regions[0].clone()].ends_with("~~~\n"));
        assert!(!in_regions(&regions, text.find("out").unwrap()));
    }

    #[test]
    fn test_closing_fence_must_be_long_enough() {
        let text = "````\n```\ninside\n````\n";
        let regions = fenced_regions(text);
        assert_eq!(regions, vec![0..text.len()]);
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let text = "a\n```\nno close";
        let regions = fenced_regions(text);
        assert_eq!(regions, vec![2..text.len()]);
    }

    #[test]
    fn test_indented_four_spaces_is_not_a_fence() {
        assert!(fenced_regions("    ```\ncode\n    ```\n").is_empty());
    }

    #[test]
    fn test_in_regions() {
        let regions = vec![2..5, 10..12];
        assert!(!in_regions(&regions, 1));
        assert!(in_regions(&regions, 2));
        assert!(in_regions(&regions, 4));
        assert!(!in_regions(&regions, 5));
        assert!(in_regions(&regions, 11));
        assert!(!in_regions(&regions, 12));
    }
}
