//! Host pattern expansion.
//!
//! Turns bracket patterns like `web[01-03].dc1` into an ordered list of
//! hostnames. A pattern may carry several bracket sections; each section
//! holds comma-separated items, where an item is either a literal token or
//! an inclusive range (`1-10`, `01-03`, `a-c`). Numeric ranges keep the
//! zero-padding of their bounds.

use thiserror::Error;

/// Errors produced while expanding a host pattern
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    /// A `[` without its `]`, or the reverse
    #[error("unbalanced brackets in pattern '{0}'")]
    UnbalancedBrackets(String),

    /// `[]` or a dangling comma inside a section
    #[error("empty bracket section in pattern '{0}'")]
    EmptySection(String),

    /// A range whose bounds are not ordered or not comparable
    #[error("invalid range '{0}'")]
    InvalidRange(String),
}

/// Expand a bracket pattern into the full, ordered host list.
///
/// A pattern with no brackets expands to itself. Expansion is
/// deterministic: sections combine left to right, ranges ascend, and
/// comma items keep their written order.
pub fn expand(pattern: &str) -> Result<Vec<String>, PatternError> {
    let segments = split_segments(pattern)?;

    let mut hosts = vec![String::new()];
    for segment in segments {
        let parts = match segment {
            Segment::Literal(text) => vec![text],
            Segment::Bracket(body) => expand_section(&body, pattern)?,
        };

        let mut next = Vec::with_capacity(hosts.len() * parts.len());
        for prefix in &hosts {
            for part in &parts {
                next.push(format!("{}{}", prefix, part));
            }
        }
        hosts = next;
    }

    Ok(hosts)
}

enum Segment {
    Literal(String),
    Bracket(String),
}

fn split_segments(pattern: &str) -> Result<Vec<Segment>, PatternError> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_bracket = false;

    for ch in pattern.chars() {
        match ch {
            '[' => {
                if in_bracket {
                    return Err(PatternError::UnbalancedBrackets(pattern.to_string()));
                }
                if !current.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut current)));
                }
                in_bracket = true;
            }
            ']' => {
                if !in_bracket {
                    return Err(PatternError::UnbalancedBrackets(pattern.to_string()));
                }
                if current.is_empty() {
                    return Err(PatternError::EmptySection(pattern.to_string()));
                }
                segments.push(Segment::Bracket(std::mem::take(&mut current)));
                in_bracket = false;
            }
            _ => current.push(ch),
        }
    }

    if in_bracket {
        return Err(PatternError::UnbalancedBrackets(pattern.to_string()));
    }
    if !current.is_empty() {
        segments.push(Segment::Literal(current));
    }

    Ok(segments)
}

fn expand_section(body: &str, pattern: &str) -> Result<Vec<String>, PatternError> {
    let mut parts = Vec::new();

    for item in body.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(PatternError::EmptySection(pattern.to_string()));
        }

        match item.split_once('-') {
            Some((start, end)) if !start.is_empty() && !end.is_empty() => {
                parts.extend(expand_range(start, end, item)?);
            }
            _ => parts.push(item.to_string()),
        }
    }

    Ok(parts)
}

fn expand_range(start: &str, end: &str, item: &str) -> Result<Vec<String>, PatternError> {
    // numeric range, keeping the padding of the bounds
    if let (Ok(lo), Ok(hi)) = (start.parse::<u64>(), end.parse::<u64>()) {
        if lo > hi {
            return Err(PatternError::InvalidRange(item.to_string()));
        }
        let width = start.len().max(end.len());
        let pad = start.starts_with('0') || end.starts_with('0');
        return Ok((lo..=hi)
            .map(|n| {
                if pad {
                    format!("{:0width$}", n, width = width)
                } else {
                    n.to_string()
                }
            })
            .collect());
    }

    // single-character alphabetic range
    let (lo, hi) = match (single_char(start), single_char(end)) {
        (Some(a), Some(b)) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => (a, b),
        _ => return Err(PatternError::InvalidRange(item.to_string())),
    };
    if lo > hi {
        return Err(PatternError::InvalidRange(item.to_string()));
    }

    Ok((lo..=hi).map(|c| (c as char).to_string()).collect())
}

fn single_char(s: &str) -> Option<u8> {
    let mut bytes = s.bytes();
    match (bytes.next(), bytes.next()) {
        (Some(b), None) => Some(b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host_passes_through() {
        assert_eq!(expand("web1.dc1").unwrap(), vec!["web1.dc1"]);
    }

    #[test]
    fn test_padded_numeric_range() {
        assert_eq!(expand("h[01-03]").unwrap(), vec!["h01", "h02", "h03"]);
    }

    #[test]
    fn test_unpadded_numeric_range() {
        assert_eq!(expand("db[1-3]").unwrap(), vec!["db1", "db2", "db3"]);
    }

    #[test]
    fn test_range_with_suffix() {
        assert_eq!(
            expand("web[01-02].dc1").unwrap(),
            vec!["web01.dc1", "web02.dc1"]
        );
    }

    #[test]
    fn test_comma_items_keep_order() {
        assert_eq!(expand("n[3,1,2]").unwrap(), vec!["n3", "n1", "n2"]);
    }

    #[test]
    fn test_mixed_items_and_ranges() {
        assert_eq!(
            expand("n[9,1-3]").unwrap(),
            vec!["n9", "n1", "n2", "n3"]
        );
    }

    #[test]
    fn test_alpha_range() {
        assert_eq!(expand("node-[a-c]").unwrap(), vec!["node-a", "node-b", "node-c"]);
    }

    #[test]
    fn test_multiple_sections_combine() {
        assert_eq!(
            expand("r[1-2]c[1-2]").unwrap(),
            vec!["r1c1", "r1c2", "r2c1", "r2c2"]
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            expand("h[01-"),
            Err(PatternError::UnbalancedBrackets(_))
        ));
        assert!(matches!(expand("h]1["), Err(PatternError::UnbalancedBrackets(_))));
        assert!(matches!(expand("h[]"), Err(PatternError::EmptySection(_))));
        assert!(matches!(expand("h[3-1]"), Err(PatternError::InvalidRange(_))));
        assert!(matches!(expand("h[a-3]"), Err(PatternError::InvalidRange(_))));
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let first = expand("w[01-05].dc[1-2]").unwrap();
        let second = expand("w[01-05].dc[1-2]").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
        assert_eq!(first[0], "w01.dc1");
        assert_eq!(first[9], "w05.dc2");
    }
}
