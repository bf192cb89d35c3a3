use crate::error::{Error, Result};

/// One token of a parsed AOB pattern: a concrete byte, or a wildcard matching
/// anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternByte {
    Exact(u8),
    Wildcard,
}

/// Parses a whitespace-separated AOB pattern such as `"48 89 ?? 90 5D C3"`.
/// Each token is either two hex digits or one of `??`, `?`, `**`. Empty or
/// malformed patterns are rejected.
pub fn parse_aob_pattern(text: &str) -> Result<Vec<PatternByte>> {
    let mut out = Vec::new();
    for tok in text.split_whitespace() {
        let upper = tok.to_ascii_uppercase();
        if upper == "??" || upper == "?" || upper == "**" {
            out.push(PatternByte::Wildcard);
        } else {
            let byte = u8::from_str_radix(&upper, 16).map_err(|e| Error::ParseFailed {
                what: "AOB pattern byte",
                detail: format!("{tok}: {e}"),
            })?;
            out.push(PatternByte::Exact(byte));
        }
    }
    if out.is_empty() {
        return Err(Error::ParseFailed {
            what: "AOB pattern",
            detail: "empty pattern".to_string(),
        });
    }
    Ok(out)
}

/// True iff `window` (same length as `pattern`) matches, treating wildcards as
/// matching any byte.
pub fn matches_at(pattern: &[PatternByte], window: &[u8]) -> bool {
    debug_assert_eq!(pattern.len(), window.len());
    pattern.iter().zip(window.iter()).all(|(p, b)| match p {
        PatternByte::Exact(expected) => expected == b,
        PatternByte::Wildcard => true,
    })
}

/// Scans `haystack` for every offset where `pattern` matches, used both by the
/// in-chunk scanner loop and by tests.
pub fn find_all(pattern: &[PatternByte], haystack: &[u8]) -> Vec<usize> {
    if pattern.len() > haystack.len() {
        return Vec::new();
    }
    let limit = haystack.len() - pattern.len() + 1;
    (0..limit)
        .filter(|&i| matches_at(pattern, &haystack[i..i + pattern.len()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcards() {
        let p = parse_aob_pattern("48 89 ?? 90 5D C3").unwrap();
        assert_eq!(p.len(), 6);
        assert_eq!(p[2], PatternByte::Wildcard);
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_aob_pattern("   ").is_err());
    }

    #[test]
    fn finds_wildcard_match() {
        let pattern = parse_aob_pattern("48 89 ?? 90 5D C3").unwrap();
        let hay = [0x48, 0x89, 0xE5, 0x90, 0x5D, 0xC3];
        assert_eq!(find_all(&pattern, &hay), vec![0]);
    }
}
