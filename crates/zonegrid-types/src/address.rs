//! Zone address helpers.
//!
//! Addresses are opaque hierarchical identifiers such as
//! `user@domain/laptop/urn:services:calendar`. There is no canonical parser;
//! routing only ever splits on the configured separator and compares string
//! prefixes, so that is all this module provides.

/// Default separator between address segments.
pub const DEFAULT_SEPARATOR: char = '/';

/// Split an address into its segments.
pub fn segments(address: &str, separator: char) -> Vec<&str> {
    address.split(separator).collect()
}

/// The top-level segment of an address (the zone identity / home coordinator).
pub fn top_segment(address: &str, separator: char) -> &str {
    address.split(separator).next().unwrap_or(address)
}

/// All proper prefixes of an address, shortest first, excluding the full
/// address itself. `"a/b/c"` yields `["a", "a/b"]`.
pub fn proper_prefixes(address: &str, separator: char) -> Vec<String> {
    let parts = segments(address, separator);
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        if current.is_empty() {
            current.push_str(part);
        } else {
            current.push(separator);
            current.push_str(part);
        }
        prefixes.push(current.clone());
    }
    prefixes
}

/// Number of segments `address` sits below `base`, if `address` is strictly
/// under `base`. `depth_below("a/b/x/y", "a/b", '/')` is `Some(2)`.
pub fn depth_below(address: &str, base: &str, separator: char) -> Option<usize> {
    let rest = address.strip_prefix(base)?;
    let rest = rest.strip_prefix(separator)?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.split(separator).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        assert_eq!(segments("a/b/c", '/'), vec!["a", "b", "c"]);
        assert_eq!(segments("solo", '/'), vec!["solo"]);
    }

    #[test]
    fn test_top_segment() {
        assert_eq!(top_segment("user@domain/laptop/svc", '/'), "user@domain");
        assert_eq!(top_segment("hub", '/'), "hub");
    }

    #[test]
    fn test_proper_prefixes() {
        assert_eq!(proper_prefixes("a/b/c", '/'), vec!["a", "a/b"]);
        assert!(proper_prefixes("a", '/').is_empty());
    }

    #[test]
    fn test_depth_below() {
        assert_eq!(depth_below("a/b/x/y", "a/b", '/'), Some(2));
        assert_eq!(depth_below("a/b/x", "a/b", '/'), Some(1));
        assert_eq!(depth_below("a/b", "a/b", '/'), None);
        assert_eq!(depth_below("a/c/x", "a/b", '/'), None);
        // prefix match must respect segment boundaries
        assert_eq!(depth_below("a/bb/x", "a/b", '/'), None);
    }
}
