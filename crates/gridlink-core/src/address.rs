//! Device address helpers
//!
//! Device messages look like `/<prefix>/grid/key`. The prefix is the first
//! path segment; everything after it is the event suffix.

/// Split `/<prefix><rest>` into `(prefix, rest)`.
///
/// Only the first segment is treated as prefix, so `/a/b/grid/key` yields
/// `("a", "/b/grid/key")`.
pub fn split_prefix(address: &str) -> Option<(&str, &str)> {
    let stripped = address.strip_prefix('/')?;
    let (prefix, rest) = match stripped.find('/') {
        Some(idx) => stripped.split_at(idx),
        None => (stripped, ""),
    };
    if prefix.is_empty() {
        return None;
    }
    Some((prefix, rest))
}

/// Prepend `/<id>` to an absolute address
pub fn prefixed(id: &str, address: &str) -> String {
    format!("/{}{}", id, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_prefix() {
        assert_eq!(split_prefix("/m1000/grid/key"), Some(("m1000", "/grid/key")));
        assert_eq!(split_prefix("/m1000/tilt"), Some(("m1000", "/tilt")));
        assert_eq!(split_prefix("/m1000"), Some(("m1000", "")));
        assert_eq!(split_prefix("/a/b/enc/delta"), Some(("a", "/b/enc/delta")));
        assert_eq!(split_prefix("//grid/key"), None);
        assert_eq!(split_prefix("grid/key"), None);
    }

    #[test]
    fn test_prefixed() {
        assert_eq!(prefixed("m1000", "/grid/led/all"), "/m1000/grid/led/all");
    }
}
