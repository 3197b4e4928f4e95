//! Ordered header storage.

/// Header fields in arrival order.
///
/// Duplicates are kept; lookups compare names case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any value of `name`, read as a comma-separated list,
    /// contains `token` (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive_and_ordered() {
        let mut headers = HeaderList::new();
        headers.append("Accept", "text/html");
        headers.append("X-Tag", "one");
        headers.append("x-tag", "two");

        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.get("X-TAG"), Some("one"));
        assert_eq!(headers.get_all("x-tag").collect::<Vec<_>>(), ["one", "two"]);
        assert_eq!(headers.get("missing"), None);
        assert_eq!(headers.len(), 3);
        assert_eq!(
            headers.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            ["Accept", "X-Tag", "x-tag"]
        );
    }

    #[test]
    fn test_has_token() {
        let mut headers = HeaderList::new();
        headers.append("Connection", "Upgrade, Close");
        assert!(headers.has_token("connection", "close"));
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "keep-alive"));
        assert!(!HeaderList::new().has_token("connection", "close"));
    }
}
