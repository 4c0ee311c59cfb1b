use std::collections::BTreeMap;
use std::fmt;

/// Cookies parsed from a single `Cookie` request header.
///
/// Built once per request and never mutated afterwards. Outbound changes go
/// through `Set-Cookie` lines instead.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: BTreeMap<String, String>,
}

impl CookieJar {
    /// Parses a raw `Cookie` header value.
    ///
    /// Segments are split on `;` and trimmed, then split on the first `=`.
    /// Segments without `=` or with an empty name are dropped. When a name
    /// repeats, the last occurrence wins.
    pub fn parse(header: &str) -> Self {
        let mut entries = BTreeMap::new();
        for segment in header.split(';') {
            let Some((name, value)) = segment.trim().split_once('=') else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            entries.insert(name.to_string(), value.to_string());
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// Cookie values are credentials; only names are printed.
impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
