use std::collections::HashMap;

use crate::bridge::{CookieOptions, SessionCookieBridge};

/// Named cookie storage an auth client reads tokens from and writes them to.
///
/// Implementations never fail: an unreadable cookie is simply absent.
pub trait CookieStore: Send {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions);

    fn remove(&mut self, name: &str);
}

impl CookieStore for SessionCookieBridge {
    fn get(&self, name: &str) -> Option<String> {
        SessionCookieBridge::get(self, name)
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        SessionCookieBridge::set(self, name, value, options);
    }

    fn remove(&mut self, name: &str) {
        SessionCookieBridge::remove(self, name);
    }
}

/// In-memory store where writes are immediately visible to reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieStore {
    values: HashMap<String, String>,
    max_ages: HashMap<String, u64>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Max-Age recorded by the last `set` of `name`.
    pub fn max_age(&self, name: &str) -> Option<u64> {
        self.max_ages.get(name).copied()
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .filter(|value| !value.is_empty())
            .cloned()
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.values.insert(name.to_string(), value.to_string());
        self.max_ages
            .insert(name.to_string(), options.effective_max_age());
    }

    fn remove(&mut self, name: &str) {
        self.values.remove(name);
        self.max_ages.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ACCESS_TOKEN_COOKIE, DEFAULT_MAX_AGE_SECONDS};

    fn write_then_clear(store: &mut dyn CookieStore) {
        store.set(ACCESS_TOKEN_COOKIE, "tok1", &CookieOptions::default());
        store.remove("stale");
    }

    #[test]
    fn bridge_is_usable_through_the_trait() {
        let mut bridge = SessionCookieBridge::new(Some("sb-access-token=inbound"));
        write_then_clear(&mut bridge);

        assert_eq!(
            CookieStore::get(&bridge, ACCESS_TOKEN_COOKIE).as_deref(),
            Some("inbound")
        );
        assert_eq!(bridge.set_cookie_headers().len(), 2);
    }

    #[test]
    fn memory_store_reflects_writes() {
        let mut store = MemoryCookieStore::new().with_cookie("stale", "x");
        write_then_clear(&mut store);

        assert_eq!(store.get(ACCESS_TOKEN_COOKIE).as_deref(), Some("tok1"));
        assert_eq!(store.max_age(ACCESS_TOKEN_COOKIE), Some(DEFAULT_MAX_AGE_SECONDS));
        assert!(!store.contains("stale"));
    }
}
