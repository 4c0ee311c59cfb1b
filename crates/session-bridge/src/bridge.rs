use std::fmt;

use regex::Regex;
use tracing::{debug, warn};

use crate::jar::CookieJar;
use crate::packed::PackedSession;
use crate::{DEFAULT_MAX_AGE_SECONDS, PACKED_SESSION_COOKIE, PACKED_SESSION_PREFIX, is_token_cookie};

/// Options an auth client may attach to a cookie write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// Max-Age in seconds; [`DEFAULT_MAX_AGE_SECONDS`] when unset or zero.
    pub max_age: Option<u64>,
}

impl CookieOptions {
    pub fn with_max_age(max_age_seconds: u64) -> Self {
        Self {
            max_age: Some(max_age_seconds),
        }
    }

    pub fn effective_max_age(&self) -> u64 {
        // A write never expires the cookie; that is what `remove` is for.
        self.max_age
            .filter(|age| *age > 0)
            .unwrap_or(DEFAULT_MAX_AGE_SECONDS)
    }
}

/// Per-request translation layer between the inbound `Cookie` header and the
/// `Set-Cookie` lines of the outgoing response.
pub struct SessionCookieBridge {
    raw_header: String,
    jar: CookieJar,
    outgoing: Vec<String>,
}

impl SessionCookieBridge {
    /// Builds a bridge from the request's `Cookie` header. An absent header is
    /// treated as empty.
    pub fn new(cookie_header: Option<&str>) -> Self {
        let raw_header = cookie_header.unwrap_or_default().to_string();
        let jar = CookieJar::parse(&raw_header);
        debug!(cookies = jar.len(), "parsed request cookies");
        Self {
            raw_header,
            jar,
            outgoing: Vec::new(),
        }
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    /// Looks up a cookie value for the auth client.
    ///
    /// Token cookies are served from the jar first, then from the packed
    /// session in cookie `0`. Every name finally falls back to a scan of the
    /// raw header, whose match is URL-decoded. Empty values are reported as
    /// absent.
    pub fn get(&self, name: &str) -> Option<String> {
        if is_token_cookie(name) {
            if let Some(value) = self.jar.get(name).filter(|value| !value.is_empty()) {
                debug!(cookie = name, "found token cookie");
                return Some(value.to_string());
            }
            if let Some(value) = self.packed_token(name) {
                debug!(cookie = name, "using token from packed session cookie");
                return Some(value);
            }
        }

        let value = self.scan_raw_header(name);
        if value.is_some() {
            debug!(cookie = name, "found cookie in raw header");
        }
        value
    }

    /// Queues `name=value` with the session attributes.
    pub fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        debug!(cookie = name, max_age = options.effective_max_age(), "setting cookie");
        self.outgoing
            .push(set_cookie_line(name, value, options.effective_max_age()));
    }

    /// Queues an expiring, empty `name` cookie.
    pub fn remove(&mut self, name: &str) {
        debug!(cookie = name, "removing cookie");
        self.outgoing.push(removal_cookie_line(name));
    }

    /// `Set-Cookie` lines in the order they were queued.
    pub fn set_cookie_headers(&self) -> &[String] {
        &self.outgoing
    }

    pub fn into_set_cookie_headers(self) -> Vec<String> {
        self.outgoing
    }

    fn packed_token(&self, name: &str) -> Option<String> {
        let raw = self.jar.get(PACKED_SESSION_COOKIE)?;
        if !raw.starts_with(PACKED_SESSION_PREFIX) {
            return None;
        }
        match PackedSession::decode(raw) {
            Ok(session) => session.token_for_cookie(name).map(ToString::to_string),
            Err(error) => {
                warn!(
                    cookie = PACKED_SESSION_COOKIE,
                    reason = %error,
                    "ignoring undecodable packed session cookie"
                );
                None
            }
        }
    }

    fn scan_raw_header(&self, name: &str) -> Option<String> {
        if name.is_empty() || self.raw_header.is_empty() {
            return None;
        }
        // Names are caller-chosen, so the pattern is built per lookup. The auth
        // client reads a handful of names per request.
        let pattern = format!(r"(?:^|;\s*){}=([^;]*)", regex::escape(name));
        let matcher = Regex::new(&pattern).ok()?;
        let raw_value = matcher.captures(&self.raw_header)?.get(1)?.as_str();
        let value = match urlencoding::decode(raw_value) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => raw_value.to_string(),
        };
        (!value.is_empty()).then_some(value)
    }
}

impl fmt::Debug for SessionCookieBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookieBridge")
            .field("jar", &self.jar)
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}

/// `Set-Cookie` line for a session write.
pub fn set_cookie_line(name: &str, value: &str, max_age_seconds: u64) -> String {
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}")
}

/// `Set-Cookie` line that clears `name`.
pub fn removal_cookie_line(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};

    fn bridge(header: &str) -> SessionCookieBridge {
        SessionCookieBridge::new(Some(header))
    }

    fn packed_cookie(json: &str) -> String {
        format!("0=base64-{}", STANDARD.encode(json))
    }

    #[test]
    fn direct_token_cookie_is_returned() {
        let bridge = bridge("sb-access-token=direct; sb-refresh-token=refresh");
        assert_eq!(bridge.get(ACCESS_TOKEN_COOKIE).as_deref(), Some("direct"));
        assert_eq!(bridge.get(REFRESH_TOKEN_COOKIE).as_deref(), Some("refresh"));
    }

    #[test]
    fn direct_cookie_wins_over_packed_session() {
        let header = format!(
            "{}; sb-access-token=direct",
            packed_cookie(r#"{"access_token":"packed"}"#)
        );
        assert_eq!(
            bridge(&header).get(ACCESS_TOKEN_COOKIE).as_deref(),
            Some("direct")
        );
    }

    #[test]
    fn packed_session_supplies_missing_tokens() {
        let header = packed_cookie(r#"{"access_token":"abc123","refresh_token":"ref456"}"#);
        let bridge = bridge(&header);
        assert_eq!(bridge.get(ACCESS_TOKEN_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(bridge.get(REFRESH_TOKEN_COOKIE).as_deref(), Some("ref456"));
    }

    #[test]
    fn packed_session_only_serves_token_cookies() {
        let header = packed_cookie(r#"{"access_token":"abc123","theme":"dark"}"#);
        assert_eq!(bridge(&header).get("theme"), None);
    }

    #[test]
    fn packed_session_without_requested_field_is_not_found() {
        let header = packed_cookie(r#"{"access_token":"abc123"}"#);
        assert_eq!(bridge(&header).get(REFRESH_TOKEN_COOKIE), None);
    }

    #[test]
    fn unprefixed_packed_cookie_is_not_found() {
        assert_eq!(bridge("0=not-base64-prefixed").get(ACCESS_TOKEN_COOKIE), None);
    }

    #[test]
    fn malformed_packed_cookie_is_not_found() {
        assert_eq!(bridge("0=base64-%%%").get(ACCESS_TOKEN_COOKIE), None);
        let bad_json = format!("0=base64-{}", STANDARD.encode("[1,2"));
        assert_eq!(bridge(&bad_json).get(REFRESH_TOKEN_COOKIE), None);
    }

    #[test]
    fn other_cookies_are_read_from_raw_header_and_url_decoded() {
        let bridge = bridge("theme=dark; redirect=%2Fprotected%3Fa%3D1");
        assert_eq!(bridge.get("theme").as_deref(), Some("dark"));
        assert_eq!(bridge.get("redirect").as_deref(), Some("/protected?a=1"));
    }

    #[test]
    fn raw_scan_requires_a_cookie_boundary() {
        let bridge = bridge("xsb-access-token=nope; token=yes");
        assert_eq!(bridge.get(ACCESS_TOKEN_COOKIE), None);
        assert_eq!(bridge.get("en=yes"), None);
        assert_eq!(bridge.get("token").as_deref(), Some("yes"));
    }

    #[test]
    fn raw_scan_escapes_regex_metacharacters() {
        let bridge = bridge("a.b=literal; axb=wrong");
        assert_eq!(bridge.get("a.b").as_deref(), Some("literal"));
        assert_eq!(bridge.get("a+b"), None);
    }

    #[test]
    fn invalid_percent_encoding_falls_back_to_raw_value() {
        assert_eq!(bridge("v=%FF%FE").get("v").as_deref(), Some("%FF%FE"));
    }

    #[test]
    fn empty_values_are_not_found() {
        let bridge = bridge("sb-access-token=; theme=");
        assert_eq!(bridge.get(ACCESS_TOKEN_COOKIE), None);
        assert_eq!(bridge.get("theme"), None);
    }

    #[test]
    fn empty_or_absent_header_finds_nothing() {
        for bridge in [SessionCookieBridge::new(None), bridge("")] {
            assert!(bridge.jar().is_empty());
            for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, "0", "theme", ""] {
                assert_eq!(bridge.get(name), None, "{name} should be absent");
            }
        }
    }

    #[test]
    fn set_appends_one_line_with_default_attributes() {
        let mut bridge = bridge("");
        bridge.set(ACCESS_TOKEN_COOKIE, "tok1", &CookieOptions::default());

        let lines = bridge.set_cookie_headers();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with("sb-access-token=tok1;"));
        assert!(line.contains("Path=/"));
        assert!(line.contains("HttpOnly"));
        assert!(line.contains("SameSite=Lax"));
        assert!(line.contains("Max-Age=604800"));
    }

    #[test]
    fn set_honours_explicit_max_age() {
        let mut bridge = bridge("");
        bridge.set("sb-auth-code-verifier", "v", &CookieOptions::with_max_age(600));
        assert_eq!(
            bridge.set_cookie_headers(),
            ["sb-auth-code-verifier=v; Path=/; HttpOnly; SameSite=Lax; Max-Age=600"]
        );
    }

    #[test]
    fn zero_max_age_on_set_uses_default() {
        let mut bridge = bridge("");
        bridge.set(ACCESS_TOKEN_COOKIE, "tok", &CookieOptions::with_max_age(0));
        assert_eq!(
            bridge.set_cookie_headers(),
            ["sb-access-token=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800"]
        );
    }

    #[test]
    fn remove_appends_expiring_line() {
        let mut bridge = bridge("sb-access-token=old");
        bridge.remove(ACCESS_TOKEN_COOKIE);
        assert_eq!(
            bridge.set_cookie_headers(),
            ["sb-access-token=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"]
        );
    }

    #[test]
    fn writes_are_appended_without_deduplication() {
        let mut bridge = bridge("");
        bridge.set(ACCESS_TOKEN_COOKIE, "first", &CookieOptions::default());
        bridge.set(ACCESS_TOKEN_COOKIE, "second", &CookieOptions::default());
        bridge.remove(ACCESS_TOKEN_COOKIE);

        let lines = bridge.into_set_cookie_headers();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sb-access-token=first;"));
        assert!(lines[1].starts_with("sb-access-token=second;"));
        assert!(lines[2].starts_with("sb-access-token=;"));
    }

    #[test]
    fn writes_do_not_change_what_get_returns() {
        let mut bridge = bridge("sb-access-token=inbound");
        bridge.set(ACCESS_TOKEN_COOKIE, "outbound", &CookieOptions::default());
        assert_eq!(bridge.get(ACCESS_TOKEN_COOKIE).as_deref(), Some("inbound"));
    }

    #[test]
    fn debug_output_hides_values() {
        let mut bridge = bridge("sb-access-token=secret-inbound");
        bridge.set(ACCESS_TOKEN_COOKIE, "secret-outbound", &CookieOptions::default());
        let debug = format!("{bridge:?}");
        assert!(!debug.contains("secret-inbound"));
        assert!(!debug.contains("secret-outbound"));
    }
}
