//! Session cookie bridge.
//!
//! Translates an inbound request's raw `Cookie` header into the named token
//! values an auth client reads, and turns the client's token writes and
//! removals into `Set-Cookie` response header lines.
//!
//! One [`SessionCookieBridge`] is built per request and dropped with the
//! response. Nothing in this crate performs I/O, and no lookup ever fails:
//! malformed input degrades to "not found".

mod bridge;
mod jar;
mod packed;
mod store;

pub use bridge::{CookieOptions, SessionCookieBridge, removal_cookie_line, set_cookie_line};
pub use jar::CookieJar;
pub use packed::{PackedSession, PackedSessionError};
pub use store::{CookieStore, MemoryCookieStore};

/// Canonical cookie holding the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
/// Canonical cookie holding the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";
/// Cookie that may carry both tokens packed as base64 JSON. Read-only.
pub const PACKED_SESSION_COOKIE: &str = "0";
/// Marker that prefixes an encoded packed session value.
pub const PACKED_SESSION_PREFIX: &str = "base64-";
/// Max-Age applied to writes that do not specify one (7 days).
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 604_800;

/// Returns true for the two canonical token cookie names.
pub fn is_token_cookie(name: &str) -> bool {
    name == ACCESS_TOKEN_COOKIE || name == REFRESH_TOKEN_COOKIE
}
