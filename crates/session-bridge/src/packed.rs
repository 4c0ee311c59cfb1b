use std::fmt;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;

use crate::{ACCESS_TOKEN_COOKIE, PACKED_SESSION_PREFIX, REFRESH_TOKEN_COOKIE};

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Tokens packed into the `0` cookie as `base64-<base64 JSON>`.
///
/// Unknown JSON fields are ignored.
#[derive(Clone, Default, Deserialize)]
pub struct PackedSession {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Reasons a packed session value could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum PackedSessionError {
    #[error("packed session value is missing the `base64-` marker")]
    MissingMarker,
    #[error("packed session value is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("packed session value is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PackedSession {
    /// Decodes a raw `0` cookie value.
    pub fn decode(raw: &str) -> Result<Self, PackedSessionError> {
        let encoded = raw
            .strip_prefix(PACKED_SESSION_PREFIX)
            .ok_or(PackedSessionError::MissingMarker)?;
        let bytes = decode_base64(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn access_token(&self) -> Option<&str> {
        non_empty(self.access_token.as_deref())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(self.refresh_token.as_deref())
    }

    /// Token stored for a canonical cookie name, if any.
    pub fn token_for_cookie(&self, cookie_name: &str) -> Option<&str> {
        match cookie_name {
            ACCESS_TOKEN_COOKIE => self.access_token(),
            REFRESH_TOKEN_COOKIE => self.refresh_token(),
            _ => None,
        }
    }
}

impl fmt::Debug for PackedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedSession")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// Browsers and auth SDKs emit both alphabets, padded or not.
fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_LENIENT
        .decode(encoded)
        .or_else(|_| URL_SAFE_LENIENT.decode(encoded))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
