use std::env;
use std::net::SocketAddr;
use std::num::ParseIntError;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_AUTH_PROVIDER_MODE: &str = "supabase";
const DEFAULT_MOCK_PASSWORD: &str = "password";
const DEFAULT_AGENT_SERVICE_URL: &str = "http://localhost:8000";
const DEFAULT_AGENT_SERVICE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProviderMode {
    Supabase,
    Mock,
}

impl AuthProviderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supabase => "supabase",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub public_url: Option<String>,
    pub auth_provider_mode: AuthProviderMode,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub mock_password: String,
    pub agent_service_url: Option<String>,
    pub agent_service_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid AGENT_PORTAL_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid AGENT_PORTAL_AUTH_PROVIDER value '{value}' (expected supabase or mock)")]
    InvalidAuthProvider { value: String },
    #[error("{name} is required when AGENT_PORTAL_AUTH_PROVIDER=supabase")]
    MissingSupabaseSetting { name: &'static str },
    #[error("invalid AGENT_SERVICE_TIMEOUT_MS value '{value}': {source}")]
    InvalidTimeout {
        value: String,
        source: ParseIntError,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr_raw = read("AGENT_PORTAL_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter =
            read("AGENT_PORTAL_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let public_url =
            read("AGENT_PORTAL_PUBLIC_URL").map(|value| value.trim_end_matches('/').to_string());

        let auth_provider_raw = read("AGENT_PORTAL_AUTH_PROVIDER")
            .unwrap_or_else(|| DEFAULT_AUTH_PROVIDER_MODE.to_string())
            .to_lowercase();
        let auth_provider_mode = match auth_provider_raw.as_str() {
            "supabase" => AuthProviderMode::Supabase,
            "mock" => AuthProviderMode::Mock,
            _ => {
                return Err(ConfigError::InvalidAuthProvider {
                    value: auth_provider_raw,
                });
            }
        };

        let supabase_url = read("SUPABASE_URL");
        let supabase_anon_key = read("SUPABASE_ANON_KEY");
        if auth_provider_mode == AuthProviderMode::Supabase {
            if supabase_url.is_none() {
                return Err(ConfigError::MissingSupabaseSetting {
                    name: "SUPABASE_URL",
                });
            }
            if supabase_anon_key.is_none() {
                return Err(ConfigError::MissingSupabaseSetting {
                    name: "SUPABASE_ANON_KEY",
                });
            }
        }

        let mock_password = lookup("AGENT_PORTAL_MOCK_PASSWORD")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MOCK_PASSWORD.to_string());

        let agent_service_url = match lookup("AGENT_SERVICE_URL") {
            Some(value) => Some(value.trim().to_string()).filter(|value| !value.is_empty()),
            None => Some(DEFAULT_AGENT_SERVICE_URL.to_string()),
        };

        let agent_service_timeout_ms = match read("AGENT_SERVICE_TIMEOUT_MS") {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidTimeout { value, source })?,
            None => DEFAULT_AGENT_SERVICE_TIMEOUT_MS,
        };

        Ok(Self {
            bind_addr,
            log_filter,
            public_url,
            auth_provider_mode,
            supabase_url,
            supabase_anon_key,
            mock_password,
            agent_service_url,
            agent_service_timeout_ms,
        })
    }

    /// Mock-auth config with the agent service disabled.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            public_url: Some("http://portal.test".to_string()),
            auth_provider_mode: AuthProviderMode::Mock,
            supabase_url: None,
            supabase_anon_key: None,
            mock_password: DEFAULT_MOCK_PASSWORD.to_string(),
            agent_service_url: None,
            agent_service_timeout_ms: DEFAULT_AGENT_SERVICE_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn supabase_mode_requires_url_and_key() {
        let missing_url = config_from(&[]);
        assert!(matches!(
            missing_url,
            Err(ConfigError::MissingSupabaseSetting {
                name: "SUPABASE_URL"
            })
        ));

        let missing_key = config_from(&[("SUPABASE_URL", "https://project.supabase.co")]);
        assert!(matches!(
            missing_key,
            Err(ConfigError::MissingSupabaseSetting {
                name: "SUPABASE_ANON_KEY"
            })
        ));
    }

    #[test]
    fn defaults_apply_when_variables_are_blank() -> Result<(), ConfigError> {
        let config = config_from(&[
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("AGENT_PORTAL_BIND_ADDR", "   "),
        ])?;

        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3000)));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.auth_provider_mode, AuthProviderMode::Supabase);
        assert_eq!(
            config.agent_service_url.as_deref(),
            Some("http://localhost:8000")
        );
        assert_eq!(config.agent_service_timeout_ms, 5_000);
        assert_eq!(config.mock_password, "password");
        Ok(())
    }

    #[test]
    fn mock_mode_and_disabled_agent_service() -> Result<(), ConfigError> {
        let config = config_from(&[
            ("AGENT_PORTAL_AUTH_PROVIDER", "Mock"),
            ("AGENT_SERVICE_URL", ""),
            ("AGENT_PORTAL_PUBLIC_URL", "https://portal.example.com/"),
        ])?;

        assert_eq!(config.auth_provider_mode, AuthProviderMode::Mock);
        assert!(config.agent_service_url.is_none());
        assert_eq!(
            config.public_url.as_deref(),
            Some("https://portal.example.com")
        );
        Ok(())
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            config_from(&[("AGENT_PORTAL_BIND_ADDR", "not-an-addr")]),
            Err(ConfigError::InvalidBindAddr { .. })
        ));
        assert!(matches!(
            config_from(&[("AGENT_PORTAL_AUTH_PROVIDER", "workos")]),
            Err(ConfigError::InvalidAuthProvider { .. })
        ));
        assert!(matches!(
            config_from(&[
                ("AGENT_PORTAL_AUTH_PROVIDER", "mock"),
                ("AGENT_SERVICE_TIMEOUT_MS", "soon"),
            ]),
            Err(ConfigError::InvalidTimeout { .. })
        ));
    }
}
