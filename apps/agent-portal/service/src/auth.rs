use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use session_bridge::{ACCESS_TOKEN_COOKIE, CookieOptions, CookieStore, REFRESH_TOKEN_COOKIE};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AuthProviderMode, Config};

/// Cookie holding the PKCE verifier between the OAuth start and the callback.
pub const CODE_VERIFIER_COOKIE: &str = "sb-auth-code-verifier";
const CODE_VERIFIER_MAX_AGE_SECONDS: u64 = 600;

const MOCK_AUTHORIZE_BASE_URL: &str = "https://auth.mock.invalid";
const MOCK_ACCESS_PREFIX: &str = "mock-access.";
const MOCK_REFRESH_PREFIX: &str = "mock-refresh.";
const MOCK_CODE_PREFIX: &str = "mock-code.";

#[derive(Clone)]
pub struct AuthService {
    provider: Arc<dyn AuthProvider>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("The sign-in attempt expired or was started in another browser. Please sign in again.")]
    MissingCodeVerifier,
    #[error("{message}")]
    Provider { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Github,
    Google,
}

impl OAuthProvider {
    pub const ALL: [Self; 2] = [Self::Github, Self::Google];

    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        match raw.trim().to_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "google" => Ok(Self::Google),
            _ => Err(AuthError::Validation {
                field: "provider",
                message: "Choose a supported sign-in provider.".to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Google => "google",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Github => "GitHub",
            Self::Google => "Google",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub raw: Value,
}

impl AuthUser {
    fn from_value(value: Value) -> Result<Self, AuthError> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AuthError::Provider {
                message: "Auth provider returned a user without an id.".to_string(),
            })?;
        let email = value
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            id,
            email,
            raw: value,
        })
    }

    pub fn pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSessionView {
    pub user: AuthUser,
    pub refreshed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(AuthUser),
    ConfirmationRequired { email: String },
}

#[derive(Clone)]
struct SessionTokens {
    access_token: String,
    refresh_token: String,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct ProviderSession {
    tokens: SessionTokens,
    user: AuthUser,
}

#[derive(Debug, Clone)]
enum ProviderSignUp {
    Session(ProviderSession),
    Pending { email: String },
}

#[derive(Debug, Deserialize)]
struct GotrueSessionResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<Value>,
}

#[async_trait]
trait AuthProvider: Send + Sync {
    async fn password_grant(&self, email: &str, password: &str)
    -> Result<ProviderSession, AuthError>;

    async fn refresh_grant(&self, refresh_token: &str) -> Result<ProviderSession, AuthError>;

    async fn pkce_grant(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<ProviderSession, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<ProviderSignUp, AuthError>;

    async fn user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn logout(&self, access_token: &str) -> Result<(), AuthError>;

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, AuthError>;

    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct SupabaseAuthProvider {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
struct MockAuthProvider {
    password: String,
}

#[derive(Debug, Clone)]
struct UnavailableAuthProvider {
    message: String,
}

impl AuthService {
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider: provider_from_config(config),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Resolves the signed-in user from the token cookies, refreshing the
    /// access token once when the provider rejects it.
    pub async fn get_session(
        &self,
        store: &mut dyn CookieStore,
    ) -> Result<Option<AuthSessionView>, AuthError> {
        let Some(access_token) = store.get(ACCESS_TOKEN_COOKIE) else {
            return Ok(None);
        };

        match self.provider.user(&access_token).await {
            Ok(user) => {
                return Ok(Some(AuthSessionView {
                    user,
                    refreshed: false,
                }));
            }
            Err(AuthError::Unauthorized { message }) => {
                debug!(reason = %message, "access token rejected, attempting refresh");
            }
            Err(error) => return Err(error),
        }

        let Some(refresh_token) = store.get(REFRESH_TOKEN_COOKIE) else {
            clear_session(store);
            return Ok(None);
        };

        match self.provider.refresh_grant(&refresh_token).await {
            Ok(session) => {
                persist_tokens(store, &session.tokens);
                let user = self.provider.user(&session.tokens.access_token).await?;
                info!(provider = self.provider.name(), "session refreshed");
                Ok(Some(AuthSessionView {
                    user,
                    refreshed: true,
                }))
            }
            Err(AuthError::Unauthorized { message }) => {
                info!(reason = %message, "refresh token rejected, clearing session");
                clear_session(store);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn sign_in_with_password(
        &self,
        store: &mut dyn CookieStore,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email)?;
        let password = require_password(password)?;

        let session = self.provider.password_grant(&email, password).await?;
        persist_tokens(store, &session.tokens);
        info!(
            provider = self.provider.name(),
            email_domain = email_domain(&email),
            "password sign-in succeeded"
        );
        Ok(session.user)
    }

    pub async fn sign_up(
        &self,
        store: &mut dyn CookieStore,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let email = normalize_email(email)?;
        let password = require_password(password)?;

        match self.provider.sign_up(&email, password, redirect_to).await? {
            ProviderSignUp::Session(session) => {
                persist_tokens(store, &session.tokens);
                info!(
                    email_domain = email_domain(&email),
                    "sign-up confirmed immediately"
                );
                Ok(SignUpOutcome::SignedIn(session.user))
            }
            ProviderSignUp::Pending { email } => {
                info!(
                    email_domain = email_domain(&email),
                    "sign-up awaiting email confirmation"
                );
                Ok(SignUpOutcome::ConfirmationRequired { email })
            }
        }
    }

    /// Starts a PKCE OAuth flow and returns the provider authorize URL.
    pub fn sign_in_with_oauth(
        &self,
        store: &mut dyn CookieStore,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError> {
        let verifier = pkce_verifier();
        let challenge = pkce_challenge(&verifier);
        let url = self
            .provider
            .authorize_url(provider, redirect_to, &challenge)?;

        store.set(
            CODE_VERIFIER_COOKIE,
            &verifier,
            &CookieOptions::with_max_age(CODE_VERIFIER_MAX_AGE_SECONDS),
        );
        debug!(oauth_provider = provider.as_str(), "oauth flow started");
        Ok(url)
    }

    pub async fn exchange_code_for_session(
        &self,
        store: &mut dyn CookieStore,
        code: &str,
    ) -> Result<AuthUser, AuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::Validation {
                field: "code",
                message: "Authorization code is missing.".to_string(),
            });
        }
        let verifier = store
            .get(CODE_VERIFIER_COOKIE)
            .ok_or(AuthError::MissingCodeVerifier)?;

        let result = self.provider.pkce_grant(code, &verifier).await;
        store.remove(CODE_VERIFIER_COOKIE);
        let session = result?;

        persist_tokens(store, &session.tokens);
        info!(provider = self.provider.name(), "oauth code exchanged");
        Ok(session.user)
    }

    pub async fn sign_out(&self, store: &mut dyn CookieStore) {
        if let Some(access_token) = store.get(ACCESS_TOKEN_COOKIE) {
            match self.provider.logout(&access_token).await {
                Ok(()) => info!(provider = self.provider.name(), "session revoked"),
                Err(AuthError::Unauthorized { .. }) => {
                    debug!("session already revoked upstream");
                }
                Err(error) => warn!(reason = %error, "session revoke failed"),
            }
        }
        clear_session(store);
    }
}

impl SupabaseAuthProvider {
    fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        payload: &Value,
    ) -> Result<ProviderSession, AuthError> {
        let request = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .json(payload);
        session_from_value(self.send(request).await?)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, AuthError> {
        let response = request
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|error| AuthError::Provider {
                message: format!("Unable to contact the auth provider: {error}"),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| AuthError::Provider {
                message: format!("Unable to read the auth provider response: {error}"),
            })?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if status.is_success() {
            return Ok(body);
        }

        let message = provider_error_message(&body)
            .unwrap_or_else(|| format!("Auth provider request failed ({status})."));
        debug!(%status, "auth provider rejected request");

        Err(match status {
            StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND => AuthError::Unauthorized { message },
            StatusCode::UNPROCESSABLE_ENTITY => {
                let field = if message.to_lowercase().contains("password") {
                    "password"
                } else {
                    "email"
                };
                AuthError::Validation { field, message }
            }
            _ => AuthError::Provider { message },
        })
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthProvider {
    async fn password_grant(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, AuthError> {
        self.token_grant(
            "password",
            &json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<ProviderSession, AuthError> {
        self.token_grant("refresh_token", &json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn pkce_grant(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<ProviderSession, AuthError> {
        self.token_grant(
            "pkce",
            &json!({ "auth_code": auth_code, "code_verifier": code_verifier }),
        )
        .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: &str,
    ) -> Result<ProviderSignUp, AuthError> {
        let request = self
            .http
            .post(self.endpoint("signup"))
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email, "password": password }));
        let body = self.send(request).await?;

        if body.get("access_token").is_some() {
            return Ok(ProviderSignUp::Session(session_from_value(body)?));
        }

        let email = body
            .get("email")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .unwrap_or(email)
            .to_string();
        Ok(ProviderSignUp::Pending { email })
    }

    async fn user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let request = self.http.get(self.endpoint("user")).bearer_auth(access_token);
        AuthUser::from_value(self.send(request).await?)
    }

    async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let request = self
            .http
            .post(self.endpoint("logout"))
            .bearer_auth(access_token);
        self.send(request).await.map(|_| ())
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, AuthError> {
        Ok(authorize_url(
            &self.endpoint("authorize"),
            provider,
            redirect_to,
            code_challenge,
        ))
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}

impl MockAuthProvider {
    fn session(email: &str) -> ProviderSession {
        ProviderSession {
            tokens: SessionTokens {
                access_token: format!("{MOCK_ACCESS_PREFIX}{email}"),
                refresh_token: format!("{MOCK_REFRESH_PREFIX}{email}"),
            },
            user: Self::user_for(email),
        }
    }

    fn user_for(email: &str) -> AuthUser {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, email.as_bytes()).to_string();
        AuthUser {
            id: id.clone(),
            email: email.to_string(),
            raw: json!({
                "id": id,
                "aud": "authenticated",
                "role": "authenticated",
                "email": email,
                "app_metadata": { "provider": "email" },
            }),
        }
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn password_grant(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, AuthError> {
        if password != self.password {
            return Err(AuthError::Unauthorized {
                message: "Invalid login credentials".to_string(),
            });
        }
        Ok(Self::session(email))
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<ProviderSession, AuthError> {
        refresh_token
            .strip_prefix(MOCK_REFRESH_PREFIX)
            .filter(|email| !email.is_empty())
            .map(Self::session)
            .ok_or_else(|| AuthError::Unauthorized {
                message: "Invalid Refresh Token".to_string(),
            })
    }

    async fn pkce_grant(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<ProviderSession, AuthError> {
        auth_code
            .strip_prefix(MOCK_CODE_PREFIX)
            .filter(|email| !email.is_empty() && !code_verifier.is_empty())
            .map(Self::session)
            .ok_or_else(|| AuthError::Unauthorized {
                message: "invalid flow state, no valid flow state found".to_string(),
            })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _redirect_to: &str,
    ) -> Result<ProviderSignUp, AuthError> {
        if password.chars().count() < 6 {
            return Err(AuthError::Validation {
                field: "password",
                message: "Password should be at least 6 characters.".to_string(),
            });
        }
        Ok(ProviderSignUp::Pending {
            email: email.to_string(),
        })
    }

    async fn user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        access_token
            .strip_prefix(MOCK_ACCESS_PREFIX)
            .filter(|email| !email.is_empty())
            .map(Self::user_for)
            .ok_or_else(|| AuthError::Unauthorized {
                message: "invalid JWT".to_string(),
            })
    }

    async fn logout(&self, _access_token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, AuthError> {
        Ok(authorize_url(
            &format!("{MOCK_AUTHORIZE_BASE_URL}/auth/v1/authorize"),
            provider,
            redirect_to,
            code_challenge,
        ))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl UnavailableAuthProvider {
    fn error(&self) -> AuthError {
        AuthError::Provider {
            message: self.message.clone(),
        }
    }
}

#[async_trait]
impl AuthProvider for UnavailableAuthProvider {
    async fn password_grant(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<ProviderSession, AuthError> {
        Err(self.error())
    }

    async fn refresh_grant(&self, _refresh_token: &str) -> Result<ProviderSession, AuthError> {
        Err(self.error())
    }

    async fn pkce_grant(
        &self,
        _auth_code: &str,
        _code_verifier: &str,
    ) -> Result<ProviderSession, AuthError> {
        Err(self.error())
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _redirect_to: &str,
    ) -> Result<ProviderSignUp, AuthError> {
        Err(self.error())
    }

    async fn user(&self, _access_token: &str) -> Result<AuthUser, AuthError> {
        Err(self.error())
    }

    async fn logout(&self, _access_token: &str) -> Result<(), AuthError> {
        Err(self.error())
    }

    fn authorize_url(
        &self,
        _provider: OAuthProvider,
        _redirect_to: &str,
        _code_challenge: &str,
    ) -> Result<String, AuthError> {
        Err(self.error())
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

fn persist_tokens(store: &mut dyn CookieStore, tokens: &SessionTokens) {
    let options = CookieOptions::default();
    store.set(ACCESS_TOKEN_COOKIE, &tokens.access_token, &options);
    store.set(REFRESH_TOKEN_COOKIE, &tokens.refresh_token, &options);
}

fn clear_session(store: &mut dyn CookieStore) {
    store.remove(ACCESS_TOKEN_COOKIE);
    store.remove(REFRESH_TOKEN_COOKIE);
}

fn provider_from_config(config: &Config) -> Arc<dyn AuthProvider> {
    match config.auth_provider_mode {
        AuthProviderMode::Mock => Arc::new(MockAuthProvider {
            password: config.mock_password.clone(),
        }),
        AuthProviderMode::Supabase => {
            match (&config.supabase_url, &config.supabase_anon_key) {
                (Some(url), Some(anon_key)) => Arc::new(SupabaseAuthProvider::new(url, anon_key)),
                _ => Arc::new(UnavailableAuthProvider {
                    message: "Supabase auth is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY or use AGENT_PORTAL_AUTH_PROVIDER=mock for local testing."
                        .to_string(),
                }),
            }
        }
    }
}

fn session_from_value(value: Value) -> Result<ProviderSession, AuthError> {
    let response: GotrueSessionResponse =
        serde_json::from_value(value).map_err(|error| AuthError::Provider {
            message: format!("Invalid auth provider response payload: {error}"),
        })?;

    let access_token = response.access_token.filter(|token| !token.is_empty());
    let refresh_token = response.refresh_token.filter(|token| !token.is_empty());
    let (Some(access_token), Some(refresh_token), Some(user)) =
        (access_token, refresh_token, response.user)
    else {
        return Err(AuthError::Provider {
            message: "Sign-in provider response was incomplete. Please try again.".to_string(),
        });
    };

    Ok(ProviderSession {
        tokens: SessionTokens {
            access_token,
            refresh_token,
        },
        user: AuthUser::from_value(user)?,
    })
}

fn provider_error_message(body: &Value) -> Option<String> {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn authorize_url(
    endpoint: &str,
    provider: OAuthProvider,
    redirect_to: &str,
    code_challenge: &str,
) -> String {
    format!(
        "{endpoint}?provider={}&redirect_to={}&code_challenge={code_challenge}&code_challenge_method=s256",
        provider.as_str(),
        urlencoding::encode(redirect_to)
    )
}

fn pkce_verifier() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn normalize_email(raw_email: &str) -> Result<String, AuthError> {
    let email = raw_email.trim().to_lowercase();
    if email.is_empty()
        || !email.contains('@')
        || email.chars().any(char::is_whitespace)
        || email.len() > 255
    {
        return Err(AuthError::Validation {
            field: "email",
            message: "Enter a valid email address.".to_string(),
        });
    }

    Ok(email)
}

fn require_password(password: &str) -> Result<&str, AuthError> {
    if password.is_empty() {
        return Err(AuthError::Validation {
            field: "password",
            message: "Enter your password.".to_string(),
        });
    }
    Ok(password)
}

fn email_domain(email: &str) -> &str {
    email.rsplit_once('@').map_or("", |(_, domain)| domain)
}
