use std::sync::Arc;
use std::time::SystemTime;

use agent_service_client::{AgentClientError, AgentServiceClient, AgentServiceConfig};
use axum::extract::{Form, Query, State};
use axum::http::header::{COOKIE, HOST, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use session_bridge::SessionCookieBridge;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod auth;
pub mod config;
pub mod web_maud;

use crate::auth::{AuthError, AuthService, AuthSessionView, OAuthProvider, SignUpOutcome};
use crate::config::Config;
use crate::web_maud::{LoginMode, Notice, SessionView, WebBody, WebPage, render_page};

const SERVICE_NAME: &str = "agent-portal-service";
const AUTH_CALLBACK_PATH: &str = "/auth/callback";
const SIGN_UP_CONFIRMATION_MESSAGE: &str = "Check your email for the confirmation link";
const INVALID_FORM_MESSAGE: &str = "Invalid form submission";

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    auth: AuthService,
    agents: Option<AgentServiceClient>,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    auth_provider: &'static str,
    agent_service_configured: bool,
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(rename = "formType")]
    form_type: Option<String>,
    provider: Option<String>,
    email: Option<String>,
    password: Option<String>,
    #[serde(rename = "isSignUp")]
    is_sign_up: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentCommandPayload {
    #[serde(default)]
    agent_id: String,
}

#[derive(Debug, Clone, Copy)]
enum AgentCommand {
    Start,
    Stop,
}

impl AgentCommand {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

pub fn build_router(config: Config) -> Router {
    let auth = AuthService::from_config(&config);
    let agents = agent_client_from_config(&config);
    let state = AppState {
        config: Arc::new(config),
        auth,
        agents,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route("/", get(home_page))
        .route("/login", get(login_page).post(login_submit))
        .route(AUTH_CALLBACK_PATH, get(auth_callback))
        .route("/logout", get(logout_page).post(logout_submit))
        .route("/protected", get(protected_page))
        .route("/api/agents/start", post(start_agent))
        .route("/api/agents/stop", post(stop_agent))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

fn agent_client_from_config(config: &Config) -> Option<AgentServiceClient> {
    let base_url = config.agent_service_url.as_ref()?;
    let mut client_config = AgentServiceConfig::new(base_url.clone());
    client_config.timeout_ms = config.agent_service_timeout_ms;

    match AgentServiceClient::new(client_config) {
        Ok(client) => Some(client),
        Err(error) => {
            warn!(reason = %error, "agent service disabled");
            None
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        auth_provider: state.auth.provider_name(),
        agent_service_configured: state.agents.is_some(),
    })
}

async fn home_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut bridge = session_bridge(&headers);
    let session = current_session(&state, &mut bridge).await;

    let page = WebPage {
        title: "Agents".to_string(),
        path: "/".to_string(),
        session: session.as_ref().map(session_view),
        body: WebBody::AgentConsole {
            websocket_url: state.agents.as_ref().map(AgentServiceClient::websocket_url),
            agents_enabled: state.agents.is_some(),
        },
    };
    with_session_cookies(Html(render_page(&page)).into_response(), bridge)
}

async fn login_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let mut bridge = session_bridge(&headers);
    let session = current_session(&state, &mut bridge).await;
    let mode = if query.mode.as_deref() == Some("signup") {
        LoginMode::SignUp
    } else {
        LoginMode::SignIn
    };

    let response = render_login(session.as_ref(), mode, None).into_response();
    with_session_cookies(response, bridge)
}

async fn login_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let mut bridge = session_bridge(&headers);
    let redirect_to = format!("{}{AUTH_CALLBACK_PATH}", request_origin(&state, &headers));

    let response = match form.form_type.as_deref() {
        Some("oauth") => {
            let result = OAuthProvider::parse(form.provider.as_deref().unwrap_or_default())
                .and_then(|provider| {
                    state
                        .auth
                        .sign_in_with_oauth(&mut bridge, provider, &redirect_to)
                });
            match result {
                Ok(url) => Redirect::to(&url).into_response(),
                Err(error) => login_error(&error, LoginMode::SignIn),
            }
        }
        Some("email") => {
            let email = form.email.as_deref().unwrap_or_default();
            let password = form.password.as_deref().unwrap_or_default();

            if form.is_sign_up.as_deref() == Some("true") {
                match state
                    .auth
                    .sign_up(&mut bridge, email, password, &redirect_to)
                    .await
                {
                    Ok(SignUpOutcome::ConfirmationRequired { .. }) => render_login(
                        None,
                        LoginMode::SignUp,
                        Some(Notice::info(SIGN_UP_CONFIRMATION_MESSAGE)),
                    )
                    .into_response(),
                    Ok(SignUpOutcome::SignedIn(_)) => Redirect::to("/protected").into_response(),
                    Err(error) => login_error(&error, LoginMode::SignUp),
                }
            } else {
                match state
                    .auth
                    .sign_in_with_password(&mut bridge, email, password)
                    .await
                {
                    Ok(_) => Redirect::to("/protected").into_response(),
                    Err(error) => login_error(&error, LoginMode::SignIn),
                }
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            render_login(None, LoginMode::SignIn, Some(Notice::error(INVALID_FORM_MESSAGE))),
        )
            .into_response(),
    };

    with_session_cookies(response, bridge)
}

async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let mut bridge = session_bridge(&headers);

    if let Some(description) = query.error_description.as_deref() {
        warn!(reason = description, "oauth provider returned an error");
    }
    if let Some(code) = query.code.as_deref().filter(|code| !code.trim().is_empty()) {
        match state.auth.exchange_code_for_session(&mut bridge, code).await {
            Ok(user) => info!(user_id = %user.id, "oauth callback completed"),
            Err(error) => warn!(reason = %error, "oauth code exchange failed"),
        }
    }

    with_session_cookies(Redirect::to("/").into_response(), bridge)
}

async fn logout_page() -> Redirect {
    Redirect::to("/login")
}

async fn logout_submit(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut bridge = session_bridge(&headers);
    state.auth.sign_out(&mut bridge).await;
    with_session_cookies(Redirect::to("/login").into_response(), bridge)
}

async fn protected_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut bridge = session_bridge(&headers);
    let Some(session) = current_session(&state, &mut bridge).await else {
        return with_session_cookies(Redirect::to("/login").into_response(), bridge);
    };

    let page = WebPage {
        title: "Protected".to_string(),
        path: "/protected".to_string(),
        session: Some(session_view(&session)),
        body: WebBody::Protected {
            email: session.user.email.clone(),
            user_json: session.user.pretty_json(),
        },
    };
    with_session_cookies(Html(render_page(&page)).into_response(), bridge)
}

async fn start_agent(
    State(state): State<AppState>,
    Json(payload): Json<AgentCommandPayload>,
) -> Response {
    agent_command(&state, AgentCommand::Start, &payload.agent_id).await
}

async fn stop_agent(
    State(state): State<AppState>,
    Json(payload): Json<AgentCommandPayload>,
) -> Response {
    agent_command(&state, AgentCommand::Stop, &payload.agent_id).await
}

async fn agent_command(state: &AppState, command: AgentCommand, agent_id: &str) -> Response {
    let Some(agents) = state.agents.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "agent service is not configured" })),
        )
            .into_response();
    };

    let result = match command {
        AgentCommand::Start => agents.start_agent(agent_id).await,
        AgentCommand::Stop => agents.stop_agent(agent_id).await,
    };

    match result {
        Ok(reply) => {
            info!(
                command = command.as_str(),
                accepted = reply.is_accepted(),
                "agent command relayed"
            );
            Json(reply).into_response()
        }
        Err(AgentClientError::InvalidAgentId) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "agent_id is required" })),
        )
            .into_response(),
        Err(error) => {
            warn!(command = command.as_str(), reason = %error, "agent command failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response()
        }
    }
}

/// Builds the per-request bridge from every `Cookie` header on the request.
fn session_bridge(headers: &HeaderMap) -> SessionCookieBridge {
    let raw = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");

    if raw.is_empty() {
        SessionCookieBridge::new(None)
    } else {
        SessionCookieBridge::new(Some(&raw))
    }
}

async fn current_session(
    state: &AppState,
    bridge: &mut SessionCookieBridge,
) -> Option<AuthSessionView> {
    match state.auth.get_session(bridge).await {
        Ok(session) => session,
        Err(error) => {
            warn!(reason = %error, "session lookup failed");
            None
        }
    }
}

fn session_view(session: &AuthSessionView) -> SessionView {
    SessionView {
        email: session.user.email.clone(),
    }
}

fn render_login(
    session: Option<&AuthSessionView>,
    mode: LoginMode,
    notice: Option<Notice>,
) -> Html<String> {
    let page = WebPage {
        title: "Sign in".to_string(),
        path: "/login".to_string(),
        session: session.map(session_view),
        body: WebBody::Login { mode, notice },
    };
    Html(render_page(&page))
}

/// Every auth failure re-renders the form the user submitted with a 400.
fn login_error(error: &AuthError, mode: LoginMode) -> Response {
    info!(reason = %error, "login attempt rejected");
    (
        StatusCode::BAD_REQUEST,
        render_login(None, mode, Some(Notice::error(error.to_string()))),
    )
        .into_response()
}

/// Appends the bridge's outbound cookie lines as separate `Set-Cookie` headers.
fn with_session_cookies(mut response: Response, bridge: SessionCookieBridge) -> Response {
    for line in bridge.into_set_cookie_headers() {
        match HeaderValue::from_str(&line) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(_) => warn!("dropping Set-Cookie line with invalid header characters"),
        }
    }
    response
}

fn request_origin(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(public_url) = state.config.public_url.as_deref() {
        return public_url.to_string();
    }

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.bind_addr.to_string());
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .filter(|value| matches!(*value, "http" | "https"))
        .unwrap_or("http");
    format!("{scheme}://{host}")
}
