use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::auth::OAuthProvider;

#[derive(Debug, Clone)]
pub struct SessionView {
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    SignIn,
    SignUp,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub message: String,
    pub is_error: bool,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WebBody {
    AgentConsole {
        websocket_url: Option<String>,
        agents_enabled: bool,
    },
    Login {
        mode: LoginMode,
        notice: Option<Notice>,
    },
    Protected {
        email: String,
        user_json: String,
    },
}

#[derive(Debug, Clone)]
pub struct WebPage {
    pub title: String,
    pub path: String,
    pub session: Option<SessionView>,
    pub body: WebBody,
}

pub fn render_page(page: &WebPage) -> String {
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (page.title) " | Agent Portal" }
                style { (PreEscaped(styles())) }
            }
            body {
                div class="ap-app" {
                    (topbar(&page.path, page.session.as_ref()))
                    main class="ap-main" {
                        @match &page.body {
                            WebBody::AgentConsole { websocket_url, agents_enabled } => {
                                (agent_console(websocket_url.as_deref(), *agents_enabled))
                            }
                            WebBody::Login { mode, notice } => {
                                (login_panel(*mode, notice.as_ref()))
                            }
                            WebBody::Protected { email, user_json } => {
                                (protected_panel(email, user_json))
                            }
                        }
                    }
                }
            }
        }
    };

    markup.into_string()
}

fn topbar(path: &str, session: Option<&SessionView>) -> Markup {
    let nav = [("/", "Agents"), ("/protected", "Account")];

    html! {
        header class="ap-topbar" {
            div class="ap-brand" { "Agent Portal" }
            nav class="ap-nav" {
                @for (href, label) in nav {
                    a class={(if path == href { "ap-nav-link active" } else { "ap-nav-link" })} href=(href) { (label) }
                }
            }
            div class="ap-session" {
                @if let Some(session) = session {
                    span class="ap-session-label" { "Signed in as " (session.email) }
                    form method="post" action="/logout" {
                        button type="submit" class="ap-btn subtle" { "Sign out" }
                    }
                } @else {
                    a class="ap-btn" href="/login" { "Sign in" }
                }
            }
        }
    }
}

fn notice_slot(notice: Option<&Notice>) -> Markup {
    match notice {
        Some(notice) => html! {
            div id="login-status" class={(if notice.is_error { "ap-notice error" } else { "ap-notice" })} {
                (notice.message)
            }
        },
        None => html! {
            div id="login-status" class="ap-notice hidden" {}
        },
    }
}

fn login_panel(mode: LoginMode, notice: Option<&Notice>) -> Markup {
    let is_sign_up = mode == LoginMode::SignUp;

    html! {
        section class="ap-card ap-login" {
            h1 { "Welcome" }
            p class="ap-muted" { "Sign in or create a new account" }
            (notice_slot(notice))
            form method="post" action="/login" class="ap-form" {
                input type="hidden" name="formType" value="email";
                input type="hidden" name="isSignUp" value=(if is_sign_up { "true" } else { "false" });
                label for="email" { "Email" }
                input id="email" type="email" name="email" placeholder="you@example.com" required;
                label for="password" { "Password" }
                input id="password" type="password" name="password" placeholder="••••••••" required;
                button type="submit" class="ap-btn primary" {
                    (if is_sign_up { "Create Account" } else { "Sign In" })
                }
            }
            p class="ap-toggle" {
                @if is_sign_up {
                    a href="/login" { "Already have an account? Sign in" }
                } @else {
                    a href="/login?mode=signup" { "Need an account? Sign up" }
                }
            }
            div class="ap-divider" { span { "Or continue with" } }
            div class="ap-oauth" {
                @for provider in OAuthProvider::ALL {
                    form method="post" action="/login" {
                        input type="hidden" name="formType" value="oauth";
                        input type="hidden" name="provider" value=(provider.as_str());
                        button type="submit" class="ap-btn" { (provider.label()) }
                    }
                }
            }
        }
    }
}

fn protected_panel(email: &str, user_json: &str) -> Markup {
    html! {
        section class="ap-card" {
            h1 { "Protected Page" }
            p { "Welcome, " strong { (email) } }
            h2 { "User data" }
            pre class="ap-json" { (user_json) }
            form method="post" action="/logout" {
                button type="submit" class="ap-btn danger" { "Sign out" }
            }
        }
    }
}

fn agent_console(websocket_url: Option<&str>, agents_enabled: bool) -> Markup {
    html! {
        section id="agent-console" class="ap-console" data-ws-url=(websocket_url.unwrap_or_default()) {
            h1 { "Agent Console" }
            @if !agents_enabled {
                div class="ap-notice error" { "The agent service is not configured." }
            }
            div class="ap-grid two" {
                article class="ap-card" {
                    h2 { "Agent Control" }
                    p class="ap-muted" { "Start or stop an agent" }
                    input id="agent-id" type="text" placeholder="Enter agent ID";
                    div class="ap-row" {
                        button id="agent-start" type="button" class="ap-btn primary" disabled[!agents_enabled] { "Start Agent" }
                        button id="agent-stop" type="button" class="ap-btn danger" disabled[!agents_enabled] { "Stop Agent" }
                    }
                }
                article class="ap-card" {
                    h2 { "WebSocket" }
                    p class="ap-muted" { "Connect and send messages via WebSocket" }
                    div class="ap-row" {
                        button id="ws-connect" type="button" class="ap-btn primary" { "Connect" }
                        button id="ws-disconnect" type="button" class="ap-btn danger" disabled { "Disconnect" }
                    }
                    div class="ap-row" {
                        input id="ws-message" type="text" placeholder="Enter message" disabled;
                        button id="ws-send" type="button" class="ap-btn" disabled { "Send" }
                    }
                }
            }
            article class="ap-card" {
                h2 { "Messages" }
                p class="ap-muted" { "Responses from the server" }
                ul id="agent-log" class="ap-log" {}
            }
        }
        script { (PreEscaped(AGENT_CONSOLE_SCRIPT)) }
    }
}

const AGENT_CONSOLE_SCRIPT: &str = r##"
(() => {
  const root = document.getElementById("agent-console");
  if (!root) return;
  const wsUrl = root.dataset.wsUrl || "";
  const log = document.getElementById("agent-log");
  const agentInput = document.getElementById("agent-id");
  const messageInput = document.getElementById("ws-message");
  const connectButton = document.getElementById("ws-connect");
  const disconnectButton = document.getElementById("ws-disconnect");
  const sendButton = document.getElementById("ws-send");
  let socket = null;

  const append = (text) => {
    const item = document.createElement("li");
    item.textContent = text;
    log.appendChild(item);
  };

  const setConnected = (connected) => {
    connectButton.disabled = connected || !wsUrl;
    disconnectButton.disabled = !connected;
    sendButton.disabled = !connected;
    messageInput.disabled = !connected;
  };

  const command = async (action, label) => {
    try {
      const response = await fetch(`/api/agents/${action}`, {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ agent_id: agentInput.value }),
      });
      const data = await response.json();
      append(`${label} agent response: ${JSON.stringify(data)}`);
    } catch (error) {
      append(`Error sending ${action} command: ${error}`);
    }
  };

  document.getElementById("agent-start").addEventListener("click", () => command("start", "Start"));
  document.getElementById("agent-stop").addEventListener("click", () => command("stop", "Stop"));

  connectButton.addEventListener("click", () => {
    if (socket && socket.readyState <= WebSocket.OPEN) return;
    append(`Connecting to WebSocket at ${wsUrl}`);
    try {
      socket = new WebSocket(wsUrl);
    } catch (error) {
      append(`Error creating WebSocket: ${error}`);
      return;
    }
    socket.onopen = () => {
      setConnected(true);
      append("WebSocket connected");
    };
    socket.onclose = (event) => {
      setConnected(false);
      socket = null;
      append(`WebSocket disconnected. Code: ${event.code}, Reason: ${event.reason || "No reason provided"}`);
    };
    socket.onerror = () => append("WebSocket error");
    socket.onmessage = (event) => append(event.data);
  });

  disconnectButton.addEventListener("click", () => {
    if (socket) socket.close();
  });

  sendButton.addEventListener("click", () => {
    if (socket && socket.readyState === WebSocket.OPEN) {
      socket.send(messageInput.value);
      append(`Sent: ${messageInput.value}`);
      messageInput.value = "";
    }
  });

  setConnected(false);
})();
"##;

fn styles() -> &'static str {
    r#"
:root {
  color-scheme: dark;
  --bg: #070a14;
  --panel: rgba(11, 16, 29, 0.9);
  --panel-border: rgba(126, 150, 187, 0.28);
  --text: #e6ecfb;
  --muted: #8fa0c3;
  --accent: #33b6ff;
  --danger: #ff7888;
}
* { box-sizing: border-box; }
html, body { margin: 0; min-height: 100%; background: var(--bg); color: var(--text); }
body { font-family: "IBM Plex Sans", -apple-system, BlinkMacSystemFont, sans-serif; }
.ap-app { max-width: 1080px; margin: 0 auto; padding: 16px; }
.ap-topbar { display: flex; align-items: center; gap: 16px; padding: 12px 0; border-bottom: 1px solid var(--panel-border); }
.ap-brand { font-weight: 700; letter-spacing: 0.02em; }
.ap-nav { display: flex; gap: 8px; flex: 1; }
.ap-nav-link { color: var(--muted); text-decoration: none; padding: 4px 8px; border-radius: 6px; }
.ap-nav-link.active { color: var(--text); background: rgba(51, 182, 255, 0.15); }
.ap-session { display: flex; align-items: center; gap: 8px; }
.ap-session form { margin: 0; }
.ap-session-label { color: var(--muted); font-size: 0.9rem; }
.ap-main { padding: 24px 0; }
.ap-card { background: var(--panel); border: 1px solid var(--panel-border); border-radius: 12px; padding: 20px; margin-bottom: 16px; }
.ap-login { max-width: 420px; margin: 40px auto; }
.ap-grid.two { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 16px; }
.ap-form { display: flex; flex-direction: column; gap: 8px; }
.ap-row { display: flex; gap: 8px; margin-top: 8px; }
.ap-muted { color: var(--muted); }
input { background: #0b1222; color: var(--text); border: 1px solid var(--panel-border); border-radius: 8px; padding: 8px 10px; width: 100%; }
.ap-btn { background: #16203a; color: var(--text); border: 1px solid var(--panel-border); border-radius: 8px; padding: 8px 14px; cursor: pointer; text-decoration: none; }
.ap-btn.primary { background: var(--accent); color: #04101f; border-color: var(--accent); }
.ap-btn.danger { border-color: var(--danger); color: var(--danger); }
.ap-btn.subtle { background: transparent; }
.ap-btn:disabled { opacity: 0.5; cursor: not-allowed; }
.ap-toggle { text-align: center; }
.ap-toggle a { color: var(--accent); }
.ap-divider { text-align: center; color: var(--muted); margin: 16px 0 8px; }
.ap-oauth { display: grid; grid-template-columns: 1fr 1fr; gap: 8px; }
.ap-oauth .ap-btn { width: 100%; }
.ap-notice { border: 1px solid var(--panel-border); border-radius: 8px; padding: 8px 12px; margin: 8px 0; }
.ap-notice.error { border-color: var(--danger); color: var(--danger); }
.ap-notice.hidden { display: none; }
.ap-json { background: #0b1222; border-radius: 8px; padding: 12px; overflow-x: auto; }
.ap-log { list-style: none; padding: 0; display: flex; flex-direction: column; gap: 6px; }
.ap-log li { background: #0b1222; border-radius: 6px; padding: 6px 10px; font-family: monospace; }
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(session: Option<SessionView>, body: WebBody) -> WebPage {
        WebPage {
            title: "Test".to_string(),
            path: "/".to_string(),
            session,
            body,
        }
    }

    #[test]
    fn topbar_reflects_auth_status() {
        let signed_out = render_page(&page(
            None,
            WebBody::AgentConsole {
                websocket_url: None,
                agents_enabled: false,
            },
        ));
        assert!(signed_out.contains("href=\"/login\""));
        assert!(!signed_out.contains("Signed in as"));

        let signed_in = render_page(&page(
            Some(SessionView {
                email: "user@example.com".to_string(),
            }),
            WebBody::AgentConsole {
                websocket_url: Some("ws://localhost:8000/ws".to_string()),
                agents_enabled: true,
            },
        ));
        assert!(signed_in.contains("Signed in as user@example.com"));
        assert!(signed_in.contains("action=\"/logout\""));
        assert!(signed_in.contains("data-ws-url=\"ws://localhost:8000/ws\""));
    }

    #[test]
    fn login_form_carries_mode_and_oauth_providers() {
        let html = render_page(&page(
            None,
            WebBody::Login {
                mode: LoginMode::SignUp,
                notice: Some(Notice::info("Check your email for the confirmation link")),
            },
        ));

        assert!(html.contains("name=\"isSignUp\" value=\"true\""));
        assert!(html.contains("Create Account"));
        assert!(html.contains("name=\"provider\" value=\"github\""));
        assert!(html.contains("name=\"provider\" value=\"google\""));
        assert!(html.contains("Check your email for the confirmation link"));
    }

    #[test]
    fn protected_page_escapes_user_json() {
        let html = render_page(&page(
            None,
            WebBody::Protected {
                email: "a@b.co".to_string(),
                user_json: "{\"name\": \"<script>\"}".to_string(),
            },
        ));

        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("\"<script>\""));
    }
}
