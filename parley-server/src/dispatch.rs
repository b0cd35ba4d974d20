//! The per-session state machine: authentication and chat dispatch.
//!
//! Decoupled from transport and registry so every transition is testable
//! on its own. Input is the session's current [`AuthState`] plus one
//! received line, with narrow lookup traits for credentials and
//! active-nickname occupancy; output is an ordered list of [`Effect`]s
//! the connection task applies while holding the registry lock.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::AuthState;

/// Display name relayed for sessions that have no nickname.
pub const ANONYMOUS: &str = "Anonymous";

/// Resolves `(login, password)` to a nickname.
pub trait Credentials {
    fn lookup_nickname(&self, login: &str, password: &str) -> Option<String>;
}

/// Answers whether a nickname currently belongs to an authorized session.
pub trait ActiveNicknames {
    fn is_active(&self, nickname: &str) -> bool;
}

/// One side effect of a state-machine step, applied strictly in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Commit a new auth state on the originating session.
    Transition(AuthState),
    /// Send to the originating session only.
    Reply(ServerMessage),
    /// Send to every registered session.
    Broadcast(ServerMessage),
    /// Recompute the authorized-nickname list and broadcast it.
    PushUserList,
    /// Reconnection takeover: mark the current holder of `nickname` as
    /// reconnecting, remove it from the registry, and close it. No
    /// disconnect notice is emitted for the displaced session. Always
    /// ordered before the `Transition` that authorizes the new holder.
    Displace { nickname: String },
}

/// Feed one received line through the state machine.
pub fn on_line(
    state: &AuthState,
    line: &str,
    credentials: &impl Credentials,
    active: &impl ActiveNicknames,
) -> Vec<Effect> {
    match state {
        AuthState::Unauthorized { .. } => on_unauthorized_line(line, credentials, active),
        AuthState::Authorized { nickname } => chat_dispatch(Some(nickname), line),
        // Displaced sessions are already out of the registry; anything
        // they still send is ignored until the connection drops.
        AuthState::Reconnecting => Vec::new(),
    }
}

fn on_unauthorized_line(
    line: &str,
    credentials: &impl Credentials,
    active: &impl ActiveNicknames,
) -> Vec<Effect> {
    match ClientMessage::parse(line) {
        ClientMessage::GuestConnect => vec![
            Effect::Transition(AuthState::Unauthorized { guest: true }),
            Effect::Broadcast(ServerMessage::server_notice(format!("{ANONYMOUS} connected"))),
        ],
        ClientMessage::Auth { login, password } => {
            match credentials.lookup_nickname(&login, &password) {
                None => {
                    // Login only; the password never reaches the log.
                    tracing::info!(%login, "invalid login attempt");
                    vec![Effect::Reply(ServerMessage::AuthRejected)]
                }
                Some(nickname) => authorize(nickname, active),
            }
        }
        // Not the auth shape: treat the line as a chat attempt. An
        // unauthorized sender is relayed as Anonymous.
        _ => chat_dispatch(None, line),
    }
}

fn authorize(nickname: String, active: &impl ActiveNicknames) -> Vec<Effect> {
    // Takeover: the old session is displaced silently, before the new
    // one is authorized, and no "connected" notice goes out for it.
    let takeover = active.is_active(&nickname);
    let mut effects = Vec::new();
    if takeover {
        effects.push(Effect::Displace {
            nickname: nickname.clone(),
        });
    }
    effects.push(Effect::Transition(AuthState::Authorized {
        nickname: nickname.clone(),
    }));
    effects.push(Effect::Reply(ServerMessage::AuthAccepted {
        nickname: nickname.clone(),
    }));
    if !takeover {
        effects.push(Effect::Broadcast(ServerMessage::server_notice(format!(
            "{nickname} connected"
        ))));
    }
    effects.push(Effect::PushUserList);
    effects
}

fn chat_dispatch(nickname: Option<&str>, line: &str) -> Vec<Effect> {
    match ClientMessage::parse(line) {
        ClientMessage::Broadcast { text } => vec![Effect::Broadcast(ServerMessage::Broadcast {
            from: nickname.unwrap_or(ANONYMOUS).to_string(),
            text,
        })],
        _ => vec![Effect::Reply(ServerMessage::FormatError {
            original: line.to_string(),
        })],
    }
}
