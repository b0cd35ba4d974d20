//! Per-client connection handling: read loop, writer task, teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::dispatch::{self, Credentials, Effect};
use crate::protocol::ServerMessage;
use crate::server::SharedState;
use crate::session::Session;

/// Input lines longer than this are dropped without processing.
const MAX_LINE_LEN: usize = 8192;

/// Outbound queue depth per session.
const OUTBOUND_QUEUE: usize = 4096;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Drive one accepted TCP connection until it closes.
pub async fn handle(stream: TcpStream, state: Arc<SharedState>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Channel for lines going TO this client; the writer task drains it.
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let session = Arc::new(Session::new(
        session_id,
        peer.to_string(),
        tx,
        state.config.auth_deadline(),
    ));

    // Write failures close the session; the read loop runs the teardown.
    let write_session = Arc::clone(&session);
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!(session_id, "write error: {e}");
                write_session.close();
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::warn!(session_id, "flush error: {e}");
                write_session.close();
                break;
            }
        }
    });

    // Transport is ready: register the session, unauthorized.
    state.registry.lock().add(Arc::clone(&session));
    tracing::info!(session_id, %peer, "session ready");

    let mut line_buf = String::new();
    loop {
        line_buf.clear();
        let read = tokio::select! {
            _ = session.wait_closed() => break,
            r = reader.read_line(&mut line_buf) => r,
        };
        match read {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id, "read error: {e}");
                break;
            }
        }
        if line_buf.len() > MAX_LINE_LEN {
            tracing::warn!(session_id, len = line_buf.len(), "line too long, dropping");
            continue;
        }
        let line = line_buf.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        handle_line(&state, &session, line);
    }

    teardown(&state, &session);
    write_handle.abort();
    Ok(())
}

/// Feed one received line through the state machine and apply its
/// effects. The registry lock is held for the whole step, so the
/// check-uniqueness / mutate / recompute-user-list sequence is atomic
/// with respect to every other session and the watchdog.
fn handle_line(state: &Arc<SharedState>, session: &Arc<Session>, line: &str) {
    tracing::debug!(session_id = session.id(), "<- {line}");

    let mut registry = state.registry.lock();
    let effects = dispatch::on_line(
        &session.auth_state(),
        line,
        &StoreCredentials(state),
        &*registry,
    );
    for effect in effects {
        match effect {
            Effect::Transition(next) => session.set_auth_state(next),
            Effect::Reply(msg) => session.send(format!("{msg}\n")),
            Effect::Broadcast(msg) => registry.broadcast(&msg),
            Effect::PushUserList => registry.broadcast_user_list(),
            Effect::Displace { nickname } => {
                if let Some(old) = registry.find_by_nickname(&nickname) {
                    old.mark_reconnecting();
                    registry.remove(old.id());
                    old.close();
                    tracing::info!(
                        old_session = old.id(),
                        %nickname,
                        "session displaced by reconnection"
                    );
                }
            }
        }
    }
}

/// Stop hook: deregister, announce an authorized departure, and push the
/// updated user list. Runs for every exit path — peer disconnect, I/O
/// error, watchdog eviction, takeover, server shutdown — and tolerates
/// the session having been removed already.
fn teardown(state: &Arc<SharedState>, session: &Arc<Session>) {
    let mut registry = state.registry.lock();
    let removed = registry.remove(session.id()).is_some();
    if removed && let Some(nickname) = session.nickname() {
        // A displaced or evicted session was removed earlier and never
        // gets a disconnect notice; marking cleared its nickname anyway.
        registry.broadcast(&ServerMessage::server_notice(format!(
            "{nickname} disconnected"
        )));
    }
    registry.broadcast_user_list();
    drop(registry);
    session.close();
    tracing::info!(
        session_id = session.id(),
        peer = session.peer(),
        was_registered = removed,
        "session stopped"
    );
}

/// Adapter from the shared credential store to the state machine's
/// lookup trait. Store errors are logged and count as a miss.
struct StoreCredentials<'a>(&'a SharedState);

impl Credentials for StoreCredentials<'_> {
    fn lookup_nickname(&self, login: &str, password: &str) -> Option<String> {
        let store = self.0.store.lock();
        let Some(db) = store.as_ref() else {
            tracing::warn!("credential store is not open");
            return None;
        };
        match db.lookup_nickname(login, password) {
            Ok(nickname) => nickname,
            Err(e) => {
                tracing::error!("credential lookup failed: {e}");
                None
            }
        }
    }
}
