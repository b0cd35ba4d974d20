//! Per-connection session state and handle.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

/// Authentication state of one session.
///
/// A nickname exists only while `Authorized`. `Reconnecting` is terminal:
/// the session has been displaced by a takeover and is already out of the
/// registry by the time it is marked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthorized { guest: bool },
    Authorized { nickname: String },
    Reconnecting,
}

/// One live connection and its identity state.
///
/// Owned by the registry while registered. Auth-state transitions only
/// happen while the caller holds the registry lock (the server's single
/// consistency domain); the inner mutex just makes the field shareable
/// with the session's own connection task.
pub struct Session {
    id: u64,
    peer: String,
    outbound: mpsc::Sender<String>,
    closed: Notify,
    joined_at: Instant,
    auth_deadline: Duration,
    auth: Mutex<AuthState>,
}

impl Session {
    pub fn new(id: u64, peer: String, outbound: mpsc::Sender<String>, auth_deadline: Duration) -> Self {
        Self {
            id,
            peer,
            outbound,
            closed: Notify::new(),
            joined_at: Instant::now(),
            auth_deadline,
            auth: Mutex::new(AuthState::Unauthorized { guest: false }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.lock().clone()
    }

    pub fn set_auth_state(&self, next: AuthState) {
        *self.auth.lock() = next;
    }

    pub fn is_authorized(&self) -> bool {
        matches!(*self.auth.lock(), AuthState::Authorized { .. })
    }

    /// Nickname while `Authorized`, `None` otherwise.
    pub fn nickname(&self) -> Option<String> {
        match &*self.auth.lock() {
            AuthState::Authorized { nickname } => Some(nickname.clone()),
            _ => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(*self.auth.lock(), AuthState::Unauthorized { guest: true })
    }

    /// Terminal marker for a session displaced by a reconnection takeover.
    /// Clears `Authorized`, so the stop hook emits no disconnect notice.
    pub fn mark_reconnecting(&self) {
        *self.auth.lock() = AuthState::Reconnecting;
    }

    /// Whether the time since the session joined exceeds its auth deadline.
    /// The watchdog combines this with the Unauthorized check.
    pub fn auth_deadline_expired(&self) -> bool {
        self.joined_at.elapsed() > self.auth_deadline
    }

    /// Queue one line for the writer task. A full or closed queue drops
    /// the line; the connection teardown path handles the rest.
    pub fn send(&self, line: String) {
        if self.outbound.try_send(line).is_err() {
            tracing::debug!(session_id = self.id, "send queue full or closed, dropping line");
        }
    }

    /// Ask the connection task to shut this session down. Idempotent.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(deadline: Duration) -> Session {
        let (tx, _rx) = mpsc::channel(8);
        Session::new(1, "test".into(), tx, deadline)
    }

    #[test]
    fn new_session_is_unauthorized_non_guest() {
        let s = session(Duration::from_secs(60));
        assert_eq!(s.auth_state(), AuthState::Unauthorized { guest: false });
        assert!(!s.is_authorized());
        assert!(!s.is_guest());
        assert_eq!(s.nickname(), None);
    }

    #[test]
    fn nickname_present_iff_authorized() {
        let s = session(Duration::from_secs(60));
        s.set_auth_state(AuthState::Authorized {
            nickname: "Alice".into(),
        });
        assert_eq!(s.nickname(), Some("Alice".into()));

        s.mark_reconnecting();
        assert_eq!(s.auth_state(), AuthState::Reconnecting);
        assert!(!s.is_authorized());
        assert_eq!(s.nickname(), None);
    }

    #[test]
    fn zero_deadline_expires_immediately() {
        let s = session(Duration::ZERO);
        assert!(s.auth_deadline_expired());
    }

    #[test]
    fn long_deadline_does_not_expire() {
        let s = session(Duration::from_secs(3600));
        assert!(!s.auth_deadline_expired());
    }

    #[test]
    fn send_queues_line_for_writer() {
        let (tx, mut rx) = mpsc::channel(8);
        let s = Session::new(1, "test".into(), tx, Duration::from_secs(60));
        s.send("BCAST|Server|hi\n".into());
        assert_eq!(rx.try_recv().unwrap(), "BCAST|Server|hi\n");
    }
}
