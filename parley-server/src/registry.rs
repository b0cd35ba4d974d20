//! The session registry: insertion-ordered collection of live sessions.

use std::sync::Arc;

use crate::dispatch::ActiveNicknames;
use crate::protocol::ServerMessage;
use crate::session::Session;

/// Authoritative collection of active sessions, unique by session id.
///
/// Not internally synchronized: the server wraps it in a single
/// `parking_lot::Mutex`, and every mutation, lookup, and broadcast
/// enumeration happens under that lock. Holding the lock for the whole
/// of a check-then-mutate-then-broadcast sequence is what makes those
/// sequences atomic across concurrent connection tasks.
#[derive(Default)]
pub struct Registry {
    sessions: Vec<Arc<Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready session at the end of the insertion order.
    pub fn add(&mut self, session: Arc<Session>) {
        self.sessions.push(session);
    }

    /// Remove by id. Returns the removed session, or `None` when it was
    /// already removed (watchdog eviction or takeover got there first).
    pub fn remove(&mut self, id: u64) -> Option<Arc<Session>> {
        let pos = self.sessions.iter().position(|s| s.id() == id)?;
        Some(self.sessions.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered sessions in insertion order.
    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    /// First authorized session holding `nickname`. Uniqueness of
    /// authorized nicknames means "first" is also "only".
    pub fn find_by_nickname(&self, nickname: &str) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .find(|s| s.nickname().is_some_and(|n| n == nickname))
            .cloned()
    }

    /// Authorized nicknames in insertion order. Guests and unauthorized
    /// sessions never appear here.
    pub fn list_nicknames(&self) -> Vec<String> {
        self.sessions.iter().filter_map(|s| s.nickname()).collect()
    }

    /// Deliver one message to every registered session. The iteration is
    /// the atomic snapshot: sessions added after the caller took the
    /// registry lock are not included, and a peer that vanished
    /// mid-broadcast only costs a dropped line, never a failed loop.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let line = format!("{msg}\n");
        for session in &self.sessions {
            session.send(line.clone());
        }
    }

    /// Broadcast the current authorized user list to everyone.
    pub fn broadcast_user_list(&self) {
        self.broadcast(&ServerMessage::UserList {
            names: self.list_nicknames(),
        });
    }
}

impl ActiveNicknames for Registry {
    fn is_active(&self, nickname: &str) -> bool {
        self.find_by_nickname(nickname).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AuthState;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(id: u64) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(32);
        let s = Arc::new(Session::new(
            id,
            format!("peer-{id}"),
            tx,
            Duration::from_secs(60),
        ));
        (s, rx)
    }

    fn authorize(s: &Session, nickname: &str) {
        s.set_auth_state(AuthState::Authorized {
            nickname: nickname.into(),
        });
    }

    #[test]
    fn add_and_remove_track_membership() {
        let mut reg = Registry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(2);
        reg.add(Arc::clone(&a));
        reg.add(Arc::clone(&b));
        assert_eq!(reg.len(), 2);

        assert!(reg.remove(1).is_some());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.sessions()[0].id(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg = Registry::new();
        let (a, _rx) = session(1);
        reg.add(a);
        assert!(reg.remove(1).is_some());
        assert!(reg.remove(1).is_none());
    }

    #[test]
    fn list_nicknames_is_insertion_ordered_and_authorized_only() {
        let mut reg = Registry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(2);
        let (c, _rx_c) = session(3);
        authorize(&a, "Alice");
        authorize(&c, "Carol");
        // b stays unauthorized (a guest would behave the same).
        reg.add(a);
        reg.add(b);
        reg.add(c);

        assert_eq!(reg.list_nicknames(), vec!["Alice", "Carol"]);
    }

    #[test]
    fn find_by_nickname_skips_unauthorized() {
        let mut reg = Registry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(2);
        authorize(&b, "Bob");
        reg.add(a);
        reg.add(Arc::clone(&b));

        assert!(reg.find_by_nickname("Alice").is_none());
        assert_eq!(reg.find_by_nickname("Bob").unwrap().id(), 2);
        assert!(reg.is_active("Bob"));
        assert!(!reg.is_active("Alice"));
    }

    #[test]
    fn broadcast_reaches_every_session_including_unauthorized() {
        let mut reg = Registry::new();
        let (a, mut rx_a) = session(1);
        let (b, mut rx_b) = session(2);
        authorize(&a, "Alice");
        reg.add(a);
        reg.add(b);

        reg.broadcast(&ServerMessage::server_notice("hello"));

        assert_eq!(rx_a.try_recv().unwrap(), "BCAST|Server|hello\n");
        assert_eq!(rx_b.try_recv().unwrap(), "BCAST|Server|hello\n");
    }

    #[test]
    fn broadcast_survives_a_dead_receiver() {
        let mut reg = Registry::new();
        let (a, rx_a) = session(1);
        let (b, mut rx_b) = session(2);
        reg.add(a);
        reg.add(b);
        drop(rx_a); // peer vanished mid-flight

        reg.broadcast(&ServerMessage::server_notice("still here"));

        assert_eq!(rx_b.try_recv().unwrap(), "BCAST|Server|still here\n");
    }

    #[test]
    fn user_list_broadcast_uses_registry_order() {
        let mut reg = Registry::new();
        let (a, mut rx_a) = session(1);
        let (b, _rx_b) = session(2);
        authorize(&a, "Alice");
        authorize(&b, "Bob");
        reg.add(a);
        reg.add(b);

        reg.broadcast_user_list();

        assert_eq!(rx_a.try_recv().unwrap(), "USERLIST|Alice|Bob|\n");
    }
}
