//! SQLite credential store.
//!
//! Resolves `(login, password)` pairs to nicknames. Opened when the
//! acceptor starts and dropped when it stops; lookup failures are logged
//! by the caller and treated as a miss, never as a server fault.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory store (no `--db-path`, and tests).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                login    TEXT PRIMARY KEY,
                password TEXT NOT NULL,
                nickname TEXT NOT NULL UNIQUE
            );
            ",
        )
    }

    /// Insert or replace one credential row.
    pub fn add_user(&self, login: &str, password: &str, nickname: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO users (login, password, nickname) VALUES (?1, ?2, ?3)",
            params![login, password, nickname],
        )?;
        Ok(())
    }

    /// The nickname bound to `(login, password)`, or `None` on mismatch.
    pub fn lookup_nickname(&self, login: &str, password: &str) -> SqlResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT nickname FROM users WHERE login = ?1 AND password = ?2",
                params![login, password],
                |row| row.get(0),
            )
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Db {
        let db = Db::open_memory().unwrap();
        db.add_user("alice", "pw1", "Alice").unwrap();
        db
    }

    #[test]
    fn lookup_with_matching_credentials_returns_nickname() {
        let db = make_db();
        assert_eq!(
            db.lookup_nickname("alice", "pw1").unwrap(),
            Some("Alice".to_string())
        );
    }

    #[test]
    fn lookup_with_wrong_password_is_a_miss() {
        let db = make_db();
        assert_eq!(db.lookup_nickname("alice", "nope").unwrap(), None);
    }

    #[test]
    fn lookup_with_unknown_login_is_a_miss() {
        let db = make_db();
        assert_eq!(db.lookup_nickname("mallory", "pw1").unwrap(), None);
    }

    #[test]
    fn add_user_replaces_existing_login() {
        let db = make_db();
        db.add_user("alice", "pw2", "Alice").unwrap();
        assert_eq!(db.lookup_nickname("alice", "pw1").unwrap(), None);
        assert_eq!(
            db.lookup_nickname("alice", "pw2").unwrap(),
            Some("Alice".to_string())
        );
    }
}
