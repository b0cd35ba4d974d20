//! parley-server: a chat relay over a line-oriented TCP protocol.
//!
//! Clients authenticate against a SQLite credential store (or join as
//! guests) and every chat line is relayed to all connected sessions. A
//! second login with the same identity silently takes over the existing
//! session; unauthorized sessions are evicted after a deadline.

pub mod config;
pub mod connection;
pub mod db;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use server::ChatServer;
