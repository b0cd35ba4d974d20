//! Server configuration (CLI flags and environment).

use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

/// Command-line configuration for the relay server.
#[derive(Debug, Clone, Parser)]
#[command(name = "parley-server", about = "Line-protocol chat relay")]
pub struct ServerConfig {
    /// Address the chat listener binds to.
    #[arg(long, env = "PARLEY_LISTEN", default_value = "0.0.0.0:8189")]
    pub listen: String,

    /// How long one accept attempt waits before re-checking the stop
    /// signal, in milliseconds.
    #[arg(long, env = "PARLEY_ACCEPT_WAIT_MS", default_value_t = 2000)]
    pub accept_wait_ms: u64,

    /// How long a session may stay unauthorized before the watchdog
    /// closes it, in seconds.
    #[arg(long, env = "PARLEY_AUTH_DEADLINE_SECS", default_value_t = 120)]
    pub auth_deadline_secs: u64,

    /// Path to the SQLite credential store. Omitted: in-memory store.
    #[arg(long, env = "PARLEY_DB")]
    pub db_path: Option<String>,

    /// Seed a credential on startup. Repeatable.
    #[arg(long = "seed-user", value_name = "LOGIN:PASSWORD:NICKNAME")]
    pub seed_users: Vec<SeedUser>,
}

impl ServerConfig {
    pub fn accept_wait(&self) -> Duration {
        Duration::from_millis(self.accept_wait_ms)
    }

    pub fn auth_deadline(&self) -> Duration {
        Duration::from_secs(self.auth_deadline_secs)
    }
}

/// A credential seeded from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    pub login: String,
    pub password: String,
    pub nickname: String,
}

/// A `--seed-user` argument that failed to parse.
#[derive(Debug, Error)]
#[error("invalid seed user {0:?}: expected LOGIN:PASSWORD:NICKNAME")]
pub struct InvalidSeedUser(String);

impl FromStr for SeedUser {
    type Err = InvalidSeedUser;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(login), Some(password), Some(nickname))
                if !login.is_empty() && !password.is_empty() && !nickname.is_empty() =>
            {
                Ok(Self {
                    login: login.to_string(),
                    password: password.to_string(),
                    nickname: nickname.to_string(),
                })
            }
            _ => Err(InvalidSeedUser(s.to_string())),
        }
    }
}
