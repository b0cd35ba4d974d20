//! Server lifecycle: shared state, accept loop, watchdog.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection;
use crate::db::Db;
use crate::registry::Registry;

/// How often the watchdog scans for unauthorized sessions past their
/// auth deadline.
const WATCHDOG_TICK: Duration = Duration::from_millis(500);

/// State shared by the accept loop, the watchdog, and every connection task.
pub struct SharedState {
    /// The single consistency domain: every registry mutation, auth-state
    /// transition, and broadcast enumeration holds this lock.
    pub registry: parking_lot::Mutex<Registry>,
    /// Credential store; `Some` while the acceptor is running.
    pub store: parking_lot::Mutex<Option<Db>>,
    pub config: ServerConfig,
}

/// The chat relay server. `start` and `stop` are idempotent; a redundant
/// call logs and changes nothing.
pub struct ChatServer {
    state: Arc<SharedState>,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(SharedState {
                registry: parking_lot::Mutex::new(Registry::new()),
                store: parking_lot::Mutex::new(None),
                config,
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind the listener and launch the accept loop and watchdog.
    /// Returns the bound address (useful with a `:0` listen config).
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(ref r) = *running {
            tracing::info!("server already started");
            return Ok(r.local_addr);
        }

        let listener = TcpListener::bind(&self.state.config.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.state.config.listen))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listen socket created");

        let (shutdown, _) = watch::channel(false);
        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.state),
            shutdown.subscribe(),
        ));
        let watchdog = tokio::spawn(watchdog_loop(
            Arc::clone(&self.state),
            shutdown.subscribe(),
        ));

        *running = Some(Running {
            local_addr,
            shutdown,
            acceptor,
            watchdog,
        });
        Ok(local_addr)
    }

    /// Signal the accept loop to stop and wait for the cascade: the
    /// credential store closes, every registered session is force-closed,
    /// and the registry drains as connection tasks run their stop hooks.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(r) = running.take() else {
            tracing::info!("server is not running");
            return;
        };
        let _ = r.shutdown.send(true);
        let _ = r.acceptor.await;
        let _ = r.watchdog.await;
        tracing::info!("server stopped");
    }

    /// Shared state handle, mainly for inspection in tests.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<SharedState>,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!("acceptor started");
    open_store(&state);

    let accept_wait = state.config.accept_wait();
    loop {
        if *shutdown.borrow() {
            break;
        }
        // Bounded wait so the stop signal is observed between attempts.
        match tokio::time::timeout(accept_wait, listener.accept()).await {
            Err(_) => {
                tracing::trace!("accept wait elapsed");
            }
            Ok(Ok((stream, peer))) => {
                tracing::info!(%peer, "client connected");
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, state).await {
                        tracing::warn!("connection error: {e:#}");
                    }
                });
            }
            Ok(Err(e)) => {
                tracing::error!("accept error: {e}");
            }
        }
    }

    tracing::info!("acceptor stopped");
    close_store(&state);
    force_close_all(&state);
}

/// Open the credential store and seed any configured users.
fn open_store(state: &SharedState) {
    let opened = match state.config.db_path {
        Some(ref path) => Db::open(path),
        None => Db::open_memory(),
    };
    let db = match opened {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("failed to open credential store: {e}");
            return;
        }
    };
    for seed in &state.config.seed_users {
        if let Err(e) = db.add_user(&seed.login, &seed.password, &seed.nickname) {
            tracing::error!(login = %seed.login, "failed to seed user: {e}");
        }
    }
    tracing::info!(
        path = state.config.db_path.as_deref().unwrap_or(":memory:"),
        seeded = state.config.seed_users.len(),
        "credential store opened"
    );
    *state.store.lock() = Some(db);
}

fn close_store(state: &SharedState) {
    if state.store.lock().take().is_some() {
        tracing::info!("credential store closed");
    }
}

fn force_close_all(state: &SharedState) {
    let sessions: Vec<_> = state.registry.lock().sessions().to_vec();
    if sessions.is_empty() {
        return;
    }
    tracing::info!(count = sessions.len(), "force-closing remaining sessions");
    for session in sessions {
        session.close();
    }
}

async fn watchdog_loop(state: Arc<SharedState>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(WATCHDOG_TICK);
    loop {
        tokio::select! {
            _ = tick.tick() => evict_expired(&state),
            _ = shutdown.changed() => break,
        }
    }
}

/// Remove and close every session still unauthorized past its auth
/// deadline. No message is sent to or about the evicted session; its
/// connection simply terminates.
fn evict_expired(state: &SharedState) {
    let expired: Vec<_> = {
        let mut registry = state.registry.lock();
        let expired: Vec<_> = registry
            .sessions()
            .iter()
            .filter(|s| !s.is_authorized() && s.auth_deadline_expired())
            .cloned()
            .collect();
        for session in &expired {
            registry.remove(session.id());
        }
        expired
    };
    for session in expired {
        tracing::info!(
            session_id = session.id(),
            peer = session.peer(),
            guest = session.is_guest(),
            "auth deadline exceeded, closing session"
        );
        session.close();
    }
}
