//! # Relay server
//!
//! Accepts local clients over HTTP and relays the configured station to
//! the most recent one.
//!
//! - 📻 **Any path** : every request is proxied to the station
//! - 🔀 **Last writer wins** : a new client cancels the session in progress
//! - 🎵 **Now Playing** : titles are written to the title file while relaying
//! - ⚡ **Clean shutdown** : the active session is cancelled and the title
//!   file emptied
//!
//! ```no_run
//! use pmorelay::{RelayConfig, RelayServer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> pmorelay::Result<()> {
//! let config = RelayConfig::new(
//!     "http://79.120.39.202:8000/darkelectro",
//!     "http://localhost:51111/",
//!     "now_playing.txt",
//! )?;
//! let listener = RelayServer::new(config)?.bind().await?;
//! let hook = listener.shutdown_hook();
//!
//! let shutdown = CancellationToken::new();
//! listener.serve(shutdown).await?;
//! hook.run();
//! # Ok(())
//! # }
//! ```

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::active::ActiveSlot;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::publisher::TitlePublisher;
use crate::session::RelaySession;

/// State shared by the accept loop and the sessions.
pub(crate) struct RelayState {
    pub(crate) config: RelayConfig,
    pub(crate) client: reqwest::Client,
    pub(crate) publisher: Arc<TitlePublisher>,
    pub(crate) active: ActiveSlot,
    next_id: AtomicU64,
}

impl RelayState {
    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Relay ready to bind.
pub struct RelayServer {
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Builds the HTTP client and prepares the title file directory.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let publisher = TitlePublisher::new(config.title_path());
        publisher.ensure_directory()?;

        Ok(Self {
            state: Arc::new(RelayState {
                config,
                client,
                publisher: Arc::new(publisher),
                active: ActiveSlot::new(),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.state.config
    }

    /// Binds the local endpoint.
    ///
    /// Failing to bind is fatal for the relay.
    pub async fn bind(self) -> Result<RelayListener> {
        let addr = self.state.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.clone(),
                source,
            })?;

        let listener = RelayListener {
            listener,
            state: self.state,
        };
        listener.report_on_start();
        Ok(listener)
    }
}

/// Relay listening on its local endpoint.
pub struct RelayListener {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl RelayListener {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Hook to run once [`serve`](Self::serve) returned.
    pub fn shutdown_hook(&self) -> ShutdownHook {
        ShutdownHook {
            state: self.state.clone(),
        }
    }

    fn report_on_start(&self) {
        let config = &self.state.config;
        info!("📻 Radio: {}", config.station_url());
        info!("📝 Title file: {}", self.state.publisher.path().display());
        match self.local_addr() {
            Ok(addr) => info!("🎧 Grab from: {} ({})", config.local_url(), addr),
            Err(_) => info!("🎧 Grab from: {}", config.local_url()),
        }
        info!("Waiting for connection...");
    }

    /// Serves until `shutdown` is cancelled.
    ///
    /// On shutdown the active session is cancelled so that its streaming
    /// response ends and the graceful shutdown can complete.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let state = self.state.clone();
        let app = Router::new()
            .fallback(relay_handler)
            .with_state(self.state);

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("🛑 Shutting down relay");
            state.active.cancel_active();
        })
        .await?;

        Ok(())
    }

    /// Serves until `shutdown` is cancelled, then runs the shutdown hook,
    /// whether serving ended cleanly or not.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let hook = self.shutdown_hook();
        let served = self.serve(shutdown).await;
        hook.run();
        served
    }
}

/// Explicit cleanup run by the supervisor after the server stopped.
#[derive(Clone)]
pub struct ShutdownHook {
    state: Arc<RelayState>,
}

impl ShutdownHook {
    /// Cancels the active session and empties the title file.
    pub fn run(&self) {
        self.state.active.cancel_active();
        self.state.publisher.clear();
        info!("✅ Relay stopped");
    }
}

async fn relay_handler(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let headers = request.headers().clone();
    let session = RelaySession::open(state, peer, &headers);

    let (tx, rx) = oneshot::channel();
    tokio::spawn(session.run(headers, tx));

    match rx.await {
        Ok(response) => response,
        Err(_) => {
            error!("Relay session for {} ended without a response", peer);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
