//! Logbus production server.
//!
//! Terminates client connections for the log-structured event messaging
//! system: clients publish events to named channels, subscribe with
//! credit-based flow control, and query documents from named binders.
//!
//! # Architecture
//!
//! Every accepted connection is served by one tokio task that owns the
//! socket, the frame parser, and the connection state machine
//! (`connection`). Storage lives in [`logbus_core`]: per-channel appender
//! tasks persist events to chunked log files, and a [`DocStore`] holds
//! binder documents and durable cursors. Asynchronous completions re-enter
//! a connection through its mailbox, and the `sequencer` restores
//! request-issue order over out-of-order persistence completions.

mod connection;
mod error;
mod query;
mod sequencer;
mod subscription;

use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};

pub use error::ServerError;
use logbus_core::{ChannelLogs, DocStore, LogConfig, RedbDocStore};
use logbus_proto::DEFAULT_MAX_FRAME_SIZE;
pub use query::{QueryDef, QueryRegistry};
pub use sequencer::ResponseSequencer;
use tokio::{
    net::TcpListener,
    sync::Mutex,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:7451").
    pub bind_address: String,
    /// Channel log configuration (logs directory, chunk size).
    pub log: LogConfig,
    /// Path of the document/cursor database.
    pub docs_path: PathBuf,
    /// Initial byte credit granted to each subscription and query.
    pub initial_credit: i64,
    /// Maximum accepted wire frame size.
    pub max_frame_size: usize,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7451".to_string(),
            log: LogConfig::default(),
            docs_path: PathBuf::from("docs.redb"),
            initial_credit: 64 * 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: 10_000,
        }
    }
}

/// State shared by every connection task.
pub(crate) struct ServerState<D: DocStore> {
    /// Channel log manager.
    pub(crate) logs: ChannelLogs,
    /// Document and durable-cursor store.
    pub(crate) docs: D,
    /// Named query registry.
    pub(crate) queries: QueryRegistry,
    /// Server configuration.
    pub(crate) config: ServerConfig,
    /// Live connection ids.
    pub(crate) connections: Mutex<HashSet<u64>>,
}

/// Production logbus server.
///
/// Generic over the document store so tests can run against
/// [`logbus_core::MemoryDocStore`]; production uses [`RedbDocStore`].
pub struct Server<D: DocStore = RedbDocStore> {
    listener: TcpListener,
    state: Arc<ServerState<D>>,
}

impl Server<RedbDocStore> {
    /// Create and bind a server with the durable document store.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let docs = RedbDocStore::open(&config.docs_path)?;
        Self::bind_with_store(config, docs, QueryRegistry::new()).await
    }
}

impl<D: DocStore> Server<D> {
    /// Create and bind a server over an explicit store and query registry.
    pub async fn bind_with_store(
        config: ServerConfig,
        docs: D,
        queries: QueryRegistry,
    ) -> Result<Self, ServerError> {
        let logs = ChannelLogs::new(config.log.clone())?;
        let listener = TcpListener::bind(&config.bind_address).await?;

        let state = Arc::new(ServerState {
            logs,
            docs,
            queries,
            config,
            connections: Mutex::new(HashSet::new()),
        });

        Ok(Self { listener, state })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.state.connections.lock().await.len()
    }

    /// Run the server, accepting connections until shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.listener.local_addr()?);

        let mut next_conn_id: u64 = 1;
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let conn_id = next_conn_id;
                    next_conn_id += 1;

                    let state = Arc::clone(&self.state);
                    {
                        let mut connections = state.connections.lock().await;
                        if connections.len() >= state.config.max_connections {
                            tracing::warn!(%peer, "rejecting connection: max connections exceeded");
                            continue;
                        }
                        connections.insert(conn_id);
                    }

                    tokio::spawn(async move {
                        tracing::debug!(conn = conn_id, %peer, "connection accepted");
                        match connection::run(stream, conn_id, Arc::clone(&state)).await {
                            Ok(()) => tracing::debug!(conn = conn_id, "connection closed"),
                            Err(err) => {
                                tracing::error!(conn = conn_id, error = %err, "connection closed on protocol error");
                            },
                        }
                        state.connections.lock().await.remove(&conn_id);
                    });
                },
                Err(err) => {
                    tracing::error!(error = %err, "accept error");
                },
            }
        }
    }
}
