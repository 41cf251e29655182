//! Shared helpers for server integration tests: a wire-level test client
//! and a server launcher over temporary storage.

#![allow(dead_code)]

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use bytes::BytesMut;
use logbus_core::{LogConfig, MemoryDocStore};
use logbus_proto::{Frame, FrameParser, encode_frame, fields, kind};
use logbus_server::{QueryRegistry, Server, ServerConfig};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::timeout,
};

/// How long a test waits for an expected frame before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Window used to assert that nothing further arrives.
pub const QUIET_WINDOW: Duration = Duration::from_millis(300);

/// A running server over temporary storage.
pub struct TestServer {
    /// Bound address.
    pub addr: SocketAddr,
    /// The shared document store, for seeding documents.
    pub docs: MemoryDocStore,
    /// Temp dir keeping the logs alive for the test's duration.
    pub dir: TempDir,
    /// Accept-loop task.
    pub task: JoinHandle<()>,
}

/// Start a server in a fresh temp dir with default credit and chunk size.
pub async fn start_server() -> TestServer {
    start_server_with(64 * 1024, 256 * 1024, QueryRegistry::new()).await
}

/// Start a server in a fresh temp dir with explicit tuning.
pub async fn start_server_with(
    initial_credit: i64,
    chunk_size: u64,
    queries: QueryRegistry,
) -> TestServer {
    let dir = TempDir::new().unwrap();
    let docs = MemoryDocStore::new();
    let (addr, task) =
        spawn_server(dir.path().join("logs"), initial_credit, chunk_size, docs.clone(), queries)
            .await;

    TestServer { addr, docs, dir, task }
}

/// Bind and run a server over an existing logs directory.
///
/// Used by restart tests: the second server must recover whatever the
/// first one persisted.
pub async fn spawn_server(
    logs_dir: PathBuf,
    initial_credit: i64,
    chunk_size: u64,
    docs: MemoryDocStore,
    queries: QueryRegistry,
) -> (SocketAddr, JoinHandle<()>) {
    let config = ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        log: LogConfig { logs_dir, max_log_chunk_size: chunk_size },
        initial_credit,
        ..ServerConfig::default()
    };

    let server = Server::bind_with_store(config, docs, queries).await.unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, task)
}

/// Minimal protocol client for driving the server over real TCP.
pub struct TestClient {
    stream: TcpStream,
    parser: FrameParser,
    buf: BytesMut,
}

impl TestClient {
    /// Connect without sending any frame.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { stream, parser: FrameParser::default(), buf: BytesMut::with_capacity(64 * 1024) }
    }

    /// Connect and complete the CONNECT handshake.
    pub async fn handshake(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(&Frame::new(kind::CONNECT)).await;
        let reply = client.recv().await;
        assert_eq!(reply.kind(), kind::RESPONSE);
        assert_eq!(reply.fields().get_bool(fields::OK), Some(true));
        client
    }

    /// Send one frame.
    pub async fn send(&mut self, frame: &Frame) {
        let wire = encode_frame(frame).unwrap();
        self.stream.write_all(&wire).await.unwrap();
    }

    /// Receive the next frame, failing the test on timeout or close.
    pub async fn recv(&mut self) -> Frame {
        timeout(RECV_TIMEOUT, self.recv_inner())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed while waiting for a frame")
    }

    /// Receive a frame if one arrives within `window`.
    pub async fn try_recv(&mut self, window: Duration) -> Option<Frame> {
        match timeout(window, self.recv_inner()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }

    /// Assert the server closes the connection without sending a frame.
    pub async fn expect_closed(&mut self) {
        let outcome = timeout(RECV_TIMEOUT, self.recv_inner())
            .await
            .expect("timed out waiting for the server to close");
        assert!(outcome.is_none(), "expected close, got frame: {outcome:?}");
    }

    async fn recv_inner(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.parser.next_frame().unwrap() {
                return Some(frame);
            }
            self.buf.clear();
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => self.parser.feed(&self.buf),
            }
        }
    }

    /// Wire size of a frame as the server would encode it.
    pub fn wire_len(frame: &Frame) -> i64 {
        encode_frame(frame).unwrap().len() as i64
    }
}
