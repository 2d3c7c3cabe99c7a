//! Connection Handler Module
//!
//! Each accepted client gets its own task running a read-parse-execute
//! loop until the client disconnects, goes idle for too long, or sends
//! something protocol-invalid.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Drain complete commands │ │
//!    │  │ from the buffer,        │ │
//!    │  │ queueing replies        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Flush queued replies    │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read from socket, with  │ │
//!    │  │ an idle deadline        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / idle / protocol error
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! Incoming data accumulates in a `BytesMut`: TCP is a stream protocol,
//! so one read may hold a partial command or several complete ones.
//! The parser drains every complete command before the task goes back
//! to the socket, which is what makes pipelining work, and the replies
//! of one batch are flushed together in submission order.

use crate::commands;
use crate::protocol::{CommandParser, ProtocolError};
use crate::server::{ServerState, SharedState};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum size of the read buffer. This also bounds a single bulk
/// payload, since the whole payload must be buffered before dispatch.
const MAX_BUFFER_SIZE: usize = 512 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics shared across all connection tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Manages the connection's read buffer, its parser state, and its
/// selected database index.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Incremental request parser
    parser: CommandParser,

    /// The shared server state
    state: SharedState,

    /// The database this connection has SELECTed
    db_index: usize,

    /// Clients idle longer than this are disconnected
    max_idle: Duration,

    /// Connection statistics (shared)
    stats: Arc<ServerStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        state: SharedState,
        stats: Arc<ServerStats>,
    ) -> Self {
        stats.connection_opened();
        let max_idle = Duration::from_secs(lock(&state).max_idle_secs);

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: CommandParser::new(),
            state,
            db_index: 0,
            max_idle,
            stats,
        }
    }

    /// Runs the main connection loop to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IdleTimeout => {
                    info!(client = %self.addr, "Closing idle client")
                }
                ConnectionError::Io(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let mut out = Vec::new();
        loop {
            // Drain every complete command already buffered, collecting
            // the replies of the whole batch
            out.clear();
            while let Some(args) = self.parser.parse(&mut self.buffer)? {
                if args[0].eq_ignore_ascii_case(b"quit") {
                    // QUIT never gets a reply; flush what the batch
                    // produced so far and close
                    self.flush_replies(&out).await?;
                    return Ok(());
                }

                let reply = {
                    let mut state = lock(&self.state);
                    commands::execute(&mut state, &mut self.db_index, &args)
                };
                self.stats.command_processed();
                trace!(
                    client = %self.addr,
                    command = %String::from_utf8_lossy(&args[0]),
                    error = reply.is_error(),
                    "Executed command"
                );
                reply.serialize_into(&mut out);
            }

            self.flush_replies(&out).await?;

            // Need more data - read from the socket
            self.read_more_data().await?;
        }
    }

    /// Writes one batch worth of replies to the client.
    async fn flush_replies(&mut self, out: &[u8]) -> Result<(), ConnectionError> {
        if out.is_empty() {
            return Ok(());
        }
        self.stream.write_all(out).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(out.len());
        trace!(client = %self.addr, bytes = out.len(), "Sent replies");
        Ok(())
    }

    /// Reads more data from the socket into the buffer, enforcing the
    /// idle deadline.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = tokio::time::timeout(
            self.max_idle,
            self.stream.get_mut().read_buf(&mut self.buffer),
        );
        let n = match read.await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::IdleTimeout),
        };

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() && !self.parser.awaiting_bulk() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial command in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }
}

fn lock(shared: &SharedState) -> MutexGuard<'_, ServerState> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something protocol-invalid
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// The client was idle past the configured timeout
    #[error("Idle timeout")]
    IdleTimeout,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection to completion.
///
/// Convenience wrapper that builds a [`ConnectionHandler`] and runs it,
/// downgrading routine disconnects to debug logging.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
    stats: Arc<ServerStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, state, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::IdleTimeout => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_server(state: ServerState) -> (SocketAddr, SharedState, Arc<ServerStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = state.shared();
        let stats = Arc::new(ServerStats::new());

        let shared_clone = Arc::clone(&shared);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let shared = Arc::clone(&shared_clone);
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, shared, stats));
            }
        });

        (addr, shared, stats)
    }

    async fn create_test_server() -> (SocketAddr, SharedState, Arc<ServerStats>) {
        spawn_server(ServerState::for_tests(4)).await
    }

    /// Reads from the client until `expected` bytes arrived or nothing
    /// more comes within a short deadline.
    async fn read_at_least(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 4096];
        let mut total = 0;
        while total < expected {
            match tokio::time::timeout(
                Duration::from_millis(500),
                client.read(&mut buf[total..]),
            )
            .await
            {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }
        buf.truncate(total);
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_bulk() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"set name 4\r\nAriz\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        client.write_all(b"get name\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_incr_fresh_key() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"incr counter\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"1\r\n");
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"flushall\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"-ERR unknown command\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands_reply_in_order() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"set k1 2\r\nv1\r\nset k2 2\r\nv2\r\nget k1\r\nget k2\r\n")
            .await
            .unwrap();

        // +OK +OK then two bulks
        let response = read_at_least(&mut client, 24).await;
        assert_eq!(&response, b"+OK\r\n+OK\r\n2\r\nv1\r\n2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn test_list_commands_over_the_wire() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"rpush l 1\r\na\r\nrpush l 1\r\nb\r\nlpush l 1\r\nz\r\nlrange l 0 -1\r\n")
            .await
            .unwrap();

        // three +OK then a 3-element multi-bulk
        let expected: &[u8] = b"+OK\r\n+OK\r\n+OK\r\n3\r\n1\r\nz\r\n1\r\na\r\n1\r\nb\r\n";
        let response = read_at_least(&mut client, expected.len()).await;
        assert_eq!(&response, expected);
    }

    #[tokio::test]
    async fn test_select_and_move_scope_keys() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"set k 1\r\nv\r\nmove k 1\r\nexists k\r\nselect 1\r\nget k\r\n")
            .await
            .unwrap();

        let expected: &[u8] = b"+OK\r\n+OK\r\n0\r\n+OK\r\n1\r\nv\r\n";
        let response = read_at_least(&mut client, expected.len()).await;
        assert_eq!(&response, expected);
    }

    #[tokio::test]
    async fn test_renamenx_existing_destination() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"set a 1\r\nx\r\nset b 1\r\ny\r\nrenamenx a b\r\n")
            .await
            .unwrap();

        let expected: &[u8] = b"+OK\r\n+OK\r\n-ERR destination key exists\r\n";
        let response = read_at_least(&mut client, expected.len()).await;
        assert_eq!(&response, expected);
    }

    #[tokio::test]
    async fn test_quit_closes_without_reply() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"quit\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_quit_ignores_extra_arguments() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"quit now please\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_oversized_inline_line_closes_connection() {
        let (addr, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let junk = vec![b'x'; 2048];
        client.write_all(&junk).await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_idle_client_is_disconnected() {
        let mut state = ServerState::for_tests(1);
        state.max_idle_secs = 1;
        let (addr, _, _) = spawn_server(state).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(3), client.read(&mut buf))
            .await
            .expect("server should have closed the idle connection")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"ping\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_bgsave_rejected_while_in_progress() {
        let (addr, shared, _) = create_test_server().await;

        // Occupy the background save slot without racing the writer
        shared.lock().unwrap().start_background_save();
        let db_path = shared.lock().unwrap().db_path().to_path_buf();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"bgsave\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"-ERR background save already in progress\r\n");
        let _ = std::fs::remove_file(db_path);
    }
}
