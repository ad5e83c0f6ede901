//! Per-Client Connection Loop
//!
//! One `ConnectionHandler` runs per accepted socket, in its own task. It
//! buffers incoming bytes, peels complete requests off the front, and writes
//! exactly one reply per request.
//!
//! ## States
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │          Reading             │◄──────────┐
//!            │  accumulate bytes in buffer  │           │
//!            └──────────────┬───────────────┘           │
//!                           │                           │
//!                           ▼                           │
//!            ┌──────────────────────────────┐  need     │
//!            │      Dispatch attempt        │──more─────┤
//!            │  parse one message from buf  │  bytes    │
//!            └──────────────┬───────────────┘           │
//!                           │ complete                  │
//!                           ▼                           │
//!            ┌──────────────────────────────┐           │
//!            │         Responding           │───────────┘
//!            │  router.dispatch + write all │
//!            └──────────────────────────────┘
//! ```
//!
//! - EOF with an empty buffer closes the connection quietly.
//! - EOF with a partial request in the buffer closes it without a reply.
//! - A malformed request gets an error reply and the connection stays open.
//!   The framing is lost at that point, so everything buffered behind the
//!   bad request is discarded too, including pipelined requests that were
//!   well formed. Those get no reply.
//! - Any other read or write error aborts the connection.
//! - On shutdown an idle connection closes at once; one with a partial
//!   request keeps reading until it completes or the server gives up on it.

use crate::commands::Router;
use crate::protocol::{Message, MessageParser, ParseError, MAX_BULK_SIZE};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Largest amount of unparsed data buffered for one connection
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Starting capacity of the read buffer
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every connection of a server.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Connections accepted since startup
    pub connections_accepted: AtomicU64,
    /// Connections currently open
    pub active_connections: AtomicU64,
    /// Requests dispatched to the router
    pub commands_processed: AtomicU64,
}

impl ConnectionStats {
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

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// State of one client connection: socket, read buffer and parser.
pub struct ConnectionHandler {
    /// Socket, buffered for replies
    stream: BufWriter<TcpStream>,

    /// Peer address, used in log fields
    addr: SocketAddr,

    /// Bytes read but not yet parsed
    buffer: BytesMut,

    /// Shared command router
    router: Arc<Router>,

    parser: MessageParser,

    stats: Arc<ConnectionStats>,

    /// Flips to `true` when the server is shutting down
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<Router>,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            router,
            parser: MessageParser::new(),
            stats,
            shutdown,
        }
    }

    /// Runs the connection until the client leaves, an I/O error occurs or
    /// the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::UnexpectedEof) => {
                debug!(client = %self.addr, "Client left mid-request")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        result
    }

    /// The read-dispatch-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(request) = self.try_parse_request() {
                let reply = match request {
                    Ok(request) => {
                        let reply = self.router.dispatch(request);
                        self.stats.command_processed();
                        reply
                    }
                    Err(e) => Message::error(format!("ERR {e}")),
                };
                self.send_reply(&reply).await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Attempts to take one request off the front of the buffer.
    ///
    /// `None` means more bytes are needed. A malformed request is returned as
    /// `Some(Err(_))` after the whole buffer has been discarded, so requests
    /// pipelined behind it in the same read are dropped unanswered.
    fn try_parse_request(&mut self) -> Option<Result<Message, ParseError>> {
        if self.buffer.is_empty() {
            return None;
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((request, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Some(Ok(request))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                None
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                self.buffer.clear();
                Some(Err(e))
            }
        }
    }

    /// Reads whatever the socket has into the buffer.
    ///
    /// Returns `false` when the connection should close cleanly: EOF on an
    /// empty buffer, or a shutdown signal while idle.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Read buffer limit reached, dropping client"
            );
            return Err(ConnectionError::BufferFull);
        }

        let idle = self.buffer.is_empty();
        if idle && *self.shutdown.borrow() {
            return Ok(false);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = tokio::select! {
            read = self.stream.get_mut().read_buf(&mut self.buffer) => read?,
            _ = self.shutdown.changed(), if idle => {
                debug!(client = %self.addr, "Closing idle connection for shutdown");
                return Ok(false);
            }
        };

        if n == 0 {
            return if self.buffer.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(true)
    }

    /// Writes one reply in full.
    async fn send_reply(&mut self, reply: &Message) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent reply"
        );
        Ok(())
    }
}

impl Drop for ConnectionHandler {
    // runs on abort as well as on a normal return from `run`
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Reasons a connection ends abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Socket read or write failed
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The client closed the connection with a partial request buffered
    #[error("client closed the connection mid-request")]
    UnexpectedEof,

    /// Unparsed data grew past `MAX_BUFFER_SIZE`
    #[error("read buffer limit exceeded")]
    BufferFull,
}

/// Serves one client until it disconnects or the server shuts it down.
///
/// Errors are logged by the handler, so the spawned task has nothing to return.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: Arc<Router>,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, router, stats, shutdown);
    let _ = handler.run().await;
}
