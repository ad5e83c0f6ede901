//! TCP Server
//!
//! Owns the listener and the accept loop. Every accepted connection runs in
//! its own task. On shutdown the listener is closed, every connection is told
//! to stop through a `watch` channel, and the server waits up to the drain
//! timeout for them to finish before aborting the rest.
//!
//! ```text
//!   shutdown future ──► stop accepting ──► watch::send(true)
//!                                              │
//!                     idle connections close ◄─┤
//!              in-flight requests complete  ◄──┘
//!                                              │ drain timeout
//!                                              ▼
//!                                       abort leftovers
//! ```

use crate::commands::Router;
use crate::connection::{handle_connection, ConnectionStats};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for connections before forcing them closed
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A bound listener ready to serve requests.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    stats: Arc<ConnectionStats>,
    drain_timeout: Duration,
}

impl Server {
    /// Binds the listener. A bind failure is returned to the caller.
    pub async fn bind(addr: impl ToSocketAddrs, router: Router) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Listening");

        Ok(Self {
            listener,
            router: Arc::new(router),
            stats: Arc::new(ConnectionStats::new()),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts connections until `shutdown` completes, then drains.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) {
        let Server {
            listener,
            router,
            stats,
            drain_timeout,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(client = %addr, "Accepted connection");
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            Arc::clone(&router),
                            Arc::clone(&stats),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                // reap finished connections as we go
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        let _ = shutdown_tx.send(true);
        info!(active = stats.active(), "Shutting down, draining connections");

        let drained = tokio::time::timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timeout elapsed, closing remaining connections"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        info!("Server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_message, Message};
    use crate::storage::{ExpiryConfig, ExpirySweeper, Store};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct Running {
        addr: SocketAddr,
        store: Arc<Store>,
        stats: Arc<ConnectionStats>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    }

    async fn start(drain_timeout: Duration) -> Running {
        let store = Arc::new(Store::new());
        let server = Server::bind("127.0.0.1:0", Router::new(Arc::clone(&store)))
            .await
            .unwrap()
            .with_drain_timeout(drain_timeout);
        let addr = server.local_addr().unwrap();
        let stats = server.stats();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(async {
            let _ = stopped.await;
        }));

        Running {
            addr,
            store,
            stats,
            stop,
            task,
        }
    }

    async fn call(client: &mut TcpStream, args: &[&str]) -> Message {
        let request = Message::bulk_array(args.iter().map(|s| s.to_string()));
        client.write_all(&request.serialize()).await.unwrap();

        let mut buf = Vec::new();
        loop {
            if let Some((reply, consumed)) = parse_message(&buf).unwrap() {
                assert_eq!(consumed, buf.len(), "exactly one reply per request");
                return reply;
            }
            let mut chunk = [0u8; 1024];
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn bulk(s: &str) -> Message {
        Message::bulk_string(s.to_string())
    }

    #[tokio::test]
    async fn test_basic_get_set() {
        let server = start(DEFAULT_DRAIN_TIMEOUT).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        assert_eq!(call(&mut client, &["SET", "foo", "bar"]).await, Message::ok());
        assert_eq!(call(&mut client, &["GET", "foo"]).await, bulk("bar"));
        assert_eq!(call(&mut client, &["GET", "nope"]).await, Message::null());
    }

    #[tokio::test]
    async fn test_exists_counting() {
        let server = start(DEFAULT_DRAIN_TIMEOUT).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        assert_eq!(call(&mut client, &["EXISTS", "k"]).await, Message::integer(0));
        call(&mut client, &["SET", "k", "v"]).await;
        assert_eq!(
            call(&mut client, &["EXISTS", "k", "k"]).await,
            Message::integer(2)
        );
    }

    #[tokio::test]
    async fn test_list_build() {
        let server = start(DEFAULT_DRAIN_TIMEOUT).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        assert_eq!(
            call(&mut client, &["LPUSH", "k", "c", "b", "a"]).await,
            Message::integer(3)
        );
        assert_eq!(
            call(&mut client, &["RPUSH", "k", "d", "e", "f"]).await,
            Message::integer(6)
        );
        assert_eq!(
            call(&mut client, &["LRANGE", "k", "0", "5"]).await,
            Message::bulk_array(["a", "b", "c", "d", "e", "f"])
        );
    }

    #[tokio::test]
    async fn test_expiry_scenario() {
        let server = start(DEFAULT_DRAIN_TIMEOUT).await;
        let _sweeper = ExpirySweeper::start(Arc::clone(&server.store), ExpiryConfig::default());
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        assert_eq!(
            call(&mut client, &["SET", "k", "v", "PX", "50"]).await,
            Message::ok()
        );
        assert_eq!(call(&mut client, &["GET", "k"]).await, bulk("v"));
        assert!(server.store.is_tracking_expiry("k"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(call(&mut client, &["GET", "k"]).await, Message::null());

        call(&mut client, &["SET", "other", "v", "PX", "10"]).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!server.store.is_tracking_expiry("k"));
        assert!(!server.store.is_tracking_expiry("other"));
        assert!(server.store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let server = start(DEFAULT_DRAIN_TIMEOUT).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let reply = call(&mut client, &["FLUSHALL"]).await;
        assert!(reply.is_error());
        assert_eq!(call(&mut client, &["PING"]).await, Message::pong());
    }

    #[tokio::test]
    async fn test_parallel_clients_distinct_keys() {
        let server = start(DEFAULT_DRAIN_TIMEOUT).await;
        let addr = server.addr;

        let mut tasks = JoinSet::new();
        for i in 0..16 {
            tasks.spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let key = format!("key-{i}");
                let value = format!("value-{i}");
                assert_eq!(
                    call(&mut client, &["SET", key.as_str(), value.as_str()]).await,
                    Message::ok()
                );
                assert_eq!(call(&mut client, &["GET", key.as_str()]).await, bulk(&value));
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(server.store.len(), 16);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let server = start(Duration::from_secs(5)).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        assert_eq!(call(&mut client, &["PING"]).await, Message::pong());

        server.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.task)
            .await
            .expect("idle connections should not hold up shutdown")
            .unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(TcpStream::connect(server.addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_connection_after_timeout() {
        let server = start(Duration::from_millis(100)).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        // a request that never completes
        client.write_all(b"*2\r\n$3\r\nGET\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        server.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.task)
            .await
            .expect("drain timeout should bound shutdown")
            .unwrap();

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_forced_close_releases_active_count() {
        let server = start(Duration::from_millis(100)).await;
        let mut stuck = TcpStream::connect(server.addr).await.unwrap();
        let mut idle = TcpStream::connect(server.addr).await.unwrap();

        assert_eq!(call(&mut idle, &["PING"]).await, Message::pong());
        stuck.write_all(b"*2\r\n$3\r\nGET\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.stats.active(), 2);

        server.stop.send(()).unwrap();
        server.task.await.unwrap();

        assert_eq!(server.stats.active(), 0);
        assert_eq!(
            server
                .stats
                .connections_accepted
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }
}
