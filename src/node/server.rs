use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ServerConfig;
use crate::messaging::frame::{read_frame, write_frame};

/// Application logic of a listening node: turns one received frame into exactly one
///  acknowledgment. Failures are reported through the acknowledgment, never by closing the
///  connection.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, peer: SocketAddr, frame: &[u8]) -> String;
}

/// Accept loop shared by the directory, relays and the ground station. Each connection gets its
///  own task; a semaphore bounds the number of concurrently served connections.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Server> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Server {
            listener,
            config,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` completes. Then the listener is closed, connections
    ///  waiting for their next message are closed, and connections processing a message get
    ///  the configured grace period to finish before they are aborted.
    pub async fn run(self, handler: Arc<dyn MessageHandler>, shutdown: impl Future<Output=()>) -> anyhow::Result<()> {
        let (shutdown_send, shutdown_recv) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            while let Some(finished) = connections.try_join_next() {
                if let Err(e) = finished {
                    error!("connection task failed: {}", e);
                }
            }

            let permit = select! {
                _ = &mut shutdown => break,
                permit = permits.clone().acquire_owned() => permit?,
            };

            select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        let shutdown_recv = shutdown_recv.clone();
                        connections.spawn(async move {
                            let _permit = permit;
                            if let Err(e) = handle_connection(peer, stream, handler, shutdown_recv).await {
                                warn!("connection from {} broke with an error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("error accepting connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        info!("shutting down - no longer accepting connections");
        drop(self.listener);
        let _ = shutdown_send.send(true);

        let drained = timeout(self.config.shutdown_grace_period, async {
            while let Some(finished) = connections.join_next().await {
                if let Err(e) = finished {
                    error!("connection task failed: {}", e);
                }
            }
        }).await;

        if drained.is_err() {
            warn!("{} connection(s) still busy after grace period - aborting", connections.len());
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        debug!("all connections closed");
        Ok(())
    }
}

#[instrument(name="connection", skip_all, fields(peer = %peer))]
async fn handle_connection(
    peer: SocketAddr,
    mut stream: TcpStream,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    debug!("accepted connection");

    loop {
        let frame = select! {
            frame = read_frame(&mut stream) => frame?,
            _ = shutdown.wait_for(|s| *s) => {
                debug!("closing connection for shutdown");
                return Ok(());
            }
        };

        let Some(frame) = frame else {
            debug!("connection closed by peer");
            return Ok(());
        };
        trace!("received frame of {} bytes", frame.len());

        let ack = handler.on_message(peer, &frame).await;
        write_frame(&mut stream, ack.as_bytes()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::frame::request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    struct EchoHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn on_message(&self, _peer: SocketAddr, frame: &[u8]) -> String {
            let n = self.count.fetch_add(1, Ordering::AcqRel);
            format!("#{} {}", n, String::from_utf8_lossy(frame))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl MessageHandler for SlowHandler {
        async fn on_message(&self, _peer: SocketAddr, _frame: &[u8]) -> String {
            sleep(Duration::from_secs(3600)).await;
            "done".to_string()
        }
    }

    async fn start(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_send, stop_recv) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(handler, async move { let _ = stop_recv.await; }));
        (addr, stop_send, handle)
    }

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_ack_per_frame() {
        let (addr, stop, handle) = start(local_config(), Arc::new(EchoHandler { count: AtomicUsize::new(0) })).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        assert_eq!(request(&mut a, b"x").await.unwrap(), b"#0 x");
        assert_eq!(request(&mut b, b"y").await.unwrap(), b"#1 y");
        assert_eq!(request(&mut a, b"z").await.unwrap(), b"#2 z");

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut config = local_config();
        config.max_connections = 1;
        let (addr, stop, handle) = start(config, Arc::new(EchoHandler { count: AtomicUsize::new(0) })).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(request(&mut first, b"a").await.unwrap(), b"#0 a");

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(timeout(Duration::from_millis(200), request(&mut second, b"b")).await.is_err());

        drop(first);
        let mut third = TcpStream::connect(addr).await.unwrap();
        // 'second' was accepted once 'first' released its slot; its frame is still unanswered
        //  because the timed-out request was cancelled after writing
        assert!(timeout(Duration::from_millis(200), request(&mut third, b"c")).await.is_err());

        let ack = read_frame(&mut second).await.unwrap().unwrap();
        assert_eq!(ack, b"#1 b");

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let (addr, stop, handle) = start(local_config(), Arc::new(EchoHandler { count: AtomicUsize::new(0) })).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(request(&mut client, b"a").await.unwrap(), b"#0 a");

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(read_frame(&mut client).await.unwrap(), None);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_grace_period() {
        let mut config = local_config();
        config.shutdown_grace_period = Duration::from_millis(100);
        let (addr, stop, handle) = start(config, Arc::new(SlowHandler)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut client, b"never answered").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        stop.send(()).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();

        assert!(read_frame(&mut client).await.unwrap_or(None).is_none());
    }
}
