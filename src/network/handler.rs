//! Listener and per-connection serving

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::JarService;
use crate::Result;

use super::cors::CorsPolicy;
use super::limit::ConnectionLimit;
use super::router::Router;
use super::SHUTDOWN_TIMEOUT_MS;

/// HTTP server exposing a jar service
pub struct Server {
    config: Arc<Config>,
    service: Arc<JarService>,
    router: Router,
    limit: ConnectionLimit,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a server over fresh in-memory stores
    #[must_use]
    pub fn new(config: Config) -> Self {
        let service = Arc::new(JarService::in_memory(&config.subscriptions));
        Self::with_service(config, service)
    }

    /// Create a server over an existing service
    #[must_use]
    pub fn with_service(config: Config, service: Arc<JarService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let router = Router::new(
            Arc::clone(&service),
            CorsPolicy::new(&config.cors),
            Duration::from_secs(config.subscriptions.keepalive_secs),
        );

        Self {
            limit: ConnectionLimit::new(config.limits.max_connections),
            config: Arc::new(config),
            service,
            router,
            shutdown_tx,
        }
    }

    /// Service the server dispatches to
    #[must_use]
    pub fn service(&self) -> &Arc<JarService> {
        &self.service
    }

    /// Sender that stops the server when a value is sent
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or cannot be bound
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.server.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until Ctrl-C or the shutdown handle fires
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;

        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received SIGINT, shutting down"),
                Err(e) => error!("Failed to listen for SIGINT: {}", e),
            }
            shutdown.send(()).ok();
        });

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    ///
    /// On shutdown the listener is closed, every live subscription is ended
    /// and open connections get `SHUTDOWN_TIMEOUT_MS` to finish before they
    /// are aborted.
    ///
    /// # Errors
    ///
    /// Currently infallible once the listener exists
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let Some(permit) = self.limit.try_acquire() else {
                                warn!("Connection limit reached, rejecting {}", peer);
                                drop(stream);
                                continue;
                            };

                            connections.spawn(serve_connection(
                                stream,
                                peer,
                                self.router.clone(),
                                self.shutdown_tx.subscribe(),
                                permit,
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Initiating graceful shutdown");
                    break;
                }
            }

            while let Some(result) = connections.try_join_next() {
                if let Err(e) = result {
                    warn!("Connection task failed: {}", e);
                }
            }
        }

        drop(listener);
        self.service.shutdown();

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {} connections after shutdown timeout", connections.len());
            connections.abort_all();
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
    _permit: OwnedSemaphorePermit,
) {
    let service = service_fn(move |request: Request<Incoming>| {
        let router = router.clone();
        async move { Ok::<_, Infallible>(router.handle(request, peer).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!("Connection {} closed with error: {}", peer, e);
            }
        }
        _ = shutdown_rx.recv() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                debug!("Connection {} closed during shutdown: {}", peer, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 0;
        config.limits = LimitsConfig {
            max_connections: 10,
        };
        config
    }

    #[test]
    fn test_server_creation() {
        let server = Server::new(test_config());

        assert_eq!(server.limit.max_connections(), 10);
        assert_eq!(server.service().subscriptions().total_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::new(test_config());
        let listener = server.bind().await.unwrap();

        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let server = Server::new(test_config());
        let listener = server.bind().await.unwrap();
        let shutdown = server.shutdown_handle();

        let handle = tokio::spawn(async move { server.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).ok();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let server = Server::new(test_config());
        let service = Arc::clone(server.service());
        let jar_id = service.create_jar("demo").unwrap();
        let mut subscription = service.subscribe(&jar_id).unwrap();

        let listener = server.bind().await.unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move { server.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).ok();
        handle.await.unwrap().unwrap();

        assert!(subscription.recv().await.is_none());
    }
}
