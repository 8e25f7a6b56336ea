use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
};
use tracing::{info, warn};

use crate::{config::RelayConfig, connection::ConnectionId, dispatcher, registry::Registry};

pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: RelayConfig,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::with_write_timeout(config.write_timeout)),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accepts clients until `shutdown` resolves, then tells every live
    /// connection task to close.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&self.registry, &shutdown_tx).await;
                    break;
                }
                accept_result = self.listener.accept() => {
                    self.handle_accept_result(accept_result, &shutdown_rx);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    fn handle_accept_result(
        &self,
        result: std::io::Result<(TcpStream, SocketAddr)>,
        shutdown: &watch::Receiver<bool>,
    ) {
        match result {
            Ok((stream, peer)) => self.spawn_connection_handler(stream, peer, shutdown.clone()),
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }

    fn spawn_connection_handler(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        let id: ConnectionId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        tokio::spawn(dispatcher::handle_connection(
            stream, peer, id, registry, config, shutdown,
        ));
    }
}

async fn handle_shutdown(registry: &Registry, shutdown: &watch::Sender<bool>) {
    let connections = registry.connection_count().await;
    info!(connections, "relay shutting down");
    shutdown.send_replace(true);
}
