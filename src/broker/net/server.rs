use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broker::net::connection::Connection;
use crate::broker::net::handler::HubHandler;

/// The relay hub: the shared bus every node's `RelayBroker` connects to
pub struct RelayHub {
    listener: TcpListener,
    handler: Arc<HubHandler>,
    shutdown: CancellationToken,
}

impl RelayHub {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay hub listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handler: Arc::new(HubHandler::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handler(&self) -> Arc<HubHandler> {
        self.handler.clone()
    }

    /// Cancelling the token stops accepting and closes every connection
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Relay hub shutting down");
                    return Ok(());
                },
                accepted = self.listener.accept() => accepted?,
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for connection from {}: {}", addr, e);
            }

            let id = Connection::spawn(stream, self.handler.clone(), self.shutdown.child_token());
            info!("New connection {} from {}", id, addr);
        }
    }
}
