pub mod config;
pub mod dispatch;
pub mod notifiers;
pub mod updates;

use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{RelayBroker, RelayHub};
use crate::error::Result;
use config::ServerConfig;
use notifiers::Notifiers;

/// A running backend node: its broker connection, its notifiers, and the relay
/// hub when this node hosts it
pub struct Node {
    pub notifiers: Arc<Notifiers>,
    pub broker: Arc<RelayBroker>,
    hub: Option<(CancellationToken, JoinHandle<std::io::Result<()>>)>,
}

impl Node {
    pub async fn start(config: &ServerConfig) -> Result<Self> {
        let hub = match &config.hub {
            Some(hub_config) => {
                let hub = RelayHub::bind(&hub_config.addr).await?;
                let token = hub.shutdown_token();
                Some((token, tokio::spawn(hub.run())))
            },
            None => None,
        };

        let broker = RelayBroker::connect(&config.broker, config.id.clone());
        let notifiers = Arc::new(Notifiers::new(broker.clone()));
        notifiers.bootstrap();

        info!("Node {} started, broker endpoint {}", config.id, config.broker.endpoint);
        Ok(Self { notifiers, broker, hub })
    }

    pub async fn shutdown(self) {
        self.notifiers.shutdown();
        self.broker.close();
        if let Some((token, task)) = self.hub {
            token.cancel();
            let _ = task.await;
        }
        info!("Node stopped");
    }
}

/// Run a node until ctrl-c
pub async fn init(config: ServerConfig) -> Result<()> {
    let node = Node::start(&config).await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    node.shutdown().await;
    Ok(())
}
