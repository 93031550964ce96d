use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::net::connections::FrameSender;
use crate::broker::net::handler::HubHandler;
use crate::broker::net::ConnectionId;
use crate::error::{ErrorCode, RelayError};
use crate::tlv::TLVMessage;

/// One node attached to the hub
pub struct Connection {
    id: ConnectionId,
    write_tx: UnboundedSender<TLVMessage>,
}

impl Connection {
    /// Register the connection with `handler` and start its read and write
    /// tasks. The read task ends on EOF, protocol error, or `shutdown`.
    pub fn spawn(stream: TcpStream, handler: Arc<HubHandler>, shutdown: CancellationToken) -> ConnectionId {
        let (reader, writer) = stream.into_split();
        let (write_tx, write_rx) = unbounded_channel::<TLVMessage>();

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            write_tx,
        });
        let id = connection.id;
        handler.connections.register(id, connection.clone());

        tokio::spawn(async move {
            if let Err(e) = Connection::write_task(id, writer, write_rx).await {
                warn!("Write task error on {}: {}", id, e);
            }
        });

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = shutdown.cancelled() => Ok(()),
                res = Connection::read_loop(&connection, reader, &handler) => res,
            };

            if let Err(e) = result {
                warn!("Closing connection {}: {}", id, e);
                let code = e.code().unwrap_or(ErrorCode::InternalServerError);
                // best effort, the write task drains it before exiting
                let _ = connection.send(&TLVMessage::error(code, e.message()));
            }

            // drops the registry's handle; the write task ends once ours goes too
            handler.handle_disconnect(id);
        });

        id
    }

    async fn read_loop(
        connection: &Arc<Connection>,
        mut reader: OwnedReadHalf,
        handler: &HubHandler,
    ) -> Result<(), RelayError> {
        debug!("Starting read loop for connection {}", connection.id);
        loop {
            match TLVMessage::read_from(&mut reader).await? {
                Some(msg) => {
                    debug!("Processing {:?} frame from {}", msg.event_type, connection.id);
                    handler.handle_frame(connection.id, &msg)?;
                },
                None => {
                    info!("Connection {} closed by peer", connection.id);
                    return Ok(());
                },
            }
        }
    }

    async fn write_task(
        id: ConnectionId,
        mut writer: OwnedWriteHalf,
        mut rx: UnboundedReceiver<TLVMessage>,
    ) -> Result<(), RelayError> {
        while let Some(msg) = rx.recv().await {
            let encoded = match msg.encode() {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!("Dropping unencodable {:?} frame for {}: {}", msg.event_type, id, e);
                    continue;
                },
            };
            writer
                .write_all(&encoded)
                .await
                .map_err(|e| RelayError::new(ErrorCode::WriteFailed, format!("Failed to write frame: {}", e)))?;
        }
        let _ = writer.shutdown().await;
        debug!("Write task for {} completed", id);
        Ok(())
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl FrameSender for Connection {
    fn send(&self, msg: &TLVMessage) -> Result<(), RelayError> {
        self.write_tx
            .send(msg.clone())
            .map_err(|_| RelayError::new(ErrorCode::SendFailed, format!("Connection {} is closed", self.id)))
    }
}
