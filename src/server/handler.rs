//! WebSocket connection handler
//!
//! Drives one client connection: inbound frames go to the router, and
//! messages queued for this connection are written back to the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::ServerMessage;
use crate::relay::{ConnectionId, MessageRouter};

/// Handles a single WebSocket connection
pub struct ConnectionHandler {
    id: ConnectionId,
    peer_addr: SocketAddr,
    router: Arc<MessageRouter>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(peer_addr: SocketAddr, router: Arc<MessageRouter>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            router,
        }
    }

    /// Run the connection until the client leaves or shutdown is signalled.
    ///
    /// The connection is removed from the router on every exit path.
    pub async fn run(
        self,
        stream: TcpStream,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.router.connect(self.id, outbox).await;
        info!("New connection {} from {}", self.id, self.peer_addr);

        let result = self.serve(stream, inbox, shutdown_rx).await;

        self.router.disconnect(self.id).await;
        info!("Connection {} from {} closed", self.id, self.peer_addr);
        result
    }

    async fn serve(
        &self,
        stream: TcpStream,
        mut inbox: mpsc::UnboundedReceiver<ServerMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        // Upgrade to WebSocket, unless shutdown arrives mid-handshake
        let ws_stream = tokio::select! {
            result = accept_async(stream) => result?,
            _ = shutdown_rx.recv() => return Ok(()),
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Receive messages from client
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Received message from {}: {}", self.id, text);
                            self.router.handle_text(self.id, &text).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            warn!(
                                "Received binary message from {} ({} bytes), ignoring",
                                self.id,
                                data.len()
                            );
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            info!("Client {} requested close", self.id);
                            break;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error from {}: {}", self.id, e);
                            break;
                        }
                        None => {
                            debug!("Stream ended for {}", self.id);
                            break;
                        }
                    }
                }
                // Deliver messages routed to this connection
                outgoing = inbox.recv() => {
                    let Some(message) = outgoing else {
                        break;
                    };
                    let json = message.to_json()?;
                    ws_sender.send(Message::Text(json)).await?;
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection {}", self.id);
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        Ok(())
    }
}
