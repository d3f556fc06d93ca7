//! WebSocket server implementation
//!
//! Listens on a configurable address and hands each accepted socket to a
//! [`ConnectionHandler`] task.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::handler::ConnectionHandler;
use crate::config::{RelayConfig, ServerSettings};
use crate::relay::MessageRouter;

/// How long shutdown waits for connections to send their Close frames
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self { bind, port }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self::new(settings.bind.clone(), settings.port)
    }
}

/// WebSocket server relaying chat between room members
pub struct WebSocketServer {
    config: ServerConfig,
    router: Arc<MessageRouter>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: &RelayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: ServerConfig::from(&config.server),
            router: Arc::new(MessageRouter::new(config)),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and run the server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until a shutdown signal is received.
    ///
    /// Returns once every connection task has sent its Close frame and
    /// exited, or after [`SHUTDOWN_GRACE`] with the stragglers aborted.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let router = Arc::clone(&self.router);
                            let handler = ConnectionHandler::new(peer_addr, router);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            connections.spawn(async move {
                                if let Err(e) = handler.run(stream, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished connection tasks
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if !connections.is_empty() {
            info!(
                "Closing {} active connections across {} rooms...",
                self.router.connection_count().await,
                self.router.room_count().await
            );
        }

        let drain = async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Connections still open after {:?}, aborting them", SHUTDOWN_GRACE);
            connections.shutdown().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerMessage;
    use futures_util::{SinkExt, Stream, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new("127.0.0.1".to_string(), 9000);
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_server_config_from_settings() {
        let config = ServerConfig::from(&ServerSettings::default());
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
    }

    async fn next_message<S>(stream: &mut S) -> ServerMessage
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_relay_end_to_end() {
        let server = Arc::new(WebSocketServer::new(&RelayConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let running = Arc::clone(&server);
        let serve = tokio::spawn(async move { running.serve(listener).await });

        let (mut alice, _) = connect_async(url.as_str()).await.unwrap();
        let (mut bob, _) = connect_async(url.as_str()).await.unwrap();

        alice
            .send(Message::Text(
                r#"{"type":"create","payload":{"roomId":"r1","username":"alice"}}"#.to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(next_message(&mut alice).await, ServerMessage::room_created("r1"));

        bob.send(Message::Text(
            r#"{"type":"join","payload":{"roomId":"r1","username":"bob"}}"#.to_string(),
        ))
        .await
        .unwrap();
        assert_eq!(next_message(&mut bob).await, ServerMessage::joined("r1"));

        alice
            .send(Message::Text(
                r#"{"type":"chat","payload":{"message":"hi"}}"#.to_string(),
            ))
            .await
            .unwrap();

        for client in [&mut alice, &mut bob] {
            match next_message(client).await {
                ServerMessage::Chat(chat) => {
                    assert_eq!(chat.text, "hi");
                    assert_eq!(chat.sender, "alice");
                }
                other => panic!("Expected chat, got {:?}", other),
            }
        }

        server.shutdown();
        serve.await.unwrap().unwrap();
    }

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start_server() -> (
        Arc<WebSocketServer>,
        tokio::task::JoinHandle<anyhow::Result<()>>,
        String,
    ) {
        let server = Arc::new(WebSocketServer::new(&RelayConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let running = Arc::clone(&server);
        let serve = tokio::spawn(async move { running.serve(listener).await });
        (server, serve, url)
    }

    async fn send_text(client: &mut Client, json: &str) {
        client.send(Message::Text(json.to_string())).await.unwrap();
    }

    async fn wait_for_connections(server: &WebSocketServer, expected: usize) {
        for _ in 0..250 {
            if server.router.connection_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("connection count never reached {}", expected);
    }

    #[tokio::test]
    async fn test_client_close_tears_down_connection() {
        let (server, serve, url) = start_server().await;
        let (mut alice, _) = connect_async(url.as_str()).await.unwrap();
        let (mut bob, _) = connect_async(url.as_str()).await.unwrap();

        send_text(
            &mut alice,
            r#"{"type":"create","payload":{"roomId":"r1","username":"alice"}}"#,
        )
        .await;
        next_message(&mut alice).await;
        send_text(
            &mut bob,
            r#"{"type":"join","payload":{"roomId":"r1","username":"bob"}}"#,
        )
        .await;
        next_message(&mut bob).await;
        assert_eq!(server.router.connection_count().await, 2);

        bob.close(None).await.unwrap();
        wait_for_connections(&server, 1).await;

        // later broadcasts only reach the remaining member
        send_text(&mut alice, r#"{"type":"chat","payload":{"message":"alone?"}}"#).await;
        match next_message(&mut alice).await {
            ServerMessage::Chat(chat) => assert_eq!(chat.text, "alone?"),
            other => panic!("Expected chat, got {:?}", other),
        }
        assert_eq!(server.router.room_count().await, 1);

        alice.close(None).await.unwrap();
        wait_for_connections(&server, 0).await;
        assert_eq!(server.router.room_count().await, 0);

        server.shutdown();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (server, serve, url) = start_server().await;
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();

        client.send(Message::Ping(vec![1, 2, 3])).await.unwrap();

        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for pong")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Pong(data) = frame {
                assert_eq!(data, vec![1, 2, 3]);
                break;
            }
        }

        server.shutdown();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_binary_frame_ignored() {
        let (server, serve, url) = start_server().await;
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();

        client.send(Message::Binary(vec![0, 1, 2, 3])).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
        assert!(reply.is_err(), "expected no reply, got {:?}", reply);

        // the connection is still usable afterwards
        send_text(
            &mut client,
            r#"{"type":"create","payload":{"roomId":"r1","username":"carol"}}"#,
        )
        .await;
        assert_eq!(next_message(&mut client).await, ServerMessage::room_created("r1"));

        server.shutdown();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_frame() {
        let (server, serve, url) = start_server().await;
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();

        send_text(
            &mut client,
            r#"{"type":"create","payload":{"roomId":"r1","username":"dave"}}"#,
        )
        .await;
        next_message(&mut client).await;

        server.shutdown();

        let mut saw_close = false;
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_secs(5), client.next()).await
        {
            match frame {
                Ok(Message::Close(_)) => {
                    saw_close = true;
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        assert!(saw_close);

        // serve only returns after the connection task has finished
        serve.await.unwrap().unwrap();
        assert_eq!(server.router.connection_count().await, 0);
        assert_eq!(server.router.room_count().await, 0);
    }
}
