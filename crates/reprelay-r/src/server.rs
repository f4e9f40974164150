use crate::host_link::HostLink;
use crate::service::{RelayCommand, RelayHandle};
use crate::ServerError;
use futures::{SinkExt, StreamExt};
use reprelay_engine::config::ServerConfig;
use reprelay_engine::protocol::{HostCommand, HostMessage, RelayMessage, SessionRequest};
use reprelay_engine::registry::SessionId;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Path the browser shim connects on.
pub const HOST_PATH: &str = "/host";
/// Path panel sessions connect on; anything else is refused.
pub const PANEL_PATH: &str = "/rep-panel";

pub struct RelayServer {
    addr: SocketAddr,
    relay: RelayHandle,
    host: HostLink,
}

/// Running server. Dropping it also stops the accept loop and closes every
/// open connection.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub accept_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Stop accepting and close every host and panel connection.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.accept_task.await;
    }
}

impl RelayServer {
    pub fn new(
        config: &ServerConfig,
        relay: RelayHandle,
        host: HostLink,
    ) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|_| ServerError::Address(format!("{}:{}", config.host, config.port)))?;
        Ok(Self { addr, relay, host })
    }

    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;
        info!("Relay server listening on: {}", local_addr);

        let next_session = Arc::new(AtomicU64::new(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let connection_shutdown = shutdown_rx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = shutdown_rx.changed() => break,
                };
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                debug!("Accepted TCP connection from: {}", peer);
                tokio::spawn(accept_connection(
                    stream,
                    self.relay.clone(),
                    self.host.clone(),
                    Arc::clone(&next_session),
                    connection_shutdown.clone(),
                ));
            }
            info!("Relay server stopped accepting connections");
        });

        Ok(ServerHandle {
            local_addr,
            accept_task,
            shutdown_tx,
        })
    }
}

async fn accept_connection(
    stream: TcpStream,
    relay: RelayHandle,
    host: HostLink,
    next_session: Arc<AtomicU64>,
    shutdown: watch::Receiver<bool>,
) {
    let mut path = String::new();
    let record_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(resp)
    };
    let ws_stream = match accept_hdr_async(stream, record_path).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    match path.as_str() {
        HOST_PATH => run_host(ws_stream, relay, host, shutdown).await,
        PANEL_PATH => {
            let id = SessionId(next_session.fetch_add(1, Ordering::Relaxed));
            run_session(ws_stream, relay, id, shutdown).await;
        }
        other => {
            warn!(path = other, "Refusing connection on unknown channel");
            let mut ws_stream = ws_stream;
            let _ = ws_stream.close(None).await;
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            error!("Failed to encode outbound message: {}", e);
            None
        }
    }
}

async fn run_host(
    ws_stream: WebSocketStream<TcpStream>,
    relay: RelayHandle,
    host: HostLink,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<HostCommand>();
    let attachment = host.attach(cmd_tx);
    if attachment.replaced {
        // The displaced shim took its listeners with it.
        relay.send(RelayCommand::HostDetached);
    }
    relay.send(RelayCommand::HostAttached);

    loop {
        tokio::select! {
            // Relay -> shim
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    info!("Host connection superseded");
                    break;
                };
                let Some(msg) = encode(&cmd) else { continue };
                if let Err(e) = ws_sender.send(msg).await {
                    error!("Failed to send command to host: {}", e);
                    break;
                }
            }

            // Shim -> relay
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<HostMessage>(&text) {
                        Ok(HostMessage::CapabilityReply { id, result, error }) => {
                            host.resolve(id, result, error);
                        }
                        Ok(message) => {
                            if !relay.send(RelayCommand::Host(message)) {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to parse host message: {} | Text: {}", e, text);
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Host connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Host WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = shutdown.changed() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                info!("Closing host connection on shutdown");
                break;
            }
        }
    }

    if host.detach(attachment.generation) {
        relay.send(RelayCommand::HostDetached);
    }
}

async fn run_session(
    ws_stream: WebSocketStream<TcpStream>,
    relay: RelayHandle,
    id: SessionId,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayMessage>();
    relay.send(RelayCommand::SessionConnected {
        id,
        sink: Arc::new(out_tx),
    });

    loop {
        tokio::select! {
            // Relay -> panel
            Some(message) = out_rx.recv() => {
                let Some(msg) = encode(&message) else { continue };
                if let Err(e) = ws_sender.send(msg).await {
                    error!(session = %id, "Failed to send to panel: {}", e);
                    break;
                }
            }

            // Panel -> relay
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<SessionRequest>(&text) {
                        Ok(request) => {
                            if !relay.send(RelayCommand::Session { id, request }) {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(session = %id, "Failed to parse panel message: {} | Text: {}", e, text);
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session = %id, "Panel connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(session = %id, "Panel WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = shutdown.changed() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                info!(session = %id, "Closing panel connection on shutdown");
                break;
            }
        }
    }

    relay.send(RelayCommand::SessionDisconnected(id));
}
