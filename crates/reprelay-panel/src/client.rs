use crate::log::{RequestLog, RequestRenderer};
use crate::merge::CrossSessionMerge;
use futures::{SinkExt, StreamExt};
use reprelay_engine::protocol::{RelayMessage, SessionRequest};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Address of the relay's panel channel.
pub fn panel_url(host: &str, port: u16) -> String {
    format!("ws://{}:{}/rep-panel", host, port)
}

/// Local input driving a running panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelControl {
    Toggle,
    Exit,
}

/// One control-channel session with the relay.
pub struct PanelClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PanelClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(url).await.map_err(|source| ClientError::Connect {
            url: url.to_string(),
            source,
        })?;
        info!(url, "connected to relay");
        Ok(Self { ws })
    }

    pub async fn send(&mut self, request: SessionRequest) -> Result<(), ClientError> {
        let json = serde_json::to_string(&request)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Next message from the relay, or `None` once the relay closes the
    /// channel. Frames that do not parse are logged and skipped.
    pub async fn next_message(&mut self) -> Result<Option<RelayMessage>, ClientError> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<RelayMessage>(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => warn!("Failed to parse relay message: {} | Text: {}", e, text),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }

    /// Drive `merge` from this session until the relay goes away or an
    /// [`PanelControl::Exit`] arrives.
    pub async fn run<L, R>(
        mut self,
        merge: &mut CrossSessionMerge<L, R>,
        mut controls: mpsc::UnboundedReceiver<PanelControl>,
    ) -> Result<(), ClientError>
    where
        L: RequestLog,
        R: RequestRenderer,
    {
        self.send(merge.initial_message()).await?;
        let mut controls_open = true;

        loop {
            tokio::select! {
                message = self.next_message() => {
                    match message? {
                        Some(message) => {
                            merge.handle_message(message);
                        }
                        None => {
                            info!("relay closed the panel channel");
                            return Ok(());
                        }
                    }
                }
                control = controls.recv(), if controls_open => {
                    match control {
                        Some(PanelControl::Toggle) => {
                            let request = merge.toggle_message();
                            debug!(?request, "toggling multi-source capture");
                            self.send(request).await?;
                        }
                        Some(PanelControl::Exit) => break,
                        None => controls_open = false,
                    }
                }
            }
        }

        self.close().await
    }
}
