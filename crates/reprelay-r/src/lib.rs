pub mod host_link;
pub mod server;
pub mod service;

use host_link::HostLink;
use reprelay_engine::config::RelayConfig;
use reprelay_engine::relay::Relay;
use server::{RelayServer, ServerHandle};
use service::{RelayHandle, RelayService};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    Address(String),
    #[error("Failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// A relay service and the WebSocket server in front of it.
pub struct RunningRelay {
    pub relay: RelayHandle,
    pub server: ServerHandle,
    pub service: JoinHandle<()>,
}

impl RunningRelay {
    /// Close every connection, then stop the service and its sweeper.
    pub async fn shutdown(self) {
        self.server.stop().await;
        self.relay.shutdown();
        let _ = self.service.await;
    }
}

/// Wire a host link, the relay service and the server together and start listening.
pub async fn launch(config: &RelayConfig) -> Result<RunningRelay, ServerError> {
    let host = HostLink::new();
    let relay = Relay::new(&config.capture, Box::new(host.clone()), Arc::new(host.clone()));
    let (handle, service) = RelayService::spawn(relay, &config.sweeper);

    let server = match RelayServer::new(&config.server, handle.clone(), host) {
        Ok(server) => server.start().await,
        Err(e) => Err(e),
    };
    match server {
        Ok(server) => Ok(RunningRelay {
            relay: handle,
            server,
            service,
        }),
        Err(e) => {
            handle.shutdown();
            Err(e)
        }
    }
}
