//! The task that owns the [`Relay`] and applies commands to it one at a time.

use reprelay_engine::config::SweeperConfig;
use reprelay_engine::correlator::now_ms;
use reprelay_engine::lifecycle::ListenerState;
use reprelay_engine::protocol::{HostMessage, SessionRequest};
use reprelay_engine::registry::{SessionId, SessionSink};
use reprelay_engine::relay::Relay;
use reprelay_engine::sweeper::{self, SweeperHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub enum RelayCommand {
    Host(HostMessage),
    HostAttached,
    HostDetached,
    StartupProbe(bool),
    SessionConnected {
        id: SessionId,
        sink: Arc<dyn SessionSink>,
    },
    SessionDisconnected(SessionId),
    Session {
        id: SessionId,
        request: SessionRequest,
    },
    Sweep,
    Status(oneshot::Sender<RelayStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub sessions: usize,
    pub in_flight: usize,
    pub listeners: ListenerState,
}

/// Cloneable sender into the relay service.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Returns `false` once the service has shut down.
    pub fn send(&self, command: RelayCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub async fn status(&self) -> Option<RelayStatus> {
        let (tx, rx) = oneshot::channel();
        if !self.send(RelayCommand::Status(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        self.send(RelayCommand::Shutdown);
    }
}

pub struct RelayService {
    relay: Relay,
    handle: RelayHandle,
    rx: mpsc::UnboundedReceiver<RelayCommand>,
    max_age_ms: u64,
    sweeper: Option<SweeperHandle>,
}

impl RelayService {
    /// Start the service task and its sweeper.
    pub fn spawn(relay: Relay, sweeper_config: &SweeperConfig) -> (RelayHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RelayHandle { tx };

        let ticker = handle.clone();
        let sweeper = sweeper::spawn(sweeper_config, move || {
            ticker.send(RelayCommand::Sweep);
        });

        let service = RelayService {
            relay,
            handle: handle.clone(),
            rx,
            max_age_ms: sweeper_config.max_age_ms,
            sweeper,
        };
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!("relay service started");
        while let Some(command) = self.rx.recv().await {
            if !self.apply(command) {
                break;
            }
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.stop().await;
        }
        info!("relay service stopped");
    }

    fn apply(&mut self, command: RelayCommand) -> bool {
        match command {
            RelayCommand::Host(message) => self.relay.handle_host_message(message, now_ms()),
            RelayCommand::HostAttached => self.probe(),
            RelayCommand::HostDetached => self.relay.host_detached(),
            RelayCommand::StartupProbe(granted) => self.relay.apply_startup_probe(granted),
            RelayCommand::SessionConnected { id, sink } => self.relay.connect_session(id, sink),
            RelayCommand::SessionDisconnected(id) => self.relay.disconnect_session(id),
            RelayCommand::Session { id, request } => {
                debug!(session = %id, ?request, "session request");
                self.relay.handle_session_request(id, request);
            }
            RelayCommand::Sweep => {
                self.relay.sweep(now_ms(), self.max_age_ms);
            }
            RelayCommand::Status(reply) => {
                let _ = reply.send(RelayStatus {
                    sessions: self.relay.session_count(),
                    in_flight: self.relay.in_flight_count(),
                    listeners: self.relay.listener_state(),
                });
            }
            RelayCommand::Shutdown => return false,
        }
        true
    }

    /// Check whether the permission is already granted; the answer comes
    /// back as [`RelayCommand::StartupProbe`].
    fn probe(&self) {
        let capabilities = self.relay.capabilities();
        let scope = self.relay.probe_scope();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let granted = Relay::probe(capabilities, scope).await;
            debug!(granted, "startup permission probe finished");
            handle.send(RelayCommand::StartupProbe(granted));
        });
    }
}
