//! The relay: owns the in-flight table, the session registry and the listener
//! lifecycle, and is the only thing that mutates them.

use crate::config::CaptureConfig;
use crate::correlator::Correlator;
use crate::host::{Capabilities, HostEventBus};
use crate::lifecycle::{ListenerLifecycle, ListenerState};
use crate::registry::{SessionId, SessionRegistry, SessionSink};
use reprelay_common::protocol::{HostMessage, PermissionSet, RelayMessage, SessionRequest};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub struct Relay {
    correlator: Correlator,
    sessions: SessionRegistry,
    lifecycle: ListenerLifecycle,
    host: Box<dyn HostEventBus>,
    capabilities: Arc<dyn Capabilities>,
    session_scope: PermissionSet,
    probe_scope: PermissionSet,
}

impl Relay {
    pub fn new(
        config: &CaptureConfig,
        host: Box<dyn HostEventBus>,
        capabilities: Arc<dyn Capabilities>,
    ) -> Self {
        Self {
            correlator: Correlator::new(config.self_origin_prefixes.clone()),
            sessions: SessionRegistry::new(),
            lifecycle: ListenerLifecycle::new(config.required_permission.clone()),
            host,
            capabilities,
            session_scope: config.session_scope(),
            probe_scope: config.probe_scope(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.correlator.len()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.lifecycle.state()
    }

    /// Apply one message from the host. Phase events are dropped while the
    /// listeners are not registered; an error always discards its record.
    pub fn handle_host_message(&mut self, message: HostMessage, now: u64) {
        let sessions = self.sessions.len();
        match message {
            HostMessage::PermissionsAdded(change) => {
                self.lifecycle.on_capability_added(&change, self.host.as_mut());
            }
            HostMessage::PermissionsRemoved(change) => {
                self.lifecycle.on_capability_removed(&change, self.host.as_mut());
            }
            HostMessage::CapabilityReply { id, .. } => {
                debug!(id, "capability reply not claimed by the host link");
            }
            HostMessage::ErrorOccurred { details } => {
                self.correlator.on_error_occurred(details);
            }
            phase if !self.lifecycle.is_active() => {
                trace!(?phase, "dropping host event while listeners are inactive");
            }
            HostMessage::BeforeRequest { details } => {
                self.correlator.on_request_started(details, sessions, now);
            }
            HostMessage::BeforeSendHeaders { details } => {
                self.correlator.on_headers_sent(details, sessions);
            }
            HostMessage::Completed { details } => {
                if let Some(record) = self.correlator.on_completed(details, sessions) {
                    debug!(request_id = %record.request_id, url = %record.url, "relaying captured request");
                    self.sessions
                        .broadcast(&RelayMessage::CapturedRequest { data: record });
                }
            }
        }
    }

    pub fn connect_session(&mut self, id: SessionId, sink: Arc<dyn SessionSink>) {
        self.sessions.register(id, sink);
    }

    pub fn disconnect_session(&mut self, id: SessionId) {
        self.sessions.unregister(id);
    }

    /// Answer a session's capability request on its own task, so other events
    /// keep flowing while the host (or the user) decides. The reply goes to
    /// the requesting session only.
    pub fn handle_session_request(
        &self,
        id: SessionId,
        request: SessionRequest,
    ) -> Option<JoinHandle<()>> {
        let Some(sink) = self.sessions.sink(id) else {
            warn!(session = %id, "request from unknown session");
            return None;
        };
        let capabilities = Arc::clone(&self.capabilities);
        let scope = self.session_scope.clone();
        let op = request.op();

        Some(tokio::spawn(async move {
            let outcome = capabilities
                .run(op.capability_op(), &scope)
                .await
                .map_err(|e| {
                    warn!(session = %id, ?op, error = %e, "capability operation failed");
                    e.to_string()
                });
            let reply = RelayMessage::permissions_result(op, outcome);
            if let Err(e) = sink.deliver(&reply) {
                warn!(session = %id, error = %e, "failed to deliver permissions result");
            }
        }))
    }

    /// Ask the host whether the permission is already granted.
    pub async fn probe(capabilities: Arc<dyn Capabilities>, scope: PermissionSet) -> bool {
        match capabilities.contains(&scope).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!(error = %e, "startup permission probe failed");
                false
            }
        }
    }

    pub fn capabilities(&self) -> Arc<dyn Capabilities> {
        Arc::clone(&self.capabilities)
    }

    pub fn probe_scope(&self) -> PermissionSet {
        self.probe_scope.clone()
    }

    pub fn apply_startup_probe(&mut self, granted: bool) {
        self.lifecycle.on_startup_probe(granted, self.host.as_mut());
    }

    pub fn host_detached(&mut self) {
        self.lifecycle.on_host_detached();
    }

    /// Evict in-flight records older than `max_age_ms`.
    pub fn sweep(&mut self, now: u64, max_age_ms: u64) -> usize {
        let evicted = self.correlator.evict_stale(now, max_age_ms);
        if evicted > 0 {
            debug!(evicted, remaining = self.correlator.len(), "evicted stale requests");
        }
        evicted
    }
}
