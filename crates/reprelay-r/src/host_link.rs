//! The relay's side of the connection to the browser shim.
//!
//! One [`HostLink`] stands in for the host platform: it forwards listener
//! registration as [`HostCommand`]s and turns capability operations into
//! request/reply exchanges matched by id.

use async_trait::async_trait;
use reprelay_engine::error::CapabilityError;
use reprelay_engine::host::{Capabilities, HostEventBus};
use reprelay_engine::protocol::{
    CapabilityOp, HostCommand, PermissionSet, PhaseListener, RequestFilter,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<bool, CapabilityError>>;

#[derive(Default)]
struct LinkState {
    outbound: Option<mpsc::UnboundedSender<HostCommand>>,
    generation: u64,
    pending: HashMap<u64, Reply>,
}

/// Outcome of [`HostLink::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    /// Pass back to [`HostLink::detach`].
    pub generation: u64,
    /// A live shim was displaced; its listener registrations are gone.
    pub replaced: bool,
}

#[derive(Clone, Default)]
pub struct HostLink {
    state: Arc<Mutex<LinkState>>,
    next_id: Arc<AtomicU64>,
}

impl HostLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_attached(&self) -> bool {
        self.lock().outbound.is_some()
    }

    /// Route host commands to a newly connected shim, replacing any previous
    /// one. Capability operations still waiting on the replaced shim fail.
    pub fn attach(&self, outbound: mpsc::UnboundedSender<HostCommand>) -> Attachment {
        let mut state = self.lock();
        let replaced = state.outbound.replace(outbound).is_some();
        if replaced {
            let dropped = state.pending.len();
            state.pending.clear();
            warn!(dropped_replies = dropped, "host link replaced by a new connection");
        }
        state.generation += 1;
        info!(generation = state.generation, replaced, "host link attached");
        Attachment {
            generation: state.generation,
            replaced,
        }
    }

    /// Forget the shim attached as `generation`; outstanding capability
    /// operations fail. Returns `false` if a newer shim has since attached.
    pub fn detach(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.outbound = None;
        let dropped = state.pending.len();
        state.pending.clear();
        info!(generation, dropped_replies = dropped, "host link detached");
        true
    }

    /// Complete the capability operation `id` with the host's answer.
    pub fn resolve(&self, id: u64, result: Option<bool>, error: Option<String>) {
        let Some(reply) = self.lock().pending.remove(&id) else {
            debug!(id, "capability reply for unknown operation");
            return;
        };
        let outcome = match (result, error) {
            (_, Some(error)) => Err(CapabilityError::Host(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(CapabilityError::Host("empty reply".into())),
        };
        let _ = reply.send(outcome);
    }

    fn send(&self, command: HostCommand) -> bool {
        match &self.lock().outbound {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    async fn call(&self, op: CapabilityOp, scope: &PermissionSet) -> Result<bool, CapabilityError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            let Some(outbound) = state.outbound.clone() else {
                return Err(CapabilityError::HostUnavailable);
            };
            state.pending.insert(id, tx);
            let command = HostCommand::Capability {
                id,
                op,
                scope: scope.clone(),
            };
            if outbound.send(command).is_err() {
                state.pending.remove(&id);
                return Err(CapabilityError::HostUnavailable);
            }
        }
        rx.await.map_err(|_| CapabilityError::ReplyDropped)?
    }
}

impl HostEventBus for HostLink {
    fn is_available(&self) -> bool {
        self.is_attached()
    }

    fn add_listeners(&mut self, filter: &RequestFilter, phases: &[PhaseListener]) {
        let sent = self.send(HostCommand::AddListeners {
            filter: filter.clone(),
            phases: phases.to_vec(),
        });
        if !sent {
            warn!("failed to send listener registration to host");
        }
    }

    fn remove_listeners(&mut self) {
        if !self.send(HostCommand::RemoveListeners) {
            warn!("failed to send listener removal to host");
        }
    }
}

#[async_trait]
impl Capabilities for HostLink {
    async fn contains(&self, scope: &PermissionSet) -> Result<bool, CapabilityError> {
        self.call(CapabilityOp::Contains, scope).await
    }

    async fn request(&self, scope: &PermissionSet) -> Result<bool, CapabilityError> {
        self.call(CapabilityOp::Request, scope).await
    }

    async fn remove(&self, scope: &PermissionSet) -> Result<bool, CapabilityError> {
        self.call(CapabilityOp::Remove, scope).await
    }
}
