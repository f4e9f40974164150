//! Seams to the host platform: its network event bus and its permission API.

use async_trait::async_trait;
use reprelay_common::error::CapabilityError;
use reprelay_common::protocol::{CapabilityOp, PermissionSet, PhaseListener, RequestFilter};

/// The host's network event bus.
///
/// Registration is fire-and-forget: phase events come back to the relay as
/// [`HostMessage`](reprelay_common::protocol::HostMessage)s.
pub trait HostEventBus: Send {
    /// Whether the host exposes the network event API at all.
    fn is_available(&self) -> bool;

    fn add_listeners(&mut self, filter: &RequestFilter, phases: &[PhaseListener]);

    fn remove_listeners(&mut self);
}

/// The host's permission API.
///
/// Each call may wait on a user decision, so callers must not hold relay
/// state across the await.
#[async_trait]
pub trait Capabilities: Send + Sync {
    async fn contains(&self, scope: &PermissionSet) -> Result<bool, CapabilityError>;

    async fn request(&self, scope: &PermissionSet) -> Result<bool, CapabilityError>;

    async fn remove(&self, scope: &PermissionSet) -> Result<bool, CapabilityError>;

    async fn run(&self, op: CapabilityOp, scope: &PermissionSet) -> Result<bool, CapabilityError> {
        match op {
            CapabilityOp::Contains => self.contains(scope).await,
            CapabilityOp::Request => self.request(scope).await,
            CapabilityOp::Remove => self.remove(scope).await,
        }
    }
}
