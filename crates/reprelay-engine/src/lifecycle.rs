//! Capability-gated registration of the host's network listeners.

use crate::host::HostEventBus;
use reprelay_common::protocol::{PermissionSet, Phase, PhaseListener, RequestFilter};
use tracing::{debug, info};

pub const ALL_URLS: &str = "<all_urls>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Inactive,
    Active,
}

/// Two-state machine deciding whether the host's event stream is observed.
///
/// Enter and exit actions are idempotent, so duplicate grant or revoke
/// notifications are harmless.
#[derive(Debug)]
pub struct ListenerLifecycle {
    state: ListenerState,
    required_permission: String,
    filter: RequestFilter,
    phases: Vec<PhaseListener>,
}

impl ListenerLifecycle {
    pub fn new(required_permission: impl Into<String>) -> Self {
        Self {
            state: ListenerState::Inactive,
            required_permission: required_permission.into(),
            filter: RequestFilter {
                urls: vec![ALL_URLS.to_string()],
            },
            phases: capture_phases(),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ListenerState::Active
    }

    pub fn required_permission(&self) -> &str {
        &self.required_permission
    }

    pub fn on_capability_added(&mut self, change: &PermissionSet, host: &mut dyn HostEventBus) {
        if change.includes(&self.required_permission) {
            info!(permission = %self.required_permission, "permission added");
            self.enter_active(host);
        }
    }

    pub fn on_capability_removed(&mut self, change: &PermissionSet, host: &mut dyn HostEventBus) {
        if change.includes(&self.required_permission) {
            info!(permission = %self.required_permission, "permission removed");
            self.enter_inactive(host);
        }
    }

    pub fn on_startup_probe(&mut self, granted: bool, host: &mut dyn HostEventBus) {
        if granted {
            self.enter_active(host);
        } else {
            debug!("startup probe: permission not granted");
        }
    }

    /// The host went away; its listeners went with it.
    pub fn on_host_detached(&mut self) {
        self.state = ListenerState::Inactive;
    }

    fn enter_active(&mut self, host: &mut dyn HostEventBus) {
        if self.state == ListenerState::Active || !host.is_available() {
            return;
        }
        host.add_listeners(&self.filter, &self.phases);
        self.state = ListenerState::Active;
        info!("network listeners registered");
    }

    fn enter_inactive(&mut self, host: &mut dyn HostEventBus) {
        if self.state == ListenerState::Inactive || !host.is_available() {
            return;
        }
        host.remove_listeners();
        self.state = ListenerState::Inactive;
        info!("network listeners removed");
    }
}

/// All four phases, each asking for the payload it needs.
fn capture_phases() -> Vec<PhaseListener> {
    fn listener(phase: Phase, extra: &[&str]) -> PhaseListener {
        PhaseListener {
            phase,
            extra_info_spec: extra.iter().map(|s| s.to_string()).collect(),
        }
    }
    vec![
        listener(Phase::BeforeRequest, &["requestBody"]),
        listener(Phase::BeforeSendHeaders, &["requestHeaders"]),
        listener(Phase::Completed, &["responseHeaders"]),
        listener(Phase::ErrorOccurred, &[]),
    ]
}
