//! Merging requests relayed from other tabs into one panel's log.

use crate::log::{LogEntry, RequestLog, RequestRenderer};
use reprelay_engine::config::PanelConfig;
use reprelay_engine::protocol::{PermissionOp, RelayMessage, RequestRecord, SessionRequest};
use tracing::{debug, info, trace};

/// Per-panel state: which tab the panel inspects and whether requests from
/// other tabs are being merged in.
pub struct CrossSessionMerge<L, R> {
    inspected_tab_id: i64,
    multi_source: bool,
    static_extensions: Vec<String>,
    log: L,
    renderer: R,
}

impl<L: RequestLog, R: RequestRenderer> CrossSessionMerge<L, R> {
    pub fn new(inspected_tab_id: i64, config: &PanelConfig, log: L, renderer: R) -> Self {
        Self {
            inspected_tab_id,
            multi_source: config.multi_source,
            static_extensions: config
                .static_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            log,
            renderer,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.multi_source
    }

    pub fn inspected_tab_id(&self) -> i64 {
        self.inspected_tab_id
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Sent once when the panel starts.
    pub fn initial_message(&self) -> SessionRequest {
        SessionRequest::CheckPermissions
    }

    /// The request that flips multi-source mode.
    pub fn toggle_message(&self) -> SessionRequest {
        if self.multi_source {
            SessionRequest::RemovePermissions
        } else {
            SessionRequest::RequestPermissions
        }
    }

    /// Apply one message from the relay. Returns the log index when a
    /// captured request was appended.
    pub fn handle_message(&mut self, message: RelayMessage) -> Option<usize> {
        match message {
            RelayMessage::PermissionsResult { op, result, error } => {
                if let Some(error) = error {
                    debug!(?op, %error, "permission operation failed");
                }
                self.set_enabled(match op {
                    PermissionOp::Check | PermissionOp::Request => result,
                    PermissionOp::Remove => !result,
                });
                None
            }
            RelayMessage::CapturedRequest { data } => self.merge(data),
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.multi_source != enabled {
            info!(enabled, "multi-source capture toggled");
        }
        self.multi_source = enabled;
    }

    fn merge(&mut self, record: RequestRecord) -> Option<usize> {
        if !self.multi_source {
            return None;
        }
        if record.tab_id == self.inspected_tab_id {
            return None;
        }
        if is_static_asset(&record.url, &self.static_extensions) {
            trace!(url = %record.url, "skipping static asset");
            return None;
        }

        let entry = LogEntry::from_other_tab(record);
        let index = self.log.add_request(entry.clone());
        self.renderer.render_request_item(&entry, index);
        Some(index)
    }
}

/// Whether `url` names a static resource: it ends with one of `extensions`,
/// or one of them is directly followed by a query string.
pub fn is_static_asset(url: &str, extensions: &[String]) -> bool {
    let url = url.to_lowercase();
    extensions
        .iter()
        .any(|ext| url.ends_with(ext.as_str()) || url.contains(&format!("{}?", ext)))
}
