//! Request correlation: stitches host phase events into one record per transaction.

use crate::body::decode_request_body;
use reprelay_common::protocol::{
    CompletedDetails, ErrorDetails, HeadersSentDetails, RequestRecord, RequestStartedDetails,
};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-flight table keyed by the host's transaction id.
///
/// Every phase handler takes the number of live sessions: with nobody
/// listening the correlator builds no state, so a session that connects in
/// the middle of a transaction never sees it.
#[derive(Debug, Default)]
pub struct Correlator {
    in_flight: HashMap<String, RequestRecord>,
    self_origin_prefixes: Vec<String>,
}

impl Correlator {
    pub fn new(self_origin_prefixes: Vec<String>) -> Self {
        Self {
            in_flight: HashMap::new(),
            self_origin_prefixes,
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.in_flight.contains_key(request_id)
    }

    fn is_self_origin(&self, url: &str) -> bool {
        self.self_origin_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }

    pub fn on_request_started(&mut self, details: RequestStartedDetails, sessions: usize, now: u64) {
        if sessions == 0 {
            return;
        }
        if self.is_self_origin(&details.url) {
            trace!(url = %details.url, "skipping self-originated request");
            return;
        }

        let record = RequestRecord {
            request_body: decode_request_body(details.request_body.as_ref()),
            request_id: details.request_id,
            url: details.url,
            method: details.method,
            resource_type: details.resource_type,
            time_stamp: now,
            tab_id: details.tab_id,
            initiator: details.initiator,
            request_headers: None,
            status_code: None,
            status_line: None,
            response_headers: None,
        };
        trace!(request_id = %record.request_id, url = %record.url, "request started");
        self.in_flight.insert(record.request_id.clone(), record);
    }

    pub fn on_headers_sent(&mut self, details: HeadersSentDetails, sessions: usize) {
        if sessions == 0 {
            return;
        }
        match self.in_flight.get_mut(&details.request_id) {
            Some(record) => record.request_headers = details.request_headers,
            None => trace!(request_id = %details.request_id, "headers for unknown request"),
        }
    }

    /// Finish a transaction. Returns the completed record, which is no longer tracked.
    pub fn on_completed(&mut self, details: CompletedDetails, sessions: usize) -> Option<RequestRecord> {
        if sessions == 0 {
            return None;
        }
        let Some(mut record) = self.in_flight.remove(&details.request_id) else {
            trace!(request_id = %details.request_id, "completion for unknown request");
            return None;
        };
        record.status_code = Some(details.status_code);
        record.status_line = details.status_line;
        record.response_headers = details.response_headers;
        Some(record)
    }

    pub fn on_error_occurred(&mut self, details: ErrorDetails) {
        if self.in_flight.remove(&details.request_id).is_some() {
            debug!(
                request_id = %details.request_id,
                error = details.error.as_deref().unwrap_or(""),
                "discarding failed request"
            );
        }
    }

    /// Drop records created more than `max_age_ms` before `now`.
    pub fn evict_stale(&mut self, now: u64, max_age_ms: u64) -> usize {
        let before = self.in_flight.len();
        self.in_flight
            .retain(|_, record| now.saturating_sub(record.time_stamp) <= max_age_ms);
        before - self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprelay_common::protocol::{FormData, HttpHeader, RequestBody};

    fn started(id: &str, url: &str) -> RequestStartedDetails {
        RequestStartedDetails {
            request_id: id.into(),
            url: url.into(),
            method: "POST".into(),
            resource_type: "xmlhttprequest".into(),
            tab_id: 4,
            initiator: Some("https://app.example.com".into()),
            request_body: Some(RequestBody {
                form_data: Some(FormData(vec![("a".into(), vec!["1".into()])])),
                ..Default::default()
            }),
        }
    }

    fn completed(id: &str) -> CompletedDetails {
        CompletedDetails {
            request_id: id.into(),
            status_code: 200,
            status_line: Some("HTTP/1.1 200 OK".into()),
            response_headers: Some(vec![HttpHeader::new("content-type", "text/plain")]),
        }
    }

    fn correlator() -> Correlator {
        Correlator::new(vec!["moz-extension://".into()])
    }

    #[test]
    fn full_lifecycle_emits_once() {
        let mut c = correlator();
        c.on_request_started(started("1", "https://example.com/api"), 1, 1_000);
        c.on_headers_sent(
            HeadersSentDetails {
                request_id: "1".into(),
                request_headers: Some(vec![HttpHeader::new("accept", "*/*")]),
            },
            1,
        );

        let record = c.on_completed(completed("1"), 1).expect("record emitted");
        assert_eq!(record.request_body.as_deref(), Some("a=1"));
        assert_eq!(record.time_stamp, 1_000);
        assert_eq!(record.status_code, Some(200));
        assert_eq!(record.request_headers.as_ref().map(Vec::len), Some(1));
        assert!(c.is_empty());

        assert!(c.on_completed(completed("1"), 1).is_none());
    }

    #[test]
    fn no_sessions_builds_no_state() {
        let mut c = correlator();
        c.on_request_started(started("1", "https://example.com/api"), 0, 1_000);
        assert!(c.is_empty());

        // a session connects mid-transaction
        assert!(c.on_completed(completed("1"), 1).is_none());
    }

    #[test]
    fn self_origin_is_ignored() {
        let mut c = correlator();
        c.on_request_started(started("1", "moz-extension://abc/panel.html"), 1, 0);
        assert!(c.is_empty());
    }

    #[test]
    fn missing_headers_phase_is_tolerated() {
        let mut c = correlator();
        c.on_request_started(started("1", "https://example.com/"), 2, 0);
        let record = c.on_completed(completed("1"), 2).unwrap();
        assert!(record.request_headers.is_none());
    }

    #[test]
    fn error_discards_record() {
        let mut c = correlator();
        c.on_request_started(started("1", "https://example.com/"), 1, 0);
        c.on_error_occurred(ErrorDetails {
            request_id: "1".into(),
            error: Some("net::ERR_ABORTED".into()),
        });
        assert!(c.is_empty());
        assert!(c.on_completed(completed("1"), 1).is_none());
    }

    #[test]
    fn restart_overwrites_stale_record() {
        let mut c = correlator();
        c.on_request_started(started("1", "https://example.com/old"), 1, 0);
        c.on_request_started(started("1", "https://example.com/new"), 1, 5);
        assert_eq!(c.len(), 1);
        let record = c.on_completed(completed("1"), 1).unwrap();
        assert_eq!(record.url, "https://example.com/new");
    }

    #[test]
    fn evicts_only_records_past_max_age() {
        let mut c = correlator();
        c.on_request_started(started("old", "https://example.com/a"), 1, 0);
        c.on_request_started(started("young", "https://example.com/b"), 1, 30_000);

        let evicted = c.evict_stale(60_001, 60_000);
        assert_eq!(evicted, 1);
        assert!(!c.contains("old"));
        assert!(c.contains("young"));
    }
}
