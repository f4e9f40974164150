use reprelay_engine::protocol::{HttpHeader, RequestRecord};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::warn;

/// A captured request in the HAR-like shape the panel's log stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub request: EntryRequest,
    pub response: EntryResponse,
    pub captured_at: u64,
    pub from_other_tab: bool,
    pub page_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<HttpHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostData {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<HttpHeader>,
    pub content: ResponseContent,
}

/// Response bodies of relayed requests are never available, so `text` stays empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContent {
    pub mime_type: String,
    pub text: String,
}

impl LogEntry {
    /// Convert a record relayed from another tab.
    pub fn from_other_tab(record: RequestRecord) -> Self {
        let response_headers = record.response_headers.unwrap_or_default();
        let mime_type = response_headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .and_then(|h| h.value.clone())
            .unwrap_or_default();
        let page_url = record.initiator.unwrap_or_else(|| record.url.clone());

        LogEntry {
            request: EntryRequest {
                method: record.method,
                url: record.url,
                headers: record.request_headers.unwrap_or_default(),
                post_data: record.request_body.map(|text| PostData { text }),
            },
            response: EntryResponse {
                status: record.status_code.unwrap_or_default(),
                status_text: record.status_line.unwrap_or_default(),
                headers: response_headers,
                content: ResponseContent {
                    mime_type,
                    text: String::new(),
                },
            },
            captured_at: record.time_stamp,
            from_other_tab: true,
            page_url,
        }
    }
}

/// Where accepted entries are stored.
pub trait RequestLog {
    /// Append `entry` and return its index in the log.
    fn add_request(&mut self, entry: LogEntry) -> usize;
}

/// Shows an entry once it has been stored.
pub trait RequestRenderer {
    fn render_request_item(&mut self, entry: &LogEntry, index: usize);
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Vec<LogEntry>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

impl RequestLog for MemoryLog {
    fn add_request(&mut self, entry: LogEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }
}

/// Writes one line per entry.
pub struct ConsoleRenderer<W> {
    out: W,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl ConsoleRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> RequestRenderer for ConsoleRenderer<W> {
    fn render_request_item(&mut self, entry: &LogEntry, index: usize) {
        let written = writeln!(
            self.out,
            "#{:<4} {:<7} {:<3} {}  [from {}]",
            index,
            entry.request.method,
            entry.response.status,
            entry.request.url,
            entry.page_url
        );
        if let Err(e) = written {
            warn!(index, "failed to render request: {}", e);
        }
    }
}
