//! Viewer side of the relay: a control-channel client plus the logic that
//! merges other tabs' traffic into a panel's request log.

pub mod client;
pub mod log;
pub mod merge;

pub use client::{ClientError, PanelClient, PanelControl};
pub use log::{ConsoleRenderer, LogEntry, MemoryLog, RequestLog, RequestRenderer};
pub use merge::CrossSessionMerge;
