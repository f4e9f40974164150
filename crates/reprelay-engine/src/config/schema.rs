use crate::lifecycle::ALL_URLS;
use reprelay_common::protocol::PermissionSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub panel: PanelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9017
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_required_permission")]
    pub required_permission: String,
    #[serde(default = "default_origins")]
    pub origins: Vec<String>,
    /// Requests whose url starts with one of these are the relay's own traffic.
    #[serde(default = "default_self_origin_prefixes")]
    pub self_origin_prefixes: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            required_permission: default_required_permission(),
            origins: default_origins(),
            self_origin_prefixes: default_self_origin_prefixes(),
        }
    }
}

impl CaptureConfig {
    /// Scope of the check / request / remove operations a session asks for.
    pub fn session_scope(&self) -> PermissionSet {
        PermissionSet {
            permissions: vec![self.required_permission.clone()],
            origins: self.origins.clone(),
        }
    }

    /// Scope of the startup probe: the permission alone.
    pub fn probe_scope(&self) -> PermissionSet {
        PermissionSet {
            permissions: vec![self.required_permission.clone()],
            origins: Vec::new(),
        }
    }
}

fn default_required_permission() -> String {
    "webRequest".to_string()
}

fn default_origins() -> Vec<String> {
    vec![ALL_URLS.to_string()]
}

fn default_self_origin_prefixes() -> Vec<String> {
    vec![
        "moz-extension://".to_string(),
        "chrome-extension://".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_ms: default_interval_ms(),
            max_age_ms: default_max_age_ms(),
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_max_age_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,
    /// Whether merging starts enabled, before the first permission result arrives.
    #[serde(default)]
    pub multi_source: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            static_extensions: default_static_extensions(),
            multi_source: false,
        }
    }
}

fn default_static_extensions() -> Vec<String> {
    [
        ".css", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".woff", ".woff2",
        ".ttf", ".eot", ".otf", ".mp4", ".webm", ".mp3", ".wav", ".pdf",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}
