pub mod loader;
pub mod schema;

pub use loader::{ConfigError, ConfigLoader};
pub use schema::{CaptureConfig, PanelConfig, RelayConfig, ServerConfig, SweeperConfig};
