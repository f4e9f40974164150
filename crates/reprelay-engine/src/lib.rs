pub mod body;
pub mod config;
pub mod correlator;
pub mod host;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod sweeper;

pub use reprelay_common::error;
pub use reprelay_common::protocol;
