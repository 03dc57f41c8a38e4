/// TOML configuration (`quarry.toml`) and the live config manager.
pub mod toml_config;

pub use toml_config::{ConfigError, ConfigManager, QuarryConfig};
