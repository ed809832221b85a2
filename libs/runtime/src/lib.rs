//! Process-level runtime support for Plinth servers: layered configuration
//! and tracing/logging initialization.

pub mod config;
pub mod logging;
pub mod paths;

pub use config::{
    default_logging_config, AppConfig, AppConfigProvider, CliArgs, LoggingConfig, Section,
    ServerConfig,
};
pub use logging::init_logging_from_config;
