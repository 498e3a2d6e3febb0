//! Timeplus Telemetry
//!
//! Log output for services built on the Timeplus SDK.

mod config;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use tracing_setup::init_tracing;

/// Initialize tracing for a service from the environment
pub fn init(service_name: &str) -> Result<TelemetryConfig, TelemetryError> {
    let mut config = TelemetryConfig::from_env();
    if std::env::var("SERVICE_NAME").is_err() {
        config.service_name = service_name.to_string();
    }
    init_tracing(&config)?;
    Ok(config)
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),
}
