//! # Structured Logging
//!
//! Installs the process-wide tracing subscriber. Library code only emits
//! events; the binary decides once, at startup, how they are rendered.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::{IntegrationError, Result};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// The service name attached to the startup event
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            service_name: "integration-coordinator".to_string(),
        }
    }
}

/// Initializes structured logging. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
            IntegrationError::configuration(format!("Invalid log level '{}': {}", config.level, e))
        })?;

    let format_layer = if config.json_format {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).boxed()
    };

    Registry::default()
        .with(filter)
        .with(format_layer)
        .try_init()
        .map_err(|e| IntegrationError::configuration(format!("Failed to set global subscriber: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}
