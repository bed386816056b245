//! Tracing subscriber setup

use clientkey_common::error::{CommonError, CommonResult};
use clientkey_domain::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns `false` when a
/// global subscriber was already installed, which leaves that one in place.
///
/// # Errors
///
/// Returns a config error if neither `RUST_LOG` nor `config.filter` is a valid
/// filter directive.
pub fn init_tracing(config: &LoggingConfig) -> CommonResult<bool> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
            .is_ok()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init().is_ok()
    };

    if installed {
        tracing::debug!(json = config.json, "Tracing initialized");
    }
    Ok(installed)
}

fn build_filter(config: &LoggingConfig) -> CommonResult<EnvFilter> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.filter).map_err(|e| {
            CommonError::config_field("logging.filter", format!("invalid filter {:?}: {e}", config.filter))
        })
    })
}
