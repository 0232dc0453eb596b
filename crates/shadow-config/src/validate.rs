//! Validation helpers for configuration documents.

use crate::defaults::{
    BROADCAST_INTERVAL_RANGE_MS, MAX_CONNECTIONS_RANGE, MAX_GRACE_PERIOD_MS, MAX_RATE_LIMIT_KIB,
    PERSIST_INTERVAL_RANGE_MS,
};
use crate::error::{ConfigError, ConfigResult};
use crate::model::SessionConfig;

/// Check every field of `config` against its accepted range.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate_config(config: &SessionConfig) -> ConfigResult<()> {
    if config.download_path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidField {
            section: "engine",
            field: "download_path",
            value: None,
            reason: "must not be empty",
        });
    }

    ensure_range(
        "engine",
        "max_connections",
        config.max_connections,
        MAX_CONNECTIONS_RANGE,
    )?;
    ensure_range(
        "engine",
        "upload_limit_kib",
        config.upload_limit_kib,
        (0, MAX_RATE_LIMIT_KIB),
    )?;
    ensure_range(
        "engine",
        "download_limit_kib",
        config.download_limit_kib,
        (0, MAX_RATE_LIMIT_KIB),
    )?;
    ensure_range(
        "tuning",
        "grace_period_ms",
        config.tuning.grace_period_ms,
        (0, MAX_GRACE_PERIOD_MS),
    )?;
    ensure_range(
        "tuning",
        "broadcast_interval_ms",
        config.tuning.broadcast_interval_ms,
        BROADCAST_INTERVAL_RANGE_MS,
    )?;
    ensure_range(
        "tuning",
        "persist_interval_ms",
        config.tuning.persist_interval_ms,
        PERSIST_INTERVAL_RANGE_MS,
    )
}

fn ensure_range<T>(
    section: &'static str,
    field: &'static str,
    value: T,
    (min, max): (T, T),
) -> ConfigResult<()>
where
    T: PartialOrd + ToString,
{
    if value < min || value > max {
        return Err(ConfigError::invalid(
            section,
            field,
            value,
            "out of accepted range",
        ));
    }
    Ok(())
}
