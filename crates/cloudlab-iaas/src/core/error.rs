//! Configuration errors.

use thiserror::Error;

/// Error raised when the simulation can not be constructed from the supplied configuration.
///
/// All configuration errors are fatal: the simulation is never started with an invalid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid utilization thresholds: expected 0 <= under ({under}) < over ({over}) <= 1")]
    Thresholds { under: f64, over: f64 },

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: String, value: f64 },

    #[error("unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    #[error("invalid option `{option}` of {name}: {reason}")]
    InvalidOption { name: String, option: String, reason: String },
}

pub(crate) fn ensure_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0. && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            name: name.to_string(),
            value,
        })
    }
}
