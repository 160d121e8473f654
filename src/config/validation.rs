//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::schema::{AppConfig, ListenerConfig, ShutdownConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("shutdown timeout must be a finite number, got {0}")]
    NonFiniteTimeout(f64),
    #[error("shutdown timeout must be greater than zero, got {0}")]
    NonPositiveTimeout(f64),
    #[error("listener {index}: invalid bind address {address:?}")]
    BindAddress { index: usize, address: String },
    #[error("listener {index}: max_connections must be greater than zero")]
    ZeroConnections { index: usize },
    #[error("no listeners configured")]
    NoListeners,
}

/// Turn the configured shutdown timeout into a `Duration`.
///
/// Any finite positive value is accepted. Values beyond `Duration::MAX` saturate, and values
/// below one nanosecond round up to it.
pub fn validate_shutdown(config: &ShutdownConfig) -> Result<Duration, ValidationError> {
    let ms = config.timeout_ms;
    if !ms.is_finite() {
        return Err(ValidationError::NonFiniteTimeout(ms));
    }
    if ms <= 0.0 {
        return Err(ValidationError::NonPositiveTimeout(ms));
    }
    let timeout = Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX);
    Ok(timeout.max(Duration::from_nanos(1)))
}

fn validate_listener(index: usize, config: &ListenerConfig, errors: &mut Vec<ValidationError>) {
    if config.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress {
            index,
            address: config.bind_address.clone(),
        });
    }
    if config.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections { index });
    }
}

/// Validate a whole configuration, collecting every problem.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }
    for (index, listener) in config.listeners.iter().enumerate() {
        validate_listener(index, listener, &mut errors);
    }
    if let Err(e) = validate_shutdown(&config.shutdown) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_timeouts_are_accepted() {
        for ms in [0.001, 1.0, 100.0, 10_000.0, 1e9] {
            let duration = validate_shutdown(&ShutdownConfig::with_timeout_ms(ms)).unwrap();
            assert!(duration > Duration::ZERO, "{ms} should map to a positive duration");
        }
        assert_eq!(
            validate_shutdown(&ShutdownConfig::default()).unwrap(),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn huge_timeouts_saturate() {
        for ms in [1e30, f64::MAX] {
            assert_eq!(
                validate_shutdown(&ShutdownConfig::with_timeout_ms(ms)).unwrap(),
                Duration::MAX,
                "{ms} should saturate"
            );
        }
    }

    #[test]
    fn tiny_timeouts_stay_positive() {
        for ms in [1e-310, f64::MIN_POSITIVE, 1e-9] {
            assert_eq!(
                validate_shutdown(&ShutdownConfig::with_timeout_ms(ms)).unwrap(),
                Duration::from_nanos(1),
                "{ms} should round up to the smallest duration"
            );
        }
    }

    #[test]
    fn zero_and_negative_timeouts_are_rejected() {
        for ms in [0.0, -0.0, -10.0, f64::MIN] {
            assert!(matches!(
                validate_shutdown(&ShutdownConfig::with_timeout_ms(ms)),
                Err(ValidationError::NonPositiveTimeout(_))
            ));
        }
    }

    #[test]
    fn nan_and_infinite_timeouts_are_rejected() {
        for ms in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                validate_shutdown(&ShutdownConfig::with_timeout_ms(ms)),
                Err(ValidationError::NonFiniteTimeout(_))
            ));
        }
    }

    #[test]
    fn collects_every_error() {
        let mut config = AppConfig::default();
        config.listeners[0].bind_address = "nope".into();
        config.listeners[0].max_connections = 0;
        config.shutdown.timeout_ms = -1.0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }
}
