use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::transfer::ProtocolKind;
use tracing::warn;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Acquisition ceiling, retry budget and every target ceiling are at least 1
/// - Global and per-target quality bands are non-empty
/// - Target names are unique and remote targets name a host
///
/// Unknown protocol kinds are only warned about here; items routed to such a
/// target fail with a configuration error when their transfer starts.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.engine.acquisition_ceiling == 0 {
        return Err(ConfigError::ValidationError(
            "engine.acquisition_ceiling must be at least 1".to_string(),
        ));
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.classifier.band().is_none() {
        return Err(ConfigError::ValidationError(format!(
            "classifier quality band is empty: {} > {}",
            config.classifier.min_quality, config.classifier.max_quality
        )));
    }

    let mut names = HashSet::new();
    for target in &config.targets {
        if target.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "target name cannot be empty".to_string(),
            ));
        }
        if !names.insert(target.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate target name: {}",
                target.name
            )));
        }
        if target.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(format!(
                "target {}: max_concurrent must be at least 1",
                target.name
            )));
        }
        if target.quality_band().is_none() {
            return Err(ConfigError::ValidationError(format!(
                "target {}: quality band is empty: {} > {}",
                target.name, target.min_quality, target.max_quality
            )));
        }

        match ProtocolKind::from_name(&target.protocol) {
            Some(kind) if kind.is_remote() && target.host.is_none() => {
                return Err(ConfigError::ValidationError(format!(
                    "target {}: protocol {} requires a host",
                    target.name, kind
                )));
            }
            Some(ProtocolKind::Smb) if target.share.is_none() => {
                return Err(ConfigError::ValidationError(format!(
                    "target {}: smb requires a share",
                    target.name
                )));
            }
            Some(_) => {}
            None => warn!(
                "Target {} uses unknown protocol {:?}; its transfers will fail",
                target.name, target.protocol
            ),
        }
    }

    Ok(())
}
