// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{EngineError, Result};
use crate::exec::Elevation;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_allowed_commands(cfg)?;
    validate_elevation(cfg)?;
    validate_jobs(cfg)?;
    Ok(())
}

fn validate_allowed_commands(cfg: &RawConfigFile) -> Result<()> {
    for cmd in cfg.allowed_commands.iter() {
        if !cmd.starts_with('/') {
            return Err(EngineError::Config(format!(
                "allowed_commands entry '{}' must be an absolute path",
                cmd
            )));
        }
    }
    Ok(())
}

fn validate_elevation(cfg: &RawConfigFile) -> Result<()> {
    if let Elevation::Sudo { program, .. } = &cfg.elevation {
        if program.trim().is_empty() {
            return Err(EngineError::Config(
                "[elevation].program must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.jobs.sweep_interval_seconds == 0 {
        return Err(EngineError::Config(
            "[jobs].sweep_interval_seconds must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.jobs.subscriber_capacity == 0 {
        return Err(EngineError::Config(
            "[jobs].subscriber_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
