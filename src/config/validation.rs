use super::models::Config;
use std::path::{Component, Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("Output directory must not be empty")]
    EmptyOutputDirectory,

    #[error("Staging directory '{0}' must be a single relative path component")]
    InvalidStagingDir(String),

    #[error("Options for plugin '{0}' must be a table")]
    InvalidPluginOptions(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_workers(config)?;
    validate_output(config)?;
    validate_plugins(config)?;
    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    if config.workers.max_workers == 0 {
        return Err(ValidationError::NoWorkers);
    }

    Ok(())
}

/// The staging directory lives inside the output directory and must not escape it
fn validate_output(config: &Config) -> Result<(), ValidationError> {
    if config.output.directory.as_os_str().is_empty() {
        return Err(ValidationError::EmptyOutputDirectory);
    }

    let staging = &config.output.staging_dir;
    let mut components = Path::new(staging).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ValidationError::InvalidStagingDir(staging.clone())),
    }
}

fn validate_plugins(config: &Config) -> Result<(), ValidationError> {
    for (name, options) in &config.plugins {
        if !options.is_object() {
            return Err(ValidationError::InvalidPluginOptions(name.clone()));
        }
    }

    Ok(())
}
