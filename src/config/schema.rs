//! Configuration validation
//!
//! This module provides validation logic for configuration files.

use crate::config::types::{Config, JobConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::job::dashed;
use crate::runner::BODY_KEYS;
use crate::scope::TypeTag;
use std::collections::HashSet;

/// Validate a complete configuration
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    if matches!(&config.interpreter, Some(interpreter) if interpreter.is_empty()) {
        return Err(ConfigError::Invalid(
            "interpreter must name at least one program".to_string(),
        ));
    }

    for (name, job) in &config.jobs {
        if name.trim().is_empty() {
            return Err(ConfigError::Invalid("Job names must not be empty".to_string()));
        }
        validate_job(name, job)?;
    }

    Ok(())
}

/// Validate a single job
pub fn validate_job(name: &str, job: &JobConfig) -> ConfigResult<()> {
    // Only one of the body keys may build the children; with a workflow the
    // remaining keys are handed to the workflow instead
    let body: Vec<&str> = BODY_KEYS
        .iter()
        .copied()
        .filter(|key| *key != "workflow" && job.body.contains_key(*key))
        .collect();
    if body.len() > 1 {
        return Err(ConfigError::ExclusiveTaskKeys(body.join(" and ")));
    }

    // Arguments and options share one namespace on the command line
    let mut names = HashSet::new();
    for variable in job.arguments.keys().chain(job.options.keys()) {
        if !names.insert(dashed(variable)) {
            return Err(ConfigError::DuplicateDefinition(variable.clone()));
        }
    }

    for (argument, config) in &job.arguments {
        validate_type(name, argument, &config.arg_type)?;
    }
    for (option, config) in &job.options {
        validate_type(name, option, &config.option_type)?;
        if let Some(short) = &config.short {
            if short.chars().count() != 1 {
                return Err(ConfigError::Invalid(format!(
                    "Short flag of option '{}' in job '{}' must be a single character, got '{}'",
                    option, name, short
                )));
            }
        }
    }

    Ok(())
}

/// Validate a declared variable type such as `string` or `bool|array`
fn validate_type(job: &str, variable: &str, types: &str) -> ConfigResult<()> {
    types
        .parse::<TypeTag>()
        .map(|_| ())
        .map_err(|error| ConfigError::Invalid(format!("{} (variable '{}' of job '{}')", error, variable, job)))
}
