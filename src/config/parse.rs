//! Configuration file parsing and discovery

use crate::config::types::{Config, JobConfig};
use crate::error::{ConfigError, ConfigResult, KiteError};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["kite.yml", "kite.yaml"];

/// Find the configuration file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    find_config_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> Result<Config, KiteError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e)))?;

    parse_config(&contents, Some(path))
}

/// Parse configuration from a string
pub fn parse_config(yaml: &str, config_path: Option<&Path>) -> Result<Config, KiteError> {
    let mut config: Config = serde_yaml::from_str(yaml)?;

    if let Some(base_path) = config_path {
        process_includes(&mut config, base_path)?;
    }

    Ok(config)
}

/// Replace jobs carrying `include` with the job defined in the included file
fn process_includes(config: &mut Config, config_path: &Path) -> Result<(), KiteError> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    for (name, job) in config.jobs.iter_mut() {
        let Some(include_path) = job.include.clone() else {
            continue;
        };
        tracing::debug!(job = %name, include = %include_path, "including job definition");
        let mut included = load_included_job(&base_dir.join(&include_path))?;

        // Settings on the including entry win over the file
        included.private |= job.private;
        if job.description.is_some() {
            included.description = job.description.clone();
        }
        included.include = None;
        *job = included;
    }

    Ok(())
}

/// Load a job from an included file
fn load_included_job(path: &Path) -> Result<JobConfig, KiteError> {
    let include_error = |error: String| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error,
    };

    let contents = fs::read_to_string(path).map_err(|e| include_error(e.to_string()))?;
    let job: JobConfig = serde_yaml::from_str(&contents).map_err(|e| include_error(e.to_string()))?;

    Ok(job)
}

/// Parse configuration with automatic file discovery
pub fn parse_config_auto() -> Result<(Config, PathBuf), KiteError> {
    let config_path = find_config_file()?;
    let config = parse_config_file(&config_path)?;
    Ok((config, config_path))
}
