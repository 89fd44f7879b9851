//! Core configuration types
//!
//! This module defines the data structures that represent a kite.yml configuration file.

use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use crate::scope::{Value, ValueMap};

/// Top-level configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Application name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Application usage description (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Global interpreter to use for commands (e.g., ["sh", "-c"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    /// Jobs defined in the configuration, in file order
    #[serde(default)]
    pub jobs: IndexMap<String, JobConfig>,

    /// Every other top-level key, available to jobs as `config.<key>`
    #[serde(flatten)]
    pub variables: IndexMap<String, serde_yaml::Value>,
}

impl Config {
    /// Top-level variables converted to a map value
    pub fn variables_value(&self) -> Value {
        Value::Map(to_value_map(&self.variables))
    }

    /// Jobs shown on the command line
    pub fn public_jobs(&self) -> impl Iterator<Item = (&String, &JobConfig)> {
        self.jobs.iter().filter(|(_, job)| !job.private)
    }
}

/// A job definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobConfig {
    /// Description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether this job is private (hidden from the command line)
    #[serde(default)]
    pub private: bool,

    /// Include another file as job definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,

    /// Positional arguments for the job
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, ArgumentConfig>,

    /// Named options (flags) for the job
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, OptionConfig>,

    /// Task body (`tasks`, `task`, `workflow`, `script`) and job variables
    #[serde(flatten)]
    pub body: IndexMap<String, serde_yaml::Value>,
}

impl JobConfig {
    /// Body and variables converted to values, in file order
    pub fn body_values(&self) -> ValueMap {
        to_value_map(&self.body)
    }
}

/// An argument (positional parameter) definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArgumentConfig {
    /// Description for help text
    #[serde(default, alias = "usage", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Argument type (`string`, or `array` to take several values)
    #[serde(rename = "type", default = "default_type")]
    pub arg_type: String,

    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_yaml::Value>,

    /// Required argument
    #[serde(default)]
    pub required: bool,
}

/// An option (flag) definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptionConfig {
    /// Description for help text
    #[serde(default, alias = "usage", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Short flag (single character)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    /// Option type (string, bool, int, float, array)
    #[serde(rename = "type", default = "default_type")]
    pub option_type: String,

    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_yaml::Value>,

    /// Required option
    #[serde(default)]
    pub required: bool,
}

fn default_type() -> String {
    "string".to_string()
}

fn to_value_map(values: &IndexMap<String, serde_yaml::Value>) -> ValueMap {
    values
        .iter()
        .map(|(key, value)| (key.clone(), Value::from(value.clone())))
        .collect()
}
