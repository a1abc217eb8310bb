use std::env;

use serde::Deserialize;

use crate::shared::datetime::time::TimeConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reduce: ReduceConfig,
    #[serde(default)]
    pub time: TimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub stdout_level: String,
    pub file_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            stdout_level: "info".to_string(),
            file_level: "debug".to_string(),
        }
    }
}

/// Limits and defaults applied by the reduction stages.
#[derive(Debug, Clone, Deserialize)]
pub struct ReduceConfig {
    /// Maximum number of entries kept by `list()` at final flush
    #[serde(default = "default_list_max_size")]
    pub list_max_size: usize,
    /// Records kept per combination when a dedup does not name a count
    #[serde(default = "default_dedup_limit")]
    pub dedup_default_limit: usize,
    #[serde(default = "default_max_bins")]
    pub bin_default_max_bins: u64,
    #[serde(default = "default_head_rows")]
    pub head_default_rows: usize,
    #[serde(default = "default_tail_rows")]
    pub tail_default_rows: usize,
    #[serde(default = "default_sort_limit")]
    pub sort_default_limit: usize,
    /// Field holding the event time in epoch milliseconds
    #[serde(default = "default_time_field")]
    pub time_field: String,
}

fn default_list_max_size() -> usize {
    100
}

fn default_dedup_limit() -> usize {
    1
}

fn default_max_bins() -> u64 {
    100
}

fn default_head_rows() -> usize {
    10
}

fn default_tail_rows() -> usize {
    10
}

fn default_sort_limit() -> usize {
    10_000
}

fn default_time_field() -> String {
    "timestamp".to_string()
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            list_max_size: default_list_max_size(),
            dedup_default_limit: default_dedup_limit(),
            bin_default_max_bins: default_max_bins(),
            head_default_rows: default_head_rows(),
            tail_default_rows: default_tail_rows(),
            sort_default_limit: default_sort_limit(),
            time_field: default_time_field(),
        }
    }
}


/// Reads `$SNEL_REDUCE_CONFIG` (default `config.*`, optional) and then
/// `SNEL_REDUCE__SECTION__KEY` environment overrides.
pub fn load_settings() -> Result<Settings, config::ConfigError> {
    let config_path = env::var("SNEL_REDUCE_CONFIG").unwrap_or_else(|_| "config".to_string());

    let settings: Settings = config::Config::builder()
        .add_source(config::File::with_name(&config_path).required(false))
        .add_source(config::Environment::with_prefix("SNEL_REDUCE").separator("__"))
        .build()?
        .try_deserialize()?;

    Ok(settings)
}
