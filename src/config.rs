use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::TaskPriority;

#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            logging: LoggingConfig::from_vars(|key| std::env::var(key).ok()),
            engine: EngineConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown log rotation {other}")),
        }
    }
}

/// Rolling file sink; absent when `ENABLE_FILE_LOGS` is off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLogConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info,mastery_engine=debug`.
    pub level: String,
    pub file: Option<FileLogConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Reads `RUST_LOG`, `ENABLE_FILE_LOGS`, `LOG_DIR`, `LOG_FILE_PREFIX` and `LOG_ROTATION`
    /// through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = lookup("RUST_LOG")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        let enabled = lookup("ENABLE_FILE_LOGS")
            .map(|value| matches!(value.trim(), "true" | "1"))
            .unwrap_or(false);
        let file = enabled.then(|| FileLogConfig {
            dir: lookup("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
            prefix: lookup("LOG_FILE_PREFIX").unwrap_or_else(|| "mastery-engine.log".to_string()),
            rotation: lookup("LOG_ROTATION")
                .and_then(|value| value.parse().ok())
                .unwrap_or(LogRotation::Daily),
        });

        Self { level, file }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMinutes {
    pub critical: u32,
    pub core: u32,
    pub plus: u32,
}

impl TaskMinutes {
    pub fn for_priority(&self, priority: TaskPriority) -> u32 {
        match priority {
            TaskPriority::Critical => self.critical,
            TaskPriority::Core => self.core,
            TaskPriority::Plus => self.plus,
        }
    }
}

impl Default for TaskMinutes {
    fn default() -> Self {
        Self {
            critical: 8,
            core: 5,
            plus: 3,
        }
    }
}

/// Tunable heuristics of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Weight ratio between consecutive history entries, newest weighted 1.
    pub decay_factor: f64,
    pub history_cap: usize,
    pub default_min_gap_days: i64,
    pub task_minutes: TaskMinutes,
    pub overdue_grace_days: i64,
    pub preview_horizon_days: i64,
    pub batch_chunk_size: usize,
    pub conflict_retries: u32,
    pub batch_warning_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.8,
            history_cap: 10,
            default_min_gap_days: 1,
            task_minutes: TaskMinutes::default(),
            overdue_grace_days: 3,
            preview_horizon_days: 2,
            batch_chunk_size: 50,
            conflict_retries: 3,
            batch_warning_size: 1000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let decay_factor = env_parse::<f64>("MASTERY_DECAY_FACTOR")
            .filter(|value| *value > 0.0 && *value <= 1.0)
            .unwrap_or(defaults.decay_factor);
        let history_cap = env_parse::<usize>("MASTERY_HISTORY_CAP")
            .filter(|value| *value > 0)
            .unwrap_or(defaults.history_cap);
        let default_min_gap_days = env_parse::<i64>("MASTERY_MIN_GAP_DAYS")
            .filter(|value| *value >= 0)
            .unwrap_or(defaults.default_min_gap_days);

        let task_minutes = TaskMinutes {
            critical: env_parse("TASK_MINUTES_CRITICAL")
                .unwrap_or(defaults.task_minutes.critical),
            core: env_parse("TASK_MINUTES_CORE").unwrap_or(defaults.task_minutes.core),
            plus: env_parse("TASK_MINUTES_PLUS").unwrap_or(defaults.task_minutes.plus),
        };

        let batch_chunk_size = env_parse::<usize>("BATCH_CHUNK_SIZE")
            .filter(|value| *value > 0)
            .unwrap_or(defaults.batch_chunk_size);
        let conflict_retries =
            env_parse("BATCH_CONFLICT_RETRIES").unwrap_or(defaults.conflict_retries);
        let preview_horizon_days = env_parse::<i64>("PREVIEW_HORIZON_DAYS")
            .filter(|value| *value >= 0)
            .unwrap_or(defaults.preview_horizon_days);

        Self {
            decay_factor,
            history_cap,
            default_min_gap_days,
            task_minutes,
            preview_horizon_days,
            batch_chunk_size,
            conflict_retries,
            ..defaults
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}
