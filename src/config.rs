//! Configuration module for resp-loadgen.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over the built-in defaults of the reference run.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the benchmark
#[derive(Parser, Debug, Default)]
#[command(name = "resp-loadgen")]
#[command(author = "resp-loadgen authors")]
#[command(version = "0.1.0")]
#[command(about = "Measures SET/GET throughput of a RESP key-value server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Target port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Total number of SET/GET transactions to issue
    #[arg(short = 'n', long)]
    pub total: Option<usize>,

    /// Number of concurrent workers, one connection each
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Success threshold in transactions per second
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Size of the per-read response buffer in bytes
    #[arg(long)]
    pub response_buffer: Option<usize>,

    /// Per-worker time budget in seconds (0 = unlimited)
    #[arg(long)]
    pub worker_timeout: Option<u64>,

    /// Overall run deadline in seconds (0 = unlimited)
    #[arg(long)]
    pub run_deadline: Option<u64>,

    /// Spread `total % workers` over the first workers instead of dropping it
    #[arg(long)]
    pub distribute_remainder: bool,

    /// Start the built-in mock target and benchmark it
    #[arg(long)]
    pub mock: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the server under test lives
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Workload shape and pass/fail criteria
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_total_transactions")]
    pub total_transactions: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
    /// Seconds, 0 disables
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout: u64,
    /// Seconds, 0 disables
    #[serde(default = "default_run_deadline")]
    pub run_deadline: u64,
    #[serde(default)]
    pub distribute_remainder: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_transactions: default_total_transactions(),
            workers: default_workers(),
            threshold: default_threshold(),
            response_buffer: default_response_buffer(),
            worker_timeout: default_worker_timeout(),
            run_deadline: default_run_deadline(),
            distribute_remainder: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_total_transactions() -> usize {
    100_000
}

fn default_workers() -> usize {
    10
}

fn default_threshold() -> f64 {
    50_000.0 // ops/sec
}

fn default_response_buffer() -> usize {
    1024
}

fn default_worker_timeout() -> u64 {
    60
}

fn default_run_deadline() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub total_transactions: usize,
    pub workers: usize,
    pub threshold: f64,
    pub response_buffer: usize,
    pub worker_timeout: Option<Duration>,
    pub run_deadline: Option<Duration>,
    pub distribute_remainder: bool,
    pub mock: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(file.target.host),
            port: cli.port.unwrap_or(file.target.port),
            total_transactions: cli.total.unwrap_or(file.run.total_transactions),
            workers: cli.workers.unwrap_or(file.run.workers),
            threshold: cli.threshold.unwrap_or(file.run.threshold),
            response_buffer: cli.response_buffer.unwrap_or(file.run.response_buffer),
            worker_timeout: seconds(cli.worker_timeout.unwrap_or(file.run.worker_timeout)),
            run_deadline: seconds(cli.run_deadline.unwrap_or(file.run.run_deadline)),
            distribute_remainder: cli.distribute_remainder || file.run.distribute_remainder,
            mock: cli.mock,
            // clap's default is "info", so only a non-default CLI value wins
            log_level: if !cli.log_level.is_empty() && cli.log_level != "info" {
                cli.log_level
            } else {
                file.logging.level
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.response_buffer == 0 {
            return Err(ConfigError::Invalid(
                "response_buffer must be at least 1 byte".to_string(),
            ));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// `host:port` of the server under test
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target(), "localhost:6379");
        assert_eq!(config.total_transactions, 100_000);
        assert_eq!(config.workers, 10);
        assert_eq!(config.threshold, 50_000.0);
        assert_eq!(config.response_buffer, 1024);
        assert_eq!(config.worker_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.run_deadline, Some(Duration::from_secs(120)));
        assert!(!config.distribute_remainder);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [target]
            host = "10.0.0.5"
            port = 7000

            [run]
            total_transactions = 5000
            workers = 4
            threshold = 1000.5
            worker_timeout = 0
            distribute_remainder = true

            [logging]
            level = "debug"
        "#;

        let file: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(file.target.host, "10.0.0.5");
        assert_eq!(file.run.response_buffer, 1024);

        let config = Config::merge(CliArgs::default(), file);
        assert_eq!(config.target(), "10.0.0.5:7000");
        assert_eq!(config.total_transactions, 5000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.threshold, 1000.5);
        assert_eq!(config.worker_timeout, None);
        assert_eq!(config.run_deadline, Some(Duration::from_secs(120)));
        assert!(config.distribute_remainder);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str("[run]\nworkers = 4\ntotal_transactions = 10").unwrap();
        let cli = CliArgs::parse_from(["resp-loadgen", "-w", "2", "--port", "6380"]);

        let config = Config::merge(cli, file);
        assert_eq!(config.workers, 2);
        assert_eq!(config.port, 6380);
        assert_eq!(config.total_transactions, 10);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let cli = CliArgs::parse_from(["resp-loadgen", "--workers", "0"]);
        assert!(matches!(Config::from_args(cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let cli = CliArgs::parse_from(["resp-loadgen", "--threshold", "NaN"]);
        assert!(matches!(Config::from_args(cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["resp-loadgen", "-c", "/nonexistent/loadgen.toml"]);
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
