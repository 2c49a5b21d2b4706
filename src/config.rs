//! Configuration module for the channel-pipe server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over the defaults of the selected service.

use crate::runtime::StageId;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Stock pipeline layouts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Delimiter-framed echo
    #[default]
    Echo,
    /// HTTP request echo
    Http,
    /// Logging probes only
    Demo,
}

impl ServiceType {
    pub fn default_port(&self) -> u16 {
        match self {
            ServiceType::Echo => 8007,
            ServiceType::Http => 555,
            ServiceType::Demo => 1111,
        }
    }

    /// Stage identifiers of the service, front to back.
    pub fn default_stages(&self) -> Vec<String> {
        let ids: &[&str] = match self {
            ServiceType::Echo => &["frame-decoder", "echo"],
            ServiceType::Http => &["http-codec", "http-compressor", "http-aggregator", "echo"],
            ServiceType::Demo => &[
                "probe-in:A",
                "probe-in:B",
                "probe-in:C:reply",
                "probe-out:A",
                "probe-out:B",
                "probe-out:C",
            ],
        };
        ids.iter().map(|s| s.to_string()).collect()
    }
}

/// Command-line arguments for the pipeline server
#[derive(Parser, Debug)]
#[command(name = "channel-pipe")]
#[command(author = "channel-pipe authors")]
#[command(version = "0.1.0")]
#[command(about = "A layered connection pipeline server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (defaults to the service's port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pipeline layout to serve
    #[arg(short, long, value_enum)]
    pub service: Option<ServiceType>,

    /// Frame delimiter; `\r`, `\n`, `\t` and `\\` escapes are understood
    #[arg(short, long)]
    pub delimiter: Option<String>,

    /// Maximum frame length in bytes, excluding the delimiter
    #[arg(long)]
    pub max_frame_length: Option<usize>,

    /// Maximum aggregated HTTP body size in bytes
    #[arg(long)]
    pub max_aggregate_bytes: Option<usize>,

    /// Stage identifier; repeat to build a custom pipeline
    #[arg(long = "stage")]
    pub stages: Vec<String>,

    /// Fail connections whose inbound units no stage consumes
    #[arg(long)]
    pub strict_routing: bool,

    /// Close echo connections after each reply
    #[arg(long)]
    pub close_after_reply: Option<bool>,

    /// gzip/deflate level (0-9)
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Maximum concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    pub port: Option<u16>,
    /// Pipeline layout
    pub service: Option<ServiceType>,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds (0 = never)
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            service: None,
            workers: None,
            max_connections: default_max_connections(),
            idle_timeout_secs: 0,
        }
    }
}

/// Pipeline-related configuration
#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Stage identifiers, front to back
    pub stages: Option<Vec<String>>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
    #[serde(default = "default_max_aggregate_bytes")]
    pub max_aggregate_bytes: usize,
    #[serde(default)]
    pub strict_routing: bool,
    #[serde(default = "default_close_after_reply")]
    pub close_after_reply: bool,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: None,
            delimiter: default_delimiter(),
            max_frame_length: default_max_frame_length(),
            max_aggregate_bytes: default_max_aggregate_bytes(),
            strict_routing: false,
            close_after_reply: default_close_after_reply(),
            compression_level: default_compression_level(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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
    "0.0.0.0".to_string()
}

fn default_max_connections() -> usize {
    10000
}

fn default_delimiter() -> String {
    "&".to_string()
}

fn default_max_frame_length() -> usize {
    10
}

fn default_max_aggregate_bytes() -> usize {
    64 * 1024
}

fn default_close_after_reply() -> bool {
    true
}

fn default_compression_level() -> u32 {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub service: ServiceType,
    pub delimiter: Vec<u8>,
    pub max_frame_length: usize,
    pub max_aggregate_bytes: usize,
    pub stages: Vec<StageId>,
    pub strict_routing: bool,
    pub close_after_reply: bool,
    pub compression_level: u32,
    pub idle_timeout_secs: u64,
    pub max_connections: usize,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::from_sources(cli, toml_config)
    }

    /// Merge parsed CLI args over a parsed TOML file and validate the result.
    pub fn from_sources(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let service = cli
            .service
            .or(toml_config.server.service)
            .unwrap_or_default();

        let stage_ids = if !cli.stages.is_empty() {
            cli.stages
        } else {
            toml_config
                .pipeline
                .stages
                .unwrap_or_else(|| service.default_stages())
        };
        if stage_ids.is_empty() {
            return Err(ConfigError::Invalid("pipeline has no stages".to_string()));
        }
        let stages = stage_ids
            .iter()
            .map(|id| {
                id.parse::<StageId>()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let delimiter = unescape_delimiter(
            cli.delimiter
                .as_deref()
                .unwrap_or(&toml_config.pipeline.delimiter),
        )?;

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli
                .port
                .or(toml_config.server.port)
                .unwrap_or_else(|| service.default_port()),
            service,
            delimiter,
            max_frame_length: cli
                .max_frame_length
                .unwrap_or(toml_config.pipeline.max_frame_length),
            max_aggregate_bytes: cli
                .max_aggregate_bytes
                .unwrap_or(toml_config.pipeline.max_aggregate_bytes),
            stages,
            strict_routing: cli.strict_routing || toml_config.pipeline.strict_routing,
            close_after_reply: cli
                .close_after_reply
                .unwrap_or(toml_config.pipeline.close_after_reply),
            compression_level: cli
                .compression_level
                .unwrap_or(toml_config.pipeline.compression_level),
            idle_timeout_secs: cli
                .idle_timeout
                .unwrap_or(toml_config.server.idle_timeout_secs),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// `host:port` string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.max_frame_length == 0 {
            return invalid("max_frame_length must be greater than 0");
        }
        if self.max_aggregate_bytes == 0 {
            return invalid("max_aggregate_bytes must be greater than 0");
        }
        if self.max_connections == 0 {
            return invalid("max_connections must be greater than 0");
        }
        if self.workers == Some(0) {
            return invalid("workers must be greater than 0");
        }
        if self.compression_level > 9 {
            return invalid("compression_level must be between 0 and 9");
        }
        Ok(())
    }
}

/// Turn a configured delimiter into bytes.
fn unescape_delimiter(raw: &str) -> Result<Vec<u8>, ConfigError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('r') => out.push(b'\r'),
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported escape '\\{}' in delimiter",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }

    if out.is_empty() {
        return Err(ConfigError::Invalid("delimiter must not be empty".to_string()));
    }
    Ok(out)
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
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("channel-pipe").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_connections, 10000);
        assert_eq!(config.pipeline.delimiter, "&");
        assert_eq!(config.pipeline.max_frame_length, 10);
        assert_eq!(config.pipeline.max_aggregate_bytes, 65536);
        assert!(config.pipeline.close_after_reply);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_echo_service_defaults() {
        let config = Config::from_sources(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.service, ServiceType::Echo);
        assert_eq!(config.port, 8007);
        assert_eq!(config.delimiter, b"&");
        assert_eq!(
            config.stages,
            vec![StageId::FrameDecoder, StageId::Echo]
        );
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.listen_addr(), "0.0.0.0:8007");
    }

    #[test]
    fn test_service_selects_port_and_stages() {
        let config = Config::from_sources(cli(&["--service", "http"]), TomlConfig::default())
            .unwrap();
        assert_eq!(config.port, 555);
        assert_eq!(config.stages.len(), 4);
        assert_eq!(config.stages[1], StageId::HttpCompressor);

        let config = Config::from_sources(cli(&["-s", "demo"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 1111);
        assert_eq!(
            config.stages[2],
            StageId::ProbeIn {
                name: "C".into(),
                reply: true
            }
        );
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            service = "http"
            workers = 4
            idle_timeout_secs = 30

            [pipeline]
            stages = ["http-codec", "http-aggregator", "echo"]
            max_aggregate_bytes = 1024
            compression_level = 1

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(toml_config.server.service, Some(ServiceType::Http));
        assert_eq!(toml_config.server.workers, Some(4));

        let config = Config::from_sources(cli(&[]), toml_config).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.max_aggregate_bytes, 1024);
        assert_eq!(config.compression_level, 1);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [pipeline]
            delimiter = ";"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            cli(&[
                "--port",
                "7000",
                "--delimiter",
                "\\r\\n",
                "--stage",
                "frame-decoder",
                "--stage",
                "probe-in:X:reply",
                "--strict-routing",
                "--close-after-reply",
                "false",
                "--log-level",
                "trace",
            ]),
            toml_config,
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.delimiter, b"\r\n");
        assert_eq!(config.stages.len(), 2);
        assert!(config.strict_routing);
        assert!(!config.close_after_reply);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_sources(cli(&["--stage", "nope"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_sources(cli(&["--delimiter", ""]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_sources(cli(&["--max-frame-length", "0"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::from_sources(cli(&["--compression-level", "10"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let toml_config: TomlConfig = toml::from_str("[pipeline]\nstages = []").unwrap();
        let err = Config::from_sources(cli(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unescape_delimiter() {
        assert_eq!(unescape_delimiter("&").unwrap(), b"&");
        assert_eq!(unescape_delimiter("\\r\\n").unwrap(), b"\r\n");
        assert_eq!(unescape_delimiter("a\\\\b").unwrap(), b"a\\b");
        assert!(unescape_delimiter("\\x").is_err());
        assert!(unescape_delimiter("").is_err());
    }

    #[test]
    fn test_unknown_service_in_toml() {
        let result: Result<TomlConfig, _> = toml::from_str("[server]\nservice = \"ftp\"");
        assert!(result.is_err());
    }
}
