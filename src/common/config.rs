//! Configuration file handling and the resolved run configuration

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Port the device connects back to when none is given
pub const DEFAULT_PORT: u16 = 16384;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Listen socket defaults
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Relay behaviour for accepted connections
    #[serde(default)]
    pub relay: RelayConfig,

    /// Driving command supervision
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Listen socket defaults
#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind when `--ip` is absent or unparsable
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// Port to bind when `--port` is absent or unparsable
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Relay settings
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    /// Seconds of silence on a connection before the run is treated as hung
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,

    /// Connections closing with fewer bytes than this are reachability probes
    #[serde(default = "default_probe_threshold")]
    pub probe_threshold: usize,

    /// Per-connection receive buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: default_stall_timeout(),
            probe_threshold: default_probe_threshold(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_stall_timeout() -> u64 {
    10
}
fn default_probe_threshold() -> usize {
    16
}
fn default_buffer_size() -> usize {
    16 * 1024
}

/// Driving command supervision settings
#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Interval between exit polls of the driving command
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long to keep waiting for the relay after the command exits
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            grace_period_secs: default_grace_period(),
        }
    }
}

fn default_poll_interval() -> u64 {
    100
}
fn default_grace_period() -> u64 {
    10
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// used when present, otherwise built-in defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.relay.buffer_size == 0 {
            return Err(Error::Config("relay.buffer_size must be greater than zero".into()));
        }
        if self.runner.poll_interval_ms == 0 {
            return Err(Error::Config(
                "runner.poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a single run needs, fixed before the run starts
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Address the listener binds
    pub bind: SocketAddr,
    /// Silence allowed on an active connection
    pub stall_timeout: Duration,
    /// Byte count below which a closed connection is a probe
    pub probe_threshold: usize,
    /// Receive buffer size per session
    pub buffer_size: usize,
    /// Resolved path of the driving command
    pub command: PathBuf,
    /// Arguments passed to the driving command
    pub arguments: Vec<String>,
    /// Exit poll interval for the driving command
    pub poll_interval: Duration,
    /// Bounded wait for the relay after the command exits
    pub grace_period: Duration,
}

impl RunConfiguration {
    /// Build a run configuration from config-file defaults
    ///
    /// Callers override individual fields afterwards; the struct is plain data.
    pub fn from_config(config: &Config, command: PathBuf, arguments: Vec<String>) -> Self {
        Self {
            bind: SocketAddr::new(config.listener.address, config.listener.port),
            stall_timeout: Duration::from_secs(config.relay.stall_timeout_secs),
            probe_threshold: config.relay.probe_threshold,
            buffer_size: config.relay.buffer_size,
            command,
            arguments,
            poll_interval: Duration::from_millis(config.runner.poll_interval_ms),
            grace_period: Duration::from_secs(config.runner.grace_period_secs),
        }
    }
}

/// Resolve a driving command to an executable path
///
/// Anything containing a path separator is taken as-is; bare names are
/// looked up on PATH.
pub fn resolve_command(command: &str) -> Result<PathBuf> {
    if command.trim().is_empty() {
        return Err(Error::Config("--command must not be empty".into()));
    }
    let path = Path::new(command);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(command).map_err(|_| Error::CommandNotFound(command.to_string()))
}

/// Split the `--arguments` string with shell quoting rules
pub fn split_arguments(arguments: &str) -> Result<Vec<String>> {
    shell_words::split(arguments).map_err(|e| Error::invalid_arguments(arguments, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listener.port, 16384);
        assert_eq!(config.listener.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.relay.stall_timeout_secs, 10);
        assert_eq!(config.relay.probe_threshold, 16);
        assert_eq!(config.relay.buffer_size, 16 * 1024);
        assert_eq!(config.runner.poll_interval_ms, 100);
        assert_eq!(config.runner.grace_period_secs, 10);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            [listener]
            address = "127.0.0.1"

            [relay]
            stall_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.listener.port, DEFAULT_PORT);
        assert_eq!(config.relay.stall_timeout_secs, 30);
        assert_eq!(config.relay.probe_threshold, 16);
    }

    #[test]
    fn test_parse_rejects_zero_buffer() {
        let err = Config::parse("[relay]\nbuffer_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        let err = Config::parse("[relay\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/touch-server.toml"))).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_run_configuration_from_config() {
        let config = Config::default();
        let run = RunConfiguration::from_config(&config, PathBuf::from("/bin/true"), vec![]);
        assert_eq!(run.bind.port(), 16384);
        assert_eq!(run.stall_timeout, Duration::from_secs(10));
        assert_eq!(run.poll_interval, Duration::from_millis(100));
        assert_eq!(run.grace_period, Duration::from_secs(10));
    }

    #[test]
    fn test_split_arguments_honours_quotes() {
        let args = split_arguments(r#"--launchdev "My App.app" -v"#).unwrap();
        assert_eq!(args, vec!["--launchdev", "My App.app", "-v"]);
    }

    #[test]
    fn test_split_arguments_unterminated_quote() {
        assert!(matches!(
            split_arguments("\"open"),
            Err(Error::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_resolve_command_keeps_paths() {
        let path = resolve_command("./bin/launcher").unwrap();
        assert_eq!(path, PathBuf::from("./bin/launcher"));
    }

    #[test]
    fn test_resolve_command_unknown_name() {
        let err = resolve_command("touch-server-no-such-command").unwrap_err();
        assert!(matches!(err, Error::CommandNotFound(_)));
    }
}
