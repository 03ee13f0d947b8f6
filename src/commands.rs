//! CLI argument definitions
//!
//! Defines the clap arguments for the touch server.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::common::config::{self, Config, RunConfiguration};
use crate::common::Result;

#[derive(Parser, Debug)]
#[command(name = "touch-server", about = "Relay a device test run back to the host")]
#[command(version, long_about = None)]
pub struct ServerArgs {
    /// IP address to listen on (default: any)
    #[arg(long)]
    pub ip: Option<String>,

    /// TCP port to listen on (default: 16384)
    #[arg(long)]
    pub port: Option<String>,

    /// The command that launches the test run
    #[arg(long)]
    pub command: String,

    /// The arguments to pass to the command, as one shell-quoted string
    #[arg(long, allow_hyphen_values = true)]
    pub arguments: String,

    /// Seconds without data before a connected run is treated as hung
    #[arg(long, value_name = "SECS")]
    pub stall_timeout: Option<u64>,

    /// Seconds to wait for the relay after the command exits
    #[arg(long, value_name = "SECS")]
    pub grace_period: Option<u64>,

    /// Configuration file (default: platform config dir)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write a JSON summary of the run to this file
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl ServerArgs {
    /// Combine the arguments with file configuration into a run configuration
    ///
    /// An empty or unparsable `--ip`/`--port` falls back to the configured
    /// value rather than failing.
    pub fn resolve(&self, file: &Config) -> Result<RunConfiguration> {
        let command = config::resolve_command(&self.command)?;
        let arguments = config::split_arguments(&self.arguments)?;
        let mut run = RunConfiguration::from_config(file, command, arguments);

        if let Some(ip) = self.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty()) {
            match ip.parse::<IpAddr>() {
                Ok(addr) => run.bind.set_ip(addr),
                Err(_) => tracing::warn!(ip, "Ignoring unparsable --ip, using {}", run.bind.ip()),
            }
        }
        if let Some(port) = self.port.as_deref() {
            match port.trim().parse::<u16>() {
                Ok(port) => run.bind.set_port(port),
                Err(_) => tracing::warn!(port, "Ignoring unparsable --port, using {}", run.bind.port()),
            }
        }
        if let Some(secs) = self.stall_timeout {
            run.stall_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.grace_period {
            run.grace_period = Duration::from_secs(secs);
        }

        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    fn parse(extra: &[&str]) -> ServerArgs {
        let mut argv = vec![
            "touch-server",
            "--command",
            "/usr/bin/launcher",
            "--arguments",
            "--launchdev 'My App.app' -v",
        ];
        argv.extend_from_slice(extra);
        ServerArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let run = parse(&[]).resolve(&Config::default()).unwrap();
        assert_eq!(run.bind, "0.0.0.0:16384".parse().unwrap());
        assert_eq!(run.command, PathBuf::from("/usr/bin/launcher"));
        assert_eq!(run.arguments, vec!["--launchdev", "My App.app", "-v"]);
        assert_eq!(run.stall_timeout, Duration::from_secs(10));
        assert_eq!(run.grace_period, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let run = parse(&[
            "--ip",
            "192.168.1.20",
            "--port",
            "20000",
            "--stall-timeout",
            "30",
            "--grace-period",
            "2",
        ])
        .resolve(&Config::default())
        .unwrap();
        assert_eq!(run.bind, "192.168.1.20:20000".parse().unwrap());
        assert_eq!(run.stall_timeout, Duration::from_secs(30));
        assert_eq!(run.grace_period, Duration::from_secs(2));
    }

    #[test]
    fn test_unparsable_address_and_port_fall_back() {
        let run = parse(&["--ip", "not-an-ip", "--port", "99999"])
            .resolve(&Config::default())
            .unwrap();
        assert_eq!(run.bind, "0.0.0.0:16384".parse().unwrap());
    }

    #[test]
    fn test_config_file_values_used() {
        let file = Config::parse("[listener]\naddress = \"127.0.0.1\"\nport = 17000\n").unwrap();
        let run = parse(&[]).resolve(&file).unwrap();
        assert_eq!(run.bind, "127.0.0.1:17000".parse().unwrap());
    }

    #[test]
    fn test_command_and_arguments_required() {
        assert!(ServerArgs::try_parse_from(["touch-server"]).is_err());
        assert!(ServerArgs::try_parse_from(["touch-server", "--command", "x"]).is_err());
    }

    #[test]
    fn test_bad_argument_quoting() {
        let args = ServerArgs::try_parse_from([
            "touch-server",
            "--command",
            "/usr/bin/launcher",
            "--arguments",
            "'unterminated",
        ])
        .unwrap();
        assert!(matches!(
            args.resolve(&Config::default()),
            Err(Error::InvalidArguments { .. })
        ));
    }
}
