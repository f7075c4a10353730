//! Command-line surface for the `fanrelay` binary.

use clap::Parser;

/// Default listening mode when `-mode` is omitted.
pub const DEFAULT_MODE: &str = "TCP:6060";
/// Default log file path when `-logpath` is omitted.
pub const DEFAULT_LOGPATH: &str = "./fanrelay.log";
/// Default log level when `-loglevel` is omitted.
pub const DEFAULT_LOGLEVEL: &str = "INFO";
/// Default retry interval, in seconds, when `-interval` is omitted.
pub const DEFAULT_INTERVAL: u64 = 2;

/// Server-broadcast proxy: fans I/O between accepted clients and a set of
/// upstream resources.
#[derive(Parser, Debug)]
#[command(name = "fanrelay", version, about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Listening mode for downstream clients: `TCP:<port>` or `UNIX:<path>`.
    #[arg(short = 'm', long = "mode", default_value = DEFAULT_MODE)]
    pub mode: String,

    /// Comma-separated upstream resources, e.g.
    /// `TCP:127.0.0.1:9000:R,UNIX:/tmp/a.sock`.
    #[arg(short = 'r', long = "resource", default_value = "")]
    pub resource: String,

    /// Seconds between reopen attempts for closed upstreams. `0` disables
    /// retries entirely.
    #[arg(short = 'i', long = "interval", default_value_t = DEFAULT_INTERVAL)]
    pub interval: u64,

    /// Log file path.
    #[arg(long = "logpath", default_value = DEFAULT_LOGPATH)]
    pub logpath: String,

    /// Log level: DEBUG, INFO, WARN, ERROR, or CRIT.
    #[arg(long = "loglevel", default_value = DEFAULT_LOGLEVEL)]
    pub loglevel: String,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::parse_from(["fanrelay"]);
        assert_eq!(cli.mode, DEFAULT_MODE);
        assert_eq!(cli.interval, DEFAULT_INTERVAL);
        assert_eq!(cli.logpath, DEFAULT_LOGPATH);
        assert_eq!(cli.loglevel, DEFAULT_LOGLEVEL);
    }

    #[test]
    fn version_flag_short_circuits() {
        let err = Cli::try_parse_from(["fanrelay", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "fanrelay",
            "--mode",
            "UNIX:/tmp/s.sock",
            "--resource",
            "TCP:127.0.0.1:9000:R",
            "--interval",
            "0",
            "--loglevel",
            "DEBUG",
        ]);
        assert_eq!(cli.mode, "UNIX:/tmp/s.sock");
        assert_eq!(cli.resource, "TCP:127.0.0.1:9000:R");
        assert_eq!(cli.interval, 0);
        assert_eq!(cli.loglevel, "DEBUG");
    }
}
