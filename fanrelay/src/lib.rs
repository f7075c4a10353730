//! `fanrelay`: a server-broadcast proxy. Parses CLI flags, opens the
//! configured upstream resources, and fans bytes between them and whatever
//! clients connect to the listening endpoint.

pub mod cli;
pub mod logging;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fanrelay_server::config::Config;
use fanrelay_server::coordinator::{ExitReason, Server};
use fanrelay_server::resource::{parse_listen_spec, parse_resource_list};

use crate::cli::Cli;
use crate::critical;

/// Clean shutdown: signal received, or all upstreams exhausted with retries
/// disabled.
pub const EXIT_OK: i32 = 0;
/// Misconfiguration or startup failure.
pub const EXIT_CONFIG_ERROR: i32 = 1;

/// How often the shutdown-wait loop polls the exit queue and signal flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Parses `cli`, initializes logging, builds and runs the coordinator, and
/// blocks until a shutdown signal or a self-terminating condition fires.
/// Returns the process exit code.
pub fn run(cli: Cli) -> i32 {
    let level = match logging::parse_log_level(&cli.loglevel) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("fanrelay: {e}");
            return EXIT_CONFIG_ERROR;
        }
    };
    if let Err(e) = logging::init(&cli.logpath, level) {
        eprintln!("fanrelay: failed to open log file {:?}: {e}", cli.logpath);
        return EXIT_CONFIG_ERROR;
    }

    let listen = match parse_listen_spec(&cli.mode) {
        Ok(spec) => spec,
        Err(e) => {
            critical!(error = %e, "invalid -mode");
            return EXIT_CONFIG_ERROR;
        }
    };

    let resources = match parse_resource_list(&cli.resource) {
        Ok(specs) => specs,
        Err(e) => {
            critical!(error = %e, "invalid -resource");
            return EXIT_CONFIG_ERROR;
        }
    };

    let config = Config::new(listen, resources, cli.interval);

    let server = match Server::build(&config) {
        Ok(server) => server,
        Err(e) => {
            critical!(error = %e, "failed to build coordinator");
            return EXIT_CONFIG_ERROR;
        }
    };

    if let Err(e) = server.run() {
        critical!(error = %e, "failed to start coordinator");
        return EXIT_CONFIG_ERROR;
    }
    tracing::info!(mode = %cli.mode, interval = cli.interval, "fanrelay running");

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGHUP,
    ] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            tracing::warn!(error = %e, signal, "failed to register signal handler");
        }
    }

    let exit_rx = server.exit_receiver();
    let exit_code = loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown signal received");
            break EXIT_OK;
        }
        match exit_rx.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
            Ok(ExitReason::UpstreamsExhausted) => {
                tracing::info!("all upstreams exhausted and retries disabled, exiting");
                break EXIT_OK;
            }
            Err(flume::RecvTimeoutError::Timeout | flume::RecvTimeoutError::Disconnected) => continue,
        }
    };

    server.close();
    exit_code
}
