//! resp-loadgen: a throughput harness for RESP key-value servers
//!
//! Drives a fixed number of SET-then-GET transactions against a server,
//! spread over independent worker threads with one connection each, and
//! reports aggregate throughput against a target.
//!
//! Features:
//! - Byte-exact RESP multi-bulk SET/GET requests
//! - Per-worker failure reporting, time budgets and a run deadline
//! - Built-in mock target for self-tests (`--mock`)
//! - Configuration via CLI arguments or TOML file
//! - Exit status reflects the verdict

mod config;
mod coordinator;
mod mock;
mod protocols;
mod report;
mod worker;

use config::Config;
use mock::MockServer;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status for configuration and startup errors
const EXIT_STARTUP_ERROR: u8 = 3;

fn main() -> ExitCode {
    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_STARTUP_ERROR);
        }
    };

    // Logs go to stderr, stdout carries the report
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mock = if config.mock {
        match MockServer::start("127.0.0.1:0") {
            Ok(server) => {
                config.host = server.addr().ip().to_string();
                config.port = server.addr().port();
                Some(server)
            }
            Err(e) => {
                error!(error = %e, "Failed to start mock target");
                return ExitCode::from(EXIT_STARTUP_ERROR);
            }
        }
    } else {
        None
    };

    info!(
        server = %config.target(),
        total = config.total_transactions,
        workers = config.workers,
        threshold = config.threshold,
        "Starting resp-loadgen"
    );

    println!(
        "{}",
        report::banner(config.total_transactions, config.workers)
    );

    let summary = match coordinator::run(&config) {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Benchmark could not start");
            return ExitCode::from(EXIT_STARTUP_ERROR);
        }
    };

    println!("{}", summary.render(config.threshold));

    if let Some(server) = mock {
        let stats = server.stats();
        info!(
            connections = stats.connections,
            set_requests = stats.set_requests,
            get_requests = stats.get_requests,
            other_requests = stats.other_requests,
            responses = stats.responses,
            "Mock target traffic"
        );
    }

    ExitCode::from(summary.verdict(config.threshold).exit_code())
}
