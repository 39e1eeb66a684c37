//! netcom-probe entry point.
//!
//! `netcom-probe <transport> <address> <port>`: connects, subscribes, pings
//! until Ctrl-C or a send error, then unsubscribes.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netcom_probe::client::Probe;
use netcom_probe::config::{ProbeArgs, ProbeConfig};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing("warn");

    let args = ProbeArgs::parse();
    let config = match ProbeConfig::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            println!("{err}");
            return ExitCode::from(exit_status(err.exit_code()));
        }
    };
    tracing::debug!(?config, "probe configured");

    match Probe::new(config, std::io::stdout()).run(interrupted()).await {
        Ok(report) => {
            tracing::debug!(?report, "probe finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{err}");
            ExitCode::from(exit_status(err.exit_code()))
        }
    }
}

/// Initialise tracing on stderr; stdout carries the status lines.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Completes on the first Ctrl-C. If the handler cannot be installed the
/// probe runs until a send fails.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
