//! netcom-listen entry point.
//!
//! `netcom-listen <protocol>://<address>:<port>`: accepts probe
//! subscriptions and prints one line per event until Ctrl-C.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netcom_probe::config::{ListenArgs, ListenConfig};
use netcom_probe::domain::EventBus;
use netcom_probe::listener::{EventReporter, Listener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = ListenConfig::from_args(ListenArgs::parse())?;
    tracing::info!(
        transport = %config.transport,
        addr = %config.bind_addr,
        encoding = %config.encoding,
        "starting netcom-listen"
    );

    let bus = EventBus::new(config.event_bus_capacity);
    let reporter = EventReporter::open(config.json, config.log_file.as_deref()).await?;
    let report_task = tokio::spawn(reporter.run(bus.subscribe(), tokio::io::stdout()));

    let listener = Listener::bind(&config, bus.clone()).await?;
    drop(bus);

    listener
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    report_task.await??;
    Ok(())
}
