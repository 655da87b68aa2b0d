mod scenario;

use anyhow::Context;
use fanout_events::{BusConfig, CancellationToken};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "info,fanout_events=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config = match std::env::args().nth(1) {
        Some(path) => BusConfig::load(&path)
            .with_context(|| format!("Critical: bus configuration at {path} is malformed"))?,
        None => BusConfig::from_env().context("Critical: FANOUT__* environment is malformed")?,
    };

    let app = CancellationToken::new();
    let run = scenario::run(&app, config);

    tokio::select! {
        report = run => {
            let report = report?;
            tracing::info!(
                received = report.received,
                alerts = report.alerts,
                callback_total = report.callback_total,
                evicted = report.stats.evicted,
                dispatched = report.stats.dispatched,
                "Demo finished"
            );
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::warn!("Interrupted; cancelling application scope");
            app.cancel();
        },
    }

    Ok(())
}

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .try_init()
        .context("Failed to install the global tracing subscriber")
}
