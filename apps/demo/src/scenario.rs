use fanout_events::{Bus, BusConfig, BusStats, CancellationToken, Filter, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, instrument, warn};

const READINGS_PER_SENSOR: u64 = 50;
const ALERT_THRESHOLD: u64 = 90;
const SENSORS: [&str; 2] = ["boiler", "chiller"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reading {
    pub(crate) sensor: &'static str,
    pub(crate) seq: u64,
    pub(crate) value: u64,
}

#[derive(Debug)]
pub(crate) struct Report {
    pub(crate) received: usize,
    pub(crate) alerts: usize,
    pub(crate) callback_total: u64,
    pub(crate) stats: BusStats,
}

/// Runs two producers against an archive, an alert feed, a callback, a
/// dashboard that leaves early and a consumer that never reads.
#[instrument(skip_all, fields(inbound = config.inbound_capacity, subscriber = config.subscriber_capacity))]
pub(crate) async fn run(app: &CancellationToken, config: BusConfig) -> anyhow::Result<Report> {
    let bus = Bus::<Reading>::builder().config(config).scope(app).build()?;

    let archive = tokio::spawn(count("archive", bus.subscribe(app, [])?));
    let alerts = tokio::spawn(count(
        "alerts",
        bus.subscribe(app, [Filter::new(|r: &Reading| r.value > ALERT_THRESHOLD)])?,
    ));

    let total = Arc::new(AtomicU64::new(0));
    let sum = Arc::clone(&total);
    let audit = bus.on_emit(
        app,
        move |r: &Reading| {
            sum.fetch_add(r.value, Ordering::Relaxed);
        },
        [Filter::new(|r: &Reading| r.sensor == "boiler")],
    )?;

    let dashboard_scope = app.child_token();
    let dashboard = tokio::spawn(count("dashboard", bus.subscribe(&dashboard_scope, [])?));

    // Never read; its queue overflows and the engine evicts it.
    let stalled = bus.subscribe_with_capacity(app, 4, [])?;

    let producers: Vec<_> = SENSORS
        .into_iter()
        .zip(0u64..)
        .map(|(sensor, offset)| tokio::spawn(produce(bus.clone(), sensor, offset)))
        .collect();

    let mut first = true;
    for producer in producers {
        producer.await??;
        if first {
            info!("First producer done; closing the dashboard");
            dashboard_scope.cancel();
            first = false;
        }
    }

    let stats = bus.stats().await?;
    info!(stalled_closed = stalled.is_closed(), buffered = stalled.len(), "Stalled consumer state");
    drop(stalled);

    bus.shutdown();
    bus.terminated().await;
    if bus.emit(Reading { sensor: "late", seq: 0, value: 0 }).await.is_err() {
        info!("Emit after shutdown rejected as expected");
    }

    let received = archive.await?;
    let alerts = alerts.await?;
    dashboard.await?;
    audit.await?;

    Ok(Report { received, alerts, callback_total: total.load(Ordering::Relaxed), stats })
}

async fn produce(bus: Bus<Reading>, sensor: &'static str, offset: u64) -> anyhow::Result<()> {
    for seq in 0..READINGS_PER_SENSOR {
        let value = (seq * 37 + offset * 11) % 100;
        bus.emit(Reading { sensor, seq, value }).await?;
    }
    info!(sensor, emitted = READINGS_PER_SENSOR, "Producer finished");
    Ok(())
}

async fn count(name: &'static str, mut subscription: Subscription<Reading>) -> usize {
    let mut seen = 0usize;
    let mut last_seq = std::collections::HashMap::new();

    while let Some(reading) = subscription.recv().await {
        if let Some(prev) = last_seq.insert(reading.sensor, reading.seq)
            && prev >= reading.seq
        {
            warn!(consumer = name, sensor = reading.sensor, "Out-of-order reading");
        }
        seen += 1;
    }

    info!(consumer = name, subscriber = %subscription.id(), seen, "Consumer finished");
    seen
}
