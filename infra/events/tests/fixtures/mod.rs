use fanout_events::{Bus, CancellationToken, Subscription};
use std::time::Duration;

/// Upper bound for any await that would hang on a regression.
pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestEvent(pub i64);

/// Builds a bus for [`TestEvent`] with explicit capacities.
///
/// # Panics
/// * If the capacities are rejected.
#[must_use]
pub fn setup_bus(
    scope: &CancellationToken,
    inbound: usize,
    subscriber: usize,
) -> Bus<TestEvent> {
    Bus::builder()
        .inbound_capacity(inbound)
        .subscriber_capacity(subscriber)
        .scope(scope)
        .build()
        .expect("bus setup failed")
}

/// Receives events until the subscription closes and returns their payloads.
///
/// # Panics
/// * If the subscription does not close within [`WAIT`].
pub async fn drain(sub: &mut Subscription<TestEvent>) -> Vec<i64> {
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(WAIT, sub.recv()).await {
            Ok(Some(event)) => out.push(event.0),
            Ok(None) => return out,
            Err(_) => panic!("subscription did not close in time; received so far: {out:?}"),
        }
    }
}

/// Receives exactly `n` events.
///
/// # Panics
/// * If fewer than `n` events arrive within [`WAIT`] each.
pub async fn take(sub: &mut Subscription<TestEvent>, n: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let event = tokio::time::timeout(WAIT, sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed early");
        out.push(event.0);
    }
    out
}
