pub mod fixtures;

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use fanout_events::{CancellationToken, Filter};
    use proptest::prelude::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build runtime")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_subscriber_sees_matching_events_in_order(
            events in prop::collection::vec(-1000i64..1000, 0..64),
            threshold in -1000i64..1000,
            modulus in 1i64..8,
        ) {
            let expected_all = events.clone();
            let expected_filtered: Vec<i64> = events
                .iter()
                .copied()
                .filter(|v| *v > threshold && v.rem_euclid(modulus) == 0)
                .collect();

            let (all, filtered) = runtime().block_on(async move {
                let scope = CancellationToken::new();
                let bus = setup_bus(&scope, 8, 64);

                let mut all = bus.subscribe(&scope, []).unwrap();
                let mut filtered = bus
                    .subscribe(
                        &scope,
                        [
                            Filter::new(move |e: &TestEvent| e.0 > threshold),
                            Filter::new(move |e: &TestEvent| e.0.rem_euclid(modulus) == 0),
                        ],
                    )
                    .unwrap();

                bus.emit_all(events.into_iter().map(TestEvent)).await.unwrap();
                bus.stats().await.unwrap();
                bus.shutdown();

                (drain(&mut all).await, drain(&mut filtered).await)
            });

            prop_assert_eq!(all, expected_all);
            prop_assert_eq!(filtered, expected_filtered);
        }

        #[test]
        fn prop_overflow_evicts_exactly_the_small_queues(
            count in 1usize..32,
            capacities in prop::collection::vec(1usize..32, 1..6),
        ) {
            let expected_evicted = capacities.iter().filter(|c| **c < count).count() as u64;

            let (received, evicted) = runtime().block_on(async move {
                let scope = CancellationToken::new();
                let bus = setup_bus(&scope, 64, 64);

                let mut subs: Vec<_> = capacities
                    .iter()
                    .map(|c| bus.subscribe_with_capacity(&scope, *c, []).unwrap())
                    .collect();

                // Nothing is received while emitting, so queues fill up deterministically.
                bus.emit_all((0..count as i64).map(TestEvent)).await.unwrap();
                let stats = bus.stats().await.unwrap();
                bus.shutdown();

                let mut received = Vec::new();
                for sub in &mut subs {
                    received.push(drain(sub).await.len());
                }
                (received.into_iter().zip(capacities).collect::<Vec<_>>(), stats.evicted)
            });

            prop_assert_eq!(evicted, expected_evicted);
            for (got, capacity) in received {
                prop_assert_eq!(got, count.min(capacity));
            }
        }
    }
}
