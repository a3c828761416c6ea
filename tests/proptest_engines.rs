//! Property-based tests for the aggregation engines.
//!
//! Each engine is checked against a naive recomputation over the full input
//! seen so far. The integer properties compare exactly since their sums are
//! exact in f64; the mixed-magnitude properties compare within a tolerance
//! scaled by the absolute mass of the values involved.

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use streamfold::core::{
    AggregateFn, CrossSectionalConfig, CrossSectionalEngine, Engine, HoppingConfig,
    HoppingWindowEngine, MetricSpec, RecomputePolicy, SlidingAggregate, SlidingBufferEngine,
    SlidingConfig,
};
use streamfold::source::Event;

const KEYS: [&str; 4] = ["A", "B", "C", "D"];

/// Keyed values in arrival order.
fn keyed_values() -> impl Strategy<Value = Vec<(usize, i32)>> {
    prop::collection::vec((0..KEYS.len(), -1_000i32..1_000), 0..120)
}

/// Keyed events with non-decreasing times and an optional value.
fn ordered_events() -> impl Strategy<Value = Vec<(usize, i64, Option<i32>)>> {
    prop::collection::vec((0..KEYS.len(), 0i64..40, prop::option::weighted(0.9, -50i32..50)), 0..150)
        .prop_map(|steps| {
            let mut time = 0;
            steps
                .into_iter()
                .map(|(key, gap, value)| {
                    time += gap;
                    (key, time, value)
                })
                .collect()
        })
}

/// Quotes where either field may be missing.
fn quotes() -> impl Strategy<Value = Vec<(usize, Option<i32>, Option<i32>)>> {
    prop::collection::vec(
        (
            0..KEYS.len(),
            prop::option::weighted(0.8, 1i32..500),
            prop::option::weighted(0.8, 0i32..100),
        ),
        0..80,
    )
}

/// Finite values spanning tiny to huge magnitudes, both signs.
fn mixed_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1e16..1e16f64,
        -1e3..1e3f64,
        -1e-6..1e-6f64,
        (-8i32..8).prop_map(f64::from),
    ]
}

fn mixed_keyed_values() -> impl Strategy<Value = Vec<(usize, f64)>> {
    prop::collection::vec((0..KEYS.len(), mixed_value()), 0..150)
}

/// Allowed gap between two sums over values with absolute mass `mass`.
fn tolerance(mass: f64) -> f64 {
    1e-6 + 1e-12 * mass
}

fn sliding_engine(capacity: u32, aggregate: SlidingAggregate) -> SlidingBufferEngine {
    SlidingBufferEngine::new(SlidingConfig {
        capacity,
        aggregate,
        ..SlidingConfig::default()
    })
    .unwrap()
}

proptest! {
    /// Buffered stats equal a rescan of the last `capacity` values per key.
    #[test]
    fn sliding_matches_naive_rescan(input in keyed_values(), capacity in 1u32..6) {
        let mut sum = sliding_engine(capacity, SlidingAggregate::Sum);
        let mut min = sliding_engine(capacity, SlidingAggregate::Min);
        let mut max = sliding_engine(capacity, SlidingAggregate::Max);
        let mut history: BTreeMap<usize, Vec<f64>> = BTreeMap::new();

        for (i, (key, value)) in input.into_iter().enumerate() {
            let event = Event::new(i as i64, KEYS[key]).with_field("value", value as f64);
            let seen = history.entry(key).or_default();
            seen.push(value as f64);
            let tail = &seen[seen.len().saturating_sub(capacity as usize)..];
            let primed = seen.len() >= capacity as usize;

            let s = sum.feed(&event).remove(0);
            let lo = min.feed(&event).remove(0);
            let hi = max.feed(&event).remove(0);

            prop_assert_eq!(s.running_sum, tail.iter().sum::<f64>());
            prop_assert_eq!(s.buffer_len, tail.len());
            if primed {
                prop_assert_eq!(s.value, Some(tail.iter().sum::<f64>()));
                prop_assert_eq!(lo.value, tail.iter().copied().reduce(f64::min));
                prop_assert_eq!(hi.value, tail.iter().copied().reduce(f64::max));
            } else {
                prop_assert_eq!(s.value, None);
                prop_assert_eq!(lo.value, None);
                prop_assert_eq!(hi.value, None);
            }
        }
    }

    /// The running sum stays within rounding distance of the buffer contents
    /// however large the values that passed through it.
    #[test]
    fn sliding_running_sum_tracks_mixed_magnitudes(
        input in mixed_keyed_values(),
        capacity in 1u32..6,
    ) {
        let mut sum = sliding_engine(capacity, SlidingAggregate::Sum);
        let mut history: BTreeMap<usize, Vec<f64>> = BTreeMap::new();

        for (i, (key, value)) in input.into_iter().enumerate() {
            let event = Event::new(i as i64, KEYS[key]).with_field("value", value);
            let seen = history.entry(key).or_default();
            seen.push(value);
            let tail = &seen[seen.len().saturating_sub(capacity as usize)..];
            let naive: f64 = tail.iter().sum();
            let mass: f64 = tail.iter().map(|v| v.abs()).sum();

            let result = sum.feed(&event).remove(0);
            prop_assert!(
                (result.running_sum - naive).abs() <= tolerance(mass),
                "running sum {} vs rescan {} over {:?}",
                result.running_sum,
                naive,
                tail
            );
            if let Some(v) = result.value {
                prop_assert!((v - naive).abs() <= tolerance(mass));
            }
        }
    }

    /// Every finalized window holds exactly the key's events inside its range,
    /// and no window is emitted twice.
    #[test]
    fn hopping_matches_naive_fold(
        input in ordered_events(),
        size in 1u64..60,
        step in 1u64..60,
    ) {
        let mut engine = HoppingWindowEngine::new(HoppingConfig {
            window_size: Duration::from_millis(size),
            step: Duration::from_millis(step),
            garbage_size: 4,
            aggregate: AggregateFn::Sum,
            ..HoppingConfig::default()
        })
        .unwrap();

        let events: Vec<Event> = input
            .iter()
            .map(|&(key, time, value)| {
                let event = Event::new(time, KEYS[key]);
                match value {
                    Some(v) => event.with_field("value", v as f64),
                    None => event,
                }
            })
            .collect();

        let mut emitted = HashSet::new();
        for result in engine.feed_all(&events) {
            prop_assert!(emitted.insert((result.key.clone(), result.start)));
            prop_assert_eq!(result.end - result.start, size as i64);
            prop_assert_eq!(result.start.rem_euclid(step as i64), 0);

            let members: Vec<&Event> = events
                .iter()
                .filter(|e| e.key == result.key && e.time >= result.start && e.time < result.end)
                .collect();
            let expected: f64 = members.iter().filter_map(|e| e.field("value")).sum();

            prop_assert_eq!(result.member_count, members.len() as u64);
            prop_assert_eq!(result.value, Some(expected));
        }
    }

    /// Both recompute policies agree with a scan of the latest event per key
    /// after every prefix.
    #[test]
    fn cross_sectional_matches_naive_scan(input in quotes()) {
        let metrics = vec![
            MetricSpec::avg("avg", "price"),
            MetricSpec::sum("sum", "volume"),
            MetricSpec::sum_product("notional", "price", "volume"),
            MetricSpec::count("n"),
            MetricSpec::min("lo", "price"),
            MetricSpec::max("hi", "price"),
        ];
        let build = |recompute| {
            CrossSectionalEngine::new(CrossSectionalConfig {
                metrics: metrics.clone(),
                recompute,
                ..CrossSectionalConfig::default()
            })
            .unwrap()
        };
        let mut full = build(RecomputePolicy::FullScan);
        let mut incremental = build(RecomputePolicy::Incremental);
        let mut latest: BTreeMap<usize, (Option<f64>, Option<f64>)> = BTreeMap::new();

        for (i, (key, price, volume)) in input.into_iter().enumerate() {
            let price = price.map(f64::from);
            let volume = volume.map(f64::from);
            let mut event = Event::new(i as i64, KEYS[key]);
            if let Some(p) = price {
                event = event.with_field("price", p);
            }
            if let Some(v) = volume {
                event = event.with_field("volume", v);
            }
            latest.insert(key, (price, volume));

            let prices: Vec<f64> = latest.values().filter_map(|(p, _)| *p).collect();
            let volume_sum: f64 = latest.values().filter_map(|(_, v)| *v).sum();
            let notional: f64 = latest
                .values()
                .filter_map(|(p, v)| Some((*p)? * (*v)?))
                .sum();
            let avg = (!prices.is_empty()).then(|| prices.iter().sum::<f64>() / prices.len() as f64);

            for result in [full.feed(&event).remove(0), incremental.feed(&event).remove(0)] {
                prop_assert_eq!(result.populated_slots, latest.len());
                prop_assert_eq!(result.metric("sum"), Some(volume_sum));
                prop_assert_eq!(result.metric("notional"), Some(notional));
                prop_assert_eq!(result.metric("n"), Some(latest.len() as f64));
                prop_assert_eq!(result.metric("lo"), prices.iter().copied().reduce(f64::min));
                prop_assert_eq!(result.metric("hi"), prices.iter().copied().reduce(f64::max));
                match (result.metric("avg"), avg) {
                    (Some(a), Some(b)) => prop_assert!((a - b).abs() < 1e-9),
                    (a, b) => prop_assert_eq!(a, b),
                }
            }
        }
    }

    /// Incremental partials agree with a full scan on mixed-magnitude values.
    #[test]
    fn cross_sectional_incremental_tracks_full_scan(input in mixed_keyed_values()) {
        let build = |recompute| {
            CrossSectionalEngine::new(CrossSectionalConfig {
                metrics: vec![
                    MetricSpec::sum("sum", "v"),
                    MetricSpec::avg("avg", "v"),
                    MetricSpec::count("n"),
                ],
                recompute,
                ..CrossSectionalConfig::default()
            })
            .unwrap()
        };
        let mut full = build(RecomputePolicy::FullScan);
        let mut incremental = build(RecomputePolicy::Incremental);
        let mut latest: BTreeMap<usize, f64> = BTreeMap::new();

        for (i, (key, value)) in input.into_iter().enumerate() {
            let event = Event::new(i as i64, KEYS[key]).with_field("v", value);
            latest.insert(key, value);
            let mass: f64 = latest.values().map(|v| v.abs()).sum();

            let expected = full.feed(&event).remove(0);
            let actual = incremental.feed(&event).remove(0);
            prop_assert_eq!(actual.metric("n"), expected.metric("n"));
            for name in ["sum", "avg"] {
                match (actual.metric(name), expected.metric(name)) {
                    (Some(a), Some(b)) => prop_assert!(
                        (a - b).abs() <= tolerance(mass),
                        "{}: incremental {} vs full scan {}",
                        name,
                        a,
                        b
                    ),
                    (a, b) => prop_assert_eq!(a, b),
                }
            }
        }
    }
}
