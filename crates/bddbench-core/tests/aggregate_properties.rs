//! Property tests for the metrics aggregator.

use std::time::Duration;

use bddbench_core::aggregate::{aggregate, Summary};
use bddbench_core::sample::{OperationKind, Sample};
use proptest::prelude::*;

fn sample_strategy() -> impl Strategy<Value = Sample> {
    (0u64..5_000_000, 0u8..10, 0u64..1_000).prop_map(|(micros, roll, points)| {
        let duration = Duration::from_micros(micros);
        let sample = match roll {
            0 => Sample::failure(OperationKind::Write, duration, Some(500), "boom"),
            1 => Sample::skipped(OperationKind::Write),
            _ => Sample::success(OperationKind::Write, duration),
        };
        sample.with_points(points)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn percentiles_are_ordered(values in prop::collection::vec(0.0f64..1e6, 1..500)) {
        let s = Summary::from_values(&values).unwrap();
        prop_assert!(s.min <= s.p50);
        prop_assert!(s.p50 <= s.p95);
        prop_assert!(s.p95 <= s.p99);
        prop_assert!(s.p99 <= s.max);
        prop_assert!(s.min <= s.median && s.median <= s.max);
    }

    #[test]
    fn error_rate_is_a_fraction(samples in prop::collection::vec(sample_strategy(), 0..300)) {
        let stats = aggregate(&samples, Duration::from_secs(3));
        prop_assert!((0.0..=1.0).contains(&stats.error_rate));
        prop_assert_eq!(stats.count, samples.len() as u64);
        prop_assert_eq!(
            stats.success_count + stats.error_count + stats.skipped_count,
            stats.count
        );
        if stats.error_rate == 0.0 {
            prop_assert_eq!(stats.error_count, 0);
        }
    }

    #[test]
    fn aggregation_is_idempotent(samples in prop::collection::vec(sample_strategy(), 0..200)) {
        let first = aggregate(&samples, Duration::from_millis(1_500));
        let second = aggregate(&samples, Duration::from_millis(1_500));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn merge_order_does_not_change_stats(samples in prop::collection::vec(sample_strategy(), 1..200)) {
        let mut reversed = samples.clone();
        reversed.reverse();
        let a = aggregate(&samples, Duration::from_secs(1));
        let b = aggregate(&reversed, Duration::from_secs(1));
        prop_assert_eq!(a.latency.map(|l| l.p99), b.latency.map(|l| l.p99));
        prop_assert_eq!(a.total_points, b.total_points);
        prop_assert_eq!(a.error_count, b.error_count);
    }
}
