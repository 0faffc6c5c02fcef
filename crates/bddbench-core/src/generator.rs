//! Synthetic point generation.
//!
//! Point `j` of worker-local batch `b` has worker-local index
//! `i = b * batch_size + j` and global sequence `g = i * workers + worker`.
//! In-order timestamps are `base_ts + g`, which is strictly increasing per
//! worker and unique across workers. Out-of-order timestamps add a uniform
//! jitter of at most one second in the workload precision.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ids::RunId;
use crate::point::{Batch, Point};
use crate::workload::{PointComplexity, TimeOrdering, WorkloadSpec};

pub const DEVICE_TAG: &str = "device_id";
pub const RUN_ID_TAG: &str = "run_id";
pub const WRITER_TAG: &str = "writer_id";

/// Run-wide generator state: workload parameters, run id and base timestamp.
#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    spec: Arc<WorkloadSpec>,
    run_id: RunId,
    base_ts: i64,
}

impl WorkloadGenerator {
    #[must_use]
    pub fn new(spec: Arc<WorkloadSpec>, run_id: RunId, base_ts: i64) -> Self {
        Self {
            spec,
            run_id,
            base_ts,
        }
    }

    /// Anchors the run at the current time in the workload precision.
    #[must_use]
    pub fn starting_now(spec: Arc<WorkloadSpec>, run_id: RunId) -> Self {
        let base_ts = spec.precision().now();
        Self::new(spec, run_id, base_ts)
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    pub fn base_ts(&self) -> i64 {
        self.base_ts
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Generator owned by a single worker, with its own jitter source.
    #[must_use]
    pub fn for_worker(&self, worker_index: usize) -> BatchGenerator {
        let rng = match self.spec.jitter_seed() {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker_index as u64)),
            None => StdRng::from_entropy(),
        };
        BatchGenerator {
            spec: Arc::clone(&self.spec),
            run_id: self.run_id.to_string(),
            base_ts: self.base_ts,
            worker_index,
            rng,
        }
    }
}

/// Per-worker batch factory. Not shared between workers.
#[derive(Debug)]
pub struct BatchGenerator {
    spec: Arc<WorkloadSpec>,
    run_id: String,
    base_ts: i64,
    worker_index: usize,
    rng: StdRng,
}

impl BatchGenerator {
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// Builds the worker-local batch `batch_index`.
    pub fn generate(&mut self, batch_index: u64) -> Batch {
        let batch_size = self.spec.batch_size() as u64;
        let workers = self.spec.workers() as i64;
        let cardinality = self.spec.tag_cardinality() as i64;
        let jitter = self.spec.precision().jitter_bound();
        let writer = self.worker_index.to_string();

        let points = (0..batch_size)
            .map(|j| {
                let index = batch_index.saturating_mul(batch_size).saturating_add(j);
                let index = i64::try_from(index).unwrap_or(i64::MAX);
                let sequence = index
                    .saturating_mul(workers)
                    .saturating_add(self.worker_index as i64);
                let mut timestamp = self.base_ts.saturating_add(sequence);
                if self.spec.time_ordering() == TimeOrdering::OutOfOrder {
                    timestamp = timestamp.saturating_add(self.rng.gen_range(-jitter..=jitter));
                }

                let point = Point::new(self.spec.measurement(), timestamp)
                    .tag(DEVICE_TAG, format!("dev-{}", sequence.rem_euclid(cardinality)))
                    .tag(RUN_ID_TAG, self.run_id.as_str())
                    .tag(WRITER_TAG, writer.as_str());
                with_fields(point, self.spec.point_complexity(), index)
            })
            .collect();

        Batch {
            index: batch_index,
            worker_index: self.worker_index,
            points,
        }
    }
}

/// Stateless form of [`BatchGenerator::generate`]. Out-of-order jitter comes
/// from the workload seed when present, from entropy otherwise.
#[must_use]
pub fn generate(
    spec: &Arc<WorkloadSpec>,
    run_id: RunId,
    base_ts: i64,
    batch_index: u64,
    worker_index: usize,
) -> Batch {
    WorkloadGenerator::new(Arc::clone(spec), run_id, base_ts)
        .for_worker(worker_index)
        .generate(batch_index)
}

fn with_fields(point: Point, complexity: PointComplexity, index: i64) -> Point {
    let x = index as f64;
    let mut point = point.field("value", x).field("seq", index);
    if matches!(complexity, PointComplexity::Medium | PointComplexity::High) {
        point = point
            .field("aux1", index.rem_euclid(100))
            .field("aux2", x.sin())
            .field("aux3", x.cos());
    }
    if complexity == PointComplexity::High {
        point = point
            .field("aux4", index.rem_euclid(7))
            .field("aux5", index.rem_euclid(13))
            .field("aux6", x.sqrt())
            .field("aux7", x.ln_1p())
            .field("aux8", x / 1000.0);
    }
    point
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::workload::{Precision, StopCondition};

    fn spec(ordering: TimeOrdering, complexity: PointComplexity) -> Arc<WorkloadSpec> {
        Arc::new(
            WorkloadSpec::builder("bench_points")
                .batch_size(250)
                .workers(2)
                .tag_cardinality(7)
                .precision(Precision::Ns)
                .time_ordering(ordering)
                .point_complexity(complexity)
                .stop(StopCondition::Count { total: 8 })
                .jitter_seed(42)
                .build()
                .unwrap(),
        )
    }

    fn timestamps(generator: &mut BatchGenerator, batches: u64) -> Vec<i64> {
        (0..batches)
            .flat_map(|b| generator.generate(b).points)
            .map(|p| p.timestamp)
            .collect()
    }

    #[test]
    fn in_order_timestamps_increase_and_never_collide_across_workers() {
        let generator = WorkloadGenerator::new(
            spec(TimeOrdering::InOrder, PointComplexity::Low),
            RunId::new(),
            1_000,
        );
        let w0 = timestamps(&mut generator.for_worker(0), 4);
        let w1 = timestamps(&mut generator.for_worker(1), 4);
        assert!(w0.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(w1.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(w0.iter().all(|ts| !w1.contains(ts)));
        assert_eq!(w0[0], 1_000);
        assert_eq!(w1[0], 1_001);
    }

    #[test]
    fn out_of_order_produces_inversions() {
        let generator = WorkloadGenerator::new(
            spec(TimeOrdering::OutOfOrder, PointComplexity::Low),
            RunId::new(),
            0,
        );
        let ts = timestamps(&mut generator.for_worker(0), 4);
        assert!(ts.windows(2).any(|pair| pair[0] > pair[1]));
        let bound = Precision::Ns.jitter_bound();
        for (i, t) in ts.iter().enumerate() {
            let nominal = (i as i64) * 2;
            assert!((t - nominal).abs() <= bound);
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let spec = spec(TimeOrdering::OutOfOrder, PointComplexity::Low);
        let run_id = RunId::new();
        let a = generate(&spec, run_id, 0, 3, 1);
        let b = generate(&spec, run_id, 0, 3, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn tag_values_cycle_uniformly() {
        let generator = WorkloadGenerator::new(
            spec(TimeOrdering::InOrder, PointComplexity::Low),
            RunId::new(),
            0,
        );
        let mut counts: HashMap<String, usize> = HashMap::new();
        for worker in 0..2 {
            let mut gen = generator.for_worker(worker);
            for b in 0..4 {
                for point in gen.generate(b).points {
                    *counts.entry(point.tags[DEVICE_TAG].clone()).or_default() += 1;
                }
            }
        }
        assert_eq!(counts.len(), 7);
        let min = counts.values().min().copied().unwrap();
        let max = counts.values().max().copied().unwrap();
        assert!(max - min <= 1, "uneven tag distribution: {counts:?}");
    }

    #[test]
    fn complexity_controls_field_count() {
        for complexity in [
            PointComplexity::Low,
            PointComplexity::Medium,
            PointComplexity::High,
        ] {
            let batch = generate(
                &spec(TimeOrdering::InOrder, complexity),
                RunId::new(),
                0,
                0,
                0,
            );
            assert_eq!(batch.len(), 250);
            assert!(batch
                .points
                .iter()
                .all(|p| p.fields.len() == complexity.field_count()));
        }
    }

    #[test]
    fn points_carry_run_and_writer_tags() {
        let run_id = RunId::new();
        let batch = generate(
            &spec(TimeOrdering::InOrder, PointComplexity::Low),
            run_id,
            0,
            1,
            1,
        );
        let point = &batch.points[0];
        assert_eq!(point.tags[RUN_ID_TAG], run_id.to_string());
        assert_eq!(point.tags[WRITER_TAG], "1");
        assert_eq!(point.measurement, "bench_points");
    }
}
