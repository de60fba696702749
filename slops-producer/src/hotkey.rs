//! C1: the Lossy Counting heavy-hitter detector.
//!
//! Grounded on `SLOPSProducer/cmd/count.go`'s `LossyCount` goroutine: a
//! bucket-epoch counter that decrements every tracked record on rollover,
//! evicts records that fall below the retention bound, and promotes
//! survivors past the support threshold. C1 never migrates keys itself —
//! it only asks the Partition Map to bind or drop a binding.

use std::collections::HashMap;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::partition_map::PartitionMap;
use crate::prometheus::report_promotion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LossyRecord {
    count: u64,
    bucket_offset: u64,
}

/// The pure Lossy Counting algorithm, free of any I/O so it can be unit
/// tested deterministically. The worker in [`run`] is the async wrapper
/// that wires this to the sampling channel and the Partition Map.
pub struct LossyCounter {
    epsilon: f64,
    support: f64,
    width: u64,
    current_bucket: u64,
    n: u64,
    records: HashMap<String, LossyRecord>,
}

/// Outcome of a single sampled observation that crossed a bucket boundary.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rollover {
    pub evicted: Vec<String>,
    pub promoted: Vec<(String, u64)>,
}

impl LossyCounter {
    pub fn new(epsilon: f64, support: f64) -> Self {
        assert!(epsilon > 0.0, "epsilon must be positive");
        assert!(
            epsilon < support,
            "epsilon ({epsilon}) must be less than support ({support})"
        );
        let width = (1.0 / epsilon).floor() as u64;
        Self {
            epsilon,
            support,
            width: width.max(1),
            current_bucket: 1,
            n: 0,
            records: HashMap::new(),
        }
    }

    pub fn tracked_len(&self) -> usize {
        self.records.len()
    }

    pub fn estimate(&self, key: &str) -> Option<u64> {
        self.records.get(key).map(|r| r.count)
    }

    /// Process one sampled key. Returns `Some(Rollover)` only on the call
    /// that crosses a bucket boundary; every other call just updates the
    /// record and returns `None`.
    pub fn observe(&mut self, key: &str) -> Option<Rollover> {
        self.n += 1;
        match self.records.get_mut(key) {
            Some(rec) => rec.count += 1,
            None => {
                self.records.insert(
                    key.to_string(),
                    LossyRecord {
                        count: 1,
                        bucket_offset: self.current_bucket - 1,
                    },
                );
            }
        }

        if self.n < self.width {
            return None;
        }

        let bucket = self.current_bucket;
        let n = self.n as f64;
        let promotion_bound = (self.support - self.epsilon) * n;

        let mut evicted = Vec::new();
        let mut promoted = Vec::new();

        self.records.retain(|k, rec| {
            rec.count = rec.count.saturating_sub(1);
            if (rec.count + rec.bucket_offset) < bucket {
                evicted.push(k.clone());
                return false;
            }
            if rec.count as f64 >= promotion_bound {
                promoted.push((k.clone(), rec.count));
            }
            true
        });

        self.current_bucket += 1;
        self.n = 0;

        Some(Rollover { evicted, promoted })
    }
}

/// Runs the C1 worker: drains the bounded sampling channel, applies
/// [`LossyCounter::observe`], and reflects rollovers into the Partition Map.
/// Never blocks the intake path — producers use `try_send` on the channel
/// and drop samples when it's full.
pub async fn run(
    mut samples: mpsc::Receiver<String>,
    counter_config: (f64, f64),
    partition_map: std::sync::Arc<PartitionMap>,
    health: Option<health::HealthHandle>,
) {
    let (epsilon, support) = counter_config;
    let mut counter = LossyCounter::new(epsilon, support);

    while let Some(key) = samples.recv().await {
        if let Some(handle) = &health {
            handle.report_healthy().await;
        }

        if let Some(rollover) = counter.observe(&key) {
            for evicted in rollover.evicted {
                partition_map.unbind(&evicted);
                debug!(key = %evicted, "hot-key counter evicted key");
            }
            for (key, count) in rollover.promoted {
                partition_map.promote(&key, count);
                report_promotion();
                debug!(key = %key, count, "hot-key counter promoted key");
            }
        }
    }

    warn!("hot-key sampling channel closed, counter worker exiting");
}

/// Applies the drop-probability sampling policy at the call site: returns
/// `true` if `key` should be forwarded to C1.
pub fn should_sample(sample_threshold: f64) -> bool {
    rand::thread_rng().gen::<f64>() >= sample_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_width_is_floor_of_inverse_epsilon() {
        let counter = LossyCounter::new(0.1, 0.5);
        assert_eq!(counter.width, 10);
    }

    #[test]
    fn promotes_a_key_that_dominates_the_stream() {
        let mut counter = LossyCounter::new(0.1, 0.3);
        let mut last_rollover = None;
        // width = 10: inject "hot" on every call, with occasional filler so
        // the bucket actually rolls multiple times.
        for i in 0..100 {
            let key = if i % 10 == 9 { "rare" } else { "hot" };
            if let Some(rollover) = counter.observe(key) {
                last_rollover = Some(rollover);
            }
        }
        let rollover = last_rollover.expect("at least one rollover should have occurred");
        assert!(rollover
            .promoted
            .iter()
            .any(|(k, _)| k == "hot"));
    }

    #[test]
    fn evicts_keys_that_fall_below_retention_bound() {
        let mut counter = LossyCounter::new(0.5, 0.9);
        // width = 2. First bucket: insert "x" once, then a filler key to
        // roll the bucket. "x" should survive bucket 1 (inserted at offset
        // 0, decremented to 0, retained since 0+0 >= 1 is false... exercise
        // through several rollovers to confirm it eventually evicts rather
        // than panicking or growing unbounded).
        for _ in 0..50 {
            counter.observe("filler-a");
            counter.observe("filler-b");
        }
        assert!(counter.tracked_len() < 50);
    }

    #[test]
    fn single_observation_below_width_does_not_roll_over() {
        let mut counter = LossyCounter::new(0.1, 0.5);
        assert!(counter.observe("x").is_none());
        assert_eq!(counter.estimate("x"), Some(1));
    }

    #[test]
    #[should_panic]
    fn rejects_epsilon_not_below_support() {
        LossyCounter::new(0.5, 0.1);
    }

    #[test]
    fn should_sample_always_forwards_when_threshold_is_zero() {
        assert!(should_sample(0.0));
    }

    #[test]
    fn should_sample_never_forwards_when_threshold_is_one() {
        assert!(!should_sample(1.0));
    }
}
