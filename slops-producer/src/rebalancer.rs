//! C3: the periodic load-equalization pass over the Partition Map.
//!
//! Grounded on `SLOPSProducer/internal/metadata.go`'s `Rebalance` /
//! `partitionSets` / `migrationCandidates` / `targetMatch`, with the
//! non-worsening predicate fixed to one stable inequality rather than the
//! several variants that show up across the Go source's history.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::partition_map::{KeyRecord, PartitionId, PartitionMap};
use crate::prometheus::report_migration;

#[derive(Debug, Clone)]
pub struct RebalancerConfig {
    /// Minimum `(max-min)/min` percentage required to trigger a pass.
    pub load_imbalance_tolerance: u64,
    /// Anti-flap minimum interval between migrations of the same key.
    pub migration_interval: Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub migrations: Vec<(String, PartitionId, PartitionId)>,
}

/// Runs the rebalancer worker: fires on `interval`, taking exclusive
/// Partition Map access only for the apply phase of each pass.
pub async fn run(
    partition_map: std::sync::Arc<PartitionMap>,
    config: RebalancerConfig,
    mut interval: tokio::time::Interval,
    health: Option<health::HealthHandle>,
) {
    loop {
        interval.tick().await;
        if let Some(handle) = &health {
            handle.report_healthy().await;
        }
        let outcome = run_pass(&partition_map, &config);
        if !outcome.migrations.is_empty() {
            info!(count = outcome.migrations.len(), "rebalance pass migrated keys");
        }
    }
}

/// A single rebalance pass, pure enough to unit test directly against a
/// [`PartitionMap`]. Analysis runs over a snapshot; only `migrate` calls
/// touch the map's exclusive lock, one key at a time.
pub fn run_pass(partition_map: &PartitionMap, config: &RebalancerConfig) -> PassOutcome {
    let snapshot = partition_map.snapshot();
    let partitions = snapshot.len() as u32;

    let mut weights: Vec<u64> = snapshot
        .iter()
        .map(|keys| keys.values().map(|r| r.count).sum())
        .collect();

    let total: u64 = weights.iter().sum();
    let avg = total as f64 / partitions as f64;

    let max_weight = *weights.iter().max().unwrap_or(&0);
    let min_weight = *weights.iter().min().unwrap_or(&0);

    if min_weight == 0 {
        if max_weight == 0 {
            return PassOutcome::default();
        }
    } else if (max_weight - min_weight) as f64 / min_weight as f64 < config.load_imbalance_tolerance as f64 / 100.0 {
        return PassOutcome::default();
    }

    let lt: Vec<PartitionId> = (0..partitions).filter(|&p| (weights[p as usize] as f64) < avg).collect();
    let gt: Vec<PartitionId> = (0..partitions).filter(|&p| (weights[p as usize] as f64) > avg).collect();

    let now = Instant::now();
    let mut outcome = PassOutcome::default();

    for &p in &gt {
        if weights[p as usize] as f64 <= avg {
            continue;
        }

        let mut candidates = migration_candidates(&snapshot[p as usize], weights[p as usize], avg, config.migration_interval, now);
        candidates.sort_by_key(|(_, count)| *count);

        for (key, w) in candidates {
            if weights[p as usize] as f64 <= avg {
                break;
            }

            let target = target_match(&lt, &weights, p, w, avg);
            let Some(q) = target else { continue };

            partition_map.migrate(&key, q);
            weights[p as usize] -= w;
            weights[q as usize] += w;
            report_migration();
            outcome.migrations.push((key.clone(), p, q));
            debug!(key = %key, from = p, to = q, weight = w, "rebalancer migrated key");
        }
    }

    outcome
}

fn migration_candidates(
    partition: &HashMap<String, KeyRecord>,
    partition_weight: u64,
    avg: f64,
    migration_interval: Duration,
    now: Instant,
) -> Vec<(String, u64)> {
    let diff = partition_weight as f64 - avg;
    partition
        .values()
        .filter(|rec| now.duration_since(rec.last_migrated) >= migration_interval)
        .filter(|rec| rec.count as f64 <= diff)
        .map(|rec| (rec.key.clone(), rec.count))
        .collect()
}

/// Best-fit destination among `lt` for a candidate of weight `w` leaving
/// partition `src` (whose pre-move weight is `weights[src]`). Non-worsening
/// rule: the destination must never end up heavier than the source was
/// before the move.
fn target_match(
    lt: &[PartitionId],
    weights: &[u64],
    src: PartitionId,
    w: u64,
    avg: f64,
) -> Option<PartitionId> {
    let src_weight = weights[src as usize] as i64;
    lt.iter()
        .copied()
        .filter(|&q| weights[q as usize] < weights[src as usize])
        .filter(|&q| {
            let dest_weight = weights[q as usize] as i64;
            src_weight - w as i64 >= dest_weight + w as i64
        })
        .min_by(|&a, &b| {
            let score_a = (weights[a as usize] as f64 + w as f64 - avg).abs();
            let score_b = (weights[b as usize] as f64 + w as f64 - avg).abs();
            score_a.partial_cmp(&score_b).unwrap()
        })
}
