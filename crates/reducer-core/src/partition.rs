//! Partitioner (§4.A): maps `(bucket, period, op)` to `(partition, epoch)`
//! destinations, used both for store sharding and for sink routing.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, TimeZone, Utc};
use dashmap::DashMap;

/// One partition/epoch destination for a logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub partition: u32,
    pub epoch: i64,
}

/// Maps a timestamp (ms since epoch) to a `YYYYMM` integer epoch.
pub fn period(time_ms: i64) -> i64 {
    let dt = Utc.timestamp_millis_opt(time_ms).single().unwrap_or_else(Utc::now);
    (dt.year() as i64) * 100 + dt.month() as i64
}

/// Deterministic FNV-1a hash of `key` folded into `[0, modulus)`.
///
/// This is the `bucket → integer` step of §4.A: a stable, evenly
/// distributed mapping from an arbitrary key string to a small integer,
/// used to size-bound the partition space before `forward`/`balance`
/// picks a destination within it.
pub fn bucket(key: &str, modulus: u32) -> u32 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % modulus.max(1) as u64) as u32
}

/// Maps `(bucket, period, op)` to partition/epoch destinations.
pub trait Partitioner: Send + Sync {
    /// All destinations `forward` would address for this bucket/period.
    fn forward(&self, key: &str, time_ms: i64) -> Vec<Destination>;

    /// Picks one destination via round-robin on `op`.
    fn balance(&self, key: &str, time_ms: i64, op: &str) -> Destination;
}

/// `N ≤ 1` short-circuit: every key maps to partition 0.
pub struct NoPartition;

impl Partitioner for NoPartition {
    fn forward(&self, _key: &str, time_ms: i64) -> Vec<Destination> {
        vec![Destination {
            partition: 0,
            epoch: period(time_ms),
        }]
    }

    fn balance(&self, key: &str, time_ms: i64, _op: &str) -> Destination {
        self.forward(key, time_ms)[0]
    }
}

/// Standard partitioner used for outputs: a forward function over `n`
/// shards, with round-robin balancing per `op`.
pub struct StandardPartitioner {
    n: u32,
    op_counters: DashMap<String, AtomicU32>,
}

impl StandardPartitioner {
    pub fn new(n: u32) -> Self {
        StandardPartitioner {
            n: n.max(1),
            op_counters: DashMap::new(),
        }
    }
}

impl Partitioner for StandardPartitioner {
    fn forward(&self, key: &str, time_ms: i64) -> Vec<Destination> {
        let epoch = period(time_ms);
        (0..self.n).map(|partition| Destination { partition, epoch }).collect()
    }

    fn balance(&self, key: &str, time_ms: i64, op: &str) -> Destination {
        let destinations = self.forward(key, time_ms);
        let counter = self
            .op_counters
            .entry(op.to_string())
            .or_insert_with(|| AtomicU32::new(0));
        let i = counter.fetch_add(1, Ordering::SeqCst) % destinations.len() as u32;
        destinations[i as usize]
    }
}

/// Single-db partitioner used for inputs: one partition per app instance,
/// epoch per month. `instance` is this process's fixed partition id.
pub struct SingleDbPartitioner {
    instance: u32,
}

impl SingleDbPartitioner {
    pub fn new(instance: u32) -> Self {
        SingleDbPartitioner { instance }
    }
}

impl Partitioner for SingleDbPartitioner {
    fn forward(&self, _key: &str, time_ms: i64) -> Vec<Destination> {
        vec![Destination {
            partition: self.instance,
            epoch: period(time_ms),
        }]
    }

    fn balance(&self, key: &str, time_ms: i64, _op: &str) -> Destination {
        self.forward(key, time_ms)[0]
    }
}

/// Constructs the appropriate output partitioner for a shard count,
/// applying the `N ≤ 1` short-circuit (§4.A).
pub fn output_partitioner(n: u32) -> Box<dyn Partitioner> {
    if n <= 1 {
        Box::new(NoPartition)
    } else {
        Box::new(StandardPartitioner::new(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_extracts_yyyymm() {
        // 2023-11-14T22:13:20Z
        assert_eq!(period(1_700_000_000_000), 202311);
    }

    #[test]
    fn no_partition_always_picks_zero() {
        let p = NoPartition;
        assert_eq!(p.balance("o1", 1_700_000_000_000, "write").partition, 0);
    }

    #[test]
    fn standard_partitioner_round_robins_independently_per_op() {
        let p = StandardPartitioner::new(4);
        let writes: Vec<_> = (0..4).map(|_| p.balance("o1", 0, "write").partition).collect();
        assert_eq!(writes, vec![0, 1, 2, 3]);
        // a fresh op gets its own counter, starting back at partition 0.
        assert_eq!(p.balance("o1", 0, "read").partition, 0);
    }

    #[test]
    fn bucket_is_deterministic() {
        assert_eq!(bucket("o1", 4096), bucket("o1", 4096));
    }
}
