//! Benchmark Document Model
//!
//! A `Benchmark` is the top-level persisted artifact: one run per worker
//! process plus the shared metadata snapshot. Aggregated statistics are
//! derived on demand and never stored in the document, so a reloaded file
//! always reports exactly what its raw samples say.

use pulsebench_stats::{summarize, Summary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version of the persisted document format.
pub const SCHEMA_VERSION: u32 = 1;

/// Metadata value: free-form string or number.
///
/// Untagged, so documents carry plain JSON scalars. Integers are tried
/// first so `3` stays an integer while `3.5` becomes a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Integer value.
    Int(u64),
    /// Floating-point value.
    Float(f64),
    /// Text value.
    Str(String),
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Opaque environment mapping attached to a document or a run. The harness
/// records and displays it but never interprets its contents.
pub type Metadata = BTreeMap<String, MetaValue>;

/// One worker process's contribution to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Warmup durations in seconds, in measurement order. Never aggregated.
    #[serde(default)]
    pub warmups: Vec<f64>,
    /// Measured durations in seconds, in measurement order.
    pub samples: Vec<f64>,
    /// Loop count each duration covers. Identical across all runs of a
    /// document.
    pub loops: u64,
    /// Process-local metadata snapshot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Fields this version does not know about, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The persisted benchmark result: every worker run plus shared metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    /// Schema version of the persisted form.
    pub version: u32,
    /// Benchmark label.
    pub name: String,
    /// Calibrated loop count, fixed before any run was collected.
    pub loops: u64,
    /// Repetitions folded into the callable's own body.
    #[serde(default = "default_inner_loops")]
    pub inner_loops: u64,
    /// Warmup measurements per run.
    pub warmups: u32,
    /// Measured samples per run.
    pub samples_per_run: u32,
    /// Worker process count; also the number of runs.
    pub processes: u32,
    /// Shared metadata, collected once before any worker was spawned.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Runs in worker spawn order.
    pub runs: Vec<Run>,
    /// Fields this version does not know about, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_inner_loops() -> u64 {
    1
}

impl Benchmark {
    /// Pooled per-iteration durations across all runs, warmups excluded.
    ///
    /// Each raw sample covers `loops × inner_loops` iterations and is
    /// divided down to the cost of one, which makes documents with
    /// different loop counts comparable.
    pub fn per_iteration_values(&self) -> Vec<f64> {
        self.runs
            .iter()
            .flat_map(|run| {
                let divisor = (run.loops.max(1) * self.inner_loops.max(1)) as f64;
                run.samples.iter().map(move |v| v / divisor)
            })
            .collect()
    }

    /// Recompute the reported average and deviation. `None` when the
    /// document has no measured samples.
    pub fn aggregate(&self) -> Option<Summary> {
        summarize(&self.per_iteration_values())
    }

    /// Total measured samples across all runs.
    pub fn sample_count(&self) -> usize {
        self.runs.iter().map(|run| run.samples.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(loops: u64, samples: Vec<Vec<f64>>) -> Benchmark {
        let samples_per_run = samples.first().map(|s| s.len()).unwrap_or(0) as u32;
        let processes = samples.len() as u32;
        Benchmark {
            version: SCHEMA_VERSION,
            name: "test".to_string(),
            loops,
            inner_loops: 1,
            warmups: 0,
            samples_per_run,
            processes,
            metadata: Metadata::new(),
            runs: samples
                .into_iter()
                .map(|samples| Run {
                    warmups: Vec::new(),
                    samples,
                    loops,
                    metadata: Metadata::new(),
                    extra: serde_json::Map::new(),
                })
                .collect(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn aggregate_pools_across_runs() {
        let bench = document(1, vec![vec![10e-9, 10e-9], vec![10e-9, 10e-9]]);
        let summary = bench.aggregate().unwrap();
        assert_eq!(summary.mean, 10e-9);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.count, 4);
    }

    #[test]
    fn warmups_are_excluded_from_the_pool() {
        let mut bench = document(1, vec![vec![10e-9, 10e-9]]);
        bench.warmups = 1;
        bench.runs[0].warmups = vec![99.0];
        let summary = bench.aggregate().unwrap();
        assert_eq!(summary.mean, 10e-9);
        assert_eq!(summary.count, 2);
    }

    #[test]
    fn normalization_is_loop_count_independent() {
        // Same 10 ns per-iteration cost measured at loops=4 and loops=8.
        let four = document(4, vec![vec![40e-9, 40e-9, 40e-9]]);
        let eight = document(8, vec![vec![80e-9, 80e-9, 80e-9]]);

        let a = four.aggregate().unwrap();
        let b = eight.aggregate().unwrap();
        assert!((a.mean - b.mean).abs() < 1e-18);
        assert!((a.mean - 10e-9).abs() < 1e-18);
    }

    #[test]
    fn inner_loops_divide_the_reported_cost() {
        let mut bench = document(2, vec![vec![40e-9]]);
        bench.inner_loops = 10;
        let summary = bench.aggregate().unwrap();
        assert!((summary.mean - 2e-9).abs() < 1e-18);
    }

    #[test]
    fn empty_document_has_no_aggregate() {
        let bench = document(1, vec![]);
        assert!(bench.aggregate().is_none());
        assert_eq!(bench.sample_count(), 0);
    }
}
