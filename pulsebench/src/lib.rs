#![warn(missing_docs)]
//! # Pulsebench
//!
//! Statistically sound microbenchmark harness with per-run process
//! isolation.
//!
//! A measurement times a short code fragment many times across independent
//! worker processes, each with its own address space, hash seeds, and
//! layout randomization, so per-process accidents average out instead of
//! biasing one process's numbers. Loop counts are calibrated once so a
//! single timed sample lands in a target duration window; warmup samples
//! are discarded; the rest pool into a reported average ± deviation.
//! Results persist as versioned JSON documents that `show` renders and
//! `compare` judges against each other.
//!
//! ## Quick start
//!
//! ```ignore
//! pulsebench::benchmark!("vec_push", || {
//!     let mut v = Vec::with_capacity(64);
//!     for i in 0..64u64 {
//!         v.push(i);
//!     }
//!     std::hint::black_box(&v);
//! });
//!
//! fn main() {
//!     pulsebench::run().unwrap();
//! }
//! ```
//!
//! ```text
//! $ mybench measure vec_push -o vec_push.json
//! $ mybench show -m vec_push.json
//! $ mybench compare vec_push.json candidate.json
//! ```

// Core: registry, calibration, collection.
pub use pulsebench_core::{
    benchmark, calibrate, collect, find_benchmark, registered_benchmarks, BenchDef,
    CalibrationError, ExecutionError, DEFAULT_MAX_TIME, DEFAULT_MIN_TIME,
};

// Persisted documents.
pub use pulsebench_report::{
    decode, dump, encode, format_benchmark, format_comparison, format_seconds, load, Benchmark,
    MetaValue, Metadata, Run, SchemaError, Verbosity, SCHEMA_VERSION,
};

// Statistics.
pub use pulsebench_stats::{
    compare, summarize, ComparisonOutcome, IncompatibleResults, Judgment, Summary,
};

// CLI and orchestration.
pub use pulsebench_cli::{run, Cli, Orchestrator, PulseConfig, RunError, RunSpec, WorkerError};

/// Prelude for benchmark binaries.
pub mod prelude {
    pub use crate::{benchmark, run};
}
