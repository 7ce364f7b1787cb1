//! Protocol Messages
//!
//! The orchestrator sends one command per step; the worker answers with
//! exactly one reply. Durations travel as f64 seconds, the unit used
//! everywhere downstream.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// A metadata value: free-form string or number. The harness never
/// interprets these; they are attached verbatim to the persisted document.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum MetaValue {
    /// Text value.
    Str(String),
    /// Integer value.
    Int(u64),
    /// Floating-point value.
    Float(f64),
}

/// One key/value pair of a metadata snapshot.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct MetaEntry {
    /// Metadata key.
    pub key: String,
    /// Metadata value.
    pub value: MetaValue,
}

/// One worker process's full measurement contribution.
///
/// Both duration sequences are in measurement order; each entry covers
/// `loops` invocations of the callable under test.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerRun {
    /// Leading warmup durations in seconds, excluded from aggregation.
    pub warmups: Vec<f64>,
    /// Measured durations in seconds.
    pub samples: Vec<f64>,
    /// Loop count each duration covers.
    pub loops: u64,
    /// Process-local metadata snapshot.
    pub metadata: Vec<MetaEntry>,
}

/// Commands sent from the orchestrator to a worker.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerCommand {
    /// Determine a loop count that lands one timed trial inside the
    /// `[min_time_ns, max_time_ns]` window.
    Calibrate {
        /// Registered benchmark identifier.
        bench_id: String,
        /// Lower edge of the window, nanoseconds.
        min_time_ns: u64,
        /// Upper edge of the window, nanoseconds.
        max_time_ns: u64,
        /// CPU to pin the worker to before measuring.
        pin_cpu: Option<u32>,
    },

    /// Collect one run: `warmups + samples` timed measurements of
    /// `loops` invocations each.
    Collect {
        /// Registered benchmark identifier.
        bench_id: String,
        /// Fixed loop count, shared by every worker of a result.
        loops: u64,
        /// Leading measurements to tag as warmup.
        warmups: u32,
        /// Measurements to keep.
        samples: u32,
        /// CPU to pin the worker to before measuring.
        pin_cpu: Option<u32>,
    },

    /// Exit the worker main loop.
    Shutdown,
}

/// Replies sent from a worker to the orchestrator.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerReply {
    /// Handshake, sent once at startup.
    Hello {
        /// Must match [`crate::PROTOCOL_VERSION`].
        protocol_version: u32,
    },

    /// Calibration finished.
    Calibrated {
        /// Smallest power-of-two loop count reaching the window floor.
        loops: u64,
    },

    /// Collection finished.
    Run(WorkerRun),

    /// The commanded step failed. No partial run accompanies this.
    Failure {
        /// Failure category.
        kind: FaultKind,
        /// Human-readable cause.
        message: String,
        /// Index of the measurement that faulted, when applicable.
        index: Option<u32>,
    },
}

/// Categories of worker-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FaultKind {
    /// The callable under test panicked during a measurement.
    Panic,
    /// The callable cannot be brought into the calibration window.
    Calibration,
    /// The commanded benchmark id is not registered in this binary.
    UnknownBenchmark,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_run_holds_shape() {
        let run = WorkerRun {
            warmups: vec![0.2, 0.19],
            samples: vec![0.18, 0.18, 0.19],
            loops: 256,
            metadata: vec![MetaEntry {
                key: "pid".to_string(),
                value: MetaValue::Int(4242),
            }],
        };
        assert_eq!(run.warmups.len(), 2);
        assert_eq!(run.samples.len(), 3);
        assert_eq!(run.metadata[0].key, "pid");
    }

    #[test]
    fn meta_value_variants() {
        assert_eq!(MetaValue::Int(3), MetaValue::Int(3));
        assert_ne!(
            MetaValue::Str("a".to_string()),
            MetaValue::Str("b".to_string())
        );
        assert_eq!(MetaValue::Float(1.5), MetaValue::Float(1.5));
    }
}
