#![warn(missing_docs)]
//! Pulsebench Core - Worker Runtime
//!
//! Everything that runs inside a measurement worker process:
//! - wall-clock timing and CPU-affinity pinning
//! - loop-count calibration
//! - sample collection (warmup + measured sequences)
//! - the benchmark registry and the worker main loop

mod calibrate;
mod collect;
mod measure;
mod worker;

pub use calibrate::{calibrate, CalibrationError, DEFAULT_MAX_TIME, DEFAULT_MIN_TIME};
pub use collect::{collect, ExecutionError};
pub use measure::{clock_resolution, pin_to_cpu, Timer};
pub use worker::WorkerMain;

/// Benchmark definition registered via [`benchmark!`].
#[derive(Debug, Clone)]
pub struct BenchDef {
    /// Unique identifier, used to select the benchmark on the CLI.
    pub id: &'static str,
    /// Zero-argument callable performing exactly the work under test.
    pub runner_fn: fn(),
    /// Repetitions of the work folded into the callable's own body.
    /// Consumers divide timed durations by `loops * inner_loops`.
    pub inner_loops: u64,
    /// Source file of the registration.
    pub file: &'static str,
    /// Source line of the registration.
    pub line: u32,
}

inventory::collect!(BenchDef);

/// Look up a registered benchmark by id.
pub fn find_benchmark(id: &str) -> Option<&'static BenchDef> {
    inventory::iter::<BenchDef>.into_iter().find(|b| b.id == id)
}

/// Iterate all registered benchmarks.
pub fn registered_benchmarks() -> impl Iterator<Item = &'static BenchDef> {
    inventory::iter::<BenchDef>.into_iter()
}

#[doc(hidden)]
pub use inventory;

/// Register a benchmark with the harness.
///
/// The body must be a non-capturing closure (or `fn()`), invoked `loops`
/// times per timed measurement:
///
/// ```ignore
/// pulsebench::benchmark!("vec_push", || {
///     let mut v = Vec::with_capacity(64);
///     for i in 0..64u64 {
///         v.push(i);
///     }
///     std::hint::black_box(&v);
/// });
/// ```
///
/// An optional second argument declares repetitions already folded into the
/// body: `benchmark!("memcpy_x16", 16, || { ... })`.
#[macro_export]
macro_rules! benchmark {
    ($id:expr, $body:expr) => {
        $crate::benchmark!($id, 1, $body);
    };
    ($id:expr, $inner_loops:expr, $body:expr) => {
        $crate::inventory::submit! {
            $crate::BenchDef {
                id: $id,
                runner_fn: $body,
                inner_loops: $inner_loops,
                file: ::core::file!(),
                line: ::core::line!(),
            }
        }
    };
}

/// Anchor to prevent LTO from stripping registry entries.
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || {
    for _ in inventory::iter::<BenchDef> {}
};

#[cfg(test)]
mod tests {
    use super::*;

    crate::benchmark!("registry_smoke", || {
        std::hint::black_box(1u64 + 1);
    });

    #[test]
    fn registered_benchmark_is_discoverable() {
        let bench = find_benchmark("registry_smoke").expect("registered above");
        assert_eq!(bench.inner_loops, 1);
        assert!(bench.file.ends_with("lib.rs"));
    }

    #[test]
    fn unknown_id_is_none() {
        assert!(find_benchmark("no_such_benchmark").is_none());
    }
}
