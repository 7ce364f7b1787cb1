//! Text Rendering
//!
//! Human-readable output for the `show` and `compare` commands. Verbosity
//! controls how much of a document is printed; the one-line summary is the
//! same in every mode.

use crate::benchmark::Benchmark;
use pulsebench_stats::{ComparisonOutcome, Judgment};
use std::fmt::Write;

/// How much of a document `show` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// One line per document.
    Quiet,
    /// Summary plus run/sample counts.
    Normal,
    /// Every run's warmup and measured samples, in measurement order.
    Dump,
}

/// Format a duration in seconds with a unit matched to its magnitude.
pub fn format_seconds(secs: f64) -> String {
    if secs >= 1.0 {
        format!("{:.2} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.2} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.2} us", secs * 1e6)
    } else {
        format!("{:.1} ns", secs * 1e9)
    }
}

/// Render one document.
pub fn format_benchmark(benchmark: &Benchmark, verbosity: Verbosity, with_metadata: bool) -> String {
    let mut out = String::new();

    if with_metadata && !benchmark.metadata.is_empty() {
        out.push_str("Metadata:\n");
        for (key, value) in &benchmark.metadata {
            let _ = writeln!(out, "- {key}: {value}");
        }
        out.push('\n');
    }

    if verbosity == Verbosity::Dump {
        let divisor = (benchmark.loops.max(1) * benchmark.inner_loops.max(1)) as f64;
        for (index, run) in benchmark.runs.iter().enumerate() {
            let warmups = join_durations(&run.warmups, divisor);
            let samples = join_durations(&run.samples, divisor);
            if run.warmups.is_empty() {
                let _ = writeln!(out, "Run {}: samples ({samples})", index + 1);
            } else {
                let _ = writeln!(
                    out,
                    "Run {}: warmup ({warmups}); samples ({samples})",
                    index + 1
                );
            }
        }
        out.push('\n');
    }

    match benchmark.aggregate() {
        Some(summary) => {
            let _ = write!(
                out,
                "{}: average {} +- {}",
                benchmark.name,
                format_seconds(summary.mean),
                format_seconds(summary.std_dev)
            );
            if verbosity != Verbosity::Quiet {
                let _ = write!(
                    out,
                    " ({} run(s) x {} sample(s), {} loop(s))",
                    benchmark.runs.len(),
                    benchmark.samples_per_run,
                    benchmark.loops
                );
            }
            out.push('\n');
        }
        None => {
            let _ = writeln!(out, "{}: no measured samples", benchmark.name);
        }
    }

    out
}

/// Render a comparison of candidate against baseline.
pub fn format_comparison(outcome: &ComparisonOutcome, baseline: &str, candidate: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Average: {} {} +- {} -> {} {} +- {}",
        baseline,
        format_seconds(outcome.baseline.mean),
        format_seconds(outcome.baseline.std_dev),
        candidate,
        format_seconds(outcome.candidate.mean),
        format_seconds(outcome.candidate.std_dev)
    );

    match outcome.judgment {
        Judgment::Indistinguishable => {
            let _ = writeln!(
                out,
                "Judgment: indistinguishable (average +- deviation intervals overlap)"
            );
        }
        Judgment::Slower => {
            let _ = writeln!(out, "Judgment: {} is {:.2}x slower", candidate, outcome.ratio);
        }
        Judgment::Faster => {
            let _ = writeln!(
                out,
                "Judgment: {} is {:.2}x faster",
                candidate,
                1.0 / outcome.ratio
            );
        }
    }

    out
}

fn join_durations(durations: &[f64], divisor: f64) -> String {
    durations
        .iter()
        .map(|d| format_seconds(d / divisor))
        .collect::<Vec<_>>()
        .join(", ")
}
