#![warn(missing_docs)]
//! Pulsebench CLI
//!
//! CLI infrastructure for benchmark binaries. Call [`run()`] from your
//! binary's `main` to get the full harness: `measure` spawns isolated
//! worker processes and writes a persisted document, `show` and `compare`
//! read documents back, `list` and `metadata` inspect the environment.
//!
//! # Example
//!
//! ```ignore
//! pulsebench::benchmark!("vec_push", || {
//!     // code under test
//! });
//!
//! fn main() {
//!     pulsebench::run().unwrap();
//! }
//! ```

mod config;
mod metadata;
mod supervisor;

pub use config::{OutputConfig, PulseConfig, RunnerConfig};
pub use metadata::collect as collect_metadata;
pub use supervisor::{Orchestrator, RunError, RunSpec, WorkerError};

use clap::{Parser, Subcommand};
use pulsebench_core::{find_benchmark, registered_benchmarks, WorkerMain};
use pulsebench_report::{
    format_benchmark, format_comparison, Benchmark, SchemaError, Verbosity,
};
use pulsebench_stats::{compare, IncompatibleResults};
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pulsebench CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "pulsebench")]
#[command(author, version, about = "Pulsebench - process-isolated microbenchmark harness")]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<PulseCommand>,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: run as a measurement worker (used by the orchestrator).
    #[arg(long, hide = true)]
    pub pulse_worker: bool,

    /// Internal: absorb cargo bench's --bench flag.
    #[arg(long, hide = true)]
    pub bench: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum PulseCommand {
    /// Measure a registered benchmark across isolated worker processes.
    Measure {
        /// Identifier of the registered benchmark.
        bench_id: String,

        /// Worker processes to spawn (one run each).
        #[arg(short, long)]
        processes: Option<u32>,

        /// Measured samples per process.
        #[arg(short = 'n', long)]
        samples: Option<u32>,

        /// Warmup samples per process (discarded).
        #[arg(short, long)]
        warmups: Option<u32>,

        /// Fixed loop count; omitting it calibrates once before spawning.
        #[arg(short, long)]
        loops: Option<u64>,

        /// Lower edge of the calibration window (e.g. "100ms").
        #[arg(long)]
        min_time: Option<String>,

        /// Upper edge of the calibration window (e.g. "1s").
        #[arg(long)]
        max_time: Option<String>,

        /// Per-worker timeout (e.g. "60s").
        #[arg(long)]
        timeout: Option<String>,

        /// Parallel worker slots (1 = sequential, quietest timings).
        #[arg(short, long)]
        jobs: Option<usize>,

        /// CPUs to pin workers to, round-robin (e.g. "0,2,4").
        #[arg(long, value_delimiter = ',')]
        affinity: Option<Vec<u32>>,

        /// Label stored in the document (defaults to the benchmark id).
        #[arg(long)]
        name: Option<String>,

        /// Write the document to FILE.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render persisted benchmark documents.
    Show {
        /// Show attached metadata.
        #[arg(short = 'm', long)]
        metadata: bool,

        /// Dump every run's warmup and measured samples.
        #[arg(short, long)]
        dump: bool,

        /// One line per document.
        #[arg(short, long, conflicts_with = "dump")]
        quiet: bool,

        /// Document files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Compare two documents, candidate against baseline. Either filename
    /// may be `-` to read that document from standard input.
    Compare {
        /// Baseline document.
        baseline: PathBuf,
        /// Candidate document.
        candidate: PathBuf,
    },

    /// List registered benchmarks.
    List {
        /// Regex filter on benchmark ids.
        #[arg(default_value = ".*")]
        filter: String,
    },

    /// Print the metadata snapshot a new document would carry.
    Metadata,
}

/// Run the pulsebench CLI. This is the entry point for benchmark binaries;
/// on failure it prints the error and exits with a code that identifies the
/// failure class.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match run_with_cli(cli) {
        Ok(()) => Ok(()),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

/// Run the CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Worker mode comes first: a worker must not initialize logging or
    // touch configuration before handing the pipes to the protocol.
    if cli.pulse_worker {
        return run_worker_mode();
    }

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pulsebench=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("pulsebench=warn")
            .init();
    }

    let config = PulseConfig::discover().unwrap_or_default();

    let Some(command) = cli.command else {
        anyhow::bail!("no command given (try --help)");
    };

    match command {
        PulseCommand::Measure {
            bench_id,
            processes,
            samples,
            warmups,
            loops,
            min_time,
            max_time,
            timeout,
            jobs,
            affinity,
            name,
            output,
        } => cmd_measure(
            &config,
            MeasureArgs {
                bench_id,
                processes,
                samples,
                warmups,
                loops,
                min_time,
                max_time,
                timeout,
                jobs,
                affinity,
                name,
                output,
            },
        ),
        PulseCommand::Show {
            metadata,
            dump,
            quiet,
            files,
        } => cmd_show(&files, metadata, dump, quiet),
        PulseCommand::Compare {
            baseline,
            candidate,
        } => cmd_compare(&baseline, &candidate),
        PulseCommand::List { filter } => cmd_list(&filter),
        PulseCommand::Metadata => cmd_metadata(),
    }
}

/// Map a failure to its exit code: calibration 2, failed run 3, schema 4,
/// incomparable documents 5, anything else 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(run_err) = err.downcast_ref::<RunError>() {
        return match run_err {
            RunError::Calibration(_) => 2,
            RunError::RunFailed { .. } => 3,
            RunError::Pool(_) => 1,
        };
    }
    if err.downcast_ref::<SchemaError>().is_some() {
        return 4;
    }
    if err.downcast_ref::<IncompatibleResults>().is_some() {
        return 5;
    }
    1
}

fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("worker error: {}", e))
}

struct MeasureArgs {
    bench_id: String,
    processes: Option<u32>,
    samples: Option<u32>,
    warmups: Option<u32>,
    loops: Option<u64>,
    min_time: Option<String>,
    max_time: Option<String>,
    timeout: Option<String>,
    jobs: Option<usize>,
    affinity: Option<Vec<u32>>,
    name: Option<String>,
    output: Option<PathBuf>,
}

fn cmd_measure(config: &PulseConfig, args: MeasureArgs) -> anyhow::Result<()> {
    let Some(bench) = find_benchmark(&args.bench_id) else {
        let known: Vec<&str> = registered_benchmarks().map(|b| b.id).collect();
        anyhow::bail!(
            "no registered benchmark named {:?} (known: {})",
            args.bench_id,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        );
    };

    let runner = &config.runner;
    let min_time =
        PulseConfig::parse_duration(args.min_time.as_deref().unwrap_or(&runner.min_time))?;
    let max_time =
        PulseConfig::parse_duration(args.max_time.as_deref().unwrap_or(&runner.max_time))?;
    if min_time > max_time {
        anyhow::bail!(
            "calibration window is inverted: min {min_time:?} exceeds max {max_time:?}"
        );
    }
    let timeout = PulseConfig::parse_duration(args.timeout.as_deref().unwrap_or(&runner.timeout))?;

    let spec = RunSpec {
        name: args.name.unwrap_or_else(|| args.bench_id.clone()),
        bench_id: args.bench_id,
        processes: args.processes.unwrap_or(runner.processes).max(1),
        samples: args.samples.unwrap_or(runner.samples).max(1),
        warmups: args.warmups.unwrap_or(runner.warmups),
        loops: args.loops.or(runner.loops),
        inner_loops: bench.inner_loops.max(1),
        min_time,
        max_time,
    };

    let jobs = args.jobs.or(runner.jobs).unwrap_or(1);
    let affinity = args.affinity.or_else(|| runner.affinity.clone());

    let orchestrator = Orchestrator::new(spec, timeout, jobs, affinity);
    let benchmark = orchestrator.run()?;

    print!("{}", format_benchmark(&benchmark, Verbosity::Normal, false));

    let output = args
        .output
        .or_else(|| config.output.path.as_ref().map(PathBuf::from));
    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        pulsebench_report::dump(&benchmark, &path)?;
        eprintln!("Result written to: {}", path.display());
    }

    Ok(())
}

fn cmd_show(files: &[PathBuf], metadata: bool, dump: bool, quiet: bool) -> anyhow::Result<()> {
    let verbosity = if dump {
        Verbosity::Dump
    } else if quiet {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    };

    for (index, path) in files.iter().enumerate() {
        if files.len() > 1 {
            if index > 0 {
                println!();
            }
            println!("[ {} ]", path.display());
        }
        let benchmark = load_document(path)?;
        print!("{}", format_benchmark(&benchmark, verbosity, metadata));
    }

    Ok(())
}

fn cmd_compare(baseline_path: &Path, candidate_path: &Path) -> anyhow::Result<()> {
    let baseline = load_document(baseline_path)?;
    let candidate = load_document(candidate_path)?;

    let outcome = compare(
        &baseline.per_iteration_values(),
        &candidate.per_iteration_values(),
    )?;

    print!(
        "{}",
        format_comparison(&outcome, &baseline.name, &candidate.name)
    );
    Ok(())
}

fn cmd_list(filter: &str) -> anyhow::Result<()> {
    let filter = Regex::new(filter)
        .map_err(|e| anyhow::anyhow!("invalid filter regex: {e}"))?;

    let mut benches: Vec<_> = registered_benchmarks()
        .filter(|b| filter.is_match(b.id))
        .collect();
    benches.sort_by_key(|b| b.id);

    for bench in &benches {
        println!("{} ({}:{})", bench.id, bench.file, bench.line);
    }
    println!("{} benchmark(s) found.", benches.len());
    Ok(())
}

fn cmd_metadata() -> anyhow::Result<()> {
    for (key, value) in collect_metadata() {
        println!("- {key}: {value}");
    }
    Ok(())
}

/// Load a document from a file, or from standard input when the path is
/// the `-` placeholder.
fn load_document(path: &Path) -> anyhow::Result<Benchmark> {
    if path.as_os_str() == "-" {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        let benchmark = pulsebench_report::decode(&bytes)?;
        return Ok(benchmark);
    }
    let benchmark = pulsebench_report::load(path)
        .map_err(|e| anyhow::Error::new(e).context(format!("document {}", path.display())))?;
    Ok(benchmark)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_identify_the_failure_class() {
        let calibration: anyhow::Error = RunError::Calibration("too slow".into()).into();
        assert_eq!(exit_code_for(&calibration), 2);

        let failed: anyhow::Error = RunError::RunFailed {
            worker: 3,
            cause: WorkerError::Crashed("gone".into()),
        }
        .into();
        assert_eq!(exit_code_for(&failed), 3);

        let schema: anyhow::Error = SchemaError::MissingVersion.into();
        assert_eq!(exit_code_for(&schema), 4);

        let incompatible: anyhow::Error = IncompatibleResults::EmptyBaseline.into();
        assert_eq!(exit_code_for(&incompatible), 5);

        let other = anyhow::anyhow!("anything else");
        assert_eq!(exit_code_for(&other), 1);
    }

    #[test]
    fn exit_code_survives_added_context() {
        let err = anyhow::Error::new(SchemaError::MissingVersion).context("document a.json");
        assert_eq!(exit_code_for(&err), 4);
    }

    #[test]
    fn cli_parses_a_measure_invocation() {
        let cli = Cli::try_parse_from([
            "pulsebench",
            "measure",
            "vec_push",
            "-p",
            "4",
            "-n",
            "5",
            "--loops",
            "128",
            "-o",
            "out.json",
        ])
        .unwrap();

        match cli.command {
            Some(PulseCommand::Measure {
                bench_id,
                processes,
                samples,
                loops,
                output,
                ..
            }) => {
                assert_eq!(bench_id, "vec_push");
                assert_eq!(processes, Some(4));
                assert_eq!(samples, Some(5));
                assert_eq!(loops, Some(128));
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_compare_with_stdin_placeholder() {
        let cli = Cli::try_parse_from(["pulsebench", "compare", "-", "b.json"]).unwrap();
        match cli.command {
            Some(PulseCommand::Compare {
                baseline,
                candidate,
            }) => {
                assert_eq!(baseline, PathBuf::from("-"));
                assert_eq!(candidate, PathBuf::from("b.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_accepts_the_hidden_worker_flag() {
        let cli = Cli::try_parse_from(["pulsebench", "--pulse-worker"]).unwrap();
        assert!(cli.pulse_worker);
        assert!(cli.command.is_none());
    }
}
