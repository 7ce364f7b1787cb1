//! Process Orchestration
//!
//! Spawns one isolated worker process per run and merges their reports into
//! a single document. Isolation is the point: each worker gets its own
//! address space, hash seeds, and layout randomization, so per-process
//! accidents average out across runs instead of biasing a single process's
//! numbers.
//!
//! Workers are the benchmark binary re-invoked with `--pulse-worker`,
//! talking rkyv frames over a dedicated pipe pair (fds 3/4 in the child).
//! Loop-count calibration happens exactly once, in a dedicated worker,
//! before any run is collected; every run then shares the same loop count.
//! Any worker failure aborts the whole measurement: a document either
//! carries every run it promises or does not exist.

use crate::metadata;
use indicatif::{ProgressBar, ProgressStyle};
use pulsebench_ipc::{
    FaultKind, FrameError, FrameReader, FrameWriter, WorkerCommand, WorkerReply, WorkerRun,
    IPC_FD_ENV, PROTOCOL_VERSION,
};
use pulsebench_report::{Benchmark, MetaValue, Metadata, Run, SCHEMA_VERSION};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// What to measure and how. Counts mirror the persisted document fields.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Registered benchmark identifier.
    pub bench_id: String,
    /// Label stored in the document.
    pub name: String,
    /// Worker processes to spawn (one run each).
    pub processes: u32,
    /// Measured samples per run.
    pub samples: u32,
    /// Warmup samples per run.
    pub warmups: u32,
    /// Fixed loop count; `None` calibrates once before spawning.
    pub loops: Option<u64>,
    /// Repetitions folded into the callable's body.
    pub inner_loops: u64,
    /// Lower edge of the calibration window.
    pub min_time: Duration,
    /// Upper edge of the calibration window.
    pub max_time: Duration,
}

impl RunSpec {
    /// A spec with the default counts for the given benchmark id.
    pub fn new(bench_id: impl Into<String>) -> Self {
        let bench_id = bench_id.into();
        Self {
            name: bench_id.clone(),
            bench_id,
            processes: 25,
            samples: 3,
            warmups: 1,
            loops: None,
            inner_loops: 1,
            min_time: pulsebench_core::DEFAULT_MIN_TIME,
            max_time: pulsebench_core::DEFAULT_MAX_TIME,
        }
    }
}

/// Failure of one worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The channel to the worker broke.
    #[error("channel error: {0}")]
    Channel(String),

    /// The worker exited or closed its channel without replying.
    #[error("worker crashed: {0}")]
    Crashed(String),

    /// The worker exceeded its deadline and was killed.
    #[error("worker exceeded the {0:?} timeout")]
    Timeout(Duration),

    /// The worker sent something other than the expected reply.
    #[error("protocol error: expected {expected}, got {got}")]
    Protocol {
        /// Reply the orchestrator was waiting for.
        expected: String,
        /// Reply that actually arrived.
        got: String,
    },

    /// The callable under test faulted inside the worker.
    #[error("{0}")]
    Execution(String),

    /// The worker does not know the requested benchmark id.
    #[error("{0}")]
    UnknownBenchmark(String),

    /// The callable cannot be brought into the calibration window.
    #[error("{0}")]
    Calibration(String),
}

impl From<FrameError> for WorkerError {
    fn from(e: FrameError) -> Self {
        WorkerError::Channel(e.to_string())
    }
}

/// Orchestration failure. The measurement as a whole produced nothing.
#[derive(Debug, Error)]
pub enum RunError {
    /// Calibration failed; rerunning with the same window cannot succeed.
    #[error("calibration failed: {0}")]
    Calibration(String),

    /// A worker crashed, timed out, or its callable faulted. Partial
    /// results are never salvaged: retrying means redoing the whole
    /// orchestration.
    #[error("worker {worker} failed: {cause}")]
    RunFailed {
        /// Spawn index of the failing worker.
        worker: usize,
        /// Underlying worker failure.
        #[source]
        cause: WorkerError,
    },

    /// The parallel worker pool could not be built.
    #[error("worker pool error: {0}")]
    Pool(String),
}

// ─── Unix plumbing ───────────────────────────────────────────────────────────

/// Result of polling a worker's message fd.
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data on `fd` with a timeout in milliseconds.
fn wait_for_data(fd: RawFd, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data wins over HUP: a closing pipe may still hold a final reply.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair with close-on-exec set on both ends.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

// ─── Worker handle ───────────────────────────────────────────────────────────

/// Handle to one spawned worker process.
struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    timeout: Duration,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn the current binary as a worker, wiring command/message pipes
    /// to fds 3/4 in the child.
    fn spawn(timeout: Duration) -> Result<Self, WorkerError> {
        let binary = env::current_exe().map_err(WorkerError::Spawn)?;

        // cmd pipe: orchestrator writes → worker reads on fd 3.
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg pipe: worker writes on fd 4 → orchestrator reads.
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(WorkerError::Spawn(e));
            }
        };

        let mut command = Command::new(&binary);
        command
            .arg("--pulse-worker")
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: move cmd_read to fd 3 and msg_write to fd 4, clear
        // close-on-exec on both, close the parent-side ends.
        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(cmd_write);
                libc::close(msg_read);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(WorkerError::Spawn(e));
            }
        };

        // Close the child-side ends in the parent.
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            timeout,
            msg_read_fd: msg_read,
        };

        handle.wait_for_hello()?;
        Ok(handle)
    }

    fn wait_for_hello(&mut self) -> Result<(), WorkerError> {
        match self.read_reply()? {
            WorkerReply::Hello { protocol_version } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(WorkerError::Protocol {
                        expected: format!("protocol version {PROTOCOL_VERSION}"),
                        got: format!("protocol version {protocol_version}"),
                    });
                }
                Ok(())
            }
            other => Err(WorkerError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Calibrate in this worker and return the loop count.
    fn calibrate_loops(
        &mut self,
        bench_id: &str,
        min_time: Duration,
        max_time: Duration,
        pin_cpu: Option<u32>,
    ) -> Result<u64, WorkerError> {
        self.writer.write(&WorkerCommand::Calibrate {
            bench_id: bench_id.to_string(),
            min_time_ns: min_time.as_nanos() as u64,
            max_time_ns: max_time.as_nanos() as u64,
            pin_cpu,
        })?;

        match self.read_reply()? {
            WorkerReply::Calibrated { loops } => Ok(loops),
            WorkerReply::Failure { kind, message, .. } => Err(fault_to_error(kind, message, None)),
            other => Err(WorkerError::Protocol {
                expected: "Calibrated".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Collect one run in this worker.
    fn collect_run(
        &mut self,
        bench_id: &str,
        loops: u64,
        warmups: u32,
        samples: u32,
        pin_cpu: Option<u32>,
    ) -> Result<WorkerRun, WorkerError> {
        self.writer.write(&WorkerCommand::Collect {
            bench_id: bench_id.to_string(),
            loops,
            warmups,
            samples,
            pin_cpu,
        })?;

        match self.read_reply()? {
            WorkerReply::Run(run) => Ok(run),
            WorkerReply::Failure {
                kind,
                message,
                index,
            } => Err(fault_to_error(kind, message, index)),
            other => Err(WorkerError::Protocol {
                expected: "Run".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Wait for the next reply, enforcing the per-worker deadline and
    /// noticing a dead peer instead of blocking forever.
    fn read_reply(&mut self) -> Result<WorkerReply, WorkerError> {
        let start = Instant::now();

        loop {
            let remaining = self.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                self.terminate();
                return Err(WorkerError::Timeout(self.timeout));
            }

            if !self.reader.has_buffered_data() {
                let poll_timeout = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.msg_read_fd, poll_timeout.as_millis() as i32) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(WorkerError::Crashed(
                                "worker exited without replying".to_string(),
                            ));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(WorkerError::Crashed(
                            "worker pipe closed unexpectedly".to_string(),
                        ));
                    }
                    PollResult::Error(e) => {
                        return Err(WorkerError::Crashed(format!("pipe error: {e}")));
                    }
                }
            }

            return match self.reader.read::<WorkerReply>() {
                Ok(reply) => Ok(reply),
                Err(FrameError::EndOfStream) => Err(WorkerError::Crashed(
                    "worker closed its channel unexpectedly".to_string(),
                )),
                Err(e) => {
                    if self.is_alive() {
                        Err(WorkerError::Channel(e.to_string()))
                    } else {
                        Err(WorkerError::Crashed(format!("worker died mid-reply: {e}")))
                    }
                }
            };
        }
    }

    /// Ask the worker to exit and reap it.
    fn shutdown(mut self) {
        let _ = self.writer.write(&WorkerCommand::Shutdown);
        let _ = self.child.wait();
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, short grace period, then SIGKILL.
    fn terminate(&mut self) {
        let _ = send_sigterm(self.child.id());
        std::thread::sleep(Duration::from_millis(50));
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // No worker outlives its handle, whatever path dropped it.
        if self.is_alive() {
            self.terminate();
        }
    }
}

fn fault_to_error(kind: FaultKind, message: String, index: Option<u32>) -> WorkerError {
    match kind {
        FaultKind::Panic => match index {
            Some(index) => WorkerError::Execution(format!(
                "callable panicked at measurement {index}: {message}"
            )),
            None => WorkerError::Execution(format!("callable panicked: {message}")),
        },
        FaultKind::Calibration => WorkerError::Calibration(message),
        FaultKind::UnknownBenchmark => WorkerError::UnknownBenchmark(message),
    }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Drives one complete measurement: metadata snapshot, one calibration,
/// `processes` isolated runs, merge.
pub struct Orchestrator {
    spec: RunSpec,
    timeout: Duration,
    jobs: usize,
    affinity: Option<Vec<u32>>,
}

impl Orchestrator {
    /// Create an orchestrator. `jobs` is the number of workers allowed to
    /// run concurrently; 1 keeps them strictly sequential.
    pub fn new(
        spec: RunSpec,
        timeout: Duration,
        jobs: usize,
        affinity: Option<Vec<u32>>,
    ) -> Self {
        Self {
            spec,
            timeout,
            jobs: jobs.max(1),
            affinity: affinity.filter(|cpus| !cpus.is_empty()),
        }
    }

    /// Run the whole measurement. Returns a complete document or fails
    /// entirely; there is no partial result.
    pub fn run(&self) -> Result<Benchmark, RunError> {
        let shared_metadata = metadata::collect();

        let loops = match self.spec.loops {
            Some(loops) => loops.max(1),
            None => self.calibrate_once()?,
        };
        tracing::debug!(bench_id = %self.spec.bench_id, loops, "loop count fixed");

        let runs = self.collect_runs(loops)?;

        Ok(Benchmark {
            version: SCHEMA_VERSION,
            name: self.spec.name.clone(),
            loops,
            inner_loops: self.spec.inner_loops.max(1),
            warmups: self.spec.warmups,
            samples_per_run: self.spec.samples,
            processes: self.spec.processes.max(1),
            metadata: shared_metadata,
            runs,
            extra: serde_json::Map::new(),
        })
    }

    /// One calibration, in a dedicated worker, before any run is collected.
    /// The resulting loop count is fixed for every worker; recalibrating
    /// per process would break the shared-loop-count invariant.
    fn calibrate_once(&self) -> Result<u64, RunError> {
        let mut worker = WorkerHandle::spawn(self.timeout)
            .map_err(|cause| RunError::RunFailed { worker: 0, cause })?;
        let outcome = worker.calibrate_loops(
            &self.spec.bench_id,
            self.spec.min_time,
            self.spec.max_time,
            self.pin_for(0),
        );
        worker.shutdown();

        match outcome {
            Ok(loops) => Ok(loops),
            Err(WorkerError::Calibration(message)) => Err(RunError::Calibration(message)),
            Err(cause) => Err(RunError::RunFailed { worker: 0, cause }),
        }
    }

    fn collect_runs(&self, loops: u64) -> Result<Vec<Run>, RunError> {
        let processes = self.spec.processes.max(1) as usize;

        let progress = ProgressBar::new(processes as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} workers")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let collect_one = |index: usize| -> Result<Run, RunError> {
            let run = self
                .run_in_worker(index, loops)
                .map_err(|cause| RunError::RunFailed {
                    worker: index,
                    cause,
                })?;
            progress.inc(1);
            Ok(run)
        };

        // Outcomes are indexed by spawn order regardless of completion
        // order, so the merged document is deterministic for a fixed
        // process count.
        let outcomes: Vec<Result<Run, RunError>> = if self.jobs > 1 && processes > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.jobs.min(processes))
                .build()
                .map_err(|e| RunError::Pool(e.to_string()))?;
            pool.install(|| (0..processes).into_par_iter().map(collect_one).collect())
        } else {
            let mut sequential = Vec::with_capacity(processes);
            for index in 0..processes {
                let outcome = collect_one(index);
                let failed = outcome.is_err();
                sequential.push(outcome);
                if failed {
                    break;
                }
            }
            sequential
        };

        progress.finish_and_clear();

        let mut runs = Vec::with_capacity(processes);
        for outcome in outcomes {
            runs.push(outcome?);
        }
        Ok(runs)
    }

    /// Spawn worker `index`, collect its single run, and shut it down.
    fn run_in_worker(&self, index: usize, loops: u64) -> Result<Run, WorkerError> {
        tracing::debug!(worker = index, "spawning worker");
        let mut worker = WorkerHandle::spawn(self.timeout)?;
        let outcome = worker.collect_run(
            &self.spec.bench_id,
            loops,
            self.spec.warmups,
            self.spec.samples,
            self.pin_for(index),
        );
        worker.shutdown();

        let worker_run = outcome?;
        tracing::debug!(worker = index, samples = worker_run.samples.len(), "run merged");
        Ok(convert_run(worker_run))
    }

    fn pin_for(&self, index: usize) -> Option<u32> {
        self.affinity
            .as_ref()
            .map(|cpus| cpus[index % cpus.len()])
    }
}

/// Convert a wire-format run into the document model.
fn convert_run(run: WorkerRun) -> Run {
    let mut metadata = Metadata::new();
    for entry in run.metadata {
        metadata.insert(entry.key, convert_meta_value(entry.value));
    }
    Run {
        warmups: run.warmups,
        samples: run.samples,
        loops: run.loops,
        metadata,
        extra: serde_json::Map::new(),
    }
}

fn convert_meta_value(value: pulsebench_ipc::MetaValue) -> MetaValue {
    match value {
        pulsebench_ipc::MetaValue::Str(s) => MetaValue::Str(s),
        pulsebench_ipc::MetaValue::Int(i) => MetaValue::Int(i),
        pulsebench_ipc::MetaValue::Float(f) => MetaValue::Float(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_spec_defaults() {
        let spec = RunSpec::new("busy_loop");
        assert_eq!(spec.processes, 25);
        assert_eq!(spec.samples, 3);
        assert_eq!(spec.warmups, 1);
        assert_eq!(spec.inner_loops, 1);
        assert!(spec.loops.is_none());
        assert_eq!(spec.name, "busy_loop");
    }

    #[test]
    fn jobs_are_clamped_to_at_least_one() {
        let orchestrator = Orchestrator::new(RunSpec::new("x"), Duration::from_secs(1), 0, None);
        assert_eq!(orchestrator.jobs, 1);
    }

    #[test]
    fn empty_affinity_list_means_no_pinning() {
        let orchestrator =
            Orchestrator::new(RunSpec::new("x"), Duration::from_secs(1), 1, Some(vec![]));
        assert!(orchestrator.pin_for(0).is_none());

        let pinned = Orchestrator::new(
            RunSpec::new("x"),
            Duration::from_secs(1),
            1,
            Some(vec![2, 5]),
        );
        assert_eq!(pinned.pin_for(0), Some(2));
        assert_eq!(pinned.pin_for(1), Some(5));
        assert_eq!(pinned.pin_for(2), Some(2));
    }

    #[test]
    fn wire_run_converts_to_document_run() {
        let wire = WorkerRun {
            warmups: vec![0.2],
            samples: vec![0.19, 0.18],
            loops: 32,
            metadata: vec![pulsebench_ipc::MetaEntry {
                key: "pid".to_string(),
                value: pulsebench_ipc::MetaValue::Int(7),
            }],
        };
        let run = convert_run(wire);
        assert_eq!(run.loops, 32);
        assert_eq!(run.samples.len(), 2);
        assert_eq!(run.metadata.get("pid"), Some(&MetaValue::Int(7)));
    }

    #[test]
    #[ignore] // Requires the built benchmark binary as current_exe.
    fn spawn_round_trip() {
        let spec = RunSpec {
            processes: 2,
            samples: 2,
            warmups: 1,
            loops: Some(1),
            ..RunSpec::new("registry_smoke")
        };
        let orchestrator = Orchestrator::new(spec, Duration::from_secs(30), 1, None);
        let bench = orchestrator.run().unwrap();
        assert_eq!(bench.runs.len(), 2);
    }
}
