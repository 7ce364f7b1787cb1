//! Worker Process Entry Point
//!
//! The worker side of the orchestrator-worker architecture. A worker is the
//! benchmark binary re-invoked with a hidden flag; it answers one command at
//! a time over its inherited pipe pair.
//!
//! On Unix the pipe fds arrive via `PULSE_IPC_FD` (normally `3,4`) and a
//! SIGTERM handler allows graceful shutdown. On non-Unix the transport
//! falls back to stdin/stdout and no signal handler is installed.

use crate::collect::panic_message;
use crate::{calibrate, collect, find_benchmark, pin_to_cpu};
use pulsebench_ipc::{
    FaultKind, FrameReader, FrameWriter, MetaEntry, MetaValue, WorkerCommand, WorkerReply,
    IPC_FD_ENV, PROTOCOL_VERSION,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Set by the SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets `SHUTDOWN_REQUESTED`. The handler is
/// async-signal-safe (only stores an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds {
        read_fd: i32,
        write_fd: i32,
    },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        let parts: Vec<&str> = val.split(',').collect();
        if parts.len() == 2 {
            if let (Ok(r), Ok(w)) = (parts[0].parse::<i32>(), parts[1].parse::<i32>()) {
                return IpcTransport::Fds {
                    read_fd: r,
                    write_fd: w,
                };
            }
        }
        eprintln!(
            "pulsebench: warning: invalid {IPC_FD_ENV}={val:?} \
             (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker main loop.
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
}

impl WorkerMain {
    /// Create a worker on the detected transport.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self {
                    reader: FrameReader::new(Box::new(read_file) as Box<dyn std::io::Read>),
                    writer: FrameWriter::new(Box::new(write_file) as Box<dyn std::io::Write>),
                }
            }
            IpcTransport::Stdio => Self {
                reader: FrameReader::new(Box::new(std::io::stdin()) as Box<dyn std::io::Read>),
                writer: FrameWriter::new(Box::new(std::io::stdout()) as Box<dyn std::io::Write>),
            },
        }
    }

    /// Run the worker main loop until shutdown.
    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        install_sigterm_handler();

        self.writer.write(&WorkerReply::Hello {
            protocol_version: PROTOCOL_VERSION,
        })?;

        loop {
            if shutdown_requested() {
                break;
            }

            let command: WorkerCommand = self.reader.read()?;
            match command {
                WorkerCommand::Calibrate {
                    bench_id,
                    min_time_ns,
                    max_time_ns,
                    pin_cpu,
                } => {
                    self.run_calibration(&bench_id, min_time_ns, max_time_ns, pin_cpu)?;
                }
                WorkerCommand::Collect {
                    bench_id,
                    loops,
                    warmups,
                    samples,
                    pin_cpu,
                } => {
                    self.run_collection(&bench_id, loops, warmups, samples, pin_cpu)?;
                }
                WorkerCommand::Shutdown => break,
            }
        }

        Ok(())
    }

    fn run_calibration(
        &mut self,
        bench_id: &str,
        min_time_ns: u64,
        max_time_ns: u64,
        pin_cpu: Option<u32>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        pin_if_requested(pin_cpu);

        let Some(bench) = find_benchmark(bench_id) else {
            self.writer.write(&unknown_benchmark(bench_id))?;
            return Ok(());
        };

        // Calibration trials execute the callable for real; a panic there is
        // the same fault as a panic during collection.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            calibrate(
                bench.runner_fn,
                Duration::from_nanos(min_time_ns),
                Duration::from_nanos(max_time_ns),
            )
        }));

        let reply = match outcome {
            Ok(Ok(loops)) => WorkerReply::Calibrated { loops },
            Ok(Err(e)) => WorkerReply::Failure {
                kind: FaultKind::Calibration,
                message: e.to_string(),
                index: None,
            },
            Err(payload) => WorkerReply::Failure {
                kind: FaultKind::Panic,
                message: panic_message(payload),
                index: None,
            },
        };
        self.writer.write(&reply)?;
        Ok(())
    }

    fn run_collection(
        &mut self,
        bench_id: &str,
        loops: u64,
        warmups: u32,
        samples: u32,
        pin_cpu: Option<u32>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        pin_if_requested(pin_cpu);

        let Some(bench) = find_benchmark(bench_id) else {
            self.writer.write(&unknown_benchmark(bench_id))?;
            return Ok(());
        };

        let reply = match collect(bench.runner_fn, loops, warmups, samples) {
            Ok(mut run) => {
                run.metadata = process_metadata(pin_cpu);
                WorkerReply::Run(run)
            }
            Err(e) => WorkerReply::Failure {
                kind: FaultKind::Panic,
                message: e.message,
                index: Some(e.index),
            },
        };
        self.writer.write(&reply)?;
        Ok(())
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

fn pin_if_requested(pin_cpu: Option<u32>) {
    if let Some(cpu) = pin_cpu {
        if let Err(e) = pin_to_cpu(cpu as usize) {
            eprintln!("pulsebench: warning: failed to pin to CPU {cpu}: {e}");
        }
    }
}

fn unknown_benchmark(bench_id: &str) -> WorkerReply {
    WorkerReply::Failure {
        kind: FaultKind::UnknownBenchmark,
        message: format!("no registered benchmark named {bench_id:?}"),
        index: None,
    }
}

/// Process-local facts attached to this worker's run.
fn process_metadata(pin_cpu: Option<u32>) -> Vec<MetaEntry> {
    let mut entries = vec![MetaEntry {
        key: "pid".to_string(),
        value: MetaValue::Int(std::process::id() as u64),
    }];
    if let Some(cpu) = pin_cpu {
        entries.push(MetaEntry {
            key: "pinned_cpu".to_string(),
            value: MetaValue::Int(cpu as u64),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_metadata_carries_pid() {
        let entries = process_metadata(None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "pid");
    }

    #[test]
    fn process_metadata_records_pin() {
        let entries = process_metadata(Some(2));
        assert!(entries
            .iter()
            .any(|e| e.key == "pinned_cpu" && e.value == MetaValue::Int(2)));
    }
}
