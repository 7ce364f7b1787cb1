#![warn(missing_docs)]
//! Pulsebench IPC Protocol
//!
//! Binary protocol spoken between the orchestrator and its measurement
//! workers. Messages are rkyv-serialized and carried as length-prefixed
//! frames over a pair of inherited pipes (or stdin/stdout as a fallback).

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{
    FaultKind, MetaEntry, MetaValue, WorkerCommand, WorkerReply, WorkerRun,
};

/// Protocol version, checked during the worker handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable naming the read/write fds inherited by a worker
/// (format: `<read_fd>,<write_fd>`).
pub const IPC_FD_ENV: &str = "PULSE_IPC_FD";
