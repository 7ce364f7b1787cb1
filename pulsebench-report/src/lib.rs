#![warn(missing_docs)]
//! Pulsebench Report
//!
//! The persisted benchmark document: its data model, the versioned JSON
//! codec (round-trip exact, unknown fields preserved), and human-readable
//! text rendering with verbosity levels.

mod benchmark;
mod codec;
mod text;

pub use benchmark::{Benchmark, MetaValue, Metadata, Run, SCHEMA_VERSION};
pub use codec::{decode, dump, encode, load, SchemaError};
pub use text::{format_benchmark, format_comparison, format_seconds, Verbosity};
