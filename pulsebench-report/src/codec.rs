//! Versioned JSON Codec
//!
//! Encodes a document to JSON and back, round-trip exact for every field.
//! Floating-point durations survive at full double precision: serde_json
//! prints the shortest decimal form that reparses to the same f64 bits.
//! Unknown fields are preserved opaquely (see the `extra` maps on the data
//! model) whenever the schema version matches.

use crate::benchmark::{Benchmark, SCHEMA_VERSION};
use std::path::Path;
use thiserror::Error;

/// The codec was handed data whose version or shape it does not recognize.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document carries no integer `version` field.
    #[error("document has no schema version field")]
    MissingVersion,

    /// The document's version is not one this codec reads.
    #[error("unsupported schema version {found} (this codec reads version {SCHEMA_VERSION})")]
    UnsupportedVersion {
        /// Version found in the document.
        found: u64,
    },

    /// The document is not valid JSON or is missing required fields.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// A run violates a document-wide invariant.
    #[error("run {index}: {reason}")]
    InconsistentRun {
        /// Zero-based run index.
        index: usize,
        /// What the run disagrees about.
        reason: String,
    },

    /// The document could not be read from or written to disk.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The in-memory document failed to serialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a document to its persisted JSON form.
pub fn encode(benchmark: &Benchmark) -> Result<Vec<u8>, SchemaError> {
    let mut bytes = serde_json::to_vec_pretty(benchmark)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse a persisted document.
///
/// The version field is checked before anything else so that a document
/// written by a future version fails with [`SchemaError::UnsupportedVersion`]
/// rather than a confusing field error.
pub fn decode(bytes: &[u8]) -> Result<Benchmark, SchemaError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| SchemaError::Malformed(e.to_string()))?;

    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or(SchemaError::MissingVersion)?;
    if version != SCHEMA_VERSION as u64 {
        return Err(SchemaError::UnsupportedVersion { found: version });
    }

    let benchmark: Benchmark =
        serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    validate(&benchmark)?;
    Ok(benchmark)
}

/// Read and decode a document from disk.
pub fn load(path: &Path) -> Result<Benchmark, SchemaError> {
    decode(&std::fs::read(path)?)
}

/// Encode a document and write it to disk.
pub fn dump(benchmark: &Benchmark, path: &Path) -> Result<(), SchemaError> {
    std::fs::write(path, encode(benchmark)?)?;
    Ok(())
}

/// Document-wide invariants every decoded document must satisfy.
fn validate(benchmark: &Benchmark) -> Result<(), SchemaError> {
    if benchmark.loops == 0 {
        return Err(SchemaError::Malformed("loop count must be positive".into()));
    }
    if benchmark.inner_loops == 0 {
        return Err(SchemaError::Malformed(
            "inner loop count must be positive".into(),
        ));
    }
    if benchmark.runs.len() != benchmark.processes as usize {
        return Err(SchemaError::Malformed(format!(
            "document declares {} process(es) but carries {} run(s)",
            benchmark.processes,
            benchmark.runs.len()
        )));
    }

    for (index, run) in benchmark.runs.iter().enumerate() {
        if run.loops != benchmark.loops {
            return Err(SchemaError::InconsistentRun {
                index,
                reason: format!(
                    "loop count {} differs from the document loop count {}",
                    run.loops, benchmark.loops
                ),
            });
        }
        if run.samples.len() != benchmark.samples_per_run as usize {
            return Err(SchemaError::InconsistentRun {
                index,
                reason: format!(
                    "{} measured sample(s), expected {}",
                    run.samples.len(),
                    benchmark.samples_per_run
                ),
            });
        }
        if run.warmups.len() != benchmark.warmups as usize {
            return Err(SchemaError::InconsistentRun {
                index,
                reason: format!(
                    "{} warmup(s), expected {}",
                    run.warmups.len(),
                    benchmark.warmups
                ),
            });
        }
        if run
            .samples
            .iter()
            .chain(run.warmups.iter())
            .any(|d| !d.is_finite() || *d < 0.0)
        {
            return Err(SchemaError::InconsistentRun {
                index,
                reason: "negative or non-finite duration".into(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::{MetaValue, Metadata, Run};

    fn document() -> Benchmark {
        let mut metadata = Metadata::new();
        metadata.insert("hostname".into(), MetaValue::Str("box7".into()));
        metadata.insert("cpu_count".into(), MetaValue::Int(16));

        let mut run_meta = Metadata::new();
        run_meta.insert("pid".into(), MetaValue::Int(31337));

        Benchmark {
            version: SCHEMA_VERSION,
            name: "json_escape".to_string(),
            loops: 1024,
            inner_loops: 1,
            warmups: 1,
            samples_per_run: 3,
            processes: 2,
            metadata,
            runs: vec![
                Run {
                    warmups: vec![0.1101],
                    samples: vec![0.102_843_21, 0.101_775_53, 0.103_001_88],
                    loops: 1024,
                    metadata: run_meta,
                    extra: serde_json::Map::new(),
                },
                Run {
                    warmups: vec![0.1093],
                    samples: vec![0.101_222_19, 0.102_540_04, 0.101_999_73],
                    loops: 1024,
                    metadata: Metadata::new(),
                    extra: serde_json::Map::new(),
                },
            ],
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn roundtrip_is_field_exact() {
        let original = document();
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn floats_roundtrip_at_full_precision() {
        let mut original = document();
        original.runs[0].samples[0] = std::f64::consts::PI * 1e-9;
        original.runs[1].samples[2] = 0.1 + 1e-17;

        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(
            original.runs[0].samples[0].to_bits(),
            decoded.runs[0].samples[0].to_bits()
        );
        assert_eq!(
            original.runs[1].samples[2].to_bits(),
            decoded.runs[1].samples[2].to_bits()
        );
    }

    #[test]
    fn unknown_fields_survive_a_roundtrip() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&encode(&document()).unwrap()).unwrap();
        value["lab_notes"] = serde_json::json!({ "operator": "st", "rack": 4 });
        value["runs"][0]["thermal_zone"] = serde_json::json!(42.5);

        let decoded = decode(value.to_string().as_bytes()).unwrap();
        assert!(decoded.extra.contains_key("lab_notes"));
        assert_eq!(
            decoded.runs[0].extra.get("thermal_zone"),
            Some(&serde_json::json!(42.5))
        );

        let reencoded: serde_json::Value =
            serde_json::from_slice(&encode(&decoded).unwrap()).unwrap();
        assert_eq!(reencoded["lab_notes"]["rack"], serde_json::json!(4));
        assert_eq!(reencoded["runs"][0]["thermal_zone"], serde_json::json!(42.5));
    }

    #[test]
    fn missing_version_is_a_schema_error() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&encode(&document()).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("version");

        let err = decode(value.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::MissingVersion));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&encode(&document()).unwrap()).unwrap();
        value["version"] = serde_json::json!(99);

        let err = decode(value.to_string().as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnsupportedVersion { found: 99 }
        ));
    }

    #[test]
    fn run_with_divergent_loop_count_is_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&encode(&document()).unwrap()).unwrap();
        value["runs"][1]["loops"] = serde_json::json!(2048);

        let err = decode(value.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::InconsistentRun { index: 1, .. }));
    }

    #[test]
    fn run_with_wrong_sample_count_is_rejected() {
        let mut bench = document();
        bench.runs[0].samples.pop();
        let bytes = serde_json::to_vec(&bench).unwrap();

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, SchemaError::InconsistentRun { index: 0, .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode(b"{not json").unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");

        let original = document();
        dump(&original, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(original, loaded);
    }
}
