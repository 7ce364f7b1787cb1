//! Shared Metadata Collection
//!
//! A stateless snapshot of environment facts, collected exactly once per
//! measurement (before any worker is spawned) and attached verbatim to the
//! document. The harness records these for later readers; nothing here is
//! interpreted by the measurement core.
//!
//! Linux-specific facts (CPU model, memory, ASLR state) degrade gracefully
//! on other platforms by being omitted.

use chrono::Utc;
use pulsebench_core::clock_resolution;
use pulsebench_report::{MetaValue, Metadata};

/// Collect the shared metadata snapshot.
pub fn collect() -> Metadata {
    let mut meta = Metadata::new();

    meta.insert(
        "date".to_string(),
        MetaValue::Str(Utc::now().to_rfc3339()),
    );
    meta.insert(
        "harness_version".to_string(),
        MetaValue::Str(env!("CARGO_PKG_VERSION").to_string()),
    );
    meta.insert(
        "os".to_string(),
        MetaValue::Str(std::env::consts::OS.to_string()),
    );
    meta.insert(
        "arch".to_string(),
        MetaValue::Str(std::env::consts::ARCH.to_string()),
    );
    meta.insert("cpu_count".to_string(), MetaValue::Int(num_cpus() as u64));
    meta.insert(
        "timer_resolution_ns".to_string(),
        MetaValue::Int(clock_resolution().as_nanos() as u64),
    );

    if let Some(hostname) = hostname() {
        meta.insert("hostname".to_string(), MetaValue::Str(hostname));
    }
    if let Some(model) = cpu_model() {
        meta.insert("cpu_model".to_string(), MetaValue::Str(model));
    }
    if let Some(gb) = memory_gb() {
        meta.insert("memory_gb".to_string(), MetaValue::Float(gb));
    }
    if let Some(aslr) = aslr_state() {
        meta.insert("aslr".to_string(), MetaValue::Str(aslr));
    }

    meta
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn hostname() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
    }
}

/// CPU model name from /proc/cpuinfo (Linux only).
fn cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Total system memory in GB (Linux only).
fn memory_gb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("MemTotal"))
                    .and_then(|l| {
                        l.split_whitespace()
                            .nth(1)
                            .and_then(|s| s.parse::<u64>().ok())
                    })
                    .map(|kb| kb as f64 / 1024.0 / 1024.0)
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Address-space layout randomization state (Linux only). Per-process
/// randomization is one of the noise sources worker isolation averages out,
/// so its system-wide setting is worth recording.
fn aslr_state() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let raw = std::fs::read_to_string("/proc/sys/kernel/randomize_va_space").ok()?;
        Some(
            match raw.trim() {
                "0" => "disabled",
                "1" => "partial",
                "2" => "full",
                other => return Some(format!("unknown ({other})")),
            }
            .to_string(),
        )
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_carries_the_portable_keys() {
        let meta = collect();
        for key in ["date", "harness_version", "os", "arch", "cpu_count"] {
            assert!(meta.contains_key(key), "missing key {key}");
        }
    }

    #[test]
    fn cpu_count_is_positive() {
        let meta = collect();
        match meta.get("cpu_count") {
            Some(MetaValue::Int(n)) => assert!(*n >= 1),
            other => panic!("unexpected cpu_count: {other:?}"),
        }
    }
}
