//! Configuration loading from pulse.toml
//!
//! Settings can live in a `pulse.toml` discovered by walking up from the
//! current directory. CLI flags always override file values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pulsebench configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PulseConfig {
    /// Measurement settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Output settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Measurement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker processes per measurement.
    #[serde(default = "default_processes")]
    pub processes: u32,
    /// Measured samples per worker.
    #[serde(default = "default_samples")]
    pub samples: u32,
    /// Warmup samples per worker (discarded).
    #[serde(default = "default_warmups")]
    pub warmups: u32,
    /// Fixed loop count; unset means calibrate.
    #[serde(default)]
    pub loops: Option<u64>,
    /// Lower edge of the calibration window (e.g. "100ms").
    #[serde(default = "default_min_time")]
    pub min_time: String,
    /// Upper edge of the calibration window (e.g. "1s").
    #[serde(default = "default_max_time")]
    pub max_time: String,
    /// Per-worker timeout (e.g. "60s").
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Parallel worker slots. 1 keeps workers strictly sequential, which
    /// gives the quietest timings.
    #[serde(default)]
    pub jobs: Option<usize>,
    /// CPUs workers are pinned to, round-robin by worker index.
    #[serde(default)]
    pub affinity: Option<Vec<u32>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            samples: default_samples(),
            warmups: default_warmups(),
            loops: None,
            min_time: default_min_time(),
            max_time: default_max_time(),
            timeout: default_timeout(),
            jobs: None,
            affinity: None,
        }
    }
}

fn default_processes() -> u32 {
    25
}
fn default_samples() -> u32 {
    3
}
fn default_warmups() -> u32 {
    1
}
fn default_min_time() -> String {
    "100ms".to_string()
}
fn default_max_time() -> String {
    "1s".to_string()
}
fn default_timeout() -> String {
    "60s".to_string()
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Default path `measure` writes the document to when `-o` is absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl PulseConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Discover and load configuration by walking up from the current
    /// directory.
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("pulse.toml");
            if config_path.exists() {
                return Self::load(&config_path).ok();
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Parse a duration string (e.g. "100ms", "1.5s", "2m") into a
    /// [`Duration`].
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid duration number: {}", num_part))?;
        if value < 0.0 {
            return Err(anyhow::anyhow!("negative duration: {}", s));
        }

        let secs_per_unit: f64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" | "" => 1.0,
            "m" | "min" => 60.0,
            _ => return Err(anyhow::anyhow!("unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_secs_f64(value * secs_per_unit))
    }
}
