//! A/B Comparison
//!
//! Judges whether two result sets differ meaningfully: the ratio of their
//! averages, qualified by whether the `average ± deviation` intervals
//! overlap. This is deliberately not a hypothesis test and reports no
//! p-value; it trades statistical rigor for a judgment a reader can verify
//! by eye from the two printed intervals.

use crate::summary::{summarize, Summary};
use thiserror::Error;

/// Qualitative judgment of the candidate relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgment {
    /// Candidate average is lower and the intervals do not overlap.
    Faster,
    /// Candidate average is higher and the intervals do not overlap.
    Slower,
    /// The intervals overlap; the difference is within the noise.
    Indistinguishable,
}

impl std::fmt::Display for Judgment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Judgment::Faster => write!(f, "faster"),
            Judgment::Slower => write!(f, "slower"),
            Judgment::Indistinguishable => write!(f, "indistinguishable"),
        }
    }
}

/// Outcome of comparing a candidate result against a baseline.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonOutcome {
    /// Summary of the baseline pool.
    pub baseline: Summary,
    /// Summary of the candidate pool.
    pub candidate: Summary,
    /// `candidate.mean / baseline.mean`; below 1.0 means the candidate is
    /// faster.
    pub ratio: f64,
    /// Interval-overlap judgment.
    pub judgment: Judgment,
}

/// A comparison was requested over a result with no measured samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IncompatibleResults {
    /// The baseline has no measured samples.
    #[error("baseline result has no measured samples")]
    EmptyBaseline,
    /// The candidate has no measured samples.
    #[error("candidate result has no measured samples")]
    EmptyCandidate,
}

/// Compare two pools of per-iteration durations, candidate against baseline.
pub fn compare(
    baseline: &[f64],
    candidate: &[f64],
) -> Result<ComparisonOutcome, IncompatibleResults> {
    let base = summarize(baseline).ok_or(IncompatibleResults::EmptyBaseline)?;
    let cand = summarize(candidate).ok_or(IncompatibleResults::EmptyCandidate)?;

    let ratio = cand.mean / base.mean;

    let overlap = base.mean - base.std_dev <= cand.mean + cand.std_dev
        && cand.mean - cand.std_dev <= base.mean + base.std_dev;

    let judgment = if overlap {
        Judgment::Indistinguishable
    } else if cand.mean > base.mean {
        Judgment::Slower
    } else {
        Judgment::Faster
    };

    Ok(ComparisonOutcome {
        baseline: base,
        candidate: cand,
        ratio,
        judgment,
    })
}
