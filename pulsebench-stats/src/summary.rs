//! Pooled Summary Statistics
//!
//! Arithmetic mean plus Bessel-corrected sample standard deviation (N−1
//! divisor) over one flat pool of per-iteration durations.

/// Mean and spread of a pooled sample set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Arithmetic mean, seconds per iteration.
    pub mean: f64,
    /// Sample standard deviation (N−1 divisor), seconds per iteration.
    pub std_dev: f64,
    /// Number of pooled values.
    pub count: usize,
}

/// Summarize a pool of values. Returns `None` for an empty pool; a pool of
/// exactly one value reports a deviation of zero rather than leaving it
/// undefined.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std_dev = if count < 2 {
        0.0
    } else {
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    };

    Some(Summary {
        mean,
        std_dev,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_pool_has_zero_deviation() {
        let summary = summarize(&[10e-9, 10e-9, 10e-9, 10e-9]).unwrap();
        assert_eq!(summary.mean, 10e-9);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.count, 4);
    }

    #[test]
    fn bessel_corrected_deviation() {
        let summary = summarize(&[9.0e-9, 10.0e-9, 11.0e-9]).unwrap();
        assert!((summary.mean - 10.0e-9).abs() < 1e-18);
        // Sample variance with N−1: (1 + 0 + 1) / 2 = 1 ns².
        assert!((summary.std_dev - 1.0e-9).abs() < 1e-18);
    }

    #[test]
    fn single_value_reports_zero_deviation() {
        let summary = summarize(&[0.25]).unwrap();
        assert_eq!(summary.mean, 0.25);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.count, 1);
    }

    #[test]
    fn empty_pool_has_no_summary() {
        assert!(summarize(&[]).is_none());
    }
}
