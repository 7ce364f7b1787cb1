//! Loop-Count Calibration
//!
//! Finds a loop count such that one timed trial lands inside a target
//! duration window, so individual samples are long enough to dwarf timer
//! overhead. Runs exactly once per result; every worker then reuses the
//! same loop count.

use crate::measure::Timer;
use std::time::Duration;
use thiserror::Error;

/// Default lower edge of the calibration window (100 ms).
pub const DEFAULT_MIN_TIME: Duration = Duration::from_millis(100);

/// Default upper edge of the calibration window (1 s).
pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(1);

/// The callable cannot be brought into the target duration window.
///
/// Never retried automatically: the same window produces the same outcome.
/// The caller should widen the window or pick a cheaper fragment.
#[derive(Debug, Clone, Error)]
#[error(
    "trial of {loops} loop(s) took {trial_secs:.3}s, above the {max_secs:.3}s ceiling \
     before reaching the {min_secs:.3}s floor"
)]
pub struct CalibrationError {
    /// Loop count of the failing trial.
    pub loops: u64,
    /// Duration of the failing trial, seconds.
    pub trial_secs: f64,
    /// Window floor, seconds.
    pub min_secs: f64,
    /// Window ceiling, seconds.
    pub max_secs: f64,
}

/// Determine the smallest power-of-two loop count whose single timed trial
/// lasts at least `min_time`.
///
/// Starts at one loop and doubles. A trial that exceeds `max_time` fails
/// with [`CalibrationError`] instead of being silently accepted; with the
/// default window that means a single invocation already costs more than a
/// second and the window itself should be reconsidered.
///
/// Every trial really executes the callable, so calibration assumes the
/// callable is idempotent.
pub fn calibrate<F>(
    mut f: F,
    min_time: Duration,
    max_time: Duration,
) -> Result<u64, CalibrationError>
where
    F: FnMut(),
{
    let min_secs = min_time.as_secs_f64();
    let max_secs = max_time.as_secs_f64();
    let mut loops: u64 = 1;

    loop {
        let timer = Timer::start();
        for _ in 0..loops {
            std::hint::black_box(f());
        }
        let trial_secs = timer.stop();

        if trial_secs > max_secs {
            return Err(CalibrationError {
                loops,
                trial_secs,
                min_secs,
                max_secs,
            });
        }
        if trial_secs >= min_secs {
            return Ok(loops);
        }
        loops *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_floor_returns_one_without_doubling() {
        let loops = calibrate(|| {}, Duration::ZERO, DEFAULT_MAX_TIME).unwrap();
        assert_eq!(loops, 1);
    }

    #[test]
    fn slow_callable_satisfies_floor_at_one_loop() {
        let loops = calibrate(
            || std::thread::sleep(Duration::from_millis(15)),
            Duration::from_millis(1),
            DEFAULT_MAX_TIME,
        )
        .unwrap();
        assert_eq!(loops, 1);
    }

    #[test]
    fn doubles_to_the_smallest_sufficient_power_of_two() {
        // Each call sleeps 5 ms; the floor of 17 ms needs 4 calls. Sleep
        // overshoot would have to exceed 3.5 ms per call to satisfy the
        // floor at 2 loops, far beyond normal scheduler jitter.
        let loops = calibrate(
            || std::thread::sleep(Duration::from_millis(5)),
            Duration::from_millis(17),
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(loops, 4);
        assert!(loops.is_power_of_two());
    }

    #[test]
    fn callable_slower_than_ceiling_fails() {
        let err = calibrate(
            || std::thread::sleep(Duration::from_millis(40)),
            Duration::from_millis(20),
            Duration::from_millis(25),
        )
        .unwrap_err();
        assert_eq!(err.loops, 1);
        assert!(err.trial_secs > err.max_secs);
    }
}
