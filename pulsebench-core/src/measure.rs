//! Wall-Clock Timing
//!
//! All measurements use the monotonic clock via `std::time::Instant` and are
//! reported as f64 seconds, the unit carried end-to-end through the wire
//! protocol and the persisted document.

use std::time::{Duration, Instant};

/// Timer for one measurement.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Stop the timer and return the elapsed wall-clock time in seconds.
    #[inline(always)]
    pub fn stop(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Estimate the smallest elapsed interval the clock can resolve.
///
/// Spins until the clock advances, a few times, and keeps the smallest
/// nonzero delta. Attached to metadata so readers can judge whether sample
/// durations are near the timer floor.
pub fn clock_resolution() -> Duration {
    let mut best = Duration::MAX;
    for _ in 0..8 {
        let start = Instant::now();
        let mut elapsed = start.elapsed();
        while elapsed.is_zero() {
            elapsed = start.elapsed();
        }
        if elapsed < best {
            best = elapsed;
        }
    }
    best
}

/// Pin the current thread to one CPU.
///
/// Keeps a worker from migrating between cores mid-measurement, which
/// shows up as extra spread on NUMA machines.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<(), std::io::Error> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        libc::CPU_SET(cpu, set_ref);

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

/// CPU pinning is not supported on this platform.
#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_a_sleep() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(10));
        let elapsed = timer.stop();

        assert!(elapsed >= 0.005);
        assert!(elapsed < 0.5, "sleep of 10ms measured as {elapsed}s");
    }

    #[test]
    fn timer_is_non_negative() {
        let timer = Timer::start();
        assert!(timer.stop() >= 0.0);
    }

    #[test]
    fn resolution_is_positive_and_small() {
        let res = clock_resolution();
        assert!(!res.is_zero());
        assert!(res < Duration::from_millis(50));
    }
}
