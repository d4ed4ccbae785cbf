//! Monotonic time and delays

use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock anchored at bridge creation
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn get_nsec(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    pub fn get_usec(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    /// Sleep for `msec` milliseconds
    pub fn sleep(&self, msec: u64) {
        thread::sleep(Duration::from_millis(msec));
    }

    /// Sleep for `usec` microseconds
    pub fn usleep(&self, usec: u64) {
        thread::sleep(Duration::from_micros(usec));
    }

    /// Busy-wait for `usec` microseconds without yielding
    pub fn udelay(&self, usec: u64) {
        let until = Instant::now() + Duration::from_micros(usec);
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.get_usec();
        clock.udelay(200);
        let b = clock.get_usec();
        assert!(b >= a + 200);
        assert!(clock.get_nsec() >= b * 1000);
    }
}
