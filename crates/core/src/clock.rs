//! Monotonic millisecond clock owned by a monitor

use std::time::Instant;

/// Monotonic clock measuring milliseconds since its creation
///
/// Each monitor creates its own clock when it starts, so bucket and grace
/// arithmetic never depends on process-wide state.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
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
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a + 5);
    }
}
