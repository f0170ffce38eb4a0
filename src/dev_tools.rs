use std::fmt::Display;
use std::time::{Duration, Instant};

/// A simple timer for logging elapsed durations.
///
/// Each [`Timer::log`] call emits a `debug!` record with the time since the previous call
/// (or since creation), which is how chain start and finish are traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timer {
    last: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Logs `msg` with the time elapsed since the last log and restarts the lap.
    pub fn log<T: Display>(&mut self, msg: T) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        log::debug!("[{elapsed:?}] {msg}");
        elapsed
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laps_restart() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        let first = timer.log("first");
        let second = timer.log("second");
        assert!(first >= Duration::from_millis(5));
        assert!(second < first);
    }
}
