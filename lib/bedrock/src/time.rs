use std::time::{Duration, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock set before the unix epoch")
        .as_secs()
}

/// Whole milliseconds in a duration, saturating at `i64::max_value()`.
#[inline]
pub fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis().min(i64::max_value() as u128) as i64
}

/// Fixed server tick cadence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickRate {
    frame: Duration,
}

impl TickRate {
    #[inline]
    pub fn from_hz(hz: u64) -> TickRate {
        TickRate {
            frame: Duration::from_millis(1000 / hz.max(1)),
        }
    }

    #[inline]
    pub fn from_millis(ms: u64) -> TickRate {
        TickRate {
            frame: Duration::from_millis(ms.max(1)),
        }
    }

    #[inline]
    pub fn frame(&self) -> Duration {
        self.frame
    }
}
