use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Duration, TimeDelta, Utc};

/// Wall-clock source. Injected so ban expiry and rate windows can be tested
/// without sleeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Expiry for a duration given in hours. `None` or `0` means no expiry.
///
/// # Errors
/// Returns a message when the expiry is past the representable range.
pub fn expiry_after(now: DateTime<Utc>, hours: Option<u32>) -> Result<Option<DateTime<Utc>>, String> {
    match hours {
        None | Some(0) => Ok(None),
        Some(hours) => TimeDelta::try_hours(i64::from(hours))
            .and_then(|delta| now.checked_add_signed(delta))
            .map(Some)
            .ok_or_else(|| format!("duration of {hours} hours is too long")),
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}
