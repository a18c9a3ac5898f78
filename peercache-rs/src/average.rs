//! Provides a helper which computes a sliding average of a series of values.
//!
//! This is used to keep track of the latency of peer fetches (in microseconds). An
//! [Average](Average) is internally mutable without needing a mutable reference, as it only
//! relies on atomic operations.
//!
//! # Example
//!
//! ```
//! # use peercache::average::Average;
//! let avg = Average::new();
//! avg.add(10);
//! avg.add(20);
//! avg.add(30);
//!
//! assert_eq!(avg.avg(), 20);
//! assert_eq!(avg.count(), 3);
//! ```
use crate::fmt::format_micros;
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAX_SAMPLES: u32 = 100;

/// Computes a sliding average of a series of values.
///
/// The sum and the number of samples are packed into a single **u64** (upper and lower 32 bits)
/// so that both are always updated together. Once more than 100 samples have been recorded or
/// the sum would overflow, both are halved. The total number of recorded values is tracked
/// separately.
#[derive(Default)]
pub struct Average {
    sum_and_count: AtomicU64,
    count: AtomicU64,
}

fn unpack(sum_and_count: u64) -> (u32, u32) {
    ((sum_and_count >> 32) as u32, sum_and_count as u32)
}

fn pack(sum: u32, count: u32) -> u64 {
    (sum as u64) << 32 | count as u64
}

impl Average {
    /// Creates a new average.
    pub fn new() -> Average {
        Average::default()
    }

    /// Records another value.
    pub fn add(&self, value: u32) {
        let _ = self.count.fetch_add(1, Ordering::Relaxed);

        let _ = self
            .sum_and_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                let (mut sum, mut count) = unpack(current);
                while count > 0 && (count >= MAX_SAMPLES || sum.checked_add(value).is_none()) {
                    sum = ((sum as u64 * (count / 2) as u64) / count as u64) as u32;
                    count /= 2;
                }

                Some(pack(sum + value, count + 1))
            });
    }

    /// Records the given duration in microseconds.
    pub fn add_duration(&self, duration: Duration) {
        self.add(u32::try_from(duration.as_micros()).unwrap_or(u32::MAX));
    }

    /// Returns the total number of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Computes the sliding average of the most recent values.
    pub fn avg(&self) -> u32 {
        match unpack(self.sum_and_count.load(Ordering::Relaxed)) {
            (_, 0) => 0,
            (sum, count) => sum / count,
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_micros(i32::try_from(self.avg()).unwrap_or(i32::MAX), f)?;
        write!(f, " ({})", self.count())
    }
}

#[cfg(test)]
mod tests {
    use crate::average::Average;
    use std::time::Duration;

    #[test]
    fn empty_average_is_properly_initialized() {
        let avg = Average::new();
        assert_eq!(avg.avg(), 0);
        assert_eq!(avg.count(), 0);
    }

    #[test]
    fn average_with_some_values_works() {
        let avg = Average::new();
        for i in 1..=10 {
            avg.add(i);
        }
        assert_eq!(avg.avg(), 5);
        assert_eq!(avg.count(), 10);
    }

    #[test]
    fn average_slides_towards_recent_values() {
        let avg = Average::new();
        for _ in 0..1000 {
            avg.add(10);
        }
        for _ in 0..1000 {
            avg.add(1000);
        }

        assert_eq!(avg.count(), 2000);
        assert!(avg.avg() > 900);
    }

    #[test]
    fn average_overflows_sanely() {
        let avg = Average::new();
        avg.add(u32::MAX);
        assert_eq!(avg.avg(), u32::MAX);
        avg.add(u32::MAX);
        assert_eq!(avg.avg(), u32::MAX);
    }

    #[test]
    fn formatting_average_works() {
        let avg = Average::new();
        avg.add_duration(Duration::from_micros(10_123));
        assert_eq!(format!("{}", avg), "10.1 ms (1)");
    }
}
