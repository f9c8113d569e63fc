//! Time bucketing
//!
//! `GROUP BY time(interval, offset)` partitions time into half-open buckets
//! `[start, start + interval)` where
//! `start = floor((t - offset) / interval) * interval + offset`.
//! Offsets are normalized modulo the interval, so `35s`, `5s` and `-5s` with
//! a `10s` interval all describe the same phase. A fixed time zone offset
//! shifts boundaries so buckets align to local time.

use serde::{Deserialize, Serialize};

use crate::model::{TimeRange, MAX_TIME, MIN_TIME};
use crate::query::duration::SECOND;

/// GROUP BY time interval and phase offset (nanoseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub duration: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Interval {
    pub fn new(duration: i64, offset: i64) -> Self {
        Self { duration, offset }
    }

    /// Offset reduced into `[0, duration)`
    pub fn normalized_offset(&self) -> i64 {
        if self.duration <= 0 {
            return 0;
        }
        self.offset.rem_euclid(self.duration)
    }
}

/// Maps timestamps to the bucket they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    every: i64,
    phase: i64,
    range: TimeRange,
}

impl Window {
    /// Bucketing for a statement
    ///
    /// Without an interval every point of the range falls into one bucket,
    /// stamped with the epoch whatever the range.
    pub fn new(interval: Option<Interval>, tz_offset_secs: Option<i32>, range: TimeRange) -> Self {
        match interval {
            Some(interval) if interval.duration > 0 => {
                let tz = i64::from(tz_offset_secs.unwrap_or(0)) * SECOND;
                let phase = (interval.normalized_offset() as i128 - tz as i128)
                    .rem_euclid(interval.duration as i128) as i64;
                Self {
                    every: interval.duration,
                    phase,
                    range,
                }
            }
            _ => Self::whole(range),
        }
    }

    /// A single bucket spanning the whole range
    pub fn whole(range: TimeRange) -> Self {
        Self {
            every: 0,
            phase: 0,
            range,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.every > 0
    }

    /// Bucket width, 0 when ungrouped
    pub fn every(&self) -> i64 {
        self.every
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Start of the bucket containing `t`
    pub fn bucket_start(&self, t: i64) -> i64 {
        if self.every == 0 {
            return 0;
        }
        let t = t as i128;
        let every = self.every as i128;
        let start = t - (t - self.phase as i128).rem_euclid(every);
        start.max(MIN_TIME as i128) as i64
    }

    /// Exclusive end of the bucket starting at `start`
    pub fn bucket_end(&self, start: i64) -> i64 {
        if self.every == 0 {
            return MAX_TIME;
        }
        start.saturating_add(self.every)
    }

    /// Start of the bucket after the one starting at `start`
    pub fn next_start(&self, start: i64) -> Option<i64> {
        if self.every == 0 {
            return None;
        }
        start.checked_add(self.every)
    }

    /// Start of the bucket before the one starting at `start`
    pub fn prev_start(&self, start: i64) -> Option<i64> {
        if self.every == 0 {
            return None;
        }
        start.checked_sub(self.every)
    }

    /// First bucket implied by an explicit lower time bound
    pub fn first_bucket(&self) -> Option<i64> {
        (self.every > 0 && self.range.has_min()).then(|| self.bucket_start(self.range.min))
    }

    /// Last bucket implied by an explicit upper time bound
    pub fn last_bucket(&self) -> Option<i64> {
        (self.every > 0 && self.range.has_max()).then(|| self.bucket_start(self.range.max))
    }

    /// Number of buckets from the one containing `from` to the one
    /// containing `to`, inclusive
    pub fn bucket_count(&self, from: i64, to: i64) -> usize {
        if self.every == 0 {
            return 1;
        }
        let first = self.bucket_start(from) as i128;
        let last = self.bucket_start(to) as i128;
        if last < first {
            return 0;
        }
        let n = (last - first) / self.every as i128 + 1;
        usize::try_from(n).unwrap_or(usize::MAX)
    }
}
