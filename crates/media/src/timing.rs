//! Timing tools used by a capture's worker: a wall clock for realtime
//! timestamps, loop-seam correction, and frame-rate limiting.

use std::thread;
use std::time::{Duration, Instant};

use crate::packet::{CodedUnit, MICROS};

/// Microseconds of wall-clock time since the clock was started.
#[derive(Debug, Clone, Copy)]
pub struct RealtimeClock {
    start: Instant,
}

impl RealtimeClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_micros(&self) -> i64 {
        i64::try_from(self.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    /// Overwrite `unit`'s timestamps with the elapsed time.
    pub fn stamp(&self, unit: &mut CodedUnit) {
        let now = self.elapsed_micros();
        unit.pts = Some(now);
        unit.dts = Some(now);
        unit.duration = 0;
        unit.time_base = MICROS;
    }
}

/// Keeps one stream's timestamps increasing when its source is rewound.
///
/// Every unit passes through [Self::apply]. After [Self::rewound] is called,
/// the next unit's timestamp is moved to one step past the last timestamp
/// before the rewind, and every unit after it is shifted by the same amount.
/// The step is the last unit's duration if the source provides one, otherwise
/// the distance between the last two timestamps.
#[derive(Debug, Clone, Default)]
pub struct LoopSeam {
    offset: i64,
    last_pts: Option<i64>,
    last_step: i64,
    pending: bool,
}

impl LoopSeam {
    pub fn new() -> Self {
        Self::default()
    }

    /// The amount currently added to every timestamp.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The stream was just rewound. The next unit starts a new lap.
    pub fn rewound(&mut self) {
        self.pending = true;
    }

    /// Shift `unit`'s timestamps by the current offset. Units without a
    /// presentation timestamp are left alone.
    pub fn apply(&mut self, unit: &mut CodedUnit) {
        let Some(pts) = unit.pts else {
            return;
        };

        if self.pending {
            self.pending = false;

            if let Some(last_pts) = self.last_pts {
                let step = if self.last_step > 0 { self.last_step } else { 1 };
                self.offset = last_pts + step - pts;
            }
        }

        let shifted = pts + self.offset;
        unit.pts = Some(shifted);
        unit.dts = unit.dts.map(|dts| dts + self.offset);

        if unit.duration > 0 {
            self.last_step = unit.duration;
        } else if let Some(last_pts) = self.last_pts
            && shifted > last_pts
        {
            self.last_step = shifted - last_pts;
        }

        self.last_pts = Some(shifted);
    }
}

/// Spaces out calls to [Self::pace] so they happen at most once per interval.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last: Instant,
}

impl RateLimiter {
    /// A limiter that allows one call per `interval`. With [None] it never
    /// waits.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Sleep until one interval has passed since the last call (or since the
    /// limiter was made), then start the next interval. Returns how long it
    /// slept.
    pub fn pace(&mut self) -> Duration {
        let slept = match self.interval {
            Some(interval) => {
                let remaining = interval.saturating_sub(self.last.elapsed());
                if !remaining.is_zero() {
                    thread::sleep(remaining);
                }
                remaining
            }
            None => Duration::ZERO,
        };

        self.last = Instant::now();
        slept
    }
}
