//! Sample timing for device sinks
//!
//! Times are rational: `value / timescale` seconds. A frame at `fps` uses a
//! timescale of `fps * 100` and a duration of 100 units, so presentation
//! time stays exact for any integer frame rate.

use std::time::Duration;

/// Ticks per frame at any frame rate
const UNITS_PER_FRAME: i64 = 100;

/// Rational time value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }

    /// Negative values clamp to zero
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs_f64(self.as_secs_f64().max(0.0))
    }
}

/// Duration plus presentation and decode timestamps of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    pub duration: MediaTime,
    pub presentation: MediaTime,
    pub decode: MediaTime,
}

impl SampleTiming {
    /// Timing for the `sequence`-th frame of a stream running at `fps`.
    ///
    /// An fps of zero is treated as one.
    pub fn for_sequence(fps: u32, sequence: u64) -> Self {
        let fps = fps.max(1);
        let timescale = fps.saturating_mul(UNITS_PER_FRAME as u32);
        let duration = MediaTime::new(UNITS_PER_FRAME, timescale);

        let value = i64::try_from(sequence)
            .unwrap_or(i64::MAX)
            .saturating_mul(UNITS_PER_FRAME);
        let stamp = MediaTime::new(value, timescale);

        Self {
            duration,
            presentation: stamp,
            decode: stamp,
        }
    }
}
