//! Adaptive delay between two successful status polls.

use std::time::Duration;

/// Picks the next poll delay from how far progress moved since the last poll.
///
/// | Δ progress   | delay                                         |
/// |--------------|-----------------------------------------------|
/// | > 20         | `max(base / 2, min)`                          |
/// | 11..=20      | `base`                                        |
/// | 1..=10       | `1.5 × base`                                  |
/// | ≤ 0          | `base × stall_multiplier^stalled`, up to `max` |
///
/// A regression counts as a stall. Results are always kept within `[min, max]`.
#[derive(Debug, Clone)]
pub struct AdaptiveInterval {
    base: Duration,
    min: Duration,
    max: Duration,
    stall_multiplier: f64,
    previous: u8,
    stalled: u32,
}

impl AdaptiveInterval {
    pub fn new(
        base: Duration,
        min: Duration,
        max: Duration,
        stall_multiplier: f64,
        start_progress: u8,
    ) -> Self {
        let max = max.max(min);
        let stall_multiplier = if stall_multiplier.is_finite() && stall_multiplier >= 1.0 {
            stall_multiplier
        } else {
            1.0
        };
        Self {
            base,
            min,
            max,
            stall_multiplier,
            previous: start_progress,
            stalled: 0,
        }
    }

    /// Consecutive polls without forward progress.
    pub fn stalled(&self) -> u32 {
        self.stalled
    }

    /// Record `progress` and return the delay before the next poll.
    pub fn next(&mut self, progress: u8) -> Duration {
        let delta = i16::from(progress) - i16::from(self.previous);
        self.previous = progress;

        let base_ms = self.base.as_millis() as f64;
        let ms = if delta > 20 {
            self.stalled = 0;
            base_ms / 2.0
        } else if delta > 10 {
            self.stalled = 0;
            base_ms
        } else if delta > 0 {
            self.stalled = 0;
            base_ms * 1.5
        } else {
            self.stalled = self.stalled.saturating_add(1);
            let exp = self.stalled.min(64) as i32;
            base_ms * self.stall_multiplier.powi(exp)
        };

        let max_ms = self.max.as_millis() as f64;
        let ms = ms.min(max_ms).round() as u64;
        Duration::from_millis(ms).clamp(self.min, self.max)
    }
}
