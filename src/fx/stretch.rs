// Half-time smear. While engaged, the chunk index advances at a fractional
// rate from a bar-aligned anchor; only integer landings render a new chunk
// and the in-between steps skip, which gives the effect its stutter.

use crate::shared::STEPS_PER_BAR;

/// Slop for the integer-boundary test, soaking up f32 noise in
/// `rate * steps`.
const BOUNDARY_EPSILON: f32 = 1e-4;

pub struct Stretch {
    anchor: Option<i64>,
    rate: f32,
}

impl Stretch {
    pub fn new(rate: f32) -> Self {
        Self { anchor: None, rate }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn active(&self) -> bool {
        self.anchor.is_some()
    }

    /// Engage at `step`; the anchor snaps down to the bar boundary so the
    /// smear starts musically aligned. Re-engaging while active keeps the
    /// existing anchor.
    pub fn engage(&mut self, step: i64) {
        if self.anchor.is_none() {
            self.anchor = Some(step - step.rem_euclid(STEPS_PER_BAR));
        }
    }

    pub fn cancel(&mut self) {
        self.anchor = None;
    }

    /// Chunk index for `step`, or None when the fractional position does not
    /// land on an integer boundary.
    pub fn slice(&self, step: i64, chunk_count: usize) -> Option<i64> {
        let anchor = self.anchor?;
        let pos = self.rate * (step - anchor) as f32;
        let nearest = pos.round();
        if (pos - nearest).abs() > BOUNDARY_EPSILON {
            return None;
        }
        Some((anchor + nearest as i64).rem_euclid(chunk_count as i64))
    }
}
