// Rhythmic mute. A single gate mutes `(1 - ratio)` of every `period` steps;
// stacked gates concatenate their periods and the step walks the combined
// cycle, so layered holds produce polyrhythmic on/off patterns instead of a
// plain AND.

pub struct Gate {
    periods: Vec<i64>,
}

impl Gate {
    pub fn new() -> Self {
        Self { periods: Vec::new() }
    }

    pub fn engage(&mut self, period: i64) {
        if period > 0 {
            self.periods.push(period);
        }
    }

    /// Remove one instance of `period`. No-op if it is not engaged.
    pub fn release(&mut self, period: i64) {
        if let Some(pos) = self.periods.iter().position(|&p| p == period) {
            self.periods.remove(pos);
        }
    }

    pub fn cancel(&mut self) {
        self.periods.clear();
    }

    pub fn active(&self) -> bool {
        !self.periods.is_empty()
    }

    /// Whether `step` falls in an "on" window. With no gate engaged every
    /// step is on.
    pub fn is_on(&self, step: i64, ratio: f32) -> bool {
        if self.periods.is_empty() {
            return true;
        }
        let combined: i64 = self.periods.iter().sum();
        let mut pos = step.rem_euclid(combined);
        for &period in &self.periods {
            if pos < period {
                return pos as f32 <= ratio * period as f32;
            }
            pos -= period;
        }
        // unreachable: pos < combined by construction
        true
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
