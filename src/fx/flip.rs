// Sample roulette. While held, the active sample is swapped for a random
// other one every `speed` steps; release restores whatever was playing when
// the flip started.

pub struct SampleFlip {
    original: Option<usize>,
    last_flip_step: Option<i64>,
}

impl SampleFlip {
    pub fn new() -> Self {
        Self { original: None, last_flip_step: None }
    }

    pub fn active(&self) -> bool {
        self.original.is_some()
    }

    pub fn engage(&mut self, current_sample: usize) {
        if self.original.is_none() {
            self.original = Some(current_sample);
            self.last_flip_step = None;
        }
    }

    /// Whether `step` is due for a new random sample. At most one flip per
    /// step even when polled repeatedly.
    pub fn wants_flip(&mut self, step: i64, speed: i64) -> bool {
        if self.original.is_none() || speed <= 0 {
            return false;
        }
        if step.rem_euclid(speed) != 0 || self.last_flip_step == Some(step) {
            return false;
        }
        self.last_flip_step = Some(step);
        true
    }

    /// Release, returning the sample to restore. Idempotent.
    pub fn release(&mut self) -> Option<usize> {
        self.last_flip_step = None;
        self.original.take()
    }
}

impl Default for SampleFlip {
    fn default() -> Self {
        Self::new()
    }
}
