// Freeze-and-repeat. On first engagement the latch anchors to the nearest
// musically aligned step below the trigger, then maps every later step back
// into the `length`-step window starting there. Lengths stack so a second
// held trigger narrows the repeat and releasing it restores the first.

pub struct Latch {
    anchor: Option<i64>,
    lengths: Vec<i64>,
    chain: Vec<usize>,
    chain_pos: usize,
    last_offset: i64,
}

/// Anchors snap down to this grid.
const ANCHOR_QUANTIZE: i64 = 4;

impl Latch {
    pub fn new() -> Self {
        Self {
            anchor: None,
            lengths: Vec::new(),
            chain: Vec::new(),
            chain_pos: 0,
            last_offset: 0,
        }
    }

    pub fn active(&self) -> bool {
        self.anchor.is_some() && !self.lengths.is_empty()
    }

    /// Engage with a repeat length. The anchor is set only on the first
    /// engagement so stacked triggers repeat the same window.
    pub fn engage(&mut self, step: i64, length: i64) {
        if length <= 0 {
            return;
        }
        if self.anchor.is_none() {
            self.anchor = Some(step - step.rem_euclid(ANCHOR_QUANTIZE));
            self.last_offset = 0;
            self.chain_pos = 0;
        }
        self.lengths.push(length);
    }

    /// Release one instance of `length`; the latch stays anchored while any
    /// trigger is still held.
    pub fn release(&mut self, length: i64) {
        if let Some(pos) = self.lengths.iter().position(|&l| l == length) {
            self.lengths.remove(pos);
        }
        if self.lengths.is_empty() {
            self.anchor = None;
        }
    }

    /// Replace the active repeat length without re-anchoring.
    pub fn set_length(&mut self, length: i64) {
        if length > 0 {
            if let Some(last) = self.lengths.last_mut() {
                *last = length;
            }
        }
    }

    pub fn cancel(&mut self) {
        self.anchor = None;
        self.lengths.clear();
        self.chain.clear();
        self.chain_pos = 0;
    }

    /// Sample indices to round-robin through, one per repeat of the window.
    pub fn set_chain(&mut self, chain: Vec<usize>) {
        if chain != self.chain {
            self.chain = chain;
            self.chain_pos = 0;
        }
    }

    pub fn chain_sample(&self) -> Option<usize> {
        self.chain.get(self.chain_pos).copied()
    }

    /// Map a raw step into the latched window. Advances the chain cursor
    /// each time the window wraps back to its anchor.
    pub fn resolve(&mut self, step: i64) -> i64 {
        let (Some(anchor), Some(&length)) = (self.anchor, self.lengths.last()) else {
            return step;
        };
        let offset = (step - anchor).rem_euclid(length);
        if offset < self.last_offset && self.chain.len() > 1 {
            self.chain_pos = (self.chain_pos + 1) % self.chain.len();
        }
        self.last_offset = offset;
        anchor + offset
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_to_quantized_step() {
        let mut latch = Latch::new();
        latch.engage(13, 4);
        assert_eq!(latch.resolve(13), 13);
        assert_eq!(latch.resolve(14), 14);
        assert_eq!(latch.resolve(15), 15);
        // window wraps back to the anchor at 12
        assert_eq!(latch.resolve(16), 12);
        assert_eq!(latch.resolve(17), 13);
    }

    #[test]
    fn inactive_latch_passes_steps_through() {
        let mut latch = Latch::new();
        assert_eq!(latch.resolve(42), 42);
        latch.engage(42, 2);
        latch.cancel();
        assert_eq!(latch.resolve(43), 43);
    }

    #[test]
    fn stacked_lengths_restore_on_release() {
        let mut latch = Latch::new();
        latch.engage(8, 8);
        latch.engage(9, 2);
        // inner latch of 2 wins while held
        assert_eq!(latch.resolve(10), 8);
        latch.release(2);
        // back to the 8-step window, same anchor
        assert_eq!(latch.resolve(10), 10);
        latch.release(8);
        assert!(!latch.active());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut latch = Latch::new();
        latch.cancel();
        latch.engage(4, 4);
        latch.cancel();
        latch.cancel();
        assert!(!latch.active());
    }

    #[test]
    fn chain_advances_once_per_window_wrap() {
        let mut latch = Latch::new();
        latch.engage(0, 2);
        latch.set_chain(vec![3, 5]);
        assert_eq!(latch.chain_sample(), Some(3));
        let _ = latch.resolve(0);
        let _ = latch.resolve(1);
        assert_eq!(latch.chain_sample(), Some(3));
        let _ = latch.resolve(2); // wrap
        assert_eq!(latch.chain_sample(), Some(5));
        let _ = latch.resolve(3);
        let _ = latch.resolve(4); // wrap again
        assert_eq!(latch.chain_sample(), Some(3));
    }
}
