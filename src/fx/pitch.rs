// Accumulated semitone offset, bent one semitone per step while the bend
// axis is held. Past an octave it snaps back to zero instead of running away.

const SNAP_LIMIT: i32 = 12;

pub struct PitchBend {
    semitones: i32,
}

impl PitchBend {
    pub fn new() -> Self {
        Self { semitones: 0 }
    }

    pub fn semitones(&self) -> i32 {
        self.semitones
    }

    /// Accumulate one semitone in the given direction.
    pub fn bend(&mut self, up: bool) {
        self.semitones += if up { 1 } else { -1 };
        if self.semitones.abs() > SNAP_LIMIT {
            self.semitones = 0;
        }
    }

    pub fn cancel(&mut self) {
        self.semitones = 0;
    }

    /// Frequency ratio of the current offset.
    pub fn ratio(&self) -> f32 {
        2f32.powf(self.semitones as f32 / 12.0)
    }
}

impl Default for PitchBend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_semitone_per_bend() {
        let mut bend = PitchBend::new();
        bend.bend(true);
        bend.bend(true);
        assert_eq!(bend.semitones(), 2);
        bend.bend(false);
        assert_eq!(bend.semitones(), 1);
    }

    #[test]
    fn octave_ratio_doubles() {
        let mut bend = PitchBend::new();
        for _ in 0..12 {
            bend.bend(true);
        }
        assert!((bend.ratio() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn snaps_back_past_an_octave() {
        let mut bend = PitchBend::new();
        for _ in 0..13 {
            bend.bend(false);
        }
        assert_eq!(bend.semitones(), 0);
        assert!((bend.ratio() - 1.0).abs() < 1e-6);
    }
}
