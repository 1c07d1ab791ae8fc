// Free-running clock for playing without external sync. Step deadlines are
// linear offsets from a fixed reference time, not accumulated per step, so
// tempo stays accurate over long runs; the reference is re-based forward
// every RESET_INTERVAL steps by exactly the nominal elapsed duration to keep
// the offset arithmetic bounded.

use std::time::Instant;

use log::{debug, info, warn};

use super::{BPM_MAX, BPM_MIN, StepClock, step_duration};

/// Steps between reference re-bases (six bars of 32nds).
pub const RESET_INTERVAL: i64 = 192;

pub struct InternalClock {
    bpm: f32,
    play_mode: bool,
    step_position: i64,
    reference: Option<Instant>,
    steps_since_reference: i64,
}

impl InternalClock {
    pub fn new(bpm: f32) -> Self {
        Self {
            bpm,
            play_mode: false,
            step_position: -1,
            reference: None,
            steps_since_reference: 0,
        }
    }

    /// Live tempo change. The reference is re-based to the last step's
    /// nominal time so already-elapsed steps keep their old duration.
    pub fn set_bpm(&mut self, bpm: f32) {
        let bpm = bpm.clamp(BPM_MIN, BPM_MAX);
        if let Some(reference) = self.reference {
            if self.steps_since_reference > 0 {
                self.reference = Some(
                    reference + step_duration(self.bpm) * self.steps_since_reference as u32,
                );
                self.steps_since_reference = 0;
            }
        }
        info!("internal bpm {:.1} -> {:.1}", self.bpm, bpm);
        self.bpm = bpm;
    }

    fn deadline(&self) -> Option<Instant> {
        self.reference
            .map(|r| r + step_duration(self.bpm) * (self.steps_since_reference as u32 + 1))
    }
}

impl StepClock for InternalClock {
    fn start(&mut self, now: Instant) {
        info!("internal clock start");
        self.play_mode = true;
        self.step_position = -1;
        self.reference = Some(now);
        self.steps_since_reference = -1;
    }

    fn stop(&mut self) {
        info!("internal clock stop");
        self.play_mode = false;
    }

    fn resume(&mut self, now: Instant) {
        self.play_mode = true;
        self.reference = Some(now);
        self.steps_since_reference = -1;
    }

    fn process_pulse(&mut self, now: Instant) -> Option<i64> {
        if !self.play_mode {
            return None;
        }
        let reference = self.reference?;
        if now < reference {
            warn!("clock polled with time before reference, clamping");
            return None;
        }
        // first check after start fires immediately: step 0 lands on the
        // start reference itself
        let next_deadline = if self.steps_since_reference < 0 {
            reference
        } else {
            self.deadline()?
        };
        if now < next_deadline {
            return None;
        }
        self.steps_since_reference += 1;
        self.step_position += 1;
        if self.steps_since_reference >= RESET_INTERVAL {
            self.reference =
                Some(reference + step_duration(self.bpm) * RESET_INTERVAL as u32);
            self.steps_since_reference = 0;
            debug!("re-based internal clock reference");
        }
        Some(self.step_position)
    }

    fn next_step_time(&self) -> Option<Instant> {
        if !self.play_mode {
            return None;
        }
        if self.steps_since_reference < 0 {
            return self.reference;
        }
        self.deadline()
    }

    fn bpm(&self) -> f32 {
        self.bpm
    }

    fn is_playing(&self) -> bool {
        self.play_mode
    }

    fn step_position(&self) -> i64 {
        self.step_position
    }
}
