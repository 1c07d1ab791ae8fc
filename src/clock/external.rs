// Clock driven by MIDI real-time messages: 24 timing pulses per quarter
// note, one step per 3 pulses. Tempo is estimated from pulse arrival times
// and accepted only after two consecutive agreeing estimates, so a single
// jittery estimation window never moves the BPM.

use std::time::Instant;

use log::{debug, info, warn};

use crate::shared::{PULSES_PER_QUARTER, PULSES_PER_STEP};

use super::{BPM_MAX, BPM_MIN, DEFAULT_BPM, StepClock, step_duration};

/// Pulse intervals per tempo re-estimate (two quarter notes).
pub const BPM_PULSE_WINDOW: i64 = 48;

/// Consecutive estimates must agree within this many BPM to be accepted.
const BPM_AGREE_TOLERANCE: f32 = 2.0;

pub struct MidiClock {
    tick_counter: i64,
    step_position: i64,
    play_mode: bool,
    bpm: f32,
    pending_bpm: Option<f32>,
    window_start: Option<Instant>,
    window_pulses: i64,
    last_step_time: Option<Instant>,
}

impl MidiClock {
    pub fn new() -> Self {
        Self {
            tick_counter: -1,
            step_position: -1,
            play_mode: false,
            bpm: DEFAULT_BPM,
            pending_bpm: None,
            window_start: None,
            window_pulses: 0,
            last_step_time: None,
        }
    }

    /// MIDI song position pointer: an absolute seek. SPP counts 16th notes,
    /// our grid is 32nds, and the next pulse lands on the following step.
    pub fn set_song_position(&mut self, position: u16) {
        self.step_position = 2 * position as i64 - 1;
        self.tick_counter = -1;
        info!("song position set, next step {}", self.step_position + 1);
    }

    // Counts completed pulse intervals since the window opened; the window
    // opens on its first pulse, so `elapsed` spans exactly `window_pulses`
    // intervals when the estimate fires.
    fn estimate_bpm(&mut self, now: Instant) {
        let Some(window_start) = self.window_start else {
            self.window_start = Some(now);
            self.window_pulses = 0;
            return;
        };
        self.window_pulses += 1;
        if self.window_pulses < BPM_PULSE_WINDOW {
            return;
        }
        let elapsed = now.duration_since(window_start).as_secs_f64();
        let intervals = self.window_pulses;
        self.window_start = Some(now);
        self.window_pulses = 0;
        if elapsed <= 0.0 {
            return;
        }
        let quarters = intervals as f64 / PULSES_PER_QUARTER as f64;
        let estimate = (quarters / elapsed * 60.0) as f32;
        if !(BPM_MIN..=BPM_MAX).contains(&estimate) {
            debug!("rejecting implausible bpm estimate {estimate:.2}");
            self.pending_bpm = None;
            return;
        }
        match self.pending_bpm {
            Some(pending) if (pending - estimate).abs() <= BPM_AGREE_TOLERANCE => {
                if (self.bpm - estimate).abs() > f32::EPSILON {
                    info!("bpm {:.2} -> {:.2}", self.bpm, estimate);
                }
                self.bpm = estimate;
                self.pending_bpm = Some(estimate);
            }
            _ => {
                // first sample, or disagreement with the previous one: hold
                // until a second estimate confirms it
                self.pending_bpm = Some(estimate);
            }
        }
    }
}

impl StepClock for MidiClock {
    fn start(&mut self, _now: Instant) {
        info!("midi start");
        self.play_mode = true;
        self.tick_counter = -1;
        self.step_position = -1;
        self.window_start = None;
        self.window_pulses = 0;
        self.pending_bpm = None;
        self.last_step_time = None;
    }

    fn stop(&mut self) {
        info!("midi stop");
        self.play_mode = false;
    }

    fn resume(&mut self, _now: Instant) {
        info!("midi continue");
        self.play_mode = true;
        self.window_start = None;
        self.window_pulses = 0;
        self.pending_bpm = None;
    }

    fn process_pulse(&mut self, now: Instant) -> Option<i64> {
        let now = match self.window_start {
            // a pulse from before our reference is a wiring fault; clamp it
            Some(start) if now < start => {
                warn!("clock pulse earlier than reference, clamping");
                start
            }
            _ => now,
        };
        self.tick_counter += 1;
        self.estimate_bpm(now);
        if self.play_mode && self.tick_counter % PULSES_PER_STEP == 0 {
            self.step_position += 1;
            self.last_step_time = Some(now);
            debug!("step {}", self.step_position);
            return Some(self.step_position);
        }
        None
    }

    fn next_step_time(&self) -> Option<Instant> {
        if !self.play_mode {
            return None;
        }
        self.last_step_time.map(|t| t + step_duration(self.bpm))
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

impl Default for MidiClock {
    fn default() -> Self {
        Self::new()
    }
}
