// Two clock sources drive the step grid: an external MIDI-synced clock and a
// free-running internal one. Only one may be in play mode at a time.

mod external;
mod internal;

pub use external::MidiClock;
pub use internal::InternalClock;

use std::time::Instant;

pub const BPM_MIN: f32 = 40.0;
pub const BPM_MAX: f32 = 300.0;
pub const DEFAULT_BPM: f32 = 120.0;

/// Shared contract of the two clock variants. `process_pulse` is the only
/// operation allowed to advance `step_position`.
pub trait StepClock {
    fn start(&mut self, now: Instant);
    fn stop(&mut self);
    /// Resume play mode without resetting the step position.
    fn resume(&mut self, now: Instant);
    /// Feed one timing pulse (external) or one elapsed-time check (internal).
    /// Returns the new step index when a step boundary was crossed.
    fn process_pulse(&mut self, now: Instant) -> Option<i64>;
    /// Predicted absolute time of the next step. Pure; safe to poll at any
    /// rate.
    fn next_step_time(&self) -> Option<Instant>;
    fn bpm(&self) -> f32;
    fn is_playing(&self) -> bool;
    fn step_position(&self) -> i64;
}

/// Owns both clock variants and enforces their mutual exclusion: starting
/// one stops the other. External transport always wins over the internal
/// clock.
pub struct ClockRack {
    pub external: MidiClock,
    pub internal: InternalClock,
}

impl ClockRack {
    pub fn new() -> Self {
        Self {
            external: MidiClock::new(),
            internal: InternalClock::new(DEFAULT_BPM),
        }
    }

    pub fn on_start(&mut self, now: Instant) {
        self.internal.stop();
        self.external.start(now);
    }

    pub fn on_stop(&mut self) {
        self.external.stop();
    }

    pub fn on_continue(&mut self, now: Instant) {
        self.internal.stop();
        self.external.resume(now);
    }

    pub fn on_pulse(&mut self, now: Instant) -> Option<i64> {
        self.external.process_pulse(now)
    }

    pub fn on_song_position(&mut self, position: u16) {
        self.external.set_song_position(position);
    }

    pub fn start_internal(&mut self, now: Instant) {
        if !self.external.is_playing() {
            self.internal.start(now);
        }
    }

    pub fn stop_internal(&mut self) {
        self.internal.stop();
    }

    pub fn toggle_internal(&mut self, now: Instant) {
        if self.external.is_playing() {
            return;
        }
        if self.internal.is_playing() {
            self.internal.stop();
        } else {
            self.internal.start(now);
        }
    }

    /// Advance the internal clock against wall time. A no-op while external
    /// sync is running.
    pub fn poll_internal(&mut self, now: Instant) -> Option<i64> {
        if self.external.is_playing() {
            return None;
        }
        self.internal.process_pulse(now)
    }

    pub fn running(&self) -> bool {
        self.external.is_playing() || self.internal.is_playing()
    }

    pub fn bpm(&self) -> f32 {
        if self.external.is_playing() {
            self.external.bpm()
        } else {
            self.internal.bpm()
        }
    }

    pub fn step_position(&self) -> i64 {
        if self.external.is_playing() {
            self.external.step_position()
        } else {
            self.internal.step_position()
        }
    }

    pub fn next_step_time(&self) -> Option<Instant> {
        if self.external.is_playing() {
            self.external.next_step_time()
        } else {
            self.internal.next_step_time()
        }
    }
}

impl Default for ClockRack {
    fn default() -> Self {
        Self::new()
    }
}

/// Duration of one 32nd-note step at the given tempo.
pub fn step_duration(bpm: f32) -> std::time::Duration {
    std::time::Duration::from_secs_f64(60.0 / bpm as f64 / crate::shared::STEPS_PER_BEAT as f64)
}
