// Per-step effects pipeline. Runs once per step before rendering and turns
// the raw clock step plus the live control snapshot into the resolved
// StepParams the renderer consumes. Order matters: latch first (it picks the
// chunk), then pitch bend, then gate, then the stretch slice.

mod flip;
mod gate;
mod latch;
mod pitch;
mod stretch;

pub use flip::SampleFlip;
pub use gate::Gate;
pub use latch::Latch;
pub use pitch::PitchBend;
pub use stretch::Stretch;

use crate::shared::{ControlSnapshot, JOYSTICK_DEADZONE};

/// Resolved parameters for one step's render. `step` is None when nothing
/// should render at all (stretch stutter); `play_step` false means the step
/// still advances but is replaced with silence.
#[derive(Clone, Debug)]
pub struct StepParams {
    pub step: Option<i64>,
    pub play_step: bool,
    pub pitch_rate: f32,
    pub stretch_rate: f32,
    pub chunk_count: usize,
}

impl StepParams {
    /// `tempo_ratio` is track bpm over sample bpm; it seeds the stretch rate
    /// so one chunk fills exactly one step at the track tempo.
    pub fn new(step: i64, tempo_ratio: f32, chunk_count: usize) -> Self {
        Self {
            step: Some(step),
            play_step: true,
            pitch_rate: 1.0,
            stretch_rate: tempo_ratio,
            chunk_count,
        }
    }

    /// Shift pitch by `semitones` without changing the step's duration: the
    /// frequency ratio goes into the pitch rate and comes back out of the
    /// stretch rate.
    pub fn apply_semitones(&mut self, semitones: f32) {
        let ratio = 2f32.powf(semitones / 12.0);
        self.pitch_rate *= ratio;
        self.stretch_rate /= ratio;
    }

    /// Raw samples consumed per output sample.
    pub fn effective_rate(&self) -> f32 {
        self.pitch_rate * self.stretch_rate
    }
}

/// What the joystick's second axis does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoystickMode {
    /// Y engages an extra gate while deflected.
    GateRepeat,
    /// Y bends pitch while the latch is held.
    PitchStretch,
}

// longer deflection = shorter repeat unit
fn joystick_latch_length(magnitude: f32) -> i64 {
    if magnitude > 0.95 {
        1
    } else if magnitude > 0.85 {
        2
    } else if magnitude > 0.7 {
        4
    } else {
        8
    }
}

/// All effect state, owned by the engine and mutated only from the step
/// preparation path.
pub struct FxState {
    pub gate: Gate,
    pub latch: Latch,
    pub bend: PitchBend,
    pub stretch: Stretch,
    pub flip: SampleFlip,
    pub mode: JoystickMode,
    joystick_length: Option<i64>,
    joystick_gate: Option<i64>,
}

impl FxState {
    pub fn new() -> Self {
        Self {
            gate: Gate::new(),
            latch: Latch::new(),
            bend: PitchBend::new(),
            stretch: Stretch::new(0.5),
            flip: SampleFlip::new(),
            mode: JoystickMode::PitchStretch,
            joystick_length: None,
            joystick_gate: None,
        }
    }

    /// Reconcile engage/release edges with the current control values. Safe
    /// to call at any rate, including while stopped; releasing the joystick
    /// cancels its latch here even when no step is being prepared.
    pub fn sync_controls(&mut self, step: i64, controls: &ControlSnapshot) {
        if controls.slow {
            self.stretch.engage(step);
        } else {
            self.stretch.cancel();
        }

        let (x, y) = controls.joystick;
        if x.abs() > JOYSTICK_DEADZONE {
            // a fast flick peaks between updates; size the repeat off the
            // recent peak, not wherever the stick happens to sit now
            let deflection = x.abs().max(controls.joystick_history.peak_x());
            let length = joystick_latch_length(deflection);
            match self.joystick_length {
                None => self.latch.engage(step, length),
                Some(prev) if prev != length => self.latch.set_length(length),
                _ => {}
            }
            self.joystick_length = Some(length);
        } else if let Some(length) = self.joystick_length.take() {
            self.latch.release(length);
            if !self.latch.active() {
                self.bend.cancel();
            }
        }

        if self.mode == JoystickMode::GateRepeat {
            if y.abs() > JOYSTICK_DEADZONE {
                if self.joystick_gate.is_none() {
                    self.gate.engage(controls.gate_period);
                    self.joystick_gate = Some(controls.gate_period);
                }
            } else if let Some(period) = self.joystick_gate.take() {
                self.gate.release(period);
            }
        }
    }

    /// Run the pipeline for one step. The gate and the stretch slice key off
    /// the raw clock step so their rhythm stays locked to the grid even while
    /// the latch rewrites which chunk plays.
    pub fn apply(&mut self, params: &mut StepParams, controls: &ControlSnapshot) {
        let Some(raw_step) = params.step else { return };
        self.sync_controls(raw_step, controls);

        if self.latch.active() {
            params.step = Some(self.latch.resolve(raw_step));
        }

        if self.mode == JoystickMode::PitchStretch && self.latch.active() {
            let y = controls.joystick.1;
            if y.abs() > JOYSTICK_DEADZONE {
                self.bend.bend(y > 0.0);
            }
        }
        if self.bend.semitones() != 0 {
            params.apply_semitones(self.bend.semitones() as f32);
        }

        if !self.gate.is_on(raw_step, controls.gate_ratio) {
            params.play_step = false;
        }

        if self.stretch.active() {
            match self.stretch.slice(raw_step, params.chunk_count) {
                Some(slice) => {
                    params.step = Some(slice);
                    params.stretch_rate *= self.stretch.rate();
                }
                None => params.step = None,
            }
        }
    }

    /// Cancel everything. Safe when already inactive.
    pub fn cancel_all(&mut self) {
        self.gate.cancel();
        self.latch.cancel();
        self.bend.cancel();
        self.stretch.cancel();
        let _ = self.flip.release();
        self.joystick_length = None;
        self.joystick_gate = None;
    }
}

impl Default for FxState {
    fn default() -> Self {
        Self::new()
    }
}
