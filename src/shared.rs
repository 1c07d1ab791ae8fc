// Musical constants and the control-surface model. The physical controls
// (ADC knobs, keypad matrix, joystick) live outside the core; this module is
// the numeric shape of what they report.

pub const SAMPLE_RATE: u32 = 44_100;
pub const BYTES_PER_SAMPLE: usize = 2; // i16 LE mono

pub const PULSES_PER_QUARTER: i64 = 24;
pub const STEPS_PER_BEAT: i64 = 8; // 32nd-note grid
pub const PULSES_PER_STEP: i64 = PULSES_PER_QUARTER / STEPS_PER_BEAT;
pub const STEPS_PER_BAR: i64 = 32;
pub const CHUNKS_PER_BEAT: usize = 8;

pub const NUM_PADS: usize = 8;

// selector tables for the stepped faders
pub const GATE_PERIODS: [i64; 5] = [2, 4, 8, 16, 32];
pub const LATCH_LENGTHS: [i64; 8] = [1, 2, 3, 4, 6, 8, 16, 32];
pub const FLIP_SPEEDS: [i64; 6] = [1, 2, 4, 8, 16, 32];

pub const GRAIN_SECONDS_MIN: f32 = 0.0001;
pub const GRAIN_SECONDS_MAX: f32 = 0.080;
pub const GRAIN_SECONDS_DEFAULT: f32 = 0.015;

/// Joystick deflection beyond this engages an axis.
pub const JOYSTICK_DEADZONE: f32 = 0.5;

/// Edge/delta events from the control surface. The engine folds these into
/// its held `ControlSnapshot` between steps.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    // sample pads: switch sample + open the voice
    PadDown(usize),
    PadUp(usize),

    // latch pads: same, plus engage the button latch (the "snare roll" pads)
    LatchPadDown(usize),
    LatchPadUp(usize),

    // performance buttons
    SlowDown,
    SlowUp,
    FlipDown,
    FlipUp,
    HoldToggle,
    PlayToggle,
    ToggleJoystickMode,

    // joystick
    JoystickMove(f32, f32),
    JoystickPress,
    JoystickRelease,

    // faders and knobs, deltas in domain units
    AdjustGateRatio(f32),
    CycleGatePeriod(i32),
    CycleLatchLength(i32),
    CycleFlipSpeed(i32),
    AdjustGrain(f32),
    AdjustFilter(f32),
    AdjustVolume(f32),
    AdjustBpm(f32),

    // sample-select rotary + bank button
    RotaryTurn(i32),
    SwitchBank,
}

/// Last few joystick positions, newest first. A fast flick peaks between
/// two step preparations; effects that key off deflection magnitude read
/// the peak over this window instead of the instantaneous value.
#[derive(Clone, Copy, Debug, Default)]
pub struct JoystickHistory {
    ring: [(f32, f32); 8],
    head: usize,
}

impl JoystickHistory {
    pub fn push(&mut self, x: f32, y: f32) {
        self.head = (self.head + 1) % self.ring.len();
        self.ring[self.head] = (x, y);
    }

    /// Largest |x| seen in the window.
    pub fn peak_x(&self) -> f32 {
        self.ring.iter().map(|&(x, _)| x.abs()).fold(0.0, f32::max)
    }
}

/// Everything the effects pipeline reads, captured once per step preparation.
#[derive(Clone, Debug)]
pub struct ControlSnapshot {
    pub joystick: (f32, f32),
    pub joystick_pressed: bool,
    pub joystick_history: JoystickHistory,

    pub gate_ratio: f32,   // [0, 1]
    pub gate_period: i64,  // GATE_PERIODS selector
    pub latch_length: i64, // LATCH_LENGTHS selector
    pub flip_speed: i64,   // FLIP_SPEEDS selector

    pub grain_seconds: f32, // [GRAIN_SECONDS_MIN, GRAIN_SECONDS_MAX]
    pub filter: f32,        // [-1, 1], negative = high-pass
    pub volume: f32,        // [0, 1]

    pub held_pads: [bool; NUM_PADS],
    pub held_latch_pads: [bool; NUM_PADS],
    pub slow: bool,
    pub flip: bool,

    pub rotary: i32,
}

impl Default for ControlSnapshot {
    fn default() -> Self {
        Self {
            joystick: (0.0, 0.0),
            joystick_pressed: false,
            joystick_history: JoystickHistory::default(),
            gate_ratio: 1.0,
            gate_period: 4,
            latch_length: 4,
            flip_speed: 4,
            grain_seconds: GRAIN_SECONDS_DEFAULT,
            filter: 0.0,
            volume: 0.8,
            held_pads: [false; NUM_PADS],
            held_latch_pads: [false; NUM_PADS],
            slow: false,
            flip: false,
            rotary: 0,
        }
    }
}

impl ControlSnapshot {
    pub fn any_pad_held(&self) -> bool {
        self.held_pads.iter().chain(self.held_latch_pads.iter()).any(|&h| h)
    }

    /// Fold one edge/delta event into the snapshot. Events with engine-level
    /// side effects (clock start, latch activation) are also handled by the
    /// engine; this only maintains the raw values.
    pub fn apply(&mut self, event: &ControlEvent) {
        match event {
            ControlEvent::PadDown(i) => {
                if let Some(p) = self.held_pads.get_mut(*i) {
                    *p = true;
                }
            }
            ControlEvent::PadUp(i) => {
                if let Some(p) = self.held_pads.get_mut(*i) {
                    *p = false;
                }
            }
            ControlEvent::LatchPadDown(i) => {
                if let Some(p) = self.held_latch_pads.get_mut(*i) {
                    *p = true;
                }
            }
            ControlEvent::LatchPadUp(i) => {
                if let Some(p) = self.held_latch_pads.get_mut(*i) {
                    *p = false;
                }
            }
            ControlEvent::SlowDown => self.slow = true,
            ControlEvent::SlowUp => self.slow = false,
            ControlEvent::FlipDown => self.flip = true,
            ControlEvent::FlipUp => self.flip = false,
            ControlEvent::JoystickMove(x, y) => {
                self.joystick = (x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0));
                self.joystick_history.push(self.joystick.0, self.joystick.1);
            }
            ControlEvent::JoystickPress => self.joystick_pressed = true,
            ControlEvent::JoystickRelease => self.joystick_pressed = false,
            ControlEvent::AdjustGateRatio(d) => {
                self.gate_ratio = (self.gate_ratio + d).clamp(0.0, 1.0);
            }
            ControlEvent::CycleGatePeriod(d) => {
                self.gate_period = cycle(&GATE_PERIODS, self.gate_period, *d);
            }
            ControlEvent::CycleLatchLength(d) => {
                self.latch_length = cycle(&LATCH_LENGTHS, self.latch_length, *d);
            }
            ControlEvent::CycleFlipSpeed(d) => {
                self.flip_speed = cycle(&FLIP_SPEEDS, self.flip_speed, *d);
            }
            ControlEvent::AdjustGrain(d) => {
                self.grain_seconds =
                    (self.grain_seconds + d).clamp(GRAIN_SECONDS_MIN, GRAIN_SECONDS_MAX);
            }
            ControlEvent::AdjustFilter(d) => {
                self.filter = (self.filter + d).clamp(-1.0, 1.0);
            }
            ControlEvent::AdjustVolume(d) => {
                self.volume = (self.volume + d).clamp(0.0, 1.0);
            }
            ControlEvent::RotaryTurn(d) => self.rotary += d,
            // handled entirely by the engine
            ControlEvent::HoldToggle
            | ControlEvent::PlayToggle
            | ControlEvent::ToggleJoystickMode
            | ControlEvent::AdjustBpm(_)
            | ControlEvent::SwitchBank => {}
        }
    }
}

// step through a selector table from the entry closest to `current`
fn cycle(table: &[i64], current: i64, delta: i32) -> i64 {
    let pos = table
        .iter()
        .enumerate()
        .min_by_key(|&(_, &v)| (v - current).abs())
        .map(|(i, _)| i as i32)
        .unwrap_or(0);
    let next = (pos + delta).clamp(0, table.len() as i32 - 1);
    table[next as usize]
}

/// Reports a control value to the log once per change, like the device's
/// little parameter readout. `min_change` filters ADC-style jitter.
pub struct ParamLog {
    name: &'static str,
    prev: Option<f32>,
    min_change: f32,
}

impl ParamLog {
    pub fn new(name: &'static str, min_change: f32) -> Self {
        Self { name, prev: None, min_change }
    }

    pub fn update(&mut self, value: f32) {
        match self.prev {
            Some(prev) if value == prev || (value - prev).abs() < self.min_change => {}
            _ => {
                log::info!("{}: {:.4}", self.name, value);
                self.prev = Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_pad_edges() {
        let mut snap = ControlSnapshot::default();
        snap.apply(&ControlEvent::PadDown(2));
        assert!(snap.held_pads[2]);
        assert!(snap.any_pad_held());
        snap.apply(&ControlEvent::PadUp(2));
        assert!(!snap.any_pad_held());
    }

    #[test]
    fn selector_cycle_is_bounded() {
        let mut snap = ControlSnapshot::default();
        for _ in 0..10 {
            snap.apply(&ControlEvent::CycleGatePeriod(1));
        }
        assert_eq!(snap.gate_period, 32);
        for _ in 0..10 {
            snap.apply(&ControlEvent::CycleGatePeriod(-1));
        }
        assert_eq!(snap.gate_period, 2);
    }

    #[test]
    fn joystick_history_keeps_the_peak_of_a_flick() {
        let mut snap = ControlSnapshot::default();
        snap.apply(&ControlEvent::JoystickMove(1.0, 0.0));
        snap.apply(&ControlEvent::JoystickMove(0.6, 0.0));
        assert_eq!(snap.joystick.0, 0.6);
        assert_eq!(snap.joystick_history.peak_x(), 1.0);
        // the window is bounded: nine quiet moves age the peak out
        for _ in 0..9 {
            snap.apply(&ControlEvent::JoystickMove(0.1, 0.0));
        }
        assert!((snap.joystick_history.peak_x() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn knob_values_clamp_to_domain() {
        let mut snap = ControlSnapshot::default();
        snap.apply(&ControlEvent::AdjustGrain(1.0));
        assert_eq!(snap.grain_seconds, GRAIN_SECONDS_MAX);
        snap.apply(&ControlEvent::AdjustFilter(-3.0));
        assert_eq!(snap.filter, -1.0);
    }
}
