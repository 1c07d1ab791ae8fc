// The playback engine: owns both clocks, the sample bank, effect state and
// the output buffer, and drives the IDLE -> PREPARING -> READY -> WRITING
// step cycle from a single poll loop. Control and sync events arrive over
// channels so the loop never blocks on input.

use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};

use crate::audio::Segment;
use crate::clock::{ClockRack, StepClock};
use crate::fx::{FxState, JoystickMode, StepParams};
use crate::render::{self, RenderPlan};
use crate::sample::SampleBank;
use crate::shared::{
    BYTES_PER_SAMPLE, ControlEvent, ControlSnapshot, NUM_PADS, ParamLog, SAMPLE_RATE,
};

/// Rendering for a step begins once its deadline is this close.
pub const LOOKAHEAD: Duration = Duration::from_millis(15);

/// A prepared buffer consumed this long after its planned time is stale and
/// replaced with silence.
pub const MAX_LAG: Duration = Duration::from_millis(5);

/// Output scratch, one second of audio.
const MAX_OUT_BYTES: usize = SAMPLE_RATE as usize * BYTES_PER_SAMPLE;

/// Transport events from the sync wire.
#[derive(Clone, Copy, Debug)]
pub enum SyncEvent {
    Start,
    Stop,
    Continue,
    Pulse(Instant),
    SongPosition(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepState {
    Idle,
    Preparing,
    Ready,
    Writing,
}

// What the look-ahead pass left in the output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Prepared {
    /// Fresh render in `out_buf[..bytes_written]`.
    Audible,
    /// Step is gated or muted; consume as silence.
    Silence,
    /// Stretch smear skipped this step; replay the previous render.
    StretchSkip,
}

pub struct Engine {
    pub clocks: ClockRack,
    bank: SampleBank,
    fx: FxState,
    controls: ControlSnapshot,

    ctrl_rx: Receiver<ControlEvent>,
    sync_rx: Receiver<SyncEvent>,
    seg_tx: Sender<Segment>,

    out_buf: Vec<u8>,
    bytes_written: usize,
    stretch_write: usize,

    state: StepState,
    prepared_step: Option<i64>,
    planned_time: Option<Instant>,
    prepared: Prepared,
    sheds: u64,

    voice_on: bool,
    hold: bool,
    ephemeral_start: bool,
    bank_base: usize,
    latch_pad_lengths: [Option<i64>; NUM_PADS],

    volume_log: ParamLog,
    filter_log: ParamLog,
    grain_log: ParamLog,
}

impl Engine {
    pub fn new(
        bank: SampleBank,
        ctrl_rx: Receiver<ControlEvent>,
        sync_rx: Receiver<SyncEvent>,
        seg_tx: Sender<Segment>,
    ) -> Self {
        Self {
            clocks: ClockRack::new(),
            bank,
            fx: FxState::new(),
            controls: ControlSnapshot::default(),
            ctrl_rx,
            sync_rx,
            seg_tx,
            out_buf: vec![0u8; MAX_OUT_BYTES],
            bytes_written: 0,
            stretch_write: 0,
            state: StepState::Idle,
            prepared_step: None,
            planned_time: None,
            prepared: Prepared::Silence,
            sheds: 0,
            voice_on: false,
            hold: false,
            ephemeral_start: false,
            bank_base: 0,
            latch_pad_lengths: [None; NUM_PADS],
            volume_log: ParamLog::new("volume", 0.01),
            filter_log: ParamLog::new("filter", 0.01),
            grain_log: ParamLog::new("grain", 0.0005),
        }
    }

    pub fn sheds(&self) -> u64 {
        self.sheds
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    fn audible(&self) -> bool {
        self.voice_on || self.hold
    }

    /// One pass of the cooperative loop: drain inputs, advance whichever
    /// clock is live, then look ahead to the next deadline.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        self.pump_controls(now);
        self.pump_sync(now)?;
        if let Some(step) = self.clocks.poll_internal(now) {
            self.advance_step(step, now)?;
        }
        if !self.clocks.running() {
            // released triggers must still cancel their effects while the
            // transport is stopped
            self.fx.sync_controls(self.clocks.step_position(), &self.controls);
        }
        self.lookahead(now)?;
        Ok(())
    }

    fn pump_sync(&mut self, now: Instant) -> Result<()> {
        while let Ok(event) = self.sync_rx.try_recv() {
            match event {
                SyncEvent::Start => self.clocks.on_start(now),
                SyncEvent::Stop => self.clocks.on_stop(),
                SyncEvent::Continue => self.clocks.on_continue(now),
                SyncEvent::SongPosition(p) => self.clocks.on_song_position(p),
                SyncEvent::Pulse(t) => {
                    if let Some(step) = self.clocks.on_pulse(t) {
                        self.advance_step(step, t)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn pump_controls(&mut self, now: Instant) {
        while let Ok(event) = self.ctrl_rx.try_recv() {
            self.controls.apply(&event);
            self.handle_control(&event, now);
        }
        self.volume_log.update(self.controls.volume);
        self.filter_log.update(self.controls.filter);
        self.grain_log.update(self.controls.grain_seconds);
    }

    fn handle_control(&mut self, event: &ControlEvent, now: Instant) {
        match *event {
            ControlEvent::PadDown(i) => {
                self.select_pad_sample(i);
                self.open_voice(now);
            }
            ControlEvent::PadUp(_) => self.maybe_close_voice(),
            ControlEvent::LatchPadDown(i) => {
                self.select_pad_sample(i);
                self.open_voice(now);
                let length = self.controls.latch_length;
                self.fx.latch.engage(self.clocks.step_position(), length);
                if let Some(slot) = self.latch_pad_lengths.get_mut(i) {
                    *slot = Some(length);
                }
                self.update_latch_chain();
            }
            ControlEvent::LatchPadUp(i) => {
                if let Some(length) = self.latch_pad_lengths.get_mut(i).and_then(Option::take) {
                    self.fx.latch.release(length);
                }
                self.update_latch_chain();
                self.maybe_close_voice();
            }
            ControlEvent::HoldToggle => {
                self.hold = !self.hold;
                info!("hold {}", if self.hold { "on" } else { "off" });
                if !self.hold {
                    self.maybe_close_voice();
                }
            }
            ControlEvent::PlayToggle => {
                self.clocks.toggle_internal(now);
                self.ephemeral_start = false;
                if self.clocks.internal.is_playing() {
                    self.voice_on = true;
                } else {
                    self.voice_on = false;
                    self.fx.cancel_all();
                }
            }
            // clicking the stick flips what its y axis does
            ControlEvent::JoystickPress | ControlEvent::ToggleJoystickMode => {
                self.fx.mode = match self.fx.mode {
                    JoystickMode::GateRepeat => JoystickMode::PitchStretch,
                    JoystickMode::PitchStretch => JoystickMode::GateRepeat,
                };
                info!("joystick mode {:?}", self.fx.mode);
            }
            ControlEvent::AdjustBpm(d) => {
                let bpm = self.clocks.internal.bpm() + d;
                self.clocks.internal.set_bpm(bpm);
            }
            ControlEvent::RotaryTurn(d) => {
                let len = self.bank.len() as i64;
                let next = (self.bank.current_index() as i64 + d as i64).rem_euclid(len);
                self.bank.set_current(next as usize);
            }
            ControlEvent::SwitchBank => {
                self.bank_base = (self.bank_base + NUM_PADS) % self.bank.len();
                info!("pad bank base {}", self.bank_base);
            }
            _ => {}
        }
    }

    fn select_pad_sample(&mut self, pad: usize) {
        let index = (self.bank_base + pad) % self.bank.len();
        self.bank.set_current(index);
    }

    /// A pad pressed while nothing is running starts the internal clock for
    /// the duration of the hold.
    fn open_voice(&mut self, now: Instant) {
        self.voice_on = true;
        if !self.clocks.running() {
            self.clocks.start_internal(now);
            self.ephemeral_start = true;
            debug!("ephemeral clock start");
        }
    }

    fn maybe_close_voice(&mut self) {
        if self.controls.any_pad_held() || self.hold {
            return;
        }
        self.voice_on = false;
        if self.ephemeral_start {
            self.clocks.stop_internal();
            self.ephemeral_start = false;
            self.fx.cancel_all();
            debug!("ephemeral clock stop");
        }
    }

    fn update_latch_chain(&mut self) {
        let chain: Vec<usize> = self
            .controls
            .held_latch_pads
            .iter()
            .enumerate()
            .filter(|&(_, &held)| held)
            .map(|(i, _)| (self.bank_base + i) % self.bank.len())
            .collect();
        self.fx.latch.set_chain(chain);
    }

    fn lookahead(&mut self, now: Instant) -> Result<()> {
        if !self.clocks.running() || self.state == StepState::Preparing {
            return Ok(());
        }
        let Some(deadline) = self.clocks.next_step_time() else {
            return Ok(());
        };
        if deadline.saturating_duration_since(now) > LOOKAHEAD {
            return Ok(());
        }
        let step = self.clocks.step_position() + 1;
        if self.prepared_step == Some(step) {
            return Ok(());
        }
        self.prepare_step(step, deadline)
    }

    /// Run the effects pipeline and renderer for `step`, due at `planned`.
    fn prepare_step(&mut self, step: i64, planned: Instant) -> Result<()> {
        self.state = StepState::Preparing;

        self.run_flip(step);
        if let Some(chained) = self.fx.latch.chain_sample() {
            self.bank.set_current(chained);
        }

        let meta = self.bank.current_meta().clone();
        let tempo_ratio = self.clocks.bpm() / meta.bpm;
        let mut params = StepParams::new(step, tempo_ratio, meta.chunk_count);
        self.fx.apply(&mut params, &self.controls);

        self.prepared = match params.step {
            None if self.fx.stretch.active() => Prepared::StretchSkip,
            None => Prepared::Silence,
            Some(_) if !params.play_step || !self.audible() => Prepared::Silence,
            Some(chunk_index) => {
                let plan = RenderPlan::new(
                    meta.samples_per_chunk,
                    params.pitch_rate,
                    params.stretch_rate,
                    self.controls.grain_seconds,
                );
                let chunk = self.bank.get_chunk(chunk_index)?;
                self.bytes_written = render::render(
                    &mut self.out_buf,
                    chunk,
                    &plan,
                    self.controls.volume,
                    self.controls.filter,
                );
                self.stretch_write = 0;
                Prepared::Audible
            }
        };
        self.prepared_step = Some(step);
        self.planned_time = Some(planned);
        self.state = StepState::Ready;
        Ok(())
    }

    fn run_flip(&mut self, step: i64) {
        if self.controls.flip {
            self.fx.flip.engage(self.bank.current_index());
            if self.fx.flip.wants_flip(step, self.controls.flip_speed) {
                let other = self.bank.random_other(self.bank.current_index());
                self.bank.set_current(other);
            }
        } else if let Some(original) = self.fx.flip.release() {
            self.bank.set_current(original);
        }
    }

    /// Step boundary crossed: hand the prepared buffer (or silence) to the
    /// audio writer. Bounded-latency path, no rendering happens here.
    fn advance_step(&mut self, step: i64, now: Instant) -> Result<()> {
        let step_bytes = step_bytes(self.clocks.bpm());

        if self.state == StepState::Preparing {
            // preparation raced the deadline and lost; shed, never queue
            self.sheds += 1;
            warn!("step {step} shed while preparing");
            self.send_silence(step_bytes);
            return Ok(());
        }

        if self.prepared == Prepared::StretchSkip && self.bytes_written > 0 {
            self.replay_stretch(step_bytes);
            self.state = StepState::Idle;
            self.prepared_step = Some(step);
            return Ok(());
        }

        if self.state != StepState::Ready || self.prepared_step != Some(step) {
            self.sheds += 1;
            debug!("no buffer ready for step {step}");
            self.send_silence(step_bytes);
            self.state = StepState::Idle;
            return Ok(());
        }

        let stale = self
            .planned_time
            .map(|t| now.saturating_duration_since(t) > MAX_LAG)
            .unwrap_or(false);
        if stale {
            warn!("step {step} stale, dropping");
            self.send_silence(step_bytes);
            self.state = StepState::Idle;
            return Ok(());
        }

        if self.prepared != Prepared::Audible {
            self.send_silence(step_bytes);
            self.state = StepState::Idle;
            return Ok(());
        }

        self.state = StepState::Writing;
        let n = step_bytes.min(self.bytes_written);
        let segment = segment_from(&self.out_buf[..n], step_bytes);
        self.send_segment(segment);
        self.stretch_write = n;
        self.state = StepState::Idle;
        Ok(())
    }

    /// Stream the next slice of the last render, wrapping to the start when
    /// the remaining audio is shorter than a step.
    fn replay_stretch(&mut self, step_bytes: usize) {
        if self.stretch_write + step_bytes > self.bytes_written {
            self.stretch_write = 0;
        }
        let end = (self.stretch_write + step_bytes).min(self.bytes_written);
        let segment = segment_from(&self.out_buf[self.stretch_write..end], step_bytes);
        self.send_segment(segment);
        self.stretch_write = end;
    }

    fn send_silence(&mut self, step_bytes: usize) {
        self.send_segment(Segment { pcm: vec![0i16; step_bytes / BYTES_PER_SAMPLE] });
    }

    fn send_segment(&mut self, segment: Segment) {
        match self.seg_tx.try_send(segment) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.sheds += 1;
                warn!("audio queue full, dropping segment");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("audio sink gone");
            }
        }
    }
}

/// Bytes in one step's worth of audio at the given tempo.
pub fn step_bytes(bpm: f32) -> usize {
    let samples = (60.0 / bpm as f64 / 8.0 * SAMPLE_RATE as f64).round() as usize;
    samples * BYTES_PER_SAMPLE
}

// bytes to samples, zero-padded out to the step length so cadence holds even
// when a render came up short
fn segment_from(bytes: &[u8], step_bytes: usize) -> Segment {
    let mut pcm = Vec::with_capacity(step_bytes / BYTES_PER_SAMPLE);
    pcm.extend(
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]])),
    );
    pcm.resize(step_bytes / BYTES_PER_SAMPLE, 0);
    Segment { pcm }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Sample, SampleBank};
    use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
    use std::path::PathBuf;

    fn fixture_bank(tag: &str) -> SampleBank {
        let dir = std::env::temp_dir().join(format!("chopbox-eng-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path: PathBuf = dir.join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..2 * SAMPLE_RATE as usize {
            writer.write_sample(((i % 100) as i16) * 300).unwrap();
        }
        writer.finalize().unwrap();
        SampleBank::new(vec![Sample::load(&path).unwrap()]).unwrap()
    }

    struct Rig {
        engine: Engine,
        ctrl_tx: Sender<ControlEvent>,
        sync_tx: Sender<SyncEvent>,
        seg_rx: Receiver<Segment>,
    }

    fn rig(tag: &str) -> Rig {
        let (ctrl_tx, ctrl_rx) = unbounded();
        let (sync_tx, sync_rx) = unbounded();
        let (seg_tx, seg_rx) = bounded(64);
        let engine = Engine::new(fixture_bank(tag), ctrl_rx, sync_rx, seg_tx);
        Rig { engine, ctrl_tx, sync_tx, seg_rx }
    }

    #[test]
    fn stale_buffer_is_replaced_with_silence() {
        let mut r = rig("stale");
        let t0 = Instant::now();
        r.engine.clocks.start_internal(t0);
        r.engine.voice_on = true;
        let planned = t0 + Duration::from_millis(100);
        r.engine.prepare_step(7, planned).unwrap();
        assert_eq!(r.engine.state(), StepState::Ready);
        assert_eq!(r.engine.prepared, Prepared::Audible);
        // consumed 6ms late, past the 5ms tolerance
        r.engine.advance_step(7, planned + Duration::from_millis(6)).unwrap();
        let seg = r.seg_rx.try_recv().unwrap();
        assert!(seg.pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn on_time_buffer_plays_rendered_audio() {
        let mut r = rig("ontime");
        let t0 = Instant::now();
        r.engine.clocks.start_internal(t0);
        r.engine.voice_on = true;
        let planned = t0 + Duration::from_millis(100);
        r.engine.prepare_step(3, planned).unwrap();
        r.engine.advance_step(3, planned + Duration::from_millis(2)).unwrap();
        let seg = r.seg_rx.try_recv().unwrap();
        assert_eq!(seg.pcm.len(), step_bytes(r.engine.clocks.bpm()) / BYTES_PER_SAMPLE);
        assert!(seg.pcm.iter().any(|&s| s != 0));
    }

    #[test]
    fn unprepared_step_sheds_instead_of_queueing() {
        let mut r = rig("shed");
        let t0 = Instant::now();
        r.engine.clocks.start_internal(t0);
        r.engine.voice_on = true;
        r.engine.advance_step(0, t0).unwrap();
        assert_eq!(r.engine.sheds(), 1);
        let seg = r.seg_rx.try_recv().unwrap();
        assert!(seg.pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn silence_keeps_step_cadence_when_voice_closed() {
        let mut r = rig("cadence");
        let t0 = Instant::now();
        r.engine.clocks.start_internal(t0);
        // voice never opened: prepared as silence, consumed as silence
        r.engine.prepare_step(1, t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(r.engine.prepared, Prepared::Silence);
        r.engine.advance_step(1, t0 + Duration::from_millis(50)).unwrap();
        let seg = r.seg_rx.try_recv().unwrap();
        assert_eq!(seg.pcm.len(), step_bytes(r.engine.clocks.bpm()) / BYTES_PER_SAMPLE);
        assert!(seg.pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn stretch_skip_replays_previous_render() {
        let mut r = rig("smear");
        let t0 = Instant::now();
        r.engine.clocks.start_internal(t0);
        r.engine.voice_on = true;
        r.ctrl_tx.send(ControlEvent::SlowDown).unwrap();
        r.engine.pump_controls(t0);

        // step 0 lands on an integer slice and renders two steps of audio
        let plan0 = t0 + Duration::from_millis(10);
        r.engine.prepare_step(0, plan0).unwrap();
        assert_eq!(r.engine.prepared, Prepared::Audible);
        r.engine.advance_step(0, plan0).unwrap();
        let first = r.seg_rx.try_recv().unwrap();

        // step 1 is fractional: no render, the writer smears the last one
        let plan1 = plan0 + Duration::from_millis(62);
        r.engine.prepare_step(1, plan1).unwrap();
        assert_eq!(r.engine.prepared, Prepared::StretchSkip);
        r.engine.advance_step(1, plan1).unwrap();
        let second = r.seg_rx.try_recv().unwrap();

        assert_eq!(first.pcm.len(), second.pcm.len());
        assert_ne!(first.pcm, second.pcm);
        assert!(second.pcm.iter().any(|&s| s != 0));
    }

    #[test]
    fn pad_press_starts_and_stops_ephemeral_clock() {
        let mut r = rig("ephemeral");
        let t0 = Instant::now();
        r.ctrl_tx.send(ControlEvent::PadDown(0)).unwrap();
        r.engine.poll(t0).unwrap();
        assert!(r.engine.clocks.internal.is_playing());
        r.ctrl_tx.send(ControlEvent::PadUp(0)).unwrap();
        r.engine.poll(t0 + Duration::from_millis(1)).unwrap();
        assert!(!r.engine.clocks.internal.is_playing());
    }

    #[test]
    fn hold_keeps_voice_open_after_pad_release() {
        let mut r = rig("hold");
        let t0 = Instant::now();
        r.ctrl_tx.send(ControlEvent::PadDown(0)).unwrap();
        r.ctrl_tx.send(ControlEvent::HoldToggle).unwrap();
        r.ctrl_tx.send(ControlEvent::PadUp(0)).unwrap();
        r.engine.poll(t0).unwrap();
        assert!(r.engine.clocks.internal.is_playing());
        assert!(r.engine.audible());
    }

    #[test]
    fn external_pulses_drive_steps_through_the_engine() {
        let mut r = rig("midi");
        let t0 = Instant::now();
        r.engine.voice_on = true;
        r.engine.hold = true;
        r.sync_tx.send(SyncEvent::Start).unwrap();
        for i in 0..6u32 {
            r.sync_tx
                .send(SyncEvent::Pulse(t0 + Duration::from_millis(20) * i))
                .unwrap();
        }
        r.engine.poll(t0).unwrap();
        // two step boundaries crossed, two segments out
        assert_eq!(r.seg_rx.len(), 2);
    }

    #[test]
    fn step_bytes_matches_tempo() {
        // 120 bpm: 62.5ms of audio per step, 2756 samples
        assert_eq!(step_bytes(120.0), 2756 * 2);
    }
}
