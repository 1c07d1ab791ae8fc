use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use log::info;

use chopbox::audio;
use chopbox::engine::{Engine, SyncEvent};
use chopbox::sample::SampleBank;
use chopbox::shared::ControlEvent;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let sample_dir: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let bank = SampleBank::load_dir(&sample_dir)?;
    info!("{} samples from {}", bank.len(), sample_dir.display());

    let (ctrl_tx, ctrl_rx) = crossbeam_channel::bounded::<ControlEvent>(256);
    // a MIDI bridge would feed this side; the keyboard rig runs on the
    // internal clock alone
    let (_sync_tx, sync_rx) = crossbeam_channel::bounded::<SyncEvent>(256);
    let (seg_tx, seg_rx) = crossbeam_channel::bounded(16);

    let audio = audio::start_audio(seg_rx)?;
    let mut engine = Engine::new(bank, ctrl_rx, sync_rx, seg_tx);

    terminal::enable_raw_mode()?;
    // Enable keyboard enhancement for real press/release detection.
    // Falls back gracefully if the terminal doesn't support it.
    let _ = crossterm::execute!(
        std::io::stdout(),
        crossterm::event::PushKeyboardEnhancementFlags(
            crossterm::event::KeyboardEnhancementFlags::REPORT_EVENT_TYPES
        )
    );
    let _guard = RawModeGuard; // auto drops when out of scope

    let mut keys = KeyRig::default();
    let poll_timeout = Duration::from_millis(1);

    loop {
        if event::poll(poll_timeout)? {
            if let Event::Key(key) = event::read()? {
                let (events, quit) = keys.translate(key.code, key.kind);
                if quit {
                    break;
                }
                for ev in events {
                    let _ = ctrl_tx.try_send(ev);
                }
            }
        }
        engine.poll(Instant::now())?;
    }

    info!(
        "done: {} shed steps, {} underruns",
        engine.sheds(),
        audio.underruns()
    );
    Ok(())
}

/// Maps the keyboard onto the control surface: number row = pads, qwerty row
/// = latch pads, arrows = joystick.
#[derive(Default)]
struct KeyRig {
    joy_x: f32,
    joy_y: f32,
}

impl KeyRig {
    fn translate(&mut self, code: KeyCode, kind: KeyEventKind) -> (Vec<ControlEvent>, bool) {
        if kind == KeyEventKind::Repeat {
            return (vec![], false);
        }
        let down = kind == KeyEventKind::Press;

        // held keys with real press/release pairs
        let held = match code {
            KeyCode::Char(c @ '1'..='8') => {
                let pad = c as usize - '1' as usize;
                Some(if down {
                    ControlEvent::PadDown(pad)
                } else {
                    ControlEvent::PadUp(pad)
                })
            }
            KeyCode::Char(c @ ('q' | 'w' | 'e' | 'r' | 't' | 'y' | 'u' | 'i')) => {
                let pad = "qwertyui".find(c).unwrap_or(0);
                Some(if down {
                    ControlEvent::LatchPadDown(pad)
                } else {
                    ControlEvent::LatchPadUp(pad)
                })
            }
            KeyCode::Char('s') => Some(if down {
                ControlEvent::SlowDown
            } else {
                ControlEvent::SlowUp
            }),
            KeyCode::Char('f') => Some(if down {
                ControlEvent::FlipDown
            } else {
                ControlEvent::FlipUp
            }),
            KeyCode::Left | KeyCode::Right => {
                self.joy_x = match (code, down) {
                    (KeyCode::Left, true) => -1.0,
                    (KeyCode::Right, true) => 1.0,
                    _ => 0.0,
                };
                Some(ControlEvent::JoystickMove(self.joy_x, self.joy_y))
            }
            KeyCode::Up | KeyCode::Down => {
                self.joy_y = match (code, down) {
                    (KeyCode::Up, true) => 1.0,
                    (KeyCode::Down, true) => -1.0,
                    _ => 0.0,
                };
                Some(ControlEvent::JoystickMove(self.joy_x, self.joy_y))
            }
            _ => None,
        };
        if let Some(ev) = held {
            return (vec![ev], false);
        }
        if !down {
            return (vec![], false);
        }

        // toggles and knob nudges fire on press only
        let events = match code {
            KeyCode::Esc => return (vec![], true),
            KeyCode::Char(' ') => vec![ControlEvent::PlayToggle],
            KeyCode::Char('h') => vec![ControlEvent::HoldToggle],
            KeyCode::Char('j') => vec![ControlEvent::ToggleJoystickMode],
            KeyCode::Char('b') => vec![ControlEvent::SwitchBank],

            KeyCode::Char('[') => vec![ControlEvent::AdjustGateRatio(-0.05)],
            KeyCode::Char(']') => vec![ControlEvent::AdjustGateRatio(0.05)],
            KeyCode::Char('-') => vec![ControlEvent::AdjustVolume(-0.05)],
            KeyCode::Char('=') => vec![ControlEvent::AdjustVolume(0.05)],
            KeyCode::Char('g') => vec![ControlEvent::AdjustGrain(-0.002)],
            KeyCode::Char('G') => vec![ControlEvent::AdjustGrain(0.002)],
            KeyCode::Char('k') => vec![ControlEvent::AdjustFilter(-0.05)],
            KeyCode::Char('K') => vec![ControlEvent::AdjustFilter(0.05)],
            KeyCode::Char(',') => vec![ControlEvent::AdjustBpm(-1.0)],
            KeyCode::Char('.') => vec![ControlEvent::AdjustBpm(1.0)],

            KeyCode::Char('m') => vec![ControlEvent::CycleGatePeriod(1)],
            KeyCode::Char('M') => vec![ControlEvent::CycleGatePeriod(-1)],
            KeyCode::Char('n') => vec![ControlEvent::CycleLatchLength(1)],
            KeyCode::Char('N') => vec![ControlEvent::CycleLatchLength(-1)],
            KeyCode::Char('v') => vec![ControlEvent::CycleFlipSpeed(1)],
            KeyCode::Char('V') => vec![ControlEvent::CycleFlipSpeed(-1)],

            KeyCode::Char('z') => vec![ControlEvent::RotaryTurn(-1)],
            KeyCode::Char('x') => vec![ControlEvent::RotaryTurn(1)],
            _ => vec![],
        };
        (events, false)
    }
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::event::PopKeyboardEnhancementFlags
        );
        let _ = terminal::disable_raw_mode();
    }
}
