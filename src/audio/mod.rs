// Output sink. The engine hands completed step segments over a bounded
// channel; the device callback drains them into a local queue and plays
// silence when it runs dry. Mono samples are duplicated across however many
// channels the device wants.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;

/// One step's worth of rendered audio, 16-bit mono.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub pcm: Vec<i16>,
}

pub struct AudioHandle {
    underruns: Arc<AtomicU64>,
    _stream: cpal::Stream,
}

impl AudioHandle {
    /// Callback invocations that found the queue empty mid-playback.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

pub fn start_audio(seg_rx: Receiver<Segment>) -> anyhow::Result<AudioHandle> {
    let host = cpal::default_host();
    let device = host.default_output_device().context("no default output device")?;
    let config = device.default_output_config().context("no default output config")?;
    let channels = config.channels() as usize;

    let underruns = Arc::new(AtomicU64::new(0));

    match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let stream =
                build_output_stream_f32(&device, &config.into(), seg_rx, channels, &underruns)?;
            stream.play().context("failed to play output stream")?;
            Ok(AudioHandle { underruns, _stream: stream })
        }
        other => anyhow::bail!("unsupported sample format {other:?} (only f32 supported)"),
    }
}

fn build_output_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    seg_rx: Receiver<Segment>,
    channels: usize,
    underruns: &Arc<AtomicU64>,
) -> anyhow::Result<cpal::Stream> {
    let underruns = Arc::clone(underruns);
    let mut queue: VecDeque<i16> = VecDeque::new();
    let mut was_playing = false;

    let err_fn = |err| eprintln!("audio output stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _info| {
            while let Ok(seg) = seg_rx.try_recv() {
                queue.extend(seg.pcm);
            }
            for frame in data.chunks_mut(channels) {
                let sample = match queue.pop_front() {
                    Some(s) => {
                        was_playing = true;
                        s as f32 / 32768.0
                    }
                    None => {
                        // only count dry spells that interrupt playback, not
                        // ordinary silence between notes
                        if was_playing {
                            underruns.fetch_add(1, Ordering::Relaxed);
                            was_playing = false;
                        }
                        0.0
                    }
                };
                frame.fill(sample);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
