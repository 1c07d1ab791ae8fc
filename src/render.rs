// Granular time-stretch with pitch resampling. The pitch-resampled virtual
// timeline is tiled into fixed-size input grains; each grain emits
// `grain_out` samples by repeating within the grain, so the stretch rate
// governs output quantity per grain while the pitch rate governs the index
// step inside it. Index rounding is round-half-away-from-zero (f32::round)
// throughout, the same mode the plan arithmetic uses, so pitch drift stays
// bounded over long runs.

use log::warn;

use crate::shared::{BYTES_PER_SAMPLE, SAMPLE_RATE};

/// Filter knob values closer to zero than this bypass the filter entirely.
const FILTER_BYPASS: f32 = 0.05;

/// Sample counts for one chunk render, fixed before any audio is touched.
#[derive(Clone, Copy, Debug)]
pub struct RenderPlan {
    /// Input grain size on the pitched timeline.
    pub grain_in: usize,
    /// Output samples drawn from each grain.
    pub grain_out: usize,
    /// Exact number of samples the render emits.
    pub target_samples: usize,
    pub pitch_rate: f32,
}

impl RenderPlan {
    pub fn new(
        samples_per_chunk: usize,
        pitch_rate: f32,
        stretch_rate: f32,
        grain_seconds: f32,
    ) -> Self {
        let pitched = (samples_per_chunk as f32 / pitch_rate).round().max(1.0) as usize;
        let grain_in = ((SAMPLE_RATE as f32 * grain_seconds).round() as usize)
            .clamp(1, pitched);
        let grain_out = ((grain_in as f32 / stretch_rate).round() as usize).max(1);
        let target_samples = (samples_per_chunk as f32 / (stretch_rate * pitch_rate))
            .round()
            .max(0.0) as usize;
        Self { grain_in, grain_out, target_samples, pitch_rate }
    }

    pub fn target_bytes(&self) -> usize {
        self.target_samples * BYTES_PER_SAMPLE
    }
}

/// One-pole filter, symmetric around zero: positive amounts low-pass,
/// negative high-pass, and the response is continuous through bypass.
struct OnePole {
    amount: f32,
    state: f32,
}

impl OnePole {
    fn new(amount: f32) -> Self {
        Self { amount, state: 0.0 }
    }

    fn process(&mut self, x: f32) -> f32 {
        if self.amount.abs() < FILTER_BYPASS {
            x
        } else if self.amount > 0.0 {
            self.state += (1.0 - self.amount) * (x - self.state);
            self.state
        } else {
            self.state += -self.amount * (x - self.state);
            x - self.state
        }
    }
}

/// Fill `out` with exactly `plan.target_samples` samples resampled from
/// `chunk` (16-bit LE mono), applying gain and filter per sample. Returns
/// bytes written.
pub fn render(out: &mut [u8], chunk: &[u8], plan: &RenderPlan, volume: f32, filter: f32) -> usize {
    let capacity = out.len() / BYTES_PER_SAMPLE;
    let mut target = plan.target_samples;
    if target > capacity {
        warn!("render target {target} samples exceeds buffer, truncating to {capacity}");
        target = capacity;
    }
    let chunk_samples = chunk.len() / BYTES_PER_SAMPLE;
    let mut filter = OnePole::new(filter);

    let mut written = 0usize;
    let mut grain_offset = 0usize;
    while written < target {
        let emit = plan.grain_out.min(target - written);
        for i in 0..emit {
            let virtual_index = grain_offset + i % plan.grain_in;
            let src = (virtual_index as f32 * plan.pitch_rate).round() as usize;
            // reads past the chunk are silence, matching the zero-padded tail
            let raw = if src < chunk_samples {
                i16::from_le_bytes([chunk[src * 2], chunk[src * 2 + 1]])
            } else {
                0
            };
            let shaped = filter.process(raw as f32) * volume;
            let clamped = shaped.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            let o = (written + i) * BYTES_PER_SAMPLE;
            out[o..o + BYTES_PER_SAMPLE].copy_from_slice(&clamped.to_le_bytes());
        }
        written += emit;
        grain_offset += plan.grain_in;
    }
    written * BYTES_PER_SAMPLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::GRAIN_SECONDS_DEFAULT;

    fn chunk_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn ramp(n: usize) -> Vec<i16> {
        (0..n).map(|i| (i % 1000) as i16).collect()
    }

    #[test]
    fn identity_render_is_bit_exact() {
        let samples = ramp(4410);
        let chunk = chunk_of(&samples);
        let plan = RenderPlan::new(samples.len(), 1.0, 1.0, GRAIN_SECONDS_DEFAULT);
        assert_eq!(plan.target_samples, samples.len());
        let mut out = vec![0u8; chunk.len()];
        let written = render(&mut out, &chunk, &plan, 1.0, 0.0);
        assert_eq!(written, chunk.len());
        assert_eq!(out, chunk);
    }

    #[test]
    fn target_count_is_exact_for_any_rate_pair() {
        let spc = 5512usize;
        for &(pitch, stretch) in
            &[(1.0f32, 0.5f32), (2.0, 1.0), (0.7, 1.3), (1.5, 0.33), (0.5, 0.5)]
        {
            let plan = RenderPlan::new(spc, pitch, stretch, GRAIN_SECONDS_DEFAULT);
            let expected = (spc as f32 / (stretch * pitch)).round() as usize;
            assert_eq!(plan.target_samples, expected);
            let chunk = chunk_of(&ramp(spc));
            let mut out = vec![0u8; plan.target_bytes()];
            let written = render(&mut out, &chunk, &plan, 1.0, 0.0);
            assert_eq!(written, plan.target_bytes(), "pitch {pitch} stretch {stretch}");
        }
    }

    #[test]
    fn octave_up_reads_every_other_sample() {
        let samples = ramp(1000);
        let chunk = chunk_of(&samples);
        // grain covers the whole pitched timeline so no grain repetition
        // interferes with the index mapping
        let plan = RenderPlan::new(samples.len(), 2.0, 1.0, 1.0);
        let mut out = vec![0u8; plan.target_bytes()];
        render(&mut out, &chunk, &plan, 1.0, 0.0);
        for i in 0..plan.target_samples {
            let got = i16::from_le_bytes([out[i * 2], out[i * 2 + 1]]);
            assert_eq!(got, samples[(i * 2).min(samples.len() - 1)], "index {i}");
        }
    }

    #[test]
    fn half_speed_stretch_repeats_grains_without_pitch_change() {
        let samples = ramp(4410);
        let chunk = chunk_of(&samples);
        let plan = RenderPlan::new(samples.len(), 1.0, 0.5, GRAIN_SECONDS_DEFAULT);
        assert_eq!(plan.target_samples, samples.len() * 2);
        assert_eq!(plan.grain_out, plan.grain_in * 2);
        let mut out = vec![0u8; plan.target_bytes()];
        render(&mut out, &chunk, &plan, 1.0, 0.0);
        // first grain appears twice back to back
        let g = plan.grain_in * BYTES_PER_SAMPLE;
        assert_eq!(&out[..g], &chunk[..g]);
        assert_eq!(&out[g..2 * g], &chunk[..g]);
    }

    #[test]
    fn grain_index_does_not_drift_over_long_stretches() {
        // 1000 grains at a fractional pitch rate: the last grain's source
        // index must still match the closed-form mapping exactly
        let spc = 20_000usize;
        let plan = RenderPlan {
            grain_in: 20,
            grain_out: 20,
            target_samples: 20_000,
            pitch_rate: 0.997,
        };
        let samples = ramp(spc);
        let chunk = chunk_of(&samples);
        let mut out = vec![0u8; plan.target_bytes()];
        render(&mut out, &chunk, &plan, 1.0, 0.0);
        for &i in &[0usize, 19_980, 19_999] {
            let grain = i / plan.grain_out;
            let virt = grain * plan.grain_in + i % plan.grain_in;
            let expected = samples[(virt as f32 * plan.pitch_rate).round() as usize];
            let got = i16::from_le_bytes([out[i * 2], out[i * 2 + 1]]);
            assert_eq!(got, expected, "sample {i}");
        }
    }

    #[test]
    fn volume_scales_and_clamps() {
        let chunk = chunk_of(&[20_000, -20_000, 100]);
        let plan = RenderPlan { grain_in: 3, grain_out: 3, target_samples: 3, pitch_rate: 1.0 };
        let mut out = vec![0u8; 6];
        render(&mut out, &chunk, &plan, 0.5, 0.0);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 10_000);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -10_000);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), 50);
    }

    #[test]
    fn reads_past_chunk_end_are_silent() {
        let chunk = chunk_of(&[5, 5]);
        let plan = RenderPlan { grain_in: 4, grain_out: 4, target_samples: 4, pitch_rate: 1.0 };
        let mut out = vec![0xffu8; 8];
        render(&mut out, &chunk, &plan, 1.0, 0.0);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), 0);
        assert_eq!(i16::from_le_bytes([out[6], out[7]]), 0);
    }

    #[test]
    fn lowpass_smooths_and_highpass_blocks_dc() {
        let dc = vec![1000i16; 500];
        let chunk = chunk_of(&dc);
        let plan =
            RenderPlan { grain_in: 500, grain_out: 500, target_samples: 500, pitch_rate: 1.0 };
        let mut out = vec![0u8; 1000];
        // high-pass: constant input decays toward zero
        render(&mut out, &chunk, &plan, 1.0, -0.5);
        let last = i16::from_le_bytes([out[998], out[999]]);
        assert!(last.abs() < 20, "dc leaked through high-pass: {last}");
        // low-pass: converges to the dc level
        render(&mut out, &chunk, &plan, 1.0, 0.5);
        let last = i16::from_le_bytes([out[998], out[999]]);
        assert!((last - 1000).abs() < 20, "low-pass settled at {last}");
    }
}
