// Sample/chunk model. A sample is subdivided into one chunk per 32nd note
// at its estimated tempo; chunks are re-read from backing storage into a
// scratch buffer shared across the bank, so a returned chunk is only valid
// until the next `get_chunk` call.

pub mod wav;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, bail};
use log::{info, warn};

use crate::shared::{BYTES_PER_SAMPLE, CHUNKS_PER_BEAT, SAMPLE_RATE};

/// Tempo range a sample's beat count is fitted against.
pub const SAMPLE_BPM_MIN: f32 = 90.0;
pub const SAMPLE_BPM_MAX: f32 = 180.0;

/// Upper bound on a single chunk, sized for one 32nd note at the slowest
/// plausible sample tempo with headroom. Samples whose chunks exceed the
/// scratch capacity are rejected at load time.
pub const MAX_CHUNK_BYTES: usize = 16 * 1024;

/// Immutable descriptor for a loaded sample.
#[derive(Clone, Debug)]
pub struct SampleMeta {
    pub name: String,
    pub bpm: f32,
    pub beat_count: u32,
    pub chunk_count: usize,
    pub samples_per_chunk: usize,
    pub chunk_bytes: usize,
    data_offset: u64,
    data_len: u64,
}

impl SampleMeta {
    /// Fit a beat count to the raw PCM length: the smallest power-of-two
    /// beat count whose implied tempo lands in the plausible range. This
    /// auto-quantizes arbitrary one-shots to a bar grid without tagging.
    pub fn derive(name: &str, data_offset: u64, data_len: u64) -> anyhow::Result<Self> {
        let total_samples = data_len as usize / BYTES_PER_SAMPLE;
        if total_samples == 0 {
            bail!("{name}: empty data chunk");
        }
        let duration = total_samples as f32 / SAMPLE_RATE as f32;
        let mut beats = 1u32;
        let bpm = loop {
            let bpm = beats as f32 / duration * 60.0;
            if bpm >= SAMPLE_BPM_MIN {
                if bpm >= SAMPLE_BPM_MAX {
                    bail!("{name}: no power-of-two beat count fits {duration:.2}s");
                }
                break bpm;
            }
            beats = beats.checked_mul(2).context("beat count overflow")?;
        };
        let chunk_count = beats as usize * CHUNKS_PER_BEAT;
        let samples_per_chunk = total_samples.div_ceil(chunk_count);
        let chunk_bytes = samples_per_chunk * BYTES_PER_SAMPLE;
        if chunk_bytes > MAX_CHUNK_BYTES {
            bail!("{name}: chunk size {chunk_bytes} exceeds scratch capacity");
        }
        Ok(Self {
            name: name.to_string(),
            bpm,
            beat_count: beats,
            chunk_count,
            samples_per_chunk,
            chunk_bytes,
            data_offset,
            data_len,
        })
    }
}

/// A sample descriptor plus its opened backing handle.
pub struct Sample {
    pub meta: SampleMeta,
    file: File,
}

impl Sample {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file =
            File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let (data_offset, data_len) = wav::find_data_chunk(&mut file)?;
        let meta = SampleMeta::derive(&name, data_offset, data_len)?;
        info!(
            "loaded {}: {:.1} bpm, {} beats, {} chunks of {} samples",
            meta.name, meta.bpm, meta.beat_count, meta.chunk_count, meta.samples_per_chunk
        );
        Ok(Self { meta, file })
    }

    /// Read one chunk into `scratch` and return the filled view. The index
    /// wraps with Euclidean modulo, and a short final chunk is zero-padded
    /// to the full chunk size.
    pub fn read_chunk<'a>(
        &mut self,
        index: i64,
        scratch: &'a mut [u8],
    ) -> anyhow::Result<&'a [u8]> {
        let physical = index.rem_euclid(self.meta.chunk_count as i64) as u64;
        let offset = self.meta.data_offset + physical * self.meta.chunk_bytes as u64;
        let available = (self.meta.data_offset + self.meta.data_len).saturating_sub(offset);
        let want = self.meta.chunk_bytes.min(available as usize);
        let out = &mut scratch[..self.meta.chunk_bytes];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(&mut out[..want])
            .with_context(|| format!("reading chunk {physical} of {}", self.meta.name))?;
        out[want..].fill(0);
        Ok(out)
    }
}

/// All loaded samples plus the shared chunk scratch buffer and the mutable
/// "current sample" pointer.
pub struct SampleBank {
    samples: Vec<Sample>,
    scratch: Vec<u8>,
    current: usize,
}

impl SampleBank {
    pub fn new(samples: Vec<Sample>) -> anyhow::Result<Self> {
        if samples.is_empty() {
            bail!("sample bank is empty");
        }
        Ok(Self {
            samples,
            scratch: vec![0u8; MAX_CHUNK_BYTES],
            current: 0,
        })
    }

    /// Load every WAV in a directory, excluding files that fail to parse
    /// rather than refusing to boot.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("listing {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|e| e.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        let mut samples = Vec::new();
        for path in paths {
            match Sample::load(&path) {
                Ok(s) => samples.push(s),
                Err(e) => warn!("excluding {}: {e:#}", path.display()),
            }
        }
        Self::new(samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        let index = index % self.samples.len();
        if index != self.current {
            info!("switched to sample {}", self.samples[index].meta.name);
        }
        self.current = index;
    }

    pub fn current_meta(&self) -> &SampleMeta {
        &self.samples[self.current].meta
    }

    /// Uniformly random index different from `not`, for the flip effect.
    pub fn random_other(&self, not: usize) -> usize {
        if self.samples.len() < 2 {
            return not;
        }
        let pick = fastrand::usize(..self.samples.len() - 1);
        if pick >= not { pick + 1 } else { pick }
    }

    /// Fetch a chunk of the current sample into the shared scratch. The
    /// returned view is valid until the next call.
    pub fn get_chunk(&mut self, index: i64) -> anyhow::Result<&[u8]> {
        let sample = &mut self.samples[self.current];
        sample.read_chunk(index, &mut self.scratch)
    }
}
