// Minimal RIFF scan: the renderer depends on exact byte alignment of the
// PCM data, so we locate the data chunk ourselves instead of going through
// a decoder.

use std::io::{Read, Seek, SeekFrom};

use anyhow::{Context, bail};

/// Walk the RIFF sub-chunks of a WAV file and return the byte offset and
/// length of the `data` chunk, skipping other chunks by their declared size.
pub fn find_data_chunk<R: Read + Seek>(reader: &mut R) -> anyhow::Result<(u64, u64)> {
    let mut fourcc = [0u8; 4];
    let mut size_buf = [0u8; 4];

    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut fourcc).context("reading RIFF header")?;
    if &fourcc != b"RIFF" {
        bail!("not a RIFF file");
    }
    reader.read_exact(&mut size_buf)?;
    reader.read_exact(&mut fourcc).context("reading WAVE tag")?;
    if &fourcc != b"WAVE" {
        bail!("not a WAVE file");
    }

    loop {
        if reader.read_exact(&mut fourcc).is_err() {
            bail!("no data chunk found");
        }
        reader.read_exact(&mut size_buf).context("reading chunk size")?;
        let chunk_size = u32::from_le_bytes(size_buf) as u64;
        if &fourcc == b"data" {
            let offset = reader.stream_position()?;
            return Ok((offset, chunk_size));
        }
        reader.seek(SeekFrom::Current(chunk_size as i64))?;
    }
}
