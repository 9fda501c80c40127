//! PCM container (WAV-class) header synthesis, parsing, and the
//! downstream merge rule.
//!
//! The wire container is the canonical fixed-layout PCM container: a
//! 4-byte magic, a 4-byte little-endian chunk size (`36 + dataLen`), a
//! 4-byte format tag, a 16-byte `fmt ` subchunk, and an 8-byte `data`
//! subchunk header, all integer fields little-endian.

use thiserror::Error;

const HEADER_LEN: usize = 44;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container too short to hold a header: {0} bytes")]
    TooShort(usize),

    #[error("bad magic bytes")]
    BadMagic,

    #[error("bad format tag")]
    BadFormatTag,

    #[error("bad fmt subchunk id")]
    BadFmtChunkId,

    #[error("bad data subchunk id")]
    BadDataChunkId,

    #[error("declared data length {declared} exceeds remaining bytes {actual}")]
    TruncatedData { declared: usize, actual: usize },
}

/// The descriptor a telephony call carries: container kind plus PCM format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            bit_depth: 16,
        }
    }
}

impl AudioFormat {
    fn bytes_per_sample(&self) -> u32 {
        (self.bit_depth / 8) as u32
    }
}

/// Synthesize a full container (header + raw frames) for the given format.
pub fn synthesize(format: &AudioFormat, raw_frames: &[u8]) -> Vec<u8> {
    let data_len = raw_frames.len() as u32;
    let bytes_per_sample = format.bytes_per_sample();
    let block_align = format.channels as u32 * bytes_per_sample;
    let byte_rate = format.sample_rate * block_align;

    let mut out = Vec::with_capacity(HEADER_LEN + raw_frames.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&format.bit_depth.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(raw_frames);
    out
}

/// Parsed container: the descriptor it declares plus a view of its raw frames.
#[derive(Debug)]
pub struct Parsed<'a> {
    pub format: AudioFormat,
    pub raw_frames: &'a [u8],
}

/// Parse a container's header and return its declared format and raw frames.
pub fn parse(bytes: &[u8]) -> Result<Parsed<'_>, ContainerError> {
    if bytes.len() < HEADER_LEN {
        return Err(ContainerError::TooShort(bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" {
        return Err(ContainerError::BadMagic);
    }
    if &bytes[8..12] != b"WAVE" {
        return Err(ContainerError::BadFormatTag);
    }
    if &bytes[12..16] != b"fmt " {
        return Err(ContainerError::BadFmtChunkId);
    }
    let channels = u16::from_le_bytes([bytes[22], bytes[23]]);
    let sample_rate = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
    let bit_depth = u16::from_le_bytes([bytes[34], bytes[35]]);

    if &bytes[36..40] != b"data" {
        return Err(ContainerError::BadDataChunkId);
    }
    let declared = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]) as usize;
    let actual = bytes.len() - HEADER_LEN;
    if declared > actual {
        return Err(ContainerError::TruncatedData { declared, actual });
    }

    Ok(Parsed {
        format: AudioFormat {
            sample_rate,
            channels,
            bit_depth,
        },
        raw_frames: &bytes[HEADER_LEN..HEADER_LEN + declared],
    })
}

/// Downstream merge buffer: accumulates raw frames across chunks that each
/// arrive as a self-contained container, stripping headers on the way in
/// and re-synthesizing a single container only at emission.
#[derive(Debug, Default, Clone)]
pub struct MergeBuffer {
    raw: Vec<u8>,
}

impl MergeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Append a chunk, applying the container-merge rule: try to parse it as
    /// a container and keep only its raw frames; on parse failure, fall back
    /// to appending the bytes verbatim and let the caller log a warning.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), ContainerError> {
        match parse(chunk) {
            Ok(parsed) => {
                self.raw.extend_from_slice(parsed.raw_frames);
                Ok(())
            }
            Err(err) => {
                self.raw.extend_from_slice(chunk);
                Err(err)
            }
        }
    }

    /// Synthesize a single container from everything accumulated so far and
    /// clear the buffer.
    pub fn take_container(&mut self, format: &AudioFormat) -> Vec<u8> {
        let container = synthesize(format, &self.raw);
        self.raw.clear();
        container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_then_parse_roundtrips() {
        let format = AudioFormat {
            sample_rate: 24_000,
            channels: 1,
            bit_depth: 16,
        };
        let raw = vec![0xAAu8; 640];
        let container = synthesize(&format, &raw);
        assert_eq!(container.len(), HEADER_LEN + 640);
        assert_eq!(&container[4..8], &(676u32).to_le_bytes());

        let parsed = parse(&container).unwrap();
        assert_eq!(parsed.format, format);
        assert_eq!(parsed.raw_frames, raw.as_slice());
    }

    #[test]
    fn parse_rejects_short_buffers() {
        let err = parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ContainerError::TooShort(10)));
    }

    #[test]
    fn merge_buffer_concatenates_raw_frames_across_chunks() {
        let format = AudioFormat::default();
        let a = synthesize(&format, &[1, 2, 3, 4]);
        let b = synthesize(&format, &[5, 6, 7, 8]);

        let mut merge = MergeBuffer::new();
        merge.push_chunk(&a).unwrap();
        merge.push_chunk(&b).unwrap();
        assert_eq!(merge.len(), 8);

        let out = merge.take_container(&format);
        let parsed = parse(&out).unwrap();
        assert_eq!(parsed.raw_frames, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(merge.is_empty());
    }

    #[test]
    fn merge_buffer_falls_back_to_raw_append_on_bad_container() {
        let mut merge = MergeBuffer::new();
        let err = merge.push_chunk(&[9, 9, 9]).unwrap_err();
        assert!(matches!(err, ContainerError::TooShort(3)));
        assert_eq!(merge.len(), 3);
    }
}
