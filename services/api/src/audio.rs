//! Audio format negotiated with the transcription provider and the checks
//! every client frame passes before it is forwarded upstream.

use base64::Engine;
use bytes::Bytes;

/// Raw PCM16 little-endian audio description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// The only format the pipeline accepts: PCM16 LE, mono, 16 kHz.
    pub const PCM16_MONO_16K: AudioFormat = AudioFormat {
        sample_rate: 16_000,
        channels: 1,
    };

    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Provider query encoding name.
    pub fn encoding(&self) -> &'static str {
        "linear16"
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * Self::BYTES_PER_SAMPLE
    }

    /// Largest single frame accepted: one second of audio.
    pub fn max_frame_bytes(&self) -> usize {
        self.bytes_per_second()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::PCM16_MONO_16K
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameRejected {
    #[error("empty audio frame")]
    Empty,
    #[error("frame of {0} bytes is not whole 16-bit samples")]
    PartialSample(usize),
    #[error("frame carries a {0} container header, expected raw PCM16")]
    Container(&'static str),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
}

const CONTAINER_MAGIC: &[(&[u8], &str)] = &[
    (b"RIFF", "WAV"),
    (b"OggS", "Ogg"),
    (b"fLaC", "FLAC"),
    (b"ID3", "MP3"),
    (&[0x1A, 0x45, 0xDF, 0xA3], "WebM"),
];

/// Checks a frame against the negotiated format.
pub fn validate_frame(frame: &[u8], format: &AudioFormat) -> Result<(), FrameRejected> {
    if frame.is_empty() {
        return Err(FrameRejected::Empty);
    }
    let sample_width = AudioFormat::BYTES_PER_SAMPLE * format.channels as usize;
    if frame.len() % sample_width != 0 {
        return Err(FrameRejected::PartialSample(frame.len()));
    }
    if let Some((_, name)) = CONTAINER_MAGIC
        .iter()
        .find(|(magic, _)| frame.starts_with(magic))
    {
        return Err(FrameRejected::Container(name));
    }
    let max = format.max_frame_bytes();
    if frame.len() > max {
        return Err(FrameRejected::TooLarge {
            len: frame.len(),
            max,
        });
    }
    Ok(())
}

/// Decodes a base64 audio payload from the client.
pub fn decode_base64(payload: &str) -> Result<Bytes, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map(Bytes::from)
}
