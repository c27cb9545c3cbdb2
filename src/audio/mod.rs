//! Narration audio decoding
//!
//! Speech payloads arrive base64-encoded and are either a self-describing
//! container (WAV, MP3, OGG, ...) or headerless 16-bit PCM. Decoding tries
//! the container path first and falls back to raw PCM; a payload is only
//! rejected when neither strategy yields samples.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Sample rate of headerless speech output
pub const RAW_PCM_SAMPLE_RATE: u32 = 24_000;

/// Decode strategies, in the order they are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// Probe for a known container/codec
    Container,
    /// Little-endian signed 16-bit mono at 24 kHz
    RawPcm,
}

/// Decoded, playable audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub channels: usize,
    pub sample_rate: u32,
    /// One vector per channel, values in [-1, 1]
    pub samples: Vec<Vec<f32>>,
    /// Strategy that produced this buffer
    pub strategy: DecodeStrategy,
}

impl AudioBuffer {
    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.samples.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not valid base64
    InvalidBase64(String),
    /// Every strategy failed; one reason per attempted strategy
    Undecodable(Vec<(DecodeStrategy, String)>),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidBase64(msg) => write!(f, "audio payload is not base64: {}", msg),
            DecodeError::Undecodable(reasons) => {
                write!(f, "audio could not be decoded")?;
                for (strategy, reason) in reasons {
                    write!(f, "; {:?}: {}", strategy, reason)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Base64 audio decoder with container-then-PCM fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode a base64 payload.
    ///
    /// `hint` selects the first strategy to try. Hinting `RawPcm` skips
    /// container probing entirely.
    pub fn decode(payload: &str, hint: Option<DecodeStrategy>) -> Result<AudioBuffer, DecodeError> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

        let order: &[DecodeStrategy] = match hint {
            Some(DecodeStrategy::RawPcm) => &[DecodeStrategy::RawPcm],
            _ => &[DecodeStrategy::Container, DecodeStrategy::RawPcm],
        };

        let mut failures = Vec::new();
        for strategy in order {
            let attempt = match strategy {
                DecodeStrategy::Container => decode_container(&bytes),
                DecodeStrategy::RawPcm => decode_raw_pcm(&bytes),
            };
            match attempt {
                Ok(buffer) => return Ok(buffer),
                Err(reason) => {
                    debug!(strategy = ?strategy, reason = %reason, "Audio decode strategy failed");
                    failures.push((*strategy, reason));
                }
            }
        }

        Err(DecodeError::Undecodable(failures))
    }
}

/// Headerless LE i16 mono. A trailing odd byte is dropped.
pub fn decode_raw_pcm(bytes: &[u8]) -> Result<AudioBuffer, String> {
    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    if samples.is_empty() {
        return Err(format!("{} bytes is too short for 16-bit PCM", bytes.len()));
    }

    Ok(AudioBuffer {
        channels: 1,
        sample_rate: RAW_PCM_SAMPLE_RATE,
        samples: vec![samples],
        strategy: DecodeStrategy::RawPcm,
    })
}

fn decode_container(bytes: &[u8]) -> Result<AudioBuffer, String> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("probe failed: {}", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("no audio track")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("unsupported codec: {}", e))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(format!("error reading packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packet; keep what decodes
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(format!("decode failed: {}", e)),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buf.samples());
    }

    let channels = channels.filter(|c| *c > 0).ok_or("channel count unknown")?;
    let sample_rate = sample_rate.ok_or("sample rate unknown")?;
    if interleaved.is_empty() {
        return Err("container holds no samples".to_string());
    }

    Ok(AudioBuffer {
        channels,
        sample_rate,
        samples: deinterleave(&interleaved, channels),
        strategy: DecodeStrategy::Container,
    })
}

fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = interleaved.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            out[ch].push(*sample);
        }
    }
    out
}
