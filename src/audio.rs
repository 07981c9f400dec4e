//! PCM format definitions and codec helpers.

use crate::error::{Result, StreamError};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Audio format for a streaming session. Fixed per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels (1 = mono).
    pub channels: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// 16-bit mono PCM at 24 kHz — the wire default for synthesized speech.
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: 24_000, channels: 1, bits_per_sample: 16 }
    }

    /// Bytes of PCM per second of audio.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// Playback duration in seconds for `sample_count` samples.
    pub fn duration_secs(&self, sample_count: usize) -> f64 {
        sample_count as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Decode a base64 payload into raw PCM bytes.
pub fn decode_base64_pcm(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| StreamError::audio(format!("Invalid base64 audio payload: {e}")))
}

/// Convert 16-bit little-endian PCM bytes to `f32` samples in `[-1.0, 1.0]`.
///
/// Division by 32768 maps the full signed range correctly, including the
/// `-32768` edge case (which lands exactly on -1.0). A trailing odd byte is
/// dropped with a diagnostic rather than failing the chunk.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 2 != 0 {
        tracing::warn!("PCM chunk has odd length {}, dropping trailing byte", bytes.len());
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Convert `f32` samples back to 16-bit little-endian PCM bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32);
        bytes.extend_from_slice(&(clamped as i16).to_le_bytes());
    }
    bytes
}

/// Wrap raw PCM bytes in a standalone WAV container.
///
/// Produces the canonical 44-byte RIFF/fmt/data layout; useful for saving a
/// session's audio to disk or handing it to players that do not accept bare
/// PCM.
pub fn pcm_to_wav(pcm: &[u8], format: AudioFormat) -> Vec<u8> {
    let block_align = format.channels * (format.bits_per_sample / 8);
    let byte_rate = format.bytes_per_second();
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&format.channels.to_le_bytes());
    wav.extend_from_slice(&format.sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
