//! Raw PCM to WAV container wrapping.
//!
//! The speech and music backends return bare PCM sample data; browsers need
//! a RIFF/WAVE header in front of it before the artifact is playable.

/// Wrap raw PCM bytes in a WAV container.
///
/// `sample_width` is bytes per sample (2 = 16-bit). Speech uses
/// 24 kHz mono, music 48 kHz stereo.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16, sample_width: u16) -> Vec<u8> {
    let byte_rate = sample_rate * u32::from(channels) * u32::from(sample_width);
    let block_align = channels * sample_width;
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk: PCM, 16 bytes
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&(sample_width * 8).to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
