//! G.711 μ-law (PCMU) encoding for the outgoing microphone track.

use std::time::Duration;

use super::track::AudioFrame;

/// PCMU is fixed at 8 kHz mono
pub const PCMU_CLOCK_RATE: u32 = 8_000;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Downmix to mono, resample to 8 kHz by nearest sample and μ-law encode.
pub fn encode_pcmu(frame: &AudioFrame) -> Vec<u8> {
    let channels = frame.channels.max(1) as usize;
    if frame.sample_rate == 0 || frame.samples.is_empty() {
        return Vec::new();
    }

    let mono: Vec<i16> = frame
        .samples
        .chunks(channels)
        .map(|c| (c.iter().map(|&s| s as i32).sum::<i32>() / c.len() as i32) as i16)
        .collect();

    let out_len = (mono.len() as u64 * PCMU_CLOCK_RATE as u64 / frame.sample_rate as u64) as usize;
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * frame.sample_rate as u64 / PCMU_CLOCK_RATE as u64) as usize;
            linear_to_ulaw(mono[src.min(mono.len() - 1)])
        })
        .collect()
}

/// Playback duration of a frame
pub fn frame_duration(frame: &AudioFrame) -> Duration {
    let channels = frame.channels.max(1) as u64;
    if frame.sample_rate == 0 {
        return Duration::ZERO;
    }
    let per_channel = frame.samples.len() as u64 / channels;
    Duration::from_micros(per_channel * 1_000_000 / frame.sample_rate as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_ulaw_reference_points() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
        // Symmetric apart from the sign bit
        assert_eq!(linear_to_ulaw(1000) ^ 0x80, linear_to_ulaw(-1000));
    }

    #[test]
    fn test_16khz_mono_halves() {
        let encoded = encode_pcmu(&frame(vec![0; 1600], 16_000, 1));
        assert_eq!(encoded.len(), 800);
        assert!(encoded.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_stereo_is_downmixed() {
        // Left and right cancel out
        let samples: Vec<i16> = (0..160).flat_map(|_| [1000, -1000]).collect();
        let encoded = encode_pcmu(&frame(samples, 8_000, 2));
        assert_eq!(encoded.len(), 160);
        assert!(encoded.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(
            frame_duration(&frame(vec![0; 3200], 16_000, 2)),
            Duration::from_millis(100)
        );
        assert_eq!(frame_duration(&frame(vec![0; 10], 0, 1)), Duration::ZERO);
    }
}
