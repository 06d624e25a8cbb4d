use crate::tts::TtsRequest;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TtsAudio {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub pcm_i16: Vec<i16>,
}

impl TtsAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.pcm_i16.len() as u64 / u64::from(self.channels);
        let rate = u64::from(self.sample_rate_hz);
        (frames * 1000 + rate / 2) / rate
    }
}

/// Stand-in voice: a sine tone whose length follows the text and speed.
#[derive(Clone, Debug)]
pub struct ToneSynthesizer {
    sample_rate_hz: u32,
    freq_hz: f32,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            sample_rate_hz: 22_050,
            freq_hz: 440.0, // A4
        }
    }
}

impl ToneSynthesizer {
    pub fn synthesize(&self, request: &TtsRequest) -> TtsAudio {
        let chars = request.text.chars().count() as f32;
        let speed = if request.speed.is_finite() && request.speed > 0.0 {
            request.speed.clamp(0.25, 4.0)
        } else {
            1.0
        };
        let duration_ms = (chars * 100.0).max(500.0) / speed;
        let samples = (duration_ms * self.sample_rate_hz as f32 / 1000.0) as usize;

        let mut pcm_i16 = Vec::with_capacity(samples);
        for i in 0..samples {
            let t = i as f32 / self.sample_rate_hz as f32;
            let amplitude = (2.0 * PI * self.freq_hz * t).sin() * 0.25;
            pcm_i16.push((amplitude * i16::MAX as f32) as i16);
        }

        TtsAudio {
            sample_rate_hz: self.sample_rate_hz,
            channels: 1,
            pcm_i16,
        }
    }
}
