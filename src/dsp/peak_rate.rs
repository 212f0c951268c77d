//! Peak-rate extractor: band-passed envelope rise velocity.
//!
//! The positive-going derivative of a band-limited amplitude envelope is a
//! robust correlate of vowel onsets. Chain: band-pass around the vowel
//! band, rectify, asymmetric follower, half-wave-rectified first
//! difference. One value per sample.

use crate::dsp::biquad::Biquad;
use crate::dsp::envelope::AsymFollower;

/// Follower attack, fast enough to ride the onset ramp.
const ATTACK_MS: f32 = 5.0;
/// Follower release, slow enough that the slope stays positive through
/// one onset.
const RELEASE_MS: f32 = 20.0;

pub struct PeakRateExtractor {
    bandpass: Biquad,
    follower: AsymFollower,
    prev_env: f32,
}

impl PeakRateExtractor {
    pub fn new(band_min_hz: f32, band_max_hz: f32, sample_rate: f32) -> Self {
        let center = 0.5 * (band_min_hz + band_max_hz);
        let bandwidth = (band_max_hz - band_min_hz).max(1.0);
        let q = center / bandwidth;

        let mut bandpass = Biquad::new();
        bandpass.update_bandpass(center, q, sample_rate);

        Self {
            bandpass,
            follower: AsymFollower::new(ATTACK_MS, RELEASE_MS, sample_rate),
            prev_env: 0.0,
        }
    }

    /// Returns (envelope, peak_rate) for this sample.
    #[inline]
    pub fn process(&mut self, x: f32) -> (f32, f32) {
        let banded = self.bandpass.process(x);
        let env = self.follower.process(banded.abs());
        let rate = (env - self.prev_env).max(0.0);
        self.prev_env = env;
        (env, rate)
    }

    pub fn reset(&mut self) {
        self.bandpass.reset_state();
        self.follower.reset();
        self.prev_env = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_onset_spikes_then_decays() {
        let sr = 16000.0;
        let mut ext = PeakRateExtractor::new(300.0, 2000.0, sr);

        // Silence first
        let mut silent_max = 0.0f32;
        for _ in 0..1600 {
            let (_, r) = ext.process(0.0);
            silent_max = silent_max.max(r);
        }
        assert_eq!(silent_max, 0.0);

        // In-band tone switched on: the rate must spike at onset...
        let mut onset_max = 0.0f32;
        let mut sustain_max = 0.0f32;
        for i in 0..4800 {
            let x = 0.5 * (2.0 * PI * 800.0 * i as f32 / sr).sin();
            let (_, r) = ext.process(x);
            if i < 400 {
                onset_max = onset_max.max(r);
            } else if i > 1600 {
                sustain_max = sustain_max.max(r);
            }
        }
        // ...and be much smaller once the envelope has settled.
        assert!(onset_max > 0.0);
        assert!(sustain_max < onset_max * 0.2, "sustain {sustain_max} vs onset {onset_max}");
    }

    #[test]
    fn test_out_of_band_tone_barely_registers() {
        let sr = 16000.0;
        let mut in_band = PeakRateExtractor::new(300.0, 2000.0, sr);
        let mut probe = PeakRateExtractor::new(300.0, 2000.0, sr);

        let mut max_in = 0.0f32;
        let mut max_out = 0.0f32;
        for i in 0..3200 {
            let t = i as f32 / sr;
            let (_, a) = in_band.process(0.5 * (2.0 * PI * 900.0 * t).sin());
            let (_, b) = probe.process(0.5 * (2.0 * PI * 60.0 * t).sin());
            max_in = max_in.max(a);
            max_out = max_out.max(b);
        }
        assert!(max_out < max_in * 0.3);
    }
}
