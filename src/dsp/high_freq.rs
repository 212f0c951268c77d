//! High-frequency band energy, a frication/burst correlate.
//!
//! Second-order Butterworth high-pass, squared output, asymmetric
//! envelope. Fast attack to catch plosive bursts; the release spans the
//! analysis window so the value survives until the framed features see it.

use crate::dsp::biquad::Biquad;
use crate::dsp::envelope::AsymFollower;

const ATTACK_MS: f32 = 1.0;
const BUTTERWORTH_Q: f32 = 0.707;

pub struct HighFreqEnergy {
    highpass: Biquad,
    follower: AsymFollower,
}

impl HighFreqEnergy {
    pub fn new(cutoff_hz: f32, release_ms: f32, sample_rate: f32) -> Self {
        let mut highpass = Biquad::new();
        highpass.update_hpf(cutoff_hz, BUTTERWORTH_Q, sample_rate);
        Self {
            highpass,
            follower: AsymFollower::new(ATTACK_MS, release_ms.max(1.0), sample_rate),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let hf = self.highpass.process(x);
        self.follower.process(hf * hf)
    }

    pub fn reset(&mut self) {
        self.highpass.reset_state();
        self.follower.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_separates_hiss_from_hum() {
        let sr = 16000.0;
        let mut ext_low = HighFreqEnergy::new(2000.0, 32.0, sr);
        let mut ext_high = HighFreqEnergy::new(2000.0, 32.0, sr);

        let mut low_e = 0.0f32;
        let mut high_e = 0.0f32;
        for i in 0..3200 {
            let t = i as f32 / sr;
            low_e = low_e.max(ext_low.process(0.5 * (2.0 * PI * 200.0 * t).sin()));
            high_e = high_e.max(ext_high.process(0.5 * (2.0 * PI * 5000.0 * t).sin()));
        }
        assert!(high_e > low_e * 20.0, "high {high_e} low {low_e}");
    }
}
