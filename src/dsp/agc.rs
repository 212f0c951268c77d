//! Automatic gain normalization front-end (optional).
//!
//! Levels the incoming stream toward a fixed RMS reference before any
//! analysis runs, so per-feature thresholds behave the same for quiet and
//! loud talkers. The gain reference adapts slowly and the applied gain is
//! slewed, so syllable-scale dynamics pass through unchanged.

use crate::dsp::utils::time_constant_coeff;

/// RMS the normalized stream aims for.
const TARGET_RMS: f32 = 0.1;
/// Adaptation window for the level estimate.
const LEVEL_TAU_MS: f32 = 500.0;
/// Gain slew window; fast enough to follow a new talker, slow enough to
/// leave onsets intact.
const GAIN_TAU_MS: f32 = 250.0;
/// Gain bounds. Below 0.5 the input is already hot; above 20 we would be
/// amplifying the noise bed.
const GAIN_MIN: f32 = 0.5;
const GAIN_MAX: f32 = 20.0;
/// Below this RMS the input is treated as silence and the gain holds.
const SILENCE_RMS: f32 = 1e-4;

#[derive(Debug, Clone, Copy)]
pub struct Agc {
    level_coeff: f32,
    gain_coeff: f32,
    mean_sq: f32,
    gain: f32,
}

impl Agc {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            level_coeff: time_constant_coeff(LEVEL_TAU_MS, sample_rate),
            gain_coeff: time_constant_coeff(GAIN_TAU_MS, sample_rate),
            mean_sq: 0.0,
            gain: 1.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.mean_sq = self.level_coeff * self.mean_sq + (1.0 - self.level_coeff) * x * x;
        let rms = self.mean_sq.sqrt();

        if rms > SILENCE_RMS {
            let desired = (TARGET_RMS / rms).clamp(GAIN_MIN, GAIN_MAX);
            self.gain = self.gain_coeff * self.gain + (1.0 - self.gain_coeff) * desired;
        }
        // During silence the gain holds its last value.

        x * self.gain
    }

    pub fn reset(&mut self) {
        self.mean_sq = 0.0;
        self.gain = 1.0;
    }
}
