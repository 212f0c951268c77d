//! Fusion of normalized features into one salience score.
//!
//! Two rules, selected by the detector's mode:
//! - Offline: noise-floor gate, then a blend of the per-feature maximum
//!   and the weight-normalized average, with a warm-up confidence penalty.
//! - Realtime: geometric mean of the threshold ratios of the features
//!   currently above their calibrated thresholds, saturated into (0, 1).
//!   Requiring several features to clear threshold together is what keeps
//!   single-feature noise spikes out.

use crate::calibration::CAL_CHANNELS;

/// Fusion features, in `chan` order (energy is not fused).
pub const N_FEATURES: usize = 5;

/// Offline gate margin over the tracked noise floor.
const GATE_FLOOR_FACTOR: f32 = 1.5;
const GATE_FLOOR_MIN: f32 = 1e-6;
/// Warm-up penalty knee: below this average confidence the score shrinks.
const CONFIDENCE_KNEE: f32 = 0.3;
/// Voicing pseudo-feature cut-in for the realtime rule.
const VOICING_CUT_IN: f32 = 0.5;
/// Saturation slope of the realtime rule.
const SATURATION_GAIN: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
    weights: [f32; N_FEATURES],
    enabled: [bool; N_FEATURES],
    blend_alpha: f32,
}

impl FusionEngine {
    pub fn new(weights: [f32; N_FEATURES], enabled: [bool; N_FEATURES], blend_alpha: f32) -> Self {
        Self {
            weights,
            enabled,
            blend_alpha,
        }
    }

    /// Effective weights after disabling: zero for disabled features,
    /// remainder renormalized to sum to 1.
    pub fn effective_weights(&self) -> [f32; N_FEATURES] {
        let mut out = [0.0; N_FEATURES];
        let mut total = 0.0f32;
        for k in 0..N_FEATURES {
            if self.enabled[k] {
                total += self.weights[k];
            }
        }
        if total <= 0.0 {
            return out;
        }
        for k in 0..N_FEATURES {
            if self.enabled[k] {
                out[k] = self.weights[k] / total;
            }
        }
        out
    }

    /// Offline rule over sigmoid-normalized feature values.
    pub fn offline(
        &self,
        norms: &[f32; N_FEATURES],
        confidences: &[f32; N_FEATURES],
        envelope_energy: f32,
        noise_floor: f32,
    ) -> f32 {
        // Gate: below the noise bed nothing scores.
        if envelope_energy < (GATE_FLOOR_FACTOR * noise_floor).max(GATE_FLOOR_MIN) {
            return 0.0;
        }

        let weights = self.effective_weights();
        let mut avg = 0.0f32;
        let mut max = 0.0f32;
        let mut conf_sum = 0.0f32;
        let mut n_enabled = 0u32;
        for k in 0..N_FEATURES {
            if !self.enabled[k] {
                continue;
            }
            let v = if norms[k].is_finite() { norms[k] } else { 0.0 };
            avg += weights[k] * v;
            max = max.max(v);
            conf_sum += confidences[k];
            n_enabled += 1;
        }
        if n_enabled == 0 {
            return 0.0;
        }

        let mut fusion = self.blend_alpha * max + (1.0 - self.blend_alpha) * avg;

        let avg_conf = conf_sum / n_enabled as f32;
        if avg_conf < CONFIDENCE_KNEE {
            fusion *= 0.5 + avg_conf;
        }
        fusion
    }

    /// Realtime rule over raw feature values and calibrated thresholds.
    pub fn realtime(
        &self,
        raw: &[f32; N_FEATURES],
        thresholds: &[f32; CAL_CHANNELS],
        voicing_confidence: f32,
    ) -> f32 {
        let mut ln_sum = 0.0f32;
        let mut n_above = 0u32;

        for k in 0..N_FEATURES {
            if !self.enabled[k] {
                continue;
            }
            let v = raw[k];
            if !v.is_finite() {
                continue;
            }
            let ratio = v / thresholds[k].max(1e-12);
            if ratio > 1.0 {
                ln_sum += ratio.ln();
                n_above += 1;
            }
        }

        if voicing_confidence > VOICING_CUT_IN {
            ln_sum += (1.0 + voicing_confidence).ln();
            n_above += 1;
        }

        if n_above == 0 {
            return 0.0;
        }

        let geo_mean = (ln_sum / n_above as f32).exp();
        1.0 - 1.0 / (1.0 + SATURATION_GAIN * geo_mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::chan;

    fn engine_all() -> FusionEngine {
        FusionEngine::new(
            [0.3, 0.2, 0.15, 0.15, 0.2],
            [true; N_FEATURES],
            0.6,
        )
    }

    #[test]
    fn test_effective_weights_renormalize() {
        let mut enabled = [true; N_FEATURES];
        enabled[chan::MFCC_DELTA] = false;
        enabled[chan::WAVELET] = false;
        let eng = FusionEngine::new([0.3, 0.2, 0.15, 0.15, 0.2], enabled, 0.6);
        let w = eng.effective_weights();
        let sum: f32 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(w[chan::MFCC_DELTA], 0.0);
        assert_eq!(w[chan::WAVELET], 0.0);
    }

    #[test]
    fn test_offline_gate_silences_quiet_input() {
        let eng = engine_all();
        let norms = [0.9; N_FEATURES];
        let confs = [1.0; N_FEATURES];
        // Energy below 1.5x the floor
        assert_eq!(eng.offline(&norms, &confs, 1e-5, 1e-4), 0.0);
        // Energy above the gate scores
        assert!(eng.offline(&norms, &confs, 1e-2, 1e-4) > 0.8);
    }

    #[test]
    fn test_offline_confidence_penalty() {
        let eng = engine_all();
        let norms = [0.8; N_FEATURES];
        let settled = eng.offline(&norms, &[1.0; N_FEATURES], 0.1, 1e-6);
        let warming = eng.offline(&norms, &[0.1; N_FEATURES], 0.1, 1e-6);
        assert!((warming - settled * 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_realtime_empty_set_is_zero() {
        let eng = engine_all();
        let raw = [0.5; N_FEATURES];
        let theta = [1.0; CAL_CHANNELS];
        assert_eq!(eng.realtime(&raw, &theta, 0.0), 0.0);
    }

    #[test]
    fn test_realtime_multiple_features_beat_one() {
        let eng = engine_all();
        let theta = [1.0; CAL_CHANNELS];

        // One feature at 4x threshold
        let mut one = [0.5; N_FEATURES];
        one[chan::PEAK_RATE] = 4.0;
        let single = eng.realtime(&one, &theta, 0.0);

        // All five at 4x threshold
        let all = eng.realtime(&[4.0; N_FEATURES], &theta, 0.0);
        assert!(all >= single);
        // Both saturate below 1
        assert!(all < 1.0);
        // Geometric mean of a single ratio is the ratio itself
        assert!((single - (1.0 - 1.0 / (1.0 + 0.5 * 4.0))).abs() < 1e-6);
    }

    #[test]
    fn test_realtime_voicing_pseudo_feature() {
        let eng = engine_all();
        let theta = [1.0; CAL_CHANNELS];
        let raw = [0.5; N_FEATURES]; // nothing above threshold
        let with_voicing = eng.realtime(&raw, &theta, 0.9);
        assert!(with_voicing > 0.0);
        assert_eq!(eng.realtime(&raw, &theta, 0.4), 0.0);
    }
}
