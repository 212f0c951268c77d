//! Running per-feature statistics and normalization.
//!
//! Each feature keeps an EMA mean and variance, a running maximum, and an
//! update count. The EMA coefficient derives from the configured adaptive
//! time constant at the feature's own update rate, so per-sample and
//! per-hop features converge on the same wall-clock schedule.

use crate::dsp::utils::{legacy_norm, sigmoid_norm};
use serde::{Deserialize, Serialize};

/// Wall-clock span a feature needs before its statistics count as settled.
const CONFIDENCE_SPAN_MS: f32 = 500.0;

/// How a z-score becomes a [0, 1] feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationMode {
    /// `clamp(z, 0, 4) / 4`.
    LegacyZScore,
    /// Soft-saturated `0.5 * (1 + s(z - 1))`; biased low for background.
    Sigmoid,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureStats {
    mean: f32,
    var: f32,
    max: f32,
    count: u64,
    alpha: f32,
    confidence_target: u64,
}

impl FeatureStats {
    /// `alpha` is the per-update EMA blend; `updates_per_second` is the
    /// feature's own rate (sample rate, or 1000/hop_ms for framed ones).
    pub fn new(alpha: f32, updates_per_second: f32) -> Self {
        let target = (CONFIDENCE_SPAN_MS * 0.001 * updates_per_second).max(1.0) as u64;
        Self {
            mean: 0.0,
            var: 0.0,
            max: 0.0,
            count: 0,
            alpha,
            confidence_target: target,
        }
    }

    /// Fold in one observation. Non-finite values are ignored entirely.
    #[inline]
    pub fn update(&mut self, x: f32) {
        if !x.is_finite() {
            return;
        }
        let d = x - self.mean;
        self.mean += self.alpha * d;
        self.var = (1.0 - self.alpha) * (self.var + self.alpha * d * d);
        if x > self.max {
            self.max = x;
        }
        self.count += 1;
    }

    #[inline]
    pub fn mean(&self) -> f32 {
        self.mean
    }

    #[inline]
    pub fn sigma(&self) -> f32 {
        self.var.max(0.0).sqrt()
    }

    #[inline]
    #[allow(dead_code)]
    pub fn max(&self) -> f32 {
        self.max
    }

    /// 0..1 ramp over the first 500 ms of updates.
    #[inline]
    pub fn confidence(&self) -> f32 {
        ((self.count as f32) / (self.confidence_target as f32)).min(1.0)
    }

    #[inline]
    pub fn z_score(&self, x: f32) -> f32 {
        if !x.is_finite() {
            return 0.0;
        }
        let sigma = self.sigma();
        if sigma > 1e-12 {
            (x - self.mean) / sigma
        } else if self.count == 0 {
            0.0
        } else {
            // Degenerate spread: anything above the mean is a big excursion.
            if x > self.mean {
                4.0
            } else {
                0.0
            }
        }
    }

    #[inline]
    pub fn normalized(&self, x: f32, mode: NormalizationMode) -> f32 {
        let z = self.z_score(x);
        match mode {
            NormalizationMode::LegacyZScore => legacy_norm(z),
            NormalizationMode::Sigmoid => sigmoid_norm(z),
        }
    }

    pub fn reset(&mut self) {
        self.mean = 0.0;
        self.var = 0.0;
        self.max = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_to_constant_input() {
        let mut s = FeatureStats::new(0.01, 1000.0);
        for _ in 0..2000 {
            s.update(3.0);
        }
        assert!((s.mean() - 3.0).abs() < 0.05);
        assert!(s.sigma() < 0.1);
        assert!((s.confidence() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut s = FeatureStats::new(0.1, 1000.0);
        for _ in 0..100 {
            s.update(1.0);
        }
        let mean_before = s.mean();
        let count_before = s.count;
        s.update(f32::NAN);
        s.update(f32::INFINITY);
        assert_eq!(s.mean(), mean_before);
        assert_eq!(s.count, count_before);
        assert_eq!(s.z_score(f32::NAN), 0.0);
    }

    #[test]
    fn test_confidence_ramp() {
        // 100 updates/s with a 500 ms span: target is 50 updates.
        let mut s = FeatureStats::new(0.1, 100.0);
        for _ in 0..25 {
            s.update(1.0);
        }
        assert!((s.confidence() - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_excursion_scores_high() {
        let mut s = FeatureStats::new(0.01, 1000.0);
        for i in 0..1000 {
            // Small jitter so sigma is well-defined
            s.update(1.0 + 0.01 * ((i % 7) as f32 - 3.0));
        }
        let z = s.z_score(2.0);
        assert!(z > 4.0, "z = {z}");
        assert!(s.normalized(2.0, NormalizationMode::Sigmoid) > 0.9);
        assert_eq!(s.normalized(2.0, NormalizationMode::LegacyZScore), 1.0);
    }
}
