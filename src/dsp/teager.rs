//! Teager energy operator and local energy ratio.
//!
//! Both are auxiliary "strong single cue" signals: the state machine uses
//! them to bypass the f0-rise gate when one of them is unambiguous, they
//! never enter the fusion score.

use crate::dsp::utils::ema_alpha;

/// The z-score reads 0 until this much signal has been folded into the
/// statistics; an unsettled sigma turns any signal start into a false
/// multi-sigma excursion.
const WARMUP_MS: f32 = 250.0;

/// Nonlinear energy operator `x[n-1]^2 - x[n-2] * x[n]`, half-wave
/// rectified, with a running z-score.
pub struct TeagerOperator {
    x1: f32,
    x2: f32,
    mean: f32,
    var: f32,
    alpha: f32,
    count: u64,
    warmup: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TeagerOutput {
    pub raw: f32,
    pub z: f32,
}

impl TeagerOperator {
    pub fn new(tau_ms: f32, sample_rate: f32) -> Self {
        Self {
            x1: 0.0,
            x2: 0.0,
            mean: 0.0,
            var: 0.0,
            alpha: ema_alpha(tau_ms, sample_rate),
            count: 0,
            warmup: (WARMUP_MS * 0.001 * sample_rate).max(1.0) as u64,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> TeagerOutput {
        let raw = (self.x1 * self.x1 - self.x2 * x).max(0.0);
        self.x2 = self.x1;
        self.x1 = x;

        let sigma = self.var.max(0.0).sqrt();
        let z = if self.count >= self.warmup && sigma > 1e-12 {
            (raw - self.mean) / sigma
        } else {
            0.0
        };

        let d = raw - self.mean;
        self.mean += self.alpha * d;
        self.var = (1.0 - self.alpha) * (self.var + self.alpha * d * d);
        self.count += 1;

        TeagerOutput { raw, z }
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.mean = 0.0;
        self.var = 0.0;
        self.count = 0;
    }
}

/// Short-window over long-window energy, a Weber-style salience cue.
const SHORT_TAU_MS: f32 = 20.0;
const LONG_TAU_MS: f32 = 500.0;
const RATIO_CLAMP: f32 = 10.0;

pub struct LocalEnergyRatio {
    short_alpha: f32,
    long_alpha: f32,
    short: f32,
    long: f32,
}

impl LocalEnergyRatio {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            short_alpha: ema_alpha(SHORT_TAU_MS, sample_rate),
            long_alpha: ema_alpha(LONG_TAU_MS, sample_rate),
            short: 0.0,
            long: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let e = x * x;
        self.short += self.short_alpha * (e - self.short);
        self.long += self.long_alpha * (e - self.long);
        (self.short / (self.long + 1e-12)).clamp(0.0, RATIO_CLAMP)
    }

    pub fn reset(&mut self) {
        self.short = 0.0;
        self.long = 0.0;
    }
}
