//! Biquad filter (IIR 2nd order) for the analysis front-ends.
//!
//! Only the designs the detector actually drives are provided: Butterworth
//! high-pass and low-pass, and a constant-peak band-pass used by the
//! peak-rate chain. Coefficients follow the RBJ cookbook forms.
//!
//! # Design Notes
//! - Safe for the per-sample hot path (no allocations, no branches in
//!   `process`)
//! - Coefficient updates do not clear delay state; call `reset_state`
//!   explicitly when deterministic restarts are needed

use std::f32::consts::PI;

/// Second-order recursive filter in transposed direct form.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
    z1: f32,
    z2: f32,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::new()
    }
}

impl Biquad {
    pub fn new() -> Self {
        Self {
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Process a single sample.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let out = input * self.a0 + self.z1;

        // Anti-denormal: tiny DC offset
        self.z1 = input * self.a1 + self.z2 - self.b1 * out + 1e-25;
        self.z2 = input * self.a2 - self.b2 * out + 1e-25;

        out
    }

    /// Clear filter delay state without touching coefficients.
    #[inline]
    pub fn reset_state(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    // ---------------------------------------------------------------------
    // Filter design helpers (RBJ-style)
    // ---------------------------------------------------------------------

    pub fn update_hpf(&mut self, cutoff: f32, q: f32, sr: f32) {
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        let a0 = 1.0 + alpha;
        let inv_a0 = 1.0 / a0;

        self.a0 = ((1.0 + cw0) * 0.5) * inv_a0;
        self.a1 = -(1.0 + cw0) * inv_a0;
        self.a2 = ((1.0 + cw0) * 0.5) * inv_a0;
        self.b1 = (-2.0 * cw0) * inv_a0;
        self.b2 = (1.0 - alpha) * inv_a0;
    }

    #[allow(dead_code)]
    pub fn update_lpf(&mut self, cutoff: f32, q: f32, sr: f32) {
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        let a0 = 1.0 + alpha;
        let inv_a0 = 1.0 / a0;

        self.a0 = ((1.0 - cw0) * 0.5) * inv_a0;
        self.a1 = (1.0 - cw0) * inv_a0;
        self.a2 = ((1.0 - cw0) * 0.5) * inv_a0;
        self.b1 = (-2.0 * cw0) * inv_a0;
        self.b2 = (1.0 - alpha) * inv_a0;
    }

    /// Band-pass with constant 0 dB peak gain at `center`.
    pub fn update_bandpass(&mut self, center: f32, q: f32, sr: f32) {
        let w0 = 2.0 * PI * center / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));

        let a0 = 1.0 + alpha;
        let inv_a0 = 1.0 / a0;

        self.a0 = alpha * inv_a0;
        self.a1 = 0.0;
        self.a2 = -alpha * inv_a0;
        self.b1 = (-2.0 * w0.cos()) * inv_a0;
        self.b2 = (1.0 - alpha) * inv_a0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone_gain(filter: &mut Biquad, freq: f32, sr: f32) -> f32 {
        filter.reset_state();
        let n = (sr * 0.25) as usize;
        let mut peak = 0.0f32;
        for i in 0..n {
            let x = (2.0 * PI * freq * i as f32 / sr).sin();
            let y = filter.process(x);
            // Skip the transient before measuring
            if i > n / 2 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn test_hpf_attenuates_low_passes_high() {
        let sr = 16000.0;
        let mut f = Biquad::new();
        f.update_hpf(2000.0, 0.707, sr);

        let low = tone_gain(&mut f, 200.0, sr);
        let high = tone_gain(&mut f, 6000.0, sr);
        assert!(low < 0.1, "low tone leaked: {low}");
        assert!(high > 0.8, "high tone attenuated: {high}");
    }

    #[test]
    fn test_bandpass_peaks_at_center() {
        let sr = 16000.0;
        let mut f = Biquad::new();
        f.update_bandpass(1000.0, 1.0, sr);

        let center = tone_gain(&mut f, 1000.0, sr);
        let below = tone_gain(&mut f, 100.0, sr);
        let above = tone_gain(&mut f, 7000.0, sr);
        assert!(center > 0.9, "center gain {center}");
        assert!(below < 0.3, "below gain {below}");
        assert!(above < 0.3, "above gain {above}");
    }
}
