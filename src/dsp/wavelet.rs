//! Morlet wavelet transient score.
//!
//! A small log-spaced bank of complex Morlet kernels over the burst band.
//! Each scale convolves the recent input history with a unit-energy kernel
//! and tracks the instantaneous (analytic) energy; the emitted score is
//! the mean over scales of the positive relative energy change, so only
//! scales whose energy grew this sample contribute.
//!
//! Complex values are explicit (re, im) pairs throughout.

use std::f32::consts::PI;

use crate::dsp::utils::next_pow2;

/// Cycles under the Gaussian envelope of each kernel.
const KERNEL_CYCLES: f32 = 4.0;
/// Weber denominator guard. Large enough that negligible energies rising
/// out of true silence do not read as transients.
const ENERGY_EPS: f32 = 1e-6;

struct MorletScale {
    kernel_re: Vec<f32>,
    kernel_im: Vec<f32>,
    prev_energy: f32,
}

pub struct MorletBank {
    scales: Vec<MorletScale>,
    history: Vec<f32>,
    mask: usize,
    pos: usize,
}

impl MorletBank {
    pub fn new(sample_rate: f32, f_min_hz: f32, f_max_hz: f32, n_scales: usize) -> Self {
        let n_scales = n_scales.max(1);
        let f_min = f_min_hz.max(50.0);
        let f_max = f_max_hz.max(f_min * 1.01).min(sample_rate * 0.45);

        let mut scales = Vec::with_capacity(n_scales);
        let mut max_len = 1usize;
        for s in 0..n_scales {
            let frac = if n_scales == 1 {
                0.5
            } else {
                s as f32 / (n_scales - 1) as f32
            };
            let freq = f_min * (f_max / f_min).powf(frac);

            let len = ((KERNEL_CYCLES / freq * sample_rate).ceil() as usize).max(4) | 1;
            max_len = max_len.max(len);

            // Gaussian wide enough to hold KERNEL_CYCLES cycles.
            let sigma = len as f32 / 6.0;
            let center = (len / 2) as f32;
            let mut kernel_re = vec![0.0f32; len];
            let mut kernel_im = vec![0.0f32; len];
            let mut energy = 0.0f32;
            for i in 0..len {
                let t = (i as f32 - center) / sample_rate;
                let g = (-0.5 * ((i as f32 - center) / sigma).powi(2)).exp();
                let phase = 2.0 * PI * freq * t;
                kernel_re[i] = g * phase.cos();
                kernel_im[i] = g * phase.sin();
                energy += kernel_re[i] * kernel_re[i] + kernel_im[i] * kernel_im[i];
            }
            let norm = 1.0 / energy.sqrt().max(1e-12);
            for i in 0..len {
                kernel_re[i] *= norm;
                kernel_im[i] *= norm;
            }

            scales.push(MorletScale {
                kernel_re,
                kernel_im,
                prev_energy: 0.0,
            });
        }

        let hist_len = next_pow2(max_len);
        Self {
            scales,
            history: vec![0.0; hist_len],
            mask: hist_len - 1,
            pos: 0,
        }
    }

    /// Feed one sample and return the transient score.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.history[self.pos] = x;
        let newest = self.pos;
        self.pos = (self.pos + 1) & self.mask;

        let mut score = 0.0f32;
        for scale in &mut self.scales {
            let len = scale.kernel_re.len();
            let mut re = 0.0f32;
            let mut im = 0.0f32;
            // Kernel end aligned with the newest sample (causal).
            for k in 0..len {
                let idx = (newest + self.history.len() - k) & self.mask;
                let s = self.history[idx];
                re += scale.kernel_re[len - 1 - k] * s;
                im += scale.kernel_im[len - 1 - k] * s;
            }
            let energy = re * re + im * im;
            let weber = (energy - scale.prev_energy) / (scale.prev_energy + ENERGY_EPS);
            scale.prev_energy = energy;
            score += weber.max(0.0);
        }
        score / self.scales.len() as f32
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        for s in &mut self.scales {
            s.prev_energy = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_burst_onset_scores_high_sustain_low() {
        let sr = 16000.0;
        let mut bank = MorletBank::new(sr, 2000.0, 6000.0, 3);

        let mut onset_max = 0.0f32;
        let mut sustain_max = 0.0f32;
        for i in 0..8000 {
            let x = if i >= 4000 {
                0.5 * (2.0 * PI * 4000.0 * i as f32 / sr).sin()
            } else {
                0.0
            };
            let s = bank.process(x);
            if (4000..4200).contains(&i) {
                onset_max = onset_max.max(s);
            } else if i > 5000 {
                sustain_max = sustain_max.max(s);
            }
        }
        assert!(onset_max > 0.5, "onset score {onset_max}");
        assert!(sustain_max < onset_max * 0.2, "sustain {sustain_max}");
    }

    #[test]
    fn test_out_of_band_tone_ignored() {
        let sr = 16000.0;
        let mut bank = MorletBank::new(sr, 2000.0, 6000.0, 3);
        let mut max_score = 0.0f32;
        for i in 0..4000 {
            let x = if i >= 2000 {
                0.5 * (2.0 * PI * 150.0 * i as f32 / sr).sin()
            } else {
                0.0
            };
            max_score = max_score.max(bank.process(x));
        }
        // A low tone still produces a tiny leakage response at switch-on,
        // nothing comparable to an in-band burst.
        assert!(max_score < 0.5, "leakage {max_score}");
    }
}
