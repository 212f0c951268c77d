//! Mel-cepstral timbre change: the MFCC delta feature.
//!
//! Consumes the power spectrum of each analysis frame (DC already
//! discarded), applies a triangular Mel filterbank between 80 Hz and
//! Nyquist, takes log energies, a type-II DCT down to 13 coefficients, and
//! reports the L2 norm of the frame-to-frame coefficient difference. All
//! tables are built at construction.

use std::f32::consts::PI;

/// Number of triangular Mel filters.
const N_FILTERS: usize = 26;
/// Cepstral coefficients kept after the DCT.
const N_COEFFS: usize = 13;
/// Filterbank lower edge in Hz.
const MEL_FMIN_HZ: f32 = 80.0;
/// Log compression guard.
const LOG_EPS: f32 = 1e-10;

#[inline]
fn hz_to_mel(f: f32) -> f32 {
    2595.0 * (1.0 + f / 700.0).log10()
}

#[inline]
fn mel_to_hz(m: f32) -> f32 {
    700.0 * (10.0f32.powf(m / 2595.0) - 1.0)
}

pub struct MelCepstrum {
    /// Dense filter weights, `N_FILTERS` rows of `n_bins` each.
    filters: Vec<Vec<f32>>,
    /// DCT-II basis, `N_COEFFS` rows of `N_FILTERS` each.
    dct_basis: Vec<[f32; N_FILTERS]>,
    mel_energies: [f32; N_FILTERS],
    coeffs: [f32; N_COEFFS],
    prev_coeffs: [f32; N_COEFFS],
    have_prev: bool,
}

impl MelCepstrum {
    /// `n_bins` is the length of the power slice handed to [`update`],
    /// i.e. FFT bins 1..=N/2; bin `j` sits at `(j + 1) * fs / fft_size` Hz.
    ///
    /// [`update`]: MelCepstrum::update
    pub fn new(fft_size: usize, sample_rate: f32) -> Self {
        let n_bins = fft_size / 2;
        let nyquist = sample_rate * 0.5;

        let mel_lo = hz_to_mel(MEL_FMIN_HZ);
        let mel_hi = hz_to_mel(nyquist);

        // Filter edges: N_FILTERS + 2 points evenly spaced in mel.
        let edges_hz: Vec<f32> = (0..N_FILTERS + 2)
            .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (N_FILTERS + 1) as f32))
            .collect();

        let bin_hz = sample_rate / fft_size as f32;
        let mut filters = Vec::with_capacity(N_FILTERS);
        for f in 0..N_FILTERS {
            let (left, center, right) = (edges_hz[f], edges_hz[f + 1], edges_hz[f + 2]);
            let mut weights = vec![0.0f32; n_bins];
            for (j, w) in weights.iter_mut().enumerate() {
                let freq = (j + 1) as f32 * bin_hz;
                if freq > left && freq <= center && center - left > 1e-6 {
                    *w = (freq - left) / (center - left);
                } else if freq > center && freq < right && right - center > 1e-6 {
                    *w = (right - freq) / (right - center);
                }
            }
            filters.push(weights);
        }

        let mut dct_basis = Vec::with_capacity(N_COEFFS);
        for k in 0..N_COEFFS {
            let mut row = [0.0f32; N_FILTERS];
            for (i, v) in row.iter_mut().enumerate() {
                *v = (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * N_FILTERS as f32)).cos();
            }
            dct_basis.push(row);
        }

        Self {
            filters,
            dct_basis,
            mel_energies: [0.0; N_FILTERS],
            coeffs: [0.0; N_COEFFS],
            prev_coeffs: [0.0; N_COEFFS],
            have_prev: false,
        }
    }

    /// Analyze one frame's power spectrum, returning the delta magnitude.
    /// The first frame has no predecessor and reports 0.
    pub fn update(&mut self, power: &[f32]) -> f32 {
        for (f, filter) in self.filters.iter().enumerate() {
            let mut e = 0.0f32;
            for (w, p) in filter.iter().zip(power.iter()) {
                e += w * p;
            }
            self.mel_energies[f] = (e + LOG_EPS).ln();
        }

        for (k, row) in self.dct_basis.iter().enumerate() {
            let mut c = 0.0f32;
            for (b, m) in row.iter().zip(self.mel_energies.iter()) {
                c += b * m;
            }
            self.coeffs[k] = c;
        }

        let delta = if self.have_prev {
            let mut sum = 0.0f32;
            for (c, p) in self.coeffs.iter().zip(self.prev_coeffs.iter()) {
                let d = c - p;
                sum += d * d;
            }
            sum.sqrt()
        } else {
            0.0
        };

        self.prev_coeffs = self.coeffs;
        self.have_prev = true;
        delta
    }

    pub fn reset(&mut self) {
        self.prev_coeffs = [0.0; N_COEFFS];
        self.have_prev = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::spectral_flux::SpectralAnalyzer;
    use std::f32::consts::PI;

    #[test]
    fn test_filterbank_covers_band() {
        let mel = MelCepstrum::new(512, 16000.0);
        // Every filter must have some nonzero weight.
        for (i, f) in mel.filters.iter().enumerate() {
            assert!(f.iter().any(|&w| w > 0.0), "empty filter {i}");
        }
    }

    #[test]
    fn test_timbre_change_beats_steady_state() {
        let sr = 16000.0;
        let mut an = SpectralAnalyzer::new(512, 160);
        let mut mel = MelCepstrum::new(512, sr);

        let mut steady_max = 0.0f32;
        let mut change_max = 0.0f32;
        for i in 0..16000 {
            let t = i as f32 / sr;
            // Timbre flip at 0.5 s: low harmonic stack vs bright stack
            let x = if i < 8000 {
                0.4 * (2.0 * PI * 220.0 * t).sin() + 0.2 * (2.0 * PI * 440.0 * t).sin()
            } else {
                0.3 * (2.0 * PI * 2500.0 * t).sin() + 0.3 * (2.0 * PI * 5000.0 * t).sin()
            };
            if an.push(x) {
                let d = mel.update(an.power());
                if i > 4000 && i < 7800 {
                    steady_max = steady_max.max(d);
                } else if i >= 8000 && i < 9600 {
                    change_max = change_max.max(d);
                }
            }
        }
        assert!(
            change_max > steady_max * 2.0,
            "change {change_max} steady {steady_max}"
        );
    }
}
