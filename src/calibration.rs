//! Online noise-floor calibration for realtime mode.
//!
//! While calibrating, every sample's raw feature frame lands in a fixed
//! circular buffer and the detector stays dormant. Once the configured
//! duration has elapsed the buffered frames are folded into per-channel
//! thresholds `theta = mu + gamma * sigma` with `gamma = 10^(SNR_dB/10)`.
//! The mean and deviation are kept after finalization so a later SNR
//! change re-derives thresholds without recollecting.

use log::info;

/// Calibrated channels, in frame order.
pub const CAL_CHANNELS: usize = 6;

/// Frame layout indices.
pub mod chan {
    pub const PEAK_RATE: usize = 0;
    pub const SPECTRAL_FLUX: usize = 1;
    pub const HIGH_FREQ: usize = 2;
    pub const MFCC_DELTA: usize = 3;
    pub const WAVELET: usize = 4;
    pub const ENERGY: usize = 5;
}

/// Ring capacity; power of two so wraparound is a mask.
const CAPACITY: usize = 128;
/// Threshold floor.
const THETA_FLOOR: f32 = 1e-6;

pub struct Calibrator {
    frames: Vec<[f32; CAL_CHANNELS]>,
    write: u64,
    target: u64,
    calibrating: bool,
    finalized: bool,
    gamma: f32,
    mu: [f32; CAL_CHANNELS],
    sigma: [f32; CAL_CHANNELS],
    thresholds: [f32; CAL_CHANNELS],
}

impl Calibrator {
    pub fn new(target_samples: u64, snr_db: f32) -> Self {
        Self {
            frames: vec![[0.0; CAL_CHANNELS]; CAPACITY],
            write: 0,
            target: target_samples.max(1),
            calibrating: false,
            finalized: false,
            gamma: snr_gamma(snr_db),
            mu: [0.0; CAL_CHANNELS],
            sigma: [0.0; CAL_CHANNELS],
            thresholds: [THETA_FLOOR; CAL_CHANNELS],
        }
    }

    /// Begin (or restart) a collection phase.
    pub fn start(&mut self) {
        self.write = 0;
        self.calibrating = true;
        self.finalized = false;
    }

    pub fn stop(&mut self) {
        self.calibrating = false;
    }

    #[inline]
    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    /// Append one frame. Returns true when this frame completed the phase.
    #[inline]
    pub fn push(&mut self, frame: [f32; CAL_CHANNELS]) -> bool {
        if !self.calibrating {
            return false;
        }
        self.frames[(self.write as usize) & (CAPACITY - 1)] = frame;
        self.write += 1;
        if self.write >= self.target {
            self.finalize();
            return true;
        }
        false
    }

    fn finalize(&mut self) {
        let n = (self.write.min(CAPACITY as u64)) as usize;
        debug_assert!(n > 0);
        let inv_n = 1.0 / n as f32;

        for c in 0..CAL_CHANNELS {
            let mut sum = 0.0f32;
            for frame in self.frames.iter().take(n) {
                let v = frame[c];
                if v.is_finite() {
                    sum += v;
                }
            }
            let mean = sum * inv_n;
            let mut sq = 0.0f32;
            for frame in self.frames.iter().take(n) {
                let v = frame[c];
                if v.is_finite() {
                    let d = v - mean;
                    sq += d * d;
                }
            }
            self.mu[c] = mean;
            self.sigma[c] = (sq * inv_n).sqrt();
        }

        self.calibrating = false;
        self.finalized = true;
        self.derive_thresholds();

        info!(
            "calibration complete: thresholds pr={:.2e} sf={:.2e} hf={:.2e} mfcc={:.2e} wav={:.2e} en={:.2e}",
            self.thresholds[chan::PEAK_RATE],
            self.thresholds[chan::SPECTRAL_FLUX],
            self.thresholds[chan::HIGH_FREQ],
            self.thresholds[chan::MFCC_DELTA],
            self.thresholds[chan::WAVELET],
            self.thresholds[chan::ENERGY],
        );
    }

    fn derive_thresholds(&mut self) {
        for c in 0..CAL_CHANNELS {
            self.thresholds[c] = (self.mu[c] + self.gamma * self.sigma[c]).max(THETA_FLOOR);
        }
    }

    /// Update the SNR margin. Already-finalized thresholds re-derive from
    /// the stored statistics immediately.
    pub fn set_snr_db(&mut self, snr_db: f32) {
        self.gamma = snr_gamma(snr_db);
        if self.finalized {
            self.derive_thresholds();
        }
    }

    #[inline]
    pub fn thresholds(&self) -> &[f32; CAL_CHANNELS] {
        &self.thresholds
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn reset(&mut self) {
        self.write = 0;
        self.calibrating = false;
        self.finalized = false;
        self.mu = [0.0; CAL_CHANNELS];
        self.sigma = [0.0; CAL_CHANNELS];
        self.thresholds = [THETA_FLOOR; CAL_CHANNELS];
    }
}

#[inline]
fn snr_gamma(snr_db: f32) -> f32 {
    (10.0f32).powf(snr_db / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_track_mean_and_spread() {
        let mut cal = Calibrator::new(200, 10.0); // gamma = 10
        cal.start();
        assert!(cal.is_calibrating());

        let mut done = false;
        for i in 0..200u32 {
            // Alternating values: mean 0.5, sigma 0.5 per channel
            let v = (i % 2) as f32;
            done = cal.push([v; CAL_CHANNELS]);
        }
        assert!(done);
        assert!(!cal.is_calibrating());

        for c in 0..CAL_CHANNELS {
            let theta = cal.thresholds()[c];
            // mu + gamma*sigma = 0.5 + 10*0.5 = 5.5
            assert!((theta - 5.5).abs() < 0.1, "channel {c}: {theta}");
        }
    }

    #[test]
    fn test_snr_change_rederives_without_recollection() {
        let mut cal = Calibrator::new(100, 6.0);
        cal.start();
        for i in 0..100u32 {
            let v = (i % 2) as f32;
            cal.push([v; CAL_CHANNELS]);
        }
        let theta_6db = cal.thresholds()[0];

        cal.set_snr_db(0.0); // gamma = 1
        let theta_0db = cal.thresholds()[0];
        assert!(theta_0db < theta_6db);
        assert!((theta_0db - 1.0).abs() < 0.1, "{theta_0db}");
    }

    #[test]
    fn test_zero_input_floors_thresholds() {
        let mut cal = Calibrator::new(50, 6.0);
        cal.start();
        for _ in 0..50 {
            cal.push([0.0; CAL_CHANNELS]);
        }
        for c in 0..CAL_CHANNELS {
            assert_eq!(cal.thresholds()[c], 1e-6);
        }
    }

    #[test]
    fn test_restart_clears_finalized_state() {
        let mut cal = Calibrator::new(10, 6.0);
        cal.start();
        for _ in 0..10 {
            cal.push([1.0; CAL_CHANNELS]);
        }
        assert!(cal.is_finalized());
        cal.start();
        assert!(cal.is_calibrating());
        assert!(!cal.is_finalized());
    }
}
