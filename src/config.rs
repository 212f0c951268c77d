//! Detector configuration.
//!
//! One immutable numeric record fixed at construction. Defaults are tuned
//! for conversational speech at any common sample rate; everything is
//! overridable before the detector is built.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::utils::next_pow2;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),
    #[error("peak-rate band is empty or inverted: [{0}, {1}] Hz")]
    InvalidBand(f32, f32),
    #[error("hop ({hop_ms} ms) must not exceed the FFT window ({fft_ms} ms)")]
    HopExceedsWindow { hop_ms: f32, fft_ms: f32 },
    #[error("fusion blend alpha must lie in [0, 1], got {0}")]
    InvalidBlendAlpha(f32),
    #[error("fusion weights must be non-negative")]
    NegativeWeight,
    #[error("at least one feature extractor must be enabled")]
    NoFeaturesEnabled,
    #[error("hysteresis factors must satisfy 0 < off <= on")]
    InvalidHysteresis,
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Fixes all time-constant and filter math.
    pub sample_rate: f32,

    /// Band-pass bounds for the peak-rate chain, Hz.
    pub peak_rate_band_min_hz: f32,
    pub peak_rate_band_max_hz: f32,

    /// Cooldown duration; also governs the f0-gate elapsed-time bypass.
    pub min_syllable_dist_ms: f32,

    /// Absolute floor for the adaptive peak-rate threshold.
    pub threshold_peak_rate: f32,
    /// Adaptive threshold is `mu + k * sigma` over an EMA with this tau.
    pub adaptive_peak_rate_k: f32,
    pub adaptive_peak_rate_tau_ms: f32,

    /// Voiced flag latch after the most recent glottal epoch.
    pub voiced_hold_ms: f32,

    /// Threshold multipliers for state entry/exit.
    pub hysteresis_on_factor: f32,
    pub hysteresis_off_factor: f32,

    /// Prominence neighbors per side.
    pub context_size: usize,

    // Feature switches
    pub enable_peak_rate: bool,
    pub enable_spectral_flux: bool,
    pub enable_high_freq: bool,
    pub enable_mfcc: bool,
    pub enable_wavelet: bool,

    /// Framed-extractor sizing; the FFT length is rounded up to a power
    /// of two in samples.
    pub fft_size_ms: f32,
    pub hop_size_ms: f32,

    /// High-pass cutoff for the high-frequency energy chain.
    pub high_freq_cutoff_hz: f32,

    // Fusion weights, renormalized over the enabled features.
    pub weight_peak_rate: f32,
    pub weight_spectral_flux: f32,
    pub weight_high_freq: f32,
    pub weight_mfcc: f32,
    pub weight_wavelet: f32,

    /// Blend between per-sample max and weighted average.
    pub fusion_blend_alpha: f32,

    /// Normalized-feature threshold for unvoiced onset triggers.
    pub unvoiced_onset_threshold: f32,
    pub allow_unvoiced_onsets: bool,

    pub enable_agc: bool,

    /// Selects the fusion rule and the emission latency.
    pub realtime_mode: bool,
    pub calibration_duration_ms: f32,
    pub snr_threshold_db: f32,
}

impl DetectorConfig {
    /// Canonical defaults for a given sample rate.
    pub fn default_for(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            peak_rate_band_min_hz: 300.0,
            peak_rate_band_max_hz: 2000.0,
            min_syllable_dist_ms: 100.0,
            threshold_peak_rate: 2.5e-4,
            adaptive_peak_rate_k: 1.5,
            adaptive_peak_rate_tau_ms: 2000.0,
            voiced_hold_ms: 20.0,
            hysteresis_on_factor: 1.05,
            hysteresis_off_factor: 0.95,
            context_size: 2,
            enable_peak_rate: true,
            enable_spectral_flux: true,
            enable_high_freq: true,
            enable_mfcc: true,
            enable_wavelet: true,
            fft_size_ms: 32.0,
            hop_size_ms: 10.0,
            high_freq_cutoff_hz: 2000.0,
            weight_peak_rate: 0.3,
            weight_spectral_flux: 0.2,
            weight_high_freq: 0.15,
            weight_mfcc: 0.15,
            weight_wavelet: 0.2,
            fusion_blend_alpha: 0.6,
            unvoiced_onset_threshold: 0.5,
            allow_unvoiced_onsets: true,
            enable_agc: false,
            realtime_mode: false,
            calibration_duration_ms: 1000.0,
            snr_threshold_db: 6.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate > 0.0) || !self.sample_rate.is_finite() {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.peak_rate_band_min_hz <= 0.0
            || self.peak_rate_band_max_hz <= self.peak_rate_band_min_hz
        {
            return Err(ConfigError::InvalidBand(
                self.peak_rate_band_min_hz,
                self.peak_rate_band_max_hz,
            ));
        }
        if self.hop_size_ms <= 0.0 || self.hop_size_ms > self.fft_size_ms {
            return Err(ConfigError::HopExceedsWindow {
                hop_ms: self.hop_size_ms,
                fft_ms: self.fft_size_ms,
            });
        }
        if !(0.0..=1.0).contains(&self.fusion_blend_alpha) {
            return Err(ConfigError::InvalidBlendAlpha(self.fusion_blend_alpha));
        }
        if self.weight_peak_rate < 0.0
            || self.weight_spectral_flux < 0.0
            || self.weight_high_freq < 0.0
            || self.weight_mfcc < 0.0
            || self.weight_wavelet < 0.0
        {
            return Err(ConfigError::NegativeWeight);
        }
        if !(self.enable_peak_rate
            || self.enable_spectral_flux
            || self.enable_high_freq
            || self.enable_mfcc
            || self.enable_wavelet)
        {
            return Err(ConfigError::NoFeaturesEnabled);
        }
        if self.hysteresis_off_factor <= 0.0
            || self.hysteresis_off_factor > self.hysteresis_on_factor
        {
            return Err(ConfigError::InvalidHysteresis);
        }
        Ok(())
    }

    /// FFT length in samples, rounded up to a power of two.
    pub(crate) fn fft_size_samples(&self) -> usize {
        next_pow2((self.fft_size_ms * 0.001 * self.sample_rate).max(2.0) as usize)
    }

    pub(crate) fn hop_size_samples(&self) -> usize {
        ((self.hop_size_ms * 0.001 * self.sample_rate) as usize).max(1)
    }

    pub(crate) fn min_syllable_dist_samples(&self) -> u64 {
        (self.min_syllable_dist_ms * 0.001 * self.sample_rate).max(1.0) as u64
    }

    pub(crate) fn calibration_target_samples(&self) -> u64 {
        (self.calibration_duration_ms * 0.001 * self.sample_rate).max(1.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        for sr in [8000.0, 16000.0, 44100.0, 48000.0] {
            assert!(DetectorConfig::default_for(sr).validate().is_ok());
        }
    }

    #[test]
    fn test_fft_rounding() {
        let cfg = DetectorConfig::default_for(16000.0);
        // 32 ms at 16 kHz is 512, already a power of two.
        assert_eq!(cfg.fft_size_samples(), 512);

        let cfg = DetectorConfig::default_for(44100.0);
        // 32 ms at 44.1 kHz is 1411.2, rounds to 2048.
        assert_eq!(cfg.fft_size_samples(), 2048);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut cfg = DetectorConfig::default_for(16000.0);
        cfg.sample_rate = 0.0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSampleRate(0.0)));

        let mut cfg = DetectorConfig::default_for(16000.0);
        cfg.peak_rate_band_max_hz = cfg.peak_rate_band_min_hz;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBand(_, _))));

        let mut cfg = DetectorConfig::default_for(16000.0);
        cfg.hop_size_ms = 64.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::HopExceedsWindow { .. })
        ));

        let mut cfg = DetectorConfig::default_for(16000.0);
        cfg.fusion_blend_alpha = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidBlendAlpha(_))
        ));

        let mut cfg = DetectorConfig::default_for(16000.0);
        cfg.enable_peak_rate = false;
        cfg.enable_spectral_flux = false;
        cfg.enable_high_freq = false;
        cfg.enable_mfcc = false;
        cfg.enable_wavelet = false;
        assert_eq!(cfg.validate(), Err(ConfigError::NoFeaturesEnabled));
    }

    #[test]
    fn test_config_json_round_trip() {
        let cfg = DetectorConfig::default_for(16000.0);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DetectorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.sample_rate, back.sample_rate);
        assert_eq!(cfg.context_size, back.context_size);
    }
}
