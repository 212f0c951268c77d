//! The emitted syllable record.
//!
//! A flat, copyable value with no heap handles, safe to ship across FFI
//! or serialize for a feedback UI.

use serde::{Deserialize, Serialize};

/// Classification of the leading portion of a syllable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnsetType {
    #[default]
    Voiced,
    Unvoiced,
    Mixed,
}

/// One detected syllable.
///
/// Feature snapshots are taken at the moment of peak salience within the
/// syllable, not at the onset sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SyllableEvent {
    /// Onset position on the detector's monotonic sample clock.
    pub onset_samples: u64,
    /// Onset in seconds.
    pub onset_seconds: f64,

    // Peak-salience feature snapshots
    pub peak_rate: f32,
    pub spectral_flux: f32,
    pub high_freq_energy: f32,
    pub mfcc_delta: f32,
    pub wavelet_score: f32,
    pub fusion_score: f32,

    /// Smoothed pitch at the syllable, Hz; 0 when no pitch locked.
    pub f0: f32,
    /// Pitch excursion against the median f0 of the contextual neighbors.
    pub delta_f0: f32,
    /// Peak rate maximum over the rise time.
    pub rise_slope: f32,
    /// Onset to nucleus end, seconds.
    pub duration: f32,
    /// Energy integrated over the syllable.
    pub energy_integral: f32,

    pub onset_type: OnsetType,

    /// Context-relative prominence; 1.0 is the neutral baseline.
    pub prominence: f32,
    /// Whether the prominence cleared the accent threshold.
    pub accent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let ev = SyllableEvent {
            onset_samples: 12345,
            onset_seconds: 0.7715625,
            peak_rate: 0.02,
            spectral_flux: 1.5,
            high_freq_energy: 0.003,
            mfcc_delta: 4.2,
            wavelet_score: 0.8,
            fusion_score: 0.77,
            f0: 183.0,
            delta_f0: 12.0,
            rise_slope: 0.4,
            duration: 0.14,
            energy_integral: 0.9,
            onset_type: OnsetType::Mixed,
            prominence: 1.12,
            accent: true,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: SyllableEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
        assert!(json.contains("\"mixed\""));
    }
}
