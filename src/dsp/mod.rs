//! DSP primitives and feature extractors.
//!
//! Everything here is a per-detector value type: state lives in the
//! struct, never in process-wide globals, so independent detectors can run
//! on independent threads without interaction.
//!
//! ## Primitives
//! - [`biquad`] - second-order filters (band-pass, Butterworth HP/LP)
//! - [`envelope`] - asymmetric followers and the noise-floor tracker
//! - [`agc`] - optional input gain normalization
//! - [`zff`] - zero-frequency voicing front-end (epochs, pitch)
//!
//! ## Feature extractors
//! - [`peak_rate`] - band-passed envelope rise velocity (per sample)
//! - [`spectral_flux`] - framed flux and flatness (per hop)
//! - [`mel_cepstrum`] - MFCC delta timbre change (per hop)
//! - [`high_freq`] - high-band energy (per sample)
//! - [`wavelet`] - Morlet transient score (per sample)
//! - [`teager`] - Teager operator and local energy ratio (auxiliary)

pub mod agc;
pub mod biquad;
pub mod envelope;
pub mod high_freq;
pub mod mel_cepstrum;
pub mod peak_rate;
pub mod spectral_flux;
pub mod teager;
pub mod utils;
pub mod wavelet;
pub mod zff;

pub use agc::Agc;
pub use biquad::Biquad;
pub use envelope::{AsymFollower, NoiseFloorTracker};
pub use high_freq::HighFreqEnergy;
pub use mel_cepstrum::MelCepstrum;
pub use peak_rate::PeakRateExtractor;
pub use spectral_flux::{FluxFrame, SpectralAnalyzer, SpectralFlux};
pub use teager::{LocalEnergyRatio, TeagerOperator, TeagerOutput};
pub use wavelet::MorletBank;
pub use zff::{VoicingFrontEnd, VoicingState};
