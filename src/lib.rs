//! vxprosody: causal syllable onset and prominence detection.
//!
//! A sample-rate streaming detector for mono speech. For every detected
//! syllable it emits a flat [`SyllableEvent`] carrying the onset time,
//! acoustic feature snapshots, a fusion score, a voiced/unvoiced/mixed
//! onset label, a context-relative prominence score, and an accent flag.
//! The output is meant to drive pronunciation-feedback interfaces and
//! real-time sonification.
//!
//! ```no_run
//! # fn main() -> Result<(), vxprosody::ConfigError> {
//! use vxprosody::{DetectorConfig, SyllableDetector, SyllableEvent};
//!
//! let config = DetectorConfig::default_for(16000.0);
//! let mut detector = SyllableDetector::new(config)?;
//!
//! let mut events = [SyllableEvent::default(); 32];
//! let samples = vec![0.0f32; 16000];
//! let n = detector.process(&samples, &mut events);
//! for event in &events[..n] {
//!     println!("{:.3}s {:?} prominence {:.2}", event.onset_seconds, event.onset_type, event.prominence);
//! }
//! let flushed = detector.flush(&mut events);
//! # let _ = flushed;
//! # Ok(())
//! # }
//! ```
//!
//! The detector is single-threaded and exclusively owned: it holds every
//! piece of mutable state itself, never blocks, and never allocates after
//! construction. Run independent detectors on independent threads freely.

mod calibration;
mod config;
mod detector;
pub mod dsp;
mod event;
mod fusion;
mod prominence;
mod state_machine;
mod stats;

pub use config::{ConfigError, DetectorConfig};
pub use detector::SyllableDetector;
pub use event::{OnsetType, SyllableEvent};
pub use stats::NormalizationMode;
