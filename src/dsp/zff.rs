//! Voicing front-end: zero-frequency resonance, epochs, pitch.
//!
//! A zero-frequency resonator realized as two cascaded leaky integrators
//! with trailing-mean subtraction. Positive-going zero crossings of the
//! mean-removed output coincide with glottal closure instants (epochs);
//! epoch spacing yields the instantaneous pitch.
//!
//! # Design Notes
//! - A pure double integrator diverges. The 0.999 leak plus the running
//!   mean removal keeps the state bounded for arbitrarily long streams.
//! - Epochs are not trusted until the mean window has filled once.
//! - The f0 estimate is guarded against octave jumps: a value deviating
//!   more than 20% from the smoothed track is held out until three
//!   consecutive epochs agree on the new value.

use crate::dsp::utils::ema_alpha;

/// Integrator leak. See module notes on stability.
const ZFF_LEAK: f32 = 0.999;
/// Trailing mean window, about two pitch periods of a low male voice.
const MEAN_WINDOW_MS: f32 = 10.0;
/// Accepted instantaneous pitch range in Hz.
const F0_MIN_HZ: f32 = 50.0;
const F0_MAX_HZ: f32 = 600.0;
/// Per-epoch EMA blend for the smoothed pitch track.
const F0_EMA_BLEND: f32 = 0.25;
/// Outlier rejection band around the smoothed track.
const F0_OUTLIER_DEV: f32 = 0.2;
/// Consecutive agreeing outliers needed to accept a pitch jump.
const F0_JUMP_CONFIRM: usize = 3;
/// Slow f0 baseline time constant for the secondary accent signal.
const BASELINE_TAU_MS: f32 = 1000.0;
/// Voicing confidence smoothing.
const CONFIDENCE_TAU_MS: f32 = 50.0;

/// Per-sample voicing snapshot handed to the rest of the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoicingState {
    /// Voiced flag, latched for the configured hold window after an epoch.
    pub voiced: bool,
    /// Smoothed pitch in Hz, 0 until the tracker has locked.
    pub f0: f32,
    /// Smoothed 0..1 voicing confidence.
    pub confidence: f32,
    /// Smoothed f0 relative to the slow baseline, in semitones.
    pub semitones_above_baseline: f32,
    /// True on the exact sample of a glottal closure instant.
    pub epoch: bool,
}

pub struct VoicingFrontEnd {
    sample_rate: f32,

    // Resonator state
    acc1: f32,
    acc2: f32,

    // Trailing mean of the resonator output
    mean_buf: Vec<f32>,
    mean_pos: usize,
    mean_sum: f64,
    mean_filled: bool,
    prev_z: f32,

    // Epoch bookkeeping
    clock: u64,
    last_epoch: Option<u64>,
    voiced_hold_samples: u64,

    // Pitch track
    f0_smoothed: f32,
    pending: [f32; F0_JUMP_CONFIRM],
    pending_len: usize,

    // Secondary accent baseline
    f0_baseline: f32,
    baseline_alpha: f32,

    // Voicing confidence
    confidence: f32,
    confidence_alpha: f32,
}

impl VoicingFrontEnd {
    pub fn new(sample_rate: f32, voiced_hold_ms: f32) -> Self {
        let mean_len = ((MEAN_WINDOW_MS * 0.001 * sample_rate) as usize).max(2);
        Self {
            sample_rate,
            acc1: 0.0,
            acc2: 0.0,
            mean_buf: vec![0.0; mean_len],
            mean_pos: 0,
            mean_sum: 0.0,
            mean_filled: false,
            prev_z: 0.0,
            clock: 0,
            last_epoch: None,
            voiced_hold_samples: (voiced_hold_ms * 0.001 * sample_rate).max(1.0) as u64,
            f0_smoothed: 0.0,
            pending: [0.0; F0_JUMP_CONFIRM],
            pending_len: 0,
            f0_baseline: 0.0,
            baseline_alpha: ema_alpha(BASELINE_TAU_MS, sample_rate),
            confidence: 0.0,
            confidence_alpha: ema_alpha(CONFIDENCE_TAU_MS, sample_rate),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> VoicingState {
        // Leaky double integration
        self.acc1 = ZFF_LEAK * self.acc1 + x;
        self.acc2 = ZFF_LEAK * self.acc2 + self.acc1;

        // Trailing mean removal
        let oldest = self.mean_buf[self.mean_pos];
        self.mean_sum += (self.acc2 - oldest) as f64;
        self.mean_buf[self.mean_pos] = self.acc2;
        self.mean_pos += 1;
        if self.mean_pos == self.mean_buf.len() {
            self.mean_pos = 0;
            self.mean_filled = true;
            // Re-sum on wrap so f64 rounding cannot accumulate over hours.
            self.mean_sum = self.mean_buf.iter().map(|&v| v as f64).sum();
        }

        let z = if self.mean_filled {
            self.acc2 - (self.mean_sum / self.mean_buf.len() as f64) as f32
        } else {
            0.0
        };

        // Positive-going zero crossing marks an epoch
        let epoch = self.mean_filled && self.prev_z <= 0.0 && z > 0.0;
        self.prev_z = z;

        if epoch {
            if let Some(last) = self.last_epoch {
                let period = (self.clock - last) as f32;
                if period > 0.0 {
                    let f0_inst = self.sample_rate / period;
                    if (F0_MIN_HZ..=F0_MAX_HZ).contains(&f0_inst) {
                        self.track_pitch(f0_inst);
                    }
                }
            }
            self.last_epoch = Some(self.clock);
        }

        let voiced = match self.last_epoch {
            Some(last) => self.clock - last <= self.voiced_hold_samples,
            None => false,
        };

        self.confidence += self.confidence_alpha * ((voiced as u8 as f32) - self.confidence);

        if voiced && self.f0_smoothed > 0.0 {
            if self.f0_baseline <= 0.0 {
                self.f0_baseline = self.f0_smoothed;
            } else {
                self.f0_baseline += self.baseline_alpha * (self.f0_smoothed - self.f0_baseline);
            }
        }

        let semitones = if self.f0_smoothed > 0.0 && self.f0_baseline > 0.0 {
            12.0 * (self.f0_smoothed / self.f0_baseline).log2()
        } else {
            0.0
        };

        self.clock += 1;

        VoicingState {
            voiced,
            f0: self.f0_smoothed,
            confidence: self.confidence,
            semitones_above_baseline: semitones,
            epoch,
        }
    }

    /// Feed one accepted instantaneous pitch value into the smoothed track.
    fn track_pitch(&mut self, f0_inst: f32) {
        if self.f0_smoothed <= 0.0 {
            self.f0_smoothed = f0_inst;
            self.pending_len = 0;
            return;
        }

        let dev = (f0_inst - self.f0_smoothed).abs() / self.f0_smoothed;
        if dev <= F0_OUTLIER_DEV {
            self.f0_smoothed += F0_EMA_BLEND * (f0_inst - self.f0_smoothed);
            self.pending_len = 0;
            return;
        }

        // Outlier. It only replaces the track once three consecutive
        // epochs agree with each other.
        if self.pending_len > 0 {
            let anchor = self.pending[self.pending_len - 1];
            if (f0_inst - anchor).abs() / anchor > F0_OUTLIER_DEV {
                self.pending[0] = f0_inst;
                self.pending_len = 1;
                return;
            }
        }
        self.pending[self.pending_len] = f0_inst;
        self.pending_len += 1;

        if self.pending_len == F0_JUMP_CONFIRM {
            let mean: f32 = self.pending.iter().sum::<f32>() / F0_JUMP_CONFIRM as f32;
            self.f0_smoothed = mean;
            self.pending_len = 0;
        }
    }

    pub fn reset(&mut self) {
        self.acc1 = 0.0;
        self.acc2 = 0.0;
        self.mean_buf.fill(0.0);
        self.mean_pos = 0;
        self.mean_sum = 0.0;
        self.mean_filled = false;
        self.prev_z = 0.0;
        self.clock = 0;
        self.last_epoch = None;
        self.f0_smoothed = 0.0;
        self.pending_len = 0;
        self.f0_baseline = 0.0;
        self.confidence = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn run_tone(fe: &mut VoicingFrontEnd, freq: f32, sr: f32, seconds: f32) -> VoicingState {
        let n = (sr * seconds) as usize;
        let mut last = VoicingState::default();
        for i in 0..n {
            let x = 0.5 * (2.0 * PI * freq * i as f32 / sr).sin();
            last = fe.process(x);
        }
        last
    }

    #[test]
    fn test_tone_locks_pitch_and_voicing() {
        let sr = 16000.0;
        let mut fe = VoicingFrontEnd::new(sr, 20.0);
        let state = run_tone(&mut fe, 200.0, sr, 0.5);

        assert!(state.voiced);
        assert!(state.confidence > 0.8);
        assert!(
            (state.f0 - 200.0).abs() < 20.0,
            "f0 off: {} Hz",
            state.f0
        );
    }

    #[test]
    fn test_out_of_range_pitch_rejected() {
        let sr = 16000.0;
        let mut fe = VoicingFrontEnd::new(sr, 20.0);
        // 1 kHz is outside the accepted [50, 600] Hz band.
        let state = run_tone(&mut fe, 1000.0, sr, 0.5);
        assert_eq!(state.f0, 0.0);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let sr = 16000.0;
        let mut fe = VoicingFrontEnd::new(sr, 20.0);
        let mut last = VoicingState::default();
        for _ in 0..8000 {
            last = fe.process(0.0);
        }
        assert!(!last.voiced);
        assert!(last.confidence < 0.05);
    }

    #[test]
    fn test_octave_jump_needs_confirmation() {
        let sr = 16000.0;
        let mut fe = VoicingFrontEnd::new(sr, 20.0);
        run_tone(&mut fe, 120.0, sr, 0.5);
        let locked = fe.f0_smoothed;
        assert!((locked - 120.0).abs() < 15.0);

        // A brief excursion (few epochs) must not capture the track...
        run_tone(&mut fe, 240.0, sr, 0.01);
        assert!((fe.f0_smoothed - locked).abs() / locked < F0_OUTLIER_DEV);

        // ...but a sustained jump must.
        run_tone(&mut fe, 240.0, sr, 0.5);
        assert!(
            (fe.f0_smoothed - 240.0).abs() < 30.0,
            "track did not follow: {}",
            fe.f0_smoothed
        );
    }
}
