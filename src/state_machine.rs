//! Four-phase syllable state machine.
//!
//! IDLE -> ONSET_RISING -> NUCLEUS -> COOLDOWN, driven once per sample
//! with the current feature values, voicing state, and fusion score. At
//! most one syllable is under construction at a time; it exists exactly
//! while the phase is ONSET_RISING or NUCLEUS.
//!
//! Entry from IDLE takes one of three triggers (voiced peak-rate, fusion,
//! unvoiced spectral) and must additionally clear the f0-rise gate and, in
//! realtime mode, the calibrated energy gate. Exits are governed by
//! hysteresis factors and hard phase timers.

use log::debug;

use crate::event::OnsetType;
use crate::fusion::N_FEATURES;

/// Fusion entry/exit thresholds before hysteresis scaling.
const FUSION_ON_BASE: f32 = 0.6;
const FUSION_OFF_BASE: f32 = 0.4;
/// Rise phase cap in ms.
const MAX_RISE_MS: f32 = 50.0;
/// Nucleus phase cap in ms.
const MAX_NUCLEUS_MS: f32 = 100.0;
/// Nucleus exit when energy falls below this fraction of the peak.
const NUCLEUS_ENERGY_EXIT_OFFLINE: f32 = 0.10;
const NUCLEUS_ENERGY_EXIT_REALTIME: f32 = 0.20;
/// Rising exit when peak rate falls below this fraction of its maximum.
const RISE_PEAK_RATE_EXIT: f32 = 0.5;
/// Rising exit when fusion falls below this fraction of its maximum.
const RISE_FUSION_EXIT: f32 = 0.6;
/// Smoothed f0 must exceed its tracked minimum by this factor for the
/// rise gate to open on its own.
const F0_RISE_FACTOR: f32 = 1.05;
/// Onset type is MIXED when the normalized high-frequency energy of a
/// voiced onset exceeds this.
const MIXED_HF_NORM: f32 = 0.5;

// f0-rise gate bypasses. Any one of these opens the gate by itself.
/// A fusion score this high is already multi-feature evidence.
const BYPASS_FUSION: f32 = 0.85;
/// Teager z-score marking a clear nonlinear-energy attack.
const BYPASS_TEAGER_SIGMA: f32 = 3.0;
/// Local energy ratio marking a clear short-term energy step.
const BYPASS_LER: f32 = 2.0;
/// Flatness Weber drop marking a noise-to-harmonic transition.
const BYPASS_FLATNESS_DROP: f32 = -0.3;
/// Elapsed-time bypass: this many minimum syllable distances without an
/// event opens the gate unconditionally.
const BYPASS_ELAPSED_DISTANCES: u64 = 2;

/// Realtime energy gate: multiple of the calibrated energy threshold.
const ENERGY_GATE_FACTOR: f32 = 3.0;
/// Absolute energy floor for the realtime gate (about -60 dBFS power).
const ENERGY_GATE_ABS_FLOOR: f32 = 1e-6;

const EPS: f32 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyllablePhase {
    Idle,
    OnsetRising,
    Nucleus,
    Cooldown,
}

/// Everything the state machine reads for one sample.
#[derive(Debug, Clone, Copy)]
pub struct StepInput {
    /// Detector sample clock (position of this sample).
    pub clock: u64,
    /// Raw feature values in `fusion` channel order.
    pub raw: [f32; N_FEATURES],
    /// Adaptive peak-rate threshold before hysteresis.
    pub peak_rate_threshold: f32,
    pub fusion: f32,
    /// Normalized spectral flux and high-frequency energy.
    pub sf_norm: f32,
    pub hf_norm: f32,
    pub voiced: bool,
    /// Smoothed pitch, 0 when unlocked.
    pub f0: f32,
    pub semitones_above_baseline: f32,
    /// Instantaneous envelope energy.
    pub energy: f32,
    pub teager_z: f32,
    pub ler: f32,
    pub flatness_weber: f32,
    /// Calibrated energy threshold; None outside realtime mode.
    pub energy_threshold: Option<f32>,
}

/// A completed syllable, ready for the context buffer.
#[derive(Debug, Clone, Copy)]
pub struct FinalizedSyllable {
    pub onset_clock: u64,
    pub onset_type: OnsetType,
    /// Per-feature running maxima over the rise.
    pub feature_max: [f32; N_FEATURES],
    pub fusion_max: f32,
    pub f0: f32,
    pub semitones_above_baseline: f32,
    pub rise_slope: f32,
    /// Seconds from onset to nucleus end.
    pub duration: f32,
    /// Energy integrated over the syllable, in energy-seconds.
    pub energy_integral: f32,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    onset_clock: u64,
    onset_type: OnsetType,
    f0_at_onset: f32,
    feature_max: [f32; N_FEATURES],
    fusion_max: f32,
    peak_energy: f32,
    energy_accum: f32,
    semitones_max: f32,
    rise_slope: f32,
}

pub struct SyllableTracker {
    sample_rate: f32,
    phase: SyllablePhase,
    phase_timer: u64,
    in_flight: Option<InFlight>,

    // Thresholding
    peak_rate_floor: f32,
    adaptive_k: f32,
    hysteresis_on: f32,
    hysteresis_off: f32,
    unvoiced_threshold: f32,
    allow_unvoiced: bool,
    realtime: bool,

    // Timers in samples
    min_dist_samples: u64,
    max_rise_samples: u64,
    max_nucleus_samples: u64,

    // f0-rise gate state
    min_f0_since_peak: f32,
    f0_has_risen: bool,

    last_event_clock: Option<u64>,
}

impl SyllableTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample_rate: f32,
        peak_rate_floor: f32,
        adaptive_k: f32,
        hysteresis_on: f32,
        hysteresis_off: f32,
        unvoiced_threshold: f32,
        allow_unvoiced: bool,
        min_dist_samples: u64,
        realtime: bool,
    ) -> Self {
        Self {
            sample_rate,
            phase: SyllablePhase::Idle,
            phase_timer: 0,
            in_flight: None,
            peak_rate_floor,
            adaptive_k,
            hysteresis_on,
            hysteresis_off,
            unvoiced_threshold,
            allow_unvoiced,
            realtime,
            min_dist_samples,
            max_rise_samples: (MAX_RISE_MS * 0.001 * sample_rate).max(1.0) as u64,
            max_nucleus_samples: (MAX_NUCLEUS_MS * 0.001 * sample_rate).max(1.0) as u64,
            min_f0_since_peak: 0.0,
            f0_has_risen: false,
            last_event_clock: None,
        }
    }

    #[inline]
    #[allow(dead_code)]
    pub fn phase(&self) -> SyllablePhase {
        self.phase
    }

    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    /// Adaptive peak-rate threshold from the running statistics, floored.
    #[inline]
    pub fn peak_rate_theta(&self, mean: f32, sigma: f32) -> f32 {
        (mean + self.adaptive_k * sigma).max(self.peak_rate_floor)
    }

    /// Advance one sample. Returns a finalized syllable when the nucleus
    /// ends on this sample.
    pub fn step(&mut self, inp: &StepInput) -> Option<FinalizedSyllable> {
        self.update_f0_gate(inp);

        match self.phase {
            SyllablePhase::Idle => {
                self.try_enter(inp);
                None
            }
            SyllablePhase::OnsetRising => {
                self.advance_rising(inp);
                None
            }
            SyllablePhase::Nucleus => self.advance_nucleus(inp),
            SyllablePhase::Cooldown => {
                self.phase_timer += 1;
                if self.phase_timer > self.min_dist_samples {
                    self.phase = SyllablePhase::Idle;
                    self.phase_timer = 0;
                }
                None
            }
        }
    }

    fn update_f0_gate(&mut self, inp: &StepInput) {
        if inp.voiced && inp.f0 > 0.0 {
            if self.min_f0_since_peak <= 0.0 || inp.f0 < self.min_f0_since_peak {
                self.min_f0_since_peak = inp.f0;
            }
            if self.min_f0_since_peak > 0.0 && inp.f0 > F0_RISE_FACTOR * self.min_f0_since_peak {
                self.f0_has_risen = true;
            }
        }
    }

    fn f0_gate_open(&self, inp: &StepInput) -> bool {
        // Realtime mode detects immediately.
        if self.realtime {
            return true;
        }
        // Unvoiced intervals pass unconditionally.
        if !inp.voiced {
            return true;
        }
        if self.f0_has_risen {
            return true;
        }
        if inp.fusion > BYPASS_FUSION {
            return true;
        }
        if inp.teager_z > BYPASS_TEAGER_SIGMA {
            return true;
        }
        if inp.ler > BYPASS_LER {
            return true;
        }
        if inp.flatness_weber < BYPASS_FLATNESS_DROP {
            return true;
        }
        let elapsed = match self.last_event_clock {
            Some(last) => inp.clock.saturating_sub(last),
            None => inp.clock,
        };
        elapsed > BYPASS_ELAPSED_DISTANCES * self.min_dist_samples
    }

    fn energy_gate_open(&self, inp: &StepInput) -> bool {
        match inp.energy_threshold {
            Some(theta) => {
                inp.energy > ENERGY_GATE_FACTOR * theta && inp.energy > ENERGY_GATE_ABS_FLOOR
            }
            None => true,
        }
    }

    fn try_enter(&mut self, inp: &StepInput) {
        let peak_rate = inp.raw[0];
        let theta_on = inp.peak_rate_threshold * self.hysteresis_on;
        let fusion_on = FUSION_ON_BASE * self.hysteresis_on;

        let voiced_trigger = peak_rate > theta_on && inp.voiced;
        let fusion_trigger = inp.fusion > fusion_on && (self.allow_unvoiced || inp.voiced);
        let unvoiced_trigger = self.allow_unvoiced
            && !inp.voiced
            && (inp.sf_norm > self.unvoiced_threshold || inp.hf_norm > self.unvoiced_threshold);

        if !(voiced_trigger || fusion_trigger || unvoiced_trigger) {
            return;
        }
        if !self.f0_gate_open(inp) || !self.energy_gate_open(inp) {
            return;
        }

        let onset_type = if inp.voiced {
            if inp.hf_norm > MIXED_HF_NORM {
                OnsetType::Mixed
            } else {
                OnsetType::Voiced
            }
        } else {
            OnsetType::Unvoiced
        };

        self.in_flight = Some(InFlight {
            onset_clock: inp.clock,
            onset_type,
            f0_at_onset: inp.f0,
            feature_max: inp.raw,
            fusion_max: inp.fusion,
            peak_energy: inp.energy,
            energy_accum: inp.energy,
            semitones_max: inp.semitones_above_baseline,
            rise_slope: 0.0,
        });
        self.phase = SyllablePhase::OnsetRising;
        self.phase_timer = 0;
        self.min_f0_since_peak = inp.f0;
        self.f0_has_risen = false;

        debug!(
            "onset at sample {} ({:?}, pr {:.3e}, fusion {:.2})",
            inp.clock, onset_type, peak_rate, inp.fusion
        );
    }

    fn advance_rising(&mut self, inp: &StepInput) {
        self.phase_timer += 1;
        let Some(ev) = self.in_flight.as_mut() else {
            return;
        };

        for k in 0..N_FEATURES {
            if inp.raw[k].is_finite() && inp.raw[k] > ev.feature_max[k] {
                ev.feature_max[k] = inp.raw[k];
            }
        }
        ev.fusion_max = ev.fusion_max.max(inp.fusion);
        ev.peak_energy = ev.peak_energy.max(inp.energy);
        ev.energy_accum += inp.energy;
        ev.semitones_max = ev.semitones_max.max(inp.semitones_above_baseline);

        let peak_rate = inp.raw[0];
        let peak_rate_done = peak_rate < RISE_PEAK_RATE_EXIT * ev.feature_max[0];
        let fusion_done = inp.fusion < RISE_FUSION_EXIT * ev.fusion_max;
        let timed_out = self.phase_timer > self.max_rise_samples;
        let voicing_lost = !inp.voiced && ev.onset_type == OnsetType::Voiced;

        if peak_rate_done || fusion_done || timed_out || voicing_lost {
            let rise_s = self.phase_timer as f32 / self.sample_rate;
            ev.rise_slope = ev.feature_max[0] / (rise_s + EPS);
            self.phase = SyllablePhase::Nucleus;
            self.phase_timer = 0;
        }
    }

    fn advance_nucleus(&mut self, inp: &StepInput) -> Option<FinalizedSyllable> {
        self.phase_timer += 1;
        let ev = self.in_flight.as_mut()?;

        ev.peak_energy = ev.peak_energy.max(inp.energy);
        ev.energy_accum += inp.energy;
        ev.semitones_max = ev.semitones_max.max(inp.semitones_above_baseline);

        let exit_frac = if self.realtime {
            NUCLEUS_ENERGY_EXIT_REALTIME
        } else {
            NUCLEUS_ENERGY_EXIT_OFFLINE
        };
        let fusion_off = FUSION_OFF_BASE * self.hysteresis_off;

        let energy_done = inp.energy < exit_frac * ev.peak_energy;
        let voicing_lost = !inp.voiced && ev.onset_type == OnsetType::Voiced;
        let fusion_done = inp.fusion < fusion_off;
        let timed_out = self.phase_timer > self.max_nucleus_samples;

        if energy_done || voicing_lost || fusion_done || timed_out {
            self.finalize(inp.clock, inp.f0)
        } else {
            None
        }
    }

    fn finalize(&mut self, clock: u64, current_f0: f32) -> Option<FinalizedSyllable> {
        let ev = self.in_flight.take()?;

        let duration_samples = clock.saturating_sub(ev.onset_clock).max(1);
        let duration = duration_samples as f32 / self.sample_rate;
        let f0 = if current_f0 > 0.0 {
            current_f0
        } else {
            ev.f0_at_onset
        };

        self.phase = SyllablePhase::Cooldown;
        self.phase_timer = 0;
        self.last_event_clock = Some(clock);

        debug!(
            "syllable finalized: onset {} dur {:.0} ms type {:?}",
            ev.onset_clock,
            duration * 1000.0,
            ev.onset_type
        );

        Some(FinalizedSyllable {
            onset_clock: ev.onset_clock,
            onset_type: ev.onset_type,
            feature_max: ev.feature_max,
            fusion_max: ev.fusion_max,
            f0,
            semitones_above_baseline: ev.semitones_max,
            rise_slope: ev.rise_slope,
            duration,
            energy_integral: ev.energy_accum / self.sample_rate,
        })
    }

    /// Force-finalize an in-flight syllable (stream end).
    pub fn flush_in_flight(&mut self, clock: u64) -> Option<FinalizedSyllable> {
        if self.phase == SyllablePhase::OnsetRising {
            if let Some(ev) = self.in_flight.as_mut() {
                // Rise never completed; derive the slope from what we have.
                let rise_s = self.phase_timer as f32 / self.sample_rate;
                ev.rise_slope = ev.feature_max[0] / (rise_s + EPS);
            }
        }
        self.finalize(clock, 0.0)
    }

    pub fn reset(&mut self) {
        self.phase = SyllablePhase::Idle;
        self.phase_timer = 0;
        self.in_flight = None;
        self.min_f0_since_peak = 0.0;
        self.f0_has_risen = false;
        self.last_event_clock = None;
    }
}
