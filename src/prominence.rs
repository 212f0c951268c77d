//! Context buffer and prominence scoring.
//!
//! Finalized syllables enter a fixed 16-slot ring in FIFO order and leave
//! once enough trailing context has accumulated (immediately in realtime
//! mode, unconditionally at flush). Emitted events stay in their slot
//! until overwritten, so they keep serving as left context for later
//! neighbors.
//!
//! Prominence is a composite of ratio scores against the mean of up to
//! N neighbors per side, a stress integral, and two pitch bonuses; 1.0 is
//! the neutral baseline an isolated or context-average syllable lands on.

use log::warn;

use crate::event::SyllableEvent;
use crate::state_machine::FinalizedSyllable;

/// Ring capacity; power of two so sequence numbers mask to slots.
const RING_SIZE: usize = 16;
const RING_MASK: u64 = (RING_SIZE - 1) as u64;

/// Accent threshold on the streaming path.
const ACCENT_STREAMING: f32 = 0.9;
/// Accent threshold at flush.
const ACCENT_FLUSH: f32 = 1.2;

/// Stress integral ratio clamp.
const STRESS_CLAMP: f32 = 3.0;
/// Pitch excursion that earns the full f0 bonus, Hz.
const DELTA_F0_FULL_HZ: f32 = 50.0;
/// Semitones above baseline that earn the full level bonus.
const F0_LEVEL_FULL_SEMITONES: f32 = 6.0;
const F0_LEVEL_MAX_BONUS: f32 = 0.15;

// Composite weights; they sum to 1 so all-neutral scores land on 1.0.
const W_ENERGY: f32 = 0.10;
const W_PEAK_RATE: f32 = 0.10;
const W_DURATION: f32 = 0.18;
const W_SLOPE: f32 = 0.08;
const W_FUSION: f32 = 0.18;
const W_STRESS: f32 = 0.13;
const W_F0: f32 = 0.10;
const W_F0_LEVEL: f32 = 0.13;

const EPS: f32 = 1e-9;

pub struct EventRing {
    sample_rate: f64,
    context_size: usize,
    slots: [FinalizedSyllable; RING_SIZE],
    /// A slot is ready once it has held a finalized syllable.
    ready: [bool; RING_SIZE],
    /// Total syllables accepted; slot = seq & mask.
    write: u64,
    /// Sequence number of the next syllable to emit.
    emit: u64,
    dropped: u64,
}

impl EventRing {
    pub fn new(sample_rate: f32, context_size: usize) -> Self {
        let empty = FinalizedSyllable {
            onset_clock: 0,
            onset_type: Default::default(),
            feature_max: [0.0; crate::fusion::N_FEATURES],
            fusion_max: 0.0,
            f0: 0.0,
            semitones_above_baseline: 0.0,
            rise_slope: 0.0,
            duration: 0.0,
            energy_integral: 0.0,
        };
        Self {
            sample_rate: sample_rate as f64,
            // The ring cannot hold more context than half its slots per side.
            context_size: context_size.min(RING_SIZE / 2),
            slots: [empty; RING_SIZE],
            ready: [false; RING_SIZE],
            write: 0,
            emit: 0,
            dropped: 0,
        }
    }

    /// Accept a finalized syllable. A full ring silently drops its oldest
    /// pending entry and counts it.
    pub fn push(&mut self, syllable: FinalizedSyllable) {
        if self.write - self.emit == RING_SIZE as u64 {
            self.emit += 1;
            self.dropped += 1;
            warn!("event ring full, dropped pending syllable {}", self.emit - 1);
        }
        self.slots[(self.write & RING_MASK) as usize] = syllable;
        self.ready[(self.write & RING_MASK) as usize] = true;
        self.write += 1;
    }

    #[inline]
    pub fn pending(&self) -> usize {
        (self.write - self.emit) as usize
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Emit the oldest pending syllable if it has the required trailing
    /// context. `required_context` is 0 in realtime mode; `flush` emits
    /// unconditionally and switches to the flush accent threshold.
    pub fn pop(&mut self, required_context: usize, flush: bool) -> Option<SyllableEvent> {
        if self.write == self.emit {
            return None;
        }
        if !flush && self.pending() <= required_context {
            return None;
        }

        let seq = self.emit;
        self.emit += 1;
        let accent_threshold = if flush { ACCENT_FLUSH } else { ACCENT_STREAMING };
        Some(self.score(seq, accent_threshold))
    }

    /// Sequence numbers still resident in the ring (emitted or pending).
    #[inline]
    fn resident(&self, seq: u64) -> bool {
        seq < self.write
            && self.write - seq <= RING_SIZE as u64
            && self.ready[(seq & RING_MASK) as usize]
    }

    fn score(&self, seq: u64, accent_threshold: f32) -> SyllableEvent {
        let target = &self.slots[(seq & RING_MASK) as usize];

        // Gather the up-to-2N resident neighbors.
        let mut sum_energy = 0.0f32;
        let mut sum_peak = 0.0f32;
        let mut sum_dur = 0.0f32;
        let mut sum_slope = 0.0f32;
        let mut sum_fusion = 0.0f32;
        let mut sum_stress = 0.0f32;
        let mut f0s = [0.0f32; RING_SIZE];
        let mut n_f0 = 0usize;
        let mut count = 0u32;

        let n = self.context_size as u64;
        let lo = seq.saturating_sub(n);
        let hi = seq + n;
        for j in lo..=hi {
            if j == seq || !self.resident(j) {
                continue;
            }
            let ev = &self.slots[(j & RING_MASK) as usize];
            sum_energy += ev.energy_integral;
            sum_peak += ev.feature_max[0];
            sum_dur += ev.duration;
            sum_slope += ev.rise_slope;
            sum_fusion += ev.fusion_max;
            sum_stress += ev.fusion_max * ev.duration;
            if ev.f0 > 0.0 {
                f0s[n_f0] = ev.f0;
                n_f0 += 1;
            }
            count += 1;
        }

        let (s_energy, s_peak, s_dur, s_slope, s_fusion, stress_ratio, delta_f0) = if count == 0 {
            // No context: every ratio is neutral.
            (1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0)
        } else {
            let inv = 1.0 / count as f32;
            let ratio = |target_v: f32, sum: f32| target_v / (sum * inv + EPS);
            let stress_target = target.fusion_max * target.duration;
            let stress = (stress_target / (sum_stress * inv + EPS)).clamp(0.0, STRESS_CLAMP);

            let delta = if n_f0 > 0 && target.f0 > 0.0 {
                target.f0 - median(&mut f0s[..n_f0])
            } else {
                0.0
            };

            (
                ratio(target.energy_integral, sum_energy),
                ratio(target.feature_max[0], sum_peak),
                ratio(target.duration, sum_dur),
                ratio(target.rise_slope, sum_slope),
                ratio(target.fusion_max, sum_fusion),
                stress,
                delta,
            )
        };

        // Upper-bounded only; a falling pitch subtracts in proportion.
        let f0_bonus = (delta_f0 / DELTA_F0_FULL_HZ).min(1.0);
        let f0_level_bonus = F0_LEVEL_MAX_BONUS
            * (target.semitones_above_baseline / F0_LEVEL_FULL_SEMITONES).clamp(0.0, 1.0);

        let prominence = W_ENERGY * s_energy
            + W_PEAK_RATE * s_peak
            + W_DURATION * s_dur
            + W_SLOPE * s_slope
            + W_FUSION * s_fusion
            + W_STRESS * stress_ratio
            + W_F0 * (1.0 + f0_bonus)
            + W_F0_LEVEL * (1.0 + f0_level_bonus);

        SyllableEvent {
            onset_samples: target.onset_clock,
            onset_seconds: target.onset_clock as f64 / self.sample_rate,
            peak_rate: target.feature_max[0],
            spectral_flux: target.feature_max[1],
            high_freq_energy: target.feature_max[2],
            mfcc_delta: target.feature_max[3],
            wavelet_score: target.feature_max[4],
            fusion_score: target.fusion_max,
            f0: target.f0,
            delta_f0,
            rise_slope: target.rise_slope,
            duration: target.duration,
            energy_integral: target.energy_integral,
            onset_type: target.onset_type,
            prominence,
            accent: prominence > accent_threshold,
        }
    }

    pub fn reset(&mut self) {
        self.ready = [false; RING_SIZE];
        self.write = 0;
        self.emit = 0;
        self.dropped = 0;
    }
}

/// Median of a small mutable slice.
fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
