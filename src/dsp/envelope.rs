//! Envelope followers for the feature chains.
//!
//! Two trackers live here:
//! - [`AsymFollower`], a one-pole follower with independent attack and
//!   release time constants. The peak-rate and high-frequency chains both
//!   run one, with different constants.
//! - [`NoiseFloorTracker`], an asymmetric floor estimate that rises slowly
//!   on signal and falls quickly in silence, used by the offline fusion
//!   gate.

use crate::dsp::utils::time_constant_coeff;

/// One-pole envelope follower with asymmetric attack/release.
#[derive(Debug, Clone, Copy)]
pub struct AsymFollower {
    attack_coeff: f32,
    release_coeff: f32,
    state: f32,
}

impl AsymFollower {
    pub fn new(attack_ms: f32, release_ms: f32, sample_rate: f32) -> Self {
        Self {
            attack_coeff: time_constant_coeff(attack_ms, sample_rate),
            release_coeff: time_constant_coeff(release_ms, sample_rate),
            state: 0.0,
        }
    }

    /// Track a non-negative input (callers rectify or square first).
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let coeff = if x > self.state {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.state = coeff * self.state + (1.0 - coeff) * x;
        self.state
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// Noise floor attack (5 s): rise slowly so speech never drags it up.
const FLOOR_RISE_MS: f32 = 5000.0;
/// Noise floor release (100 ms): fall quickly to catch true silence.
const FLOOR_FALL_MS: f32 = 100.0;

/// Asymmetric noise floor estimate in the energy domain.
#[derive(Debug, Clone, Copy)]
pub struct NoiseFloorTracker {
    rise_coeff: f32,
    fall_coeff: f32,
    state: f32,
}

impl NoiseFloorTracker {
    const INITIAL_FLOOR: f32 = 1e-8;

    pub fn new(sample_rate: f32) -> Self {
        Self {
            rise_coeff: time_constant_coeff(FLOOR_RISE_MS, sample_rate),
            fall_coeff: time_constant_coeff(FLOOR_FALL_MS, sample_rate),
            state: Self::INITIAL_FLOOR,
        }
    }

    /// Update with an instantaneous energy value and return the floor.
    #[inline]
    pub fn process(&mut self, energy: f32) -> f32 {
        let coeff = if energy < self.state {
            self.fall_coeff
        } else {
            self.rise_coeff
        };
        self.state = coeff * self.state + (1.0 - coeff) * energy;
        // Bounded so hours of input cannot drift the estimate into a gate
        // that never opens.
        self.state = self.state.clamp(1e-12, 0.01);
        self.state
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = Self::INITIAL_FLOOR;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follower_attack_faster_than_release() {
        let sr = 16000.0;
        let mut env = AsymFollower::new(1.0, 50.0, sr);

        // Step up: should reach most of the target within a few ms.
        for _ in 0..64 {
            env.process(1.0);
        }
        let after_attack = env.value();
        assert!(after_attack > 0.9, "attack too slow: {after_attack}");

        // Step down: 4 ms later it should still hold most of the level.
        for _ in 0..64 {
            env.process(0.0);
        }
        assert!(env.value() > 0.8, "release too fast: {}", env.value());
    }

    #[test]
    fn test_noise_floor_ignores_bursts() {
        let sr = 16000.0;
        let mut floor = NoiseFloorTracker::new(sr);

        // A loud 50 ms burst: the 5 s rise keeps the floor far below the
        // burst energy.
        for _ in 0..800 {
            floor.process(0.25);
        }
        assert!(floor.value() < 0.01, "floor chased the burst: {}", floor.value());

        // A second of silence pulls it back to the quiet bed.
        for _ in 0..16000 {
            floor.process(1e-8);
        }
        assert!(floor.value() < 1e-6, "floor stuck high: {}", floor.value());
    }
}
