//! Locomotion phase clock.
//!
//! The network is evaluated at a phase in `[0, 2π)`. Each tick the phase
//! advances by the network's predicted rate, damped while the character
//! stands still but never below a floor, so idle breathing keeps cycling.

use std::f64::consts::TAU;

use crate::math::repeat;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseClock {
    phase: f64,
    /// Fraction of the predicted rate still applied at full idle.
    idle_rate: f64,
}

impl PhaseClock {
    pub fn new(idle_rate: f64) -> Self {
        Self {
            phase: 0.0,
            idle_rate: idle_rate.clamp(0.0, 1.0),
        }
    }

    /// Current phase in radians, in `[0, 2π)`.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn set_phase(&mut self, phase: f64) {
        self.phase = repeat(phase, TAU);
    }

    /// Advance by `delta` radians; negative deltas wrap backwards.
    pub fn advance(&mut self, delta: f64) -> f64 {
        self.phase = repeat(self.phase + delta, TAU);
        self.phase
    }

    /// Advance by the network's phase rate (cycles per tick), scaled by the
    /// `rest` factor of the root styles.
    pub fn advance_by_rate(&mut self, rate: f64, rest: f64) -> f64 {
        let scale = rest * (1.0 - self.idle_rate) + self.idle_rate;
        self.advance(scale * rate * TAU)
    }

    /// Phase as `[cos, sin]`.
    pub fn signal(&self) -> [f64; 2] {
        [self.phase.cos(), self.phase.sin()]
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

impl Default for PhaseClock {
    fn default() -> Self {
        Self::new(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_delta_wraps() {
        let mut clock = PhaseClock::default();
        clock.set_phase(0.1);
        let phase = clock.advance(-0.3);
        assert!((phase - (TAU - 0.2)).abs() < 1e-12);
        assert!(phase < TAU);
    }

    #[test]
    fn test_zero_and_full_turn() {
        let mut clock = PhaseClock::default();
        clock.set_phase(1.0);
        assert_eq!(clock.advance(0.0), 1.0);
        assert!((clock.advance(TAU) - 1.0).abs() < 1e-12);
        clock.set_phase(-TAU);
        assert!(clock.phase() >= 0.0 && clock.phase() < TAU);
    }

    #[test]
    fn test_idle_floor() {
        let mut clock = PhaseClock::new(0.1);
        // full idle keeps 10% of the rate
        let phase = clock.advance_by_rate(0.5, 0.0);
        assert!((phase - 0.05 * TAU).abs() < 1e-12);
        clock.reset();
        let phase = clock.advance_by_rate(0.25, 1.0);
        assert!((phase - 0.25 * TAU).abs() < 1e-12);
        assert_eq!(clock.signal()[1], phase.sin());
    }
}
