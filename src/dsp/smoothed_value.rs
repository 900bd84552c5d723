//! One-pole parameter smoothing.
//!
//! Parameters set from the control plane jump between blocks. Built-in
//! plugins run gains through a [`SmoothedValue`] so the jump becomes a short
//! exponential glide instead of a click.

/// A value that glides exponentially toward its target, one sample at a time.
#[derive(Clone, Debug)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    /// Per-sample pole; 0.0 means no smoothing.
    coeff: f32,
    time_constant_ms: f32,
}

impl SmoothedValue {
    /// Glide time used when none is given.
    pub const DEFAULT_TIME_CONSTANT_MS: f32 = 10.0;

    /// Difference below which the value snaps to the target.
    const SNAP: f32 = 1e-4;

    pub fn new(initial: f32, time_constant_ms: f32, sample_rate: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: pole(time_constant_ms, sample_rate),
            time_constant_ms,
        }
    }

    pub fn with_default_smoothing(initial: f32, sample_rate: f32) -> Self {
        Self::new(initial, Self::DEFAULT_TIME_CONSTANT_MS, sample_rate)
    }

    /// Recomputes the pole for a new sample rate.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.coeff = pole(self.time_constant_ms, sample_rate);
    }

    #[inline]
    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Jumps straight to `value`.
    #[inline]
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Advances one sample and returns the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        let diff = self.current - self.target;
        self.current = if diff.abs() <= Self::SNAP {
            self.target
        } else {
            self.target + self.coeff * diff
        };
        self.current
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        (self.current - self.target).abs() > Self::SNAP
    }
}

impl Default for SmoothedValue {
    fn default() -> Self {
        Self::new(0.0, Self::DEFAULT_TIME_CONSTANT_MS, 44100.0)
    }
}

fn pole(time_constant_ms: f32, sample_rate: f32) -> f32 {
    let samples = time_constant_ms * 0.001 * sample_rate;
    if samples < 1.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_value() {
        let sv = SmoothedValue::new(0.8, 10.0, 48000.0);
        assert_eq!(sv.current(), 0.8);
        assert_eq!(sv.target(), 0.8);
        assert!(!sv.is_smoothing());
    }

    #[test]
    fn test_glide_is_gradual_and_converges() {
        let mut sv = SmoothedValue::new(0.0, 10.0, 44100.0);
        sv.set_target(1.0);
        let first = sv.next();
        let second = sv.next();
        assert!(first > 0.0 && first < second && second < 1.0);

        for _ in 0..4410 {
            sv.next();
        }
        assert!((sv.current() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_time_is_instant() {
        let mut sv = SmoothedValue::new(0.0, 0.0, 44100.0);
        sv.set_target(0.5);
        assert_eq!(sv.next(), 0.5);
    }

    #[test]
    fn test_set_immediate() {
        let mut sv = SmoothedValue::with_default_smoothing(0.0, 44100.0);
        sv.set_target(1.0);
        sv.next();
        sv.set_immediate(0.25);
        assert_eq!(sv.current(), 0.25);
        assert!(!sv.is_smoothing());
    }
}
