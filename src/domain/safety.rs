//! Probe calibration factors and the force safety limit.

/// Raw load cell value to probe force in newtons.
pub const MASS_TO_FORCE: f64 = 6.0 * 9.81;

/// Raw encoder angle to calibrated lead screw degrees.
pub const ANGLE_SCALE: f64 = 0.225;

/// Probe travel per full lead screw revolution, in centimeters.
pub const DEPTH_PER_REVOLUTION_CM: f64 = 0.5;

/// Default force ceiling in newtons.
pub const DEFAULT_MAX_FORCE: f64 = 90.0;

/// Force ceiling checked against every incoming reading.
///
/// Stateless: each reading is judged on its own, so a single sample
/// over the limit trips the retraction even if the next one is fine.
#[derive(Debug, Clone, Copy)]
pub struct SafetyLimit {
    pub max_force_newtons: f64,
}

impl Default for SafetyLimit {
    fn default() -> Self {
        Self {
            max_force_newtons: DEFAULT_MAX_FORCE,
        }
    }
}

impl SafetyLimit {
    pub fn new(max_force_newtons: f64) -> Self {
        Self { max_force_newtons }
    }

    /// True when the force is strictly above the limit.
    pub fn is_exceeded(&self, force_newtons: f64) -> bool {
        force_newtons > self.max_force_newtons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_below_the_limit_passes() {
        let limit = SafetyLimit::default();
        let force = 1.5 * MASS_TO_FORCE;
        assert!((force - 88.29).abs() < 1e-9);
        assert!(!limit.is_exceeded(force));
    }

    #[test]
    fn force_over_the_limit_trips() {
        let limit = SafetyLimit::default();
        let force = 2.0 * MASS_TO_FORCE;
        assert!((force - 117.72).abs() < 1e-9);
        assert!(limit.is_exceeded(force));
    }

    #[test]
    fn force_exactly_at_the_limit_passes() {
        let limit = SafetyLimit::default();
        assert!(!limit.is_exceeded(DEFAULT_MAX_FORCE));
    }
}
