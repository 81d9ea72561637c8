//! Configuration types for simulation.
//!
//! This module provides configuration types that control how the world
//! steps: timestep, gravity, solver settings and sleeping.

use nalgebra::Vector2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fraction of positional error left uncorrected after one second at 60 Hz
/// when 10% is removed every step.
const DEFAULT_ERROR_BIAS: f64 = 0.001_797_010_299_914_43; // 0.9^60

/// Main configuration for a simulation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// Fixed timestep for physics integration (seconds).
    pub timestep: f64,
    /// Gravity acceleration applied to every dynamic body (m/s²).
    pub gravity: Vector2<f64>,
    /// Velocity damping: fraction of velocity kept after one second.
    pub damping: f64,
    /// Solver configuration.
    pub solver: SolverConfig,
    /// Sleep configuration.
    pub sleep: SleepConfig,
    /// Maximum simulation time (None for unlimited).
    pub max_time: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 1.0 / 60.0,
            gravity: Vector2::zeros(),
            damping: 1.0,
            solver: SolverConfig::default(),
            sleep: SleepConfig::default(),
            max_time: None,
        }
    }
}

impl SimulationConfig {
    /// Create a new simulation config with the given timestep.
    #[must_use]
    pub fn with_timestep(timestep: f64) -> Self {
        Self {
            timestep,
            ..Default::default()
        }
    }

    /// Create a configuration for real-time simulation (60 Hz).
    #[must_use]
    pub fn realtime() -> Self {
        Self::default()
    }

    /// Create a configuration for high-fidelity simulation (240 Hz).
    #[must_use]
    pub fn high_fidelity() -> Self {
        Self {
            timestep: 1.0 / 240.0,
            solver: SolverConfig::high_accuracy(),
            ..Default::default()
        }
    }

    /// Create a configuration for fast, low-fidelity simulation (30 Hz).
    #[must_use]
    pub fn fast() -> Self {
        Self {
            timestep: 1.0 / 30.0,
            solver: SolverConfig::fast(),
            ..Default::default()
        }
    }

    /// Set the gravity vector.
    #[must_use]
    pub fn gravity(mut self, gravity: Vector2<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Standard downward gravity of the given magnitude.
    #[must_use]
    pub fn downward_gravity(mut self, magnitude: f64) -> Self {
        self.gravity = Vector2::new(0.0, -magnitude);
        self
    }

    /// Set the velocity damping (fraction of velocity kept per second).
    #[must_use]
    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub fn solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Set the sleep configuration.
    #[must_use]
    pub fn sleep(mut self, sleep: SleepConfig) -> Self {
        self.sleep = sleep;
        self
    }

    /// Set the maximum simulation time.
    #[must_use]
    pub fn max_time(mut self, max_time: f64) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(crate::SimError::InvalidTimestep(self.timestep));
        }

        if self.timestep > 1.0 {
            return Err(crate::SimError::invalid_config(
                "timestep > 1 second is likely an error",
            ));
        }

        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(crate::SimError::invalid_config("gravity must be finite"));
        }

        if !(0.0..=1.0).contains(&self.damping) {
            return Err(crate::SimError::invalid_config(
                "damping must be between 0 and 1",
            ));
        }

        self.solver.validate()?;
        self.sleep.validate()?;

        Ok(())
    }

    /// Get the frequency in Hz.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        1.0 / self.timestep
    }
}

/// Configuration for the impulse solver and contact persistence.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Number of impulse iterations per step.
    pub iterations: usize,
    /// Overlap allowed between shapes before position correction starts.
    pub collision_slop: f64,
    /// Fraction of overlap left uncorrected after one second.
    pub collision_bias: f64,
    /// Steps a separated arbiter is kept before it is evicted.
    pub collision_persistence: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            collision_slop: 0.1,
            collision_bias: DEFAULT_ERROR_BIAS,
            collision_persistence: 3,
        }
    }
}

impl SolverConfig {
    /// Create a high-accuracy solver configuration.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            iterations: 30,
            collision_slop: 0.01,
            ..Default::default()
        }
    }

    /// Create a fast solver configuration.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            iterations: 5,
            ..Default::default()
        }
    }

    /// Set the number of solver iterations.
    #[must_use]
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the collision slop.
    #[must_use]
    pub fn slop(mut self, slop: f64) -> Self {
        self.collision_slop = slop;
        self
    }

    /// Set the collision persistence window.
    #[must_use]
    pub fn persistence(mut self, steps: u64) -> Self {
        self.collision_persistence = steps;
        self
    }

    /// Fraction of positional error corrected in one step of length `dt`.
    #[must_use]
    pub fn bias_coefficient(&self, dt: f64) -> f64 {
        bias_coefficient(self.collision_bias, dt)
    }

    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "iterations must be at least 1",
            ));
        }

        if self.collision_slop < 0.0 {
            return Err(crate::SimError::invalid_config(
                "collision_slop cannot be negative",
            ));
        }

        if !(0.0..=1.0).contains(&self.collision_bias) {
            return Err(crate::SimError::invalid_config(
                "collision_bias must be between 0 and 1",
            ));
        }

        if self.collision_persistence == 0 {
            return Err(crate::SimError::invalid_config(
                "collision_persistence must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Configuration for idle detection and sleeping islands.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SleepConfig {
    /// Speed below which a body counts as idle. Zero derives it from gravity.
    pub idle_speed_threshold: f64,
    /// Idle time after which a component falls asleep. `None` disables sleeping.
    pub sleep_time_threshold: Option<f64>,
}

impl SleepConfig {
    /// Enable sleeping after `seconds` of idleness.
    #[must_use]
    pub fn after(seconds: f64) -> Self {
        Self {
            idle_speed_threshold: 0.0,
            sleep_time_threshold: Some(seconds),
        }
    }

    /// Set an explicit idle speed threshold.
    #[must_use]
    pub fn idle_speed(mut self, speed: f64) -> Self {
        self.idle_speed_threshold = speed;
        self
    }

    /// Whether sleeping is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sleep_time_threshold.is_some()
    }

    /// Squared idle speed for a step of length `dt` under `gravity`.
    ///
    /// Without an explicit threshold, a body is idle when it moves slower than
    /// gravity would accelerate it in one step.
    #[must_use]
    pub fn idle_speed_squared(&self, gravity: &Vector2<f64>, dt: f64) -> f64 {
        if self.idle_speed_threshold > 0.0 {
            self.idle_speed_threshold * self.idle_speed_threshold
        } else {
            gravity.norm_squared() * dt * dt
        }
    }

    /// Validate the sleep configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.idle_speed_threshold < 0.0 {
            return Err(crate::SimError::invalid_config(
                "idle_speed_threshold cannot be negative",
            ));
        }

        if let Some(threshold) = self.sleep_time_threshold {
            if threshold.is_nan() || threshold < 0.0 {
                return Err(crate::SimError::invalid_config(
                    "sleep_time_threshold must be non-negative",
                ));
            }
        }

        Ok(())
    }
}

/// `1 - bias^dt`: the fraction of error removed in one step of length `dt`
/// when `bias` is the fraction left after one second.
#[must_use]
pub fn bias_coefficient(bias: f64, dt: f64) -> f64 {
    1.0 - bias.powf(dt)
}

/// Default error bias for constraints, matching the contact default.
#[must_use]
pub const fn default_error_bias() -> f64 {
    DEFAULT_ERROR_BIAS
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_relative_eq!(config.timestep, 1.0 / 60.0, epsilon = 1e-10);
        assert_eq!(config.solver.iterations, 10);
        assert_eq!(config.solver.collision_persistence, 3);
        assert!(!config.sleep.is_enabled());
    }

    #[test]
    fn test_config_presets() {
        let hifi = SimulationConfig::high_fidelity();
        assert_relative_eq!(hifi.timestep, 1.0 / 240.0, epsilon = 1e-10);
        assert_eq!(hifi.solver.iterations, 30);

        let fast = SimulationConfig::fast();
        assert_relative_eq!(fast.timestep, 1.0 / 30.0, epsilon = 1e-10);
    }

    #[test]
    fn test_config_builder() {
        let config = SimulationConfig::with_timestep(0.01)
            .downward_gravity(10.0)
            .sleep(SleepConfig::after(0.5))
            .max_time(10.0);

        assert_relative_eq!(config.gravity.y, -10.0);
        assert_eq!(config.sleep.sleep_time_threshold, Some(0.5));
        assert_eq!(config.max_time, Some(10.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulationConfig::default();

        config.timestep = -0.01;
        assert!(config.validate().is_err());

        config.timestep = f64::NAN;
        assert!(config.validate().is_err());

        config.timestep = 0.01;
        config.damping = 1.5;
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_solver_validation() {
        let mut solver = SolverConfig::default();
        assert!(solver.validate().is_ok());

        solver.iterations = 0;
        assert!(solver.validate().is_err());

        solver.iterations = 10;
        solver.collision_persistence = 0;
        assert!(solver.validate().is_err());
    }

    #[test]
    fn test_bias_coefficient() {
        // 10% of the error is removed per 1/60 s step with the default bias.
        assert_relative_eq!(
            bias_coefficient(default_error_bias(), 1.0 / 60.0),
            0.1,
            epsilon = 1e-9
        );
        assert_relative_eq!(bias_coefficient(0.5, 0.0), 0.0);
    }

    #[test]
    fn test_idle_speed() {
        let gravity = Vector2::new(0.0, -10.0);
        let derived = SleepConfig::after(1.0);
        assert_relative_eq!(derived.idle_speed_squared(&gravity, 0.1), 1.0, epsilon = 1e-12);

        let explicit = SleepConfig::after(1.0).idle_speed(0.5);
        assert_relative_eq!(explicit.idle_speed_squared(&gravity, 0.1), 0.25);
    }
}
