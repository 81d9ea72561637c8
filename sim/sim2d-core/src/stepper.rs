//! Simulation stepping and control flow.
//!
//! This module provides the [`Stepper`], which drives a [`World`] at its
//! configured timestep, checks for divergence around every step and reports
//! a [`StepResult`] summary.
//!
//! # Example
//!
//! ```
//! use sim2d_core::{Stepper, World};
//! use sim2d_types::{MassProperties, Pose, SimulationConfig};
//! use nalgebra::Point2;
//!
//! // Create world with a falling body
//! let mut world = World::new(SimulationConfig::default().downward_gravity(9.81));
//! let id = world
//!     .add_body(Pose::from_position(Point2::new(0.0, 10.0)), MassProperties::disc(1.0, 0.5))
//!     .unwrap();
//!
//! // Create stepper and simulate
//! let mut stepper = Stepper::new();
//! for _ in 0..100 {
//!     let result = stepper.step(&mut world);
//!     assert!(result.is_ok());
//! }
//!
//! // Body should have fallen
//! assert!(world.body(id).unwrap().position().y < 10.0);
//! ```

use crate::world::World;
use sim2d_types::SimError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Summary of the world after a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    /// Simulation time after the step.
    pub time: f64,
    /// Steps taken so far.
    pub step_count: u64,
    /// Arbiters solved in this step.
    pub active_arbiters: usize,
    /// Awake dynamic and kinematic bodies.
    pub awake_bodies: usize,
    /// Sleeping components.
    pub sleeping_components: usize,
    /// Whether simulation has completed (reached `max_time`).
    pub completed: bool,
}

impl StepResult {
    fn observe(world: &World) -> Self {
        Self {
            time: world.time(),
            step_count: world.step_count(),
            active_arbiters: world.active_arbiter_count(),
            awake_bodies: world.awake_body_count(),
            sleeping_components: world.sleeping_component_count(),
            completed: world.is_complete(),
        }
    }
}

/// Configuration for the stepper.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepperConfig {
    /// Validate the world before and after every step.
    pub check_divergence: bool,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            check_divergence: true,
        }
    }
}

impl StepperConfig {
    /// Create config that skips the divergence checks.
    #[must_use]
    pub fn unchecked() -> Self {
        Self {
            check_divergence: false,
        }
    }
}

/// Drives a world step by step.
#[derive(Debug, Clone, Default)]
pub struct Stepper {
    /// Stepper configuration.
    config: StepperConfig,
}

impl Stepper {
    /// Create a new stepper with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stepper with custom configuration.
    #[must_use]
    pub fn with_config(config: StepperConfig) -> Self {
        Self { config }
    }

    /// Get the stepper configuration.
    #[must_use]
    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    /// Execute one step at the world's configured timestep.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The world state is invalid (contains `NaN` or `Inf` values)
    /// - The world is locked
    pub fn step(&mut self, world: &mut World) -> sim2d_types::Result<StepResult> {
        let dt = world.timestep();
        self.step_with_dt(world, dt)
    }

    /// Execute one step of length `dt`.
    ///
    /// Warm starting scales last step's impulses by the ratio of the two
    /// timesteps, so `dt` may change between calls.
    ///
    /// # Errors
    ///
    /// Same as [`Self::step`], plus an invalid `dt`.
    pub fn step_with_dt(&mut self, world: &mut World, dt: f64) -> sim2d_types::Result<StepResult> {
        if self.config.check_divergence {
            world.validate()?;
        }

        world.step(dt)?;

        // Check for divergence
        if self.config.check_divergence {
            world.validate()?;
        }

        Ok(StepResult::observe(world))
    }

    /// Run the simulation until completion or max steps.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn run(
        &mut self,
        world: &mut World,
        max_steps: Option<u64>,
    ) -> sim2d_types::Result<Vec<StepResult>> {
        if max_steps.is_none() && world.config().max_time.is_none() {
            return Err(SimError::invalid_config(
                "run needs max_steps or a configured max_time",
            ));
        }

        let mut results = Vec::new();
        let mut steps = 0u64;
        loop {
            let result = self.step(world)?;
            results.push(result);

            if result.completed {
                break;
            }

            steps += 1;
            if let Some(max) = max_steps {
                if steps >= max {
                    break;
                }
            }
        }

        Ok(results)
    }

    /// Run for a specific duration.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn run_for(
        &mut self,
        world: &mut World,
        duration: f64,
    ) -> sim2d_types::Result<Vec<StepResult>> {
        let target_time = world.time() + duration;
        let dt = world.timestep();
        // Safe cast: duration and dt are positive, result is bounded
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let estimated_steps = (duration / dt).ceil().max(1.0) as usize;
        let mut results = Vec::with_capacity(estimated_steps);

        for _ in 0..estimated_steps {
            if world.time() >= target_time {
                break;
            }
            let result = self.step(world)?;
            results.push(result);

            if result.completed {
                break;
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
mod tests {
    use super::*;
    use crate::shape::{Shape, ShapeGeometry};
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Vector2};
    use sim2d_types::{BodyId, MassProperties, Pose, SimulationConfig, SleepConfig};

    fn setup_falling_body() -> (World, BodyId) {
        let mut world = World::new(SimulationConfig::default().downward_gravity(9.81));
        let id = world
            .add_body(
                Pose::from_position(Point2::new(0.0, 10.0)),
                MassProperties::disc(1.0, 0.5),
            )
            .unwrap();
        (world, id)
    }

    #[test]
    fn test_single_step() {
        let (mut world, _) = setup_falling_body();
        let mut stepper = Stepper::new();

        let result = stepper.step(&mut world).expect("step should succeed");
        assert!(!result.completed);
        assert_eq!(result.step_count, 1);
        assert_eq!(result.awake_bodies, 1);
        assert_relative_eq!(result.time, world.timestep());
    }

    #[test]
    fn test_gravity_falling() {
        let (mut world, id) = setup_falling_body();
        let mut stepper = Stepper::new();

        let steps = (1.0 / world.timestep()) as u64;
        for _ in 0..steps {
            stepper.step(&mut world).expect("step should succeed");
        }

        let body = world.body(id).unwrap();
        assert!(body.position().y < 10.0, "body should have fallen");
        assert!(body.position().y > 0.0, "body shouldn't have fallen too far");
        assert!(body.velocity().y < 0.0, "body should be moving down");
    }

    #[test]
    fn test_run_for_duration() {
        let (mut world, _) = setup_falling_body();
        let mut stepper = Stepper::new();

        let results = stepper.run_for(&mut world, 0.5).unwrap();
        let expected = (0.5 / world.timestep()).round() as usize;
        assert!(results.len().abs_diff(expected) <= 1);
        assert!(world.time() >= 0.5 - 1e-9);
    }

    #[test]
    fn test_run_until_complete() {
        let config = SimulationConfig::default().max_time(0.1);
        let mut world = World::new(config);
        let mut stepper = Stepper::new();

        let results = stepper.run(&mut world, None).unwrap();
        assert!(results.last().unwrap().completed);
        assert!(world.is_complete());
    }

    #[test]
    fn test_run_requires_a_bound() {
        let mut world = World::default();
        let err = Stepper::new().run(&mut world, None).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_variable_dt() {
        let (mut world, id) = setup_falling_body();
        let mut stepper = Stepper::new();
        stepper.step_with_dt(&mut world, 0.01).unwrap();
        stepper.step_with_dt(&mut world, 0.02).unwrap();
        assert_relative_eq!(world.time(), 0.03, epsilon = 1e-12);
        assert!(world.body(id).unwrap().velocity().y < 0.0);
        assert!(stepper.step_with_dt(&mut world, -0.01).is_err());
    }

    #[test]
    fn test_detect_divergence() {
        let (mut world, id) = setup_falling_body();
        world.set_velocity(id, Vector2::new(f64::NAN, 0.0)).unwrap();

        let err = Stepper::new().step(&mut world).unwrap_err();
        assert!(err.is_diverged());
        assert_eq!(world.step_count(), 0);
    }

    #[test]
    fn test_static_body_doesnt_move() {
        let mut world = World::default();
        let ground = world.add_static_body(Pose::identity()).unwrap();
        world
            .add_shape(ground, Shape::new(ShapeGeometry::box_shape(10.0, 1.0, 0.0)))
            .unwrap();
        let mut stepper = Stepper::new();
        stepper.run_for(&mut world, 0.25).unwrap();
        assert_eq!(world.body(ground).unwrap().position(), Point2::origin());
    }

    #[test]
    fn test_result_reports_sleep() {
        let config = SimulationConfig::default()
            .gravity(Vector2::zeros())
            .sleep(SleepConfig::after(0.1));
        let mut world = World::new(config);
        world
            .add_body(Pose::identity(), MassProperties::disc(1.0, 0.5))
            .unwrap();

        let results = Stepper::new().run_for(&mut world, 1.0).unwrap();
        let last = results.last().unwrap();
        assert_eq!(last.sleeping_components, 1);
        assert_eq!(last.awake_bodies, 0);
    }

    #[test]
    fn test_unchecked_stepper_skips_validation() {
        let (mut world, id) = setup_falling_body();
        world.set_velocity(id, Vector2::new(f64::NAN, 0.0)).unwrap();

        let mut stepper = Stepper::with_config(StepperConfig::unchecked());
        assert!(!stepper.config().check_divergence);
        stepper.step(&mut world).unwrap();
        assert_eq!(world.step_count(), 1);
    }
}
