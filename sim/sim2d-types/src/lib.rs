//! Core types for 2D rigid-body simulation.
//!
//! This crate provides the foundational types shared by the planar
//! simulation stack:
//!
//! - [`BodyId`], [`ShapeId`], [`ConstraintId`] - Stable handles into a world
//! - [`CollisionType`] - User tags that select collision handlers
//! - [`Pose`], [`MassProperties`], [`BodyType`] - Planar body description
//! - [`SimulationConfig`] - Timestep, gravity, solver and sleep settings
//! - [`SimError`] - Errors reported by the world API
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They have no behavior, no physics, no
//! integration. The step pipeline itself lives in `sim2d-core`.
//!
//! # Coordinate System
//!
//! - X: right
//! - Y: up
//! - Angles: radians, counter-clockwise
//!
//! # Example
//!
//! ```
//! use sim2d_types::{Pose, SimulationConfig, SleepConfig};
//! use nalgebra::Point2;
//!
//! let config = SimulationConfig::realtime()
//!     .downward_gravity(10.0)
//!     .sleep(SleepConfig::after(0.5));
//! assert!(config.validate().is_ok());
//!
//! let pose = Pose::from_position(Point2::new(0.0, 5.0));
//! assert_eq!(pose.position.y, 5.0);
//! ```

#![doc(html_root_url = "https://docs.rs/sim2d-types/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod error;

pub use body::{BodyId, BodyType, CollisionType, ConstraintId, MassProperties, Pose, ShapeId};
pub use config::{
    bias_coefficient, default_error_bias, SimulationConfig, SleepConfig, SolverConfig,
};
pub use error::SimError;

// Re-export math types for convenience
pub use nalgebra::{Isometry2, Matrix2, Point2, UnitComplex, Vector2};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
