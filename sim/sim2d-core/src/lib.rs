//! Fixed-step 2D rigid-body simulation.
//!
//! This crate provides the simulation pipeline on top of [`sim2d_types`]:
//! narrow-phase contact generation, persistent arbiters with warm starting,
//! a sequential impulse solver shared by contacts and joints, and sleeping
//! of idle islands.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Stepper                               │
//! │  Drives: fixed or variable dt, divergence checks, results   │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         World                                │
//! │  Owns: bodies, shapes, constraints, arbiters, handlers      │
//! │  Guards: lock counter, post-step queue, deferred wake-ups   │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!         ┌─────────────────┼──────────────────┐
//!         ▼                 ▼                  ▼
//! ┌───────────────┐ ┌───────────────┐ ┌─────────────────┐
//! │ Broad phase   │ │ Narrow phase  │ │ Solver          │
//! │ sweep & prune │ │ GJK/EPA, clip │ │ contacts+joints │
//! └───────────────┘ └───────────────┘ └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use sim2d_core::{Shape, ShapeGeometry, Stepper, World};
//! use sim2d_types::{MassProperties, Pose, SimulationConfig};
//! use nalgebra::Point2;
//!
//! let mut world = World::new(SimulationConfig::default().downward_gravity(10.0));
//!
//! // Static ground
//! let ground = world.add_static_body(Pose::identity()).unwrap();
//! world
//!     .add_shape(
//!         ground,
//!         Shape::new(ShapeGeometry::segment(Point2::new(-10.0, 0.0), Point2::new(10.0, 0.0), 0.0)),
//!     )
//!     .unwrap();
//!
//! // A ball dropped onto it
//! let ball = world
//!     .add_body(Pose::from_position(Point2::new(0.0, 3.0)), MassProperties::disc(1.0, 1.0))
//!     .unwrap();
//! world.add_shape(ball, Shape::new(ShapeGeometry::circle(1.0))).unwrap();
//!
//! let mut stepper = Stepper::new();
//! stepper.run_for(&mut world, 2.0).unwrap();
//!
//! let y = world.body(ball).unwrap().position().y;
//! assert!(y > 0.8 && y < 1.1);
//! ```
//!
//! # Collision Handlers
//!
//! Callbacks are selected by the collision types of the two shapes:
//!
//! ```
//! use sim2d_core::{handler::CallbackHandler, World};
//! use sim2d_types::CollisionType;
//!
//! const PLAYER: CollisionType = CollisionType(1);
//! const COIN: CollisionType = CollisionType(2);
//!
//! let mut world = World::default();
//! world.add_collision_handler(
//!     PLAYER,
//!     COIN,
//!     CallbackHandler::new().on_begin(|arbiter, ctx| {
//!         let (_, coin) = arbiter.shapes();
//!         ctx.add_post_step_callback(coin.raw(), move |world| {
//!             let _ = world.remove_shape(coin);
//!         });
//!         false
//!     }),
//! );
//! ```
//!
//! # Diagnostics
//!
//! ```
//! use sim2d_core::World;
//! use sim2d_types::{MassProperties, Pose};
//! use nalgebra::Vector2;
//!
//! let mut world = World::default();
//! let id = world.add_body(Pose::identity(), MassProperties::disc(2.0, 0.5)).unwrap();
//! world.set_velocity(id, Vector2::new(1.0, 0.0)).unwrap();
//!
//! println!("Total kinetic energy: {} J", world.total_kinetic_energy());
//! println!("Total momentum: {:?}", world.total_linear_momentum());
//! ```

#![doc(html_root_url = "https://docs.rs/sim2d-core/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
)]

pub mod arbiter;
pub mod body;
pub mod broad_phase;
pub mod collision;
pub mod constraint;
mod contact_buffer;
pub mod gjk_epa;
pub mod handler;
mod pool;
pub mod post_step;
pub mod shape;
mod sleep;
pub mod solver;
mod step;
mod stepper;
mod world;

pub use arbiter::{Arbiter, ArbiterState, Contact, ShapePair};
pub use body::Body;
pub use broad_phase::{Aabb, Axis, BroadPhase, BruteForce, CandidatePair, SweepAndPrune};
pub use collision::{collide, CollisionInfo, ContactPoint, MAX_CONTACTS_PER_ARBITER};
pub use constraint::{Constraint, ConstraintParams, JointKind, PivotJoint};
pub use gjk_epa::CollisionId;
pub use handler::{ArbiterRef, CallbackContext, CallbackHandler, CollisionHandler};
pub use shape::{
    Material, PointQuery, SegmentQuery, Shape, ShapeFilter, ShapeGeometry, ShapeKind,
};
pub use stepper::{StepResult, Stepper, StepperConfig};
pub use world::World;

// Re-export key types from sim2d-types for convenience
pub use sim2d_types::{
    BodyId, BodyType, CollisionType, ConstraintId, MassProperties, Pose, ShapeId, SimError,
    SimulationConfig, SleepConfig, SolverConfig,
};

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Vector2};

    #[test]
    fn test_basic_simulation() {
        let mut world = World::new(SimulationConfig::default().downward_gravity(9.81));
        let body_id = world
            .add_body(
                Pose::from_position(Point2::new(0.0, 10.0)),
                MassProperties::disc(1.0, 0.5),
            )
            .unwrap();

        let mut stepper = Stepper::new();
        let results = stepper
            .run_for(&mut world, 0.5)
            .expect("simulation should succeed");

        assert!(!results.is_empty());
        let body = world.body(body_id).expect("body should exist");
        assert!(body.position().y < 10.0);
    }

    #[test]
    fn test_momentum_conservation() {
        // In zero gravity two colliding discs keep their total momentum
        let mut world = World::new(SimulationConfig::default());
        let a = world
            .add_body(Pose::from_position(Point2::new(-2.0, 0.0)), MassProperties::disc(1.0, 0.5))
            .unwrap();
        let b = world
            .add_body(Pose::from_position(Point2::new(2.0, 0.0)), MassProperties::disc(2.0, 0.5))
            .unwrap();
        world.add_shape(a, Shape::new(ShapeGeometry::circle(0.5))).unwrap();
        world.add_shape(b, Shape::new(ShapeGeometry::circle(0.5))).unwrap();
        world.set_velocity(a, Vector2::new(3.0, 0.0)).unwrap();
        world.set_velocity(b, Vector2::new(-1.0, 0.0)).unwrap();

        let initial = world.total_linear_momentum();
        Stepper::new().run_for(&mut world, 2.0).unwrap();
        let after = world.total_linear_momentum();

        assert_relative_eq!(initial, after, epsilon = 1e-9);
        // They did collide.
        assert!(world.body(a).unwrap().velocity().x < 3.0);
    }
}
