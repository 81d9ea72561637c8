//! Identifiers, poses and mass properties for planar rigid bodies.
//!
//! Bodies live in the plane: a pose is a position plus a rotation angle, and
//! the rotational inertia is a single scalar moment about the center of mass.

use nalgebra::{Isometry2, Point2, UnitComplex, Vector2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name(pub u64);

        impl $name {
            /// Create a new ID.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw ID value.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a rigid body in the simulation.
    BodyId,
    "Body"
);

define_id!(
    /// Unique identifier for a collision shape.
    ShapeId,
    "Shape"
);

define_id!(
    /// Unique identifier for a constraint (joint).
    ConstraintId,
    "Constraint"
);

/// User tag used to select collision handlers for a pair of shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionType(pub u64);

impl CollisionType {
    /// The type every shape starts with.
    pub const DEFAULT: Self = Self(0);

    /// Reserved type that matches any other type in handler lookups.
    pub const WILDCARD: Self = Self(u64::MAX);

    /// Check whether this is the wildcard type.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0 == u64::MAX
    }
}

/// How a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyType {
    /// Finite mass, moved by forces, impulses and gravity.
    #[default]
    Dynamic,
    /// Infinite mass, moved only by its user-set velocity. Never sleeps.
    Kinematic,
    /// Infinite mass, never moves. Implicitly asleep.
    Static,
}

impl BodyType {
    /// Whether bodies of this type have infinite mass.
    #[must_use]
    pub const fn is_infinite_mass(self) -> bool {
        !matches!(self, Self::Dynamic)
    }
}

/// Position and orientation of a body in the plane.
///
/// # Example
///
/// ```
/// use sim2d_types::Pose;
/// use nalgebra::Point2;
///
/// let pose = Pose::new(Point2::new(1.0, 2.0), std::f64::consts::FRAC_PI_2);
/// let world = pose.transform_point(&Point2::new(1.0, 0.0));
/// assert!((world.x - 1.0).abs() < 1e-12);
/// assert!((world.y - 3.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position of the center of mass in world coordinates.
    pub position: Point2<f64>,
    /// Rotation angle in radians (counter-clockwise).
    pub angle: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create a pose from a position and an angle.
    #[must_use]
    pub const fn new(position: Point2<f64>, angle: f64) -> Self {
        Self { position, angle }
    }

    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Point2::origin(), 0.0)
    }

    /// Create a pose from position only.
    #[must_use]
    pub const fn from_position(position: Point2<f64>) -> Self {
        Self::new(position, 0.0)
    }

    /// Rotation as a unit complex number.
    #[must_use]
    pub fn rotation(&self) -> UnitComplex<f64> {
        UnitComplex::new(self.angle)
    }

    /// Convert to an isometry.
    #[must_use]
    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(self.position.coords, self.angle)
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point2<f64>) -> Point2<f64> {
        self.position + self.rotation() * local.coords
    }

    /// Rotate a vector from local to world coordinates.
    #[must_use]
    pub fn transform_vector(&self, local: &Vector2<f64>) -> Vector2<f64> {
        self.rotation() * local
    }

    /// Transform a point from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point2<f64>) -> Point2<f64> {
        Point2::from(self.rotation().inverse() * (world - self.position))
    }

    /// Rotate a vector from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_vector(&self, world: &Vector2<f64>) -> Vector2<f64> {
        self.rotation().inverse() * world
    }

    /// Check if the pose contains only finite values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.x.is_finite() && self.position.y.is_finite() && self.angle.is_finite()
    }
}

/// Mass and moment of inertia of a planar body.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Mass (kg). Infinite for static and kinematic bodies.
    pub mass: f64,
    /// Moment of inertia about the center of mass (kg·m²).
    pub moment: f64,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl MassProperties {
    /// Create mass properties from a mass and a moment.
    #[must_use]
    pub const fn new(mass: f64, moment: f64) -> Self {
        Self { mass, moment }
    }

    /// Infinite mass and moment (static and kinematic bodies).
    #[must_use]
    pub const fn infinite() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY)
    }

    /// Solid disc of the given mass and radius.
    #[must_use]
    pub fn disc(mass: f64, radius: f64) -> Self {
        Self::new(mass, 0.5 * mass * radius * radius)
    }

    /// Solid rectangle of the given mass and full width/height.
    #[must_use]
    pub fn rectangle(mass: f64, width: f64, height: f64) -> Self {
        Self::new(mass, mass * (width * width + height * height) / 12.0)
    }

    /// Inverse mass, zero for infinite mass.
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        if self.mass.is_finite() && self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    /// Inverse moment, zero for infinite moment.
    #[must_use]
    pub fn inverse_moment(&self) -> f64 {
        if self.moment.is_finite() && self.moment > 0.0 {
            1.0 / self.moment
        } else {
            0.0
        }
    }

    /// Validate the mass properties for a dynamic body.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mass.is_nan() || self.mass <= 0.0 {
            return Err(crate::SimError::invalid_mass(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if self.moment.is_nan() || self.moment <= 0.0 {
            return Err(crate::SimError::invalid_mass(format!(
                "moment must be positive, got {}",
                self.moment
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_id_display() {
        assert_eq!(BodyId::new(3).to_string(), "Body(3)");
        assert_eq!(ShapeId::from(4).to_string(), "Shape(4)");
        assert_eq!(ConstraintId(5).raw(), 5);
    }

    #[test]
    fn test_wildcard() {
        assert!(CollisionType::WILDCARD.is_wildcard());
        assert!(!CollisionType::DEFAULT.is_wildcard());
    }

    #[test]
    fn test_pose_round_trip() {
        let pose = Pose::new(Point2::new(-2.0, 0.5), 0.7);
        let local = Point2::new(0.3, -1.2);
        let back = pose.inverse_transform_point(&pose.transform_point(&local));
        assert_relative_eq!(back, local, epsilon = 1e-12);
    }

    #[test]
    fn test_mass_inverse() {
        let disc = MassProperties::disc(2.0, 1.0);
        assert_relative_eq!(disc.inverse_mass(), 0.5);
        assert_relative_eq!(disc.moment, 1.0);

        let inf = MassProperties::infinite();
        assert_eq!(inf.inverse_mass(), 0.0);
        assert_eq!(inf.inverse_moment(), 0.0);
    }

    #[test]
    fn test_mass_validation() {
        assert!(MassProperties::disc(1.0, 0.5).validate().is_ok());
        assert!(MassProperties::new(0.0, 1.0).validate().is_err());
        assert!(MassProperties::new(1.0, f64::NAN).validate().is_err());
    }
}
