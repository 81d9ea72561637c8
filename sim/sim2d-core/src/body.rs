//! Rigid bodies owned by a [`World`](crate::World).

use nalgebra::{Point2, Vector2};
use sim2d_types::{BodyId, BodyType, ConstraintId, MassProperties, Pose, ShapeId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cross product of a scalar angular velocity with a vector: `w × r`.
#[inline]
pub(crate) fn cross_sv(w: f64, r: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-w * r.y, w * r.x)
}

/// 2D cross product `a × b`.
#[inline]
pub(crate) fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Idle bookkeeping used by the sleep manager.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SleepState {
    /// Seconds the body has spent below the idle energy threshold.
    pub idle_time: f64,
    /// Root body of the sleeping component this body belongs to.
    pub root: Option<BodyId>,
}

/// Relative slack when comparing accumulated idle time against a threshold.
///
/// Summing `dt` step by step drifts below the exact product, so sixty steps
/// of `1/60` must still count as one full second.
const IDLE_TIME_TOLERANCE: f64 = 1e-9;

impl SleepState {
    /// Whether the body has been idle for at least `threshold` seconds.
    #[must_use]
    pub fn idle_for(&self, threshold: f64) -> bool {
        self.idle_time >= threshold - threshold.abs() * IDLE_TIME_TOLERANCE
    }
}

/// A rigid body in the simulation world.
///
/// The pose is the position of the center of mass; shapes are attached in
/// body-local coordinates relative to it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Body {
    /// Unique identifier.
    pub id: BodyId,
    /// Optional name for debugging.
    pub name: Option<String>,
    body_type: BodyType,
    mass_props: MassProperties,
    inv_mass: f64,
    inv_moment: f64,
    pub(crate) pose: Pose,
    pub(crate) velocity: Vector2<f64>,
    pub(crate) angular_velocity: f64,
    pub(crate) force: Vector2<f64>,
    pub(crate) torque: f64,
    /// Position-correction velocity, zeroed after every position update.
    pub(crate) bias_velocity: Vector2<f64>,
    pub(crate) bias_angular_velocity: f64,
    pub(crate) sleep: SleepState,
    pub(crate) shapes: Vec<ShapeId>,
    pub(crate) constraints: Vec<ConstraintId>,
    /// Arbiter slots touching this body in the current contact graph.
    pub(crate) arbiters: Vec<usize>,
}

impl Body {
    /// Create a new dynamic body.
    #[must_use]
    pub fn new(id: BodyId, pose: Pose, mass_props: MassProperties) -> Self {
        Self {
            id,
            name: None,
            body_type: BodyType::Dynamic,
            inv_mass: mass_props.inverse_mass(),
            inv_moment: mass_props.inverse_moment(),
            mass_props,
            pose,
            velocity: Vector2::zeros(),
            angular_velocity: 0.0,
            force: Vector2::zeros(),
            torque: 0.0,
            bias_velocity: Vector2::zeros(),
            bias_angular_velocity: 0.0,
            sleep: SleepState::default(),
            shapes: Vec::new(),
            constraints: Vec::new(),
            arbiters: Vec::new(),
        }
    }

    /// Create a static (immovable) body.
    #[must_use]
    pub fn new_static(id: BodyId, pose: Pose) -> Self {
        Self {
            body_type: BodyType::Static,
            ..Self::new(id, pose, MassProperties::infinite())
        }
    }

    /// Create a kinematic body, moved only by its velocity.
    #[must_use]
    pub fn new_kinematic(id: BodyId, pose: Pose) -> Self {
        Self {
            body_type: BodyType::Kinematic,
            ..Self::new(id, pose, MassProperties::infinite())
        }
    }

    /// Set the body name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the initial linear velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: Vector2<f64>) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set the initial angular velocity.
    #[must_use]
    pub fn with_angular_velocity(mut self, angular_velocity: f64) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    /// The body type.
    #[must_use]
    pub const fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// Whether this is a dynamic body.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    /// Whether this is a static body.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.body_type == BodyType::Static
    }

    /// Whether this is a kinematic body.
    #[must_use]
    pub fn is_kinematic(&self) -> bool {
        self.body_type == BodyType::Kinematic
    }

    /// Whether the body belongs to a sleeping component.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.sleep.root.is_some()
    }

    /// Mass properties.
    #[must_use]
    pub const fn mass_properties(&self) -> MassProperties {
        self.mass_props
    }

    /// Mass (infinite for static and kinematic bodies).
    #[must_use]
    pub const fn mass(&self) -> f64 {
        self.mass_props.mass
    }

    /// Inverse mass, zero for infinite mass.
    #[must_use]
    pub const fn inverse_mass(&self) -> f64 {
        self.inv_mass
    }

    /// Inverse moment of inertia, zero for infinite moment.
    #[must_use]
    pub const fn inverse_moment(&self) -> f64 {
        self.inv_moment
    }

    /// Current pose.
    #[must_use]
    pub const fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Position of the center of mass.
    #[must_use]
    pub const fn position(&self) -> Point2<f64> {
        self.pose.position
    }

    /// Rotation angle in radians.
    #[must_use]
    pub const fn angle(&self) -> f64 {
        self.pose.angle
    }

    /// Linear velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vector2<f64> {
        self.velocity
    }

    /// Angular velocity (rad/s, counter-clockwise).
    #[must_use]
    pub const fn angular_velocity(&self) -> f64 {
        self.angular_velocity
    }

    /// Accumulated force, cleared after each velocity update.
    #[must_use]
    pub const fn force(&self) -> Vector2<f64> {
        self.force
    }

    /// Accumulated torque, cleared after each velocity update.
    #[must_use]
    pub const fn torque(&self) -> f64 {
        self.torque
    }

    /// Seconds spent idle.
    #[must_use]
    pub const fn idle_time(&self) -> f64 {
        self.sleep.idle_time
    }

    /// Shapes attached to this body.
    #[must_use]
    pub fn shapes(&self) -> &[ShapeId] {
        &self.shapes
    }

    /// Constraints attached to this body.
    #[must_use]
    pub fn constraints(&self) -> &[ConstraintId] {
        &self.constraints
    }

    /// Set the linear velocity. Has no effect on static bodies.
    ///
    /// This does not wake a sleeping body; use [`World::set_velocity`](crate::World::set_velocity) for that.
    pub fn set_velocity(&mut self, velocity: Vector2<f64>) {
        if !self.is_static() {
            self.velocity = velocity;
        }
    }

    /// Set the angular velocity. Has no effect on static bodies.
    pub fn set_angular_velocity(&mut self, angular_velocity: f64) {
        if !self.is_static() {
            self.angular_velocity = angular_velocity;
        }
    }

    /// Velocity of a world-space point rigidly attached to the body.
    #[must_use]
    pub fn velocity_at_world_point(&self, point: &Point2<f64>) -> Vector2<f64> {
        let r = point - self.pose.position;
        self.velocity + cross_sv(self.angular_velocity, &r)
    }

    /// Accumulate a force applied at a world-space point.
    pub fn apply_force_at_world_point(&mut self, force: Vector2<f64>, point: &Point2<f64>) {
        if self.is_dynamic() {
            self.force += force;
            let r = point - self.pose.position;
            self.torque += cross(&r, &force);
        }
    }

    /// Apply an impulse at a world-space point, changing velocity immediately.
    pub fn apply_impulse_at_world_point(&mut self, impulse: Vector2<f64>, point: &Point2<f64>) {
        let r = point - self.pose.position;
        self.apply_impulse(&impulse, &r);
    }

    /// Kinetic energy `½mv² + ½Iω²`.
    #[must_use]
    pub fn kinetic_energy(&self) -> f64 {
        if !self.is_dynamic() {
            return 0.0;
        }
        0.5 * self.mass_props.mass * self.velocity.norm_squared()
            + 0.5 * self.mass_props.moment * self.angular_velocity * self.angular_velocity
    }

    /// Check that pose and velocities are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.pose.is_finite()
            && self.velocity.iter().all(|v| v.is_finite())
            && self.angular_velocity.is_finite()
    }

    /// Change the pose. Shapes are re-cached by the world.
    pub(crate) fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    /// `v += j/m`, `ω += (r × j)/I`.
    #[inline]
    pub(crate) fn apply_impulse(&mut self, j: &Vector2<f64>, r: &Vector2<f64>) {
        self.velocity += j * self.inv_mass;
        self.angular_velocity += self.inv_moment * cross(r, j);
    }

    /// Same as [`Self::apply_impulse`] for the position-correction channel.
    #[inline]
    pub(crate) fn apply_bias_impulse(&mut self, j: &Vector2<f64>, r: &Vector2<f64>) {
        self.bias_velocity += j * self.inv_mass;
        self.bias_angular_velocity += self.inv_moment * cross(r, j);
    }

    /// Advance the pose with the current real plus bias velocity, then drop the bias.
    pub(crate) fn integrate_position(&mut self, dt: f64) {
        self.pose.position += (self.velocity + self.bias_velocity) * dt;
        self.pose.angle += (self.angular_velocity + self.bias_angular_velocity) * dt;
        self.bias_velocity = Vector2::zeros();
        self.bias_angular_velocity = 0.0;
    }

    /// Apply gravity, accumulated forces and damping, then clear the forces.
    pub(crate) fn integrate_velocity(&mut self, gravity: &Vector2<f64>, damping: f64, dt: f64) {
        if !self.is_dynamic() {
            return;
        }
        self.velocity = self.velocity * damping + (gravity + self.force * self.inv_mass) * dt;
        self.angular_velocity = self.angular_velocity * damping + self.torque * self.inv_moment * dt;
        self.force = Vector2::zeros();
        self.torque = 0.0;
    }

    /// `mv² + Iω²`, compared against `m·v_idle²` by the sleep manager.
    pub(crate) fn idle_energy(&self) -> f64 {
        let vsq = self.velocity.norm_squared();
        let wsq = self.angular_velocity * self.angular_velocity;
        let linear = if vsq > 0.0 { vsq * self.mass_props.mass } else { 0.0 };
        let angular = if wsq > 0.0 { wsq * self.mass_props.moment } else { 0.0 };
        linear + angular
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn disc_at(x: f64, y: f64) -> Body {
        Body::new(
            BodyId::new(1),
            Pose::from_position(Point2::new(x, y)),
            MassProperties::disc(2.0, 1.0),
        )
    }

    #[test]
    fn test_idle_for_absorbs_summation_drift() {
        let dt = 1.0 / 60.0;
        let mut state = SleepState::default();
        for _ in 0..29 {
            state.idle_time += dt;
        }
        assert!(!state.idle_for(0.5));

        state.idle_time += dt;
        assert!(state.idle_time < 0.5);
        assert!(state.idle_for(0.5));
        assert!(SleepState::default().idle_for(0.0));
    }

    #[test]
    fn test_impulse_at_point() {
        let mut body = disc_at(0.0, 0.0);
        body.apply_impulse_at_world_point(Vector2::new(0.0, 2.0), &Point2::new(1.0, 0.0));

        assert_relative_eq!(body.velocity(), Vector2::new(0.0, 1.0));
        // r × j = 1 * 2, moment = 1
        assert_relative_eq!(body.angular_velocity(), 2.0);
    }

    #[test]
    fn test_static_body_ignores_impulses() {
        let mut body = Body::new_static(BodyId::new(2), Pose::identity());
        body.apply_impulse_at_world_point(Vector2::new(5.0, 0.0), &Point2::new(0.0, 1.0));
        body.set_velocity(Vector2::new(1.0, 1.0));

        assert_eq!(body.velocity(), Vector2::zeros());
        assert_eq!(body.angular_velocity(), 0.0);
        assert_eq!(body.inverse_mass(), 0.0);
    }

    #[test]
    fn test_integrate_velocity_applies_gravity_and_clears_forces() {
        let mut body = disc_at(0.0, 0.0);
        body.apply_force_at_world_point(Vector2::new(4.0, 0.0), &Point2::origin());
        body.integrate_velocity(&Vector2::new(0.0, -10.0), 1.0, 0.5);

        assert_relative_eq!(body.velocity(), Vector2::new(1.0, -5.0));
        assert_eq!(body.force(), Vector2::zeros());
    }

    #[test]
    fn test_kinematic_velocity_untouched_by_gravity() {
        let mut body = Body::new_kinematic(BodyId::new(3), Pose::identity())
            .with_velocity(Vector2::new(1.0, 0.0));
        body.integrate_velocity(&Vector2::new(0.0, -10.0), 1.0, 0.1);
        body.integrate_position(0.1);

        assert_relative_eq!(body.velocity(), Vector2::new(1.0, 0.0));
        assert_relative_eq!(body.position(), Point2::new(0.1, 0.0));
    }

    #[test]
    fn test_bias_velocity_cleared_after_position_update() {
        let mut body = disc_at(0.0, 0.0);
        body.apply_bias_impulse(&Vector2::new(2.0, 0.0), &Vector2::zeros());
        body.integrate_position(1.0);

        assert_relative_eq!(body.position(), Point2::new(1.0, 0.0));
        assert_eq!(body.bias_velocity, Vector2::zeros());
        assert_eq!(body.velocity(), Vector2::zeros());
    }

    #[test]
    fn test_kinetic_energy() {
        let body = disc_at(0.0, 0.0)
            .with_velocity(Vector2::new(3.0, 0.0))
            .with_angular_velocity(2.0);
        // ½·2·9 + ½·1·4
        assert_relative_eq!(body.kinetic_energy(), 11.0);
    }
}
