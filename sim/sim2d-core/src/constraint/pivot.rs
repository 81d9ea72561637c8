use nalgebra::{Matrix2, Point2, Vector2};

use crate::body::Body;
use crate::constraint::ConstraintParams;
use crate::solver::{apply_impulses, bias_coef, clamp_length, k_tensor, relative_velocity};

/// Holds an anchor on each body at the same world point.
///
/// Anchors are in body-local coordinates relative to the center of mass.
/// The solver works on both axes at once with a 2x2 effective mass tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotJoint {
    anchor_a: Point2<f64>,
    anchor_b: Point2<f64>,

    r1: Vector2<f64>,
    r2: Vector2<f64>,
    k: Matrix2<f64>,
    j_acc: Vector2<f64>,
    bias: Vector2<f64>,
}

impl PivotJoint {
    /// Create a pivot joint from two local anchors.
    #[must_use]
    pub fn new(anchor_a: Point2<f64>, anchor_b: Point2<f64>) -> Self {
        Self {
            anchor_a,
            anchor_b,
            r1: Vector2::zeros(),
            r2: Vector2::zeros(),
            k: Matrix2::zeros(),
            j_acc: Vector2::zeros(),
            bias: Vector2::zeros(),
        }
    }

    /// Local anchor on body A.
    #[must_use]
    pub const fn anchor_a(&self) -> Point2<f64> {
        self.anchor_a
    }

    /// Local anchor on body B.
    #[must_use]
    pub const fn anchor_b(&self) -> Point2<f64> {
        self.anchor_b
    }

    /// Move the anchor on body A.
    pub fn set_anchor_a(&mut self, anchor: Point2<f64>) {
        self.anchor_a = anchor;
    }

    /// Move the anchor on body B.
    pub fn set_anchor_b(&mut self, anchor: Point2<f64>) {
        self.anchor_b = anchor;
    }

    /// Impulse accumulated over the last step.
    #[must_use]
    pub const fn accumulated_impulse(&self) -> Vector2<f64> {
        self.j_acc
    }

    pub(crate) fn pre_step(&mut self, params: &ConstraintParams, a: &Body, b: &Body, dt: f64) {
        self.r1 = a.pose().transform_vector(&self.anchor_a.coords);
        self.r2 = b.pose().transform_vector(&self.anchor_b.coords);

        self.k = k_tensor(a, b, &self.r1, &self.r2);

        let delta = (b.position() + self.r2) - (a.position() + self.r1);
        self.bias = clamp_length(delta * (-bias_coef(params.error_bias, dt) / dt), params.max_bias);
    }

    pub(crate) fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, dt_coef: f64) {
        apply_impulses(a, b, &self.r1, &self.r2, &(self.j_acc * dt_coef));
    }

    pub(crate) fn apply_impulse(&mut self, params: &ConstraintParams, a: &mut Body, b: &mut Body, dt: f64) {
        let vr = relative_velocity(a, b, &self.r1, &self.r2);

        let j = self.k * (self.bias - vr);
        let j_old = self.j_acc;
        self.j_acc = clamp_length(self.j_acc + j, params.max_force * dt);

        apply_impulses(a, b, &self.r1, &self.r2, &(self.j_acc - j_old));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sim2d_types::{BodyId, MassProperties, Pose};

    const DT: f64 = 1.0 / 60.0;

    fn ground() -> Body {
        Body::new_static(BodyId::new(1), Pose::identity())
    }

    fn ball(x: f64) -> Body {
        Body::new(
            BodyId::new(2),
            Pose::from_position(Point2::new(x, 0.0)),
            MassProperties::disc(1.0, 0.5),
        )
    }

    #[test]
    fn test_pre_step_bias_pulls_anchors_together() {
        let (a, b) = (ground(), ball(1.0));
        let mut joint = PivotJoint::new(Point2::origin(), Point2::origin());
        joint.pre_step(&ConstraintParams::default(), &a, &b, DT);

        // B is one unit to the right of A's anchor: bias points back.
        assert!(joint.bias.x < 0.0);
        assert_relative_eq!(joint.bias.y, 0.0);
    }

    #[test]
    fn test_max_bias_limits_correction_speed() {
        let (a, b) = (ground(), ball(100.0));
        let params = ConstraintParams {
            max_bias: 2.0,
            ..ConstraintParams::default()
        };
        let mut joint = PivotJoint::new(Point2::origin(), Point2::origin());
        joint.pre_step(&params, &a, &b, DT);
        assert_relative_eq!(joint.bias.norm(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unbounded_joint_matches_velocity() {
        let (mut a, mut b) = (ground(), ball(0.0));
        b.set_velocity(Vector2::new(3.0, -1.0));
        let mut joint = PivotJoint::new(Point2::origin(), Point2::origin());
        let params = ConstraintParams::default();

        joint.pre_step(&params, &a, &b, DT);
        for _ in 0..10 {
            joint.apply_impulse(&params, &mut a, &mut b, DT);
        }

        // Anchors coincide, so the joint stops all relative motion.
        assert_relative_eq!(b.velocity(), Vector2::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_impulse_clamped_at_max_force() {
        let (mut a, mut b) = (ground(), ball(0.0));
        b.set_velocity(Vector2::new(50.0, 0.0));
        let params = ConstraintParams {
            max_force: 6.0,
            ..ConstraintParams::default()
        };
        let mut joint = PivotJoint::new(Point2::origin(), Point2::origin());

        joint.pre_step(&params, &a, &b, DT);
        for _ in 0..10 {
            joint.apply_impulse(&params, &mut a, &mut b, DT);
            assert!(joint.accumulated_impulse().norm() <= 6.0 * DT + 1e-12);
        }
        assert_relative_eq!(joint.accumulated_impulse().norm(), 6.0 * DT, epsilon = 1e-12);
        assert_relative_eq!(b.velocity().x, 50.0 - 6.0 * DT, epsilon = 1e-12);
    }

    #[test]
    fn test_cached_impulse_scaled_by_dt_ratio() {
        let (mut a, mut b) = (ground(), ball(0.0));
        let mut joint = PivotJoint::new(Point2::origin(), Point2::origin());
        joint.pre_step(&ConstraintParams::default(), &a, &b, DT);
        joint.j_acc = Vector2::new(1.0, 0.0);

        joint.apply_cached_impulse(&mut a, &mut b, 0.5);
        assert_relative_eq!(b.velocity().x, 0.5);
    }
}
