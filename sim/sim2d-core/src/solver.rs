//! Sequential impulse solver protocol.
//!
//! Contacts and joints share the same three phases:
//!
//! 1. [`Solve::pre_step`] computes anchors, effective masses and the bias
//!    velocity that will remove positional error.
//! 2. [`Solve::apply_cached_impulse`] re-applies last step's accumulated
//!    impulse, scaled by the ratio of the two timesteps (warm starting).
//! 3. [`Solve::apply_impulse`] runs once per solver iteration, clamping the
//!    accumulated impulse and applying only the change.

use nalgebra::{Matrix2, Vector2};

use crate::body::{cross, cross_sv, Body};

/// Per-step solver inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverStep {
    /// Timestep length.
    pub dt: f64,
    /// Allowed overlap before contacts push back.
    pub collision_slop: f64,
    /// Fraction of contact overlap removed this step.
    pub collision_bias_coef: f64,
}

/// The three-phase protocol shared by contacts and joints.
pub trait Solve {
    /// Prepare for solving with the current body poses.
    fn pre_step(&mut self, a: &Body, b: &Body, step: &SolverStep);

    /// Warm start with last step's accumulated impulse scaled by `dt_coef`.
    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, dt_coef: f64);

    /// One solver iteration.
    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body, dt: f64);
}

/// `1/x`, or zero when `x` is zero or not finite.
#[inline]
pub(crate) fn recip_or_zero(x: f64) -> f64 {
    if x != 0.0 && x.is_finite() {
        1.0 / x
    } else {
        0.0
    }
}

/// Rotate `v` by the complex number `n`: `n·v.x + perp(n)·v.y`.
#[inline]
pub(crate) fn rotate(n: &Vector2<f64>, v: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(n.x * v.x - n.y * v.y, n.x * v.y + n.y * v.x)
}

/// Clamp the length of `v` to `max`.
#[inline]
pub(crate) fn clamp_length(v: Vector2<f64>, max: f64) -> Vector2<f64> {
    let len_sq = v.norm_squared();
    if len_sq > max * max {
        v * (max / len_sq.sqrt())
    } else {
        v
    }
}

/// Velocity of the B anchor relative to the A anchor.
#[inline]
pub(crate) fn relative_velocity(
    a: &Body,
    b: &Body,
    r1: &Vector2<f64>,
    r2: &Vector2<f64>,
) -> Vector2<f64> {
    let v1 = a.velocity + cross_sv(a.angular_velocity, r1);
    let v2 = b.velocity + cross_sv(b.angular_velocity, r2);
    v2 - v1
}

/// Relative bias velocity of the two anchors.
#[inline]
pub(crate) fn relative_bias_velocity(
    a: &Body,
    b: &Body,
    r1: &Vector2<f64>,
    r2: &Vector2<f64>,
) -> Vector2<f64> {
    let v1 = a.bias_velocity + cross_sv(a.bias_angular_velocity, r1);
    let v2 = b.bias_velocity + cross_sv(b.bias_angular_velocity, r2);
    v2 - v1
}

/// Apply `j` to B and `-j` to A.
#[inline]
pub(crate) fn apply_impulses(
    a: &mut Body,
    b: &mut Body,
    r1: &Vector2<f64>,
    r2: &Vector2<f64>,
    j: &Vector2<f64>,
) {
    a.apply_impulse(&-j, r1);
    b.apply_impulse(j, r2);
}

/// Apply `j` to B and `-j` to A in the bias channel.
#[inline]
pub(crate) fn apply_bias_impulses(
    a: &mut Body,
    b: &mut Body,
    r1: &Vector2<f64>,
    r2: &Vector2<f64>,
    j: &Vector2<f64>,
) {
    a.apply_bias_impulse(&-j, r1);
    b.apply_bias_impulse(j, r2);
}

/// Inverse effective mass of both bodies along direction `n`.
#[inline]
pub(crate) fn k_scalar(a: &Body, b: &Body, r1: &Vector2<f64>, r2: &Vector2<f64>, n: &Vector2<f64>) -> f64 {
    let k_body = |body: &Body, r: &Vector2<f64>| {
        let rcn = cross(r, n);
        body.inverse_mass() + body.inverse_moment() * rcn * rcn
    };
    let value = k_body(a, r1) + k_body(b, r2);
    debug_assert!(value >= 0.0, "negative effective mass");
    value
}

/// Effective mass tensor for a point-to-point constraint.
///
/// Returns the zero matrix when both bodies have infinite mass.
pub(crate) fn k_tensor(a: &Body, b: &Body, r1: &Vector2<f64>, r2: &Vector2<f64>) -> Matrix2<f64> {
    let m_sum = a.inverse_mass() + b.inverse_mass();
    let mut k = Matrix2::identity() * m_sum;

    for (body, r) in [(a, r1), (b, r2)] {
        let i_inv = body.inverse_moment();
        let xsq = r.x * r.x * i_inv;
        let ysq = r.y * r.y * i_inv;
        let nxy = -r.x * r.y * i_inv;
        k += Matrix2::new(ysq, nxy, nxy, xsq);
    }

    k.try_inverse().unwrap_or_else(Matrix2::zeros)
}

/// `1 - bias^dt`, clamped to a non-negative value.
#[inline]
pub(crate) fn bias_coef(error_bias: f64, dt: f64) -> f64 {
    sim2d_types::bias_coefficient(error_bias, dt).max(0.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point2;
    use sim2d_types::{BodyId, MassProperties, Pose};

    fn disc(id: u64, x: f64) -> Body {
        Body::new(
            BodyId::new(id),
            Pose::from_position(Point2::new(x, 0.0)),
            MassProperties::disc(1.0, 1.0),
        )
    }

    #[test]
    fn test_rotate_matches_complex_multiplication() {
        let n = Vector2::new(0.0, 1.0);
        assert_relative_eq!(rotate(&n, &Vector2::new(2.0, 0.0)), Vector2::new(0.0, 2.0));
        assert_relative_eq!(rotate(&n, &Vector2::new(0.0, 1.0)), Vector2::new(-1.0, 0.0));
    }

    #[test]
    fn test_clamp_length() {
        assert_relative_eq!(clamp_length(Vector2::new(3.0, 4.0), 1.0), Vector2::new(0.6, 0.8));
        assert_relative_eq!(clamp_length(Vector2::new(3.0, 4.0), f64::INFINITY), Vector2::new(3.0, 4.0));
    }

    #[test]
    fn test_k_scalar_through_centers() {
        let (a, b) = (disc(1, 0.0), disc(2, 2.0));
        let n = Vector2::new(1.0, 0.0);
        // Anchors on the line of action add no rotational term.
        let k = k_scalar(&a, &b, &Vector2::new(1.0, 0.0), &Vector2::new(-1.0, 0.0), &n);
        assert_relative_eq!(k, 2.0);
    }

    #[test]
    fn test_k_tensor_inverts_effective_mass() {
        let (a, b) = (disc(1, 0.0), disc(2, 2.0));
        let r1 = Vector2::new(1.0, 0.5);
        let r2 = Vector2::new(-1.0, 0.25);
        let k = k_tensor(&a, &b, &r1, &r2);

        // Applying the impulse k·dv must produce exactly dv.
        let dv = Vector2::new(0.3, -0.7);
        let j = k * dv;
        let (mut a, mut b) = (a, b);
        apply_impulses(&mut a, &mut b, &r1, &r2, &j);
        assert_relative_eq!(relative_velocity(&a, &b, &r1, &r2), dv, epsilon = 1e-12);
    }

    #[test]
    fn test_k_tensor_two_static_bodies() {
        let a = Body::new_static(BodyId::new(1), Pose::identity());
        let b = Body::new_static(BodyId::new(2), Pose::identity());
        let k = k_tensor(&a, &b, &Vector2::zeros(), &Vector2::zeros());
        assert_eq!(k, Matrix2::zeros());
    }

    #[test]
    fn test_recip_or_zero() {
        assert_eq!(recip_or_zero(4.0), 0.25);
        assert_eq!(recip_or_zero(0.0), 0.0);
        assert_eq!(recip_or_zero(f64::INFINITY), 0.0);
    }
}
