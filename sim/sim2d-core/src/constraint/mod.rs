//! Joints between pairs of bodies.
//!
//! A [`Constraint`] carries the parameters shared by every joint kind and a
//! [`JointKind`] with the kind-specific solver state. Constraints are solved
//! together with contacts through the [`Solve`] protocol.

mod pivot;

pub use pivot::PivotJoint;

use nalgebra::Point2;
use sim2d_types::{default_error_bias, BodyId, ConstraintId};

use crate::body::Body;
use crate::handler::CallbackContext;
use crate::solver::{Solve, SolverStep};

/// Callback run before or after a constraint is solved.
pub type ConstraintCallback = Box<dyn FnMut(&mut ConstraintParams, &mut CallbackContext<'_>)>;

/// Parameters shared by all joint kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintParams {
    /// Largest force the joint may apply.
    pub max_force: f64,
    /// Largest speed at which joint error is corrected.
    pub max_bias: f64,
    /// Fraction of joint error left after one second.
    pub error_bias: f64,
    /// Whether the two bodies still collide with each other.
    pub collide_bodies: bool,
}

impl Default for ConstraintParams {
    fn default() -> Self {
        Self {
            max_force: f64::INFINITY,
            max_bias: f64::INFINITY,
            error_bias: default_error_bias(),
            collide_bodies: true,
        }
    }
}

/// Kind-specific joint state.
#[derive(Debug, Clone, PartialEq)]
pub enum JointKind {
    /// Pins an anchor on each body together.
    Pivot(PivotJoint),
}

impl From<PivotJoint> for JointKind {
    fn from(joint: PivotJoint) -> Self {
        Self::Pivot(joint)
    }
}

/// A joint between two bodies.
pub struct Constraint {
    pub(crate) id: ConstraintId,
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    /// Pool slots of the two bodies, set when added to a world.
    pub(crate) slot_a: usize,
    pub(crate) slot_b: usize,
    /// Shared joint parameters.
    pub params: ConstraintParams,
    joint: JointKind,
    pre_solve: Option<ConstraintCallback>,
    post_solve: Option<ConstraintCallback>,
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraint")
            .field("id", &self.id)
            .field("body_a", &self.body_a)
            .field("body_b", &self.body_b)
            .field("params", &self.params)
            .field("joint", &self.joint)
            .field("pre_solve", &self.pre_solve.is_some())
            .field("post_solve", &self.post_solve.is_some())
            .finish()
    }
}

impl Constraint {
    /// Create a constraint between `body_a` and `body_b`.
    #[must_use]
    pub fn new(body_a: BodyId, body_b: BodyId, joint: impl Into<JointKind>) -> Self {
        Self {
            id: ConstraintId::new(0),
            body_a,
            body_b,
            slot_a: 0,
            slot_b: 0,
            params: ConstraintParams::default(),
            joint: joint.into(),
            pre_solve: None,
            post_solve: None,
        }
    }

    /// Pivot joint with anchors given in each body's local frame.
    #[must_use]
    pub fn pivot(body_a: BodyId, body_b: BodyId, anchor_a: Point2<f64>, anchor_b: Point2<f64>) -> Self {
        Self::new(body_a, body_b, PivotJoint::new(anchor_a, anchor_b))
    }

    /// Limit the force the joint may apply.
    #[must_use]
    pub fn with_max_force(mut self, max_force: f64) -> Self {
        self.params.max_force = max_force;
        self
    }

    /// Limit the speed of error correction.
    #[must_use]
    pub fn with_max_bias(mut self, max_bias: f64) -> Self {
        self.params.max_bias = max_bias;
        self
    }

    /// Set the fraction of error left after one second.
    #[must_use]
    pub fn with_error_bias(mut self, error_bias: f64) -> Self {
        self.params.error_bias = error_bias;
        self
    }

    /// Set whether the jointed bodies collide.
    #[must_use]
    pub fn with_collide_bodies(mut self, collide: bool) -> Self {
        self.params.collide_bodies = collide;
        self
    }

    /// Run `f` before the joint is prepared each step.
    #[must_use]
    pub fn on_pre_solve(
        mut self,
        f: impl FnMut(&mut ConstraintParams, &mut CallbackContext<'_>) + 'static,
    ) -> Self {
        self.pre_solve = Some(Box::new(f));
        self
    }

    /// Run `f` after the solver finishes each step.
    #[must_use]
    pub fn on_post_solve(
        mut self,
        f: impl FnMut(&mut ConstraintParams, &mut CallbackContext<'_>) + 'static,
    ) -> Self {
        self.post_solve = Some(Box::new(f));
        self
    }

    /// Identifier assigned by the world.
    #[must_use]
    pub const fn id(&self) -> ConstraintId {
        self.id
    }

    /// The two jointed bodies.
    #[must_use]
    pub const fn bodies(&self) -> (BodyId, BodyId) {
        (self.body_a, self.body_b)
    }

    /// Kind-specific state.
    #[must_use]
    pub const fn joint(&self) -> &JointKind {
        &self.joint
    }

    /// Mutable kind-specific state.
    pub fn joint_mut(&mut self) -> &mut JointKind {
        &mut self.joint
    }

    /// Magnitude of the impulse applied in the last step.
    #[must_use]
    pub fn impulse(&self) -> f64 {
        match &self.joint {
            JointKind::Pivot(pivot) => pivot.accumulated_impulse().norm(),
        }
    }

    /// Pool slot of the body on the other side from `slot`.
    pub(crate) fn other_slot(&self, slot: usize) -> usize {
        if self.slot_a == slot {
            self.slot_b
        } else {
            self.slot_a
        }
    }

    pub(crate) fn run_pre_solve(&mut self, ctx: &mut CallbackContext<'_>) {
        if let Some(f) = self.pre_solve.as_mut() {
            f(&mut self.params, ctx);
        }
    }

    pub(crate) fn run_post_solve(&mut self, ctx: &mut CallbackContext<'_>) {
        if let Some(f) = self.post_solve.as_mut() {
            f(&mut self.params, ctx);
        }
    }
}

impl Solve for Constraint {
    fn pre_step(&mut self, a: &Body, b: &Body, step: &SolverStep) {
        match &mut self.joint {
            JointKind::Pivot(pivot) => pivot.pre_step(&self.params, a, b, step.dt),
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, dt_coef: f64) {
        match &mut self.joint {
            JointKind::Pivot(pivot) => pivot.apply_cached_impulse(a, b, dt_coef),
        }
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body, dt: f64) {
        match &mut self.joint {
            JointKind::Pivot(pivot) => pivot.apply_impulse(&self.params, a, b, dt),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = ConstraintParams::default();
        assert!(params.max_force.is_infinite());
        assert!(params.max_bias.is_infinite());
        assert!(params.collide_bodies);
        assert!(params.error_bias > 0.0 && params.error_bias < 1.0);
    }

    #[test]
    fn test_builder() {
        let c = Constraint::pivot(BodyId::new(1), BodyId::new(2), Point2::origin(), Point2::origin())
            .with_max_force(10.0)
            .with_collide_bodies(false);
        assert_eq!(c.params.max_force, 10.0);
        assert!(!c.params.collide_bodies);
        assert_eq!(c.bodies(), (BodyId::new(1), BodyId::new(2)));
        assert_eq!(c.impulse(), 0.0);
    }

    #[test]
    fn test_other_slot() {
        let mut c = Constraint::pivot(BodyId::new(1), BodyId::new(2), Point2::origin(), Point2::origin());
        c.slot_a = 4;
        c.slot_b = 9;
        assert_eq!(c.other_slot(4), 9);
        assert_eq!(c.other_slot(9), 4);
    }
}
