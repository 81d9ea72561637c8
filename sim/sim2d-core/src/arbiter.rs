//! Persistent contact state for a pair of touching shapes.
//!
//! An [`Arbiter`] lives in the world's cache across steps, keyed by the
//! unordered [`ShapePair`]. Each step the narrow phase refreshes its contacts
//! through [`Arbiter::update`] and the solver runs it through [`ContactSolver`].
//!
//! ```text
//!        collide()                 no contact for 1 step
//!  (new) ──────────► FirstCollision ──────────────────────► Cached
//!                         │   ▲                               │
//!                  solved │   └──── contact again ────────────┘
//!                         ▼
//!                      Normal ───── begin/pre_solve false ──► Ignore
//! ```
//!
//! A shape removal moves any live arbiter to `Invalidated` before it is
//! discarded. Cached arbiters are evicted once they have gone
//! `collision_persistence` steps without contact.

use std::hash::{Hash, Hasher};

use nalgebra::{Point2, Vector2};
use sim2d_types::{BodyId, ShapeId};

use crate::body::Body;
use crate::collision::{hash_pair, CollisionInfo, MAX_CONTACTS_PER_ARBITER};
use crate::contact_buffer::{ContactRing, ContactStorage};
use crate::handler::HandlerBinding;
use crate::shape::{perp, Shape};
use crate::solver::{
    apply_bias_impulses, apply_impulses, k_scalar, recip_or_zero, relative_bias_velocity,
    relative_velocity, rotate, Solve, SolverStep,
};

/// Solver state for one contact point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Contact {
    /// Contact point on A relative to A's center of mass.
    pub(crate) r1: Vector2<f64>,
    /// Contact point on B relative to B's center of mass.
    pub(crate) r2: Vector2<f64>,
    pub(crate) n_mass: f64,
    pub(crate) t_mass: f64,
    pub(crate) bounce: f64,
    /// Accumulated normal impulse.
    pub(crate) jn_acc: f64,
    /// Accumulated tangent impulse.
    pub(crate) jt_acc: f64,
    /// Accumulated bias impulse.
    pub(crate) j_bias: f64,
    pub(crate) bias: f64,
    /// Feature-pair hash from the narrow phase.
    pub(crate) hash: u64,
}

impl Contact {
    /// Accumulated normal impulse.
    #[must_use]
    pub const fn normal_impulse(&self) -> f64 {
        self.jn_acc
    }

    /// Accumulated friction impulse.
    #[must_use]
    pub const fn tangent_impulse(&self) -> f64 {
        self.jt_acc
    }

    /// Feature-pair hash.
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }
}

/// Lifecycle of an arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArbiterState {
    /// Touching for the first step.
    #[default]
    FirstCollision,
    /// Touching for at least two consecutive steps.
    Normal,
    /// Rejected by a callback; stays rejected until the shapes separate.
    Ignore,
    /// Not touching, kept around for warm starting.
    Cached,
    /// One of the shapes was removed from the world.
    Invalidated,
}

/// Unordered pair of shape ids used as the arbiter cache key.
///
/// `(a, b)` and `(b, a)` hash and compare equal.
#[derive(Debug, Clone, Copy, Eq)]
pub struct ShapePair {
    a: ShapeId,
    b: ShapeId,
}

impl ShapePair {
    /// Create a pair key.
    #[must_use]
    pub const fn new(a: ShapeId, b: ShapeId) -> Self {
        Self { a, b }
    }

    /// The two shapes, in the order given to [`Self::new`].
    #[must_use]
    pub const fn shapes(&self) -> (ShapeId, ShapeId) {
        (self.a, self.b)
    }

    /// Order-independent hash of the pair.
    #[must_use]
    pub const fn hash_value(&self) -> u64 {
        hash_pair(self.a.raw(), self.b.raw())
    }
}

impl PartialEq for ShapePair {
    fn eq(&self, other: &Self) -> bool {
        (self.a == other.a && self.b == other.b) || (self.a == other.b && self.b == other.a)
    }
}

impl Hash for ShapePair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

/// Persistent contact record between two shapes.
#[derive(Debug, Clone)]
pub struct Arbiter {
    pub(crate) shape_a: ShapeId,
    pub(crate) shape_b: ShapeId,
    pub(crate) body_a: BodyId,
    pub(crate) body_b: BodyId,
    /// Pool slots of the two bodies.
    pub(crate) slot_a: usize,
    pub(crate) slot_b: usize,
    pub(crate) contacts: ContactStorage,
    /// Normal pointing from A to B.
    pub(crate) normal: Vector2<f64>,
    pub(crate) restitution: f64,
    pub(crate) friction: f64,
    /// Tangential surface velocity of B relative to A.
    pub(crate) surface_vr: Vector2<f64>,
    pub(crate) handler: HandlerBinding,
    pub(crate) stamp: u64,
    pub(crate) state: ArbiterState,
    /// Whether the arbiter is in the world's pair cache.
    pub(crate) cached: bool,
}

impl Arbiter {
    pub(crate) fn new(a: &Shape, b: &Shape, slot_a: usize, slot_b: usize) -> Self {
        Self {
            shape_a: a.id(),
            shape_b: b.id(),
            body_a: a.body(),
            body_b: b.body(),
            slot_a,
            slot_b,
            contacts: ContactStorage::Empty,
            normal: Vector2::zeros(),
            restitution: 0.0,
            friction: 0.0,
            surface_vr: Vector2::zeros(),
            handler: HandlerBinding::default(),
            stamp: 0,
            state: ArbiterState::FirstCollision,
            cached: true,
        }
    }

    /// Refresh contacts from a narrow-phase result.
    ///
    /// `a` and `b` are the shapes in the order the narrow phase used them.
    /// Each new contact inherits the accumulated impulses of the previous
    /// contact at the same index, if any.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update(
        &mut self,
        info: &CollisionInfo,
        a: &Shape,
        b: &Shape,
        slots: (usize, usize),
        positions: (Point2<f64>, Point2<f64>),
        handler: HandlerBinding,
        ring: &mut ContactRing,
    ) {
        self.shape_a = a.id();
        self.shape_b = b.id();
        self.body_a = a.body();
        self.body_b = b.body();
        (self.slot_a, self.slot_b) = slots;

        let old = self.contacts.get(ring);
        let mut fresh = [Contact::default(); MAX_CONTACTS_PER_ARBITER];
        let points = info.points();
        for (i, (point, contact)) in points.iter().zip(fresh.iter_mut()).enumerate() {
            contact.r1 = point.point_a - positions.0;
            contact.r2 = point.point_b - positions.1;
            contact.hash = point.hash;
            if let Some(previous) = old.get(i) {
                contact.jn_acc = previous.jn_acc;
                contact.jt_acc = previous.jt_acc;
            }
        }
        self.contacts = ContactStorage::Ring(ring.alloc(&fresh[..points.len()]));

        self.normal = info.normal;
        self.restitution = a.material.elasticity * b.material.elasticity;
        self.friction = a.material.friction * b.material.friction;

        let surface_vr = b.material.surface_velocity - a.material.surface_velocity;
        self.surface_vr = surface_vr - info.normal * surface_vr.dot(&info.normal);

        self.handler = handler;

        if self.state == ArbiterState::Cached {
            self.state = ArbiterState::FirstCollision;
        }
    }

    /// Shapes in arbiter order.
    #[must_use]
    pub const fn shapes(&self) -> (ShapeId, ShapeId) {
        (self.shape_a, self.shape_b)
    }

    /// Bodies in arbiter order.
    #[must_use]
    pub const fn bodies(&self) -> (BodyId, BodyId) {
        (self.body_a, self.body_b)
    }

    /// Cache key for this arbiter.
    #[must_use]
    pub const fn pair(&self) -> ShapePair {
        ShapePair::new(self.shape_a, self.shape_b)
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ArbiterState {
        self.state
    }

    /// Collision normal from A to B.
    #[must_use]
    pub const fn normal(&self) -> Vector2<f64> {
        self.normal
    }

    /// Combined friction coefficient.
    #[must_use]
    pub const fn friction(&self) -> f64 {
        self.friction
    }

    /// Combined restitution.
    #[must_use]
    pub const fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Step of the last contact.
    #[must_use]
    pub const fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Whether this is the first step of a touching episode.
    #[must_use]
    pub fn is_first_contact(&self) -> bool {
        self.state == ArbiterState::FirstCollision
    }

    /// The other body of the arbiter.
    pub(crate) fn other_slot(&self, slot: usize) -> usize {
        if self.slot_a == slot {
            self.slot_b
        } else {
            self.slot_a
        }
    }

    /// Copy of the current contacts, so callbacks can read them while the
    /// arbiter itself is borrowed mutably.
    pub(crate) fn contact_snapshot(&self, ring: &ContactRing) -> ContactSnapshot {
        let mut snapshot = ContactSnapshot::default();
        for (slot, contact) in snapshot.contacts.iter_mut().zip(self.contacts.get(ring)) {
            *slot = *contact;
            snapshot.len += 1;
        }
        snapshot
    }

    /// Borrow the solver view of this arbiter.
    pub(crate) fn solver<'a>(&'a mut self, ring: &'a mut ContactRing) -> ContactSolver<'a> {
        ContactSolver {
            normal: self.normal,
            restitution: self.restitution,
            friction: self.friction,
            surface_vr: self.surface_vr,
            first_contact: self.state == ArbiterState::FirstCollision,
            contacts: self.contacts.get_mut(ring),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ContactSnapshot {
    contacts: [Contact; MAX_CONTACTS_PER_ARBITER],
    len: usize,
}

impl std::ops::Deref for ContactSnapshot {
    type Target = [Contact];

    fn deref(&self) -> &[Contact] {
        &self.contacts[..self.len]
    }
}

/// Contact constraint rows of one arbiter, borrowed for solving.
#[derive(Debug)]
pub struct ContactSolver<'a> {
    normal: Vector2<f64>,
    restitution: f64,
    friction: f64,
    surface_vr: Vector2<f64>,
    first_contact: bool,
    contacts: &'a mut [Contact],
}

impl Solve for ContactSolver<'_> {
    fn pre_step(&mut self, a: &Body, b: &Body, step: &SolverStep) {
        let n = self.normal;
        let body_delta = b.position() - a.position();

        for con in self.contacts.iter_mut() {
            con.n_mass = recip_or_zero(k_scalar(a, b, &con.r1, &con.r2, &n));
            con.t_mass = recip_or_zero(k_scalar(a, b, &con.r1, &con.r2, &perp(&n)));

            let dist = (con.r2 - con.r1 + body_delta).dot(&n);
            con.bias = -step.collision_bias_coef * (dist + step.collision_slop).min(0.0) / step.dt;
            con.j_bias = 0.0;

            con.bounce = relative_velocity(a, b, &con.r1, &con.r2).dot(&n) * self.restitution;
        }
    }

    fn apply_cached_impulse(&mut self, a: &mut Body, b: &mut Body, dt_coef: f64) {
        if self.first_contact {
            return;
        }
        for con in self.contacts.iter() {
            let j = rotate(&self.normal, &Vector2::new(con.jn_acc, con.jt_acc));
            apply_impulses(a, b, &con.r1, &con.r2, &(j * dt_coef));
        }
    }

    fn apply_impulse(&mut self, a: &mut Body, b: &mut Body, _dt: f64) {
        let n = self.normal;
        let t = perp(&n);

        for con in self.contacts.iter_mut() {
            let (r1, r2) = (con.r1, con.r2);

            let vb = relative_bias_velocity(a, b, &r1, &r2);
            let vr = relative_velocity(a, b, &r1, &r2) + self.surface_vr;

            let vbn = vb.dot(&n);
            let vrn = vr.dot(&n);
            let vrt = vr.dot(&t);

            let jbn = (con.bias - vbn) * con.n_mass;
            let jbn_old = con.j_bias;
            con.j_bias = (jbn_old + jbn).max(0.0);

            let jn = -(con.bounce + vrn) * con.n_mass;
            let jn_old = con.jn_acc;
            con.jn_acc = (jn_old + jn).max(0.0);

            let jt_max = self.friction * con.jn_acc;
            let jt = -vrt * con.t_mass;
            let jt_old = con.jt_acc;
            con.jt_acc = (jt_old + jt).clamp(-jt_max, jt_max);

            apply_bias_impulses(a, b, &r1, &r2, &(n * (con.j_bias - jbn_old)));
            apply_impulses(
                a,
                b,
                &r1,
                &r2,
                &rotate(&n, &Vector2::new(con.jn_acc - jn_old, con.jt_acc - jt_old)),
            );
        }
    }
}
