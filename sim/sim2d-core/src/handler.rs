//! Collision handlers and the registry that resolves them.
//!
//! A handler receives four events for a pair of collision types:
//!
//! | Event        | When                                       | Return value        |
//! |--------------|--------------------------------------------|---------------------|
//! | `begin`      | first step two shapes touch                | `false` ignores the pair until they separate |
//! | `pre_solve`  | every touching step, before solving        | `false` skips solving this step |
//! | `post_solve` | every solved step, impulses available      | -                   |
//! | `separate`   | first step they stop touching, or removal  | -                   |
//!
//! Lookup for an ordered type pair `(a, b)` tries the handler registered for
//! `(a, b)`, then `(b, a)` with the view swapped, then falls back to the
//! default slot. The default slot calls the wildcard handler of each type
//! (each seeing its own shape first) and then the world's default handler.

use hashbrown::HashMap;
use nalgebra::{Point2, Vector2};
use sim2d_types::{BodyId, CollisionType, ShapeId};
use tracing::debug;

use crate::arbiter::{Arbiter, ArbiterState, Contact};
use crate::body::Body;
use crate::pool::Pool;
use crate::post_step::{PostStepFn, PostStepQueue};
use crate::solver::rotate;

/// User callbacks for a pair of collision types.
///
/// Every method has a no-op default, so implementations override only what
/// they need.
pub trait CollisionHandler {
    /// Two shapes started touching. Return `false` to ignore the pair until
    /// they separate.
    fn begin(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) -> bool {
        let _ = (arbiter, ctx);
        true
    }

    /// Called every touching step before solving. Return `false` to skip
    /// the contact for this step only.
    fn pre_solve(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) -> bool {
        let _ = (arbiter, ctx);
        true
    }

    /// Called after the solver with final impulses.
    fn post_solve(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) {
        let _ = (arbiter, ctx);
    }

    /// Called once when the shapes stop touching or one of them is removed.
    fn separate(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) {
        let _ = (arbiter, ctx);
    }
}

type BoolCallback = Box<dyn FnMut(&mut ArbiterRef<'_>, &mut CallbackContext<'_>) -> bool>;
type UnitCallback = Box<dyn FnMut(&mut ArbiterRef<'_>, &mut CallbackContext<'_>)>;

/// A [`CollisionHandler`] assembled from closures.
///
/// ```
/// use sim2d_core::handler::CallbackHandler;
///
/// let handler = CallbackHandler::new()
///     .on_begin(|arbiter, _ctx| !arbiter.is_first_contact())
///     .on_separate(|_arbiter, _ctx| {});
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    begin: Option<BoolCallback>,
    pre_solve: Option<BoolCallback>,
    post_solve: Option<UnitCallback>,
    separate: Option<UnitCallback>,
}

impl CallbackHandler {
    /// A handler that does nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the begin callback.
    #[must_use]
    pub fn on_begin(
        mut self,
        f: impl FnMut(&mut ArbiterRef<'_>, &mut CallbackContext<'_>) -> bool + 'static,
    ) -> Self {
        self.begin = Some(Box::new(f));
        self
    }

    /// Set the pre-solve callback.
    #[must_use]
    pub fn on_pre_solve(
        mut self,
        f: impl FnMut(&mut ArbiterRef<'_>, &mut CallbackContext<'_>) -> bool + 'static,
    ) -> Self {
        self.pre_solve = Some(Box::new(f));
        self
    }

    /// Set the post-solve callback.
    #[must_use]
    pub fn on_post_solve(
        mut self,
        f: impl FnMut(&mut ArbiterRef<'_>, &mut CallbackContext<'_>) + 'static,
    ) -> Self {
        self.post_solve = Some(Box::new(f));
        self
    }

    /// Set the separate callback.
    #[must_use]
    pub fn on_separate(
        mut self,
        f: impl FnMut(&mut ArbiterRef<'_>, &mut CallbackContext<'_>) + 'static,
    ) -> Self {
        self.separate = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("begin", &self.begin.is_some())
            .field("pre_solve", &self.pre_solve.is_some())
            .field("post_solve", &self.post_solve.is_some())
            .field("separate", &self.separate.is_some())
            .finish()
    }
}

impl CollisionHandler for CallbackHandler {
    fn begin(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) -> bool {
        self.begin.as_mut().map_or(true, |f| f(arbiter, ctx))
    }

    fn pre_solve(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) -> bool {
        self.pre_solve.as_mut().map_or(true, |f| f(arbiter, ctx))
    }

    fn post_solve(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) {
        if let Some(f) = self.post_solve.as_mut() {
            f(arbiter, ctx);
        }
    }

    fn separate(&mut self, arbiter: &mut ArbiterRef<'_>, ctx: &mut CallbackContext<'_>) {
        if let Some(f) = self.separate.as_mut() {
            f(arbiter, ctx);
        }
    }
}

/// A contact point as seen from a callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPointInfo {
    /// Point on the first shape's surface.
    pub point_a: Point2<f64>,
    /// Point on the second shape's surface.
    pub point_b: Point2<f64>,
    /// Separation along the normal, negative when overlapping.
    pub distance: f64,
}

/// Contact points and normal as seen from a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactPointSet {
    /// Normal pointing from the first shape to the second.
    pub normal: Vector2<f64>,
    /// Up to two points.
    pub points: Vec<ContactPointInfo>,
}

/// Arbiter view handed to collision callbacks.
///
/// The view is oriented for the handler: the shape whose collision type
/// matches the handler's first type is reported first, and the normal points
/// away from it.
#[derive(Debug)]
pub struct ArbiterRef<'a> {
    arbiter: &'a mut Arbiter,
    contacts: &'a [Contact],
    positions: (Point2<f64>, Point2<f64>),
    swapped: bool,
}

impl<'a> ArbiterRef<'a> {
    pub(crate) fn new(
        arbiter: &'a mut Arbiter,
        contacts: &'a [Contact],
        positions: (Point2<f64>, Point2<f64>),
        swapped: bool,
    ) -> Self {
        Self {
            arbiter,
            contacts,
            positions,
            swapped,
        }
    }

    fn orient<T>(&self, pair: (T, T)) -> (T, T) {
        if self.swapped {
            (pair.1, pair.0)
        } else {
            pair
        }
    }

    /// The two shapes, handler order.
    #[must_use]
    pub fn shapes(&self) -> (ShapeId, ShapeId) {
        self.orient(self.arbiter.shapes())
    }

    /// The two bodies, handler order.
    #[must_use]
    pub fn bodies(&self) -> (BodyId, BodyId) {
        self.orient(self.arbiter.bodies())
    }

    /// Normal pointing from the first shape to the second.
    #[must_use]
    pub fn normal(&self) -> Vector2<f64> {
        if self.swapped {
            -self.arbiter.normal
        } else {
            self.arbiter.normal
        }
    }

    /// Number of contact points.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Contact points in world coordinates.
    #[must_use]
    pub fn contact_points(&self) -> ContactPointSet {
        let n = self.arbiter.normal;
        let points = self
            .contacts
            .iter()
            .map(|con| {
                let p1 = self.positions.0 + con.r1;
                let p2 = self.positions.1 + con.r2;
                let (point_a, point_b) = self.orient((p1, p2));
                ContactPointInfo {
                    point_a,
                    point_b,
                    distance: (p2 - p1).dot(&n),
                }
            })
            .collect();
        ContactPointSet {
            normal: self.normal(),
            points,
        }
    }

    /// Impulse applied by the solver this step.
    ///
    /// Only meaningful from `post_solve`.
    #[must_use]
    pub fn total_impulse(&self) -> Vector2<f64> {
        let sum = self.contacts.iter().fold(Vector2::zeros(), |acc, con| {
            acc + rotate(&self.arbiter.normal, &Vector2::new(con.jn_acc, con.jt_acc))
        });
        if self.swapped {
            sum
        } else {
            -sum
        }
    }

    /// Combined friction coefficient.
    #[must_use]
    pub fn friction(&self) -> f64 {
        self.arbiter.friction
    }

    /// Override the friction for this step.
    pub fn set_friction(&mut self, friction: f64) {
        self.arbiter.friction = friction;
    }

    /// Combined restitution.
    #[must_use]
    pub fn restitution(&self) -> f64 {
        self.arbiter.restitution
    }

    /// Override the restitution for this step.
    pub fn set_restitution(&mut self, restitution: f64) {
        self.arbiter.restitution = restitution;
    }

    /// Tangential surface velocity, handler order.
    #[must_use]
    pub fn surface_velocity(&self) -> Vector2<f64> {
        if self.swapped {
            -self.arbiter.surface_vr
        } else {
            self.arbiter.surface_vr
        }
    }

    /// Override the surface velocity for this step.
    pub fn set_surface_velocity(&mut self, velocity: Vector2<f64>) {
        self.arbiter.surface_vr = if self.swapped { -velocity } else { velocity };
    }

    /// Ignore this pair until the shapes separate.
    ///
    /// Returns `false` so a callback can end with `return arbiter.ignore();`.
    pub fn ignore(&mut self) -> bool {
        self.arbiter.state = ArbiterState::Ignore;
        false
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ArbiterState {
        self.arbiter.state
    }

    /// Whether this is the first step of contact.
    #[must_use]
    pub fn is_first_contact(&self) -> bool {
        self.arbiter.state == ArbiterState::FirstCollision
    }

    /// Whether the separate callback was triggered by a shape removal.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.arbiter.state == ArbiterState::Invalidated
    }
}

/// World access available to callbacks while the world is locked.
///
/// Bodies are read-only; structural changes go through
/// [`CallbackContext::add_post_step_callback`].
pub struct CallbackContext<'a> {
    pub(crate) bodies: &'a Pool<Body>,
    pub(crate) body_index: &'a HashMap<BodyId, usize>,
    pub(crate) post_step: &'a mut PostStepQueue,
    pub(crate) activations: &'a mut Vec<BodyId>,
    pub(crate) stamp: u64,
}

impl CallbackContext<'_> {
    /// Look up a body.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.body_index.get(&id).and_then(|&slot| self.bodies.get(slot))
    }

    /// Queue `f` to run once the step finishes.
    ///
    /// Returns `false` if a callback with the same key is already pending;
    /// the new callback is dropped.
    pub fn add_post_step_callback(
        &mut self,
        key: u64,
        f: impl FnOnce(&mut crate::World) + 'static,
    ) -> bool {
        self.post_step.schedule(key, Box::new(f) as PostStepFn)
    }

    /// Wake `body` and its component once the world unlocks.
    pub fn activate(&mut self, body: BodyId) {
        if !self.activations.contains(&body) {
            self.activations.push(body);
        }
    }

    /// Current step stamp.
    #[must_use]
    pub const fn stamp(&self) -> u64 {
        self.stamp
    }
}

impl std::fmt::Debug for CallbackContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("bodies", &self.bodies.len())
            .field("pending_post_step", &self.post_step.len())
            .field("stamp", &self.stamp)
            .finish()
    }
}

/// Which registered handler an arbiter dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum HandlerSlot {
    #[default]
    Default,
    Pair(CollisionType, CollisionType),
}

/// Handler resolution for one arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerBinding {
    pub(crate) slot: HandlerSlot,
    /// The handler's first type belongs to the arbiter's second shape.
    pub(crate) swapped: bool,
    /// Collision types in handler order.
    pub(crate) types: (CollisionType, CollisionType),
}

impl HandlerBinding {
    /// Whether the resolved handler sees the shapes in reverse order.
    #[must_use]
    pub const fn is_swapped(&self) -> bool {
        self.swapped
    }

    /// Whether no pair handler matched.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.slot == HandlerSlot::Default
    }
}

/// Registered collision handlers of a world.
#[derive(Default)]
pub struct HandlerRegistry {
    default: Option<Box<dyn CollisionHandler>>,
    pairs: HashMap<(CollisionType, CollisionType), Box<dyn CollisionHandler>>,
    wildcards: HashMap<CollisionType, Box<dyn CollisionHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pairs: Vec<_> = self.pairs.keys().copied().collect();
        pairs.sort_unstable();
        let mut wildcards: Vec<_> = self.wildcards.keys().copied().collect();
        wildcards.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("default", &self.default.is_some())
            .field("pairs", &pairs)
            .field("wildcards", &wildcards)
            .finish()
    }
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for shapes of types `a` and `b`.
    ///
    /// A wildcard on either side registers a wildcard handler for the other
    /// type; two wildcards replace the default handler. Registering `(b, a)`
    /// replaces an existing `(a, b)` handler.
    pub fn insert(&mut self, a: CollisionType, b: CollisionType, handler: Box<dyn CollisionHandler>) {
        match (a.is_wildcard(), b.is_wildcard()) {
            (true, true) => self.default = Some(handler),
            (false, true) => {
                self.wildcards.insert(a, handler);
            }
            (true, false) => {
                self.wildcards.insert(b, handler);
            }
            (false, false) => {
                self.pairs.remove(&(b, a));
                self.pairs.insert((a, b), handler);
            }
        }
        debug!(a = a.0, b = b.0, "registered collision handler");
    }

    /// Register a handler called for every pair involving type `t` that has
    /// no exact pair handler.
    pub fn insert_wildcard(&mut self, t: CollisionType, handler: Box<dyn CollisionHandler>) {
        self.insert(t, CollisionType::WILDCARD, handler);
    }

    /// Replace the handler for pairs that match nothing else.
    pub fn set_default(&mut self, handler: Box<dyn CollisionHandler>) {
        self.default = Some(handler);
    }

    /// Remove the handler for `(a, b)` in either order.
    pub fn remove(&mut self, a: CollisionType, b: CollisionType) -> bool {
        match (a.is_wildcard(), b.is_wildcard()) {
            (true, true) => self.default.take().is_some(),
            (false, true) => self.wildcards.remove(&a).is_some(),
            (true, false) => self.wildcards.remove(&b).is_some(),
            (false, false) => {
                self.pairs.remove(&(a, b)).is_some() || self.pairs.remove(&(b, a)).is_some()
            }
        }
    }

    /// Whether any handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.pairs.is_empty() && self.wildcards.is_empty()
    }

    /// Resolve the handler for shapes of types `a` then `b`.
    #[must_use]
    pub fn resolve(&self, a: CollisionType, b: CollisionType) -> HandlerBinding {
        if self.pairs.contains_key(&(a, b)) {
            HandlerBinding {
                slot: HandlerSlot::Pair(a, b),
                swapped: false,
                types: (a, b),
            }
        } else if self.pairs.contains_key(&(b, a)) {
            HandlerBinding {
                slot: HandlerSlot::Pair(b, a),
                swapped: true,
                types: (b, a),
            }
        } else {
            HandlerBinding {
                slot: HandlerSlot::Default,
                swapped: false,
                types: (a, b),
            }
        }
    }

    /// Invoke `call` on every handler bound to `binding`, each with the
    /// orientation it expects, and AND the results.
    fn dispatch<F>(&mut self, binding: &HandlerBinding, mut call: F) -> bool
    where
        F: FnMut(&mut dyn CollisionHandler, bool) -> bool,
    {
        match binding.slot {
            HandlerSlot::Pair(a, b) => self
                .pairs
                .get_mut(&(a, b))
                .map_or(true, |h| call(h.as_mut(), binding.swapped)),
            HandlerSlot::Default => {
                let mut result = true;
                let (type_a, type_b) = binding.types;
                if let Some(h) = self.wildcards.get_mut(&type_a) {
                    result &= call(h.as_mut(), binding.swapped);
                }
                if let Some(h) = self.wildcards.get_mut(&type_b) {
                    result &= call(h.as_mut(), !binding.swapped);
                }
                if let Some(h) = self.default.as_mut() {
                    result &= call(h.as_mut(), binding.swapped);
                }
                result
            }
        }
    }

    pub(crate) fn begin(&mut self, event: &mut ArbiterEvent<'_, '_>) -> bool {
        let binding = event.arbiter.handler;
        self.dispatch(&binding, |h, swapped| {
            let (mut arb, ctx) = event.split(swapped);
            h.begin(&mut arb, ctx)
        })
    }

    pub(crate) fn pre_solve(&mut self, event: &mut ArbiterEvent<'_, '_>) -> bool {
        let binding = event.arbiter.handler;
        self.dispatch(&binding, |h, swapped| {
            let (mut arb, ctx) = event.split(swapped);
            h.pre_solve(&mut arb, ctx)
        })
    }

    pub(crate) fn post_solve(&mut self, event: &mut ArbiterEvent<'_, '_>) {
        let binding = event.arbiter.handler;
        self.dispatch(&binding, |h, swapped| {
            let (mut arb, ctx) = event.split(swapped);
            h.post_solve(&mut arb, ctx);
            true
        });
    }

    pub(crate) fn separate(&mut self, event: &mut ArbiterEvent<'_, '_>) {
        let binding = event.arbiter.handler;
        self.dispatch(&binding, |h, swapped| {
            let (mut arb, ctx) = event.split(swapped);
            h.separate(&mut arb, ctx);
            true
        });
    }
}

/// Everything a callback needs, borrowed from disjoint parts of the world.
pub(crate) struct ArbiterEvent<'w, 'a> {
    pub(crate) arbiter: &'a mut Arbiter,
    pub(crate) contacts: &'a [Contact],
    pub(crate) context: &'a mut CallbackContext<'w>,
}

impl<'w> ArbiterEvent<'w, '_> {
    fn split(&mut self, swapped: bool) -> (ArbiterRef<'_>, &mut CallbackContext<'w>) {
        let positions = (
            self.context
                .bodies
                .get(self.arbiter.slot_a)
                .map_or_else(Point2::origin, Body::position),
            self.context
                .bodies
                .get(self.arbiter.slot_b)
                .map_or_else(Point2::origin, Body::position),
        );
        (
            ArbiterRef::new(&mut *self.arbiter, self.contacts, positions, swapped),
            &mut *self.context,
        )
    }
}
