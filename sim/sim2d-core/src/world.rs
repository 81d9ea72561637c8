//! Simulation world container and entity management.
//!
//! The [`World`] owns bodies, shapes, constraints and the arbiter cache, and
//! guards them with a lock counter: while a step (or a query) is running,
//! structural mutations are rejected with [`SimError::WorldLocked`] and
//! callbacks queue them as post-step callbacks instead. The queue is flushed
//! when the outermost lock is released.
//!
//! Entities live in slot pools and are addressed by their stable ids through
//! hash maps; iteration always follows pool order, so a step never depends on
//! hash ordering.

use hashbrown::HashMap;
use nalgebra::{Point2, Vector2};
use sim2d_types::{
    BodyId, CollisionType, ConstraintId, MassProperties, Pose, Result, ShapeId, SimError,
    SimulationConfig,
};
use tracing::{trace, warn};

use crate::arbiter::{Arbiter, ArbiterState, ShapePair};
use crate::body::Body;
use crate::broad_phase::{Aabb, BroadPhase, SweepAndPrune};
use crate::constraint::{Constraint, PivotJoint};
use crate::contact_buffer::ContactRing;
use crate::handler::{ArbiterEvent, CallbackContext, CollisionHandler, HandlerRegistry};
use crate::pool::Pool;
use crate::post_step::{PostStepFn, PostStepQueue};
use crate::shape::{PointQuery, SegmentQuery, Shape, ShapeFilter};
use crate::sleep::SleepingComponent;

/// The simulation world containing all entities.
#[derive(Debug)]
pub struct World {
    /// Simulation configuration.
    config: SimulationConfig,
    /// Current simulation time.
    pub(crate) time: f64,
    /// Step counter.
    pub(crate) step_count: u64,
    /// Incremented at the start of every step; arbiters remember the last
    /// stamp they touched.
    pub(crate) stamp: u64,
    /// Length of the most recent step.
    pub(crate) current_dt: f64,

    pub(crate) bodies: Pool<Body>,
    pub(crate) body_index: HashMap<BodyId, usize>,
    pub(crate) shapes: Pool<Shape>,
    pub(crate) shape_index: HashMap<ShapeId, usize>,
    pub(crate) constraints: Pool<Constraint>,
    pub(crate) constraint_index: HashMap<ConstraintId, usize>,
    pub(crate) arbiters: Pool<Arbiter>,
    pub(crate) arbiter_cache: HashMap<ShapePair, usize>,

    /// Awake dynamic and kinematic bodies.
    pub(crate) active_bodies: Vec<usize>,
    /// Arbiters solved this step.
    pub(crate) active_arbiters: Vec<usize>,
    /// Constraints whose bodies are awake.
    pub(crate) active_constraints: Vec<usize>,
    pub(crate) sleeping_components: Vec<SleepingComponent>,

    /// Bodies to wake once the world unlocks.
    pub(crate) pending_activations: Vec<BodyId>,
    pub(crate) post_step: PostStepQueue,
    pub(crate) running_post_step: bool,
    pub(crate) lock_count: u32,

    pub(crate) broad_phase: Box<dyn BroadPhase>,
    pub(crate) contacts: ContactRing,
    pub(crate) handlers: HandlerRegistry,

    next_body_id: u64,
    next_shape_id: u64,
    next_constraint_id: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl World {
    /// Create a new empty world with the given configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_broad_phase(config, Box::new(SweepAndPrune::new()))
    }

    /// Create a world with a custom broad phase.
    #[must_use]
    pub fn with_broad_phase(config: SimulationConfig, broad_phase: Box<dyn BroadPhase>) -> Self {
        Self {
            config,
            time: 0.0,
            step_count: 0,
            stamp: 0,
            current_dt: 0.0,
            bodies: Pool::new(),
            body_index: HashMap::new(),
            shapes: Pool::new(),
            shape_index: HashMap::new(),
            constraints: Pool::new(),
            constraint_index: HashMap::new(),
            arbiters: Pool::new(),
            arbiter_cache: HashMap::new(),
            active_bodies: Vec::new(),
            active_arbiters: Vec::new(),
            active_constraints: Vec::new(),
            sleeping_components: Vec::new(),
            pending_activations: Vec::new(),
            post_step: PostStepQueue::new(),
            running_post_step: false,
            lock_count: 0,
            broad_phase,
            contacts: ContactRing::new(),
            handlers: HandlerRegistry::new(),
            next_body_id: 1,
            next_shape_id: 1,
            next_constraint_id: 1,
        }
    }

    /// Get the simulation configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Mutable configuration. Changes apply from the next step.
    pub fn config_mut(&mut self) -> &mut SimulationConfig {
        &mut self.config
    }

    /// Get the current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Get the step count.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Current step stamp.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Get the timestep from configuration.
    #[must_use]
    pub fn timestep(&self) -> f64 {
        self.config.timestep
    }

    /// Whether `max_time` has been reached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.config.max_time.is_some_and(|max| self.time >= max)
    }

    // =========================================================================
    // Locking and Post-Step Callbacks
    // =========================================================================

    /// Whether a step or query is in progress.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_count > 0
    }

    pub(crate) fn lock(&mut self) {
        self.lock_count += 1;
    }

    /// Release one lock level. At zero, deferred activations run, then the
    /// post-step queue if `run_post_step` is set.
    pub(crate) fn unlock(&mut self, run_post_step: bool) {
        debug_assert!(self.lock_count > 0, "world lock underflow");
        self.lock_count = self.lock_count.saturating_sub(1);
        if self.lock_count > 0 {
            return;
        }

        for id in std::mem::take(&mut self.pending_activations) {
            if let Some(&slot) = self.body_index.get(&id) {
                self.activate_slot(slot);
            }
        }

        if run_post_step && !self.running_post_step {
            self.running_post_step = true;
            while let Some(callback) = self.post_step.pop() {
                callback(self);
            }
            self.post_step.finish_flush();
            self.running_post_step = false;
        }
    }

    pub(crate) fn ensure_unlocked(&self, operation: &str) -> Result<()> {
        if self.is_locked() {
            Err(SimError::locked(operation))
        } else {
            Ok(())
        }
    }

    /// Queue `f` to run after the current step.
    ///
    /// Returns `false` if a callback with the same key is already pending.
    /// On an unlocked world the callback waits for the end of the next step.
    pub fn add_post_step_callback(&mut self, key: u64, f: impl FnOnce(&mut Self) + 'static) -> bool {
        if !self.is_locked() && !self.running_post_step {
            warn!(key, "post-step callback added outside of a step; it runs after the next step");
        }
        self.post_step.schedule(key, Box::new(f) as PostStepFn)
    }

    // =========================================================================
    // Collision Handlers
    // =========================================================================

    /// Register a handler for shapes of types `a` and `b`.
    pub fn add_collision_handler(
        &mut self,
        a: CollisionType,
        b: CollisionType,
        handler: impl CollisionHandler + 'static,
    ) {
        self.handlers.insert(a, b, Box::new(handler));
    }

    /// Register a handler for every pair involving type `t` that has no
    /// exact pair handler.
    pub fn add_wildcard_handler(&mut self, t: CollisionType, handler: impl CollisionHandler + 'static) {
        self.handlers.insert_wildcard(t, Box::new(handler));
    }

    /// Replace the handler for pairs that match nothing else.
    pub fn set_default_collision_handler(&mut self, handler: impl CollisionHandler + 'static) {
        self.handlers.set_default(Box::new(handler));
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn remove_collision_handler(&mut self, a: CollisionType, b: CollisionType) -> bool {
        self.handlers.remove(a, b)
    }

    // =========================================================================
    // Body Management
    // =========================================================================

    /// Add a dynamic body and return its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked or the mass properties are invalid.
    pub fn add_body(&mut self, pose: Pose, mass_props: MassProperties) -> Result<BodyId> {
        mass_props.validate()?;
        self.insert_body(Body::new(BodyId::new(0), pose, mass_props))
    }

    /// Add a static body at the given pose.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked.
    pub fn add_static_body(&mut self, pose: Pose) -> Result<BodyId> {
        self.insert_body(Body::new_static(BodyId::new(0), pose))
    }

    /// Add a kinematic body at the given pose.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked.
    pub fn add_kinematic_body(&mut self, pose: Pose) -> Result<BodyId> {
        self.insert_body(Body::new_kinematic(BodyId::new(0), pose))
    }

    /// Add a pre-built body. An ID of zero is replaced by a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked or the ID is already in use.
    pub fn insert_body(&mut self, mut body: Body) -> Result<BodyId> {
        self.ensure_unlocked("add a body")?;

        if body.id.raw() == 0 {
            body.id = BodyId::new(self.next_body_id);
        } else if self.body_index.contains_key(&body.id) {
            return Err(SimError::AlreadyAdded {
                entity: "body",
                id: body.id.raw(),
            });
        }
        self.next_body_id = self.next_body_id.max(body.id.raw() + 1);

        body.shapes.clear();
        body.constraints.clear();
        body.arbiters.clear();
        body.sleep = crate::body::SleepState::default();

        let id = body.id;
        let is_static = body.is_static();
        let slot = self.bodies.acquire(body);
        self.body_index.insert(id, slot);
        if !is_static {
            self.active_bodies.push(slot);
        }
        Ok(id)
    }

    /// Remove a body that has no shapes or constraints left.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked, the body does not exist, or
    /// shapes or constraints still reference it.
    pub fn remove_body(&mut self, id: BodyId) -> Result<Body> {
        self.ensure_unlocked("remove a body")?;
        let slot = self.body_slot(id)?;
        if let Some(body) = self.bodies.get(slot) {
            if !body.shapes.is_empty() || !body.constraints.is_empty() {
                return Err(SimError::BodyInUse {
                    id: id.raw(),
                    shapes: body.shapes.len(),
                    constraints: body.constraints.len(),
                });
            }
        }

        self.activate_slot(slot);
        self.active_bodies.retain(|&s| s != slot);
        self.body_index.remove(&id);
        self.bodies.release(slot).ok_or(SimError::InvalidBodyId(id.raw()))
    }

    /// Get a body by ID.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.body_index.get(&id).and_then(|&slot| self.bodies.get(slot))
    }

    /// Get a mutable body by ID. The body is woken up.
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        let slot = *self.body_index.get(&id)?;
        self.activate_slot(slot);
        self.bodies.get_mut(slot)
    }

    /// Iterate over all bodies in insertion-slot order.
    pub fn bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter().map(|(_, body)| body)
    }

    /// Get the number of bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Set a body's velocity, waking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist.
    pub fn set_velocity(&mut self, id: BodyId, velocity: Vector2<f64>) -> Result<()> {
        let body = self.body_mut(id).ok_or(SimError::InvalidBodyId(id.raw()))?;
        body.set_velocity(velocity);
        Ok(())
    }

    /// Set a body's angular velocity, waking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist.
    pub fn set_angular_velocity(&mut self, id: BodyId, angular_velocity: f64) -> Result<()> {
        let body = self.body_mut(id).ok_or(SimError::InvalidBodyId(id.raw()))?;
        body.set_angular_velocity(angular_velocity);
        Ok(())
    }

    /// Apply a force at a world point, waking the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist.
    pub fn apply_force_at_world_point(
        &mut self,
        id: BodyId,
        force: Vector2<f64>,
        point: &Point2<f64>,
    ) -> Result<()> {
        let body = self.body_mut(id).ok_or(SimError::InvalidBodyId(id.raw()))?;
        body.apply_force_at_world_point(force, point);
        Ok(())
    }

    /// Apply an impulse at a world point, waking the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist.
    pub fn apply_impulse_at_world_point(
        &mut self,
        id: BodyId,
        impulse: Vector2<f64>,
        point: &Point2<f64>,
    ) -> Result<()> {
        let body = self.body_mut(id).ok_or(SimError::InvalidBodyId(id.raw()))?;
        body.apply_impulse_at_world_point(impulse, point);
        Ok(())
    }

    /// Teleport a body and re-index its shapes.
    ///
    /// Moving a static body wakes everything resting on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked or the body does not exist.
    pub fn set_pose(&mut self, id: BodyId, pose: Pose) -> Result<()> {
        self.ensure_unlocked("move a body")?;
        let slot = self.body_slot(id)?;
        if self.bodies.get(slot).is_some_and(Body::is_static) {
            self.activate_static(slot, None);
        } else {
            self.activate_slot(slot);
        }

        let Self {
            bodies,
            shapes,
            shape_index,
            broad_phase,
            ..
        } = self;
        let body = bodies.get_mut(slot).ok_or(SimError::InvalidBodyId(id.raw()))?;
        body.set_pose(pose);
        for shape_id in &body.shapes {
            if let Some(shape) = shape_index.get(shape_id).and_then(|&s| shapes.get_mut(s)) {
                shape.update(&pose);
                broad_phase.update(*shape_id, shape.aabb());
            }
        }
        Ok(())
    }

    pub(crate) fn body_slot(&self, id: BodyId) -> Result<usize> {
        self.body_index
            .get(&id)
            .copied()
            .ok_or(SimError::InvalidBodyId(id.raw()))
    }

    // =========================================================================
    // Shape Management
    // =========================================================================

    /// Attach a shape to a body and return its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked, the body does not exist, or
    /// the geometry is invalid.
    pub fn add_shape(&mut self, body: BodyId, mut shape: Shape) -> Result<ShapeId> {
        self.ensure_unlocked("add a shape")?;
        shape.geometry().validate()?;
        let body_slot = self.body_slot(body)?;
        self.activate_slot(body_slot);

        let id = ShapeId::new(self.next_shape_id);
        self.next_shape_id += 1;
        shape.id = id;
        shape.body = body;

        let owner = self.bodies.get_mut(body_slot).ok_or(SimError::InvalidBodyId(body.raw()))?;
        shape.update(owner.pose());
        owner.shapes.push(id);
        let is_static = owner.is_static() || owner.is_sleeping();

        self.broad_phase.insert(id, shape.aabb(), is_static);
        let slot = self.shapes.acquire(shape);
        self.shape_index.insert(id, slot);
        Ok(id)
    }

    /// Detach and remove a shape.
    ///
    /// Arbiters involving the shape are invalidated; their `separate`
    /// callbacks fire unless the pair had already separated.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked or the shape does not exist.
    pub fn remove_shape(&mut self, id: ShapeId) -> Result<Shape> {
        self.ensure_unlocked("remove a shape")?;
        let slot = self
            .shape_index
            .get(&id)
            .copied()
            .ok_or(SimError::InvalidShapeId(id.raw()))?;
        let body_id = self
            .shapes
            .get(slot)
            .map(Shape::body)
            .ok_or(SimError::InvalidShapeId(id.raw()))?;
        let body_slot = self.body_slot(body_id)?;

        if self.bodies.get(body_slot).is_some_and(Body::is_static) {
            self.activate_static(body_slot, Some(id));
        } else {
            self.activate_slot(body_slot);
        }

        if let Some(body) = self.bodies.get_mut(body_slot) {
            body.shapes.retain(|&s| s != id);
        }
        self.filter_arbiters(body_slot, id);
        self.broad_phase.remove(id);
        self.shape_index.remove(&id);
        self.shapes.release(slot).ok_or(SimError::InvalidShapeId(id.raw()))
    }

    /// Get a shape by ID.
    #[must_use]
    pub fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shape_index.get(&id).and_then(|&slot| self.shapes.get(slot))
    }

    /// Iterate over all shapes.
    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.iter().map(|(_, shape)| shape)
    }

    /// Get the number of shapes.
    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Drop every cached arbiter touching `shape` on the body in `body_slot`.
    fn filter_arbiters(&mut self, body_slot: usize, shape: ShapeId) {
        self.lock();
        let doomed: Vec<usize> = self
            .arbiters
            .iter()
            .filter(|(_, arb)| {
                arb.cached
                    && ((arb.slot_a == body_slot && arb.shape_a == shape)
                        || (arb.slot_b == body_slot && arb.shape_b == shape))
            })
            .map(|(slot, _)| slot)
            .collect();

        for arb_slot in doomed {
            let live = self
                .arbiters
                .get(arb_slot)
                .is_some_and(|arb| arb.state != ArbiterState::Cached);
            if live {
                if let Some(arb) = self.arbiters.get_mut(arb_slot) {
                    arb.state = ArbiterState::Invalidated;
                }
                self.dispatch_arbiter(arb_slot, |handlers, event| handlers.separate(event));
            }
            self.discard_arbiter(arb_slot);
        }
        self.unlock(true);
    }

    /// Remove an arbiter from the cache, the active list and the body threads.
    pub(crate) fn discard_arbiter(&mut self, arb_slot: usize) {
        let Some(arb) = self.arbiters.release(arb_slot) else {
            return;
        };
        if self.arbiter_cache.get(&arb.pair()) == Some(&arb_slot) {
            self.arbiter_cache.remove(&arb.pair());
        }
        self.active_arbiters.retain(|&s| s != arb_slot);
        self.unthread_arbiter(arb_slot, arb.slot_a, arb.slot_b);
        trace!(a = arb.shape_a.raw(), b = arb.shape_b.raw(), "discarded arbiter");
    }

    pub(crate) fn thread_arbiter(&mut self, arb_slot: usize, body_slot: usize) {
        if let Some(body) = self.bodies.get_mut(body_slot) {
            if !body.arbiters.contains(&arb_slot) {
                body.arbiters.push(arb_slot);
            }
        }
    }

    pub(crate) fn unthread_arbiter(&mut self, arb_slot: usize, slot_a: usize, slot_b: usize) {
        for slot in [slot_a, slot_b] {
            if let Some(body) = self.bodies.get_mut(slot) {
                body.arbiters.retain(|&s| s != arb_slot);
            }
        }
    }

    /// Run `f` with the arbiter in `arb_slot` and a callback context.
    pub(crate) fn dispatch_arbiter<R>(
        &mut self,
        arb_slot: usize,
        f: impl FnOnce(&mut HandlerRegistry, &mut ArbiterEvent<'_, '_>) -> R,
    ) -> Option<R> {
        let Self {
            arbiters,
            bodies,
            body_index,
            post_step,
            pending_activations,
            contacts,
            handlers,
            stamp,
            ..
        } = self;
        let arbiter = arbiters.get_mut(arb_slot)?;
        let snapshot = arbiter.contact_snapshot(contacts);
        let mut context = CallbackContext {
            bodies,
            body_index,
            post_step,
            activations: pending_activations,
            stamp: *stamp,
        };
        let mut event = ArbiterEvent {
            arbiter,
            contacts: &snapshot,
            context: &mut context,
        };
        Some(f(handlers, &mut event))
    }

    // =========================================================================
    // Constraint Management
    // =========================================================================

    /// Add a constraint and return its ID. Both bodies are woken.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked, either body does not exist,
    /// or both sides name the same body.
    pub fn add_constraint(&mut self, mut constraint: Constraint) -> Result<ConstraintId> {
        self.ensure_unlocked("add a constraint")?;
        let (a, b) = constraint.bodies();
        if a == b {
            return Err(SimError::invalid_config("a constraint needs two distinct bodies"));
        }
        let slot_a = self.body_slot(a)?;
        let slot_b = self.body_slot(b)?;
        self.activate_slot(slot_a);
        self.activate_slot(slot_b);

        let id = ConstraintId::new(self.next_constraint_id);
        self.next_constraint_id += 1;
        constraint.id = id;
        constraint.slot_a = slot_a;
        constraint.slot_b = slot_b;

        for slot in [slot_a, slot_b] {
            if let Some(body) = self.bodies.get_mut(slot) {
                body.constraints.push(id);
            }
        }
        let slot = self.constraints.acquire(constraint);
        self.constraint_index.insert(id, slot);
        self.active_constraints.push(slot);
        Ok(id)
    }

    /// Pin `a` and `b` together at a world point.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_constraint`].
    pub fn add_pivot_joint(&mut self, a: BodyId, b: BodyId, pivot: Point2<f64>) -> Result<ConstraintId> {
        let anchor_a = self
            .body(a)
            .ok_or(SimError::InvalidBodyId(a.raw()))?
            .pose()
            .inverse_transform_point(&pivot);
        let anchor_b = self
            .body(b)
            .ok_or(SimError::InvalidBodyId(b.raw()))?
            .pose()
            .inverse_transform_point(&pivot);
        self.add_constraint(Constraint::new(a, b, PivotJoint::new(anchor_a, anchor_b)))
    }

    /// Remove a constraint, waking both bodies.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked or the constraint does not exist.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<Constraint> {
        self.ensure_unlocked("remove a constraint")?;
        let slot = self
            .constraint_index
            .get(&id)
            .copied()
            .ok_or(SimError::InvalidConstraintId(id.raw()))?;
        let (slot_a, slot_b) = self
            .constraints
            .get(slot)
            .map(|c| (c.slot_a, c.slot_b))
            .ok_or(SimError::InvalidConstraintId(id.raw()))?;

        self.activate_slot(slot_a);
        self.activate_slot(slot_b);
        for body_slot in [slot_a, slot_b] {
            if let Some(body) = self.bodies.get_mut(body_slot) {
                body.constraints.retain(|&c| c != id);
            }
        }
        self.active_constraints.retain(|&s| s != slot);
        self.constraint_index.remove(&id);
        self.constraints
            .release(slot)
            .ok_or(SimError::InvalidConstraintId(id.raw()))
    }

    /// Get a constraint by ID.
    #[must_use]
    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraint_index
            .get(&id)
            .and_then(|&slot| self.constraints.get(slot))
    }

    /// Get a mutable constraint by ID. Both bodies are woken.
    pub fn constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        let slot = *self.constraint_index.get(&id)?;
        let (slot_a, slot_b) = self.constraints.get(slot).map(|c| (c.slot_a, c.slot_b))?;
        self.activate_slot(slot_a);
        self.activate_slot(slot_b);
        self.constraints.get_mut(slot)
    }

    /// Iterate over all constraints.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().map(|(_, c)| c)
    }

    /// Get the number of constraints.
    #[must_use]
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Shapes whose bounding boxes overlap `aabb`.
    #[must_use]
    pub fn shapes_in_aabb(&self, aabb: &Aabb) -> Vec<ShapeId> {
        self.broad_phase.query_aabb(aabb)
    }

    /// Nearest shape to `point` within `max_distance`, ignoring shapes that
    /// `filter` rejects.
    pub fn point_query_nearest(
        &mut self,
        point: Point2<f64>,
        max_distance: f64,
        filter: ShapeFilter,
    ) -> Option<(ShapeId, PointQuery)> {
        self.lock();
        let area = Aabb::new(point, point).expanded(max_distance.max(0.0));
        let nearest = self
            .broad_phase
            .query_aabb(&area)
            .into_iter()
            .filter_map(|id| {
                let shape = self.shape(id)?;
                if filter.reject(&shape.filter) {
                    return None;
                }
                let query = shape.point_query(&point);
                (query.distance <= max_distance).then_some((id, query))
            })
            .min_by(|a, b| a.1.distance.total_cmp(&b.1.distance).then(a.0.cmp(&b.0)));
        self.unlock(true);
        nearest
    }

    /// Every shape touched by a circle of `radius` swept from `start` to
    /// `end`, nearest first, ignoring shapes that `filter` rejects.
    ///
    /// A zero radius casts a plain segment. Shapes overlapping `start`
    /// report `alpha = 0`.
    pub fn segment_query(
        &mut self,
        start: Point2<f64>,
        end: Point2<f64>,
        radius: f64,
        filter: ShapeFilter,
    ) -> Vec<(ShapeId, SegmentQuery)> {
        self.lock();
        let radius = radius.max(0.0);
        let mut hits: Vec<(ShapeId, SegmentQuery)> = self
            .broad_phase
            .segment_query(&start, &end, radius)
            .into_iter()
            .filter_map(|id| {
                let shape = self.shape(id)?;
                if filter.reject(&shape.filter) {
                    return None;
                }
                shape.segment_query(&start, &end, radius).map(|hit| (id, hit))
            })
            .collect();
        hits.sort_by(|a, b| a.1.alpha.total_cmp(&b.1.alpha).then(a.0.cmp(&b.0)));
        self.unlock(true);
        trace!(hits = hits.len(), "segment query");
        hits
    }

    /// First shape hit by a segment query, if any.
    pub fn segment_query_first(
        &mut self,
        start: Point2<f64>,
        end: Point2<f64>,
        radius: f64,
        filter: ShapeFilter,
    ) -> Option<(ShapeId, SegmentQuery)> {
        self.segment_query(start, end, radius, filter).into_iter().next()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Compute the total kinetic energy of the dynamic bodies.
    #[must_use]
    pub fn total_kinetic_energy(&self) -> f64 {
        self.bodies().map(Body::kinetic_energy).sum()
    }

    /// Compute the total linear momentum of the dynamic bodies.
    #[must_use]
    pub fn total_linear_momentum(&self) -> Vector2<f64> {
        self.bodies()
            .filter(|b| b.is_dynamic())
            .fold(Vector2::zeros(), |acc, b| acc + b.velocity() * b.mass())
    }

    /// Number of arbiters alive in the world, cached or sleeping.
    #[must_use]
    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }

    /// Number of arbiters solved in the last step.
    #[must_use]
    pub fn active_arbiter_count(&self) -> usize {
        self.active_arbiters.len()
    }

    /// Number of contact points solved in the last step.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.active_arbiters
            .iter()
            .filter_map(|&slot| self.arbiters.get(slot))
            .map(|arb| arb.contacts.len(&self.contacts))
            .sum()
    }

    /// Iterate over live arbiters.
    pub fn arbiters(&self) -> impl Iterator<Item = &Arbiter> {
        self.arbiters.iter().map(|(_, arb)| arb)
    }

    /// Look up the arbiter for a pair of shapes, in either order.
    #[must_use]
    pub fn arbiter(&self, a: ShapeId, b: ShapeId) -> Option<&Arbiter> {
        self.arbiter_cache
            .get(&ShapePair::new(a, b))
            .and_then(|&slot| self.arbiters.get(slot))
    }

    /// Accumulated `(normal, tangent)` impulses of an arbiter's contacts.
    #[must_use]
    pub fn arbiter_impulses(&self, arbiter: &Arbiter) -> Vec<(f64, f64)> {
        arbiter
            .contacts
            .get(&self.contacts)
            .iter()
            .map(|c| (c.normal_impulse(), c.tangent_impulse()))
            .collect()
    }

    /// Number of awake dynamic and kinematic bodies.
    #[must_use]
    pub fn awake_body_count(&self) -> usize {
        self.active_bodies.len()
    }

    /// Number of sleeping components.
    #[must_use]
    pub fn sleeping_component_count(&self) -> usize {
        self.sleeping_components.len()
    }

    /// Validate the world state.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Any body has non-finite state values (`NaN` or `Inf`)
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        for body in self.bodies() {
            if !body.is_finite() {
                return Err(SimError::diverged(format!(
                    "body {} has non-finite state",
                    body.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::shape::ShapeGeometry;

    fn ball_world() -> (World, BodyId, ShapeId) {
        let mut world = World::new(SimulationConfig::default());
        let body = world
            .add_body(Pose::identity(), MassProperties::disc(1.0, 0.5))
            .unwrap();
        let shape = world.add_shape(body, Shape::new(ShapeGeometry::circle(0.5))).unwrap();
        (world, body, shape)
    }

    #[test]
    fn test_ids_are_assigned() {
        let (world, body, shape) = ball_world();
        assert_eq!(body, BodyId::new(1));
        assert_eq!(shape, ShapeId::new(1));
        assert_eq!(world.shape(shape).unwrap().body(), body);
        assert_eq!(world.body(body).unwrap().shapes(), &[shape]);
    }

    #[test]
    fn test_insert_duplicate_body() {
        let mut world = World::default();
        let body = Body::new_static(BodyId::new(5), Pose::identity());
        world.insert_body(body.clone()).unwrap();
        let err = world.insert_body(body).unwrap_err();
        assert!(matches!(err, SimError::AlreadyAdded { entity: "body", id: 5 }));

        // Fresh ids skip past manually chosen ones.
        let next = world.add_static_body(Pose::identity()).unwrap();
        assert_eq!(next, BodyId::new(6));
    }

    #[test]
    fn test_add_shape_rejects_bad_polygons() {
        let (mut world, body, _) = ball_world();
        let dart = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(1.0, 0.5),
            Point2::new(1.0, 2.0),
        ];
        for vertices in [Vec::new(), vec![Point2::origin(), Point2::new(1.0, 0.0)], dart] {
            let geometry = ShapeGeometry::Polygon {
                vertices,
                radius: 0.0,
            };
            let err = world.add_shape(body, Shape::new(geometry)).unwrap_err();
            assert!(matches!(err, SimError::InvalidShape { .. }));
        }
        assert_eq!(world.body(body).unwrap().shapes().len(), 1);
    }

    #[test]
    fn test_remove_body_in_use() {
        let (mut world, body, shape) = ball_world();
        let err = world.remove_body(body).unwrap_err();
        assert!(matches!(err, SimError::BodyInUse { shapes: 1, .. }));

        world.remove_shape(shape).unwrap();
        world.remove_body(body).unwrap();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.awake_body_count(), 0);
    }

    #[test]
    fn test_locked_world_rejects_mutation() {
        let (mut world, body, _) = ball_world();
        world.lock();
        let err = world
            .add_shape(body, Shape::new(ShapeGeometry::circle(1.0)))
            .unwrap_err();
        assert!(err.is_locked());
        assert!(world.step(1.0 / 60.0).unwrap_err().is_locked());
        world.unlock(true);
        assert!(!world.is_locked());
    }

    #[test]
    fn test_post_step_runs_on_outermost_unlock() {
        let (mut world, body, _) = ball_world();
        world.lock();
        world.lock();
        world.add_post_step_callback(1, move |w| {
            w.set_velocity(body, Vector2::new(2.0, 0.0)).unwrap();
        });
        world.unlock(true);
        assert_eq!(world.body(body).unwrap().velocity().x, 0.0);
        world.unlock(true);
        assert_eq!(world.body(body).unwrap().velocity().x, 2.0);
    }

    #[test]
    fn test_constraint_requires_distinct_bodies() {
        let (mut world, body, _) = ball_world();
        let err = world
            .add_constraint(Constraint::pivot(body, body, Point2::origin(), Point2::origin()))
            .unwrap_err();
        assert!(err.is_config_error());

        let missing = BodyId::new(99);
        let err = world.add_pivot_joint(body, missing, Point2::origin()).unwrap_err();
        assert_eq!(err, SimError::InvalidBodyId(99));
    }

    #[test]
    fn test_pivot_anchors_from_world_point() {
        let mut world = World::default();
        let a = world.add_static_body(Pose::identity()).unwrap();
        let b = world
            .add_body(Pose::from_position(Point2::new(2.0, 0.0)), MassProperties::disc(1.0, 0.5))
            .unwrap();
        let id = world.add_pivot_joint(a, b, Point2::new(1.0, 0.0)).unwrap();

        let crate::constraint::JointKind::Pivot(pivot) = world.constraint(id).unwrap().joint();
        assert_eq!(pivot.anchor_a(), Point2::new(1.0, 0.0));
        assert_eq!(pivot.anchor_b(), Point2::new(-1.0, 0.0));
        assert_eq!(world.body(a).unwrap().constraints(), &[id]);
    }

    #[test]
    fn test_point_query_nearest() {
        let (mut world, _, shape) = ball_world();
        let hit = world.point_query_nearest(Point2::new(2.0, 0.0), 2.0, ShapeFilter::ALL);
        let (id, query) = hit.unwrap();
        assert_eq!(id, shape);
        assert!((query.distance - 1.5).abs() < 1e-12);

        assert!(world
            .point_query_nearest(Point2::new(5.0, 0.0), 1.0, ShapeFilter::ALL)
            .is_none());
    }

    #[test]
    fn test_segment_query_sorts_hits_and_filters() {
        let (mut world, _, ball) = ball_world();
        let wall = world.add_static_body(Pose::identity()).unwrap();
        let geometry = ShapeGeometry::segment(Point2::new(3.0, -2.0), Point2::new(3.0, 2.0), 0.0);
        let wall_shape = world
            .add_shape(
                wall,
                Shape::new(geometry).with_filter(ShapeFilter::new(0, 0b10, u32::MAX)),
            )
            .unwrap();

        let start = Point2::new(-5.0, 0.0);
        let end = Point2::new(5.0, 0.0);
        let hits = world.segment_query(start, end, 0.0, ShapeFilter::ALL);
        let ids: Vec<_> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![ball, wall_shape]);
        assert!((hits[0].1.alpha - 0.45).abs() < 1e-12);
        assert!((hits[1].1.point.x - 3.0).abs() < 1e-12);
        assert!(!world.is_locked());

        // Walls are category 0b10; a query masking them out only sees the ball.
        let balls_only = ShapeFilter::new(0, u32::MAX, 0b01);
        let (first, _) = world.segment_query_first(end, start, 0.0, balls_only).unwrap();
        assert_eq!(first, ball);

        let (above_start, above_end) = (Point2::new(-5.0, 4.0), Point2::new(5.0, 4.0));
        assert!(world
            .segment_query_first(above_start, above_end, 0.5, ShapeFilter::ALL)
            .is_none());
    }

    #[test]
    fn test_set_pose_reindexes_shapes() {
        let (mut world, body, shape) = ball_world();
        world
            .set_pose(body, Pose::from_position(Point2::new(10.0, 0.0)))
            .unwrap();
        let aabb = world.shape(shape).unwrap().aabb();
        assert!((aabb.center().x - 10.0).abs() < 1e-12);
        assert_eq!(
            world.shapes_in_aabb(&Aabb::new(Point2::new(9.0, -1.0), Point2::new(11.0, 1.0))),
            vec![shape]
        );
    }
}
