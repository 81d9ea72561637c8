//! The fixed-step pipeline.
//!
//! ```text
//! reset last step's arbiters
//! ── locked ──────────────────────────────────────────────
//!   integrate positions (velocity + bias velocity)
//!   fresh contact buffer, update shape boxes
//!   broad phase pairs → narrow phase → arbiter cache
//!   begin / pre_solve callbacks
//! ── unlocked ────────────────────────────────────────────
//!   idle times, contact graph, sleeping components
//! ── locked ──────────────────────────────────────────────
//!   pre-step arbiters and constraints
//!   integrate velocities (gravity, forces, damping)
//!   warm start with dt-scaled cached impulses
//!   solver iterations: all arbiters, then all constraints
//!   post_solve callbacks
//!   prune stale arbiters (separate callbacks, eviction)
//! ── unlocked: post-step callbacks ───────────────────────
//! ```

use sim2d_types::{Result, SimError};
use tracing::trace;

use crate::arbiter::{Arbiter, ArbiterState, ShapePair};
use crate::body::Body;
use crate::broad_phase::CandidatePair;
use crate::collision::collide;
use crate::contact_buffer::ContactStorage;
use crate::handler::CallbackContext;
use crate::shape::Shape;
use crate::solver::{Solve, SolverStep};
use crate::World;

impl World {
    /// Advance the world by `dt` seconds.
    ///
    /// A `dt` of zero does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if `dt` is negative or not finite, or if called
    /// while the world is locked.
    pub fn step(&mut self, dt: f64) -> Result<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(SimError::InvalidTimestep(dt));
        }
        self.ensure_unlocked("step the world")?;
        if dt == 0.0 {
            return Ok(());
        }

        self.stamp += 1;
        let prev_dt = self.current_dt;
        self.current_dt = dt;

        for arb_slot in std::mem::take(&mut self.active_arbiters) {
            let Some(arb) = self.arbiters.get_mut(arb_slot) else {
                continue;
            };
            arb.state = ArbiterState::Normal;
            let (slot_a, slot_b) = (arb.slot_a, arb.slot_b);
            let sleeping = |slot: usize| self.bodies.get(slot).is_some_and(Body::is_sleeping);
            if !sleeping(slot_a) && !sleeping(slot_b) {
                self.unthread_arbiter(arb_slot, slot_a, slot_b);
            }
        }

        self.lock();
        {
            for &slot in &self.active_bodies {
                if let Some(body) = self.bodies.get_mut(slot) {
                    body.integrate_position(dt);
                }
            }

            let persistence = self.config().solver.collision_persistence;
            self.contacts.push_fresh(self.stamp, persistence);
            self.update_active_shapes();

            for pair in self.broad_phase.find_pairs() {
                self.collide_pair(pair);
            }
        }
        self.unlock(false);

        self.process_components(dt);

        self.lock();
        {
            self.solve(dt, prev_dt);
            self.prune_arbiters();
            self.time += dt;
            self.step_count += 1;
        }
        self.unlock(true);

        Ok(())
    }

    /// Re-cache world geometry for shapes of awake bodies.
    fn update_active_shapes(&mut self) {
        let Self {
            active_bodies,
            bodies,
            shapes,
            shape_index,
            broad_phase,
            ..
        } = self;
        for &slot in active_bodies.iter() {
            let Some(body) = bodies.get(slot) else {
                continue;
            };
            for id in &body.shapes {
                if let Some(shape) = shape_index.get(id).and_then(|&s| shapes.get_mut(s)) {
                    shape.update(body.pose());
                    broad_phase.update(*id, shape.aabb());
                }
            }
        }
    }

    /// Cheap rejection before the narrow phase.
    fn reject_pair(&self, a: &Shape, b: &Shape) -> bool {
        if a.body() == b.body() || a.filter.reject(&b.filter) {
            return true;
        }
        let Some(body) = self.body(a.body()) else {
            return true;
        };
        body.constraints().iter().any(|id| {
            self.constraint(*id).is_some_and(|c| {
                let (x, y) = c.bodies();
                !c.params.collide_bodies
                    && ((x == a.body() && y == b.body()) || (x == b.body() && y == a.body()))
            })
        })
    }

    /// Narrow phase and arbiter bookkeeping for one candidate pair.
    fn collide_pair(&mut self, pair: CandidatePair) {
        let (Some(&slot_a), Some(&slot_b)) =
            (self.shape_index.get(&pair.a), self.shape_index.get(&pair.b))
        else {
            return;
        };
        let (Some(a), Some(b)) = (self.shapes.get(slot_a), self.shapes.get(slot_b)) else {
            return;
        };
        if self.reject_pair(a, b) {
            return;
        }

        let info = collide(a, b, pair.hint);
        if let Some(id) = info.id {
            self.broad_phase.record_collision_id(pair.a, pair.b, id);
        }
        if info.is_empty() {
            return;
        }

        let (first, second) = if info.swapped { (b, a) } else { (a, b) };
        let (Some(&body_first), Some(&body_second)) = (
            self.body_index.get(&first.body()),
            self.body_index.get(&second.body()),
        ) else {
            return;
        };
        let (Some(body_a), Some(body_b)) = (self.bodies.get(body_first), self.bodies.get(body_second)) else {
            return;
        };
        let positions = (body_a.position(), body_b.position());
        let both_infinite =
            body_a.body_type().is_infinite_mass() && body_b.body_type().is_infinite_mass();
        let sensor = first.sensor || second.sensor;

        let key = ShapePair::new(first.id(), second.id());
        let arb_slot = match self.arbiter_cache.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = self
                    .arbiters
                    .acquire(Arbiter::new(first, second, body_first, body_second));
                self.arbiter_cache.insert(key, slot);
                trace!(a = first.id().raw(), b = second.id().raw(), "new arbiter");
                slot
            }
        };

        let binding = self
            .handlers
            .resolve(first.collision_type, second.collision_type);
        let Some(arb) = self.arbiters.get_mut(arb_slot) else {
            return;
        };
        arb.update(
            &info,
            first,
            second,
            (body_first, body_second),
            positions,
            binding,
            &mut self.contacts,
        );

        if arb.state == ArbiterState::FirstCollision {
            let accepted = self
                .dispatch_arbiter(arb_slot, |handlers, event| handlers.begin(event))
                .unwrap_or(true);
            if !accepted {
                self.set_arbiter_state(arb_slot, ArbiterState::Ignore);
            }
        }

        let solvable = self.arbiter_state(arb_slot) != Some(ArbiterState::Ignore)
            && self
                .dispatch_arbiter(arb_slot, |handlers, event| handlers.pre_solve(event))
                .unwrap_or(true)
            && self.arbiter_state(arb_slot) != Some(ArbiterState::Ignore)
            && !sensor
            && !both_infinite;

        let stamp = self.stamp;
        let Some(arb) = self.arbiters.get_mut(arb_slot) else {
            return;
        };
        if solvable {
            self.active_arbiters.push(arb_slot);
        } else {
            if let ContactStorage::Ring(span) = &arb.contacts {
                self.contacts.release_last(span);
            }
            arb.contacts = ContactStorage::Empty;
            if arb.state != ArbiterState::Ignore {
                arb.state = ArbiterState::Normal;
            }
        }
        arb.stamp = stamp;
    }

    fn arbiter_state(&self, arb_slot: usize) -> Option<ArbiterState> {
        self.arbiters.get(arb_slot).map(Arbiter::state)
    }

    fn set_arbiter_state(&mut self, arb_slot: usize, state: ArbiterState) {
        if let Some(arb) = self.arbiters.get_mut(arb_slot) {
            arb.state = state;
        }
    }

    /// Pre-step, integrate velocities, warm start, iterate, post-solve.
    fn solve(&mut self, dt: f64, prev_dt: f64) {
        let config = self.config().clone();
        let step = SolverStep {
            dt,
            collision_slop: config.solver.collision_slop,
            collision_bias_coef: config.solver.bias_coefficient(dt),
        };

        for &s in &self.active_arbiters {
            let Some(arb) = self.arbiters.get_mut(s) else {
                continue;
            };
            let (Some(a), Some(b)) = (self.bodies.get(arb.slot_a), self.bodies.get(arb.slot_b)) else {
                continue;
            };
            arb.solver(&mut self.contacts).pre_step(a, b, &step);
        }

        self.run_constraint_callbacks(Some(&step));

        let damping = config.damping.powf(dt);
        for &s in &self.active_bodies {
            if let Some(body) = self.bodies.get_mut(s) {
                body.integrate_velocity(&config.gravity, damping, dt);
            }
        }

        let dt_coef = if prev_dt == 0.0 { 0.0 } else { dt / prev_dt };
        for &s in &self.active_arbiters {
            let Some(arb) = self.arbiters.get_mut(s) else {
                continue;
            };
            let Some((a, b)) = self.bodies.pair_mut(arb.slot_a, arb.slot_b) else {
                continue;
            };
            arb.solver(&mut self.contacts).apply_cached_impulse(a, b, dt_coef);
        }
        for &s in &self.active_constraints {
            let Some(c) = self.constraints.get_mut(s) else {
                continue;
            };
            let Some((a, b)) = self.bodies.pair_mut(c.slot_a, c.slot_b) else {
                continue;
            };
            c.apply_cached_impulse(a, b, dt_coef);
        }

        for _ in 0..config.solver.iterations {
            for &s in &self.active_arbiters {
                let Some(arb) = self.arbiters.get_mut(s) else {
                    continue;
                };
                let Some((a, b)) = self.bodies.pair_mut(arb.slot_a, arb.slot_b) else {
                    continue;
                };
                arb.solver(&mut self.contacts).apply_impulse(a, b, dt);
            }
            for &s in &self.active_constraints {
                let Some(c) = self.constraints.get_mut(s) else {
                    continue;
                };
                let Some((a, b)) = self.bodies.pair_mut(c.slot_a, c.slot_b) else {
                    continue;
                };
                c.apply_impulse(a, b, dt);
            }
        }

        self.run_constraint_callbacks(None);

        let mut i = 0;
        while let Some(&s) = self.active_arbiters.get(i) {
            self.dispatch_arbiter(s, |handlers, event| handlers.post_solve(event));
            i += 1;
        }
    }

    /// With a solver step: pre-solve callbacks followed by each pre-step.
    /// Without: post-solve callbacks.
    fn run_constraint_callbacks(&mut self, pre_step: Option<&SolverStep>) {
        let Self {
            constraints,
            active_constraints,
            bodies,
            body_index,
            post_step,
            pending_activations,
            stamp,
            ..
        } = self;
        let mut ctx = CallbackContext {
            bodies,
            body_index,
            post_step,
            activations: pending_activations,
            stamp: *stamp,
        };
        for &s in active_constraints.iter() {
            let Some(c) = constraints.get_mut(s) else {
                continue;
            };
            match pre_step {
                Some(step) => {
                    c.run_pre_solve(&mut ctx);
                    let (Some(a), Some(b)) = (ctx.bodies.get(c.slot_a), ctx.bodies.get(c.slot_b)) else {
                        continue;
                    };
                    c.pre_step(a, b, step);
                }
                None => c.run_post_solve(&mut ctx),
            }
        }
    }

    /// Mark arbiters that were not touched this step as cached and evict the
    /// ones older than the persistence window.
    fn prune_arbiters(&mut self) {
        let persistence = self.config().solver.collision_persistence;
        let cached: Vec<usize> = self
            .arbiters
            .iter()
            .filter(|(_, arb)| arb.cached)
            .map(|(slot, _)| slot)
            .collect();

        for s in cached {
            let Some(arb) = self.arbiters.get(s) else {
                continue;
            };
            let resting = |slot: usize| {
                self.bodies
                    .get(slot)
                    .map_or(true, |b| b.is_static() || b.is_sleeping())
            };
            if resting(arb.slot_a) && resting(arb.slot_b) {
                continue;
            }

            let ticks = self.stamp.saturating_sub(arb.stamp);
            if ticks >= 1 && arb.state != ArbiterState::Cached {
                self.set_arbiter_state(s, ArbiterState::Cached);
                self.dispatch_arbiter(s, |handlers, event| handlers.separate(event));
            }
            if ticks >= persistence {
                self.discard_arbiter(s);
            }
        }
    }
}
