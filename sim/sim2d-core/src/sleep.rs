//! Idle tracking, contact-graph components and sleeping.
//!
//! After collision detection the world threads every solved arbiter into the
//! arbiter lists of its two bodies, which gives a contact graph over the
//! awake dynamic bodies. Joints add edges too. Each connected component is
//! found by flood fill; if every member has been idle for longer than the
//! sleep time threshold, the whole component is deactivated:
//!
//! - bodies leave the active list and their shapes move to the static set of
//!   the broad phase
//! - arbiters are uncached and their contacts copied out of the ring
//! - constraints leave the active list
//!
//! Waking any member reverses all of this for the whole component.
//! Static bodies never join a component; kinematic bodies keep everything
//! they touch awake.

use sim2d_types::{BodyId, Result, SimError};
use tracing::debug;

use crate::body::{Body, SleepState};
use crate::World;

/// A group of bodies that fell asleep together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SleepingComponent {
    pub(crate) root: BodyId,
    pub(crate) members: Vec<usize>,
}

impl World {
    /// Wake a body and the sleeping component it belongs to.
    ///
    /// Inside a step the wake-up is deferred until the world unlocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist or is not dynamic.
    pub fn activate(&mut self, id: BodyId) -> Result<()> {
        let slot = self.body_slot(id)?;
        if !self.bodies.get(slot).is_some_and(Body::is_dynamic) {
            return Err(SimError::NotDynamic(id.raw()));
        }
        self.activate_slot(slot);
        Ok(())
    }

    /// Wake every body touching a static body.
    ///
    /// With `filter`, only bodies touching that shape of the static body wake.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not exist.
    pub fn activate_touching(&mut self, id: BodyId, filter: Option<sim2d_types::ShapeId>) -> Result<()> {
        let slot = self.body_slot(id)?;
        self.activate_static(slot, filter);
        Ok(())
    }

    /// Force a dynamic body to sleep in a component of its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked, sleeping is disabled, or the
    /// body does not exist or is not dynamic.
    pub fn sleep_body(&mut self, id: BodyId) -> Result<()> {
        self.sleep_body_with_group(id, None)
    }

    /// Force a dynamic body to sleep, joining the sleeping component of
    /// `group` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the world is locked, sleeping is disabled, the
    /// body is not dynamic, `group` is not asleep, or the body already sleeps
    /// in a different component.
    pub fn sleep_body_with_group(&mut self, id: BodyId, group: Option<BodyId>) -> Result<()> {
        self.ensure_unlocked("put a body to sleep")?;
        if !self.config().sleep.is_enabled() {
            return Err(SimError::invalid_config(
                "sleeping is disabled; set a sleep time threshold first",
            ));
        }
        let slot = self.body_slot(id)?;
        let body = self.bodies.get(slot).ok_or(SimError::InvalidBodyId(id.raw()))?;
        if !body.is_dynamic() {
            return Err(SimError::NotDynamic(id.raw()));
        }

        let group_root = match group {
            Some(group_id) => {
                let root = self
                    .body(group_id)
                    .ok_or(SimError::InvalidBodyId(group_id.raw()))?
                    .sleep
                    .root
                    .ok_or_else(|| SimError::invalid_config("group body is not sleeping"))?;
                Some(root)
            }
            None => None,
        };

        if let Some(current) = body.sleep.root {
            if group_root.is_some_and(|root| root != current) {
                return Err(SimError::invalid_config(
                    "body already sleeps in another component",
                ));
            }
            return Ok(());
        }

        self.deactivate_body(slot);
        let root = group_root.unwrap_or(id);
        if let Some(body) = self.bodies.get_mut(slot) {
            body.sleep = SleepState {
                idle_time: 0.0,
                root: Some(root),
            };
        }
        match self.sleeping_components.iter_mut().find(|c| c.root == root) {
            Some(component) => component.members.push(slot),
            None => self.sleeping_components.push(SleepingComponent {
                root,
                members: vec![slot],
            }),
        }
        debug!(body = id.raw(), root = root.raw(), "body put to sleep");
        Ok(())
    }

    /// Whether a body is asleep.
    #[must_use]
    pub fn is_sleeping(&self, id: BodyId) -> bool {
        self.body(id).is_some_and(Body::is_sleeping)
    }

    /// Wake the dynamic body in `slot`, or queue it if the world is locked.
    pub(crate) fn activate_slot(&mut self, slot: usize) {
        let Some(body) = self.bodies.get(slot) else {
            return;
        };
        if !body.is_dynamic() {
            return;
        }
        let (id, root) = (body.id, body.sleep.root);
        if self.is_locked() {
            if !self.pending_activations.contains(&id) {
                self.pending_activations.push(id);
            }
            return;
        }

        if let Some(body) = self.bodies.get_mut(slot) {
            body.sleep.idle_time = 0.0;
        }

        if let Some(root) = root {
            if let Some(index) = self.sleeping_components.iter().position(|c| c.root == root) {
                let component = self.sleeping_components.remove(index);
                debug!(
                    root = root.raw(),
                    bodies = component.members.len(),
                    "sleeping component woke up"
                );
                for member in component.members {
                    if let Some(body) = self.bodies.get_mut(member) {
                        body.sleep = SleepState::default();
                    }
                    self.activate_body_now(member);
                }
            }
        }

        let touching: Vec<usize> = self
            .bodies
            .get(slot)
            .map(|body| {
                body.arbiters
                    .iter()
                    .filter_map(|&arb| self.arbiters.get(arb))
                    .map(|arb| arb.other_slot(slot))
                    .collect()
            })
            .unwrap_or_default();
        for other in touching {
            if let Some(body) = self.bodies.get_mut(other) {
                if !body.is_static() {
                    body.sleep.idle_time = 0.0;
                }
            }
        }
    }

    /// Wake everything touching the static body in `slot`.
    pub(crate) fn activate_static(&mut self, slot: usize, filter: Option<sim2d_types::ShapeId>) {
        let others: Vec<usize> = self
            .bodies
            .get(slot)
            .map(|body| {
                body.arbiters
                    .iter()
                    .filter_map(|&arb| self.arbiters.get(arb))
                    .filter(|arb| filter.map_or(true, |s| arb.shape_a == s || arb.shape_b == s))
                    .map(|arb| arb.other_slot(slot))
                    .collect()
            })
            .unwrap_or_default();
        for other in others {
            self.activate_slot(other);
        }
    }

    /// Owner rule for arbiters and constraints shared by two sleeping bodies:
    /// body A restores them, unless A is static.
    fn owns_edge(&self, body_slot: usize, slot_a: usize) -> bool {
        body_slot == slot_a || self.bodies.get(slot_a).is_some_and(Body::is_static)
    }

    /// Put a woken body back into the simulation.
    fn activate_body_now(&mut self, slot: usize) {
        let Some(body) = self.bodies.get(slot) else {
            return;
        };
        let shapes = body.shapes.clone();
        let arbiters = body.arbiters.clone();
        let constraints = body.constraints.clone();

        if !self.active_bodies.contains(&slot) {
            self.active_bodies.push(slot);
        }
        for shape in shapes {
            self.broad_phase.set_static(shape, false);
        }

        for arb_slot in arbiters {
            let Some(slot_a) = self.arbiters.get(arb_slot).map(|arb| arb.slot_a) else {
                continue;
            };
            if !self.owns_edge(slot, slot_a) {
                continue;
            }
            let stamp = self.stamp;
            let Self {
                arbiters: pool,
                contacts,
                arbiter_cache,
                ..
            } = self;
            if let Some(arb) = pool.get_mut(arb_slot) {
                arb.contacts.attach(contacts);
                arb.stamp = stamp;
                arb.cached = true;
                arbiter_cache.insert(arb.pair(), arb_slot);
            }
            if !self.active_arbiters.contains(&arb_slot) {
                self.active_arbiters.push(arb_slot);
            }
        }

        for id in constraints {
            let Some(&c_slot) = self.constraint_index.get(&id) else {
                continue;
            };
            let Some(slot_a) = self.constraints.get(c_slot).map(|c| c.slot_a) else {
                continue;
            };
            if self.owns_edge(slot, slot_a) && !self.active_constraints.contains(&c_slot) {
                self.active_constraints.push(c_slot);
            }
        }
    }

    /// Take a body out of the simulation without touching its sleep state.
    fn deactivate_body(&mut self, slot: usize) {
        let Some(body) = self.bodies.get(slot) else {
            return;
        };
        let shapes = body.shapes.clone();
        let arbiters = body.arbiters.clone();
        let constraints = body.constraints.clone();

        self.active_bodies.retain(|&s| s != slot);
        for shape in shapes {
            self.broad_phase.set_static(shape, true);
        }

        for arb_slot in arbiters {
            let Some(slot_a) = self.arbiters.get(arb_slot).map(|arb| arb.slot_a) else {
                continue;
            };
            if !self.owns_edge(slot, slot_a) {
                continue;
            }
            let Self {
                arbiters: pool,
                contacts,
                arbiter_cache,
                ..
            } = self;
            if let Some(arb) = pool.get_mut(arb_slot) {
                if arbiter_cache.get(&arb.pair()) == Some(&arb_slot) {
                    arbiter_cache.remove(&arb.pair());
                }
                arb.cached = false;
                arb.contacts.detach(contacts);
            }
            self.active_arbiters.retain(|&s| s != arb_slot);
        }

        for id in constraints {
            let Some(&c_slot) = self.constraint_index.get(&id) else {
                continue;
            };
            let Some(slot_a) = self.constraints.get(c_slot).map(|c| c.slot_a) else {
                continue;
            };
            if self.owns_edge(slot, slot_a) {
                self.active_constraints.retain(|&s| s != c_slot);
            }
        }
    }

    /// Update idle times, rebuild the contact graph and put idle components
    /// to sleep.
    pub(crate) fn process_components(&mut self, dt: f64) {
        let sleep = self.config().sleep.clone();
        let sleep_threshold = sleep.sleep_time_threshold;

        if sleep_threshold.is_some() {
            let dvsq = sleep.idle_speed_squared(&self.config().gravity, dt);
            for &slot in &self.active_bodies {
                let Some(body) = self.bodies.get_mut(slot) else {
                    continue;
                };
                if !body.is_dynamic() {
                    continue;
                }
                let threshold = if dvsq > 0.0 { body.mass() * dvsq } else { 0.0 };
                body.sleep.idle_time = if body.idle_energy() > threshold {
                    0.0
                } else {
                    body.sleep.idle_time + dt
                };
            }
        }

        // Activations below may append restored arbiters; those are already
        // threaded.
        let count = self.active_arbiters.len();
        for i in 0..count {
            let Some(&arb_slot) = self.active_arbiters.get(i) else {
                break;
            };
            let Some((slot_a, slot_b)) = self.arbiters.get(arb_slot).map(|a| (a.slot_a, a.slot_b)) else {
                continue;
            };
            if sleep_threshold.is_some() {
                let kinematic_or_sleeping = |s: usize| {
                    self.bodies
                        .get(s)
                        .map(|b| (b.is_kinematic(), b.is_sleeping()))
                        .unwrap_or_default()
                };
                let (a_kinematic, a_sleeping) = kinematic_or_sleeping(slot_a);
                let (b_kinematic, b_sleeping) = kinematic_or_sleeping(slot_b);
                if b_kinematic || a_sleeping {
                    self.activate_slot(slot_a);
                }
                if a_kinematic || b_sleeping {
                    self.activate_slot(slot_b);
                }
            }
            self.thread_arbiter(arb_slot, slot_a);
            self.thread_arbiter(arb_slot, slot_b);
        }

        let Some(threshold) = sleep_threshold else {
            return;
        };

        let kinematic_links: Vec<(usize, usize)> = self
            .active_constraints
            .iter()
            .filter_map(|&c| self.constraints.get(c))
            .map(|c| (c.slot_a, c.slot_b))
            .collect();
        for (slot_a, slot_b) in kinematic_links {
            if self.bodies.get(slot_b).is_some_and(Body::is_kinematic) {
                self.activate_slot(slot_a);
            }
            if self.bodies.get(slot_a).is_some_and(Body::is_kinematic) {
                self.activate_slot(slot_b);
            }
        }

        let mut visited = vec![false; self.bodies.capacity()];
        let mut i = 0;
        while let Some(&root_slot) = self.active_bodies.get(i) {
            i += 1;
            if visited.get(root_slot).copied().unwrap_or(true) {
                continue;
            }
            let members = self.flood_fill(root_slot, &mut visited);
            if members.is_empty() {
                continue;
            }

            let idle = members.iter().all(|&m| {
                self.bodies
                    .get(m)
                    .is_some_and(|b| b.sleep.idle_for(threshold))
            });
            if !idle {
                continue;
            }

            let Some(root) = self.bodies.get(root_slot).map(|b| b.id) else {
                continue;
            };
            for &member in &members {
                self.deactivate_body(member);
                if let Some(body) = self.bodies.get_mut(member) {
                    body.sleep.root = Some(root);
                }
            }
            debug!(root = root.raw(), bodies = members.len(), "component fell asleep");
            self.sleeping_components.push(SleepingComponent { root, members });
            // The active list shrank; rescan from the start. Visited bodies are skipped.
            i = 0;
        }
    }

    /// Collect the awake dynamic bodies connected to `root` through arbiters
    /// and constraints.
    fn flood_fill(&self, root: usize, visited: &mut [bool]) -> Vec<usize> {
        let mut members = Vec::new();
        let mut stack = vec![root];
        while let Some(slot) = stack.pop() {
            let Some(body) = self.bodies.get(slot) else {
                continue;
            };
            if !body.is_dynamic() || body.is_sleeping() {
                continue;
            }
            match visited.get_mut(slot) {
                Some(seen) if !*seen => *seen = true,
                _ => continue,
            }
            members.push(slot);

            for &arb in &body.arbiters {
                if let Some(arb) = self.arbiters.get(arb) {
                    stack.push(arb.other_slot(slot));
                }
            }
            for id in &body.constraints {
                if let Some(c) = self.constraint_index.get(id).and_then(|&c| self.constraints.get(c)) {
                    stack.push(c.other_slot(slot));
                }
            }
        }
        members
    }
}
