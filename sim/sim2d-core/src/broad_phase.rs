//! Broad-phase collision detection.
//!
//! The broad phase tracks one bounding box per shape and proposes candidate
//! pairs whose boxes overlap. Shapes are split into a dynamic and a static set:
//! shapes on static bodies and on sleeping bodies are static, and two static
//! shapes are never reported as a pair.
//!
//! The broad phase also remembers the GJK collision id last recorded for each
//! reported pair, so the narrow phase can seed its simplex from the previous
//! step's answer.
//!
//! # Algorithm
//!
//! [`SweepAndPrune`] projects every box onto the axis with the largest spread
//! of box centers, sorts the intervals by their minimum endpoint and sweeps to
//! find overlaps. [`BruteForce`] tests every pair and exists mostly as a
//! reference for tests.
//!
//! # Example
//!
//! ```
//! use sim2d_core::broad_phase::{Aabb, BroadPhase, SweepAndPrune};
//! use sim2d_types::ShapeId;
//! use nalgebra::{Point2, Vector2};
//!
//! let mut sap = SweepAndPrune::new();
//! let half = Vector2::new(1.0, 1.0);
//! sap.insert(ShapeId::new(1), Aabb::from_center(Point2::new(0.0, 0.0), half), false);
//! sap.insert(ShapeId::new(2), Aabb::from_center(Point2::new(1.5, 0.0), half), false);
//! sap.insert(ShapeId::new(3), Aabb::from_center(Point2::new(9.0, 0.0), half), false);
//!
//! let pairs = sap.find_pairs();
//! assert_eq!(pairs.len(), 1);
//! assert_eq!((pairs[0].a, pairs[0].b), (ShapeId::new(1), ShapeId::new(2)));
//! ```

use hashbrown::HashMap;
use nalgebra::{Point2, Vector2};
use sim2d_types::ShapeId;

use crate::gjk_epa::CollisionId;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Point2<f64>,
    /// Maximum corner of the bounding box.
    pub max: Point2<f64>,
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point2<f64>, max: Point2<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point2<f64>, half_extents: Vector2<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Check if this AABB overlaps with another AABB.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// Check whether a point lies inside the box.
    #[must_use]
    pub fn contains_point(&self, point: &Point2<f64>) -> bool {
        (self.min.x..=self.max.x).contains(&point.x) && (self.min.y..=self.max.y).contains(&point.y)
    }

    /// Expand this AABB by a margin on all sides.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector2::new(margin, margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Smallest box containing both boxes.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> Point2<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Fraction along the segment `start -> end` at which it enters the box,
    /// or `None` if it misses. A segment starting inside enters at 0.
    ///
    /// Slab test; an axis the segment does not move along only checks that
    /// the start lies between that axis' bounds.
    #[must_use]
    pub fn segment_fraction(&self, start: &Point2<f64>, end: &Point2<f64>) -> Option<f64> {
        fn slab(min: f64, max: f64, start: f64, delta: f64) -> Option<(f64, f64)> {
            if delta == 0.0 {
                return (min..=max)
                    .contains(&start)
                    .then_some((f64::NEG_INFINITY, f64::INFINITY));
            }
            let t1 = (min - start) / delta;
            let t2 = (max - start) / delta;
            Some((t1.min(t2), t1.max(t2)))
        }

        let delta = end - start;
        let (x_enter, x_exit) = slab(self.min.x, self.max.x, start.x, delta.x)?;
        let (y_enter, y_exit) = slab(self.min.y, self.max.y, start.y, delta.y)?;
        let enter = x_enter.max(y_enter).max(0.0);
        let exit = x_exit.min(y_exit).min(1.0);
        (enter <= exit).then_some(enter)
    }

    /// Get the minimum value along a specific axis.
    #[must_use]
    pub fn min_on_axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.min.x,
            Axis::Y => self.min.y,
        }
    }

    /// Get the maximum value along a specific axis.
    #[must_use]
    pub fn max_on_axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.max.x,
            Axis::Y => self.max.y,
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point2::origin(), Point2::origin())
    }
}

/// Coordinate axis for sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// X-axis (left-right).
    X,
    /// Y-axis (down-up).
    Y,
}

/// A pair of shapes whose boxes overlap.
///
/// `a` always has the smaller shape id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePair {
    /// Shape with the smaller id.
    pub a: ShapeId,
    /// Shape with the larger id.
    pub b: ShapeId,
    /// Collision id recorded for this pair on the previous step.
    pub hint: Option<CollisionId>,
}

/// Spatial index used to find candidate shape pairs.
pub trait BroadPhase: std::fmt::Debug {
    /// Add a shape. Re-inserting an existing shape replaces its box.
    fn insert(&mut self, shape: ShapeId, aabb: Aabb, is_static: bool);

    /// Remove a shape. Returns whether it was present.
    fn remove(&mut self, shape: ShapeId) -> bool;

    /// Update the bounding box of a shape.
    fn update(&mut self, shape: ShapeId, aabb: Aabb);

    /// Move a shape between the dynamic and the static set.
    fn set_static(&mut self, shape: ShapeId, is_static: bool);

    /// Whether the shape is indexed.
    fn contains(&self, shape: ShapeId) -> bool;

    /// Whether the shape is in the static set.
    fn is_static(&self, shape: ShapeId) -> Option<bool>;

    /// All overlapping pairs with at least one dynamic shape.
    fn find_pairs(&mut self) -> Vec<CandidatePair>;

    /// Remember the collision id produced for a pair.
    fn record_collision_id(&mut self, a: ShapeId, b: ShapeId, id: CollisionId);

    /// Shapes whose boxes overlap `aabb`, in insertion order.
    fn query_aabb(&self, aabb: &Aabb) -> Vec<ShapeId>;

    /// Shapes whose boxes, grown by `radius`, are touched by the segment
    /// `start -> end`, ordered by where the segment enters each box.
    fn segment_query(&self, start: &Point2<f64>, end: &Point2<f64>, radius: f64) -> Vec<ShapeId>;

    /// Number of indexed shapes.
    fn len(&self) -> usize;

    /// Whether no shapes are indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Proxy {
    shape: ShapeId,
    aabb: Aabb,
    is_static: bool,
}

fn pair_key(a: ShapeId, b: ShapeId) -> (ShapeId, ShapeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shape boxes plus the per-pair collision id cache shared by both algorithms.
#[derive(Debug, Clone, Default)]
struct ProxySet {
    proxies: Vec<Proxy>,
    index: HashMap<ShapeId, usize>,
    hints: HashMap<(ShapeId, ShapeId), CollisionId>,
}

impl ProxySet {
    fn insert(&mut self, shape: ShapeId, aabb: Aabb, is_static: bool) {
        let proxy = Proxy {
            shape,
            aabb,
            is_static,
        };
        if let Some(&i) = self.index.get(&shape) {
            self.proxies[i] = proxy;
        } else {
            self.index.insert(shape, self.proxies.len());
            self.proxies.push(proxy);
        }
    }

    fn remove(&mut self, shape: ShapeId) -> bool {
        let Some(i) = self.index.remove(&shape) else {
            return false;
        };
        self.proxies.remove(i);
        for proxy in &self.proxies[i..] {
            if let Some(slot) = self.index.get_mut(&proxy.shape) {
                *slot -= 1;
            }
        }
        self.hints.retain(|&(a, b), _| a != shape && b != shape);
        true
    }

    fn get_mut(&mut self, shape: ShapeId) -> Option<&mut Proxy> {
        let &i = self.index.get(&shape)?;
        self.proxies.get_mut(i)
    }

    fn candidate(&self, a: ShapeId, b: ShapeId) -> CandidatePair {
        let (a, b) = pair_key(a, b);
        CandidatePair {
            a,
            b,
            hint: self.hints.get(&(a, b)).copied(),
        }
    }

    /// Forget hints for pairs that no longer overlap.
    fn retain_hints(&mut self, pairs: &[CandidatePair]) {
        if self.hints.is_empty() {
            return;
        }
        let mut live = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(id) = self.hints.get(&(pair.a, pair.b)) {
                live.insert((pair.a, pair.b), *id);
            }
        }
        self.hints = live;
    }

    fn query(&self, aabb: &Aabb) -> Vec<ShapeId> {
        self.proxies
            .iter()
            .filter(|proxy| proxy.aabb.overlaps(aabb))
            .map(|proxy| proxy.shape)
            .collect()
    }

    fn segment_query(&self, start: &Point2<f64>, end: &Point2<f64>, radius: f64) -> Vec<ShapeId> {
        let mut hits: Vec<(f64, ShapeId)> = self
            .proxies
            .iter()
            .filter_map(|proxy| {
                let t = proxy.aabb.expanded(radius).segment_fraction(start, end)?;
                Some((t, proxy.shape))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, shape)| shape).collect()
    }
}

macro_rules! delegate_proxy_set {
    () => {
        fn insert(&mut self, shape: ShapeId, aabb: Aabb, is_static: bool) {
            self.set.insert(shape, aabb.expanded(self.margin), is_static);
        }

        fn remove(&mut self, shape: ShapeId) -> bool {
            self.set.remove(shape)
        }

        fn update(&mut self, shape: ShapeId, aabb: Aabb) {
            let margin = self.margin;
            if let Some(proxy) = self.set.get_mut(shape) {
                proxy.aabb = aabb.expanded(margin);
            }
        }

        fn set_static(&mut self, shape: ShapeId, is_static: bool) {
            if let Some(proxy) = self.set.get_mut(shape) {
                proxy.is_static = is_static;
            }
        }

        fn contains(&self, shape: ShapeId) -> bool {
            self.set.index.contains_key(&shape)
        }

        fn is_static(&self, shape: ShapeId) -> Option<bool> {
            let &i = self.set.index.get(&shape)?;
            Some(self.set.proxies[i].is_static)
        }

        fn record_collision_id(&mut self, a: ShapeId, b: ShapeId, id: CollisionId) {
            self.set.hints.insert(pair_key(a, b), id);
        }

        fn query_aabb(&self, aabb: &Aabb) -> Vec<ShapeId> {
            self.set.query(aabb)
        }

        fn segment_query(
            &self,
            start: &Point2<f64>,
            end: &Point2<f64>,
            radius: f64,
        ) -> Vec<ShapeId> {
            self.set.segment_query(start, end, radius)
        }

        fn len(&self) -> usize {
            self.set.proxies.len()
        }
    };
}

/// Sweep-and-Prune (Sort-and-Sweep) broad-phase algorithm.
///
/// For temporal coherence (shapes moving slowly between steps), the interval
/// list stays nearly sorted and the sort runs close to linear time.
#[derive(Debug, Clone, Default)]
pub struct SweepAndPrune {
    set: ProxySet,
    /// Scratch list of proxy indices sorted on the sweep axis.
    order: Vec<usize>,
    /// Margin added to boxes for predictive collision detection.
    margin: f64,
}

impl SweepAndPrune {
    /// Create a new sweep-and-prune broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a predictive margin for fast-moving shapes.
    #[must_use]
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Choose the axis with the largest spread of box centers.
    fn choose_sweep_axis(proxies: &[Proxy]) -> Axis {
        let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for proxy in proxies {
            let c = proxy.aabb.center();
            min = min.inf(&c);
            max = max.sup(&c);
        }
        if max.x - min.x >= max.y - min.y {
            Axis::X
        } else {
            Axis::Y
        }
    }
}

impl BroadPhase for SweepAndPrune {
    delegate_proxy_set!();

    fn find_pairs(&mut self) -> Vec<CandidatePair> {
        let proxies = &self.set.proxies;
        let axis = Self::choose_sweep_axis(proxies);

        self.order.clear();
        self.order.extend(0..proxies.len());
        self.order.sort_by(|&i, &j| {
            proxies[i]
                .aabb
                .min_on_axis(axis)
                .total_cmp(&proxies[j].aabb.min_on_axis(axis))
                .then(proxies[i].shape.cmp(&proxies[j].shape))
        });

        let mut pairs = Vec::new();
        for (n, &i) in self.order.iter().enumerate() {
            let first = &proxies[i];
            let end = first.aabb.max_on_axis(axis);
            for &j in &self.order[n + 1..] {
                let second = &proxies[j];
                if second.aabb.min_on_axis(axis) > end {
                    break;
                }
                if first.is_static && second.is_static {
                    continue;
                }
                if first.aabb.overlaps(&second.aabb) {
                    pairs.push(self.set.candidate(first.shape, second.shape));
                }
            }
        }

        self.set.retain_hints(&pairs);
        pairs
    }
}

/// Brute-force O(n²) broad phase.
#[derive(Debug, Clone, Default)]
pub struct BruteForce {
    set: ProxySet,
    margin: f64,
}

impl BruteForce {
    /// Create a new brute-force broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadPhase for BruteForce {
    delegate_proxy_set!();

    fn find_pairs(&mut self) -> Vec<CandidatePair> {
        let proxies = &self.set.proxies;
        let mut pairs = Vec::new();
        for (i, first) in proxies.iter().enumerate() {
            for second in &proxies[i + 1..] {
                if first.is_static && second.is_static {
                    continue;
                }
                if first.aabb.overlaps(&second.aabb) {
                    pairs.push(self.set.candidate(first.shape, second.shape));
                }
            }
        }
        self.set.retain_hints(&pairs);
        pairs
    }
}
