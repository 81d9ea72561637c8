//! Collision shapes: circles, segments and convex polygons.
//!
//! A [`Shape`] pairs a local [`ShapeGeometry`] with its material, filter and
//! collision tag. The world keeps a world-space copy of the geometry in sync
//! with the owning body's pose; the narrow phase only ever reads that copy.

use nalgebra::{Point2, Vector2};
use sim2d_types::{BodyId, CollisionType, MassProperties, Pose, ShapeId, SimError};

use crate::body::cross;
use crate::broad_phase::Aabb;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum polygon vertex count. Support indices are packed into 8 bits.
pub const MAX_POLYGON_VERTICES: usize = 255;

/// Left perpendicular `(-y, x)`.
#[inline]
pub(crate) fn perp(v: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(-v.y, v.x)
}

/// Right perpendicular `(y, -x)`.
#[inline]
pub(crate) fn rperp(v: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(v.y, -v.x)
}

/// Normalize, returning zero for a zero-length vector.
#[inline]
pub(crate) fn normalize_or_zero(v: &Vector2<f64>) -> Vector2<f64> {
    v / (v.norm() + f64::MIN_POSITIVE)
}

/// Closest point to `p` on the segment `a`-`b`.
pub(crate) fn closest_point_on_segment(
    p: &Point2<f64>,
    a: &Point2<f64>,
    b: &Point2<f64>,
) -> Point2<f64> {
    let delta = a - b;
    let t = (delta.dot(&(p - b)) / delta.norm_squared()).clamp(0.0, 1.0);
    if t.is_nan() {
        return *a;
    }
    b + delta * t
}

/// Shape kind, ordered by collision dispatch rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeKind {
    /// A circle.
    Circle,
    /// A segment with rounded ends.
    Segment,
    /// A convex polygon.
    Polygon,
}

/// Body-local geometry of a shape.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeGeometry {
    /// Circle with a center offset from the body origin.
    Circle {
        /// Center in body coordinates.
        center: Point2<f64>,
        /// Radius.
        radius: f64,
    },
    /// Segment between two body-local points, thickened by a radius.
    Segment {
        /// First endpoint.
        a: Point2<f64>,
        /// Second endpoint.
        b: Point2<f64>,
        /// Thickness radius.
        radius: f64,
    },
    /// Convex polygon with counter-clockwise vertices, rounded by a radius.
    Polygon {
        /// Vertices in counter-clockwise order.
        vertices: Vec<Point2<f64>>,
        /// Corner radius.
        radius: f64,
    },
}

impl ShapeGeometry {
    /// A circle centered on the body origin.
    #[must_use]
    pub fn circle(radius: f64) -> Self {
        Self::Circle {
            center: Point2::origin(),
            radius,
        }
    }

    /// A circle with an offset center.
    #[must_use]
    pub const fn circle_at(center: Point2<f64>, radius: f64) -> Self {
        Self::Circle { center, radius }
    }

    /// A segment between two points.
    #[must_use]
    pub const fn segment(a: Point2<f64>, b: Point2<f64>, radius: f64) -> Self {
        Self::Segment { a, b, radius }
    }

    /// An axis-aligned box centered on the body origin.
    #[must_use]
    pub fn box_shape(width: f64, height: f64, radius: f64) -> Self {
        let (hw, hh) = (0.5 * width, 0.5 * height);
        Self::Polygon {
            vertices: vec![
                Point2::new(-hw, -hh),
                Point2::new(hw, -hh),
                Point2::new(hw, hh),
                Point2::new(-hw, hh),
            ],
            radius,
        }
    }

    /// A convex polygon.
    ///
    /// Clockwise input is reversed. Returns an error for fewer than three or
    /// more than [`MAX_POLYGON_VERTICES`] vertices, repeated vertices, or a
    /// concave outline.
    pub fn polygon(mut vertices: Vec<Point2<f64>>, radius: f64) -> sim2d_types::Result<Self> {
        if signed_area(&vertices) < 0.0 {
            vertices.reverse();
        }
        check_outline(&vertices)?;
        Ok(Self::Polygon { vertices, radius })
    }

    /// Dispatch rank.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        match self {
            Self::Circle { .. } => ShapeKind::Circle,
            Self::Segment { .. } => ShapeKind::Segment,
            Self::Polygon { .. } => ShapeKind::Polygon,
        }
    }

    /// Rounding radius.
    #[must_use]
    pub const fn radius(&self) -> f64 {
        match self {
            Self::Circle { radius, .. }
            | Self::Segment { radius, .. }
            | Self::Polygon { radius, .. } => *radius,
        }
    }

    /// Validate dimensions, and for polygons the outline.
    ///
    /// Polygon vertices must already be counter-clockwise; only
    /// [`Self::polygon`] fixes the winding.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative radius, a non-positive circle radius,
    /// or a polygon outline [`Self::polygon`] would reject.
    pub fn validate(&self) -> sim2d_types::Result<()> {
        let radius = self.radius();
        if radius.is_nan() || radius < 0.0 {
            return Err(SimError::invalid_shape(format!(
                "radius must be non-negative, got {radius}"
            )));
        }
        match self {
            Self::Circle { radius, .. } if *radius <= 0.0 => {
                Err(SimError::invalid_shape("circle radius must be positive"))
            }
            Self::Polygon { vertices, .. } => check_outline(vertices),
            _ => Ok(()),
        }
    }

    /// Area, including the rounded border.
    #[must_use]
    pub fn area(&self) -> f64 {
        use std::f64::consts::PI;
        match self {
            Self::Circle { radius, .. } => PI * radius * radius,
            Self::Segment { a, b, radius } => radius * (PI * radius + 2.0 * (b - a).norm()),
            Self::Polygon { vertices, radius } => {
                let perimeter: f64 = edges(vertices).map(|(a, b)| (b - a).norm()).sum();
                radius * (PI * radius + perimeter) + signed_area(vertices)
            }
        }
    }

    /// Centroid in body coordinates.
    #[must_use]
    pub fn centroid(&self) -> Point2<f64> {
        match self {
            Self::Circle { center, .. } => *center,
            Self::Segment { a, b, .. } => nalgebra::center(a, b),
            Self::Polygon { vertices, .. } => {
                let mut sum = Vector2::zeros();
                let mut weight = 0.0;
                for (a, b) in edges(vertices) {
                    let c = cross(&a.coords, &b.coords);
                    sum += (a.coords + b.coords) * c;
                    weight += c;
                }
                Point2::from(sum / (3.0 * weight))
            }
        }
    }

    /// Moment of inertia about the body origin for a given mass.
    #[must_use]
    pub fn moment_for_mass(&self, mass: f64) -> f64 {
        match self {
            Self::Circle { center, radius } => {
                mass * (0.5 * radius * radius + center.coords.norm_squared())
            }
            Self::Segment { a, b, radius } => {
                let offset = nalgebra::center(a, b);
                let length = (b - a).norm() + 2.0 * radius;
                mass * ((length * length + 4.0 * radius * radius) / 12.0
                    + offset.coords.norm_squared())
            }
            Self::Polygon { vertices, .. } => {
                let mut numerator = 0.0;
                let mut denominator = 0.0;
                for (a, b) in edges(vertices) {
                    let c = cross(&a.coords, &b.coords);
                    numerator += c
                        * (a.coords.dot(&a.coords) + a.coords.dot(&b.coords) + b.coords.dot(&b.coords));
                    denominator += c;
                }
                mass * numerator / (6.0 * denominator)
            }
        }
    }

    /// Mass properties for a uniform density.
    #[must_use]
    pub fn mass_properties(&self, density: f64) -> MassProperties {
        let mass = density * self.area();
        MassProperties::new(mass, self.moment_for_mass(mass))
    }

    /// Transform into world space.
    /// Segment query against this geometry placed at `pose`.
    ///
    /// See [`Shape::segment_query`]; attached shapes should use that instead,
    /// since it reuses the cached world geometry.
    #[must_use]
    pub fn segment_query(
        &self,
        pose: &Pose,
        start: &Point2<f64>,
        end: &Point2<f64>,
        radius: f64,
    ) -> Option<SegmentQuery> {
        self.to_world(pose).segment_query(start, end, radius)
    }

    pub(crate) fn to_world(&self, pose: &Pose) -> WorldGeometry {
        match self {
            Self::Circle { center, radius } => WorldGeometry::Circle {
                center: pose.transform_point(center),
                radius: *radius,
            },
            Self::Segment { a, b, radius } => {
                let ta = pose.transform_point(a);
                let tb = pose.transform_point(b);
                WorldGeometry::Segment {
                    a: ta,
                    b: tb,
                    normal: rperp(&normalize_or_zero(&(tb - ta))),
                    radius: *radius,
                }
            }
            Self::Polygon { vertices, radius } => {
                let count = vertices.len();
                let planes = (0..count)
                    .map(|i| {
                        let prev = pose.transform_point(&vertices[(i + count - 1) % count]);
                        let vertex = pose.transform_point(&vertices[i]);
                        SplittingPlane {
                            vertex,
                            normal: normalize_or_zero(&rperp(&(vertex - prev))),
                        }
                    })
                    .collect();
                WorldGeometry::Polygon {
                    planes,
                    radius: *radius,
                }
            }
        }
    }
}

/// Vertex count, counter-clockwise winding and convexity of a polygon outline.
fn check_outline(vertices: &[Point2<f64>]) -> sim2d_types::Result<()> {
    let count = vertices.len();
    if !(3..=MAX_POLYGON_VERTICES).contains(&count) {
        return Err(SimError::invalid_shape(format!(
            "polygon needs 3..={MAX_POLYGON_VERTICES} vertices, got {count}"
        )));
    }
    if vertices.iter().any(|v| !v.coords.iter().all(|c| c.is_finite())) {
        return Err(SimError::invalid_shape("polygon vertex is not finite"));
    }
    if signed_area(vertices) <= 0.0 {
        return Err(SimError::invalid_shape(
            "polygon must wind counter-clockwise with positive area",
        ));
    }
    for i in 0..count {
        let a = vertices[i];
        let b = vertices[(i + 1) % count];
        let c = vertices[(i + 2) % count];
        if (b - a).norm_squared() == 0.0 {
            return Err(SimError::invalid_shape("polygon has repeated vertices"));
        }
        if cross(&(b - a), &(c - b)) < 0.0 {
            return Err(SimError::invalid_shape("polygon is not convex"));
        }
    }
    Ok(())
}

fn signed_area(vertices: &[Point2<f64>]) -> f64 {
    0.5 * edges(vertices)
        .map(|(a, b)| cross(&a.coords, &b.coords))
        .sum::<f64>()
}

fn edges(vertices: &[Point2<f64>]) -> impl Iterator<Item = (Point2<f64>, Point2<f64>)> + '_ {
    let count = vertices.len();
    (0..count).map(move |i| (vertices[i], vertices[(i + 1) % count]))
}

/// Polygon vertex with the outward normal of the edge ending at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplittingPlane {
    pub vertex: Point2<f64>,
    pub normal: Vector2<f64>,
}

/// World-space geometry cached after every position update.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorldGeometry {
    Circle {
        center: Point2<f64>,
        radius: f64,
    },
    Segment {
        a: Point2<f64>,
        b: Point2<f64>,
        normal: Vector2<f64>,
        radius: f64,
    },
    Polygon {
        planes: Vec<SplittingPlane>,
        radius: f64,
    },
}

/// A support point and the feature index that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportPoint {
    /// World-space point.
    pub point: Point2<f64>,
    /// Vertex index (0 for circles).
    pub index: u32,
}

/// Result of a point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointQuery {
    /// Closest point on the shape surface.
    pub point: Point2<f64>,
    /// Signed distance, negative inside the shape.
    pub distance: f64,
    /// Gradient of the distance field at the query point.
    pub gradient: Vector2<f64>,
}

/// Where a thick query segment first touches a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentQuery {
    /// Point on the shape surface.
    pub point: Point2<f64>,
    /// Surface normal at the hit, pointing out of the shape.
    pub normal: Vector2<f64>,
    /// Fraction along the query segment: 0 at its start, 1 at its end.
    pub alpha: f64,
}

impl WorldGeometry {
    pub(crate) fn radius(&self) -> f64 {
        match self {
            Self::Circle { radius, .. }
            | Self::Segment { radius, .. }
            | Self::Polygon { radius, .. } => *radius,
        }
    }

    /// Farthest core point (without radius) along `direction`.
    pub(crate) fn support_point(&self, direction: &Vector2<f64>) -> SupportPoint {
        match self {
            Self::Circle { center, .. } => SupportPoint {
                point: *center,
                index: 0,
            },
            Self::Segment { a, b, .. } => {
                if a.coords.dot(direction) > b.coords.dot(direction) {
                    SupportPoint { point: *a, index: 0 }
                } else {
                    SupportPoint { point: *b, index: 1 }
                }
            }
            Self::Polygon { planes, .. } => {
                let index = polygon_support_index(planes, direction);
                SupportPoint {
                    point: planes[index].vertex,
                    index: index as u32,
                }
            }
        }
    }

    /// Core point for a feature index previously returned by [`Self::support_point`].
    pub(crate) fn point_at(&self, index: u32) -> Point2<f64> {
        match self {
            Self::Circle { center, .. } => *center,
            Self::Segment { a, b, .. } => {
                if index == 0 {
                    *a
                } else {
                    *b
                }
            }
            Self::Polygon { planes, .. } => planes[index as usize % planes.len()].vertex,
        }
    }

    pub(crate) fn aabb(&self) -> Aabb {
        match self {
            Self::Circle { center, radius } => {
                Aabb::from_center(*center, Vector2::new(*radius, *radius))
            }
            Self::Segment { a, b, radius, .. } => Aabb::new(
                Point2::new(a.x.min(b.x) - radius, a.y.min(b.y) - radius),
                Point2::new(a.x.max(b.x) + radius, a.y.max(b.y) + radius),
            ),
            Self::Polygon { planes, radius } => {
                let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
                let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
                for plane in planes {
                    min = min.inf(&plane.vertex);
                    max = max.sup(&plane.vertex);
                }
                Aabb::new(
                    min - Vector2::new(*radius, *radius),
                    max + Vector2::new(*radius, *radius),
                )
            }
        }
    }

    pub(crate) fn point_query(&self, p: &Point2<f64>) -> PointQuery {
        match self {
            Self::Circle { center, radius } => rounded_point_query(p, center, *radius),
            Self::Segment { a, b, radius, .. } => {
                rounded_point_query(p, &closest_point_on_segment(p, a, b), *radius)
            }
            Self::Polygon { planes, radius } => {
                let mut prev = planes[planes.len() - 1].vertex;
                let mut min_dist = f64::INFINITY;
                let mut closest_point = Point2::origin();
                let mut closest_normal = Vector2::zeros();
                let mut outside = false;

                for plane in planes {
                    outside = outside || plane.normal.dot(&(p - plane.vertex)) > 0.0;
                    let closest = closest_point_on_segment(p, &prev, &plane.vertex);
                    let dist = (p - closest).norm();
                    if dist < min_dist {
                        min_dist = dist;
                        closest_point = closest;
                        closest_normal = plane.normal;
                    }
                    prev = plane.vertex;
                }

                let dist = if outside { min_dist } else { -min_dist };
                let g = (p - closest_point) / dist;
                PointQuery {
                    point: closest_point + g * *radius,
                    distance: dist - radius,
                    gradient: if min_dist > 1e-5 { g } else { closest_normal },
                }
            }
        }
    }

    /// First contact of a circle of radius `radius` swept from `a` to `b`.
    ///
    /// A sweep that starts touching the shape reports a hit at `alpha = 0`.
    pub(crate) fn segment_query(
        &self,
        a: &Point2<f64>,
        b: &Point2<f64>,
        radius: f64,
    ) -> Option<SegmentQuery> {
        let nearest = self.point_query(a);
        if nearest.distance <= radius {
            return Some(SegmentQuery {
                point: nearest.point,
                normal: nearest.gradient,
                alpha: 0.0,
            });
        }

        match self {
            Self::Circle { center, radius: r } => circle_segment_query(center, *r, a, b, radius),
            Self::Segment {
                a: ta,
                b: tb,
                normal,
                radius: r,
            } => thick_segment_query(ta, tb, normal, *r, a, b, radius),
            Self::Polygon { planes, radius: r } => polygon_segment_query(planes, *r, a, b, radius),
        }
    }
}

/// Sweep a circle of radius `r2` from `a` to `b` against a circle of radius `r1`.
#[allow(clippy::suspicious_operation_groupings)]
fn circle_segment_query(
    center: &Point2<f64>,
    r1: f64,
    a: &Point2<f64>,
    b: &Point2<f64>,
    r2: f64,
) -> Option<SegmentQuery> {
    let da = a - center;
    let db = b - center;
    let rsum = r1 + r2;

    // |da + t (db - da)| = rsum, solved for the smaller root.
    let qa = (db - da).norm_squared();
    let qb = da.dot(&db) - da.norm_squared();
    let det = qb * qb - qa * (da.norm_squared() - rsum * rsum);
    if qa == 0.0 || det.is_nan() || det < 0.0 {
        return None;
    }

    let t = (-qb - det.sqrt()) / qa;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let n = (da + (db - da) * t).try_normalize(0.0)?;
    Some(SegmentQuery {
        point: a + (b - a) * t - n * r2,
        normal: n,
        alpha: t,
    })
}

/// Sweep against a segment thickened by `seg_radius`: the flat side facing
/// the query start first, then the rounded caps.
fn thick_segment_query(
    ta: &Point2<f64>,
    tb: &Point2<f64>,
    normal: &Vector2<f64>,
    seg_radius: f64,
    a: &Point2<f64>,
    b: &Point2<f64>,
    r2: f64,
) -> Option<SegmentQuery> {
    let d = (ta - a).dot(normal);
    let r = seg_radius + r2;
    let flipped = if d > 0.0 { -normal } else { *normal };

    // Endpoints of the offset face, relative to the query start.
    let offset = flipped * r - a.coords;
    let face_a = ta.coords + offset;
    let face_b = tb.coords + offset;
    let delta = b - a;

    if cross(&delta, &face_a) * cross(&delta, &face_b) <= 0.0 {
        let d_offset = d + if d > 0.0 { -r } else { r };
        let ad = -d_offset;
        let bd = delta.dot(normal) - d_offset;
        if ad * bd < 0.0 {
            let t = ad / (ad - bd);
            return Some(SegmentQuery {
                point: a + delta * t - flipped * r2,
                normal: flipped,
                alpha: t,
            });
        }
        None
    } else if r == 0.0 {
        None
    } else {
        nearer(
            circle_segment_query(ta, seg_radius, a, b, r2),
            circle_segment_query(tb, seg_radius, a, b, r2),
        )
    }
}

/// Sweep against a convex polygon rounded by `radius`: every face plane
/// pushed out by the combined radius, then every rounded corner.
fn polygon_segment_query(
    planes: &[SplittingPlane],
    radius: f64,
    a: &Point2<f64>,
    b: &Point2<f64>,
    r2: f64,
) -> Option<SegmentQuery> {
    let count = planes.len();
    let rsum = radius + r2;
    let mut best = None;

    for (i, plane) in planes.iter().enumerate() {
        let n = plane.normal;
        let an = a.coords.dot(&n);
        let d = an - plane.vertex.coords.dot(&n) - rsum;
        if d < 0.0 {
            continue;
        }

        let t = d / (an - b.coords.dot(&n));
        if !(0.0..=1.0).contains(&t) {
            continue;
        }

        // Keep the hit only if it falls between the edge's endpoints.
        let point = a + (b - a) * t;
        let dt = cross(&n, &point.coords);
        let dt_min = cross(&n, &planes[(i + count - 1) % count].vertex.coords);
        let dt_max = cross(&n, &plane.vertex.coords);
        if dt_min <= dt && dt <= dt_max {
            best = nearer(
                best,
                Some(SegmentQuery {
                    point: point - n * r2,
                    normal: n,
                    alpha: t,
                }),
            );
        }
    }

    if rsum > 0.0 {
        for plane in planes {
            best = nearer(best, circle_segment_query(&plane.vertex, radius, a, b, r2));
        }
    }
    best
}

fn nearer(first: Option<SegmentQuery>, second: Option<SegmentQuery>) -> Option<SegmentQuery> {
    match (first, second) {
        (Some(x), Some(y)) => Some(if y.alpha < x.alpha { y } else { x }),
        (x, y) => x.or(y),
    }
}

fn rounded_point_query(p: &Point2<f64>, center: &Point2<f64>, radius: f64) -> PointQuery {
    let delta = p - center;
    let d = delta.norm();
    let gradient = if d > 0.0 { delta / d } else { Vector2::new(0.0, 1.0) };
    PointQuery {
        point: center + gradient * radius,
        distance: d - radius,
        gradient,
    }
}

pub(crate) fn polygon_support_index(planes: &[SplittingPlane], direction: &Vector2<f64>) -> usize {
    let mut max = f64::NEG_INFINITY;
    let mut index = 0;
    for (i, plane) in planes.iter().enumerate() {
        let d = plane.vertex.coords.dot(direction);
        if d > max {
            max = d;
            index = i;
        }
    }
    index
}

/// Surface properties combined pairwise by arbiters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Coefficient of restitution.
    pub elasticity: f64,
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Surface velocity for conveyor-belt style contacts.
    pub surface_velocity: Vector2<f64>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            elasticity: 0.0,
            friction: 0.0,
            surface_velocity: Vector2::zeros(),
        }
    }
}

/// Group/category/mask collision filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShapeFilter {
    /// Shapes sharing a non-zero group never collide.
    pub group: u64,
    /// Category bits this shape belongs to.
    pub categories: u32,
    /// Category bits this shape collides with.
    pub mask: u32,
}

impl Default for ShapeFilter {
    fn default() -> Self {
        Self::ALL
    }
}

impl ShapeFilter {
    /// Collides with everything.
    pub const ALL: Self = Self {
        group: 0,
        categories: u32::MAX,
        mask: u32::MAX,
    };

    /// Collides with nothing.
    pub const NONE: Self = Self {
        group: 0,
        categories: 0,
        mask: 0,
    };

    /// Create a filter.
    #[must_use]
    pub const fn new(group: u64, categories: u32, mask: u32) -> Self {
        Self {
            group,
            categories,
            mask,
        }
    }

    /// Whether two filters keep their shapes from colliding.
    #[must_use]
    pub const fn reject(&self, other: &Self) -> bool {
        (self.group != 0 && self.group == other.group)
            || (self.categories & other.mask) == 0
            || (other.categories & self.mask) == 0
    }
}

/// A collision shape attached to a body.
#[derive(Debug, Clone)]
pub struct Shape {
    pub(crate) id: ShapeId,
    pub(crate) body: BodyId,
    geometry: ShapeGeometry,
    /// Surface material.
    pub material: Material,
    /// Tag used to pick collision handlers.
    pub collision_type: CollisionType,
    /// Collision filter.
    pub filter: ShapeFilter,
    /// Sensors report collisions through handlers but produce no impulses.
    pub sensor: bool,
    pub(crate) world: WorldGeometry,
    pub(crate) aabb: Aabb,
}

impl Shape {
    /// Create an unattached shape. Ids are assigned by [`World::add_shape`](crate::World::add_shape).
    #[must_use]
    pub fn new(geometry: ShapeGeometry) -> Self {
        let world = geometry.to_world(&Pose::identity());
        let aabb = world.aabb();
        Self {
            id: ShapeId::new(0),
            body: BodyId::new(0),
            geometry,
            material: Material::default(),
            collision_type: CollisionType::DEFAULT,
            filter: ShapeFilter::ALL,
            sensor: false,
            world,
            aabb,
        }
    }

    /// Set the friction coefficient.
    #[must_use]
    pub fn with_friction(mut self, friction: f64) -> Self {
        self.material.friction = friction;
        self
    }

    /// Set the restitution.
    #[must_use]
    pub fn with_elasticity(mut self, elasticity: f64) -> Self {
        self.material.elasticity = elasticity;
        self
    }

    /// Set the surface velocity.
    #[must_use]
    pub fn with_surface_velocity(mut self, velocity: Vector2<f64>) -> Self {
        self.material.surface_velocity = velocity;
        self
    }

    /// Set the collision type tag.
    #[must_use]
    pub fn with_collision_type(mut self, collision_type: CollisionType) -> Self {
        self.collision_type = collision_type;
        self
    }

    /// Set the collision filter.
    #[must_use]
    pub fn with_filter(mut self, filter: ShapeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Mark as a sensor.
    #[must_use]
    pub fn as_sensor(mut self) -> Self {
        self.sensor = true;
        self
    }

    /// Shape id.
    #[must_use]
    pub const fn id(&self) -> ShapeId {
        self.id
    }

    /// Owning body.
    #[must_use]
    pub const fn body(&self) -> BodyId {
        self.body
    }

    /// Local geometry.
    #[must_use]
    pub const fn geometry(&self) -> &ShapeGeometry {
        &self.geometry
    }

    /// Dispatch rank.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        self.geometry.kind()
    }

    /// World-space bounding box as of the last update.
    #[must_use]
    pub const fn aabb(&self) -> Aabb {
        self.aabb
    }

    /// Farthest point along `direction` in world space, without the radius.
    #[must_use]
    pub fn support_point(&self, direction: &Vector2<f64>) -> SupportPoint {
        self.world.support_point(direction)
    }

    /// Distance query against the world-space shape.
    #[must_use]
    pub fn point_query(&self, point: &Point2<f64>) -> PointQuery {
        self.world.point_query(point)
    }

    /// Sweep a circle of `radius` from `start` to `end` against the
    /// world-space shape. A zero radius casts a plain ray segment.
    #[must_use]
    pub fn segment_query(
        &self,
        start: &Point2<f64>,
        end: &Point2<f64>,
        radius: f64,
    ) -> Option<SegmentQuery> {
        self.world.segment_query(start, end, radius)
    }

    /// Recompute world geometry for a body pose.
    pub fn update(&mut self, pose: &Pose) {
        self.world = self.geometry.to_world(pose);
        self.aabb = self.world.aabb();
    }

    /// Stable hash used for feature ids and arbiter keys.
    pub(crate) const fn hash_id(&self) -> u64 {
        self.id.raw()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> ShapeGeometry {
        ShapeGeometry::box_shape(2.0, 2.0, 0.0)
    }

    #[test]
    fn test_polygon_winding_is_normalized() {
        let clockwise = vec![
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 0.0),
        ];
        let poly = ShapeGeometry::polygon(clockwise, 0.0).unwrap();
        assert!(poly.area() > 0.0);
        assert_relative_eq!(poly.area(), 1.0);
    }

    #[test]
    fn test_concave_polygon_rejected() {
        let dart = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(1.0, 0.5),
            Point2::new(1.0, 2.0),
        ];
        assert!(ShapeGeometry::polygon(dart, 0.0).is_err());
        assert!(ShapeGeometry::polygon(vec![Point2::origin(); 2], 0.0).is_err());
    }

    #[test]
    fn test_validate_checks_polygon_outline() {
        let raw = |vertices: Vec<Point2<f64>>| ShapeGeometry::Polygon {
            vertices,
            radius: 0.0,
        };
        let square = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let mut clockwise = square.clone();
        clockwise.reverse();
        let dart = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(1.0, 0.5),
            Point2::new(1.0, 2.0),
        ];

        assert!(raw(square).validate().is_ok());
        assert!(unit_box().validate().is_ok());
        assert!(raw(Vec::new()).validate().is_err());
        assert!(raw(vec![Point2::origin(), Point2::new(1.0, 0.0)]).validate().is_err());
        assert!(raw(clockwise).validate().is_err());
        assert!(raw(dart).validate().is_err());
        assert!(raw(vec![Point2::origin(), Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)])
            .validate()
            .is_err());
    }

    #[test]
    fn test_box_mass_properties() {
        let mass = unit_box().mass_properties(1.0);
        assert_relative_eq!(mass.mass, 4.0);
        // m (w² + h²) / 12
        assert_relative_eq!(mass.moment, 4.0 * 8.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(unit_box().centroid(), Point2::origin(), epsilon = 1e-12);
    }

    #[test]
    fn test_circle_moment_with_offset() {
        let circle = ShapeGeometry::circle_at(Point2::new(1.0, 0.0), 1.0);
        assert_relative_eq!(circle.moment_for_mass(2.0), 2.0 * (0.5 + 1.0));
    }

    #[test]
    fn test_polygon_support_and_planes() {
        let mut shape = Shape::new(unit_box());
        shape.update(&Pose::from_position(Point2::new(5.0, 0.0)));

        let support = shape.support_point(&Vector2::new(1.0, 1.0));
        assert_eq!(support.index, 2);
        assert_relative_eq!(support.point, Point2::new(6.0, 1.0));

        let WorldGeometry::Polygon { planes, .. } = &shape.world else {
            panic!("expected polygon");
        };
        // Plane 1 closes edge 0 -> 1 along the bottom.
        assert_relative_eq!(planes[1].normal, Vector2::new(0.0, -1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_point_query_inside_and_outside() {
        let mut shape = Shape::new(unit_box());
        shape.update(&Pose::identity());

        let outside = shape.point_query(&Point2::new(3.0, 0.0));
        assert_relative_eq!(outside.distance, 2.0);
        assert_relative_eq!(outside.gradient, Vector2::new(1.0, 0.0), epsilon = 1e-12);

        let inside = shape.point_query(&Point2::new(0.5, 0.0));
        assert_relative_eq!(inside.distance, -0.5);
    }

    #[test]
    fn test_segment_query_circle() {
        let circle = ShapeGeometry::circle(1.0);
        let pose = Pose::from_position(Point2::new(5.0, 0.0));
        let (start, end) = (Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));

        let hit = circle.segment_query(&pose, &start, &end, 0.0).unwrap();
        assert_relative_eq!(hit.alpha, 0.4, epsilon = 1e-12);
        assert_relative_eq!(hit.point, Point2::new(4.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(hit.normal, Vector2::new(-1.0, 0.0), epsilon = 1e-12);

        // A thick query touches earlier but reports the same surface point.
        let thick = circle.segment_query(&pose, &start, &end, 0.5).unwrap();
        assert_relative_eq!(thick.alpha, 0.35, epsilon = 1e-12);
        assert_relative_eq!(thick.point, Point2::new(4.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_segment_query_thick_segment_face_and_cap() {
        let mut shape = Shape::new(ShapeGeometry::segment(
            Point2::new(-1.0, 0.0),
            Point2::new(1.0, 0.0),
            0.25,
        ));
        shape.update(&Pose::identity());

        let face = shape
            .segment_query(&Point2::new(0.0, 2.0), &Point2::new(0.0, -2.0), 0.0)
            .unwrap();
        assert_relative_eq!(face.alpha, 0.4375, epsilon = 1e-12);
        assert_relative_eq!(face.point, Point2::new(0.0, 0.25), epsilon = 1e-12);
        assert_relative_eq!(face.normal, Vector2::new(0.0, 1.0), epsilon = 1e-12);

        // From below the face flips to point at the query start.
        let under = shape
            .segment_query(&Point2::new(0.5, -2.0), &Point2::new(0.5, 2.0), 0.0)
            .unwrap();
        assert_relative_eq!(under.normal, Vector2::new(0.0, -1.0), epsilon = 1e-12);
        assert_relative_eq!(under.point, Point2::new(0.5, -0.25), epsilon = 1e-12);

        // Running along the axis meets the rounded end cap.
        let cap = shape
            .segment_query(&Point2::new(3.0, 0.0), &Point2::new(-3.0, 0.0), 0.0)
            .unwrap();
        assert_relative_eq!(cap.alpha, 1.75 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(cap.point, Point2::new(1.25, 0.0), epsilon = 1e-12);
        assert_relative_eq!(cap.normal, Vector2::new(1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_segment_query_rounded_polygon() {
        let mut shape = Shape::new(ShapeGeometry::box_shape(2.0, 2.0, 0.1));
        shape.update(&Pose::identity());

        let face = shape
            .segment_query(&Point2::new(0.0, 5.0), &Point2::new(0.0, -5.0), 0.0)
            .unwrap();
        assert_relative_eq!(face.alpha, 0.39, epsilon = 1e-12);
        assert_relative_eq!(face.point, Point2::new(0.0, 1.1), epsilon = 1e-12);
        assert_relative_eq!(face.normal, Vector2::new(0.0, 1.0), epsilon = 1e-12);

        // Aimed at a corner, the hit lands on the corner's rounding.
        let corner = shape
            .segment_query(&Point2::new(3.0, 3.0), &Point2::origin(), 0.0)
            .unwrap();
        let diagonal = Vector2::new(1.0, 1.0).normalize();
        assert_relative_eq!(corner.normal, diagonal, epsilon = 1e-9);
        assert_relative_eq!(corner.point, Point2::new(1.0, 1.0) + diagonal * 0.1, epsilon = 1e-9);
        assert_relative_eq!(corner.alpha, (2.0 - 0.1 / 2.0_f64.sqrt()) / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_segment_query_rotated_polygon() {
        let square = ShapeGeometry::box_shape(2.0, 2.0, 0.0);
        let pose = Pose::new(Point2::origin(), std::f64::consts::FRAC_PI_4);
        let root2 = 2.0_f64.sqrt();
        let hit = square
            .segment_query(&pose, &Point2::new(-4.0, 0.3), &Point2::new(0.0, 0.3), 0.0)
            .unwrap();
        // The rotated square's upper-left face lies on x - y = -√2.
        assert_relative_eq!(hit.point, Point2::new(0.3 - root2, 0.3), epsilon = 1e-9);
        assert_relative_eq!(hit.normal, Vector2::new(-1.0, 1.0) / root2, epsilon = 1e-9);
        assert_relative_eq!(hit.alpha, (4.3 - root2) / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_segment_query_misses() {
        let circle = ShapeGeometry::circle(1.0);
        let pose = Pose::from_position(Point2::new(5.0, 0.0));

        // Passes above.
        assert!(circle
            .segment_query(&pose, &Point2::new(0.0, 3.0), &Point2::new(10.0, 3.0), 0.5)
            .is_none());
        // Stops short.
        assert!(circle
            .segment_query(&pose, &Point2::new(0.0, 0.0), &Point2::new(3.0, 0.0), 0.0)
            .is_none());
        // Parallel to a box face, outside it.
        assert!(unit_box()
            .segment_query(&Pose::identity(), &Point2::new(-3.0, 1.5), &Point2::new(3.0, 1.5), 0.0)
            .is_none());
    }

    #[test]
    fn test_segment_query_starting_inside() {
        let hit = unit_box()
            .segment_query(&Pose::identity(), &Point2::new(0.5, 0.0), &Point2::new(5.0, 0.0), 0.0)
            .unwrap();
        assert_eq!(hit.alpha, 0.0);
        assert_relative_eq!(hit.normal, Vector2::new(1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_segment_aabb_includes_radius() {
        let mut shape = Shape::new(ShapeGeometry::segment(
            Point2::new(-1.0, 0.0),
            Point2::new(1.0, 0.0),
            0.25,
        ));
        shape.update(&Pose::identity());
        let aabb = shape.aabb();
        assert_relative_eq!(aabb.min, Point2::new(-1.25, -0.25));
        assert_relative_eq!(aabb.max, Point2::new(1.25, 0.25));
    }

    #[test]
    fn test_filter_reject() {
        let a = ShapeFilter::new(1, 0b01, 0b11);
        let same_group = ShapeFilter::new(1, 0b10, 0b11);
        let masked = ShapeFilter::new(0, 0b10, 0b10);

        assert!(a.reject(&same_group));
        assert!(a.reject(&masked));
        assert!(!a.reject(&ShapeFilter::ALL));
        assert!(ShapeFilter::NONE.reject(&ShapeFilter::ALL));
    }
}
