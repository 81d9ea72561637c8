//! Narrow-phase contact generation.
//!
//! [`collide`] orders the two shapes by [`ShapeKind`](crate::shape::ShapeKind)
//! rank, dispatches to the routine for that kind pair and returns up to
//! [`MAX_CONTACTS_PER_ARBITER`] contact points. Circle pairs are solved directly; everything else goes
//! through [`gjk`] and, for edge-bearing shapes, a two-point edge clip.

use nalgebra::{Point2, Vector2};

use crate::body::cross;
use crate::gjk_epa::{gjk, ClosestPoints, CollisionId};
use crate::shape::{
    closest_point_on_segment, polygon_support_index, Shape, SplittingPlane, WorldGeometry,
};

/// Maximum contact points between two convex shapes.
pub const MAX_CONTACTS_PER_ARBITER: usize = 2;

const HASH_COEF: u64 = 3_344_921_057;

/// Order-independent combination of two hash values.
#[inline]
#[must_use]
pub const fn hash_pair(a: u64, b: u64) -> u64 {
    a.wrapping_mul(HASH_COEF) ^ b.wrapping_mul(HASH_COEF)
}

/// A contact point produced by the narrow phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Deepest point on shape A's surface.
    pub point_a: Point2<f64>,
    /// Deepest point on shape B's surface.
    pub point_b: Point2<f64>,
    /// Feature-pair hash identifying this point across steps.
    pub hash: u64,
}

impl ContactPoint {
    /// Signed separation along `normal`, negative when overlapping.
    #[must_use]
    pub fn depth(&self, normal: &Vector2<f64>) -> f64 {
        (self.point_b - self.point_a).dot(normal)
    }
}

/// Output of [`collide`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionInfo {
    /// Whether the input shapes were swapped into rank order.
    pub swapped: bool,
    /// Collision normal pointing from the first to the second ordered shape.
    pub normal: Vector2<f64>,
    /// Collision id to remember for the next step.
    pub id: Option<CollisionId>,
    points: [ContactPoint; MAX_CONTACTS_PER_ARBITER],
    count: usize,
}

impl CollisionInfo {
    fn new(swapped: bool, id: Option<CollisionId>) -> Self {
        let empty = ContactPoint {
            point_a: Point2::origin(),
            point_b: Point2::origin(),
            hash: 0,
        };
        Self {
            swapped,
            normal: Vector2::zeros(),
            id,
            points: [empty; MAX_CONTACTS_PER_ARBITER],
            count: 0,
        }
    }

    fn push(&mut self, point_a: Point2<f64>, point_b: Point2<f64>, hash: u64) {
        debug_assert!(self.count < MAX_CONTACTS_PER_ARBITER, "too many contacts");
        if self.count < MAX_CONTACTS_PER_ARBITER {
            self.points[self.count] = ContactPoint {
                point_a,
                point_b,
                hash,
            };
            self.count += 1;
        }
    }

    /// Contact points found.
    #[must_use]
    pub fn points(&self) -> &[ContactPoint] {
        &self.points[..self.count]
    }

    /// Whether no contact was found.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Compute contact points between two shapes.
///
/// The shapes are taken in rank order (circle, segment, polygon); if `a`
/// outranks `b` they are swapped and [`CollisionInfo::swapped`] is set. The
/// `hint` must come from a previous call with the same ordered pair.
#[must_use]
pub fn collide(a: &Shape, b: &Shape, hint: Option<CollisionId>) -> CollisionInfo {
    let swapped = a.kind() > b.kind();
    let (first, second) = if swapped { (b, a) } else { (a, b) };
    let mut info = CollisionInfo::new(swapped, hint);

    match (&first.world, &second.world) {
        (WorldGeometry::Circle { center: c1, radius: r1 }, WorldGeometry::Circle { center: c2, radius: r2 }) => {
            circle_to_circle(c1, *r1, c2, *r2, &mut info);
        }
        (
            WorldGeometry::Circle { center, radius },
            WorldGeometry::Segment {
                a: seg_a,
                b: seg_b,
                normal,
                radius: seg_r,
            },
        ) => circle_to_segment(center, *radius, seg_a, seg_b, normal, *seg_r, &mut info),
        (WorldGeometry::Circle { radius, .. }, WorldGeometry::Polygon { radius: poly_r, .. }) => {
            let points = gjk(first, second, info.id);
            info.id = Some(points.id);
            if points.distance <= radius + poly_r {
                info.normal = points.normal;
                info.push(
                    points.a + points.normal * *radius,
                    points.b - points.normal * *poly_r,
                    0,
                );
            }
        }
        (WorldGeometry::Segment { .. } | WorldGeometry::Polygon { .. }, WorldGeometry::Segment { .. } | WorldGeometry::Polygon { .. }) => {
            let points = gjk(first, second, info.id);
            info.id = Some(points.id);
            if points.distance - first.world.radius() - second.world.radius() <= 0.0 {
                let e1 = support_edge(first, &points.normal);
                let e2 = support_edge(second, &-points.normal);
                contact_points(&e1, &e2, &points, &mut info);
            }
        }
        _ => unreachable!(
            "no collision routine for {:?} vs {:?}",
            first.kind(),
            second.kind()
        ),
    }

    info
}

fn circle_to_circle(
    c1: &Point2<f64>,
    r1: f64,
    c2: &Point2<f64>,
    r2: f64,
    info: &mut CollisionInfo,
) {
    let min_dist = r1 + r2;
    let delta = c2 - c1;
    let dist_sq = delta.norm_squared();
    if dist_sq < min_dist * min_dist {
        let dist = dist_sq.sqrt();
        let n = if dist > 0.0 {
            delta / dist
        } else {
            Vector2::new(1.0, 0.0)
        };
        info.normal = n;
        info.push(c1 + n * r1, c2 - n * r2, 0);
    }
}

fn circle_to_segment(
    center: &Point2<f64>,
    radius: f64,
    seg_a: &Point2<f64>,
    seg_b: &Point2<f64>,
    seg_normal: &Vector2<f64>,
    seg_radius: f64,
    info: &mut CollisionInfo,
) {
    let closest = closest_point_on_segment(center, seg_a, seg_b);
    let min_dist = radius + seg_radius;
    let delta = closest - center;
    let dist_sq = delta.norm_squared();
    if dist_sq < min_dist * min_dist {
        let dist = dist_sq.sqrt();
        let n = if dist > 0.0 { delta / dist } else { *seg_normal };
        info.normal = n;
        info.push(center + n * radius, closest - n * seg_radius, 0);
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgePoint {
    point: Point2<f64>,
    hash: u64,
}

/// The edge of a shape most aligned with a direction.
#[derive(Debug, Clone, Copy)]
struct Edge {
    a: EdgePoint,
    b: EdgePoint,
    radius: f64,
}

fn support_edge(shape: &Shape, n: &Vector2<f64>) -> Edge {
    let hash_id = shape.hash_id();
    match &shape.world {
        WorldGeometry::Segment {
            a,
            b,
            normal,
            radius,
        } => {
            let ea = EdgePoint {
                point: *a,
                hash: hash_pair(hash_id, 0),
            };
            let eb = EdgePoint {
                point: *b,
                hash: hash_pair(hash_id, 1),
            };
            if normal.dot(n) > 0.0 {
                Edge {
                    a: ea,
                    b: eb,
                    radius: *radius,
                }
            } else {
                Edge {
                    a: eb,
                    b: ea,
                    radius: *radius,
                }
            }
        }
        WorldGeometry::Polygon { planes, radius } => polygon_support_edge(planes, *radius, n, hash_id),
        WorldGeometry::Circle { center, radius } => {
            let p = EdgePoint {
                point: *center,
                hash: hash_pair(hash_id, 0),
            };
            Edge {
                a: p,
                b: p,
                radius: *radius,
            }
        }
    }
}

fn polygon_support_edge(
    planes: &[SplittingPlane],
    radius: f64,
    n: &Vector2<f64>,
    hash_id: u64,
) -> Edge {
    let count = planes.len();
    let i1 = polygon_support_index(planes, n);
    let i0 = (i1 + count - 1) % count;
    let i2 = (i1 + 1) % count;
    let point = |i: usize| EdgePoint {
        point: planes[i].vertex,
        hash: hash_pair(hash_id, i as u64),
    };

    if n.dot(&planes[i1].normal) > n.dot(&planes[i2].normal) {
        Edge {
            a: point(i0),
            b: point(i1),
            radius,
        }
    } else {
        Edge {
            a: point(i1),
            b: point(i2),
            radius,
        }
    }
}

/// Clip two supporting edges against each other and keep overlapping ends.
fn contact_points(e1: &Edge, e2: &Edge, points: &ClosestPoints, info: &mut CollisionInfo) {
    let min_dist = e1.radius + e2.radius;
    if points.distance > min_dist {
        return;
    }

    let n = points.normal;
    info.normal = n;

    // Positions along the axis perpendicular to n.
    let d_e1_a = cross(&e1.a.point.coords, &n);
    let d_e1_b = cross(&e1.b.point.coords, &n);
    let d_e2_a = cross(&e2.a.point.coords, &n);
    let d_e2_b = cross(&e2.b.point.coords, &n);

    let e1_denom = 1.0 / (d_e1_b - d_e1_a + f64::MIN_POSITIVE);
    let e2_denom = 1.0 / (d_e2_b - d_e2_a + f64::MIN_POSITIVE);

    let lerp = |a: &Point2<f64>, b: &Point2<f64>, t: f64| a + (b - a) * t.clamp(0.0, 1.0);

    let p1 = lerp(&e1.a.point, &e1.b.point, (d_e2_b - d_e1_a) * e1_denom) + n * e1.radius;
    let p2 = lerp(&e2.a.point, &e2.b.point, (d_e1_a - d_e2_a) * e2_denom) - n * e2.radius;
    if (p2 - p1).dot(&n) <= 0.0 {
        info.push(p1, p2, hash_pair(e1.a.hash, e2.b.hash));
    }

    let p1 = lerp(&e1.a.point, &e1.b.point, (d_e2_a - d_e1_a) * e1_denom) + n * e1.radius;
    let p2 = lerp(&e2.a.point, &e2.b.point, (d_e1_b - d_e2_a) * e2_denom) - n * e2.radius;
    if (p2 - p1).dot(&n) <= 0.0 {
        info.push(p1, p2, hash_pair(e1.b.hash, e2.a.hash));
    }
}
