//! GJK (Gilbert-Johnson-Keerthi) and EPA (Expanding Polytope Algorithm) for
//! planar convex shapes.
//!
//! # Overview
//!
//! GJK works on the Minkowski difference `B - A` of two convex shapes, which
//! contains the origin exactly when the shapes overlap. In 2D the simplex is
//! a single edge: every iteration samples a new support point toward the
//! origin and either replaces one endpoint, detects that the edge can get no
//! closer, or detects that the origin is enclosed by the triangle formed with
//! the new point.
//!
//! Once the origin is enclosed, EPA grows a convex hull of Minkowski points
//! outward until the edge nearest the origin stops moving. That edge gives the
//! penetration depth and the separating normal.
//!
//! Both algorithms work on the *core* shapes, without their rounding radius.
//! Callers subtract radii from the returned distance.
//!
//! # Collision ids
//!
//! The two support feature indices of each shape are packed into a
//! [`CollisionId`]. Feeding last step's id back in seeds the simplex right
//! next to the answer, so coherent contacts typically converge in a single
//! iteration.

use nalgebra::{Point2, Vector2};
use tracing::warn;

use crate::shape::{perp, rperp, Shape, SupportPoint, WorldGeometry};

/// Hard cap on GJK iterations.
pub const MAX_GJK_ITERATIONS: u32 = 30;
/// Hard cap on EPA iterations.
pub const MAX_EPA_ITERATIONS: u32 = 30;
/// Iteration count past which a slow convergence warning is logged.
pub const WARN_ITERATIONS: u32 = 20;

/// Packed support feature indices from the last GJK run for a pair.
///
/// Layout, from the high byte down: first A index, first B index, second A
/// index, second B index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CollisionId(pub u32);

impl CollisionId {
    /// Whether this is the zero id, which no GJK run seeds from.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// The four packed feature indices.
    #[must_use]
    pub const fn indices(self) -> [u32; 4] {
        [
            (self.0 >> 24) & 0xFF,
            (self.0 >> 16) & 0xFF,
            (self.0 >> 8) & 0xFF,
            self.0 & 0xFF,
        ]
    }
}

/// Anything GJK can query for support points.
pub trait SupportMap {
    /// Farthest core point along `direction`.
    fn support(&self, direction: &Vector2<f64>) -> SupportPoint;

    /// Core point for a feature index returned by [`Self::support`].
    fn point_at(&self, index: u32) -> Point2<f64>;

    /// A point inside the shape used to pick the first search axis.
    fn center(&self) -> Point2<f64>;
}

impl SupportMap for WorldGeometry {
    fn support(&self, direction: &Vector2<f64>) -> SupportPoint {
        self.support_point(direction)
    }

    fn point_at(&self, index: u32) -> Point2<f64> {
        Self::point_at(self, index)
    }

    fn center(&self) -> Point2<f64> {
        self.aabb().center()
    }
}

impl SupportMap for Shape {
    fn support(&self, direction: &Vector2<f64>) -> SupportPoint {
        self.world.support_point(direction)
    }

    fn point_at(&self, index: u32) -> Point2<f64> {
        self.world.point_at(index)
    }

    fn center(&self) -> Point2<f64> {
        self.aabb.center()
    }
}

/// A point on the Minkowski difference `B - A` and the points it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinkowskiPoint {
    /// Support point on A.
    pub a: Point2<f64>,
    /// Support point on B.
    pub b: Point2<f64>,
    /// `b - a`.
    pub ab: Vector2<f64>,
    /// Packed feature indices: A in the high byte, B in the low byte.
    pub id: u32,
}

impl MinkowskiPoint {
    fn new(a: Point2<f64>, ia: u32, b: Point2<f64>, ib: u32) -> Self {
        Self {
            a,
            b,
            ab: b - a,
            id: ((ia & 0xFF) << 8) | (ib & 0xFF),
        }
    }
}

/// Closest points between two convex shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoints {
    /// Closest point on A.
    pub a: Point2<f64>,
    /// Closest point on B.
    pub b: Point2<f64>,
    /// Unit normal pointing from A toward B.
    pub normal: Vector2<f64>,
    /// Signed distance along the normal, negative when overlapping.
    pub distance: f64,
    /// Collision id to feed back into the next query for this pair.
    pub id: CollisionId,
    /// GJK iterations used.
    pub iterations: u32,
}

impl ClosestPoints {
    fn new(v0: &MinkowskiPoint, v1: &MinkowskiPoint, iterations: u32) -> Self {
        let t = closest_t(&v0.ab, &v1.ab);
        let p = lerp_t(&v0.ab, &v1.ab, t);
        let a = Point2::from(lerp_t(&v0.a.coords, &v1.a.coords, t));
        let b = Point2::from(lerp_t(&v0.b.coords, &v1.b.coords, t));
        let id = CollisionId(((v0.id & 0xFFFF) << 16) | (v1.id & 0xFFFF));

        let delta = v1.ab - v0.ab;
        let n = crate::shape::normalize_or_zero(&rperp(&delta));
        let d = n.dot(&p);

        if d <= 0.0 || (-1.0 < t && t < 1.0) {
            Self {
                a,
                b,
                normal: n,
                distance: d,
                id,
                iterations,
            }
        } else {
            // Closest feature is a vertex: the normal points straight at it.
            let d2 = p.norm();
            Self {
                a,
                b,
                normal: p / (d2 + f64::MIN_POSITIVE),
                distance: d2,
                id,
                iterations,
            }
        }
    }
}

/// Parameter in `[-1, 1]` of the point on `a`-`b` closest to the origin.
#[inline]
fn closest_t(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    let delta = b - a;
    -(delta.dot(&(a + b)) / (delta.norm_squared() + f64::MIN_POSITIVE)).clamp(-1.0, 1.0)
}

/// Interpolate between `a` (t = -1) and `b` (t = 1).
#[inline]
fn lerp_t(a: &Vector2<f64>, b: &Vector2<f64>, t: f64) -> Vector2<f64> {
    let ht = 0.5 * t;
    a * (0.5 - ht) + b * (0.5 + ht)
}

#[inline]
fn closest_dist(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    lerp_t(a, b, closest_t(a, b)).norm_squared()
}

/// Whether `c` lies on the left of the directed line `a`-`b`, measured from the
/// edge midpoint. Guarded against the sign flips of a plain cross product.
#[inline]
fn check_point_greater(a: &Vector2<f64>, b: &Vector2<f64>, c: &Vector2<f64>) -> bool {
    (b.y - a.y) * (a.x + b.x - 2.0 * c.x) > (b.x - a.x) * (a.y + b.y - 2.0 * c.y)
}

/// Whether `p` is no farther along `n` than the edge `v0`-`v1`.
#[inline]
fn check_axis(v0: &Vector2<f64>, v1: &Vector2<f64>, p: &Vector2<f64>, n: &Vector2<f64>) -> bool {
    p.dot(n) <= v0.dot(n).max(v1.dot(n))
}

struct SupportContext<'a, A: ?Sized, B: ?Sized> {
    a: &'a A,
    b: &'a B,
}

impl<A: SupportMap + ?Sized, B: SupportMap + ?Sized> SupportContext<'_, A, B> {
    fn support(&self, n: &Vector2<f64>) -> MinkowskiPoint {
        let sa = self.a.support(&-n);
        let sb = self.b.support(n);
        MinkowskiPoint::new(sa.point, sa.index, sb.point, sb.index)
    }

    fn from_indices(&self, ia: u32, ib: u32) -> MinkowskiPoint {
        MinkowskiPoint::new(self.a.point_at(ia), ia, self.b.point_at(ib), ib)
    }
}

/// Closest points between the cores of two convex shapes.
///
/// With a `hint` from the previous step, the initial simplex is rebuilt from
/// the recorded feature indices; otherwise it starts from the axis between the
/// shapes' centers. A zero id carries no features and counts as no hint.
pub fn gjk<A, B>(a: &A, b: &B, hint: Option<CollisionId>) -> ClosestPoints
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    let ctx = SupportContext { a, b };

    let (mut v0, mut v1) = if let Some(id) = hint.filter(|id| !id.is_unset()) {
        let [a0, b0, a1, b1] = id.indices();
        (ctx.from_indices(a0, b0), ctx.from_indices(a1, b1))
    } else {
        let axis = perp(&(a.center() - b.center()));
        (ctx.support(&axis), ctx.support(&-axis))
    };

    let mut iteration = 1;
    loop {
        if iteration > MAX_GJK_ITERATIONS {
            warn!(iteration, "GJK hit the iteration cap");
            return ClosestPoints::new(&v0, &v1, iteration);
        }

        if check_point_greater(&v1.ab, &v0.ab, &Vector2::zeros()) {
            // Origin is behind the edge. Flip and try again.
            std::mem::swap(&mut v0, &mut v1);
            continue;
        }

        let t = closest_t(&v0.ab, &v1.ab);
        let n = if -1.0 < t && t < 1.0 {
            perp(&(v1.ab - v0.ab))
        } else {
            -lerp_t(&v0.ab, &v1.ab, t)
        };
        let p = ctx.support(&n);

        if check_point_greater(&p.ab, &v0.ab, &Vector2::zeros())
            && check_point_greater(&v1.ab, &p.ab, &Vector2::zeros())
        {
            if iteration >= WARN_ITERATIONS {
                warn!(iteration, "GJK converged slowly");
            }
            return epa(&ctx, v0, p, v1, iteration);
        }

        if check_axis(&v0.ab, &v1.ab, &p.ab, &n) {
            // p is no closer than the edge we already have.
            if iteration >= WARN_ITERATIONS {
                warn!(iteration, "GJK converged slowly");
            }
            return ClosestPoints::new(&v0, &v1, iteration);
        }

        if closest_dist(&v0.ab, &p.ab) < closest_dist(&p.ab, &v1.ab) {
            v1 = p;
        } else {
            v0 = p;
        }
        iteration += 1;
    }
}

fn epa<A, B>(
    ctx: &SupportContext<'_, A, B>,
    v0: MinkowskiPoint,
    v1: MinkowskiPoint,
    v2: MinkowskiPoint,
    gjk_iterations: u32,
) -> ClosestPoints
where
    A: SupportMap + ?Sized,
    B: SupportMap + ?Sized,
{
    let mut hull = vec![v0, v1, v2];
    let mut next = Vec::with_capacity(8);
    let mut iteration = 1;

    loop {
        let count = hull.len();

        // Hull edge closest to the origin.
        let mut mini = 0;
        let mut min_dist = f64::INFINITY;
        let mut i = count - 1;
        for j in 0..count {
            let d = closest_dist(&hull[i].ab, &hull[j].ab);
            if d < min_dist {
                min_dist = d;
                mini = i;
            }
            i = j;
        }

        let e0 = hull[mini];
        let e1 = hull[(mini + 1) % count];
        debug_assert!(e0.ab != e1.ab, "degenerate EPA hull edge");

        // Look for a Minkowski point beyond this edge.
        let p = ctx.support(&perp(&(e1.ab - e0.ab)));
        let duplicate = p.id == e0.id || p.id == e1.id;

        if duplicate
            || !check_point_greater(&e0.ab, &e1.ab, &p.ab)
            || iteration >= MAX_EPA_ITERATIONS
        {
            if iteration >= WARN_ITERATIONS {
                warn!(iteration, "EPA converged slowly");
            }
            return ClosestPoints::new(&e0, &e1, gjk_iterations);
        }

        // Rebuild the hull starting at p, dropping vertices p makes interior.
        next.clear();
        next.push(p);
        for k in 0..count {
            let index = (mini + 1 + k) % count;
            let h0 = next[next.len() - 1].ab;
            let h1 = hull[index].ab;
            let h2 = if k + 1 < count {
                hull[(index + 1) % count].ab
            } else {
                p.ab
            };
            if check_point_greater(&h0, &h2, &h1) {
                next.push(hull[index]);
            }
        }
        std::mem::swap(&mut hull, &mut next);
        iteration += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::shape::ShapeGeometry;
    use approx::assert_relative_eq;
    use sim2d_types::Pose;

    fn placed(geometry: ShapeGeometry, x: f64, y: f64, angle: f64) -> Shape {
        let mut shape = Shape::new(geometry);
        shape.update(&Pose::new(Point2::new(x, y), angle));
        shape
    }

    fn square(x: f64, y: f64) -> Shape {
        placed(ShapeGeometry::box_shape(2.0, 2.0, 0.0), x, y, 0.0)
    }

    #[test]
    fn test_collision_id_indices() {
        assert_eq!(CollisionId(0x0102_0304).indices(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_separated_squares_distance() {
        let points = gjk(&square(0.0, 0.0), &square(3.0, 0.5), None);
        assert_relative_eq!(points.distance, 1.0, epsilon = 1e-9);
        assert_relative_eq!(points.normal, Vector2::new(1.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(points.b.x - points.a.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_corner_to_corner_distance() {
        let points = gjk(&square(0.0, 0.0), &square(3.0, 3.0), None);
        assert_relative_eq!(points.distance, 2.0_f64.sqrt(), epsilon = 1e-9);
        let diagonal = Vector2::new(1.0, 1.0).normalize();
        assert_relative_eq!(points.normal, diagonal, epsilon = 1e-9);
    }

    #[test]
    fn test_overlapping_squares_use_epa() {
        let points = gjk(&square(0.0, 0.0), &square(1.5, 0.0), None);
        assert_relative_eq!(points.distance, -0.5, epsilon = 1e-9);
        assert_relative_eq!(points.normal, Vector2::new(1.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_circle_cores_are_points() {
        let a = placed(ShapeGeometry::circle(1.0), 0.0, 0.0, 0.0);
        let b = placed(ShapeGeometry::circle(0.5), 0.0, 4.0, 0.0);
        let points = gjk(&a, &b, None);
        assert_relative_eq!(points.distance, 4.0, epsilon = 1e-9);
        assert_relative_eq!(points.normal, Vector2::new(0.0, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_hint_reproduces_answer() {
        let a = square(0.0, 0.0);
        let b = placed(ShapeGeometry::box_shape(1.0, 3.0, 0.0), 2.2, 0.4, 0.3);

        let cold = gjk(&a, &b, None);
        let warm = gjk(&a, &b, Some(cold.id));

        assert_relative_eq!(warm.distance, cold.distance, epsilon = 1e-9);
        assert_relative_eq!(warm.normal, cold.normal, epsilon = 1e-9);
        assert!(warm.iterations <= cold.iterations);
    }

    #[test]
    fn test_zero_hint_starts_cold() {
        let a = square(0.0, 0.0);
        let b = placed(ShapeGeometry::box_shape(1.0, 3.0, 0.0), 2.2, 0.4, 0.3);

        let cold = gjk(&a, &b, None);
        let zero = gjk(&a, &b, Some(CollisionId(0)));

        assert!(CollisionId::default().is_unset());
        assert_eq!(zero.id, cold.id);
        assert_eq!(zero.iterations, cold.iterations);
        assert_relative_eq!(zero.distance, cold.distance, epsilon = 1e-12);
        assert_relative_eq!(zero.normal, cold.normal, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_overlap_normal_points_from_a_to_b() {
        let a = square(0.0, 0.0);
        let b = placed(ShapeGeometry::box_shape(2.0, 2.0, 0.0), 0.0, 1.9, 0.2);
        let points = gjk(&a, &b, None);
        assert!(points.distance < 0.0);
        assert!(points.normal.y > 0.9);
    }
}
