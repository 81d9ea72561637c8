//! End-to-end scenarios for the step pipeline.
//!
//! Each test builds a small world, steps it through the public API and checks
//! the observable outcome: resting stacks, ignored sensor pairs, saturated
//! joints, sleeping bodies and segment queries.

// Allow test-specific patterns
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]

use std::cell::Cell;
use std::rc::Rc;

use approx::assert_relative_eq;
use nalgebra::{Point2, Vector2};
use sim2d_core::handler::CallbackHandler;
use sim2d_core::{
    BodyId, CollisionType, Constraint, MassProperties, Pose, Shape, ShapeFilter, ShapeGeometry,
    ShapeId, SimulationConfig, SleepConfig, Stepper, World,
};

const DT: f64 = 1.0 / 60.0;
const GROUND: CollisionType = CollisionType(1);
const BALL: CollisionType = CollisionType(2);

fn ground(world: &mut World) -> (BodyId, ShapeId) {
    let body = world.add_static_body(Pose::identity()).unwrap();
    let shape = world
        .add_shape(
            body,
            Shape::new(ShapeGeometry::segment(
                Point2::new(-20.0, 0.0),
                Point2::new(20.0, 0.0),
                0.0,
            ))
            .with_friction(0.8)
            .with_collision_type(GROUND),
        )
        .unwrap();
    (body, shape)
}

fn ball(world: &mut World, position: Point2<f64>) -> (BodyId, ShapeId) {
    let body = world
        .add_body(Pose::from_position(position), MassProperties::disc(1.0, 1.0))
        .unwrap();
    let shape = world
        .add_shape(
            body,
            Shape::new(ShapeGeometry::circle(1.0))
                .with_friction(0.8)
                .with_collision_type(BALL),
        )
        .unwrap();
    (body, shape)
}

// =============================================================================
// Stacking
// =============================================================================

#[test]
fn two_circles_come_to_rest_on_ground() {
    let mut world = World::new(SimulationConfig::default().gravity(Vector2::new(0.0, -10.0)));
    ground(&mut world);
    let (_, lower_shape) = ball(&mut world, Point2::new(0.0, 1.0));
    let (upper, upper_shape) = ball(&mut world, Point2::new(0.0, 6.0));

    let ground_normal = Rc::new(Cell::new(Vector2::zeros()));
    let seen = Rc::clone(&ground_normal);
    world.add_collision_handler(
        GROUND,
        BALL,
        CallbackHandler::new().on_post_solve(move |arbiter, _ctx| seen.set(arbiter.normal())),
    );

    let mut stepper = Stepper::new();
    stepper.run_for(&mut world, 5.0).unwrap();

    let body = world.body(upper).unwrap();
    assert!(body.velocity().y.abs() < 1e-2, "vy = {}", body.velocity().y);
    assert!(body.position().y > 2.5 && body.position().y < 3.1);

    // Ground handler sees the normal from the ground toward the ball.
    let n = ground_normal.get();
    assert_relative_eq!(n, Vector2::new(0.0, 1.0), epsilon = 1e-6);

    // Lower ball was added first, so the stack arbiter points up.
    let stack = world.arbiter(upper_shape, lower_shape).unwrap();
    assert_eq!(stack.shapes(), (lower_shape, upper_shape));
    assert_relative_eq!(stack.normal(), Vector2::new(0.0, 1.0), epsilon = 1e-6);
}

#[test]
fn resting_impulse_converges() {
    let mut world = World::new(SimulationConfig::default().gravity(Vector2::new(0.0, -10.0)));
    let (_, ground_shape) = ground(&mut world);
    let (_, ball_shape) = ball(&mut world, Point2::new(0.0, 1.0));

    let mut history = Vec::new();
    for _ in 0..180 {
        world.step(DT).unwrap();
        let total: f64 = world
            .arbiter(ground_shape, ball_shape)
            .map(|arbiter| world.arbiter_impulses(arbiter).iter().map(|(jn, _)| jn).sum())
            .unwrap_or(0.0);
        history.push(total);
    }

    // Supporting a unit mass under g = 10 takes m·g·dt per step.
    let expected = 10.0 * DT;
    let tail = &history[120..];
    for &jn in tail {
        assert!((jn - expected).abs() < 0.05 * expected, "jn = {jn}");
    }
    let spread = tail.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        - tail.iter().copied().fold(f64::INFINITY, f64::min);
    assert!(spread < 0.02 * expected);
}

// =============================================================================
// Sensors and rejected pairs
// =============================================================================

#[test]
fn rejected_sensor_pair_never_pushes() {
    let mut world = World::new(SimulationConfig::default());
    let zone = world.add_static_body(Pose::identity()).unwrap();
    world
        .add_shape(
            zone,
            Shape::new(ShapeGeometry::box_shape(4.0, 4.0, 0.0))
                .as_sensor()
                .with_collision_type(GROUND),
        )
        .unwrap();
    let (body, _) = ball(&mut world, Point2::new(0.5, 0.0));

    let begins = Rc::new(Cell::new(0));
    let pre_solves = Rc::new(Cell::new(0));
    let (b, p) = (Rc::clone(&begins), Rc::clone(&pre_solves));
    world.add_collision_handler(
        GROUND,
        BALL,
        CallbackHandler::new()
            .on_begin(move |_arbiter, _ctx| {
                b.set(b.get() + 1);
                false
            })
            .on_pre_solve(move |_arbiter, _ctx| {
                p.set(p.get() + 1);
                true
            }),
    );

    for _ in 0..120 {
        world.step(DT).unwrap();
        let state = world.body(body).unwrap();
        assert_eq!(state.velocity(), Vector2::zeros());
        assert_eq!(state.angular_velocity(), 0.0);
    }
    assert_eq!(begins.get(), 1);
    assert_eq!(pre_solves.get(), 0);
    assert_eq!(world.active_arbiter_count(), 0);
}

#[test]
fn pre_solve_rejection_lasts_one_step() {
    let mut world = World::new(SimulationConfig::default());
    let (_, ground_shape) = ground(&mut world);
    let (body, ball_shape) = ball(&mut world, Point2::new(0.0, 0.9));

    let skip = Rc::new(Cell::new(true));
    let flag = Rc::clone(&skip);
    world.add_collision_handler(
        GROUND,
        BALL,
        CallbackHandler::new().on_pre_solve(move |_arbiter, _ctx| !flag.replace(false)),
    );

    world.step(DT).unwrap();
    assert_eq!(world.active_arbiter_count(), 0);
    assert_eq!(world.body(body).unwrap().velocity(), Vector2::zeros());

    world.step(DT).unwrap();
    assert_eq!(world.active_arbiter_count(), 1);
    assert!(world.arbiter(ground_shape, ball_shape).is_some());
}

// =============================================================================
// Joints
// =============================================================================

#[test]
fn pivot_impulse_clamps_at_max_force() {
    let mut world = World::new(SimulationConfig::default());
    let anchor = world.add_static_body(Pose::identity()).unwrap();
    let (body, _) = ball(&mut world, Point2::origin());
    world.set_velocity(body, Vector2::new(50.0, 0.0)).unwrap();

    let max_force = 6.0;
    let joint = world
        .add_constraint(
            Constraint::pivot(anchor, body, Point2::origin(), Point2::origin())
                .with_max_force(max_force),
        )
        .unwrap();

    for _ in 0..30 {
        world.step(DT).unwrap();
        let impulse = world.constraint(joint).unwrap().impulse();
        assert!(impulse <= max_force * DT + 1e-12, "impulse {impulse}");
        assert_relative_eq!(impulse, max_force * DT, epsilon = 1e-9);
    }
    // Slowed down, never stopped.
    let vx = world.body(body).unwrap().velocity().x;
    assert!(vx < 50.0 && vx > 40.0);
}

#[test]
fn pivot_holds_pendulum_length() {
    let mut world = World::new(SimulationConfig::default().gravity(Vector2::new(0.0, -10.0)));
    let anchor = world.add_static_body(Pose::identity()).unwrap();
    let bob = world
        .add_body(
            Pose::from_position(Point2::new(2.0, 0.0)),
            MassProperties::disc(1.0, 0.25),
        )
        .unwrap();
    world.add_pivot_joint(anchor, bob, Point2::origin()).unwrap();

    let mut lowest = f64::INFINITY;
    for _ in 0..240 {
        world.step(DT).unwrap();
        let p = world.body(bob).unwrap().position();
        assert!((p.coords.norm() - 2.0).abs() < 0.05, "length {}", p.coords.norm());
        lowest = lowest.min(p.y);
    }
    // The bob swung through the bottom.
    assert!(lowest < -1.9, "lowest {lowest}");
}

#[test]
fn jointed_bodies_can_skip_collision() {
    let mut world = World::new(SimulationConfig::default());
    let (a, _) = ball(&mut world, Point2::new(0.0, 0.0));
    let (b, _) = ball(&mut world, Point2::new(1.0, 0.0));
    world
        .add_constraint(
            Constraint::pivot(a, b, Point2::new(0.5, 0.0), Point2::new(-0.5, 0.0))
                .with_collide_bodies(false),
        )
        .unwrap();

    world.step(DT).unwrap();
    assert_eq!(world.arbiter_count(), 0);
}

// =============================================================================
// Sleeping
// =============================================================================

/// Step an isolated, barely moving body and check it sleeps exactly on step `n`.
fn assert_sleeps_on_step(dt: f64, threshold: f64, n: u32) {
    let config =
        SimulationConfig::with_timestep(dt).sleep(SleepConfig::after(threshold).idle_speed(0.1));
    let mut world = World::new(config);
    let body = world
        .add_body(Pose::identity(), MassProperties::disc(1.0, 1.0))
        .unwrap();
    world.set_velocity(body, Vector2::new(0.01, 0.0)).unwrap();

    for step in 1..n {
        world.step(dt).unwrap();
        assert!(!world.is_sleeping(body), "asleep early at step {step}");
    }
    world.step(dt).unwrap();
    assert!(world.is_sleeping(body), "still awake at step {n}");
    assert_eq!(world.sleeping_component_count(), 1);
}

#[test]
fn idle_body_sleeps_on_step_n() {
    // N·dt ≥ threshold first holds at N = 4.
    assert_sleeps_on_step(0.25, 1.0, 4);
    // Summed 1/60 steps fall a hair short of 0.5 after 30 steps.
    assert_sleeps_on_step(1.0 / 60.0, 0.5, 30);
    assert_sleeps_on_step(0.1, 0.3, 3);
}

#[test]
fn resting_pile_falls_asleep_and_wakes_together() {
    let config = SimulationConfig::default()
        .gravity(Vector2::new(0.0, -10.0))
        .sleep(SleepConfig::after(0.5));
    let mut world = World::new(config);
    ground(&mut world);
    let (lower, _) = ball(&mut world, Point2::new(0.0, 1.0));
    let (upper, _) = ball(&mut world, Point2::new(0.0, 3.0));

    let mut stepper = Stepper::new();
    stepper.run_for(&mut world, 5.0).unwrap();
    assert!(world.is_sleeping(lower));
    assert!(world.is_sleeping(upper));
    assert_eq!(world.sleeping_component_count(), 1);
    assert_eq!(world.awake_body_count(), 0);
    let before = world.body(upper).unwrap().position();

    // Sleeping bodies do not move.
    stepper.run_for(&mut world, 1.0).unwrap();
    assert_eq!(world.body(upper).unwrap().position(), before);

    // Waking one member wakes the whole pile.
    world.activate(lower).unwrap();
    assert!(!world.is_sleeping(lower));
    assert!(!world.is_sleeping(upper));
    assert_eq!(world.awake_body_count(), 2);

    // Arbiters came back with their contacts, so the pile keeps resting.
    world.step(DT).unwrap();
    assert_eq!(world.active_arbiter_count(), 2);
    assert!(world.body(upper).unwrap().velocity().y.abs() < 0.1);
}

#[test]
fn falling_body_wakes_sleeping_pile() {
    let config = SimulationConfig::default()
        .gravity(Vector2::new(0.0, -10.0))
        .sleep(SleepConfig::after(0.5));
    let mut world = World::new(config);
    ground(&mut world);
    let (resting, _) = ball(&mut world, Point2::new(0.0, 1.0));
    Stepper::new().run_for(&mut world, 3.0).unwrap();
    assert!(world.is_sleeping(resting));

    ball(&mut world, Point2::new(0.0, 6.0));
    let mut woke = false;
    for _ in 0..120 {
        world.step(DT).unwrap();
        if !world.is_sleeping(resting) {
            woke = true;
            break;
        }
    }
    assert!(woke);
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn segment_query_sees_sleeping_stack_top_down() {
    let config = SimulationConfig::default()
        .gravity(Vector2::new(0.0, -10.0))
        .sleep(SleepConfig::after(0.5));
    let mut world = World::new(config);
    let (_, floor) = ground(&mut world);
    let (lower, lower_shape) = ball(&mut world, Point2::new(0.0, 1.0));
    let (upper, upper_shape) = ball(&mut world, Point2::new(0.0, 3.0));
    Stepper::new().run_for(&mut world, 5.0).unwrap();
    assert!(world.is_sleeping(lower) && world.is_sleeping(upper));

    let hits = world.segment_query(
        Point2::new(0.0, 10.0),
        Point2::new(0.0, -1.0),
        0.0,
        ShapeFilter::ALL,
    );
    let ids: Vec<ShapeId> = hits.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![upper_shape, lower_shape, floor]);

    let (_, top) = hits[0];
    let top_of_stack = world.body(upper).unwrap().position().y + 1.0;
    assert_relative_eq!(top.point.y, top_of_stack, epsilon = 1e-9);
    assert_relative_eq!(top.normal, Vector2::new(0.0, 1.0), epsilon = 1e-9);

    // Querying never wakes anything.
    assert!(world.is_sleeping(upper));
}
