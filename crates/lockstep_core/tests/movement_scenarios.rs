//! End-to-end movement through the world scheduler.

use lockstep_core::components::Facing;
use lockstep_core::math::Vec2Fixed;
use lockstep_core::movement::ARRIVAL_TOLERANCE;
use lockstep_core::simulation::{CommandEffect, World};
use lockstep_test_utils::fixtures::{
    grid, open_grid, order_move, spawn_flyer, spawn_mover, walled_three_by_three,
};

#[test]
fn test_walker_routes_around_wall() {
    let mut world = World::standard(walled_three_by_three());
    let unit = spawn_mover(&mut world, 1, 5, 5, 12);
    assert_eq!(order_move(&mut world, 1, unit, 25, 25), CommandEffect::GoalSet(unit));

    let expected = [(17, 5), (25, 9), (25, 21), (25, 25)];
    for (tick, (x, y)) in expected.into_iter().enumerate() {
        world.do_step();
        let entity = world.get_entity(unit).unwrap();
        assert_eq!(
            entity.position,
            Some(Vec2Fixed::from_int(x, y)),
            "position after tick {}",
            tick + 1
        );
        if tick == 0 {
            assert_eq!(entity.facing, Some(Facing::EAST));
        }
    }

    let entity = world.get_entity(unit).unwrap();
    assert!(entity.path.is_none());
    assert!(entity.path_complete);

    // Already inside the arrival tolerance: the next tick clears the goal.
    world.do_step();
    let entity = world.get_entity(unit).unwrap();
    assert!(entity.move_goal.is_none());
    assert!(!entity.path_complete);
    assert_eq!(entity.position, Some(Vec2Fixed::from_int(25, 25)));
}

#[test]
fn test_flyer_ignores_walls() {
    let mut world = World::standard(walled_three_by_three());
    let unit = spawn_flyer(&mut world, 1, 5, 5, 5);
    order_move(&mut world, 1, unit, 5, 25);

    world.do_step();
    let entity = world.get_entity(unit).unwrap();
    assert_eq!(entity.position, Some(Vec2Fixed::from_int(5, 10)));
    assert!(entity.path.is_none());

    for _ in 0..10 {
        world.do_step();
    }
    let entity = world.get_entity(unit).unwrap();
    assert!(entity.move_goal.is_none());
    let position = entity.position.unwrap();
    assert!(position.within(Vec2Fixed::from_int(5, 25), ARRIVAL_TOLERANCE));
}

#[test]
fn test_unreachable_goal_abandoned() {
    let mut world = World::standard(grid(&["..#..", "..#..", "..#.."], 10));
    let unit = spawn_mover(&mut world, 1, 5, 5, 4);
    order_move(&mut world, 1, unit, 45, 5);

    world.do_step();
    let entity = world.get_entity(unit).unwrap();
    assert!(entity.move_goal.is_none());
    assert!(entity.path.is_none());
    assert_eq!(entity.position, Some(Vec2Fixed::from_int(5, 5)));
}

#[test]
fn test_goal_off_map_abandoned() {
    let mut world = World::standard(open_grid(3, 3, 10));
    let unit = spawn_mover(&mut world, 1, 5, 5, 4);
    order_move(&mut world, 1, unit, 500, 5);

    world.do_step();
    let entity = world.get_entity(unit).unwrap();
    assert!(entity.move_goal.is_none());
    assert_eq!(entity.position, Some(Vec2Fixed::from_int(5, 5)));
}

#[test]
fn test_units_without_orders_stay_put() {
    let mut world = World::standard(open_grid(4, 4, 10));
    let unit = spawn_mover(&mut world, 1, 12, 12, 4);
    for _ in 0..5 {
        world.do_step();
    }
    assert_eq!(
        world.get_entity(unit).unwrap().position,
        Some(Vec2Fixed::from_int(12, 12))
    );
}

#[test]
fn test_many_units_share_the_grid() {
    let mut world = World::standard(open_grid(10, 10, 10));
    let units: Vec<_> = (0..5)
        .map(|i| {
            let unit = spawn_mover(&mut world, 1, 5, 5 + i * 10, 6);
            order_move(&mut world, 1, unit, 95, 95 - i * 10);
            unit
        })
        .collect();

    for _ in 0..60 {
        world.do_step();
    }

    for (i, unit) in units.into_iter().enumerate() {
        let entity = world.get_entity(unit).unwrap();
        let offset = i32::try_from(i).unwrap() * 10;
        assert!(entity.move_goal.is_none(), "unit {unit} still moving");
        assert_eq!(entity.position, Some(Vec2Fixed::from_int(95, 95 - offset)));
    }
}

#[test]
fn test_flyer_heads_for_far_goal() {
    let mut world = World::standard(open_grid(3, 3, 10));
    let unit = spawn_flyer(&mut world, 1, 0, 0, 5);
    order_move(&mut world, 1, unit, 50_000, 0);

    for tick in 1..=3 {
        world.do_step();
        let entity = world.get_entity(unit).unwrap();
        assert_eq!(entity.position, Some(Vec2Fixed::from_int(5 * tick, 0)));
        assert!(entity.move_goal.is_some());
    }

    // Opposite corners of the coordinate space.
    let far = spawn_flyer(&mut world, 1, i32::MIN, i32::MIN, 7);
    order_move(&mut world, 1, far, i32::MAX, i32::MAX);
    world.do_step();
    let position = world.get_entity(far).unwrap().position.unwrap();
    assert!(position.x > Vec2Fixed::from_int(i32::MIN, 0).x);
    assert_eq!(position.x, position.y);
}

#[test]
fn test_slowest_unit_still_makes_progress_off_axis() {
    let mut world = World::standard(open_grid(3, 3, 10));
    let unit = spawn_flyer(&mut world, 1, 2, 2, 2);
    let goal = Vec2Fixed::from_int(15, 5);
    order_move(&mut world, 1, unit, 15, 5);

    let mut last = world.get_entity(unit).unwrap().position.unwrap().distance(goal);
    for _ in 0..20 {
        world.do_step();
        let entity = world.get_entity(unit).unwrap();
        if entity.move_goal.is_none() {
            assert!(entity.position.unwrap().within(goal, ARRIVAL_TOLERANCE));
            return;
        }
        let now = entity.position.unwrap().distance(goal);
        assert!(now < last, "no progress at {:?}", entity.position);
        last = now;
    }
    panic!("unit never arrived");
}
