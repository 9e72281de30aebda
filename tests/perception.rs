//! Tests of nearest-first searches over lane structures.

use assert_approx_eq::assert_approx_eq;
use lane_perception::{
    GtuAttributes, GtuId, GtuType, LaneAttributes, LaneId, LanePosition, LaneStructure,
    LaneStructureAttributes, Network, NodeId, ObjectKind, Perceived, RelativeLane, RoadNetwork,
    RoutePlan,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::ControlFlow;

const CAR: GtuAttributes = GtuAttributes {
    gtu_type: GtuType::CAR,
    length: 4.0,
};

fn add_lane(net: &mut Network, from: NodeId, to: NodeId, length: f64) -> LaneId {
    let link = net.add_link(from, to);
    net.add_lane(&LaneAttributes {
        link,
        length,
        allowed: &[],
    })
}

/// A single lane chain with the given lane lengths.
fn chain(net: &mut Network, lengths: &[f64]) -> Vec<LaneId> {
    let mut node = net.add_node();
    let mut lanes: Vec<LaneId> = vec![];
    for length in lengths {
        let next_node = net.add_node();
        let lane = add_lane(net, node, next_node, *length);
        if let Some(prev) = lanes.last() {
            net.connect_lanes(*prev, lane);
        }
        lanes.push(lane);
        node = next_node;
    }
    lanes
}

fn build(net: &Network, position: LanePosition, attributes: LaneStructureAttributes) -> LaneStructure {
    let mut structure = LaneStructure::new(attributes);
    let plan = RoutePlan::new(net, None, GtuType::CAR);
    structure
        .update(net, &plan, position, None, GtuType::CAR, 0.0)
        .unwrap();
    structure
}

/// A lane that splits onto two parallel lanes of different length, which merge again.
/// Returns the first lane and the lane after the merge.
fn split_and_merge(net: &mut Network) -> (LaneId, LaneId) {
    let [x, y, z] = [(); 3].map(|_| net.add_node());
    let a = add_lane(net, x, y, 100.0);
    // Two links between the same nodes
    let b1 = add_lane(net, y, z, 100.0);
    let b2 = add_lane(net, y, z, 120.0);
    let end = net.add_node();
    let c = add_lane(net, z, end, 200.0);
    for b in [b1, b2] {
        net.connect_lanes(a, b);
        net.connect_lanes(b, c);
    }
    (a, c)
}

#[test]
fn distance_along_chain() {
    let mut net = Network::new();
    let lanes = chain(&mut net, &[100.0, 50.0, 80.0]);
    let object = net.add_object(lanes[2], ObjectKind::StopLine, 30.0);
    let structure = build(&net, LanePosition::new(lanes[0], 0.0), Default::default());

    let mut search = structure.objects_ahead(
        &net,
        RelativeLane::CURRENT,
        ObjectKind::StopLine,
        0.0,
        300.0,
        None,
    );
    let first = *search.first().unwrap();
    assert_eq!(first.object, object);
    assert_approx_eq!(first.distance.unwrap(), 180.0);

    let set = structure.downstream_objects(&net, RelativeLane::CURRENT, ObjectKind::StopLine, 0.0);
    assert_eq!(set.len(), 1);
    assert_approx_eq!(set.iter().next().unwrap().distance, 180.0);
}

#[test]
fn cut_off_hides_objects_beyond_view() {
    let attributes = LaneStructureAttributes {
        downstream: 150.0,
        ..Default::default()
    };

    let mut net = Network::new();
    let lanes = chain(&mut net, &[100.0, 50.0, 80.0]);
    net.add_object(lanes[2], ObjectKind::StopLine, 30.0);
    let structure = build(&net, LanePosition::new(lanes[0], 0.0), attributes);
    assert!(structure
        .objects_ahead(&net, RelativeLane::CURRENT, ObjectKind::StopLine, 0.0, 300.0, None)
        .is_empty());
    assert!(structure
        .downstream_objects(&net, RelativeLane::CURRENT, ObjectKind::StopLine, 0.0)
        .is_empty());

    let mut net = Network::new();
    let lanes = chain(&mut net, &[100.0, 50.0, 80.0]);
    let object = net.add_object(lanes[1], ObjectKind::StopLine, 20.0);
    let structure = build(&net, LanePosition::new(lanes[0], 0.0), attributes);
    let found: Vec<_> = structure
        .objects_ahead(&net, RelativeLane::CURRENT, ObjectKind::StopLine, 0.0, 300.0, None)
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].object, object);
    assert_approx_eq!(found[0].distance.unwrap(), 120.0);
}

#[test]
fn merge_reports_each_leader_once() {
    let mut net = Network::new();
    let (a, c) = split_and_merge(&mut net);
    let ego = net.add_gtu(&CAR, LanePosition::new(a, 0.0));
    let near = net.add_gtu(&CAR, LanePosition::new(c, 10.0));
    let far = net.add_gtu(&CAR, LanePosition::new(c, 60.0));
    let structure = build(&net, net.gtu_position(ego), Default::default());

    // The lane after the merge is in the structure once per branch
    assert_eq!(structure.records().filter(|r| r.lane() == c).count(), 2);

    let leaders: Vec<_> = structure
        .leaders(&net, ego, RelativeLane::CURRENT, 300.0, None)
        .collect();
    assert_eq!(leaders.len(), 2);
    assert_eq!(leaders[0].object, near);
    assert_approx_eq!(leaders[0].distance.unwrap(), 206.0);
    assert_eq!(leaders[1].object, far);
    assert_approx_eq!(leaders[1].distance.unwrap(), 256.0);
}

#[test]
fn merge_reports_each_follower_once() {
    let mut net = Network::new();
    let [x, y, z, end] = [(); 4].map(|_| net.add_node());
    let a = add_lane(&mut net, x, y, 100.0);
    let b1 = add_lane(&mut net, y, z, 100.0);
    let b2 = add_lane(&mut net, y, z, 120.0);
    let c = add_lane(&mut net, z, end, 100.0);
    for b in [b1, b2] {
        net.connect_lanes(a, b);
        net.connect_lanes(b, c);
    }
    let ego = net.add_gtu(&CAR, LanePosition::new(c, 50.0));
    let on_branch = net.add_gtu(&CAR, LanePosition::new(b1, 50.0));
    let upstream = net.add_gtu(&CAR, LanePosition::new(a, 95.0));
    let structure = build(&net, net.gtu_position(ego), Default::default());
    assert_eq!(structure.records().filter(|r| r.lane() == a).count(), 2);

    let followers: Vec<_> = structure
        .followers(&net, ego, RelativeLane::CURRENT, 300.0)
        .collect();
    assert_eq!(followers.len(), 2);
    assert_eq!(followers[0].object, on_branch);
    assert_approx_eq!(followers[0].distance.unwrap(), 96.0);
    assert_eq!(followers[1].object, upstream);
    assert_approx_eq!(followers[1].distance.unwrap(), 151.0);
}

/// Places GTUs at random positions on a three lane road.
fn random_traffic(seed: u64) -> (Network, GtuId) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut net = Network::new();
    let nodes: Vec<_> = (0..4).map(|_| net.add_node()).collect();
    let mut links: Vec<Vec<LaneId>> = vec![];
    for i in 0..3 {
        let link = net.add_link(nodes[i], nodes[i + 1]);
        let lanes: Vec<_> = (0..3)
            .map(|_| {
                net.add_lane(&LaneAttributes {
                    link,
                    length: 200.0,
                    allowed: &[],
                })
            })
            .collect();
        net.set_adjacent(lanes[0], lanes[1]);
        net.set_adjacent(lanes[1], lanes[2]);
        links.push(lanes);
    }
    for i in 0..2 {
        for k in 0..3 {
            net.connect_lanes(links[i][k], links[i + 1][k]);
        }
    }
    for _ in 0..60 {
        let lane = links[rng.gen_range(0..3)][rng.gen_range(0..3)];
        let position = rng.gen_range(0.0..200.0);
        net.add_gtu(&CAR, LanePosition::new(lane, position));
    }
    let ego = net.add_gtu(&CAR, LanePosition::new(links[1][1], 100.0));
    (net, ego)
}

#[test]
fn searches_are_ordered_and_deterministic() {
    for seed in 0..8 {
        let (net, ego) = random_traffic(seed);
        let structure = build(&net, net.gtu_position(ego), Default::default());
        for lane in [RelativeLane::LEFT, RelativeLane::CURRENT, RelativeLane::RIGHT] {
            let leaders: Vec<_> = structure.leaders(&net, ego, lane, 150.0, None).collect();
            let again: Vec<_> = structure.leaders(&net, ego, lane, 150.0, None).collect();
            assert_eq!(leaders, again);
            assert_ordered(&leaders, 150.0);
            assert!(leaders.iter().all(|p| p.object != ego));

            let followers: Vec<_> = structure.followers(&net, ego, lane, 150.0).collect();
            assert_ordered(&followers, 150.0);
            for leader in leaders.iter() {
                assert!(followers.iter().all(|f| f.object != leader.object));
            }
        }
    }
}

#[test]
fn long_vehicles_ordered_by_their_edges() {
    let truck = GtuAttributes {
        gtu_type: GtuType::TRUCK,
        length: 20.0,
    };
    let mut net = Network::new();
    let lanes = chain(&mut net, &[200.0]);
    let ego = net.add_gtu(&CAR, LanePosition::new(lanes[0], 100.0));
    // The trucks' centres are further away, but their ends are closer
    let car_ahead = net.add_gtu(&CAR, LanePosition::new(lanes[0], 145.0));
    let truck_ahead = net.add_gtu(&truck, LanePosition::new(lanes[0], 150.0));
    let car_behind = net.add_gtu(&CAR, LanePosition::new(lanes[0], 55.0));
    let truck_behind = net.add_gtu(&truck, LanePosition::new(lanes[0], 50.0));
    let structure = build(&net, net.gtu_position(ego), Default::default());

    let leaders: Vec<_> = structure
        .leaders(&net, ego, RelativeLane::CURRENT, 300.0, None)
        .collect();
    assert_eq!(leaders.len(), 2);
    assert_eq!(leaders[0].object, truck_ahead);
    assert_approx_eq!(leaders[0].distance.unwrap(), 38.0);
    assert_eq!(leaders[1].object, car_ahead);
    assert_approx_eq!(leaders[1].distance.unwrap(), 41.0);

    let followers: Vec<_> = structure
        .followers(&net, ego, RelativeLane::CURRENT, 300.0)
        .collect();
    assert_eq!(followers.len(), 2);
    assert_eq!(followers[0].object, truck_behind);
    assert_approx_eq!(followers[0].distance.unwrap(), 38.0);
    assert_eq!(followers[1].object, car_behind);
    assert_approx_eq!(followers[1].distance.unwrap(), 41.0);
}

#[test]
fn mixed_lengths_stay_ordered() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut net = Network::new();
    let lanes = chain(&mut net, &[200.0, 200.0, 200.0]);
    for _ in 0..40 {
        let attributes = GtuAttributes {
            gtu_type: GtuType::CAR,
            length: rng.gen_range(3.0..18.0),
        };
        let lane = lanes[rng.gen_range(0..3)];
        // Both ends stay on the lane
        let position = rng.gen_range(10.0..190.0);
        net.add_gtu(&attributes, LanePosition::new(lane, position));
    }
    let ego = net.add_gtu(&CAR, LanePosition::new(lanes[1], 100.0));
    let structure = build(&net, net.gtu_position(ego), Default::default());

    let leaders: Vec<_> = structure
        .leaders(&net, ego, RelativeLane::CURRENT, 250.0, None)
        .collect();
    assert!(!leaders.is_empty());
    assert_ordered(&leaders, 250.0);
    let followers: Vec<_> = structure
        .followers(&net, ego, RelativeLane::CURRENT, 250.0)
        .collect();
    assert!(!followers.is_empty());
    assert_ordered(&followers, 250.0);
}

fn assert_ordered(found: &[Perceived<GtuId>], max_distance: f64) {
    let distances: Vec<_> = found.iter().filter_map(|p| p.distance).collect();
    // Overlapping GTUs come first
    let overlapping = found.iter().take_while(|p| p.distance.is_none()).count();
    assert_eq!(overlapping + distances.len(), found.len());
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert!(distances.iter().all(|d| *d <= max_distance));
}

#[test]
fn first_does_not_consume() {
    let mut net = Network::new();
    let lanes = chain(&mut net, &[200.0]);
    let ego = net.add_gtu(&CAR, LanePosition::new(lanes[0], 20.0));
    let gtus: Vec<_> = [60.0, 90.0, 150.0]
        .iter()
        .map(|p| net.add_gtu(&CAR, LanePosition::new(lanes[0], *p)))
        .collect();
    let structure = build(&net, net.gtu_position(ego), Default::default());

    let mut leaders = structure.leaders(&net, ego, RelativeLane::CURRENT, 100.0, None);
    assert!(!leaders.is_empty());
    assert_eq!(leaders.first().map(|p| p.object), Some(gtus[0]));
    assert_eq!(leaders.next().map(|p| p.object), Some(gtus[0]));
    assert_eq!(leaders.first().map(|p| p.object), Some(gtus[0]));
    let rest: Vec<_> = leaders.objects().collect();
    assert_eq!(rest, [gtus[1]]);

    // The nearest GTU closer than 50 m, stopping at the first one beyond
    let mut leaders = structure.leaders(&net, ego, RelativeLane::CURRENT, 200.0, None);
    let close = leaders.accumulate(
        vec![],
        |mut close, perceived| match perceived.distance {
            Some(d) if d > 50.0 => ControlFlow::Break(close),
            _ => {
                close.push(perceived.object);
                ControlFlow::Continue(close)
            }
        },
        |close| close.len(),
    );
    assert_eq!(close, 1);
}
