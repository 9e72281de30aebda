use itertools::Itertools;
use lane_perception::{
    GtuAttributes, GtuId, GtuType, LaneAttributes, LaneId, LanePosition, LaneStructure, Network,
    RelativeLane, RoutePlan,
};
use std::time::Instant;

const LINKS: usize = 8;
const LINK_LENGTH: f64 = 250.0;
const VEHICLES: usize = 48;
const SPEED: f64 = 25.0;
const DT: f64 = 0.1;

struct Car {
    id: GtuId,
    link: usize,
    lane: usize,
    position: f64,
    structure: LaneStructure,
}

/// Builds a two lane ring road with an on-ramp merging into its right lane.
fn build_ring(net: &mut Network) -> Vec<[LaneId; 2]> {
    let nodes: Vec<_> = (0..LINKS).map(|_| net.add_node()).collect();
    let lanes: Vec<[LaneId; 2]> = (0..LINKS)
        .map(|i| {
            let link = net.add_link(nodes[i], nodes[(i + 1) % LINKS]);
            let attribs = LaneAttributes {
                link,
                length: LINK_LENGTH,
                allowed: &[],
            };
            let lanes = [net.add_lane(&attribs), net.add_lane(&attribs)];
            net.set_adjacent(lanes[0], lanes[1]);
            lanes
        })
        .collect();
    for i in 0..LINKS {
        for k in 0..2 {
            net.connect_lanes(lanes[i][k], lanes[(i + 1) % LINKS][k]);
        }
    }

    let origin = net.add_node();
    let link = net.add_link(origin, nodes[0]);
    let ramp = net.add_lane(&LaneAttributes {
        link,
        length: 150.0,
        allowed: &[GtuType::CAR],
    });
    net.connect_lanes(ramp, lanes[0][1]);
    lanes
}

fn main() {
    let mut net = Network::new();
    let lanes = build_ring(&mut net);
    let attributes = GtuAttributes {
        gtu_type: GtuType::CAR,
        length: 4.5,
    };

    let spacing = LINKS as f64 * LINK_LENGTH / (VEHICLES / 2) as f64;
    let mut cars: Vec<Car> = (0..VEHICLES)
        .map(|i| {
            let distance = (i / 2) as f64 * spacing;
            let link = (distance / LINK_LENGTH) as usize;
            let position = distance - link as f64 * LINK_LENGTH;
            let lane = i % 2;
            let id = net.add_gtu(&attributes, LanePosition::new(lanes[link][lane], position));
            Car {
                id,
                link,
                lane,
                position,
                structure: LaneStructure::new(Default::default()),
            }
        })
        .collect();

    println!("Simulating...");
    let num_frames = 500;
    let mut time = 0.0;
    for _ in 0..10 {
        let start = Instant::now();
        let mut found = 0;
        for _ in 0..num_frames {
            time += DT;
            for car in cars.iter_mut() {
                car.position += SPEED * DT;
                if car.position >= LINK_LENGTH {
                    car.position -= LINK_LENGTH;
                    car.link = (car.link + 1) % LINKS;
                }
                net.move_gtu(car.id, LanePosition::new(lanes[car.link][car.lane], car.position));
            }
            for car in cars.iter_mut() {
                let plan = RoutePlan::new(&net, None, attributes.gtu_type);
                let position = LanePosition::new(lanes[car.link][car.lane], car.position);
                let result = car
                    .structure
                    .update(&net, &plan, position, None, attributes.gtu_type, time);
                if let Err(err) = result {
                    eprintln!("Lane structure update failed: {}", err);
                    continue;
                }
                for lane in [RelativeLane::LEFT, RelativeLane::CURRENT, RelativeLane::RIGHT] {
                    let mut leaders = car.structure.leaders(&net, car.id, lane, 200.0, None);
                    if !leaders.is_empty() {
                        found += 1;
                    }
                }
            }
        }
        let frame = start.elapsed() / num_frames;
        println!(
            "Avg. frame: {:?} ({} vehs, {} leaders found, records: {})",
            frame,
            cars.len(),
            found,
            cars.iter().take(4).map(|c| c.structure.record_count()).join(", "),
        );
    }
}
