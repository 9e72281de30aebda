use super::{LaneStructure, Record};
use crate::network::{ObjectKind, RoadNetwork};
use crate::relative_lane::RelativeLane;
use crate::route::Route;
use crate::util::Entry;
use crate::ObjectId;
use std::collections::{BTreeMap, BTreeSet};

/// Objects found on the lanes of a structure, sorted by distance.
pub type ObjectEntries = BTreeSet<Entry<ObjectId>>;

impl LaneStructure {
    /// Finds the objects of a kind downstream on a relative lane, within the look-ahead distance.
    ///
    /// Distances are measured from a point `dx` in front of the vehicle's reference point,
    /// e.g. its front.
    pub fn downstream_objects<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        lane: RelativeLane,
        kind: ObjectKind,
        dx: f64,
    ) -> ObjectEntries {
        let mut set = BTreeSet::new();
        let record = match self.first_record(lane) {
            Some(record) => record,
            None => return set,
        };
        let look_ahead = self.attributes.look_ahead;
        if record.is_downstream_branch() {
            let min_position = dx - record.start_distance();
            for id in network.lane_objects(record.lane()) {
                let object = network.object(*id);
                if object.kind != kind || object.position < min_position {
                    continue;
                }
                let distance = record.distance_to_position(object.position) - dx;
                if distance <= look_ahead {
                    set.insert(Entry::new(distance, *id));
                }
            }
        }
        self.downstream_objects_recursive(network, &mut set, record, kind, dx);
        set
    }

    fn downstream_objects_recursive<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        set: &mut ObjectEntries,
        record: &Record,
        kind: ObjectKind,
        dx: f64,
    ) {
        let look_ahead = self.attributes.look_ahead;
        let beyond = match record.next().first().and_then(|id| self.record(*id)) {
            Some(next) => next.start_distance() > look_ahead,
            None => true,
        };
        if beyond {
            return;
        }
        for next in record.next().iter().filter_map(|id| self.record(*id)) {
            if next.is_downstream_branch() {
                for id in network.lane_objects(next.lane()) {
                    let object = network.object(*id);
                    if object.kind != kind {
                        continue;
                    }
                    let distance = next.distance_to_position(object.position) - dx;
                    if distance > look_ahead {
                        break;
                    }
                    set.insert(Entry::new(distance, *id));
                }
            }
            self.downstream_objects_recursive(network, set, next, kind, dx);
        }
    }

    /// Finds the objects of a kind downstream on a relative lane that lie on links of the route.
    pub fn downstream_objects_on_route<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        lane: RelativeLane,
        kind: ObjectKind,
        dx: f64,
        route: Option<&Route>,
    ) -> ObjectEntries {
        let mut set = self.downstream_objects(network, lane, kind, dx);
        if let Some(route) = route {
            set.retain(|entry| {
                let lane = network.object(entry.object).lane;
                let (from, to) = network.lane_nodes(lane);
                route.touches_link(from, to)
            });
        }
        set
    }

    /// Finds the objects of a kind upstream on a relative lane.
    ///
    /// Distances are measured from a point `dx` in front of the vehicle's reference point,
    /// e.g. its rear with a negative `dx`, and are positive upstream.
    pub fn upstream_objects<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        lane: RelativeLane,
        kind: ObjectKind,
        dx: f64,
    ) -> ObjectEntries {
        let mut set = BTreeSet::new();
        let record = match self.first_record(lane) {
            // A lane that starts downstream has nothing upstream
            Some(record) if record.start_distance() <= 0.0 => record,
            _ => return set,
        };
        let max_position = dx - record.start_distance();
        for id in network.lane_objects(record.lane()) {
            let object = network.object(*id);
            if object.kind != kind || object.position < 0.0 || object.position > max_position {
                continue;
            }
            let distance = dx - record.distance_to_position(object.position);
            set.insert(Entry::new(distance, *id));
        }
        self.upstream_objects_recursive(network, &mut set, record, kind, dx);
        set
    }

    fn upstream_objects_recursive<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        set: &mut ObjectEntries,
        record: &Record,
        kind: ObjectKind,
        dx: f64,
    ) {
        for prev in record.prev().iter().filter_map(|id| self.record(*id)) {
            for id in network.lane_objects(prev.lane()) {
                let object = network.object(*id);
                if object.kind == kind {
                    let distance = dx - prev.distance_to_position(object.position);
                    set.insert(Entry::new(distance, *id));
                }
            }
            self.upstream_objects_recursive(network, set, prev, kind, dx);
        }
    }

    /// Finds the objects of a kind downstream on every relative lane.
    pub fn downstream_objects_per_lane<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        kind: ObjectKind,
        dx: f64,
    ) -> BTreeMap<RelativeLane, ObjectEntries> {
        self.relative_lanes()
            .map(|lane| (lane, self.downstream_objects(network, lane, kind, dx)))
            .collect()
    }

    /// Finds the objects of a kind downstream on every relative lane that lie on links of the route.
    pub fn downstream_objects_on_route_per_lane<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        kind: ObjectKind,
        dx: f64,
        route: Option<&Route>,
    ) -> BTreeMap<RelativeLane, ObjectEntries> {
        self.relative_lanes()
            .map(|lane| {
                let set = self.downstream_objects_on_route(network, lane, kind, dx, route);
                (lane, set)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::network::{LaneAttributes, Network, ObjectKind, RoadNetwork};
    use crate::relative_lane::RelativeLane;
    use crate::structure::{LaneStructure, LaneStructureAttributes};
    use crate::vehicle::{GtuType, LanePosition, RoutePlan};
    use crate::LaneId;
    use assert_approx_eq::assert_approx_eq;

    /// A single lane chain with the given lane lengths.
    fn chain(net: &mut Network, lengths: &[f64]) -> Vec<LaneId> {
        let mut node = net.add_node();
        let mut lanes: Vec<LaneId> = vec![];
        for length in lengths {
            let next_node = net.add_node();
            let link = net.add_link(node, next_node);
            let lane = net.add_lane(&LaneAttributes {
                link,
                length: *length,
                allowed: &[],
            });
            if let Some(prev) = lanes.last() {
                net.connect_lanes(*prev, lane);
            }
            lanes.push(lane);
            node = next_node;
        }
        lanes
    }

    fn build(net: &Network, lane: LaneId, pos: f64, attributes: LaneStructureAttributes) -> LaneStructure {
        let mut structure = LaneStructure::new(attributes);
        let plan = RoutePlan::new(net, None, GtuType::CAR);
        structure
            .update(net, &plan, LanePosition::new(lane, pos), None, GtuType::CAR, 0.0)
            .unwrap();
        structure
    }

    #[test]
    fn downstream_objects_sorted_within_look_ahead() {
        let mut net = Network::new();
        let lanes = chain(&mut net, &[100.0, 50.0, 80.0, 200.0]);
        let near = net.add_object(lanes[0], ObjectKind::StopLine, 60.0);
        let behind = net.add_object(lanes[0], ObjectKind::StopLine, 5.0);
        let far = net.add_object(lanes[2], ObjectKind::StopLine, 30.0);
        let other_kind = net.add_object(lanes[1], ObjectKind::SpeedSign, 10.0);
        let beyond = net.add_object(lanes[3], ObjectKind::StopLine, 150.0);

        let structure = build(&net, lanes[0], 10.0, Default::default());
        let set = structure.downstream_objects(&net, RelativeLane::CURRENT, ObjectKind::StopLine, 0.0);
        let found: Vec<_> = set.iter().map(|e| (e.object, e.distance)).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, near);
        assert_approx_eq!(found[0].1, 50.0);
        assert_eq!(found[1].0, far);
        assert_approx_eq!(found[1].1, 170.0);
        assert!(set.iter().all(|e| e.object != behind && e.object != other_kind && e.object != beyond));
    }

    #[test]
    fn upstream_objects_measured_backwards() {
        let mut net = Network::new();
        let lanes = chain(&mut net, &[100.0, 100.0]);
        let a = net.add_object(lanes[0], ObjectKind::Detector, 40.0);
        let b = net.add_object(lanes[1], ObjectKind::Detector, 20.0);
        let ahead = net.add_object(lanes[1], ObjectKind::Detector, 80.0);

        let structure = build(&net, lanes[1], 50.0, Default::default());
        let set = structure.upstream_objects(&net, RelativeLane::CURRENT, ObjectKind::Detector, 0.0);
        let found: Vec<_> = set.iter().map(|e| (e.object, e.distance)).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, b);
        assert_approx_eq!(found[0].1, 30.0);
        assert_eq!(found[1].0, a);
        assert_approx_eq!(found[1].1, 110.0);
        assert!(set.iter().all(|e| e.object != ahead));
        assert_eq!(net.lane_objects(lanes[1]).len(), 2);
    }
}
