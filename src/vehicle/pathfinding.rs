use super::{GtuType, VehiclePlan};
use crate::network::RoadNetwork;
use crate::relative_lane::LateralDirection;
use crate::route::Route;
use crate::LaneId;
use pathfinding::directed::bfs::bfs;
use smallvec::SmallVec;

/// A vehicle plan that follows a route through the network.
/// This can be conceptualised as the vehicle's GPS navigation unit.
///
/// Where a lane continues onto several lanes of the next link on the route, the lane
/// from which the destination can be reached with the fewest lane changes is chosen.
pub struct RoutePlan<'a, N: ?Sized> {
    /// The network the route runs through.
    network: &'a N,
    /// The route to follow, if any.
    route: Option<&'a Route>,
    /// The type of the vehicle.
    gtu_type: GtuType,
    /// Whether the vehicle is deviating from the lane centre line.
    deviative: bool,
}

impl<'a, N: RoadNetwork + ?Sized> RoutePlan<'a, N> {
    /// Creates a plan along a route.
    pub fn new(network: &'a N, route: Option<&'a Route>, gtu_type: GtuType) -> Self {
        Self {
            network,
            route,
            gtu_type,
            deviative: false,
        }
    }

    /// Sets whether the vehicle is deviating from the lane centre line.
    pub fn with_deviative(mut self, deviative: bool) -> Self {
        self.deviative = deviative;
        self
    }

    /// Whether a lane lies on a link along the route.
    fn on_route(&self, route: &Route, lane: LaneId) -> bool {
        let (from, to) = self.network.lane_nodes(lane);
        route.continues_on(from, to)
    }

    /// The lanes reachable from a lane while staying on the route,
    /// by driving on or by a legal lane change.
    fn successors(&self, route: &Route, lane: LaneId) -> SmallVec<[LaneId; 8]> {
        let mut lanes: SmallVec<[LaneId; 8]> = SmallVec::new();
        lanes.extend(self.network.next_lanes(lane, self.gtu_type));
        for direction in LateralDirection::BOTH {
            lanes.extend(self.network.adjacent_lanes_legal(lane, direction, self.gtu_type));
        }
        lanes.retain(|l| self.on_route(route, *l));
        lanes
    }

    /// The number of steps from a lane to the end of the route, if it can be reached.
    fn steps_to_destination(&self, route: &Route, lane: LaneId) -> Option<usize> {
        let destination = route.destination()?;
        let path = bfs(
            &lane,
            |l| self.successors(route, *l),
            |l| self.network.lane_nodes(*l).1 == destination,
        )?;
        Some(path.len())
    }
}

impl<N: RoadNetwork + ?Sized> VehiclePlan for RoutePlan<'_, N> {
    fn next_lane_for_route(&self, lane: LaneId) -> Option<LaneId> {
        let next_lanes = self.network.next_lanes(lane, self.gtu_type);
        let route = match self.route {
            Some(route) => route,
            None if next_lanes.len() == 1 => return next_lanes.first().copied(),
            None => return None,
        };
        let candidates: SmallVec<[LaneId; 4]> = next_lanes
            .into_iter()
            .filter(|l| self.on_route(route, *l))
            .collect();
        match candidates.as_slice() {
            [] => None,
            [single] => Some(*single),
            _ => candidates
                .iter()
                .filter_map(|l| self.steps_to_destination(route, *l).map(|s| (*l, s)))
                .min_by_key(|(_, steps)| *steps)
                .map(|(l, _)| l)
                .or_else(|| candidates.first().copied()),
        }
    }

    fn is_deviative(&self) -> bool {
        self.deviative
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::{LaneAttributes, Network};

    fn lane(net: &mut Network, link: crate::LinkId) -> LaneId {
        net.add_lane(&LaneAttributes {
            link,
            length: 100.0,
            allowed: &[],
        })
    }

    #[test]
    fn chooses_lane_towards_destination() {
        // A single lane widens into two lanes, of which only the right one continues
        let mut net = Network::new();
        let [a, b, c, d] = [(); 4].map(|_| net.add_node());
        let ab = net.add_link(a, b);
        let bc = net.add_link(b, c);
        let cd = net.add_link(c, d);
        let start = lane(&mut net, ab);
        let left = lane(&mut net, bc);
        let right = lane(&mut net, bc);
        let end = lane(&mut net, cd);
        net.set_adjacent(left, right);
        net.forbid_lane_change(left, LateralDirection::Right);
        net.connect_lanes(start, left);
        net.connect_lanes(start, right);
        net.connect_lanes(right, end);

        let route = Route::new(vec![a, b, c, d]);
        let plan = RoutePlan::new(&net, Some(&route), GtuType::CAR);
        assert_eq!(plan.next_lane_for_route(start), Some(right));
        assert_eq!(plan.next_lane_for_route(right), Some(end));
        assert_eq!(plan.next_lane_for_route(end), None);

        let plan = RoutePlan::new(&net, None, GtuType::CAR);
        assert_eq!(plan.next_lane_for_route(start), None);
        assert_eq!(plan.next_lane_for_route(right), Some(end));
        assert!(!plan.is_deviative());
        assert!(plan.with_deviative(true).is_deviative());
    }

    #[test]
    fn ignores_lanes_off_route() {
        let mut net = Network::new();
        let [a, b, c, x] = [(); 4].map(|_| net.add_node());
        let ab = net.add_link(a, b);
        let bc = net.add_link(b, c);
        let bx = net.add_link(b, x);
        let start = lane(&mut net, ab);
        let on = lane(&mut net, bc);
        let off = lane(&mut net, bx);
        net.connect_lanes(start, off);
        net.connect_lanes(start, on);

        let route = Route::new(vec![a, b, c]);
        let plan = RoutePlan::new(&net, Some(&route), GtuType::CAR);
        assert_eq!(plan.next_lane_for_route(start), Some(on));
    }
}
