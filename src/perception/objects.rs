use super::neighbors::follows_route;
use super::{probe_sorted, PerceptionIterable, PerceptionSearch, Probe, SearchDirection};
use crate::network::{ObjectKind, RoadNetwork};
use crate::relative_lane::RelativeLane;
use crate::route::Route;
use crate::structure::LaneStructure;
use crate::{ObjectId, RecordId};

/// Searches for the objects of a kind on the lanes, measured from a point `dx` in front of
/// the observer's reference point.
///
/// Objects at the same position are reported together, in the order they were placed.
pub struct LaneObjects<'a, N: ?Sized> {
    network: &'a N,
    kind: ObjectKind,
    direction: SearchDirection,
    dx: f64,
    /// Only records on the route are followed downstream.
    route: Option<&'a Route>,
}

impl<'a, N: RoadNetwork + ?Sized> LaneObjects<'a, N> {
    pub fn new(
        network: &'a N,
        kind: ObjectKind,
        direction: SearchDirection,
        dx: f64,
        route: Option<&'a Route>,
    ) -> Self {
        Self {
            network,
            kind,
            direction,
            dx,
            route,
        }
    }
}

impl<N: RoadNetwork + ?Sized> PerceptionSearch for LaneObjects<'_, N> {
    type Object = ObjectId;

    fn direction(&self) -> SearchDirection {
        self.direction
    }

    fn next_on_record(
        &self,
        structure: &LaneStructure,
        record: RecordId,
        position: f64,
        counter: Option<usize>,
    ) -> Option<Probe<ObjectId>> {
        let lane = structure.record(record)?.lane();
        probe_sorted(
            self.network.lane_objects(lane),
            self.direction,
            position,
            counter,
            |id| self.network.object(id).position,
            |id| self.network.object(id).kind == self.kind,
        )
    }

    fn distance(
        &self,
        structure: &LaneStructure,
        _object: ObjectId,
        record: RecordId,
        position: f64,
    ) -> Option<f64> {
        let distance = structure.record(record)?.distance_to_position(position);
        match self.direction {
            SearchDirection::Downstream => Some(distance - self.dx),
            SearchDirection::Upstream => Some(self.dx - distance),
        }
    }

    fn follows(&self, structure: &LaneStructure, record: RecordId) -> bool {
        match self.direction {
            SearchDirection::Downstream => follows_route(structure, record, self.route),
            SearchDirection::Upstream => true,
        }
    }
}

impl LaneStructure {
    /// Searches for the objects of a kind ahead on a relative lane, nearest first.
    pub fn objects_ahead<'s, N: RoadNetwork + ?Sized>(
        &'s self,
        network: &'s N,
        lane: RelativeLane,
        kind: ObjectKind,
        dx: f64,
        max_distance: f64,
        route: Option<&'s Route>,
    ) -> PerceptionIterable<'s, LaneObjects<'s, N>> {
        let search = LaneObjects::new(network, kind, SearchDirection::Downstream, dx, route);
        let first = self.first_record(lane);
        PerceptionIterable::new(
            self,
            search,
            first.map(|r| r.id()),
            first.map_or(0.0, |r| dx - r.start_distance()),
            max_distance,
        )
    }

    /// Searches for the objects of a kind behind on a relative lane, nearest first.
    pub fn objects_behind<'s, N: RoadNetwork + ?Sized>(
        &'s self,
        network: &'s N,
        lane: RelativeLane,
        kind: ObjectKind,
        dx: f64,
        max_distance: f64,
    ) -> PerceptionIterable<'s, LaneObjects<'s, N>> {
        let search = LaneObjects::new(network, kind, SearchDirection::Upstream, dx, None);
        let first = self
            .first_record(lane)
            .filter(|r| r.start_distance() <= 0.0);
        PerceptionIterable::new(
            self,
            search,
            first.map(|r| r.id()),
            first.map_or(0.0, |r| dx - r.start_distance()),
            max_distance,
        )
    }
}
