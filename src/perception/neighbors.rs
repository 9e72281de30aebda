use super::{probe_sorted, PerceptionIterable, PerceptionSearch, Probe, SearchDirection};
use crate::network::RoadNetwork;
use crate::relative_lane::RelativeLane;
use crate::route::Route;
use crate::structure::LaneStructure;
use crate::vehicle::RelativePositions;
use crate::{GtuId, LaneId, RecordId};
use itertools::Itertools;

/// Searches for the GTUs ahead of an observer, measuring the gap from the observer's front
/// to their rear.
///
/// GTUs are probed in the order of their rears, which is the order of their gaps.
pub struct DownstreamGtus<'a, N: ?Sized> {
    network: &'a N,
    /// The observing GTU, which is never reported.
    ego: Option<GtuId>,
    /// The offset of the observer's front from its reference point.
    front: f64,
    /// Only records on the route are followed.
    route: Option<&'a Route>,
}

impl<'a, N: RoadNetwork + ?Sized> DownstreamGtus<'a, N> {
    pub fn new(
        network: &'a N,
        ego: Option<GtuId>,
        extent: RelativePositions,
        route: Option<&'a Route>,
    ) -> Self {
        Self {
            network,
            ego,
            front: extent.front,
            route,
        }
    }
}

impl<N: RoadNetwork + ?Sized> PerceptionSearch for DownstreamGtus<'_, N> {
    type Object = GtuId;

    fn direction(&self) -> SearchDirection {
        SearchDirection::Downstream
    }

    fn next_on_record(
        &self,
        structure: &LaneStructure,
        record: RecordId,
        position: f64,
        counter: Option<usize>,
    ) -> Option<Probe<GtuId>> {
        let lane = structure.record(record)?.lane();
        let rear = |gtu: GtuId| edge_position(self.network, gtu, |extent| extent.rear);
        probe_sorted(
            &gtus_by_edge(self.network, lane, rear),
            SearchDirection::Downstream,
            position,
            counter,
            rear,
            |gtu| Some(gtu) != self.ego,
        )
    }

    /// `position` is the position of the GTU's rear.
    fn distance(
        &self,
        structure: &LaneStructure,
        _gtu: GtuId,
        record: RecordId,
        position: f64,
    ) -> Option<f64> {
        let gap = structure.record(record)?.distance_to_position(position) - self.front;
        (gap >= 0.0).then_some(gap)
    }

    fn follows(&self, structure: &LaneStructure, record: RecordId) -> bool {
        follows_route(structure, record, self.route)
    }
}

/// Searches for the GTUs behind an observer, measuring the gap from their front to the
/// observer's rear.
///
/// GTUs are probed in the order of their fronts.
pub struct UpstreamGtus<'a, N: ?Sized> {
    network: &'a N,
    /// The observing GTU, which is never reported.
    ego: Option<GtuId>,
    /// The offset of the observer's rear from its reference point.
    rear: f64,
}

impl<'a, N: RoadNetwork + ?Sized> UpstreamGtus<'a, N> {
    pub fn new(network: &'a N, ego: Option<GtuId>, extent: RelativePositions) -> Self {
        Self {
            network,
            ego,
            rear: extent.rear,
        }
    }
}

impl<N: RoadNetwork + ?Sized> PerceptionSearch for UpstreamGtus<'_, N> {
    type Object = GtuId;

    fn direction(&self) -> SearchDirection {
        SearchDirection::Upstream
    }

    fn next_on_record(
        &self,
        structure: &LaneStructure,
        record: RecordId,
        position: f64,
        counter: Option<usize>,
    ) -> Option<Probe<GtuId>> {
        let lane = structure.record(record)?.lane();
        let front = |gtu: GtuId| edge_position(self.network, gtu, |extent| extent.front);
        probe_sorted(
            &gtus_by_edge(self.network, lane, front),
            SearchDirection::Upstream,
            position,
            counter,
            front,
            |gtu| Some(gtu) != self.ego,
        )
    }

    /// `position` is the position of the GTU's front.
    fn distance(
        &self,
        structure: &LaneStructure,
        _gtu: GtuId,
        record: RecordId,
        position: f64,
    ) -> Option<f64> {
        let gap = self.rear - structure.record(record)?.distance_to_position(position);
        (gap >= 0.0).then_some(gap)
    }
}

/// The position of the rear or front of a GTU on its lane.
fn edge_position<N, E>(network: &N, gtu: GtuId, edge: E) -> f64
where
    N: RoadNetwork + ?Sized,
    E: Fn(RelativePositions) -> f64,
{
    network.gtu_position(gtu).position + edge(network.gtu_extent(gtu))
}

/// The GTUs on a lane sorted by the position of one of their edges.
/// GTUs of different length may be in a different order than their reference points.
fn gtus_by_edge<N, P>(network: &N, lane: LaneId, position_of: P) -> Vec<GtuId>
where
    N: RoadNetwork + ?Sized,
    P: Fn(GtuId) -> f64,
{
    network
        .lane_gtus(lane)
        .iter()
        .copied()
        .sorted_by(|a, b| position_of(*a).total_cmp(&position_of(*b)))
        .collect()
}

/// Whether a record lies on a link along the route, or no route is followed.
pub(crate) fn follows_route(structure: &LaneStructure, record: RecordId, route: Option<&Route>) -> bool {
    match (route, structure.record(record)) {
        (Some(route), Some(record)) => route.continues_on(record.from_node(), record.to_node()),
        _ => true,
    }
}

impl LaneStructure {
    /// Searches for the GTUs ahead of a GTU on a relative lane, nearest first.
    /// GTUs whose rear is not behind the rear of the observer are leaders.
    pub fn leaders<'s, N: RoadNetwork + ?Sized>(
        &'s self,
        network: &'s N,
        ego: GtuId,
        lane: RelativeLane,
        max_distance: f64,
        route: Option<&'s Route>,
    ) -> PerceptionIterable<'s, DownstreamGtus<'s, N>> {
        let extent = network.gtu_extent(ego);
        let search = DownstreamGtus::new(network, Some(ego), extent, route);
        let first = self.first_record(lane);
        PerceptionIterable::new(
            self,
            search,
            first.map(|r| r.id()),
            first.map_or(0.0, |r| extent.rear - r.start_distance()),
            max_distance,
        )
    }

    /// Searches for the GTUs behind a GTU on a relative lane, nearest first.
    /// GTUs whose front is not ahead of the front of the observer are followers.
    /// A lane that only starts downstream of the GTU has no followers.
    pub fn followers<'s, N: RoadNetwork + ?Sized>(
        &'s self,
        network: &'s N,
        ego: GtuId,
        lane: RelativeLane,
        max_distance: f64,
    ) -> PerceptionIterable<'s, UpstreamGtus<'s, N>> {
        let extent = network.gtu_extent(ego);
        let search = UpstreamGtus::new(network, Some(ego), extent);
        let first = self
            .first_record(lane)
            .filter(|r| r.start_distance() <= 0.0);
        PerceptionIterable::new(
            self,
            search,
            first.map(|r| r.id()),
            first.map_or(0.0, |r| extent.front - r.start_distance()),
            max_distance,
        )
    }
}
