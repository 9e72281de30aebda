//! The road network as consumed by lane structures, and a simple in-memory implementation.

pub use self::lane::{Lane, LaneAttributes};
use crate::relative_lane::LateralDirection;
use crate::vehicle::{GtuAttributes, GtuType, LanePosition, RelativePositions};
use crate::{GtuId, LaneId, LinkId, NodeId, ObjectId};
use slotmap::SlotMap;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod lane;

/// Read-only access to a road network.
///
/// Lane structures never modify the network; they only follow its connectivity
/// and look up what is placed on its lanes.
pub trait RoadNetwork {
    /// The length of a lane in m.
    fn lane_length(&self, lane: LaneId) -> f64;

    /// The link a lane is part of.
    fn lane_link(&self, lane: LaneId) -> LinkId;

    /// The start and end node of a link.
    fn link_nodes(&self, link: LinkId) -> (NodeId, NodeId);

    /// The number of lanes on a link.
    fn link_lane_count(&self, link: LinkId) -> usize;

    /// The lanes a GTU of the given type can drive onto from the end of `lane`.
    fn next_lanes(&self, lane: LaneId, gtu_type: GtuType) -> SmallVec<[LaneId; 4]>;

    /// The lanes a GTU of the given type can arrive from at the start of `lane`.
    fn prev_lanes(&self, lane: LaneId, gtu_type: GtuType) -> SmallVec<[LaneId; 4]>;

    /// The lanes physically accessible next to `lane` in the given direction.
    fn adjacent_lanes_physical(
        &self,
        lane: LaneId,
        direction: LateralDirection,
        gtu_type: GtuType,
    ) -> SmallVec<[LaneId; 2]>;

    /// The lanes next to `lane` in the given direction that may legally be changed onto.
    fn adjacent_lanes_legal(
        &self,
        lane: LaneId,
        direction: LateralDirection,
        gtu_type: GtuType,
    ) -> SmallVec<[LaneId; 2]>;

    /// The objects on a lane, in order of increasing position.
    fn lane_objects(&self, lane: LaneId) -> &[ObjectId];

    /// Gets an object.
    fn object(&self, object: ObjectId) -> &LaneObject;

    /// The GTUs registered on a lane, in order of increasing position.
    fn lane_gtus(&self, lane: LaneId) -> &[GtuId];

    /// The position of a GTU's reference point.
    fn gtu_position(&self, gtu: GtuId) -> LanePosition;

    /// The front and rear of a GTU relative to its reference point.
    fn gtu_extent(&self, gtu: GtuId) -> RelativePositions;

    /// The start and end node of the link a lane is part of.
    fn lane_nodes(&self, lane: LaneId) -> (NodeId, NodeId) {
        self.link_nodes(self.lane_link(lane))
    }
}

/// The kind of an object placed on a lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ObjectKind {
    TrafficLight,
    StopLine,
    SpeedSign,
    Detector,
    Conflict,
    Other(u16),
}

/// An object placed at a position on a lane.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneObject {
    /// The object ID.
    pub id: ObjectId,
    /// The kind of object.
    pub kind: ObjectKind,
    /// The lane the object is on.
    pub lane: LaneId,
    /// The longitudinal position along the lane in m.
    pub position: f64,
}

/// A link connects two nodes with a group of lanes.
#[derive(Clone, Debug)]
struct Link {
    from: NodeId,
    to: NodeId,
    lanes: SmallVec<[LaneId; 4]>,
}

/// A GTU registered on the network.
#[derive(Clone, Debug)]
pub(crate) struct Gtu {
    attributes: GtuAttributes,
    pub(crate) position: LanePosition,
}

pub(crate) type ObjectSet = SlotMap<ObjectId, LaneObject>;
pub(crate) type GtuSet = SlotMap<GtuId, Gtu>;

/// A simple in-memory road network.
#[derive(Clone, Debug, Default)]
pub struct Network {
    /// The nodes in the network.
    nodes: SlotMap<NodeId, ()>,
    /// The links in the network.
    links: SlotMap<LinkId, Link>,
    /// The lanes in the network.
    lanes: SlotMap<LaneId, Lane>,
    /// The objects placed on lanes.
    objects: ObjectSet,
    /// The GTUs registered on lanes.
    gtus: GtuSet,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a node to the network.
    pub fn add_node(&mut self) -> NodeId {
        self.nodes.insert(())
    }

    /// Adds a link between two nodes.
    pub fn add_link(&mut self, from: NodeId, to: NodeId) -> LinkId {
        self.links.insert(Link {
            from,
            to,
            lanes: SmallVec::new(),
        })
    }

    /// Adds a lane to a link.
    pub fn add_lane(&mut self, attributes: &LaneAttributes) -> LaneId {
        let id = self
            .lanes
            .insert_with_key(|id| Lane::new(id, attributes));
        self.links[attributes.link].lanes.push(id);
        id
    }

    /// Connects the end of lane `from` to the start of lane `to`.
    pub fn connect_lanes(&mut self, from: LaneId, to: LaneId) {
        self.lanes[from].add_successor_lane(to);
        self.lanes[to].add_predecessor_lane(from);
    }

    /// Specifies that lane `left` lies directly left of lane `right`.
    /// Lane changes between the two are permitted in both directions.
    pub fn set_adjacent(&mut self, left: LaneId, right: LaneId) {
        self.lanes[left].add_adjacent_lane(LateralDirection::Right, right);
        self.lanes[right].add_adjacent_lane(LateralDirection::Left, left);
    }

    /// Forbids changing lanes from `lane` in the given direction, e.g. due to a solid line.
    /// The adjacent lanes remain physically accessible.
    pub fn forbid_lane_change(&mut self, lane: LaneId, direction: LateralDirection) {
        self.lanes[lane].set_lane_change_legal(direction, false);
    }

    /// Places an object on a lane.
    pub fn add_object(&mut self, lane: LaneId, kind: ObjectKind, position: f64) -> ObjectId {
        let id = self.objects.insert_with_key(|id| LaneObject {
            id,
            kind,
            lane,
            position,
        });
        self.lanes[lane].insert_object(&self.objects, id);
        id
    }

    /// Registers a GTU at a position on the network.
    pub fn add_gtu(&mut self, attributes: &GtuAttributes, position: LanePosition) -> GtuId {
        let id = self.gtus.insert(Gtu {
            attributes: *attributes,
            position,
        });
        self.lanes[position.lane].insert_gtu(&self.gtus, id);
        id
    }

    /// Moves a GTU to a new position.
    pub fn move_gtu(&mut self, id: GtuId, position: LanePosition) {
        let old_lane = self.gtus[id].position.lane;
        self.lanes[old_lane].remove_gtu(id);
        self.gtus[id].position = position;
        self.lanes[position.lane].insert_gtu(&self.gtus, id);
    }

    /// Removes a GTU from the network.
    pub fn remove_gtu(&mut self, id: GtuId) {
        if let Some(gtu) = self.gtus.remove(id) {
            self.lanes[gtu.position.lane].remove_gtu(id);
        }
    }

    /// Gets a reference to the lane with the given ID.
    pub fn get_lane(&self, lane: LaneId) -> &Lane {
        &self.lanes[lane]
    }

    /// The lanes of a link.
    pub fn link_lanes(&self, link: LinkId) -> &[LaneId] {
        &self.links[link].lanes
    }

    /// The attributes of a GTU.
    pub fn gtu_attributes(&self, gtu: GtuId) -> &GtuAttributes {
        &self.gtus[gtu].attributes
    }

    /// Iterates over the GTUs in the network.
    pub fn iter_gtus(&self) -> impl Iterator<Item = GtuId> + '_ {
        self.gtus.keys()
    }

    /// Collects the lanes adjacent to `lane` that GTUs of the given type may use.
    fn adjacent(
        &self,
        lane: LaneId,
        direction: LateralDirection,
        gtu_type: GtuType,
        legal_only: bool,
    ) -> SmallVec<[LaneId; 2]> {
        self.lanes[lane]
            .adjacent(direction)
            .filter(|(_, legal)| *legal || !legal_only)
            .map(|(id, _)| id)
            .filter(|id| self.lanes[*id].allows(gtu_type))
            .collect()
    }
}

impl RoadNetwork for Network {
    fn lane_length(&self, lane: LaneId) -> f64 {
        self.lanes[lane].length()
    }

    fn lane_link(&self, lane: LaneId) -> LinkId {
        self.lanes[lane].link()
    }

    fn link_nodes(&self, link: LinkId) -> (NodeId, NodeId) {
        let link = &self.links[link];
        (link.from, link.to)
    }

    fn link_lane_count(&self, link: LinkId) -> usize {
        self.links[link].lanes.len()
    }

    fn next_lanes(&self, lane: LaneId, gtu_type: GtuType) -> SmallVec<[LaneId; 4]> {
        self.lanes[lane]
            .lanes_out()
            .iter()
            .copied()
            .filter(|id| self.lanes[*id].allows(gtu_type))
            .collect()
    }

    fn prev_lanes(&self, lane: LaneId, gtu_type: GtuType) -> SmallVec<[LaneId; 4]> {
        self.lanes[lane]
            .lanes_in()
            .iter()
            .copied()
            .filter(|id| self.lanes[*id].allows(gtu_type))
            .collect()
    }

    fn adjacent_lanes_physical(
        &self,
        lane: LaneId,
        direction: LateralDirection,
        gtu_type: GtuType,
    ) -> SmallVec<[LaneId; 2]> {
        self.adjacent(lane, direction, gtu_type, false)
    }

    fn adjacent_lanes_legal(
        &self,
        lane: LaneId,
        direction: LateralDirection,
        gtu_type: GtuType,
    ) -> SmallVec<[LaneId; 2]> {
        self.adjacent(lane, direction, gtu_type, true)
    }

    fn lane_objects(&self, lane: LaneId) -> &[ObjectId] {
        self.lanes[lane].objects()
    }

    fn object(&self, object: ObjectId) -> &LaneObject {
        &self.objects[object]
    }

    fn lane_gtus(&self, lane: LaneId) -> &[GtuId] {
        self.lanes[lane].gtus()
    }

    fn gtu_position(&self, gtu: GtuId) -> LanePosition {
        self.gtus[gtu].position
    }

    fn gtu_extent(&self, gtu: GtuId) -> RelativePositions {
        RelativePositions::centred(self.gtus[gtu].attributes.length)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn two_lane_link(net: &mut Network) -> (LaneId, LaneId) {
        let a = net.add_node();
        let b = net.add_node();
        let link = net.add_link(a, b);
        let attribs = LaneAttributes {
            link,
            length: 100.0,
            allowed: &[],
        };
        let left = net.add_lane(&attribs);
        let right = net.add_lane(&attribs);
        net.set_adjacent(left, right);
        (left, right)
    }

    #[test]
    fn objects_are_sorted() {
        let mut net = Network::new();
        let (lane, _) = two_lane_link(&mut net);
        let far = net.add_object(lane, ObjectKind::SpeedSign, 80.0);
        let near = net.add_object(lane, ObjectKind::StopLine, 20.0);
        let mid = net.add_object(lane, ObjectKind::Detector, 50.0);
        assert_eq!(net.lane_objects(lane), &[near, mid, far]);
    }

    #[test]
    fn gtus_stay_sorted_when_moved() {
        let mut net = Network::new();
        let (lane, other) = two_lane_link(&mut net);
        let attribs = GtuAttributes {
            gtu_type: GtuType::CAR,
            length: 4.0,
        };
        let a = net.add_gtu(&attribs, LanePosition::new(lane, 10.0));
        let b = net.add_gtu(&attribs, LanePosition::new(lane, 30.0));
        let c = net.add_gtu(&attribs, LanePosition::new(lane, 20.0));
        assert_eq!(net.lane_gtus(lane), &[a, c, b]);

        net.move_gtu(a, LanePosition::new(lane, 40.0));
        assert_eq!(net.lane_gtus(lane), &[c, b, a]);

        net.move_gtu(c, LanePosition::new(other, 20.0));
        assert_eq!(net.lane_gtus(lane), &[b, a]);
        assert_eq!(net.lane_gtus(other), &[c]);
    }

    #[test]
    fn legal_adjacency_respects_forbidden_changes() {
        let mut net = Network::new();
        let (left, right) = two_lane_link(&mut net);
        net.forbid_lane_change(right, LateralDirection::Left);

        let physical = net.adjacent_lanes_physical(right, LateralDirection::Left, GtuType::CAR);
        let legal = net.adjacent_lanes_legal(right, LateralDirection::Left, GtuType::CAR);
        assert_eq!(physical.as_slice(), &[left]);
        assert!(legal.is_empty());
        assert_eq!(
            net.adjacent_lanes_legal(left, LateralDirection::Right, GtuType::CAR).as_slice(),
            &[right]
        );
    }

    #[test]
    fn gtu_types_restrict_lanes() {
        let mut net = Network::new();
        let a = net.add_node();
        let b = net.add_node();
        let c = net.add_node();
        let ab = net.add_link(a, b);
        let bc = net.add_link(b, c);
        let first = net.add_lane(&LaneAttributes {
            link: ab,
            length: 50.0,
            allowed: &[],
        });
        let bus_lane = net.add_lane(&LaneAttributes {
            link: bc,
            length: 50.0,
            allowed: &[GtuType::BUS],
        });
        net.connect_lanes(first, bus_lane);

        assert!(net.next_lanes(first, GtuType::CAR).is_empty());
        assert_eq!(net.next_lanes(first, GtuType::BUS).as_slice(), &[bus_lane]);
        assert_eq!(net.prev_lanes(bus_lane, GtuType::CAR).as_slice(), &[first]);
        assert_eq!(net.lane_nodes(bus_lane), (b, c));
    }
}
