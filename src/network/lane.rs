use crate::network::{GtuSet, ObjectSet};
use crate::relative_lane::LateralDirection;
use crate::vehicle::GtuType;
use crate::{GtuId, LaneId, LinkId, ObjectId};
use smallvec::SmallVec;

/// A lane is a single stretch of road, part of a link.
#[derive(Clone, Debug)]
pub struct Lane {
    /// The lane ID.
    id: LaneId,
    /// The link the lane belongs to.
    link: LinkId,
    /// The length of the lane in m.
    length: f64,
    /// The GTU types allowed on the lane, all types if empty.
    allowed: SmallVec<[GtuType; 2]>,
    /// The lanes that precede this one.
    lanes_in: Vec<LaneId>,
    /// The lanes that succeed this one.
    lanes_out: Vec<LaneId>,
    /// The lanes physically adjacent on the left.
    lanes_left: SmallVec<[AdjacentLane; 1]>,
    /// The lanes physically adjacent on the right.
    lanes_right: SmallVec<[AdjacentLane; 1]>,
    /// The objects on the lane, in order of position.
    objects: Vec<ObjectId>,
    /// The GTUs on the lane, in order of position.
    gtus: Vec<GtuId>,
}

/// The attributes of a lane.
pub struct LaneAttributes<'a> {
    /// The link the lane is part of.
    pub link: LinkId,
    /// The length of the lane in m.
    pub length: f64,
    /// The GTU types allowed on the lane, or all types if empty.
    pub allowed: &'a [GtuType],
}

/// Information about a lane physically adjacent to another.
#[derive(Clone, Copy, Debug)]
struct AdjacentLane {
    /// The ID of the adjacent lane.
    lane_id: LaneId,
    /// Whether changing onto the adjacent lane is permitted.
    legal: bool,
}

impl Lane {
    /// Creates a new lane.
    pub(crate) fn new(id: LaneId, attribs: &LaneAttributes) -> Self {
        Self {
            id,
            link: attribs.link,
            length: attribs.length,
            allowed: attribs.allowed.iter().copied().collect(),
            lanes_in: vec![],
            lanes_out: vec![],
            lanes_left: SmallVec::new(),
            lanes_right: SmallVec::new(),
            objects: vec![],
            gtus: vec![],
        }
    }

    /// Gets the lane's ID.
    pub fn id(&self) -> LaneId {
        self.id
    }

    /// Gets the link the lane is part of.
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Gets the length of the lane in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Whether GTUs of the given type may use the lane.
    pub fn allows(&self, gtu_type: GtuType) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&gtu_type)
    }

    /// The lanes that precede this one.
    pub fn lanes_in(&self) -> &[LaneId] {
        &self.lanes_in
    }

    /// The lanes that succeed this one.
    pub fn lanes_out(&self) -> &[LaneId] {
        &self.lanes_out
    }

    /// The objects on the lane, in order of position.
    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    /// The GTUs on the lane, in order of position.
    pub fn gtus(&self) -> &[GtuId] {
        &self.gtus
    }

    /// The lanes adjacent in the given direction, with whether changing onto them is legal.
    pub(crate) fn adjacent(
        &self,
        direction: LateralDirection,
    ) -> impl Iterator<Item = (LaneId, bool)> + '_ {
        let lanes: &[AdjacentLane] = match direction {
            LateralDirection::Left => &self.lanes_left,
            LateralDirection::Right => &self.lanes_right,
            LateralDirection::None => &[],
        };
        lanes.iter().map(|adj| (adj.lane_id, adj.legal))
    }

    /// Adds a successor lane.
    pub(crate) fn add_successor_lane(&mut self, lane_id: LaneId) {
        if !self.lanes_out.contains(&lane_id) {
            self.lanes_out.push(lane_id);
        }
    }

    /// Adds a predecessor lane.
    pub(crate) fn add_predecessor_lane(&mut self, lane_id: LaneId) {
        if !self.lanes_in.contains(&lane_id) {
            self.lanes_in.push(lane_id);
        }
    }

    /// Adds a physically adjacent lane.
    pub(crate) fn add_adjacent_lane(&mut self, direction: LateralDirection, lane_id: LaneId) {
        let lanes = match direction {
            LateralDirection::Left => &mut self.lanes_left,
            LateralDirection::Right => &mut self.lanes_right,
            LateralDirection::None => return,
        };
        if !lanes.iter().any(|adj| adj.lane_id == lane_id) {
            lanes.push(AdjacentLane {
                lane_id,
                legal: true,
            });
        }
    }

    /// Sets whether changing onto the adjacent lanes in the given direction is permitted.
    pub(crate) fn set_lane_change_legal(&mut self, direction: LateralDirection, legal: bool) {
        let lanes = match direction {
            LateralDirection::Left => &mut self.lanes_left,
            LateralDirection::Right => &mut self.lanes_right,
            LateralDirection::None => return,
        };
        for adj in lanes {
            adj.legal = legal;
        }
    }

    /// Inserts the object with the given ID into the lane.
    pub(crate) fn insert_object(&mut self, objects: &ObjectSet, id: ObjectId) {
        let pos = objects[id].position;
        let idx = self
            .objects
            .iter()
            .map(|id| objects[*id].position)
            .position(|p| p > pos)
            .unwrap_or(self.objects.len());
        self.objects.insert(idx, id);
    }

    /// Inserts the GTU with the given ID into the lane.
    pub(crate) fn insert_gtu(&mut self, gtus: &GtuSet, id: GtuId) {
        let pos = gtus[id].position.position;
        let idx = self
            .gtus
            .iter()
            .map(|id| gtus[*id].position.position)
            .position(|p| p > pos)
            .unwrap_or(self.gtus.len());
        self.gtus.insert(idx, id);
    }

    /// Removes the GTU with the given ID from the lane.
    pub(crate) fn remove_gtu(&mut self, id: GtuId) {
        if let Some(idx) = self.gtus.iter().rposition(|g| *g == id) {
            self.gtus.remove(idx);
        }
    }
}
