use crate::error::{Error, Result};
use crate::relative_lane::{LateralDirection, RelativeLane};
use crate::{LaneId, LinkId, NodeId, RecordId};
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::collections::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub(crate) type RecordSet = SlotMap<RecordId, Record>;

/// How a record's start distance derives from the start distance of its source record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecordLink {
    /// The source is directly downstream; this record ends where the source starts.
    Up,
    /// The source is directly upstream; this record starts where the source ends.
    Down,
    /// The source is a lateral neighbour found searching upstream; both end together.
    LateralEnd,
    /// The source is a lateral neighbour found searching downstream; both start together.
    LateralStart,
    /// The record is part of the cross-section at the observer, and derives
    /// from the observer's fractional position on it.
    Cross,
}

impl RecordLink {
    /// Calculates the start distance of a record of length `own_length`.
    pub fn start_distance(
        self,
        source_start: f64,
        source_length: f64,
        own_length: f64,
        fractional_position: f64,
    ) -> f64 {
        match self {
            Self::Up => source_start - own_length,
            Self::Down => source_start + source_length,
            Self::LateralEnd => source_start + source_length - own_length,
            Self::LateralStart => source_start,
            Self::Cross => -own_length * fractional_position,
        }
    }
}

/// A lane as seen from the observing vehicle.
///
/// The same lane may be represented by several records when it is reached via different branches.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record {
    /// The record ID.
    id: RecordId,
    /// The lane the record represents.
    lane: LaneId,
    /// The link of the lane.
    link: LinkId,
    /// The start and end node of the link.
    nodes: (NodeId, NodeId),
    /// The length of the lane in m.
    length: f64,
    /// The lane relative to the observer's lane.
    relative_lane: RelativeLane,
    /// The distance from the observer to the start of the lane in m, negative if behind.
    start_distance: f64,
    /// Part of the lane beyond which the structure was not expanded upstream, in m.
    cut_off_start: Option<f64>,
    /// Part of the lane beyond which the structure was not expanded downstream, in m.
    cut_off_end: Option<f64>,
    left: Option<RecordId>,
    legal_left: bool,
    right: Option<RecordId>,
    legal_right: bool,
    next: SmallVec<[RecordId; 2]>,
    prev: SmallVec<[RecordId; 2]>,
    /// The record this record's start distance derives from.
    source: Option<RecordId>,
    /// How the start distance derives from the source.
    source_link: RecordLink,
    /// The records whose start distance derives from this one.
    dependents: SmallVec<[RecordId; 4]>,
}

/// The lane related data needed to construct a record.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RecordLane {
    pub lane: LaneId,
    pub link: LinkId,
    pub nodes: (NodeId, NodeId),
    pub length: f64,
}

impl Record {
    pub(crate) fn new(
        id: RecordId,
        lane: RecordLane,
        relative_lane: RelativeLane,
        source: Option<RecordId>,
        source_link: RecordLink,
    ) -> Self {
        Self {
            id,
            lane: lane.lane,
            link: lane.link,
            nodes: lane.nodes,
            length: lane.length,
            relative_lane,
            start_distance: 0.0,
            cut_off_start: None,
            cut_off_end: None,
            left: None,
            legal_left: false,
            right: None,
            legal_right: false,
            next: SmallVec::new(),
            prev: SmallVec::new(),
            source,
            source_link,
            dependents: SmallVec::new(),
        }
    }

    /// Gets the record's ID.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Gets the lane the record represents.
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// Gets the link of the record's lane.
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// The start node of the link.
    pub fn from_node(&self) -> NodeId {
        self.nodes.0
    }

    /// The end node of the link.
    pub fn to_node(&self) -> NodeId {
        self.nodes.1
    }

    /// The length of the lane in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The lane relative to the observer's lane.
    pub fn relative_lane(&self) -> RelativeLane {
        self.relative_lane
    }

    /// The distance from the observer to the start of the lane in m, negative if behind.
    pub fn start_distance(&self) -> f64 {
        self.start_distance
    }

    /// The distance from the observer to a position on the lane in m.
    pub fn distance_to_position(&self, position: f64) -> f64 {
        self.start_distance + position
    }

    pub fn cut_off_start(&self) -> Option<f64> {
        self.cut_off_start
    }

    pub fn cut_off_end(&self) -> Option<f64> {
        self.cut_off_end
    }

    pub fn is_cut_off_start(&self) -> bool {
        self.cut_off_start.is_some()
    }

    pub fn is_cut_off_end(&self) -> bool {
        self.cut_off_end.is_some()
    }

    /// Whether the lane ends without successors, rather than being cut off.
    pub fn is_dead_end(&self) -> bool {
        self.cut_off_end.is_none() && self.next.is_empty()
    }

    /// Whether the record was found searching downstream, or is part of the cross-section.
    pub fn is_downstream_branch(&self) -> bool {
        !matches!(self.source_link, RecordLink::Up | RecordLink::LateralEnd)
    }

    pub fn left(&self) -> Option<RecordId> {
        self.left
    }

    pub fn right(&self) -> Option<RecordId> {
        self.right
    }

    /// The adjacent record in the given direction.
    pub fn adjacent(&self, direction: LateralDirection) -> Option<RecordId> {
        match direction {
            LateralDirection::Left => self.left,
            LateralDirection::Right => self.right,
            LateralDirection::None => None,
        }
    }

    /// Whether changing to the left neighbour is permitted.
    pub fn legal_left(&self) -> bool {
        self.left.is_some() && self.legal_left
    }

    /// Whether changing to the right neighbour is permitted.
    pub fn legal_right(&self) -> bool {
        self.right.is_some() && self.legal_right
    }

    pub fn physical_left(&self) -> bool {
        self.left.is_some()
    }

    pub fn physical_right(&self) -> bool {
        self.right.is_some()
    }

    /// The downstream records.
    pub fn next(&self) -> &[RecordId] {
        &self.next
    }

    /// The upstream records.
    pub fn prev(&self) -> &[RecordId] {
        &self.prev
    }

    /// The record this record's start distance derives from.
    pub fn source(&self) -> Option<RecordId> {
        self.source
    }

    pub fn source_link(&self) -> RecordLink {
        self.source_link
    }

    /// The records whose start distance derives from this one.
    pub fn dependents(&self) -> &[RecordId] {
        &self.dependents
    }

    pub(crate) fn set_relative_lane(&mut self, relative_lane: RelativeLane) {
        self.relative_lane = relative_lane;
    }

    /// Sets the adjacent record in the given direction.
    pub(crate) fn set_adjacent(&mut self, direction: LateralDirection, id: RecordId, legal: bool) {
        match direction {
            LateralDirection::Left => {
                self.left = Some(id);
                self.legal_left = legal;
            }
            LateralDirection::Right => {
                self.right = Some(id);
                self.legal_right = legal;
            }
            LateralDirection::None => {}
        }
    }

    /// Adds a downstream record.
    pub(crate) fn add_next(&mut self, id: RecordId) -> Result<()> {
        if self.cut_off_end.is_some() {
            return Err(Error::CutOffEnd(self.id));
        }
        if !self.next.contains(&id) {
            self.next.push(id);
        }
        Ok(())
    }

    /// Adds an upstream record.
    pub(crate) fn add_prev(&mut self, id: RecordId) -> Result<()> {
        if self.cut_off_start.is_some() {
            return Err(Error::CutOffStart(self.id));
        }
        if !self.prev.contains(&id) {
            self.prev.push(id);
        }
        Ok(())
    }

    pub(crate) fn set_cut_off_end(&mut self, cut_off: f64) -> Result<()> {
        if !self.next.is_empty() {
            return Err(Error::HasNextRecords(self.id));
        }
        self.cut_off_end = Some(cut_off);
        Ok(())
    }

    pub(crate) fn set_cut_off_start(&mut self, cut_off: f64) -> Result<()> {
        if !self.prev.is_empty() {
            return Err(Error::HasPrevRecords(self.id));
        }
        self.cut_off_start = Some(cut_off);
        Ok(())
    }

    pub(crate) fn clear_cut_off_end(&mut self) {
        self.cut_off_end = None;
    }

    pub(crate) fn clear_cut_off_start(&mut self) {
        self.cut_off_start = None;
    }
}

/// Links two records longitudinally, `up` directly upstream of `down`.
pub(crate) fn connect(records: &mut RecordSet, up: RecordId, down: RecordId) -> Result<()> {
    records[up].add_next(down)?;
    records[down].add_prev(up)
}

/// Removes all upstream records of a record, keeping the links symmetric.
pub(crate) fn clear_prev(records: &mut RecordSet, id: RecordId) {
    let prev = std::mem::take(&mut records[id].prev);
    for p in prev {
        if let Some(p) = records.get_mut(p) {
            p.next.retain(|n| *n != id);
        }
    }
}

/// Changes the record a record's start distance derives from.
pub(crate) fn change_source(
    records: &mut RecordSet,
    id: RecordId,
    source: Option<RecordId>,
    link: RecordLink,
) {
    let old = std::mem::replace(&mut records[id].source, source);
    records[id].source_link = link;
    if let Some(old) = old.and_then(|old| records.get_mut(old)) {
        old.dependents.retain(|d| *d != id);
    }
    if let Some(source) = source.and_then(|source| records.get_mut(source)) {
        if !source.dependents.contains(&id) {
            source.dependents.push(id);
        }
    }
}

/// Recalculates the start distance of a record and of all records that derive from it.
pub(crate) fn update_start_distance(records: &mut RecordSet, id: RecordId, fractional_position: f64) {
    let mut stack = vec![id];
    let mut visited = HashSet::new();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let record = match records.get(id) {
            Some(record) => record,
            None => continue,
        };
        let source = record
            .source
            .and_then(|s| records.get(s))
            .map(|s| (s.start_distance, s.length));
        let start = match (record.source_link, source) {
            (RecordLink::Cross, _) => {
                Some(RecordLink::Cross.start_distance(0.0, 0.0, record.length, fractional_position))
            }
            (link, Some((start, length))) => {
                Some(link.start_distance(start, length, record.length, fractional_position))
            }
            (_, None) => None,
        };
        let record = &mut records[id];
        match start {
            Some(start) => record.start_distance = start,
            None => log::warn!("record {:?} has no source, keeping its start distance", id),
        }
        stack.extend(record.dependents.iter().copied());
    }
}

/// Whether `id` derives its start distance, directly or indirectly, from `ancestor`.
fn derives_from(records: &RecordSet, id: RecordId, ancestor: RecordId) -> bool {
    let mut current = Some(id);
    let mut steps = 0;
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        steps += 1;
        if steps > records.len() {
            return true;
        }
        current = records.get(id).and_then(|r| r.source);
    }
    false
}

/// Removes a record from the set and from every record that mentions it.
///
/// Records whose start distance derived from the removed record are re-sourced on
/// a remaining longitudinal neighbour where possible.
pub(crate) fn detach(records: &mut RecordSet, id: RecordId) -> Option<Record> {
    let removed = records.remove(id)?;
    for (_, record) in records.iter_mut() {
        record.next.retain(|n| *n != id);
        record.prev.retain(|p| *p != id);
        record.dependents.retain(|d| *d != id);
        if record.left == Some(id) {
            record.left = None;
            record.legal_left = false;
        }
        if record.right == Some(id) {
            record.right = None;
            record.legal_right = false;
        }
    }
    for dependent in removed.dependents.iter().copied() {
        let record = match records.get(dependent) {
            Some(record) => record,
            None => continue,
        };
        let up = record.next.iter().map(|n| (*n, RecordLink::Up));
        let down = record.prev.iter().map(|p| (*p, RecordLink::Down));
        let candidate = up
            .chain(down)
            .find(|(candidate, _)| !derives_from(records, *candidate, dependent));
        match candidate {
            Some((source, link)) => change_source(records, dependent, Some(source), link),
            None => {
                records[dependent].source = None;
                if records[dependent].source_link != RecordLink::Cross {
                    log::warn!("record {:?} lost its start distance source", dependent);
                }
            }
        }
    }
    Some(removed)
}
