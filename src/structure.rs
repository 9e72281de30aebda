//! The lane structure of a vehicle: the lanes around it, positioned relative to the vehicle.

pub use self::objects::ObjectEntries;
pub use self::record::{Record, RecordLink};
use self::record::{RecordLane, RecordSet};
use crate::error::{Error, Result};
use crate::network::RoadNetwork;
use crate::relative_lane::{LateralDirection, RelativeLane};
use crate::route::Route;
use crate::util::History;
use crate::vehicle::{GtuType, LanePosition, VehiclePlan};
use crate::{LaneId, LinkId, RecordId};
use itertools::Itertools;
use std::collections::{BTreeMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod objects;
mod record;
mod route;

/// The distances that bound a lane structure.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneStructureAttributes {
    /// The distance within which lane objects are retrieved, in m.
    pub look_ahead: f64,
    /// The distance downstream of the vehicle to which lanes are included, in m.
    pub downstream: f64,
    /// The distance upstream of the vehicle to which lanes are included, in m.
    pub upstream: f64,
    /// The distance beyond a split onto a branch off the route to which lanes are included, in m.
    pub down_split: f64,
    /// The distance upstream of a merge from a branch off the route to which lanes are included, in m.
    pub up_merge: f64,
    /// The time span for which past roots are remembered, in s.
    pub history: f64,
}

impl Default for LaneStructureAttributes {
    fn default() -> Self {
        Self {
            look_ahead: 295.0,
            downstream: 300.0,
            upstream: 200.0,
            down_split: 50.0,
            up_merge: 50.0,
            history: 10.0,
        }
    }
}

/// The root of a lane structure as it was at some time.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RootSnapshot {
    /// The lane of the root record.
    pub lane: LaneId,
    /// The position of the vehicle on the lane, in m.
    pub position: f64,
    /// The start distance of the root record, in m.
    pub start_distance: f64,
    /// The length of the lane, in m.
    pub length: f64,
}

/// Everything an update needs to know about the network and the vehicle.
struct Ctx<'a> {
    network: &'a dyn RoadNetwork,
    plan: &'a dyn VehiclePlan,
    route: Option<&'a Route>,
    gtu_type: GtuType,
}

impl Ctx<'_> {
    fn record_lane(&self, lane: LaneId) -> RecordLane {
        let link = self.network.lane_link(lane);
        RecordLane {
            lane,
            link,
            nodes: self.network.link_nodes(link),
            length: self.network.lane_length(lane),
        }
    }

    fn link_of(&self, lane: LaneId) -> LinkId {
        self.network.lane_link(lane)
    }

    /// The single physically adjacent lane in a direction.
    fn single_adjacent(&self, lane: LaneId, direction: LateralDirection) -> Result<Option<LaneId>> {
        let lanes = self
            .network
            .adjacent_lanes_physical(lane, direction, self.gtu_type);
        match lanes.as_slice() {
            [] => Ok(None),
            [lane] => Ok(Some(*lane)),
            _ => Err(Error::MultipleAdjacentLanes {
                lane,
                direction,
                count: lanes.len(),
            }),
        }
    }

    fn physically_adjacent(&self, from: LaneId, direction: LateralDirection, to: LaneId) -> bool {
        self.network
            .adjacent_lanes_physical(from, direction, self.gtu_type)
            .contains(&to)
    }

    fn legally_adjacent(&self, from: LaneId, direction: LateralDirection, to: LaneId) -> bool {
        self.network
            .adjacent_lanes_legal(from, direction, self.gtu_type)
            .contains(&to)
    }

    /// Whether a lane's link is not travelled along the route.
    fn off_route(&self, route: &Route, lane: LaneId) -> bool {
        let (from, to) = self.network.lane_nodes(lane);
        !route.contains_link(from, to)
    }
}

/// The lanes around a vehicle within its view distances, as a graph of records.
///
/// The structure is updated as the vehicle moves. Records upstream of the vehicle are
/// dropped as they fall behind the upstream view distance, and records are added
/// downstream to maintain the downstream view distance.
#[derive(Clone, Debug)]
pub struct LaneStructure {
    /// The view distances.
    attributes: LaneStructureAttributes,
    /// The records in the structure.
    records: RecordSet,
    /// The record of the lane the vehicle is on.
    root: Option<RecordId>,
    /// The past roots.
    root_history: History<RootSnapshot>,
    /// The route of the last update.
    previous_route: Option<Route>,
    /// Whether the vehicle's plan was deviative at the last update.
    previously_deviative: bool,
    /// The fractional position of the vehicle on its lane.
    fractional_position: f64,
    /// The records alongside the vehicle.
    cross_section: BTreeMap<RelativeLane, RecordId>,
    /// The first record of each relative lane, possibly downstream of the cross-section.
    first_records: BTreeMap<RelativeLane, RecordId>,
    /// All records of each relative lane.
    relative_lane_map: BTreeMap<RelativeLane, Vec<RecordId>>,
    /// Lanes not to expand laterally onto.
    ignore: HashSet<LaneId>,
    /// The records at the upstream end of the structure.
    upstream_edge: Vec<RecordId>,
    /// The records at the downstream end of the structure.
    downstream_edge: Vec<RecordId>,
}

impl LaneStructure {
    /// Creates an empty lane structure. It is built on the first update.
    pub fn new(attributes: LaneStructureAttributes) -> Self {
        Self {
            attributes,
            records: RecordSet::with_key(),
            root: None,
            root_history: History::new(attributes.history),
            previous_route: None,
            previously_deviative: false,
            fractional_position: 0.0,
            cross_section: BTreeMap::new(),
            first_records: BTreeMap::new(),
            relative_lane_map: BTreeMap::new(),
            ignore: HashSet::new(),
            upstream_edge: vec![],
            downstream_edge: vec![],
        }
    }

    /// Gets the structure's attributes.
    pub fn attributes(&self) -> &LaneStructureAttributes {
        &self.attributes
    }

    /// Updates the structure to a new position of the vehicle.
    ///
    /// The structure is rebuilt on the first update, when the route changes, or when the
    /// vehicle's plan starts or stops deviating from the lane centre line.
    /// Otherwise it is shifted incrementally.
    pub fn update<N: RoadNetwork, P: VehiclePlan>(
        &mut self,
        network: &N,
        plan: &P,
        position: LanePosition,
        route: Option<&Route>,
        gtu_type: GtuType,
        time: f64,
    ) -> Result<()> {
        let ctx = Ctx {
            network,
            plan,
            route,
            gtu_type,
        };
        let result = self.update_inner(&ctx, position);
        if let Err(err) = &result {
            log::debug!("lane structure update failed: {}", err);
            self.clear();
            self.root = None;
            return result;
        }
        let snapshot = self.root_record().map(|root| RootSnapshot {
            lane: root.lane(),
            position: position.position,
            start_distance: root.start_distance(),
            length: root.length(),
        });
        if let Some(snapshot) = snapshot {
            self.root_history.set(time, snapshot);
        }
        #[cfg(feature = "debug")]
        crate::debug::debug_structure("lane_structure", self);
        result
    }

    fn update_inner(&mut self, ctx: &Ctx, position: LanePosition) -> Result<()> {
        self.fractional_position = position.position / ctx.network.lane_length(position.lane);
        let deviative = ctx.plan.is_deviative();
        let rebuild = self.root.is_none()
            || self.previous_route.as_ref() != ctx.route
            || deviative != self.previously_deviative;
        if rebuild {
            self.previous_route = ctx.route.cloned();
            self.rebuild(ctx, position.lane)?;
        } else {
            self.advance(position.lane)?;
        }
        self.previously_deviative = deviative;
        self.expand_downstream_edge(ctx)?;
        self.derive_first_records(ctx);
        Ok(())
    }

    /// Makes the next update rebuild the structure, as at the end of a lane change.
    pub fn notify_lane_change(&mut self) {
        self.previously_deviative = false;
    }

    /// Gets the record of the lane the vehicle is on.
    pub fn root_record(&self) -> Option<&Record> {
        self.root.and_then(|id| self.records.get(id))
    }

    /// Gets the root as it was at the given time.
    pub fn root_record_at(&self, time: f64) -> Option<&RootSnapshot> {
        self.root_history.get_at(time)
    }

    /// Gets a record.
    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    /// Iterates over all records in the structure.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// The number of records in the structure.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// The records alongside the vehicle, from left to right.
    pub fn cross_section(&self) -> impl Iterator<Item = (RelativeLane, &Record)> {
        self.cross_section
            .iter()
            .map(move |(lane, id)| (*lane, &self.records[*id]))
    }

    /// The relative lanes that have a first record, from left to right.
    /// This includes lanes that start downstream of the vehicle.
    pub fn extended_cross_section(&self) -> impl Iterator<Item = RelativeLane> + '_ {
        self.first_records.keys().copied()
    }

    /// All relative lanes that have records, from left to right.
    pub fn relative_lanes(&self) -> impl Iterator<Item = RelativeLane> + '_ {
        self.relative_lane_map.keys().copied()
    }

    /// All records on a relative lane.
    pub fn records_on(&self, lane: RelativeLane) -> &[RecordId] {
        self.relative_lane_map
            .get(&lane)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The first record of a relative lane at or downstream of the vehicle.
    pub fn first_record(&self, lane: RelativeLane) -> Option<&Record> {
        self.first_records
            .get(&lane)
            .and_then(|id| self.records.get(*id))
    }

    /// The records at the upstream end of the structure.
    pub fn upstream_edge(&self) -> &[RecordId] {
        &self.upstream_edge
    }

    /// The records at the downstream end of the structure.
    pub fn downstream_edge(&self) -> &[RecordId] {
        &self.downstream_edge
    }

    fn clear(&mut self) {
        self.records.clear();
        self.cross_section.clear();
        self.first_records.clear();
        self.relative_lane_map.clear();
        self.upstream_edge.clear();
        self.downstream_edge.clear();
    }

    /// Creates a record and registers it on its relative lane.
    fn construct(
        &mut self,
        ctx: &Ctx,
        lane: LaneId,
        source: Option<RecordId>,
        link: RecordLink,
        relative_lane: RelativeLane,
    ) -> RecordId {
        let lane = ctx.record_lane(lane);
        let id = self
            .records
            .insert_with_key(|id| Record::new(id, lane, relative_lane, None, link));
        record::change_source(&mut self.records, id, source, link);
        record::update_start_distance(&mut self.records, id, self.fractional_position);
        self.relative_lane_map
            .entry(relative_lane)
            .or_default()
            .push(id);
        log::trace!("new record {:?} on lane {:?} ({})", id, lane.lane, relative_lane);
        id
    }

    /// Removes a record from the structure.
    fn remove_record(&mut self, id: RecordId) {
        let removed = match record::detach(&mut self.records, id) {
            Some(removed) => removed,
            None => return,
        };
        let lane = removed.relative_lane();
        if let Some(ids) = self.relative_lane_map.get_mut(&lane) {
            ids.retain(|r| *r != id);
            if ids.is_empty() {
                self.relative_lane_map.remove(&lane);
            }
        }
        self.upstream_edge.retain(|r| *r != id);
        self.downstream_edge.retain(|r| *r != id);
        self.cross_section.retain(|_, r| *r != id);
        self.first_records.retain(|_, r| *r != id);
    }

    /// Sets a record's neighbour, with legality from the network.
    fn set_adjacent(&mut self, ctx: &Ctx, id: RecordId, direction: LateralDirection, other: RecordId) {
        let from = self.records[id].lane();
        let to = self.records[other].lane();
        let legal = ctx.legally_adjacent(from, direction, to);
        self.records[id].set_adjacent(direction, other, legal);
    }

    /// Builds the structure from scratch.
    fn rebuild(&mut self, ctx: &Ctx, lane: LaneId) -> Result<()> {
        log::debug!("building lane structure on lane {:?}", lane);
        self.clear();
        let root = self.construct(ctx, lane, None, RecordLink::Cross, RelativeLane::CURRENT);
        self.root = Some(root);
        self.cross_section.insert(RelativeLane::CURRENT, root);

        for direction in LateralDirection::BOTH {
            let mut current = root;
            let mut relative_lane = RelativeLane::CURRENT;
            let mut adjacent = ctx.single_adjacent(lane, direction)?;
            while let Some(adjacent_lane) = adjacent {
                let known = self
                    .cross_section
                    .values()
                    .any(|id| self.records[*id].lane() == adjacent_lane);
                if known {
                    break;
                }
                relative_lane = relative_lane.step(direction);
                let record =
                    self.construct(ctx, adjacent_lane, Some(current), RecordLink::Cross, relative_lane);
                self.cross_section.insert(relative_lane, record);
                let current_lane = self.records[current].lane();
                if ctx.physically_adjacent(adjacent_lane, direction.flip(), current_lane) {
                    self.set_adjacent(ctx, record, direction.flip(), current);
                }
                self.set_adjacent(ctx, current, direction, record);
                current = record;
                adjacent = ctx.single_adjacent(adjacent_lane, direction)?;
            }
        }

        self.upstream_edge = self.cross_section.values().copied().collect();
        self.downstream_edge = self.upstream_edge.clone();
        record::update_start_distance(&mut self.records, root, self.fractional_position);
        self.expand_upstream_edge(ctx)
    }

    /// Moves the structure along with the vehicle.
    fn advance(&mut self, lane: LaneId) -> Result<()> {
        let mut root = self.root.ok_or(Error::RootNotFound(lane))?;
        if self.records[root].lane() != lane {
            let (new_root, lateral_move) = self.find_root(lane)?;
            log::debug!(
                "moving root from lane {:?} to lane {:?} ({})",
                self.records[root].lane(),
                lane,
                lateral_move
            );
            root = new_root;
            self.root = Some(root);
            self.update_start_distance_sources(root);
            if !lateral_move.is_current() {
                self.shift_relative_lanes(lateral_move.inverse());
            }
            self.rebuild_cross_section(root);
        }
        record::update_start_distance(&mut self.records, root, self.fractional_position);
        self.retreat_upstream_edge()
    }

    /// Finds the record on a lane that contains the vehicle, preferring relative lanes near the
    /// current lane and, within one relative lane, the smallest start distance.
    fn find_root(&self, lane: LaneId) -> Result<(RecordId, RelativeLane)> {
        let relative_lanes = self
            .relative_lane_map
            .keys()
            .copied()
            .sorted_by_key(|r| (r.num_lanes(), r.rank()));
        for relative_lane in relative_lanes {
            let found = self.relative_lane_map[&relative_lane]
                .iter()
                .map(|id| &self.records[*id])
                .filter(|r| r.lane() == lane && r.start_distance() + r.length() > 0.0)
                .min_by(|a, b| a.start_distance().total_cmp(&b.start_distance()));
            if let Some(record) = found {
                return Ok((record.id(), relative_lane));
            }
        }
        Err(Error::RootNotFound(lane))
    }

    /// Re-derives the start distance source of every record from a new root, pruning
    /// branches the vehicle did not take.
    fn update_start_distance_sources(&mut self, root: RecordId) {
        let mut visited = HashSet::new();
        let mut set = vec![root];
        visited.insert(root);
        record::change_source(&mut self.records, root, None, RecordLink::Cross);
        for direction in LateralDirection::BOTH {
            let mut prev = root;
            while let Some(next) = self.records[prev].adjacent(direction) {
                if !visited.insert(next) {
                    break;
                }
                record::change_source(&mut self.records, next, Some(prev), RecordLink::Cross);
                set.push(next);
                prev = next;
            }
        }

        while !set.is_empty() {
            // Lateral
            let mut new_set = vec![];
            for id in set.iter().copied() {
                for direction in LateralDirection::BOTH {
                    let mut prev = id;
                    let mut next = self.records.get(id).and_then(|r| r.adjacent(direction));
                    while let Some(lateral) = next {
                        if !visited.insert(lateral) {
                            break;
                        }
                        record::change_source(
                            &mut self.records,
                            lateral,
                            Some(prev),
                            RecordLink::LateralEnd,
                        );
                        self.remove_downstream(lateral, direction.flip(), &visited);
                        new_set.push(lateral);
                        prev = lateral;
                        next = self.records.get(lateral).and_then(|r| r.adjacent(direction));
                    }
                }
            }
            set.extend(new_set);

            // Longitudinal
            let mut new_set = vec![];
            for id in set.iter().copied() {
                let (link, prevs) = match self.records.get(id) {
                    Some(record) => (record.link(), record.prev().to_vec()),
                    None => continue,
                };
                for prev in prevs {
                    if !self.records.contains_key(prev) {
                        continue;
                    }
                    let others: Vec<_> = self.records[prev]
                        .next()
                        .iter()
                        .copied()
                        .filter(|n| !visited.contains(n) && self.records[*n].link() != link)
                        .collect();
                    for other in others {
                        // A split the vehicle did not take
                        self.remove_downstream(other, LateralDirection::None, &visited);
                        self.remove_record(other);
                    }
                    if self.records[prev].source() != Some(id) && visited.insert(prev) {
                        record::change_source(&mut self.records, prev, Some(id), RecordLink::Up);
                        new_set.push(prev);
                    }
                }
            }
            set = new_set;
        }
    }

    /// Removes the records downstream of a record that have no neighbour in the given direction.
    fn remove_downstream(&mut self, id: RecordId, direction: LateralDirection, keep: &HashSet<RecordId>) {
        let nexts = match self.records.get(id) {
            Some(record) => record.next().to_vec(),
            None => return,
        };
        for next in nexts {
            let record = match self.records.get(next) {
                Some(record) => record,
                None => continue,
            };
            let only_from_here = record.prev().iter().all(|p| *p == id);
            if keep.contains(&next) || !only_from_here || record.adjacent(direction).is_some() {
                continue;
            }
            self.remove_downstream(next, direction, keep);
            self.remove_record(next);
        }
    }

    /// Renumbers the relative lane of every record.
    fn shift_relative_lanes(&mut self, delta: RelativeLane) {
        let map = std::mem::take(&mut self.relative_lane_map);
        for (lane, ids) in map {
            for id in ids.iter() {
                self.records[*id].set_relative_lane(lane.add(delta));
            }
            self.relative_lane_map.insert(lane.add(delta), ids);
        }
    }

    /// Rebuilds the cross-section around the root.
    fn rebuild_cross_section(&mut self, root: RecordId) {
        self.cross_section.clear();
        self.cross_section.insert(RelativeLane::CURRENT, root);
        for direction in LateralDirection::BOTH {
            let mut current = root;
            let mut relative_lane = RelativeLane::CURRENT;
            while let Some(next) = self.records[current].adjacent(direction) {
                if self.cross_section.values().any(|id| *id == next) {
                    break;
                }
                record::change_source(&mut self.records, next, Some(current), RecordLink::Cross);
                relative_lane = relative_lane.step(direction);
                self.cross_section.insert(relative_lane, next);
                current = next;
            }
        }
    }

    /// Expands the structure upstream until the upstream view distance is covered.
    fn expand_upstream_edge(&mut self, ctx: &Ctx) -> Result<()> {
        self.ignore.clear();
        for id in self.upstream_edge.iter() {
            self.ignore.insert(self.records[*id].lane());
        }
        let bound = -self.attributes.upstream;
        let mut expand = true;
        while expand {
            expand = false;

            // Longitudinal
            let mut modified_edge = self.upstream_edge.clone();
            let mut next_set = vec![];
            for id in self.upstream_edge.clone() {
                let (lane, start, relative_lane) = {
                    let record = &self.records[id];
                    (record.lane(), record.start_distance(), record.relative_lane())
                };
                let prev_lanes = ctx.network.prev_lanes(lane, ctx.gtu_type);
                if !self.records[id].prev().is_empty() {
                    // Already connected upstream by a lateral expansion
                    remove_from(&mut self.upstream_edge, id);
                } else if start < bound {
                    self.records[id].set_cut_off_start(bound - start)?;
                    self.ignore.extend(prev_lanes);
                } else if prev_lanes.is_empty() {
                    // Stays on the edge until it falls behind and is dropped
                    self.records[id].clear_cut_off_start();
                } else {
                    self.records[id].clear_cut_off_start();
                    remove_from(&mut self.upstream_edge, id);
                    for prev_lane in prev_lanes {
                        let prev =
                            self.construct(ctx, prev_lane, Some(id), RecordLink::Up, relative_lane);
                        self.ignore.insert(prev_lane);
                        self.connect_laterally(ctx, prev, &modified_edge);
                        record::connect(&mut self.records, prev, id)?;
                        next_set.push(prev);
                        modified_edge.push(prev);
                    }
                }
            }
            expand |= !next_set.is_empty();
            for id in next_set {
                insert_into(&mut self.upstream_edge, id);
            }

            // Lateral
            let edge = self.upstream_edge.clone();
            let lateral = self.expand_lateral(ctx, &edge, RecordLink::LateralEnd)?;
            expand |= !lateral.is_empty();
            for id in lateral {
                insert_into(&mut self.upstream_edge, id);
            }
        }
        Ok(())
    }

    /// Drops records that fell behind the upstream view distance.
    fn retreat_upstream_edge(&mut self) -> Result<()> {
        let bound = -self.attributes.upstream;
        let mut moved = true;
        while moved {
            moved = false;
            let mut nexts: Vec<RecordId> = vec![];
            for id in self.upstream_edge.clone() {
                let (start, length) = match self.records.get(id) {
                    Some(record) => (record.start_distance(), record.length()),
                    None => continue,
                };
                if !nexts.contains(&id) && start + length < bound {
                    let downstream = self.records[id].next().to_vec();
                    for next in downstream {
                        record::clear_prev(&mut self.records, next);
                        let cut_off = bound - self.records[next].start_distance();
                        self.records[next].set_cut_off_start(cut_off)?;
                        moved = true;
                        insert_into(&mut nexts, next);
                        for direction in LateralDirection::BOTH {
                            let mut lateral = self.records[next].adjacent(direction);
                            while let Some(lat) = lateral {
                                if !self.records[lat].prev().is_empty() || nexts.contains(&lat) {
                                    break;
                                }
                                nexts.push(lat);
                                lateral = self.records[lat].adjacent(direction);
                            }
                        }
                    }
                    self.remove_upstream(id);
                } else {
                    let cut_off = bound - start;
                    if cut_off > 0.0 && self.records[id].prev().is_empty() {
                        self.records[id].set_cut_off_start(cut_off)?;
                    }
                }
            }
            for id in nexts.iter() {
                insert_into(&mut self.upstream_edge, *id);
            }

            // Check lanes alongside the new edge
            for id in nexts {
                for direction in LateralDirection::BOTH {
                    let mut current = Some(id);
                    while let Some(record) = current {
                        let next = self.records.get(record).and_then(|r| r.adjacent(direction));
                        if let Some(next) = next {
                            if !self.upstream_edge.contains(&next) {
                                moved |= self.find_upstream_edge(next)?;
                            }
                        }
                        current = next.filter(|n| self.records.contains_key(*n));
                    }
                }
            }
        }
        Ok(())
    }

    /// Finds the new upstream edge downstream of a record alongside the edge.
    fn find_upstream_edge(&mut self, id: RecordId) -> Result<bool> {
        let bound = -self.attributes.upstream;
        let (start, length) = match self.records.get(id) {
            Some(record) => (record.start_distance(), record.length()),
            None => return Ok(false),
        };
        let cut_off = bound - start;
        if cut_off <= 0.0 {
            return Ok(false);
        }
        if cut_off < length {
            for prev in self.records[id].prev().to_vec() {
                self.remove_upstream(prev);
            }
            record::clear_prev(&mut self.records, id);
            self.records[id].set_cut_off_start(cut_off)?;
            insert_into(&mut self.upstream_edge, id);
            Ok(true)
        } else {
            let nexts = self.records[id].next().to_vec();
            self.remove_upstream(id);
            let mut moved = false;
            for next in nexts {
                moved |= self.find_upstream_edge(next)?;
            }
            Ok(moved)
        }
    }

    /// Removes a record and every record upstream of it that lies entirely behind
    /// the upstream view distance.
    fn remove_upstream(&mut self, id: RecordId) {
        let bound = -self.attributes.upstream;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let record = match self.records.get(id) {
                Some(record) => record,
                None => continue,
            };
            stack.extend(record.prev().iter().copied().filter(|p| {
                let prev = &self.records[*p];
                prev.start_distance() + prev.length() <= bound
            }));
            self.remove_record(id);
        }
    }

    /// Expands the structure downstream until the downstream view distance is covered.
    fn expand_downstream_edge(&mut self, ctx: &Ctx) -> Result<()> {
        self.ignore.clear();
        for id in self.downstream_edge.iter() {
            self.ignore.insert(self.records[*id].lane());
        }
        let down = self.attributes.downstream;
        let mut expand = true;
        while expand {
            expand = false;

            // Expand all lanes of a link if any of them ends within the view distance
            let links_to_expand: HashSet<LinkId> = self
                .downstream_edge
                .iter()
                .map(|id| &self.records[*id])
                .filter(|r| r.start_distance() + r.length() < down)
                .map(|r| r.link())
                .collect();

            let mut modified_edge = self.downstream_edge.clone();
            let mut next_set = vec![];
            let mut split_set = vec![];
            for id in self.downstream_edge.clone() {
                let (lane, link, start, relative_lane) = {
                    let record = &self.records[id];
                    let lane = record.lane();
                    (lane, record.link(), record.start_distance(), record.relative_lane())
                };
                let next_lanes = ctx.network.next_lanes(lane, ctx.gtu_type);
                if !self.records[id].next().is_empty() {
                    // Already connected downstream by a lateral expansion
                    remove_from(&mut self.downstream_edge, id);
                    continue;
                }
                if !links_to_expand.contains(&link) {
                    self.records[id].set_cut_off_end(down - start)?;
                    self.ignore.extend(next_lanes);
                    continue;
                }

                // Only the chosen lane is followed onto the link after a lane split
                let lane_for_split = ctx.plan.next_lane_for_route(lane);
                self.records[id].clear_cut_off_end();
                remove_from(&mut self.downstream_edge, id);
                for next_lane in next_lanes {
                    if let Some(split) = lane_for_split {
                        if next_lane != split && ctx.link_of(next_lane) == ctx.link_of(split) {
                            continue;
                        }
                    }
                    let next =
                        self.construct(ctx, next_lane, Some(id), RecordLink::Down, relative_lane);
                    self.ignore.insert(next_lane);
                    record::connect(&mut self.records, id, next)?;
                    self.connect_laterally(ctx, next, &modified_edge);
                    let on_route = match ctx.route {
                        Some(route) => {
                            let record = &self.records[next];
                            route.continues_on(record.from_node(), record.to_node())
                        }
                        None => true,
                    };
                    if on_route {
                        next_set.push(next);
                    } else {
                        split_set.push(next);
                    }
                    modified_edge.push(next);
                    // Other lanes may merge into this one
                    self.expand_upstream_merge(ctx, &[next])?;
                }
            }
            expand |= !next_set.is_empty();
            for id in next_set {
                insert_into(&mut self.downstream_edge, id);
            }

            self.expand_downstream_split(ctx, &split_set)?;

            // Lateral
            let edge = self.downstream_edge.clone();
            let lateral = self.expand_lateral(ctx, &edge, RecordLink::LateralStart)?;
            self.expand_upstream_merge(ctx, &lateral)?;
            expand |= !lateral.is_empty();
            for id in lateral {
                insert_into(&mut self.downstream_edge, id);
            }
        }
        Ok(())
    }

    /// Explores branches off the route for a limited distance past the split.
    fn expand_downstream_split(&mut self, ctx: &Ctx, set: &[RecordId]) -> Result<()> {
        let route = match ctx.route {
            Some(route) => route,
            None => return Ok(()),
        };
        let mut prevs: Vec<(RecordId, f64)> = set
            .iter()
            .map(|id| (*id, self.records[*id].start_distance() + self.attributes.down_split))
            .collect();
        while !prevs.is_empty() {
            let mut nexts: Vec<(RecordId, f64)> = vec![];
            for (prev, down_here) in prevs {
                let (lane, start, length, relative_lane) = match self.records.get(prev) {
                    Some(r) => (r.lane(), r.start_distance(), r.length(), r.relative_lane()),
                    None => continue,
                };
                let all_lanes = ctx.network.next_lanes(lane, ctx.gtu_type);
                let lanes: Vec<_> = all_lanes
                    .iter()
                    .copied()
                    .filter(|l| ctx.off_route(route, *l))
                    .filter(|l| {
                        !self.records[prev]
                            .next()
                            .iter()
                            .any(|n| self.records[*n].lane() == *l)
                    })
                    .collect();
                if start + length >= down_here || lanes.is_empty() {
                    if self.records[prev].next().is_empty() && !all_lanes.is_empty() {
                        let cut_off = (down_here - start).min(length);
                        self.records[prev].set_cut_off_end(cut_off)?;
                    }
                    continue;
                }
                for next_lane in lanes {
                    let next =
                        self.construct(ctx, next_lane, Some(prev), RecordLink::Down, relative_lane);
                    record::connect(&mut self.records, prev, next)?;
                    let others: Vec<_> = nexts.iter().map(|(id, _)| *id).collect();
                    self.connect_laterally(ctx, next, &others);
                    nexts.push((next, down_here));
                }
            }
            prevs = nexts;
        }
        Ok(())
    }

    /// Explores lanes off the route merging into records for a limited distance upstream.
    fn expand_upstream_merge(&mut self, ctx: &Ctx, set: &[RecordId]) -> Result<()> {
        let route = match ctx.route {
            Some(route) => route,
            None => return Ok(()),
        };
        let mut prevs: Vec<(RecordId, f64)> = set
            .iter()
            .map(|id| (*id, self.records[*id].start_distance() - self.attributes.up_merge))
            .collect();
        while !prevs.is_empty() {
            let mut nexts: Vec<(RecordId, f64)> = vec![];
            for (record, up_here) in prevs {
                let (lane, relative_lane) = match self.records.get(record) {
                    Some(r) => (r.lane(), r.relative_lane()),
                    None => continue,
                };
                let mut any_added = false;
                for prev_lane in ctx.network.prev_lanes(lane, ctx.gtu_type) {
                    let connected = self.records[record]
                        .prev()
                        .iter()
                        .any(|p| self.records[*p].lane() == prev_lane);
                    if connected || !ctx.off_route(route, prev_lane) {
                        continue;
                    }
                    any_added = true;
                    let prev =
                        self.construct(ctx, prev_lane, Some(record), RecordLink::Up, relative_lane);
                    record::connect(&mut self.records, prev, record)?;
                    let others: Vec<_> = nexts.iter().map(|(id, _)| *id).collect();
                    self.connect_laterally(ctx, prev, &others);
                    let start = self.records[prev].start_distance();
                    if start < up_here {
                        self.records[prev].set_cut_off_start(up_here - start)?;
                        insert_into(&mut self.upstream_edge, prev);
                    } else {
                        nexts.push((prev, up_here));
                    }
                }
                if !any_added && !set.contains(&record) {
                    insert_into(&mut self.upstream_edge, record);
                }
            }
            prevs = nexts;
        }
        Ok(())
    }

    /// Adds the lanes alongside the edge that are not yet in the structure.
    fn expand_lateral(
        &mut self,
        ctx: &Ctx,
        edge: &[RecordId],
        link: RecordLink,
    ) -> Result<Vec<RecordId>> {
        let mut next_set = vec![];
        let mut lanes: HashSet<LaneId> = edge.iter().map(|id| self.records[*id].lane()).collect();
        for id in edge.iter().copied() {
            for direction in LateralDirection::BOTH {
                if self.records[id].adjacent(direction).is_some() {
                    continue;
                }
                let mut relative_lane = self.records[id].relative_lane();
                let mut prev = id;
                let mut adjacent = ctx.single_adjacent(self.records[id].lane(), direction)?;
                while let Some(lane) = adjacent {
                    relative_lane = relative_lane.step(direction);
                    if lanes.contains(&lane) || self.ignore.contains(&lane) {
                        break;
                    }
                    let next = self.construct(ctx, lane, Some(prev), link, relative_lane);
                    self.ignore.insert(lane);
                    lanes.insert(lane);
                    next_set.push(next);

                    self.set_adjacent(ctx, prev, direction, next);
                    let prev_lane = self.records[prev].lane();
                    if ctx.physically_adjacent(lane, direction.flip(), prev_lane) {
                        self.set_adjacent(ctx, next, direction.flip(), prev);
                    }
                    let link_id = self.records[next].link();
                    for other in edge.iter().copied() {
                        if other == prev || self.records[other].link() != link_id {
                            continue;
                        }
                        let other_lane = self.records[other].lane();
                        if ctx.physically_adjacent(other_lane, direction.flip(), lane) {
                            self.set_adjacent(ctx, other, direction.flip(), next);
                            self.set_adjacent(ctx, next, direction, other);
                        }
                    }
                    self.connect_owed(ctx, next)?;

                    prev = next;
                    adjacent = ctx.single_adjacent(lane, direction)?;
                }
            }
        }
        Ok(next_set)
    }

    /// Connects a new lateral record longitudinally to the records its neighbours
    /// merge from or split into.
    fn connect_owed(&mut self, ctx: &Ctx, id: RecordId) -> Result<()> {
        let this = &self.records[id];
        let lane = this.lane();
        let mut neighbours = vec![];
        neighbours.extend(this.left());
        neighbours.extend(this.right().filter(|r| Some(*r) != this.left()));
        let prev_lanes = ctx.network.prev_lanes(lane, ctx.gtu_type);
        let next_lanes = ctx.network.next_lanes(lane, ctx.gtu_type);
        for neighbour in neighbours {
            let adjacent_prevs: Vec<_> = self.records[neighbour]
                .prev()
                .iter()
                .copied()
                .filter(|p| prev_lanes.contains(&self.records[*p].lane()))
                .collect();
            for prev in adjacent_prevs {
                record::connect(&mut self.records, prev, id)?;
            }
            let adjacent_nexts: Vec<_> = self.records[neighbour]
                .next()
                .iter()
                .copied()
                .filter(|n| next_lanes.contains(&self.records[*n].lane()))
                .collect();
            for next in adjacent_nexts {
                record::connect(&mut self.records, id, next)?;
            }
        }
        Ok(())
    }

    /// Links a record laterally to any of the given records that are its physical neighbours.
    fn connect_laterally(&mut self, ctx: &Ctx, id: RecordId, others: &[RecordId]) {
        let lane = self.records[id].lane();
        for other in others.iter().copied() {
            if other == id || !self.records.contains_key(other) {
                continue;
            }
            for direction in LateralDirection::BOTH {
                if self.records[other].adjacent(direction).is_some() {
                    continue;
                }
                let other_lane = self.records[other].lane();
                if ctx.physically_adjacent(other_lane, direction, lane) {
                    self.set_adjacent(ctx, other, direction, id);
                    self.set_adjacent(ctx, id, direction.flip(), other);
                }
            }
        }
    }

    /// Caches the first record of every relative lane.
    fn derive_first_records(&mut self, ctx: &Ctx) {
        self.first_records = self.cross_section.clone();
        let lanes: Vec<_> = self.relative_lane_map.keys().copied().collect();
        for lane in lanes {
            if self.first_records.contains_key(&lane) {
                continue;
            }
            if let Some(id) = self.find_first_record(ctx, lane) {
                self.first_records.insert(lane, id);
            }
        }
    }

    /// Finds the first record of a relative lane outside the cross-section, by moving
    /// downstream from the cross-section until the lane is alongside, then moving back
    /// upstream to the vehicle.
    fn find_first_record(&self, ctx: &Ctx, target: RelativeLane) -> Option<RecordId> {
        let direction = target.lateral_direction();
        let (mut relative_lane, mut id) = self
            .cross_section
            .iter()
            .filter(|(r, _)| r.lateral_direction() == direction && r.num_lanes() <= target.num_lanes())
            .max_by_key(|(r, _)| r.num_lanes())
            .or_else(|| self.cross_section.get_key_value(&RelativeLane::CURRENT))
            .map(|(r, id)| (*r, *id))?;

        let mut steps = 0;
        while relative_lane.num_lanes() < target.num_lanes() {
            steps += 1;
            if steps > self.records.len() {
                return None;
            }
            let record = &self.records[id];
            if let Some(adjacent) = record.adjacent(direction) {
                relative_lane = relative_lane.step(direction);
                id = adjacent;
            } else if !record.next().is_empty() {
                let chosen = ctx.plan.next_lane_for_route(record.lane()).and_then(|lane| {
                    record
                        .next()
                        .iter()
                        .copied()
                        .find(|n| self.records[*n].lane() == lane)
                });
                let single = match record.next() {
                    [next] => Some(*next),
                    _ => None,
                };
                id = chosen.or(single)?;
            } else {
                // Dead end
                return None;
            }
        }

        // Move back upstream to the vehicle
        for _ in 0..self.records.len() {
            let record = &self.records[id];
            match record.prev() {
                [prev] if record.start_distance() > 0.0 => id = *prev,
                _ => break,
            }
        }
        Some(id)
    }
}

/// Adds an id to a list unless it is already present.
fn insert_into(list: &mut Vec<RecordId>, id: RecordId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

fn remove_from(list: &mut Vec<RecordId>, id: RecordId) {
    list.retain(|r| *r != id);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::{LaneAttributes, Network};
    use crate::vehicle::RoutePlan;
    use crate::NodeId;
    use assert_approx_eq::assert_approx_eq;

    /// Adds a link with lanes of equal length, listed from left to right.
    fn add_link(net: &mut Network, from: NodeId, to: NodeId, length: f64, lanes: usize) -> Vec<LaneId> {
        let link = net.add_link(from, to);
        let ids: Vec<_> = (0..lanes)
            .map(|_| {
                net.add_lane(&LaneAttributes {
                    link,
                    length,
                    allowed: &[],
                })
            })
            .collect();
        for pair in ids.windows(2) {
            net.set_adjacent(pair[0], pair[1]);
        }
        ids
    }

    fn update(structure: &mut LaneStructure, net: &Network, lane: LaneId, pos: f64) -> Result<()> {
        let plan = RoutePlan::new(net, None, GtuType::CAR);
        structure.update(net, &plan, LanePosition::new(lane, pos), None, GtuType::CAR, 0.0)
    }

    #[test]
    fn incremental_update_shifts_dependents() {
        let mut net = Network::new();
        let nodes: Vec<_> = (0..4).map(|_| net.add_node()).collect();
        let a = add_link(&mut net, nodes[0], nodes[1], 200.0, 2);
        let b = add_link(&mut net, nodes[1], nodes[2], 200.0, 2);
        let c = add_link(&mut net, nodes[2], nodes[3], 200.0, 2);
        for i in 0..2 {
            net.connect_lanes(a[i], b[i]);
            net.connect_lanes(b[i], c[i]);
        }

        let mut structure = LaneStructure::new(Default::default());
        update(&mut structure, &net, b[0], 60.0).unwrap();
        assert_approx_eq!(structure.root_record().unwrap().start_distance(), -60.0);
        let before: Vec<_> = structure
            .records()
            .map(|r| (r.id(), r.start_distance()))
            .collect();

        update(&mut structure, &net, b[0], 70.0).unwrap();
        assert_approx_eq!(structure.root_record().unwrap().start_distance(), -70.0);
        for (id, start) in before {
            let record = structure.record(id).unwrap();
            assert_approx_eq!(record.start_distance(), start - 10.0);
        }
    }

    #[test]
    fn cross_section_and_neighbours() {
        let mut net = Network::new();
        let from = net.add_node();
        let to = net.add_node();
        let lanes = add_link(&mut net, from, to, 100.0, 3);

        let mut structure = LaneStructure::new(Default::default());
        update(&mut structure, &net, lanes[1], 50.0).unwrap();

        let cross_section: Vec<_> = structure
            .cross_section()
            .map(|(rel, record)| (rel, record.lane()))
            .collect();
        assert_eq!(
            cross_section,
            [
                (RelativeLane::LEFT, lanes[0]),
                (RelativeLane::CURRENT, lanes[1]),
                (RelativeLane::RIGHT, lanes[2]),
            ]
        );
        let root = structure.root_record().unwrap();
        assert!(root.legal_left() && root.legal_right());
        let left = structure.first_record(RelativeLane::LEFT).unwrap();
        assert_eq!(left.right(), Some(root.id()));
        assert!(left.left().is_none());
        assert!(root.is_dead_end());
        assert_eq!(structure.extended_cross_section().count(), 3);
    }

    #[test]
    fn upstream_edge_is_cut_off() {
        let mut net = Network::new();
        let nodes: Vec<_> = (0..5).map(|_| net.add_node()).collect();
        let lanes: Vec<_> = (0..4)
            .map(|i| add_link(&mut net, nodes[i], nodes[i + 1], 100.0, 1)[0])
            .collect();
        for pair in lanes.windows(2) {
            net.connect_lanes(pair[0], pair[1]);
        }

        let attributes = LaneStructureAttributes {
            upstream: 150.0,
            ..Default::default()
        };
        let mut structure = LaneStructure::new(attributes);
        update(&mut structure, &net, lanes[3], 20.0).unwrap();
        // Lanes start at -20, -120 and -220, the last one is cut off
        assert_eq!(structure.record_count(), 3);
        let edge = structure.upstream_edge();
        assert_eq!(edge.len(), 1);
        let record = structure.record(edge[0]).unwrap();
        assert_eq!(record.lane(), lanes[1]);
        assert_approx_eq!(record.start_distance(), -220.0);
        assert_approx_eq!(record.cut_off_start().unwrap(), 70.0);
        assert!(!record.is_downstream_branch());

        // Moving further along the same lane drops the record that fell behind
        update(&mut structure, &net, lanes[3], 95.0).unwrap();
        assert_eq!(structure.record_count(), 2);
        let edge = structure.upstream_edge();
        let record = structure.record(edge[0]).unwrap();
        assert_eq!(record.lane(), lanes[2]);
        assert!(record.is_cut_off_start());
    }

    #[test]
    fn multiple_adjacent_lanes_are_fatal() {
        let mut net = Network::new();
        let from = net.add_node();
        let to = net.add_node();
        let lanes = add_link(&mut net, from, to, 100.0, 2);
        let link = net.lane_link(lanes[0]);
        let extra = net.add_lane(&LaneAttributes {
            link,
            length: 100.0,
            allowed: &[],
        });
        net.set_adjacent(lanes[0], extra);

        let mut structure = LaneStructure::new(Default::default());
        let err = update(&mut structure, &net, lanes[0], 10.0).unwrap_err();
        assert!(err.is_fatal());
        assert!(structure.root_record().is_none());
    }
}
