use super::LaneStructure;
use crate::error::{Error, Result};
use crate::network::RoadNetwork;
use crate::route::Route;
use crate::{NodeId, RecordId};
use std::collections::HashSet;

impl LaneStructure {
    /// Whether the route can be followed from a record, considering where lane changes are legal.
    ///
    /// Records beyond the structure's downstream edge are assumed to allow the route.
    pub fn allows_route<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        record: RecordId,
        route: Option<&Route>,
    ) -> Result<bool> {
        self.allows_route_inner(network, record, route, false)
    }

    /// Whether the route can be followed from the end of a record.
    pub fn allows_route_at_end<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        record: RecordId,
        route: Option<&Route>,
    ) -> Result<bool> {
        self.allows_route_inner(network, record, route, true)
    }

    fn allows_route_inner<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        record: RecordId,
        route: Option<&Route>,
        end: bool,
    ) -> Result<bool> {
        let route = match route {
            Some(route) => route,
            None => return Ok(true),
        };
        let destination = route.destination().ok_or(Error::NoDestination)?;
        let start = match self.record(record) {
            Some(start) => start,
            None => return Ok(false),
        };
        if !route.contains_link(start.from_node(), start.to_node()) {
            return self.leads_to_route(network, record, route, None);
        }

        // The link is on the route, but lane markings may prevent following it
        let mut current = vec![record];
        let mut first_loop = true;
        while !current.is_empty() {
            let mut all_cut_off = false;
            if !first_loop || end {
                all_cut_off = true;
                let mut next_set = vec![];
                for id in current.iter() {
                    let record = &self.records[*id];
                    all_cut_off &= record.is_cut_off_end();
                    if record.to_node() == destination {
                        return Ok(true);
                    }
                    let to = index_of(route, record.to_node());
                    for next in record.next().iter().copied() {
                        let next_record = &self.records[next];
                        if next_record.to_node() == destination {
                            return Ok(true);
                        }
                        if index_of(route, next_record.to_node()) == to + 1 && !next_set.contains(&next) {
                            next_set.push(next);
                        }
                    }
                }
                current = next_set;
            }
            first_loop = false;

            // Move laterally where permitted
            let mut next_set = current.clone();
            for id in current.iter() {
                let mut record = &self.records[*id];
                while let Some(left) = record.left().filter(|l| record.legal_left() && !next_set.contains(l)) {
                    next_set.push(left);
                    record = &self.records[left];
                }
            }
            for id in current.iter() {
                let mut record = &self.records[*id];
                while let Some(right) = record.right().filter(|r| record.legal_right() && !next_set.contains(r)) {
                    next_set.push(right);
                    record = &self.records[right];
                }
            }
            let first = match next_set.first() {
                Some(first) => *first,
                // The end of the structure was reached before the route could be confirmed
                None => return Ok(all_cut_off),
            };
            // All lanes of the link are reachable, so anything is possible from here
            let lanes_on_link = network.link_lane_count(self.records[first].link());
            if next_set.len() == lanes_on_link {
                return Ok(true);
            }
            current = next_set;
        }
        Ok(false)
    }

    /// Whether the records downstream of a record reach a record that allows the route.
    fn leads_to_route<N: RoadNetwork + ?Sized>(
        &self,
        network: &N,
        record: RecordId,
        route: &Route,
        original: Option<RecordId>,
    ) -> Result<bool> {
        if original == Some(record) {
            return Ok(false);
        }
        if original.is_some() && self.allows_route(network, record, Some(route))? {
            return Ok(true);
        }
        let nexts = match self.record(record) {
            Some(record) => record.next(),
            None => return Ok(false),
        };
        for next in nexts.iter().copied() {
            if self.leads_to_route(network, next, route, original.or(Some(record)))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the lanes alongside a record continue onto more than one link.
    pub fn is_link_split(&self, record: RecordId) -> bool {
        match self.record(record) {
            Some(r) if !r.is_cut_off_end() => {
                let nodes = self.across(record, |r| {
                    r.next()
                        .iter()
                        .map(|n| self.records[*n].to_node())
                        .collect::<Vec<_>>()
                });
                nodes.len() > 1
            }
            _ => false,
        }
    }

    /// Whether the lanes alongside a record are reached from more than one link.
    pub fn is_link_merge(&self, record: RecordId) -> bool {
        match self.record(record) {
            Some(r) if !r.is_cut_off_start() => {
                let nodes = self.across(record, |r| {
                    r.prev()
                        .iter()
                        .map(|p| self.records[*p].from_node())
                        .collect::<Vec<_>>()
                });
                nodes.len() > 1
            }
            _ => false,
        }
    }

    /// Collects nodes from a record and all records laterally alongside it.
    fn across<F>(&self, record: RecordId, nodes: F) -> HashSet<NodeId>
    where
        F: Fn(&super::Record) -> Vec<NodeId>,
    {
        let mut set = HashSet::new();
        let mut current = Some(record);
        while let Some(id) = current {
            let record = &self.records[id];
            set.extend(nodes(record));
            current = record.left();
        }
        current = self.records[record].right();
        while let Some(id) = current {
            let record = &self.records[id];
            set.extend(nodes(record));
            current = record.right();
        }
        set
    }
}

/// The index of a node on the route, or -1 if it is not on the route.
fn index_of(route: &Route, node: NodeId) -> isize {
    route.index_of(node).map_or(-1, |i| i as isize)
}

#[cfg(test)]
mod test {
    use crate::error::Error;
    use crate::network::{LaneAttributes, Network};
    use crate::relative_lane::{LateralDirection, RelativeLane};
    use crate::route::Route;
    use crate::structure::LaneStructure;
    use crate::vehicle::{GtuType, LanePosition, RoutePlan};
    use crate::{LaneId, NodeId};

    /// A two lane road from a to b, where only the right lane continues to c.
    fn lane_drop(net: &mut Network) -> ([NodeId; 3], [LaneId; 3]) {
        let nodes = [net.add_node(), net.add_node(), net.add_node()];
        let ab = net.add_link(nodes[0], nodes[1]);
        let bc = net.add_link(nodes[1], nodes[2]);
        let attribs = |link| LaneAttributes {
            link,
            length: 100.0,
            allowed: &[],
        };
        let left = net.add_lane(&attribs(ab));
        let right = net.add_lane(&attribs(ab));
        let next = net.add_lane(&attribs(bc));
        net.set_adjacent(left, right);
        net.connect_lanes(right, next);
        (nodes, [left, right, next])
    }

    fn build(net: &Network, lane: LaneId, route: &Route) -> LaneStructure {
        let mut structure = LaneStructure::new(Default::default());
        let plan = RoutePlan::new(net, Some(route), GtuType::CAR);
        structure
            .update(net, &plan, LanePosition::new(lane, 10.0), Some(route), GtuType::CAR, 0.0)
            .unwrap();
        structure
    }

    #[test]
    fn route_requires_legal_lane_change() {
        let mut net = Network::new();
        let (nodes, [left, right, _]) = lane_drop(&mut net);
        let route = Route::new(nodes.to_vec());

        let structure = build(&net, left, &route);
        let root = structure.root_record().unwrap().id();
        assert!(structure.allows_route(&net, root, Some(&route)).unwrap());
        assert!(structure.allows_route(&net, root, None).unwrap());

        net.forbid_lane_change(left, LateralDirection::Right);
        let structure = build(&net, left, &route);
        let root = structure.root_record().unwrap().id();
        assert!(!structure.allows_route(&net, root, Some(&route)).unwrap());
        let right_record = structure.first_record(RelativeLane::RIGHT).unwrap();
        assert_eq!(right_record.lane(), right);
        assert!(structure
            .allows_route(&net, right_record.id(), Some(&route))
            .unwrap());
    }

    #[test]
    fn route_without_destination_is_an_error() {
        let mut net = Network::new();
        let (nodes, [left, ..]) = lane_drop(&mut net);
        let structure = build(&net, left, &Route::new(nodes.to_vec()));
        let root = structure.root_record().unwrap().id();
        let empty = Route::default();
        assert_eq!(
            structure.allows_route(&net, root, Some(&empty)),
            Err(Error::NoDestination)
        );
    }

    #[test]
    fn splits_and_merges_across_lanes() {
        let mut net = Network::new();
        let (nodes, [left, ..]) = lane_drop(&mut net);
        let structure = build(&net, left, &Route::new(nodes.to_vec()));
        let root = structure.root_record().unwrap().id();
        // Both lanes come from nowhere and lead onto a single link
        assert!(!structure.is_link_split(root));
        assert!(!structure.is_link_merge(root));
    }
}
