use crate::NodeId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The sequence of nodes a vehicle intends to pass.
///
/// A route is only used to filter which branches of the network are relevant,
/// it is never searched for paths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Route {
    nodes: Vec<NodeId>,
}

impl Route {
    /// Creates a route through the given nodes.
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self { nodes }
    }

    /// The nodes on the route.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The final node of the route, if there is one.
    pub fn destination(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// The index of the node on the route.
    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| *n == node)
    }

    /// Whether the node is on the route.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Whether a link from `from` to `to` is travelled along the route.
    pub fn contains_link(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }

    /// Whether a link from `from` to `to` leads along or onto the route.
    /// A link into the first node of the route counts as leading onto it.
    pub(crate) fn continues_on(&self, from: NodeId, to: NodeId) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(0)) => true,
            _ => false,
        }
    }

    /// Whether a link between `a` and `b`, in either direction, is part of the route.
    pub(crate) fn touches_link(&self, a: NodeId, b: NodeId) -> bool {
        match (self.index_of(a), self.index_of(b)) {
            (Some(a), Some(b)) => a.abs_diff(b) == 1,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn route_links() {
        let mut nodes = SlotMap::<NodeId, ()>::with_key();
        let [a, b, c, d] = [(); 4].map(|_| nodes.insert(()));
        let route = Route::new(vec![a, b, c]);
        assert_eq!(route.destination(), Some(c));
        assert_eq!(route.index_of(b), Some(1));
        assert!(route.contains_link(a, b));
        assert!(!route.contains_link(a, c));
        assert!(!route.contains_link(b, a));
        assert!(route.touches_link(b, a));
        assert!(route.continues_on(d, a));
        assert!(!route.continues_on(d, b));
        assert_eq!(Route::default().destination(), None);
    }
}
