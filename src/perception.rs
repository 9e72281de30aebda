//! Lazy nearest-first searches over a lane structure.
//!
//! A [PerceptionIterable] walks the records of a [LaneStructure] up- or downstream from a
//! starting point and yields the objects it finds in order of increasing distance.
//! What is searched for is defined by a [PerceptionSearch], which probes one lane at a time.
//! Branches of the structure are searched independently, and objects reached along several
//! branches, e.g. downstream of a merge, are only reported once.

pub use self::neighbors::{DownstreamGtus, UpstreamGtus};
pub use self::objects::LaneObjects;
use crate::structure::LaneStructure;
use crate::RecordId;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::ops::ControlFlow;

mod neighbors;
mod objects;

/// The direction in which a search travels along the lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchDirection {
    /// In the direction of travel.
    Downstream,
    /// Against the direction of travel.
    Upstream,
}

/// An object found by a search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Perceived<T> {
    /// The object.
    pub object: T,
    /// The distance to the object in m, or `None` if it overlaps with the observer.
    pub distance: Option<f64>,
}

/// What a probe of a single lane found.
#[derive(Clone, Debug, PartialEq)]
pub enum Found<T> {
    /// A single object.
    One(T),
    /// Several objects at the same position, in the order they should be reported.
    CoLocated(SmallVec<[T; 4]>),
}

impl<T> Found<T> {
    fn into_vec(self) -> SmallVec<[T; 4]> {
        match self {
            Found::One(object) => smallvec::smallvec![object],
            Found::CoLocated(objects) => objects,
        }
    }
}

/// The result of probing a lane for the next object(s).
#[derive(Clone, Debug, PartialEq)]
pub struct Probe<T> {
    /// The object(s) found.
    pub found: Found<T>,
    /// Where the probe stopped, passed back to the next probe of the same record.
    pub counter: Option<usize>,
    /// The position of the found object(s) on the lane, in m.
    pub position: f64,
}

/// Defines what a [PerceptionIterable] searches for.
pub trait PerceptionSearch {
    /// The objects searched for.
    type Object: Copy + Eq + Hash;

    /// The direction in which the search travels.
    fn direction(&self) -> SearchDirection;

    /// Finds the next object(s) beyond `position` on the lane of a record, looking in the
    /// direction of the search. Only the record's own lane is probed.
    ///
    /// `counter` is `None` on the first probe of a record, and otherwise the counter of the
    /// previous probe of the same record.
    fn next_on_record(
        &self,
        structure: &LaneStructure,
        record: RecordId,
        position: f64,
        counter: Option<usize>,
    ) -> Option<Probe<Self::Object>>;

    /// The distance to an object found on a record at `position`.
    /// `None` means the object overlaps with the observer.
    fn distance(
        &self,
        structure: &LaneStructure,
        object: Self::Object,
        record: RecordId,
        position: f64,
    ) -> Option<f64>;

    /// Whether the search continues onto a record from the record before it.
    fn follows(&self, _structure: &LaneStructure, _record: RecordId) -> bool {
        true
    }
}

/// The order of candidates in the frontier.
#[derive(Clone, Copy, Debug)]
struct Rank {
    distance: Option<f64>,
    /// Discovery sequence, breaking ties between equal distances.
    seq: u64,
}

impl PartialEq for Rank {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rank {}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        let distance = match (self.distance, other.distance) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.total_cmp(&b),
        };
        distance.then(self.seq.cmp(&other.seq))
    }
}

/// The nearest candidate found on one branch of the search.
#[derive(Clone, Copy, Debug)]
struct Candidate<T> {
    object: T,
    record: RecordId,
    /// The position of the object on the record's lane.
    position: f64,
    counter: Option<usize>,
}

/// Where the search of a record resumes.
#[derive(Clone, Copy, Debug)]
struct Resumption {
    record: RecordId,
    position: f64,
    counter: Option<usize>,
}

/// A lazy, nearest-first sequence of the objects found by a search.
///
/// The structure is only searched as far as needed to produce the objects requested so far.
/// Produced objects are remembered, so [first](Self::first) and [is_empty](Self::is_empty)
/// can be asked at any time without losing objects to the iterator.
pub struct PerceptionIterable<'s, S: PerceptionSearch> {
    structure: &'s LaneStructure,
    search: S,
    direction: SearchDirection,
    max_distance: f64,
    /// Where the search starts, until it has been seeded.
    start: Option<Resumption>,
    /// The nearest candidate of every branch.
    frontier: BTreeMap<Rank, Candidate<S::Object>>,
    /// Further objects found at the same position as a record's candidate.
    co_located: HashMap<RecordId, VecDeque<S::Object>>,
    /// Objects produced so far, to suppress duplicates reached along other branches.
    returned: HashSet<S::Object>,
    /// Records that have been entered.
    visited: HashSet<RecordId>,
    /// Records whose search resumes when the next object is requested.
    postponed: Vec<Resumption>,
    seq: u64,
    produced: Vec<Perceived<S::Object>>,
    /// The index of the next object for the iterator.
    cursor: usize,
}

impl<'s, S: PerceptionSearch> PerceptionIterable<'s, S> {
    /// Creates a search starting at a position on a record.
    /// The search yields nothing if there is no record to start at.
    pub fn new(
        structure: &'s LaneStructure,
        search: S,
        record: Option<RecordId>,
        position: f64,
        max_distance: f64,
    ) -> Self {
        Self {
            structure,
            direction: search.direction(),
            search,
            max_distance,
            start: record.map(|record| Resumption {
                record,
                position,
                counter: None,
            }),
            frontier: BTreeMap::new(),
            co_located: HashMap::new(),
            returned: HashSet::new(),
            visited: HashSet::new(),
            postponed: vec![],
            seq: 0,
            produced: vec![],
            cursor: 0,
        }
    }

    /// The direction of the search.
    pub fn direction(&self) -> SearchDirection {
        self.direction
    }

    /// The maximum distance of the search in m.
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// The nearest object.
    pub fn first(&mut self) -> Option<&Perceived<S::Object>> {
        self.get(0)
    }

    /// Whether the search finds nothing.
    pub fn is_empty(&mut self) -> bool {
        self.first().is_none()
    }

    /// The object at an index in the sequence, searching further if needed.
    pub fn get(&mut self, index: usize) -> Option<&Perceived<S::Object>> {
        while self.produced.len() <= index {
            let perceived = self.produce()?;
            self.produced.push(perceived);
        }
        self.produced.get(index)
    }

    /// The found objects without their distances.
    pub fn objects(&mut self) -> impl Iterator<Item = S::Object> + '_ + use<'_, 's, S> {
        self.map(|perceived| perceived.object)
    }

    /// Folds the sequence from its start into a single result.
    ///
    /// The accumulator may stop the fold early by returning [ControlFlow::Break]
    /// with the final intermediate value. The finisher converts the intermediate value
    /// into the result.
    pub fn accumulate<I, R, A, F>(&mut self, identity: I, mut accumulator: A, finisher: F) -> R
    where
        A: FnMut(I, &Perceived<S::Object>) -> ControlFlow<I, I>,
        F: FnOnce(I) -> R,
    {
        let mut intermediate = identity;
        let mut index = 0;
        while let Some(perceived) = self.get(index).copied() {
            match accumulator(intermediate, &perceived) {
                ControlFlow::Continue(next) => intermediate = next,
                ControlFlow::Break(last) => {
                    intermediate = last;
                    break;
                }
            }
            index += 1;
        }
        finisher(intermediate)
    }

    /// Finds the next nearest object.
    fn produce(&mut self) -> Option<Perceived<S::Object>> {
        if let Some(start) = self.start.take() {
            self.visited.insert(start.record);
            self.search_record(start);
        }
        for resumption in std::mem::take(&mut self.postponed) {
            self.search_record(resumption);
        }

        let (rank, candidate) = self.frontier.pop_first()?;
        self.returned.insert(candidate.object);
        // The same object may have been reached along another branch
        self.frontier.retain(|_, c| c.object != candidate.object);
        log::trace!(
            "perceived object at {:?} on record {:?}",
            rank.distance,
            candidate.record
        );

        let resumption = Resumption {
            record: candidate.record,
            position: candidate.position,
            counter: candidate.counter,
        };
        if !self.promote_co_located(resumption) {
            self.postponed.push(resumption);
        }
        Some(Perceived {
            object: candidate.object,
            distance: rank.distance,
        })
    }

    /// Moves the next queued co-located object of a record into the frontier.
    fn promote_co_located(&mut self, at: Resumption) -> bool {
        while let Some(object) = self.co_located.get_mut(&at.record).and_then(VecDeque::pop_front) {
            if self.returned.contains(&object) {
                continue;
            }
            if self.add_candidate(object, at) {
                return true;
            }
        }
        self.co_located.remove(&at.record);
        false
    }

    /// Adds an object to the frontier if it lies within the maximum distance.
    fn add_candidate(&mut self, object: S::Object, at: Resumption) -> bool {
        let distance = self
            .search
            .distance(self.structure, object, at.record, at.position);
        if distance.map_or(false, |d| d > self.max_distance) {
            return false;
        }
        let rank = Rank {
            distance,
            seq: self.seq,
        };
        self.seq += 1;
        self.frontier.insert(
            rank,
            Candidate {
                object,
                record: at.record,
                position: at.position,
                counter: at.counter,
            },
        );
        true
    }

    /// Searches a record from a position until a candidate is found or the branch ends,
    /// continuing onto the records beyond it.
    fn search_record(&mut self, from: Resumption) {
        let mut stack = vec![from];
        while let Some(at) = stack.pop() {
            if self.structure.record(at.record).is_none() {
                continue;
            }
            let probe = self
                .search
                .next_on_record(self.structure, at.record, at.position, at.counter);
            let probe = match probe {
                Some(probe) if !self.beyond_cut_off(at.record, probe.position) => probe,
                Some(_) => continue,
                None => {
                    stack.extend(self.continuations(at.record));
                    continue;
                }
            };

            let found = Resumption {
                record: at.record,
                position: probe.position,
                counter: probe.counter,
            };
            let mut objects: VecDeque<_> = probe
                .found
                .into_vec()
                .into_iter()
                .filter(|o| !self.returned.contains(o))
                .collect();
            let first = match objects.pop_front() {
                Some(first) => first,
                None => {
                    // Everything here was reached along another branch, look further
                    stack.push(found);
                    continue;
                }
            };
            if self.add_candidate(first, found) {
                if !objects.is_empty() {
                    self.co_located.insert(at.record, objects);
                }
            } else {
                log::trace!("search ends on record {:?} beyond the maximum distance", at.record);
            }
        }
    }

    /// Whether a position on a record lies beyond the part of the lane in the structure.
    fn beyond_cut_off(&self, id: RecordId, position: f64) -> bool {
        let record = match self.structure.record(id) {
            Some(record) => record,
            None => return true,
        };
        match self.direction {
            SearchDirection::Downstream => record.cut_off_end().map_or(false, |c| position > c),
            SearchDirection::Upstream => record.cut_off_start().map_or(false, |c| position < c),
        }
    }

    /// The records onto which a search continues after exhausting a record.
    fn continuations(&mut self, id: RecordId) -> Vec<Resumption> {
        let structure = self.structure;
        let record = match structure.record(id) {
            Some(record) => record,
            None => return vec![],
        };
        let (within, ids) = match self.direction {
            SearchDirection::Downstream => (
                record.start_distance() + record.length() < self.max_distance,
                record.next(),
            ),
            SearchDirection::Upstream => (-record.start_distance() < self.max_distance, record.prev()),
        };
        if !within {
            return vec![];
        }
        let mut resumptions = vec![];
        for next in ids.iter().copied() {
            if !self.search.follows(structure, next) || !self.visited.insert(next) {
                continue;
            }
            let position = match self.direction {
                SearchDirection::Downstream => 0.0,
                SearchDirection::Upstream => structure.record(next).map_or(0.0, |r| r.length()),
            };
            resumptions.push(Resumption {
                record: next,
                position,
                counter: None,
            });
        }
        // Searched from the top of the stack
        resumptions.reverse();
        resumptions
    }
}

impl<S: PerceptionSearch> Iterator for PerceptionIterable<'_, S> {
    type Item = Perceived<S::Object>;

    fn next(&mut self) -> Option<Self::Item> {
        let perceived = self.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(perceived)
    }
}

/// Probes a list of items sorted by increasing position for the next accepted item(s)
/// beyond `position`, in the direction of the search.
///
/// The counter is the index of the last item returned. Items at the same position are
/// returned together.
pub(crate) fn probe_sorted<T, P, A>(
    items: &[T],
    direction: SearchDirection,
    position: f64,
    counter: Option<usize>,
    position_of: P,
    accept: A,
) -> Option<Probe<T>>
where
    T: Copy,
    P: Fn(T) -> f64,
    A: Fn(T) -> bool,
{
    let indices: Box<dyn Iterator<Item = usize>> = match direction {
        SearchDirection::Downstream => {
            let start = match counter {
                Some(counter) => counter + 1,
                None => items.partition_point(|i| position_of(*i) < position),
            };
            Box::new(start..items.len())
        }
        SearchDirection::Upstream => {
            let end = match counter {
                Some(counter) => counter,
                None => items.partition_point(|i| position_of(*i) <= position),
            };
            Box::new((0..end).rev())
        }
    };

    let mut found: SmallVec<[T; 4]> = SmallVec::new();
    let mut found_at = None;
    let mut last = None;
    for index in indices {
        let item = items[index];
        let item_position = position_of(item);
        match found_at {
            Some(at) if item_position != at => break,
            _ => {}
        }
        last = Some(index);
        if accept(item) {
            found.push(item);
            found_at = Some(item_position);
        }
    }
    let position = found_at?;
    let found = match found.len() {
        1 => Found::One(found[0]),
        _ => Found::CoLocated(found),
    };
    Some(Probe {
        found,
        counter: last,
        position,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn positions(probe: &Probe<usize>) -> Vec<usize> {
        match &probe.found {
            Found::One(item) => vec![*item],
            Found::CoLocated(items) => items.to_vec(),
        }
    }

    #[test]
    fn probe_downstream() {
        let items = [0, 1, 2, 3, 4];
        let at = [0.0, 10.0, 20.0, 20.0, 30.0];
        let position_of = |i: usize| at[i];

        let probe = probe_sorted(&items, SearchDirection::Downstream, 5.0, None, position_of, |_| true).unwrap();
        assert_eq!(positions(&probe), [1]);
        assert_eq!(probe.counter, Some(1));

        let probe = probe_sorted(&items, SearchDirection::Downstream, 10.0, probe.counter, position_of, |_| true)
            .unwrap();
        assert_eq!(positions(&probe), [2, 3]);
        assert_eq!(probe.position, 20.0);

        let probe = probe_sorted(&items, SearchDirection::Downstream, 20.0, probe.counter, position_of, |i| i != 4);
        assert!(probe.is_none());
    }

    #[test]
    fn probe_upstream() {
        let items = [0, 1, 2, 3];
        let at = [0.0, 10.0, 10.0, 30.0];
        let position_of = |i: usize| at[i];

        // Item 2 is the observer itself
        let probe = probe_sorted(&items, SearchDirection::Upstream, 25.0, None, position_of, |i| i != 2).unwrap();
        assert_eq!(positions(&probe), [1]);
        assert_eq!(probe.counter, Some(1));

        let probe = probe_sorted(&items, SearchDirection::Upstream, 10.0, probe.counter, position_of, |_| true)
            .unwrap();
        assert_eq!(positions(&probe), [0]);
        assert_eq!(probe.counter, Some(0));
        assert!(probe_sorted(&items, SearchDirection::Upstream, 0.0, Some(0), position_of, |_| true).is_none());
    }

    #[test]
    fn overlapping_ranks_first() {
        let overlapping = Rank {
            distance: None,
            seq: 5,
        };
        let near = Rank {
            distance: Some(-3.0),
            seq: 1,
        };
        let tie = Rank {
            distance: Some(-3.0),
            seq: 2,
        };
        assert!(overlapping < near);
        assert!(near < tie);
    }
}
