use crate::relative_lane::LateralDirection;
use crate::{LaneId, RecordId};
use thiserror::Error;

/// A specialized result type for lane structure operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while maintaining a lane structure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A lane has more than one physically accessible adjacent lane on one side.
    /// The network violates the assumptions of the lane structure; this is not recoverable.
    #[error("lane {lane:?} has {count} physically adjacent lanes to the {direction:?}")]
    MultipleAdjacentLanes {
        lane: LaneId,
        direction: LateralDirection,
        count: usize,
    },
    /// A route was evaluated that has no destination node.
    #[error("route has no destination node")]
    NoDestination,
    /// A next record was added to a record that is cut off at its end.
    #[error("cannot add next records to record {0:?}, which is cut off at the end")]
    CutOffEnd(RecordId),
    /// A previous record was added to a record that is cut off at its start.
    #[error("cannot add previous records to record {0:?}, which is cut off at the start")]
    CutOffStart(RecordId),
    /// A record with next records was cut off at its end.
    #[error("cannot cut off record {0:?} at the end, it has next records")]
    HasNextRecords(RecordId),
    /// A record with previous records was cut off at its start.
    #[error("cannot cut off record {0:?} at the start, it has previous records")]
    HasPrevRecords(RecordId),
    /// After a lane change, no record of the new lane contains the vehicle.
    #[error("no record of lane {0:?} contains the vehicle")]
    RootNotFound(LaneId),
}

impl Error {
    /// Whether the error indicates a network topology the lane structure cannot represent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MultipleAdjacentLanes { .. })
    }
}
