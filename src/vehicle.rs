//! What the lane structure needs to know about the observing vehicle.

pub use self::pathfinding::RoutePlan;
use crate::LaneId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod pathfinding;

/// The type of a GTU, which governs which lanes it may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GtuType(pub u16);

impl GtuType {
    pub const CAR: GtuType = GtuType(1);
    pub const TRUCK: GtuType = GtuType(2);
    pub const BUS: GtuType = GtuType(3);
    pub const BICYCLE: GtuType = GtuType(4);
}

impl Default for GtuType {
    fn default() -> Self {
        Self::CAR
    }
}

/// A position along a lane.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LanePosition {
    /// The lane.
    pub lane: LaneId,
    /// The longitudinal position along the lane in m.
    pub position: f64,
}

impl LanePosition {
    pub fn new(lane: LaneId, position: f64) -> Self {
        Self { lane, position }
    }
}

/// Longitudinal offsets of a GTU's extremities from its reference point, in m.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RelativePositions {
    /// The offset of the front, usually positive.
    pub front: f64,
    /// The offset of the rear, usually negative.
    pub rear: f64,
}

impl RelativePositions {
    /// Relative positions of a GTU whose reference point is its centre.
    pub fn centred(length: f64) -> Self {
        Self {
            front: 0.5 * length,
            rear: -0.5 * length,
        }
    }

    /// The length between rear and front in m.
    pub fn length(&self) -> f64 {
        self.front - self.rear
    }
}

/// The attributes of a GTU registered on the network.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GtuAttributes {
    /// The GTU type.
    pub gtu_type: GtuType,
    /// The GTU length in m. The reference point is the centre of the GTU.
    pub length: f64,
}

/// The parts of a vehicle's plan the lane structure depends on.
pub trait VehiclePlan {
    /// The lane the vehicle will take after `lane`, when it has to choose between
    /// several lanes of the next link on its route. `None` if there is no such lane.
    fn next_lane_for_route(&self, lane: LaneId) -> Option<LaneId>;

    /// Whether the vehicle's current plan deviates from the lane centre line,
    /// for instance during a lane change.
    fn is_deviative(&self) -> bool {
        false
    }
}
