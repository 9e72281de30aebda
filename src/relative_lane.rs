//! Lanes identified relative to the observing vehicle.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A lateral direction, as seen in the direction of travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LateralDirection {
    Left,
    Right,
    None,
}

impl LateralDirection {
    /// Both proper lateral directions, left first.
    pub const BOTH: [LateralDirection; 2] = [LateralDirection::Left, LateralDirection::Right];

    /// Gets the opposite direction.
    pub fn flip(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::None => Self::None,
        }
    }

    pub fn is_left(self) -> bool {
        self == Self::Left
    }

    pub fn is_right(self) -> bool {
        self == Self::Right
    }
}

/// A lane relative to the lane of the observing vehicle.
///
/// Relative lanes are ordered from left to right: negative ranks are to the
/// left of the current lane, positive ranks to the right.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RelativeLane(i32);

impl RelativeLane {
    /// The lane the vehicle is on.
    pub const CURRENT: RelativeLane = RelativeLane(0);
    /// The lane directly to the left.
    pub const LEFT: RelativeLane = RelativeLane(-1);
    /// The lane directly to the right.
    pub const RIGHT: RelativeLane = RelativeLane(1);
    /// Two lanes to the left.
    pub const SECOND_LEFT: RelativeLane = RelativeLane(-2);
    /// Two lanes to the right.
    pub const SECOND_RIGHT: RelativeLane = RelativeLane(2);

    /// Creates a relative lane from a signed rank (negative is left).
    pub const fn from_rank(rank: i32) -> Self {
        Self(rank)
    }

    /// Creates a relative lane a number of lanes in the given direction.
    pub fn new(direction: LateralDirection, num_lanes: u32) -> Self {
        let num_lanes = num_lanes as i32;
        match direction {
            LateralDirection::Left => Self(-num_lanes),
            LateralDirection::Right => Self(num_lanes),
            LateralDirection::None => Self::CURRENT,
        }
    }

    /// The signed rank of the lane.
    pub fn rank(self) -> i32 {
        self.0
    }

    /// The number of lanes between this lane and the current lane.
    pub fn num_lanes(self) -> u32 {
        self.0.unsigned_abs()
    }

    /// The direction of this lane from the current lane.
    pub fn lateral_direction(self) -> LateralDirection {
        match self.0 {
            r if r < 0 => LateralDirection::Left,
            r if r > 0 => LateralDirection::Right,
            _ => LateralDirection::None,
        }
    }

    pub fn is_current(self) -> bool {
        self.0 == 0
    }

    pub fn is_left(self) -> bool {
        self.0 < 0
    }

    pub fn is_right(self) -> bool {
        self.0 > 0
    }

    /// The lane directly to the left of this lane.
    pub fn left(self) -> Self {
        Self(self.0 - 1)
    }

    /// The lane directly to the right of this lane.
    pub fn right(self) -> Self {
        Self(self.0 + 1)
    }

    /// The adjacent lane in the given direction.
    pub fn step(self, direction: LateralDirection) -> Self {
        match direction {
            LateralDirection::Left => self.left(),
            LateralDirection::Right => self.right(),
            LateralDirection::None => self,
        }
    }

    /// Adds a lateral offset, treating `delta` as a shift relative to the current lane.
    pub fn add(self, delta: RelativeLane) -> Self {
        Self(self.0 + delta.0)
    }

    /// The offset that moves this lane onto the current lane.
    pub fn inverse(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Debug for RelativeLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativeLane({})", self)
    }
}

impl fmt::Display for RelativeLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lateral_direction() {
            LateralDirection::None => write!(f, "CURRENT"),
            LateralDirection::Left => write!(f, "LEFT{}", self.num_lanes()),
            LateralDirection::Right => write!(f, "RIGHT{}", self.num_lanes()),
        }
    }
}
