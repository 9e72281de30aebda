//! Egocentric lane structures and nearest-first perception searches
//! for lane-based traffic simulation.
//!
//! A [LaneStructure] holds, for one vehicle, the part of the road network
//! within its view distances as a graph of records relative to the vehicle.
//! Perception searches ([PerceptionIterable]) walk that graph to find the
//! nearest vehicles or objects up- or downstream.

#[cfg(feature = "debug")]
pub use debug::take_debug_frame;
pub use error::{Error, Result};
pub use network::{Lane, LaneAttributes, LaneObject, Network, ObjectKind, RoadNetwork};
pub use perception::{
    DownstreamGtus, Found, LaneObjects, PerceptionIterable, PerceptionSearch, Perceived, Probe,
    SearchDirection, UpstreamGtus,
};
pub use relative_lane::{LateralDirection, RelativeLane};
pub use route::Route;
use slotmap::new_key_type;
pub use slotmap::{Key, KeyData};
pub use structure::{
    LaneStructure, LaneStructureAttributes, ObjectEntries, Record, RecordLink, RootSnapshot,
};
pub use util::{Entry, History};
pub use vehicle::{
    GtuAttributes, GtuType, LanePosition, RelativePositions, RoutePlan, VehiclePlan,
};

#[cfg(feature = "debug")]
mod debug;
mod error;
mod network;
mod perception;
mod relative_lane;
mod route;
mod structure;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a node in the road network.
    pub struct NodeId;
    /// Unique ID of a link, a group of lanes between two nodes.
    pub struct LinkId;
    /// Unique ID of a [Lane].
    pub struct LaneId;
    /// Unique ID of a [LaneObject].
    pub struct ObjectId;
    /// Unique ID of a GTU (generic traffic unit).
    pub struct GtuId;
    /// Unique ID of a [Record] within a [LaneStructure].
    pub struct RecordId;
}
