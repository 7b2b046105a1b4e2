use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a component (source, server, sink, ...) in the model.
    pub struct ComponentId;

    /// Identifies a live or pooled entity in the entity arena.
    pub struct EntityId;

    /// Identifies a connection (edge) between two components.
    pub struct ConnectionId;

    /// Identifies a worker pool.
    pub struct WorkerPoolId;

    /// Identifies a weekly work schedule.
    pub struct ScheduleId;
}

/// Interned entity type tag. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityTypeId(pub u32);

/// Index of a processing slot within one component. Correlates an in-flight
/// unit with its completion and blocking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

/// Index of a worker within its pool's roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

/// Index of an in-progress vehicle trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TripId(pub u64);
