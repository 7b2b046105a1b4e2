//! Edges between components, with an optional transit delay.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;
use crate::id::{ComponentId, EntityId, EntityTypeId};

/// Options for [`Model::connect`](crate::model::Model::connect).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Routing weight. Either every outgoing edge of a component has one
    /// (summing to 100) or none has.
    pub probability: Option<f64>,
    pub transit_delay: Option<Distribution>,
    /// Only entities of this type may take the edge.
    pub entity_type: Option<String>,
    /// Carry entities over this edge with a vehicle from the group.
    pub vehicle_group: Option<String>,
}

impl ConnectOptions {
    pub fn probability(mut self, p: f64) -> Self {
        self.probability = Some(p);
        self
    }

    pub fn delay(mut self, d: Distribution) -> Self {
        self.transit_delay = Some(d);
        self
    }

    pub fn entity_type(mut self, name: impl Into<String>) -> Self {
        self.entity_type = Some(name.into());
        self
    }

    pub fn vehicle_group(mut self, name: impl Into<String>) -> Self {
        self.vehicle_group = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    pub number_entered: u64,
    pub entities_processed: u64,
}

/// A directed edge `origin -> target`.
#[derive(Debug, Clone)]
pub struct Connection {
    pub name: String,
    pub origin: ComponentId,
    pub target: ComponentId,
    pub probability: Option<f64>,
    pub transit_delay: Option<Distribution>,
    pub entity_type: Option<EntityTypeId>,
    pub vehicle_group: Option<String>,
    in_transit: VecDeque<EntityId>,
    pub stats: ConnectionStats,
}

impl Connection {
    pub fn new(name: String, origin: ComponentId, target: ComponentId) -> Self {
        Self {
            name,
            origin,
            target,
            probability: None,
            transit_delay: None,
            entity_type: None,
            vehicle_group: None,
            in_transit: VecDeque::new(),
            stats: ConnectionStats::default(),
        }
    }

    /// Whether an entity of `ty` may use this edge.
    pub fn accepts(&self, ty: EntityTypeId) -> bool {
        self.entity_type.is_none_or(|t| t == ty)
    }

    pub fn is_delayed(&self) -> bool {
        self.transit_delay.is_some()
    }

    /// Put an entity on a delayed edge. Returns `true` when it is the only
    /// one in transit, i.e. the caller must schedule its delivery.
    pub fn enter(&mut self, entity: EntityId) -> bool {
        self.in_transit.push_back(entity);
        self.in_transit.len() == 1
    }

    /// Take the head entity off a delayed edge. The flag says whether more
    /// are waiting behind it.
    pub fn deliver_head(&mut self) -> Option<(EntityId, bool)> {
        let entity = self.in_transit.pop_front()?;
        Some((entity, !self.in_transit.is_empty()))
    }

    pub fn in_transit(&self) -> usize {
        self.in_transit.len()
    }

    pub fn reset(&mut self) {
        self.in_transit.clear();
        self.stats = ConnectionStats::default();
    }
}
