//! Where an entity goes next.
//!
//! Resolution order for an entity leaving a component:
//!
//! 1. A custom [`RouteFn`], if set, decides (forward, retry later, or fall
//!    through).
//! 2. Sequence routing looks the entity's `sequence_index` up in the model's
//!    [`SequenceTable`]. The named component or [`RoutingGroup`] must have
//!    free capacity; the capacity is reserved on success. With nothing free,
//!    the attempt is retried after `routing_retry_delay`.
//! 3. Otherwise a uniform draw picks one of the type-eligible outgoing
//!    connections by their probability share.
//!
//! A vehicle group on the component or the chosen connection hands the entity
//! to a vehicle instead of delivering it directly; the origin stays blocked
//! until the vehicle picks it up.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::entity::Entity;
use crate::fixed::{SimTime, to_time};
use crate::hooks::StateVariables;
use crate::id::{ComponentId, ConnectionId, EntityId};
use crate::kernel::{Action, Holder};
use crate::model::Model;
use crate::rng::SimRng;

/// Probability sums within this distance of 0 or 100 are accepted.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("connection probabilities of {component} sum to {sum}, expected 0 or 100")]
    InvalidProbabilitySum { component: String, sum: f64 },
    #[error("routing target '{0}' is neither a component nor a routing group")]
    UnknownTarget(String),
    #[error("{0} uses both sequence routing and a custom route function")]
    SequenceWithCustomRouter(String),
    #[error("routing group '{0}' has no members")]
    EmptyGroup(String),
}

// ---------------------------------------------------------------------------
// Custom routing
// ---------------------------------------------------------------------------

/// What a custom route function decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteDecision {
    /// Deliver directly to this component.
    Forward(ComponentId),
    /// Keep the entity and ask again after this many steps.
    Retry(f64),
    /// Use sequence or connection routing.
    Default,
}

/// Read access for a custom route function.
pub struct RouteContext<'a> {
    pub now: SimTime,
    pub component: &'a str,
    pub entity: &'a Entity,
    pub state: &'a StateVariables,
    pub rng: &'a mut SimRng,
    names: &'a HashMap<String, ComponentId>,
}

impl RouteContext<'_> {
    /// Look a component up by name.
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.names.get(name).copied()
    }
}

pub type RouteFn = Box<dyn FnMut(&mut RouteContext<'_>) -> RouteDecision>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routing state of one component.
#[derive(Default)]
pub struct Router {
    pub connections: Vec<ConnectionId>,
    /// Probability share per connection (same order), rebuilt on `connect`.
    shares: Vec<f64>,
    pub route_fn: Option<RouteFn>,
    pub sequence_routing: bool,
    pub vehicle_group: Option<String>,
    /// Consecutive sequence-routing retries.
    pub retry_counter: u64,
    /// Entities that had no eligible connection.
    pub unrouted: u64,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("connections", &self.connections)
            .field("shares", &self.shares)
            .field("route_fn", &self.route_fn.is_some())
            .field("sequence_routing", &self.sequence_routing)
            .field("vehicle_group", &self.vehicle_group)
            .field("retry_counter", &self.retry_counter)
            .finish()
    }
}

impl Router {
    /// Rebuild the share cache from the connections' probabilities (same
    /// order as `self.connections`). Without any weight, every connection
    /// gets an equal share; otherwise unweighted connections get none.
    pub fn rebuild_cache(&mut self, probabilities: &[Option<f64>]) {
        let weighted = probabilities.iter().any(Option::is_some);
        let n = probabilities.len();
        self.shares = probabilities
            .iter()
            .map(|p| match (weighted, p) {
                (false, _) => 100.0 / n as f64,
                (true, Some(p)) => *p,
                (true, None) => 0.0,
            })
            .collect();
    }

    pub fn shares(&self) -> &[f64] {
        &self.shares
    }

    /// Pick a connection index for a uniform `u01` in `[0, 1)`, among the
    /// connections flagged in `eligible`. The draw is scaled to the eligible
    /// mass, so a type filter renormalizes the remaining shares.
    pub fn select(&self, eligible: &[bool], u01: f64) -> Option<usize> {
        let mass: f64 = self
            .shares
            .iter()
            .zip(eligible)
            .filter(|(_, ok)| **ok)
            .map(|(s, _)| *s)
            .sum();
        if mass <= 0.0 {
            return None;
        }
        let u = u01 * mass;
        let mut cumulative = 0.0;
        let mut last = None;
        for (i, (share, ok)) in self.shares.iter().zip(eligible).enumerate() {
            if !*ok || *share <= 0.0 {
                continue;
            }
            cumulative += share;
            last = Some(i);
            if u < cumulative {
                return Some(i);
            }
        }
        last
    }
}

/// Probabilities must sum to 0 (all unweighted) or 100.
pub fn validate_probabilities(component: &str, probabilities: &[Option<f64>]) -> Result<(), RoutingError> {
    let sum: f64 = probabilities.iter().flatten().sum();
    if sum.abs() <= PROBABILITY_TOLERANCE || (sum - 100.0).abs() <= PROBABILITY_TOLERANCE {
        Ok(())
    } else {
        Err(RoutingError::InvalidProbabilitySum {
            component: component.to_string(),
            sum,
        })
    }
}

// ---------------------------------------------------------------------------
// Sequence table and groups
// ---------------------------------------------------------------------------

/// Destination names by sequence index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceTable {
    destinations: Vec<String>,
}

impl SequenceTable {
    pub fn new(destinations: Vec<String>) -> Self {
        Self { destinations }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.destinations.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.destinations.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStrategy {
    /// The member with the shortest queue among those with free capacity.
    #[default]
    LowestQueue,
    /// The first member with free capacity.
    NoQueue,
}

/// A set of interchangeable destinations addressed by one name.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingGroup {
    pub members: Vec<ComponentId>,
    pub strategy: GroupStrategy,
}

// ---------------------------------------------------------------------------
// Model-level routing
// ---------------------------------------------------------------------------

impl Model {
    /// Route `entity` out of `holder`. Returns `true` when the holder is free
    /// right away, `false` when it stays blocked until a retry succeeds or a
    /// vehicle picks the entity up.
    pub(crate) fn route_from(&mut self, holder: Holder, entity: EntityId) -> bool {
        let origin = holder.component;
        if self.entities.get(entity).is_none() {
            return true;
        }

        match self.custom_route(origin, entity) {
            RouteDecision::Forward(target) => {
                let group = self.components[origin].router.vehicle_group.clone();
                return self.dispatch(holder, entity, target, group);
            }
            RouteDecision::Retry(delay) => {
                self.components[origin].router.retry_counter += 1;
                let mut wait = to_time(delay);
                if wait == SimTime::ZERO {
                    warn!(
                        component = %self.components[origin].name,
                        delay,
                        "non-positive retry delay, using the routing retry delay"
                    );
                    wait = to_time(self.config.routing_retry_delay);
                }
                self.scheduler
                    .schedule_in(wait, Action::RoutingRetry { holder, entity });
                return false;
            }
            RouteDecision::Default => {}
        }

        if self.components[origin].router.sequence_routing
            && let Some(released) = self.route_by_sequence(holder, entity)
        {
            return released;
        }

        self.route_by_connections(holder, entity)
    }

    fn custom_route(&mut self, origin: ComponentId, entity: EntityId) -> RouteDecision {
        let Some(mut route_fn) = self.components[origin].router.route_fn.take() else {
            return RouteDecision::Default;
        };
        let decision = match self.entities.get(entity) {
            Some(e) => {
                let mut ctx = RouteContext {
                    now: self.scheduler.now(),
                    component: &self.components[origin].name,
                    entity: e,
                    state: &self.state,
                    rng: &mut self.rng,
                    names: &self.names,
                };
                route_fn(&mut ctx)
            }
            None => RouteDecision::Default,
        };
        self.components[origin].router.route_fn = Some(route_fn);
        if let RouteDecision::Forward(target) = decision
            && !self.components.get(target).is_some_and(|c| c.kind.accepts_entities())
        {
            warn!(component = %self.components[origin].name, "custom route to a component that takes no entities");
            return RouteDecision::Default;
        }
        decision
    }

    /// `None` when the entity is past the end of the table.
    fn route_by_sequence(&mut self, holder: Holder, entity: EntityId) -> Option<bool> {
        let origin = holder.component;
        let index = self.entities.get(entity)?.sequence_index;
        let name = self.sequence_table.get(index)?.to_string();

        let Some(destination) = self.free_destination(&name) else {
            let router = &mut self.components[origin].router;
            router.retry_counter += 1;
            let retries = router.retry_counter;
            if retries % self.config.retry_log_interval.max(1) == 0 {
                warn!(
                    component = %self.components[origin].name,
                    destination = %name,
                    retries,
                    time = %self.scheduler.now(),
                    "no free destination, still retrying"
                );
            }
            self.scheduler.schedule_in(
                to_time(self.config.routing_retry_delay),
                Action::RoutingRetry { holder, entity },
            );
            return Some(false);
        };

        if let Some(core) = self.components[destination].core_mut() {
            core.reserve();
        }
        if let Some(e) = self.entities.get_mut(entity) {
            e.capacity_reserved = true;
            e.sequence_index += 1;
            e.destination = None;
        }
        self.components[origin].router.retry_counter = 0;
        debug!(
            component = %self.components[origin].name,
            destination = %name,
            "sequence routing reserved capacity"
        );
        let group = self.components[origin].router.vehicle_group.clone();
        Some(self.dispatch(holder, entity, destination, group))
    }

    /// Resolve a component or group name to a member with free capacity.
    fn free_destination(&self, name: &str) -> Option<ComponentId> {
        let has_room = |id: ComponentId| {
            self.components
                .get(id)
                .and_then(|c| c.core())
                .is_some_and(|core| core.has_free_capacity())
        };
        if let Some(group) = self.routing_groups.get(name) {
            let mut free = group.members.iter().copied().filter(|&m| has_room(m));
            return match group.strategy {
                GroupStrategy::NoQueue => free.next(),
                GroupStrategy::LowestQueue => free.min_by_key(|&m| {
                    self.components[m].core().map_or(usize::MAX, |c| c.stats.queue_length)
                }),
            };
        }
        self.names.get(name).copied().filter(|&id| has_room(id))
    }

    fn route_by_connections(&mut self, holder: Holder, entity: EntityId) -> bool {
        let origin = holder.component;
        let Some(entity_type) = self.entities.get(entity).map(|e| e.entity_type) else {
            return true;
        };
        let router = &self.components[origin].router;
        let eligible: Vec<bool> = router
            .connections
            .iter()
            .map(|&c| self.connections.get(c).is_some_and(|conn| conn.accepts(entity_type)))
            .collect();
        let draw = self.rng.next_f64();
        let Some(index) = router.select(&eligible, draw) else {
            self.components[origin].router.unrouted += 1;
            debug!(
                component = %self.components[origin].name,
                "no eligible connection, entity stays in the system"
            );
            return true;
        };
        let conn_id = router.connections[index];
        let group = self.connections[conn_id]
            .vehicle_group
            .clone()
            .or_else(|| router.vehicle_group.clone());

        if let Some(group) = group {
            let target = self.connections[conn_id].target;
            return self.request_transport(&group, entity, target, holder);
        }
        self.send_over(conn_id, entity);
        true
    }

    /// Deliver directly, or through a vehicle of `group`.
    fn dispatch(
        &mut self,
        holder: Holder,
        entity: EntityId,
        target: ComponentId,
        group: Option<String>,
    ) -> bool {
        if let Some(group) = group {
            return self.request_transport(&group, entity, target, holder);
        }
        self.record_exit(holder.component);
        self.deliver(entity, target);
        true
    }

    /// Put an entity on a connection: immediately delivered, or queued for
    /// its transit delay.
    pub(crate) fn send_over(&mut self, conn_id: ConnectionId, entity: EntityId) {
        let record = self.recording();
        let conn = &mut self.connections[conn_id];
        if record {
            conn.stats.number_entered += 1;
        }
        trace!(connection = %conn.name, "entity entered connection");
        if !conn.is_delayed() {
            let (origin, target) = (conn.origin, conn.target);
            if record {
                conn.stats.entities_processed += 1;
            }
            self.record_exit(origin);
            self.deliver(entity, target);
            return;
        }
        if conn.enter(entity) {
            self.schedule_connection_delivery(conn_id);
        }
    }

    fn schedule_connection_delivery(&mut self, conn_id: ConnectionId) {
        let delay = self.connections[conn_id]
            .transit_delay
            .as_ref()
            .map_or(0.0, |d| d.sample(&mut self.rng));
        self.scheduler
            .schedule_in(to_time(delay), Action::ConnectionDeliver(conn_id));
    }

    pub(crate) fn connection_deliver(&mut self, conn_id: ConnectionId) {
        let record = self.recording();
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };
        let Some((entity, more)) = conn.deliver_head() else {
            return;
        };
        if record {
            conn.stats.entities_processed += 1;
        }
        let (origin, target) = (conn.origin, conn.target);
        if more {
            self.schedule_connection_delivery(conn_id);
        }
        self.record_exit(origin);
        self.deliver(entity, target);
    }

    pub(crate) fn routing_retry(&mut self, holder: Holder, entity: EntityId) {
        if self.entities.get(entity).is_none() {
            self.release_holder(holder);
            return;
        }
        if self.route_from(holder, entity) {
            self.release_holder(holder);
        }
    }
}
