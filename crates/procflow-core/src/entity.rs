//! Entities (the tokens that flow through the network) and the population
//! bookkeeping around them.
//!
//! Entities live in a slotmap arena. Destroyed entities are reset and parked on
//! a per-type free list (bounded by `pool_capacity`) so that a later
//! [`EntityManager::create`] of the same type reuses the slot instead of
//! allocating.

use std::collections::{BTreeMap, HashMap};

use slotmap::SlotMap;

use crate::fixed::{SimTime, time_to_f64};
use crate::id::{ComponentId, EntityId, EntityTypeId};

/// The type every entity gets when nothing else is configured.
pub const DEFAULT_ENTITY_TYPE: EntityTypeId = EntityTypeId(0);

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A simulated token.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityTypeId,
    pub creation_time: SimTime,
    /// Set once by a sink; never earlier than `creation_time`.
    pub destruction_time: Option<SimTime>,
    pub is_parent: bool,
    /// Owned by this entity while batched (set by a combiner, drained by a
    /// separator).
    pub batch_members: Vec<EntityId>,
    /// Last component that accepted the entity. Lookup only.
    pub current_location: Option<ComponentId>,
    /// Destination resolved by sequence or pull routing, cleared after use.
    pub destination: Option<ComponentId>,
    pub sequence_index: usize,
    /// Capacity was already reserved for this entity at the component it is
    /// travelling to.
    pub capacity_reserved: bool,
    /// Free-form numeric attributes for hooks and custom routing.
    pub attributes: BTreeMap<String, f64>,
}

impl Entity {
    fn new(name: String, entity_type: EntityTypeId, creation_time: SimTime) -> Self {
        Self {
            name,
            entity_type,
            creation_time,
            destruction_time: None,
            is_parent: false,
            batch_members: Vec::new(),
            current_location: None,
            destination: None,
            sequence_index: 0,
            capacity_reserved: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Restore a pooled instance to a clean state for reassignment.
    fn reset(&mut self, name: String, creation_time: SimTime) {
        self.name = name;
        self.creation_time = creation_time;
        self.destruction_time = None;
        self.is_parent = false;
        self.batch_members.clear();
        self.current_location = None;
        self.destination = None;
        self.sequence_index = 0;
        self.capacity_reserved = false;
        self.attributes.clear();
    }

    /// Time spent in the system so far (or in total, once destroyed).
    pub fn time_in_system(&self, now: SimTime) -> SimTime {
        self.destruction_time.unwrap_or(now) - self.creation_time
    }
}

// ---------------------------------------------------------------------------
// Type registry
// ---------------------------------------------------------------------------

/// Interns entity type names into [`EntityTypeId`]s.
#[derive(Debug, Clone)]
pub struct EntityTypeRegistry {
    names: Vec<String>,
    index: HashMap<String, EntityTypeId>,
}

impl Default for EntityTypeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            names: Vec::new(),
            index: HashMap::new(),
        };
        registry.intern("Default");
        registry
    }
}

impl EntityTypeRegistry {
    /// Return the id for `name`, registering it on first use.
    pub fn intern(&mut self, name: &str) -> EntityTypeId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = EntityTypeId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<EntityTypeId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: EntityTypeId) -> &str {
        self.names
            .get(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("Unknown")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityTypeId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (EntityTypeId(i as u32), n.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Running time-in-system statistics, collected after warm-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeInSystem {
    pub count: u64,
    pub total: f64,
    pub max: Option<f64>,
    pub min: Option<f64>,
}

impl TimeInSystem {
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

/// Lazily integrated area under a step function (population over time), only
/// counting the part after warm-up.
#[derive(Debug, Clone, Default, PartialEq)]
struct TimeWeighted {
    area: f64,
    last_update: SimTime,
}

impl TimeWeighted {
    /// Integrate `level` from the last update to `now`, clipped at `warm_up`.
    fn advance(&mut self, level: usize, now: SimTime, warm_up: SimTime) {
        if now > warm_up {
            let start = self.last_update.max(warm_up);
            if now > start {
                self.area += level as f64 * time_to_f64(now - start);
            }
        }
        self.last_update = now;
    }

    fn average(&self, now: SimTime, warm_up: SimTime) -> f64 {
        if now <= warm_up {
            return 0.0;
        }
        self.area / time_to_f64(now - warm_up)
    }
}

/// Per-type population statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeStats {
    /// Created at or after warm-up.
    pub number_created: u64,
    /// Destroyed after warm-up (and created at or after it).
    pub number_destroyed: u64,
    /// Currently alive, regardless of warm-up.
    pub number_remaining: u64,
    pub time_in_system: TimeInSystem,
    population: TimeWeighted,
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Creates, destroys and recycles entities; keeps population statistics.
#[derive(Debug, Clone)]
pub struct EntityManager {
    arena: SlotMap<EntityId, Entity>,
    pools: HashMap<EntityTypeId, Vec<EntityId>>,
    pool_capacity: usize,
    warm_up: SimTime,
    pub types: EntityTypeRegistry,
    /// Arena slots ever allocated (recycled creations do not count).
    allocations: u64,
    /// Ungated lifetime counters, used for conservation checks.
    total_created: u64,
    total_destroyed: u64,
    /// Warm-up gated counters.
    number_created: u64,
    number_destroyed: u64,
    number_in_system: usize,
    time_in_system: TimeInSystem,
    population: TimeWeighted,
    per_type: BTreeMap<EntityTypeId, TypeStats>,
}

impl EntityManager {
    pub fn new(pool_capacity: usize, warm_up: SimTime) -> Self {
        Self {
            arena: SlotMap::with_key(),
            pools: HashMap::new(),
            pool_capacity,
            warm_up,
            types: EntityTypeRegistry::default(),
            allocations: 0,
            total_created: 0,
            total_destroyed: 0,
            number_created: 0,
            number_destroyed: 0,
            number_in_system: 0,
            time_in_system: TimeInSystem::default(),
            population: TimeWeighted::default(),
            per_type: BTreeMap::new(),
        }
    }

    /// Create a fresh or recycled entity of `entity_type`.
    pub fn create(&mut self, entity_type: EntityTypeId, name: String, now: SimTime) -> EntityId {
        self.advance_population(entity_type, now);

        let recycled = self.pools.get_mut(&entity_type).and_then(Vec::pop);
        let id = match recycled {
            Some(id) if self.arena.contains_key(id) => {
                if let Some(entity) = self.arena.get_mut(id) {
                    entity.reset(name, now);
                }
                id
            }
            _ => {
                self.allocations += 1;
                self.arena.insert(Entity::new(name, entity_type, now))
            }
        };

        self.total_created += 1;
        self.number_in_system += 1;
        let stats = self.per_type.entry(entity_type).or_default();
        stats.number_remaining += 1;
        if now >= self.warm_up {
            self.number_created += 1;
            stats.number_created += 1;
        }
        id
    }

    /// Destroy an entity: record time-in-system, then recycle or free it.
    ///
    /// Returns `false` if the id was stale or already destroyed.
    pub fn destroy(&mut self, id: EntityId, now: SimTime) -> bool {
        let Some(entity) = self.arena.get(id) else {
            return false;
        };
        if entity.destruction_time.is_some() {
            return false;
        }
        let entity_type = entity.entity_type;
        let creation_time = entity.creation_time;
        self.advance_population(entity_type, now);

        let destroyed_at = now.max(creation_time);
        let counted = creation_time >= self.warm_up && destroyed_at > self.warm_up;
        let tis = time_to_f64(destroyed_at - creation_time);

        self.total_destroyed += 1;
        self.number_in_system = self.number_in_system.saturating_sub(1);
        let stats = self.per_type.entry(entity_type).or_default();
        stats.number_remaining = stats.number_remaining.saturating_sub(1);
        if counted {
            stats.number_destroyed += 1;
            stats.time_in_system.record(tis);
            self.number_destroyed += 1;
            self.time_in_system.record(tis);
        }

        let pool = self.pools.entry(entity_type).or_default();
        if pool.len() < self.pool_capacity {
            if let Some(entity) = self.arena.get_mut(id) {
                entity.destruction_time = Some(destroyed_at);
            }
            pool.push(id);
        } else {
            self.arena.remove(id);
        }
        true
    }

    fn advance_population(&mut self, entity_type: EntityTypeId, now: SimTime) {
        self.population
            .advance(self.number_in_system, now, self.warm_up);
        let stats = self.per_type.entry(entity_type).or_default();
        stats
            .population
            .advance(stats.number_remaining as usize, now, self.warm_up);
    }

    // -- Accessors ----------------------------------------------------------

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.arena.get(id).filter(|e| e.destruction_time.is_none())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.arena
            .get_mut(id)
            .filter(|e| e.destruction_time.is_none())
    }

    /// Look up an entity even if it has been destroyed and pooled.
    pub fn get_any(&self, id: EntityId) -> Option<&Entity> {
        self.arena.get(id)
    }

    pub fn entity_type_name(&self, id: EntityTypeId) -> &str {
        self.types.name(id)
    }

    pub fn allocated(&self) -> u64 {
        self.allocations
    }

    pub fn pooled(&self, entity_type: EntityTypeId) -> usize {
        self.pools.get(&entity_type).map_or(0, Vec::len)
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    pub fn number_in_system(&self) -> usize {
        self.number_in_system
    }

    pub fn total_created(&self) -> u64 {
        self.total_created
    }

    pub fn total_destroyed(&self) -> u64 {
        self.total_destroyed
    }

    /// Created at or after warm-up.
    pub fn number_created(&self) -> u64 {
        self.number_created
    }

    /// Destroyed after warm-up.
    pub fn number_destroyed(&self) -> u64 {
        self.number_destroyed
    }

    pub fn time_in_system(&self) -> &TimeInSystem {
        &self.time_in_system
    }

    pub fn type_stats(&self, entity_type: EntityTypeId) -> Option<&TypeStats> {
        self.per_type.get(&entity_type)
    }

    pub fn type_stats_iter(&self) -> impl Iterator<Item = (EntityTypeId, &TypeStats)> {
        self.per_type.iter().map(|(k, v)| (*k, v))
    }

    /// Time-weighted average number of entities in the system since warm-up.
    pub fn avg_number_in_system(&self, now: SimTime) -> f64 {
        let mut population = self.population.clone();
        population.advance(self.number_in_system, now, self.warm_up);
        population.average(now, self.warm_up)
    }

    /// Time-weighted average population for every entity type seen.
    pub fn avg_number_per_type(&self, now: SimTime) -> BTreeMap<EntityTypeId, f64> {
        self.per_type
            .iter()
            .map(|(&ty, stats)| {
                let mut population = stats.population.clone();
                population.advance(stats.number_remaining as usize, now, self.warm_up);
                (ty, population.average(now, self.warm_up))
            })
            .collect()
    }

    /// Live entities (not destroyed), in arena order.
    pub fn live(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.arena.iter().filter(|(_, e)| e.destruction_time.is_none())
    }

    /// Drop everything, keeping the type registry and configuration.
    pub fn reset(&mut self) {
        let types = std::mem::take(&mut self.types);
        *self = Self::new(self.pool_capacity, self.warm_up);
        self.types = types;
    }
}
