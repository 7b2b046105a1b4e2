//! The simulation context: every arena, registry and counter of one run.
//!
//! A [`Model`] is built with the `add_*` and `connect` methods, checked with
//! [`Model::validate`] and run with [`Model::run`]. Configuration errors
//! surface from the builders or from validation, before the first action is
//! processed; the run loop itself cannot fail. A new replication builds a new
//! model.

use std::collections::{BTreeMap, HashMap, HashSet};

use slotmap::SlotMap;
use tracing::{debug, info, trace};

use crate::combiner::{Combiner, CombinerConfig};
use crate::component::{Component, ComponentKind, ProcessingConfig, ProcessingCore};
use crate::config::ModelConfig;
use crate::connection::{ConnectOptions, Connection};
use crate::distribution::Distribution;
use crate::entity::EntityManager;
use crate::fixed::{SimTime, time_to_f64, to_time};
use crate::hooks::{HookError, HookPoint, StateVariables, TriggerContext, run_trigger};
use crate::id::{ComponentId, ConnectionId, EntityId, EntityTypeId, ScheduleId, WorkerPoolId};
use crate::kernel::{Action, Scheduler};
use crate::queue::QueueDiscipline;
use crate::rng::SimRng;
use crate::routing::{
    GroupStrategy, RouteContext, RouteDecision, RoutingError, RoutingGroup, SequenceTable,
    validate_probabilities,
};
use crate::schedule::{DAYS_PER_WEEK, ScheduleError, WorkScheduleDay, WorkScheduleWeek};
use crate::server::{Separator, Server, core_from};
use crate::sink::{Sink, SinkConfig};
use crate::source::{EntityClass, Source, SourceConfig, check_weights};
use crate::storage::{Storage, StorageConfig};
use crate::storage_manager::StorageManager;
use crate::tally::Tallies;
use crate::vehicle::{DEFAULT_VEHICLE_GROUP, Vehicle, VehicleConfig};
use crate::worker::{Worker, WorkerError, WorkerPool};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("a component named '{0}' already exists")]
    DuplicateName(String),
    #[error("unknown component '{0}'")]
    UnknownComponent(String),
    #[error("component id {0:?} is not part of this model")]
    UnknownComponentId(ComponentId),
    #[error("{component} references a worker pool that does not exist")]
    UnknownWorkerPool { component: String },
    #[error("{component} references a schedule that does not exist")]
    UnknownSchedule { component: String },
    #[error("{component} pulls from unknown storage queue '{queue}'")]
    UnknownStorageQueue { component: String, queue: String },
    #[error("unknown vehicle group '{0}'")]
    UnknownVehicleGroup(String),
    #[error("entity class weights of {component} sum to {sum}, expected 1")]
    InvalidEntityWeights { component: String, sum: f64 },
    #[error("warm-up {warm_up} must be before the end of the run {duration}")]
    WarmUpNotBeforeDuration { warm_up: f64, duration: f64 },
    #[error("routing retry delay must be positive and above the clock resolution, got {0}")]
    NonPositiveRetryDelay(f64),
    #[error("{0} has zero capacity")]
    ZeroCapacity(String),
    #[error("{0} does not take entities")]
    NotAcceptingEntities(String),
    #[error("'{0}' is not a source")]
    NotASource(String),
    #[error("'{0}' is not a vehicle")]
    NotAVehicle(String),
}

/// Read a typed component out of the arena.
macro_rules! typed_accessor {
    ($($name:ident => $variant:ident($ty:ty)),* $(,)?) => {$(
        pub fn $name(&self, id: ComponentId) -> Option<&$ty> {
            match &self.components.get(id)?.kind {
                ComponentKind::$variant(c) => Some(c),
                _ => None,
            }
        }
    )*};
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Model {
    pub(crate) config: ModelConfig,
    pub(crate) warm_up: SimTime,
    pub(crate) duration: SimTime,
    pub(crate) scheduler: Scheduler,
    pub(crate) rng: SimRng,
    pub(crate) entities: EntityManager,
    pub(crate) storage: StorageManager,
    pub(crate) components: SlotMap<ComponentId, Component>,
    pub(crate) connections: SlotMap<ConnectionId, Connection>,
    pub(crate) pools: SlotMap<WorkerPoolId, WorkerPool>,
    pub(crate) schedules: SlotMap<ScheduleId, WorkScheduleWeek>,
    pub(crate) names: HashMap<String, ComponentId>,
    pub(crate) routing_groups: HashMap<String, RoutingGroup>,
    pub(crate) vehicle_groups: BTreeMap<String, Vec<ComponentId>>,
    pub(crate) sequence_table: SequenceTable,
    /// Processing times by `(component, entity type)` that apply when the
    /// component has no per-type time of its own.
    pub(crate) processing_overrides: HashMap<(ComponentId, EntityTypeId), Distribution>,
    pub(crate) state: StateVariables,
    pub(crate) tallies: Tallies,
    pub(crate) drain_pending: HashSet<ComponentId>,
    /// Sinks whose retrigger source is resolved by name at validation.
    retriggers: Vec<(ComponentId, String)>,
    primed: bool,
    events_processed: u64,
}

impl Model {
    pub fn new(config: ModelConfig) -> Self {
        let warm_up = to_time(config.warm_up);
        Self {
            warm_up,
            duration: to_time(config.duration),
            scheduler: Scheduler::new(),
            rng: SimRng::new(config.seed),
            entities: EntityManager::new(config.entity_pool_size, warm_up),
            storage: StorageManager::new(),
            components: SlotMap::with_key(),
            connections: SlotMap::with_key(),
            pools: SlotMap::with_key(),
            schedules: SlotMap::with_key(),
            names: HashMap::new(),
            routing_groups: HashMap::new(),
            vehicle_groups: BTreeMap::new(),
            sequence_table: SequenceTable::default(),
            processing_overrides: HashMap::new(),
            state: StateVariables::default(),
            tallies: Tallies::default(),
            drain_pending: HashSet::new(),
            retriggers: Vec::new(),
            primed: false,
            events_processed: 0,
            config,
        }
    }

    /// Statistics are being collected.
    pub(crate) fn recording(&self) -> bool {
        self.scheduler.now() >= self.warm_up
    }

    /// Run the hook at `point` of component `id`. Returns `false` on a veto.
    pub(crate) fn run_hook(
        &mut self,
        id: ComponentId,
        point: HookPoint,
        entity: Option<EntityId>,
        processing_time: Option<f64>,
    ) -> bool {
        let Some(mut trigger) = self.components.get_mut(id).and_then(|c| c.hooks.take(point)) else {
            return true;
        };
        let proceed = {
            let mut ctx = TriggerContext {
                now: self.scheduler.now(),
                component: &self.components[id].name,
                entity: entity.and_then(|e| self.entities.get_mut(e)),
                state: &mut self.state,
                rng: &mut self.rng,
                processing_time,
            };
            run_trigger(Some(&mut trigger), &mut ctx)
        };
        self.components[id].hooks.restore(point, Some(trigger));
        proceed
    }

    // -- Building -----------------------------------------------------------

    fn check_name(&self, name: &str) -> Result<(), ModelError> {
        if self.names.contains_key(name) || self.routing_groups.contains_key(name) {
            return Err(ModelError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, component: Component) -> ComponentId {
        let name = component.name.clone();
        let component_type = component.component_type();
        let id = self.components.insert(component);
        self.names.insert(name.clone(), id);
        debug!(component = %name, kind = %component_type, "component added");
        id
    }

    fn name_of(&self, id: ComponentId) -> Result<&str, ModelError> {
        self.components
            .get(id)
            .map(|c| c.name.as_str())
            .ok_or(ModelError::UnknownComponentId(id))
    }

    /// Check a processing config and build its core.
    fn processing_core(&mut self, name: &str, config: &ProcessingConfig) -> Result<ProcessingCore, ModelError> {
        self.check_name(name)?;
        if config.capacity == 0 {
            return Err(ModelError::ZeroCapacity(name.to_string()));
        }
        if let Some(schedule) = config.schedule
            && !self.schedules.contains_key(schedule)
        {
            return Err(ModelError::UnknownSchedule {
                component: name.to_string(),
            });
        }
        if let Some(pool) = config.worker_pool {
            let pool = self.pools.get(pool).ok_or_else(|| ModelError::UnknownWorkerPool {
                component: name.to_string(),
            })?;
            if config.workers_required > pool.roster_len() {
                return Err(WorkerError::InsufficientRoster {
                    pool: pool.name.clone(),
                    required: config.workers_required,
                    roster: pool.roster_len(),
                }
                .into());
            }
        }
        let mut core = core_from(config);
        for (entity_type, d) in &config.processing_time_by_type {
            let ty = self.entities.types.intern(entity_type);
            core.processing_time_by_type.insert(ty, d.clone());
        }
        Ok(core)
    }

    fn add_processing(
        &mut self,
        name: &str,
        config: &ProcessingConfig,
        kind: impl FnOnce(ProcessingCore) -> ComponentKind,
    ) -> Result<ComponentId, ModelError> {
        let core = self.processing_core(name, config)?;
        let mut component = Component::new(name.to_string(), kind(core));
        component.router.sequence_routing = config.sequence_routing;
        component.router.vehicle_group = config.vehicle_group.clone();
        Ok(self.insert(component))
    }

    pub fn add_source(&mut self, name: &str, config: SourceConfig) -> Result<ComponentId, ModelError> {
        self.check_name(name)?;
        let class_types = match &config.entity_class {
            EntityClass::Fixed(entity_type) => vec![(self.entities.types.intern(entity_type), 1.0)],
            EntityClass::FromTable => Vec::new(),
            EntityClass::Weighted(weights) => {
                check_weights(weights).map_err(|sum| ModelError::InvalidEntityWeights {
                    component: name.to_string(),
                    sum,
                })?;
                weights
                    .iter()
                    .map(|(entity_type, w)| (self.entities.types.intern(entity_type), *w))
                    .collect()
            }
        };
        let source = Source::new(&config, class_types);
        let mut component = Component::new(name.to_string(), ComponentKind::Source(source));
        component.router.sequence_routing = config.sequence_routing;
        component.router.vehicle_group = config.vehicle_group;
        Ok(self.insert(component))
    }

    pub fn add_server(&mut self, name: &str, config: ProcessingConfig) -> Result<ComponentId, ModelError> {
        self.add_processing(name, &config, |core| ComponentKind::Server(Server::new(core)))
    }

    pub fn add_separator(&mut self, name: &str, config: ProcessingConfig) -> Result<ComponentId, ModelError> {
        self.add_processing(name, &config, |core| {
            ComponentKind::Separator(Separator::new(core))
        })
    }

    pub fn add_combiner(&mut self, name: &str, config: CombinerConfig) -> Result<ComponentId, ModelError> {
        let rules: Vec<(EntityTypeId, usize)> = config
            .rules
            .iter()
            .map(|r| (self.entities.types.intern(&r.entity_type), r.count))
            .collect();
        let members_to_combine = config.members_to_combine;
        let discipline = config.member_discipline;
        self.add_processing(name, &config.processing, |core| {
            ComponentKind::Combiner(Combiner::new(core, rules, members_to_combine, discipline))
        })
    }

    pub fn add_storage(&mut self, name: &str, config: StorageConfig) -> Result<ComponentId, ModelError> {
        if !self.storage.has_queue(&config.queue) {
            self.storage.add_queue(&config.queue, QueueDiscipline::Fifo);
        }
        let StorageConfig {
            processing,
            queue,
            expression,
        } = config;
        self.add_processing(name, &processing, |core| {
            ComponentKind::Storage(Storage::new(core, queue, expression))
        })
    }

    /// Add a sink. A retrigger source may be added later; it is resolved by
    /// name during validation.
    pub fn add_sink(&mut self, name: &str, config: SinkConfig) -> Result<ComponentId, ModelError> {
        let tally_name = config.tally_name.clone();
        let id = self.add_processing(name, &config.processing, |core| {
            ComponentKind::Sink(Sink::new(core, None, tally_name))
        })?;
        if let Some(source) = config.retrigger_source {
            self.retriggers.push((id, source));
        }
        Ok(id)
    }

    /// Add a vehicle to its group (the default group when none is given).
    pub fn add_vehicle(&mut self, name: &str, config: VehicleConfig) -> Result<ComponentId, ModelError> {
        self.check_name(name)?;
        let group = config
            .group
            .clone()
            .unwrap_or_else(|| DEFAULT_VEHICLE_GROUP.to_string());
        let id = self.insert(Component::new(
            name.to_string(),
            ComponentKind::Vehicle(Vehicle::new(&config)),
        ));
        self.vehicle_groups.entry(group).or_default().push(id);
        Ok(id)
    }

    /// Add vehicles to a named group, creating it if needed.
    pub fn add_vehicle_group(&mut self, name: &str, vehicles: &[ComponentId]) -> Result<(), ModelError> {
        for &v in vehicles {
            let component = self
                .components
                .get(v)
                .ok_or(ModelError::UnknownComponentId(v))?;
            if !matches!(component.kind, ComponentKind::Vehicle(_)) {
                return Err(ModelError::NotAVehicle(component.name.clone()));
            }
        }
        let group = self.vehicle_groups.entry(name.to_string()).or_default();
        for &v in vehicles {
            if !group.contains(&v) {
                group.push(v);
            }
        }
        Ok(())
    }

    /// A weekly schedule, Monday first, aligned to the configured start.
    pub fn add_schedule(&mut self, days: [WorkScheduleDay; DAYS_PER_WEEK]) -> Result<ScheduleId, ModelError> {
        let week = WorkScheduleWeek::new(days, self.config.time_unit, self.config.start_offset())?;
        Ok(self.schedules.insert(week))
    }

    /// The same shifts every day of the week.
    pub fn add_daily_schedule(&mut self, day: WorkScheduleDay) -> Result<ScheduleId, ModelError> {
        self.add_schedule(std::array::from_fn(|_| day.clone()))
    }

    pub fn add_worker_pool(
        &mut self,
        name: &str,
        schedule: ScheduleId,
        roster: Option<Vec<Worker>>,
    ) -> Result<WorkerPoolId, ModelError> {
        let week = self
            .schedules
            .get(schedule)
            .cloned()
            .ok_or_else(|| ModelError::UnknownSchedule {
                component: name.to_string(),
            })?;
        let pool = WorkerPool::new(name, week, roster)?;
        debug!(pool = name, roster = pool.roster_len(), "worker pool added");
        Ok(self.pools.insert(pool))
    }

    pub fn add_storage_queue(&mut self, name: &str, discipline: QueueDiscipline) {
        self.storage.add_queue(name, discipline);
    }

    pub fn add_routing_group(
        &mut self,
        name: &str,
        members: &[ComponentId],
        strategy: GroupStrategy,
    ) -> Result<(), ModelError> {
        self.check_name(name)?;
        if members.is_empty() {
            return Err(RoutingError::EmptyGroup(name.to_string()).into());
        }
        for &m in members {
            let component = self
                .components
                .get(m)
                .ok_or(ModelError::UnknownComponentId(m))?;
            if !component.kind.accepts_entities() {
                return Err(ModelError::NotAcceptingEntities(component.name.clone()));
            }
        }
        self.routing_groups.insert(
            name.to_string(),
            RoutingGroup {
                members: members.to_vec(),
                strategy,
            },
        );
        Ok(())
    }

    /// Connect `origin` to `target`. Connecting an existing pair again
    /// replaces its options.
    pub fn connect(
        &mut self,
        origin: ComponentId,
        target: ComponentId,
        options: ConnectOptions,
    ) -> Result<ConnectionId, ModelError> {
        let origin_name = self.name_of(origin)?.to_string();
        let target_name = self.name_of(target)?.to_string();
        if !self.components[target].kind.accepts_entities() {
            return Err(ModelError::NotAcceptingEntities(target_name));
        }
        let entity_type = options
            .entity_type
            .as_deref()
            .map(|t| self.entities.types.intern(t));

        let existing = self.components[origin]
            .router
            .connections
            .iter()
            .copied()
            .find(|&c| self.connections[c].target == target);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.connections.insert(Connection::new(
                    format!("{origin_name}->{target_name}"),
                    origin,
                    target,
                ));
                self.components[origin].router.connections.push(id);
                id
            }
        };
        let conn = &mut self.connections[id];
        conn.probability = options.probability;
        conn.transit_delay = options.transit_delay;
        conn.entity_type = entity_type;
        conn.vehicle_group = options.vehicle_group;

        let probabilities = self.probabilities(origin);
        self.components[origin].router.rebuild_cache(&probabilities);
        Ok(id)
    }

    fn probabilities(&self, id: ComponentId) -> Vec<Option<f64>> {
        self.components[id]
            .router
            .connections
            .iter()
            .map(|&c| self.connections[c].probability)
            .collect()
    }

    pub fn set_sequence_table(&mut self, table: SequenceTable) {
        self.sequence_table = table;
    }

    pub fn set_route_fn(
        &mut self,
        component: ComponentId,
        f: impl FnMut(&mut RouteContext<'_>) -> RouteDecision + 'static,
    ) -> Result<(), ModelError> {
        let c = self
            .components
            .get_mut(component)
            .ok_or(ModelError::UnknownComponentId(component))?;
        c.router.route_fn = Some(Box::new(f));
        Ok(())
    }

    /// Processing time of `entity_type` at `component`, used unless the
    /// component has its own time for that type.
    pub fn set_processing_time_override(
        &mut self,
        component: ComponentId,
        entity_type: &str,
        d: Distribution,
    ) -> Result<(), ModelError> {
        self.name_of(component)?;
        let ty = self.entities.types.intern(entity_type);
        self.processing_overrides.insert((component, ty), d);
        Ok(())
    }

    pub fn set_hook(
        &mut self,
        component: ComponentId,
        point: HookPoint,
        trigger: impl FnMut(&mut TriggerContext<'_>) -> Result<bool, HookError> + 'static,
    ) -> Result<(), ModelError> {
        let c = self
            .components
            .get_mut(component)
            .ok_or(ModelError::UnknownComponentId(component))?;
        *c.hooks.slot_mut(point) = Some(Box::new(trigger));
        Ok(())
    }

    pub fn state_mut(&mut self) -> &mut StateVariables {
        &mut self.state
    }

    // -- Validation ---------------------------------------------------------

    /// Check the topology. Called by [`run`](Self::run); calling it again is
    /// harmless.
    pub fn validate(&mut self) -> Result<(), ModelError> {
        if self.config.warm_up >= self.config.duration {
            return Err(ModelError::WarmUpNotBeforeDuration {
                warm_up: self.config.warm_up,
                duration: self.config.duration,
            });
        }
        let retry_delay = self.config.routing_retry_delay;
        if to_time(retry_delay) == SimTime::ZERO {
            return Err(ModelError::NonPositiveRetryDelay(retry_delay));
        }

        for (id, component) in &self.components {
            validate_probabilities(&component.name, &self.probabilities(id))?;
            let router = &component.router;
            if router.sequence_routing && router.route_fn.is_some() {
                return Err(RoutingError::SequenceWithCustomRouter(component.name.clone()).into());
            }
            let groups = router.vehicle_group.iter().chain(
                router
                    .connections
                    .iter()
                    .filter_map(|&c| self.connections[c].vehicle_group.as_ref()),
            );
            for group in groups {
                if self.vehicle_groups.get(group).is_none_or(Vec::is_empty) {
                    return Err(ModelError::UnknownVehicleGroup(group.clone()));
                }
            }
            if let Some(core) = component.core() {
                for queue in &core.storage_queues {
                    if !self.storage.has_queue(queue) {
                        return Err(ModelError::UnknownStorageQueue {
                            component: component.name.clone(),
                            queue: queue.clone(),
                        });
                    }
                }
            }
        }

        for target in self.sequence_table.iter() {
            let known = self.routing_groups.contains_key(target)
                || self
                    .names
                    .get(target)
                    .is_some_and(|&id| self.components[id].kind.accepts_entities());
            if !known {
                return Err(RoutingError::UnknownTarget(target.to_string()).into());
            }
        }

        for (sink, source_name) in &self.retriggers {
            let source = self
                .names
                .get(source_name)
                .copied()
                .ok_or_else(|| ModelError::UnknownComponent(source_name.clone()))?;
            if !matches!(self.components[source].kind, ComponentKind::Source(_)) {
                return Err(ModelError::NotASource(source_name.clone()));
            }
            if let ComponentKind::Sink(s) = &mut self.components[*sink].kind {
                s.retrigger_source = Some(source);
            }
        }
        Ok(())
    }

    // -- Running ------------------------------------------------------------

    /// Validate, then run to the configured duration.
    pub fn run(&mut self) -> Result<(), ModelError> {
        self.run_until(self.duration)
    }

    /// Process actions up to `until` (capped at the configured duration).
    /// Can be called repeatedly to advance a run in steps.
    pub fn run_until(&mut self, until: SimTime) -> Result<(), ModelError> {
        self.ensure_primed()?;
        let until = until.min(self.duration);
        while let Some(t) = self.scheduler.peek_time() {
            if t > until {
                break;
            }
            let Some((_, action)) = self.scheduler.pop_next() else {
                break;
            };
            self.events_processed += 1;
            self.execute(action);
        }
        self.scheduler.advance_to(until);
        if until >= self.duration {
            info!(
                time = %self.scheduler.now(),
                events = self.events_processed,
                in_system = self.entities.number_in_system(),
                "run finished"
            );
        }
        Ok(())
    }

    /// Process the next action. Returns `false` once nothing is left before
    /// the end of the run.
    pub fn step(&mut self) -> Result<bool, ModelError> {
        self.ensure_primed()?;
        if self.scheduler.peek_time().is_none_or(|t| t > self.duration) {
            return Ok(false);
        }
        if let Some((_, action)) = self.scheduler.pop_next() {
            self.events_processed += 1;
            self.execute(action);
        }
        Ok(true)
    }

    fn ensure_primed(&mut self) -> Result<(), ModelError> {
        if !self.primed {
            self.validate()?;
            self.prime();
        }
        Ok(())
    }

    /// Start worker pools, sources and storage consumers.
    fn prime(&mut self) {
        self.primed = true;
        info!(
            components = self.components.len(),
            duration = self.config.duration,
            warm_up = self.config.warm_up,
            seed = self.config.seed,
            "run started"
        );
        let pools: Vec<WorkerPoolId> = self.pools.keys().collect();
        for pool in pools {
            self.recompute_pool(pool);
        }
        let sources: Vec<ComponentId> = self
            .components
            .iter()
            .filter(|(_, c)| matches!(c.kind, ComponentKind::Source(_)))
            .map(|(id, _)| id)
            .collect();
        for id in sources {
            self.start_source(id);
        }
        let consumers: Vec<ComponentId> = self
            .components
            .iter()
            .filter(|(_, c)| c.core().is_some_and(|core| !core.storage_queues.is_empty()))
            .map(|(id, _)| id)
            .collect();
        for id in consumers {
            self.scheduler.schedule_now(Action::StoragePull(id));
        }
    }

    fn execute(&mut self, action: Action) {
        trace!(time = %self.scheduler.now(), action = ?action, "resume");
        match action {
            Action::SourceArrival(id) => self.source_arrival(id),
            Action::CreateSingle(id) => self.create_single(id),
            Action::Drain(id) => self.drain(id),
            Action::ProcessingDone { component, slot } => self.processing_done(component, slot),
            Action::BreakdownBegin { component, slot } => self.breakdown_begin(component, slot),
            Action::BreakdownEnd { component, slot } => self.breakdown_end(component, slot),
            Action::ScheduleRecheck(id) => self.schedule_recheck(id),
            Action::StoragePull(id) => self.storage_pull(id),
            Action::WorkerPoolRecompute(pool) => self.recompute_pool(pool),
            Action::RoutingRetry { holder, entity } => self.routing_retry(holder, entity),
            Action::ConnectionDeliver(conn) => self.connection_deliver(conn),
            Action::TripDone { vehicle, trip } => self.trip_done(vehicle, trip),
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn warm_up(&self) -> SimTime {
        self.warm_up
    }

    pub fn duration(&self) -> SimTime {
        self.duration
    }

    /// Steps of statistics collection so far (`now - warm_up`).
    pub fn observed_time(&self) -> f64 {
        time_to_f64(self.scheduler.now().saturating_sub(self.warm_up))
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn pending_actions(&self) -> usize {
        self.scheduler.len()
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.names.get(name).copied()
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &Component)> {
        self.components.iter()
    }

    typed_accessor! {
        source => Source(Source),
        server => Server(Server),
        separator => Separator(Separator),
        combiner => Combiner(Combiner),
        storage => Storage(Storage),
        sink => Sink(Sink),
        vehicle => Vehicle(Vehicle),
    }

    pub fn worker_pool(&self, id: WorkerPoolId) -> Option<&WorkerPool> {
        self.pools.get(id)
    }

    pub fn worker_pools(&self) -> impl Iterator<Item = (WorkerPoolId, &WorkerPool)> {
        self.pools.iter()
    }

    pub fn schedule(&self, id: ScheduleId) -> Option<&WorkScheduleWeek> {
        self.schedules.get(id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.connections.iter()
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn entity_type(&self, name: &str) -> Option<EntityTypeId> {
        self.entities.types.get(name)
    }

    pub fn storage_manager(&self) -> &StorageManager {
        &self.storage
    }

    pub fn routing_group(&self, name: &str) -> Option<&RoutingGroup> {
        self.routing_groups.get(name)
    }

    pub fn vehicle_group(&self, name: &str) -> Option<&[ComponentId]> {
        self.vehicle_groups.get(name).map(Vec::as_slice)
    }

    pub fn sequence_table(&self) -> &SequenceTable {
        &self.sequence_table
    }

    pub fn state(&self) -> &StateVariables {
        &self.state
    }

    pub fn tallies(&self) -> &Tallies {
        &self.tallies
    }

    pub fn record_tally(&mut self, name: &str, value: f64) {
        self.tallies.record(name, value);
    }

    /// Zero every component, pool and connection counter and the tallies.
    /// Queues, slots and entities are kept.
    pub fn reset_stats(&mut self) {
        for component in self.components.values_mut() {
            component.reset_stats();
        }
        for pool in self.pools.values_mut() {
            pool.reset_stats();
        }
        for conn in self.connections.values_mut() {
            conn.stats = Default::default();
        }
        self.tallies.clear();
    }
}
