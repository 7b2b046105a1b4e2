//! Storage: holds entities in its slots and hands them to consumers that pull
//! from named storage queues.

use std::fmt;

use tracing::trace;

use crate::component::{ComponentKind, ProcessingConfig, ProcessingCore};
use crate::entity::Entity;
use crate::fixed::time_to_f64;
use crate::id::{ComponentId, EntityId, SlotId};
use crate::kernel::{Action, Holder};
use crate::model::Model;
use crate::storage_manager::PendingRelease;

/// Picks the pull queue an entity waits in.
pub type StorageExpression = Box<dyn Fn(&Entity) -> String>;

pub struct StorageConfig {
    /// Hold time before the entity becomes available to consumers.
    pub processing: ProcessingConfig,
    /// Queue used when there is no expression.
    pub queue: String,
    pub expression: Option<StorageExpression>,
}

impl StorageConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            processing: ProcessingConfig::default(),
            queue: queue.into(),
            expression: None,
        }
    }

    pub fn processing(mut self, processing: ProcessingConfig) -> Self {
        self.processing = processing;
        self
    }

    pub fn expression(mut self, f: impl Fn(&Entity) -> String + 'static) -> Self {
        self.expression = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("processing", &self.processing)
            .field("queue", &self.queue)
            .field("expression", &self.expression.is_some())
            .finish()
    }
}

pub struct Storage {
    pub core: ProcessingCore,
    pub queue: String,
    expression: Option<StorageExpression>,
}

impl Storage {
    pub(crate) fn new(core: ProcessingCore, queue: String, expression: Option<StorageExpression>) -> Self {
        Self {
            core,
            queue,
            expression,
        }
    }

    /// The pull queue `entity` waits in.
    pub fn queue_for(&self, entity: &Entity) -> String {
        match &self.expression {
            Some(f) => f(entity),
            None => self.queue.clone(),
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("core", &self.core)
            .field("queue", &self.queue)
            .field("expression", &self.expression.is_some())
            .finish()
    }
}

impl Model {
    /// The hold time is over: park the entity in its pull queue and wake
    /// the consumers waiting there.
    pub(crate) fn deposit(&mut self, id: ComponentId, slot: SlotId, entity: EntityId) {
        let ComponentKind::Storage(storage) = &mut self.components[id].kind else {
            return;
        };
        let Some(e) = self.entities.get(entity) else {
            self.free_slot(id, slot);
            return;
        };
        let queue = storage.queue_for(e);
        if let Some(state) = storage.core.slot_mut(slot) {
            state.blocked = true;
        }
        trace!(component = %self.components[id].name, queue = %queue, "entity deposited in storage");

        let waiters = self.storage.add_to_queue(
            &queue,
            PendingRelease {
                entity,
                holder: Holder::slot(id, slot),
            },
        );
        for waiter in waiters {
            self.scheduler
                .schedule_now(Action::StoragePull(waiter.consumer));
        }
    }

    /// A consumer pulled the entity: record its stay and free the slot.
    pub(crate) fn release_stored(&mut self, holder: Holder) {
        let Some(slot) = holder.slot else {
            return;
        };
        let now = self.scheduler.now();
        let record = self.recording();
        let Some(core) = self.components[holder.component].core_mut() else {
            return;
        };
        if record && let Some(state) = core.slot(slot) {
            let started = state.started;
            let units = state.units;
            core.stats.total_entities_processed += 1;
            core.stats.total_processing_time += time_to_f64(now - started);
            core.stats.units_utilized_over_time.push((
                time_to_f64(started),
                time_to_f64(now),
                units,
            ));
        }
        self.record_exit(holder.component);
        self.free_slot(holder.component, slot);
    }

    /// Pull from this consumer's storage queues into its free capacity.
    ///
    /// A consumer only pulls with an empty input queue and an active
    /// schedule. Queues are tried round-robin; when all are empty the
    /// consumer waits on every one of them.
    pub(crate) fn storage_pull(&mut self, id: ComponentId) {
        let Some(core) = self.components.get(id).and_then(|c| c.core()) else {
            return;
        };
        if core.storage_queues.is_empty() || !core.queue.is_empty() {
            return;
        }
        if !self.schedule_allows(id) {
            return;
        }

        loop {
            let Some(core) = self.components[id].core() else {
                return;
            };
            if !core.has_free_capacity() {
                return;
            }
            let queues = core.storage_queues.clone();
            let cursor = core.storage_cursor;
            let multipool = queues.len() > 1;

            let found = (0..queues.len())
                .map(|k| (cursor + k) % queues.len())
                .find(|&i| !self.storage.is_queue_empty(&queues[i]));
            let Some(i) = found else {
                for name in &queues {
                    self.storage.release_next(name, id, multipool);
                }
                return;
            };
            let Some(pending) = self.storage.release_next(&queues[i], id, multipool) else {
                return;
            };
            if multipool {
                self.storage.remove_from_all_pools(id);
            }
            if let Some(core) = self.components[id].core_mut() {
                core.storage_cursor = (i + 1) % queues.len();
                core.reserve();
            }
            if let Some(e) = self.entities.get_mut(pending.entity) {
                e.capacity_reserved = true;
            }
            trace!(consumer = %self.components[id].name, queue = %queues[i], "pulled from storage");
            self.release_stored(pending.holder);
            self.deliver(pending.entity, id);
        }
    }
}
