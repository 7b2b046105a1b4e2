//! Named pull queues that connect producers and consumers outside of push
//! routing.
//!
//! A storage component deposits a [`PendingRelease`] under a queue name; a
//! consumer with spare capacity asks for the next one. Whichever side shows up
//! first waits. For any name, the pending list and the waiting list are never
//! both non-empty once an operation returns.

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::id::{ComponentId, EntityId};
use crate::kernel::Holder;
use crate::queue::QueueDiscipline;

/// An entity parked in a storage slot, waiting for a consumer to pull it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRelease {
    pub entity: EntityId,
    /// The storage slot that keeps the entity until it is pulled.
    pub holder: Holder,
}

/// A consumer waiting on one or more queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub consumer: ComponentId,
    /// Registered on several queues at once.
    pub multipool: bool,
}

#[derive(Debug, Clone, Default)]
struct PullQueue {
    discipline: QueueDiscipline,
    pending: VecDeque<PendingRelease>,
    waiting: Vec<Waiter>,
}

/// Registry of named pull queues. One per model.
#[derive(Debug, Clone, Default)]
pub struct StorageManager {
    queues: BTreeMap<String, PullQueue>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a queue (or change its discipline). Queues are also created
    /// on first use with FIFO order.
    pub fn add_queue(&mut self, name: &str, discipline: QueueDiscipline) {
        self.queues.entry(name.to_string()).or_default().discipline = discipline;
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Deposit an entity. Returns every consumer that was waiting on `name`;
    /// multipool consumers are taken off their other queues too. The caller
    /// gives each of them a chance to pull.
    pub fn add_to_queue(&mut self, name: &str, release: PendingRelease) -> Vec<Waiter> {
        let queue = self.queues.entry(name.to_string()).or_default();
        queue.pending.push_back(release);
        let waiters = std::mem::take(&mut queue.waiting);
        for waiter in waiters.iter().filter(|w| w.multipool) {
            self.remove_from_all_pools(waiter.consumer);
        }
        trace!(queue = name, woken = waiters.len(), "entity deposited");
        waiters
    }

    /// Take the next pending entity for `consumer`, or register it as
    /// waiting when there is none.
    pub fn release_next(
        &mut self,
        name: &str,
        consumer: ComponentId,
        multipool: bool,
    ) -> Option<PendingRelease> {
        let queue = self.queues.entry(name.to_string()).or_default();
        let next = match queue.discipline {
            QueueDiscipline::Fifo => queue.pending.pop_front(),
            QueueDiscipline::Lifo => queue.pending.pop_back(),
        };
        match next {
            Some(release) => {
                queue.waiting.retain(|w| w.consumer != consumer);
                Some(release)
            }
            None => {
                if !queue.waiting.iter().any(|w| w.consumer == consumer) {
                    queue.waiting.push(Waiter { consumer, multipool });
                }
                None
            }
        }
    }

    pub fn remove_from_pool(&mut self, name: &str, consumer: ComponentId) {
        if let Some(queue) = self.queues.get_mut(name) {
            queue.waiting.retain(|w| w.consumer != consumer);
        }
    }

    pub fn remove_from_all_pools(&mut self, consumer: ComponentId) {
        for queue in self.queues.values_mut() {
            queue.waiting.retain(|w| w.consumer != consumer);
        }
    }

    pub fn is_queue_empty(&self, name: &str) -> bool {
        self.queue_len(name) == 0
    }

    pub fn queue_len(&self, name: &str) -> usize {
        self.queues.get(name).map_or(0, |q| q.pending.len())
    }

    pub fn waiting_len(&self, name: &str) -> usize {
        self.queues.get(name).map_or(0, |q| q.waiting.len())
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// Empty every queue, keeping names and disciplines.
    pub fn reset(&mut self) {
        for queue in self.queues.values_mut() {
            queue.pending.clear();
            queue.waiting.clear();
        }
    }

    /// Pending and waiting lists are never both non-empty.
    pub fn is_consistent(&self) -> bool {
        self.queues
            .values()
            .all(|q| q.pending.is_empty() || q.waiting.is_empty())
    }
}
