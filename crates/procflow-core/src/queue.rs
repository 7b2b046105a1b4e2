//! Input queues of processing components.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::fixed::SimTime;
use crate::id::EntityId;

/// Which end of a queue is served next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDiscipline {
    #[default]
    Fifo,
    Lifo,
}

/// A queued entity and when it joined the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub entity: EntityId,
    pub enqueued_at: SimTime,
    /// Capacity for this entity was reserved before it arrived.
    pub reserved: bool,
}

/// An ordered queue served according to a [`QueueDiscipline`].
#[derive(Debug, Clone, Default)]
pub struct EntityQueue {
    entries: VecDeque<QueueEntry>,
    discipline: QueueDiscipline,
}

impl EntityQueue {
    pub fn new(discipline: QueueDiscipline) -> Self {
        Self {
            entries: VecDeque::new(),
            discipline,
        }
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.discipline
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    /// Put an entry back so it is served next.
    pub fn requeue(&mut self, entry: QueueEntry) {
        match self.discipline {
            QueueDiscipline::Fifo => self.entries.push_front(entry),
            QueueDiscipline::Lifo => self.entries.push_back(entry),
        }
    }

    pub fn peek_next(&self) -> Option<&QueueEntry> {
        match self.discipline {
            QueueDiscipline::Fifo => self.entries.front(),
            QueueDiscipline::Lifo => self.entries.back(),
        }
    }

    pub fn pop_next(&mut self) -> Option<QueueEntry> {
        match self.discipline {
            QueueDiscipline::Fifo => self.entries.pop_front(),
            QueueDiscipline::Lifo => self.entries.pop_back(),
        }
    }

    /// Remove the next entry (in serving order) that matches `pred`.
    pub fn pop_first_matching(&mut self, pred: impl Fn(&QueueEntry) -> bool) -> Option<QueueEntry> {
        let index = match self.discipline {
            QueueDiscipline::Fifo => self.entries.iter().position(pred),
            QueueDiscipline::Lifo => self.entries.iter().rposition(pred),
        }?;
        self.entries.remove(index)
    }

    pub fn count_matching(&self, pred: impl Fn(&QueueEntry) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(e)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::to_time;
    use slotmap::SlotMap;

    fn entries(n: usize) -> Vec<QueueEntry> {
        let mut arena: SlotMap<EntityId, ()> = SlotMap::with_key();
        (0..n)
            .map(|i| QueueEntry {
                entity: arena.insert(()),
                enqueued_at: to_time(i as f64),
                reserved: i == 1,
            })
            .collect()
    }

    #[test]
    fn fifo_and_lifo_serve_opposite_ends() {
        let e = entries(3);
        let mut fifo = EntityQueue::new(QueueDiscipline::Fifo);
        let mut lifo = EntityQueue::new(QueueDiscipline::Lifo);
        for entry in &e {
            fifo.push(*entry);
            lifo.push(*entry);
        }
        assert_eq!(fifo.pop_next(), Some(e[0]));
        assert_eq!(lifo.pop_next(), Some(e[2]));
    }

    #[test]
    fn requeue_is_served_next() {
        let e = entries(3);
        for discipline in [QueueDiscipline::Fifo, QueueDiscipline::Lifo] {
            let mut q = EntityQueue::new(discipline);
            q.push(e[0]);
            q.push(e[1]);
            q.requeue(e[2]);
            assert_eq!(q.pop_next(), Some(e[2]));
        }
    }

    #[test]
    fn pop_first_matching_respects_discipline() {
        let e = entries(3);
        let mut q = EntityQueue::new(QueueDiscipline::Fifo);
        for entry in &e {
            q.push(*entry);
        }
        assert_eq!(q.pop_first_matching(|x| x.reserved), Some(e[1]));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_first_matching(|x| x.reserved), None);
        assert_eq!(q.count_matching(|x| !x.reserved), 2);
    }
}
