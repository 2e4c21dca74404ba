//! In-memory fire-time queue: one entry per schedulable job, ordered by
//! (instant, job id) so simultaneous fires break ties deterministically.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireEntry {
    pub fire_at: DateTime<Utc>,
    pub job_id: Uuid,
}

#[derive(Debug, Default)]
pub struct FireQueue {
    ordered: BTreeSet<(DateTime<Utc>, Uuid)>,
    index: HashMap<Uuid, DateTime<Utc>>,
}

impl FireQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the single entry for a job
    pub fn schedule(&mut self, job_id: Uuid, fire_at: DateTime<Utc>) {
        if let Some(previous) = self.index.insert(job_id, fire_at) {
            self.ordered.remove(&(previous, job_id));
        }
        self.ordered.insert((fire_at, job_id));
    }

    pub fn remove(&mut self, job_id: Uuid) -> bool {
        match self.index.remove(&job_id) {
            Some(fire_at) => self.ordered.remove(&(fire_at, job_id)),
            None => false,
        }
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.index.contains_key(&job_id)
    }

    /// Earliest entry without removing it
    pub fn peek(&self) -> Option<FireEntry> {
        self.ordered.iter().next().map(|&(fire_at, job_id)| FireEntry { fire_at, job_id })
    }

    /// Remove and return every entry due at or before `now`, in fire order
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<FireEntry> {
        let mut due = Vec::new();
        while let Some(entry) = self.peek() {
            if entry.fire_at > now {
                break;
            }
            self.remove(entry.job_id);
            due.push(entry);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(offset_secs)
    }

    #[test]
    fn test_orders_by_instant() {
        let mut queue = FireQueue::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.schedule(a, at(30));
        queue.schedule(b, at(10));
        queue.schedule(c, at(20));

        assert_eq!(queue.peek().unwrap().job_id, b);
        let due = queue.pop_due(at(25));
        assert_eq!(due.iter().map(|e| e.job_id).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_ties_break_on_job_id() {
        let mut queue = FireQueue::new();
        let mut ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for id in ids {
            queue.schedule(id, at(5));
        }
        ids.sort();
        let due = queue.pop_due(at(5));
        assert_eq!(due.iter().map(|e| e.job_id).collect::<Vec<_>>(), ids.to_vec());
    }

    #[test]
    fn test_reschedule_replaces_entry() {
        let mut queue = FireQueue::new();
        let job = Uuid::new_v4();
        queue.schedule(job, at(10));
        queue.schedule(job, at(50));

        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(at(20)).is_empty());
        let due = queue.pop_due(at(60));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].fire_at, at(50));
    }

    #[test]
    fn test_remove() {
        let mut queue = FireQueue::new();
        let job = Uuid::new_v4();
        queue.schedule(job, at(10));
        assert!(queue.remove(job));
        assert!(!queue.remove(job));
        assert!(queue.is_empty());
        assert!(queue.pop_due(at(100)).is_empty());
    }

    #[test]
    fn test_nothing_due_before_fire_time() {
        let mut queue = FireQueue::new();
        queue.schedule(Uuid::new_v4(), at(100));
        assert!(queue.pop_due(at(99)).is_empty());
        assert_eq!(queue.pop_due(at(100)).len(), 1);
    }
}
