// Bounded, stable priority queue of pending requests
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ResourceError, Result};
use crate::pool::models::ProcessingRequest;
use std::collections::{BTreeMap, HashMap};

/// Ordering key: priority first, then submission sequence.
type QueueKey = (i32, u64);

/// Pending requests ordered by `(priority, submission order)`.
///
/// Not synchronized; the resource manager keeps it behind a mutex.
pub struct RequestQueue {
    entries: BTreeMap<QueueKey, ProcessingRequest>,
    index: HashMap<String, QueueKey>,
    next_seq: u64,
    capacity: usize,
    closed: bool,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            capacity,
            closed: false,
        }
    }

    /// Fails fast with `QueueFull` at capacity and `ShutDown` once closed.
    pub fn push(&mut self, request: ProcessingRequest) -> Result<()> {
        if self.closed {
            return Err(ResourceError::ShutDown);
        }
        if self.entries.len() >= self.capacity {
            return Err(ResourceError::QueueFull(self.entries.len()));
        }

        let key = (request.priority, self.next_seq);
        self.next_seq += 1;
        self.index.insert(request.id.clone(), key);
        self.entries.insert(key, request);
        Ok(())
    }

    /// Most urgent request, oldest first within a priority.
    pub fn pop(&mut self) -> Option<ProcessingRequest> {
        let (_, request) = self.entries.pop_first()?;
        self.index.remove(&request.id);
        Some(request)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<ProcessingRequest> {
        let key = self.index.remove(request_id)?;
        self.entries.remove(&key)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.index.contains_key(request_id)
    }

    /// Refuse further pushes.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Remove everything, in dequeue order.
    pub fn drain(&mut self) -> Vec<ProcessingRequest> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn counts_by_priority(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for (priority, _) in self.entries.keys() {
            *counts.entry(*priority).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Metadata;
    use crate::pool::models::CancellationFlag;
    use chrono::Utc;
    use serde_json::Value;

    fn request(id: &str, priority: i32) -> ProcessingRequest {
        ProcessingRequest {
            id: id.to_string(),
            operation_type: "noop".to_string(),
            priority,
            created_at: Utc::now(),
            timeout: None,
            args: Value::Null,
            metadata: Metadata::new(),
            cancel: CancellationFlag::new(),
        }
    }

    fn drain_ids(queue: &mut RequestQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop()).map(|r| r.id).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = RequestQueue::new(10);
        queue.push(request("p5", 5)).unwrap();
        queue.push(request("p1-a", 1)).unwrap();
        queue.push(request("p3", 3)).unwrap();
        queue.push(request("p1-b", 1)).unwrap();
        queue.push(request("neg", -1)).unwrap();

        assert_eq!(drain_ids(&mut queue), vec!["neg", "p1-a", "p1-b", "p3", "p5"]);
    }

    #[test]
    fn test_capacity_rejects() {
        let mut queue = RequestQueue::new(2);
        queue.push(request("a", 0)).unwrap();
        queue.push(request("b", 0)).unwrap();

        assert_eq!(queue.push(request("c", 0)), Err(ResourceError::QueueFull(2)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = RequestQueue::new(10);
        queue.push(request("a", 0)).unwrap();
        queue.push(request("b", 0)).unwrap();

        assert!(queue.remove("a").is_some());
        assert!(queue.remove("a").is_none());
        assert!(!queue.contains("a"));
        assert_eq!(drain_ids(&mut queue), vec!["b"]);
    }

    #[test]
    fn test_closed_queue_refuses() {
        let mut queue = RequestQueue::new(10);
        queue.push(request("a", 0)).unwrap();
        queue.close();

        assert_eq!(queue.push(request("b", 0)), Err(ResourceError::ShutDown));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_counts_by_priority() {
        let mut queue = RequestQueue::new(10);
        queue.push(request("a", 0)).unwrap();
        queue.push(request("b", 2)).unwrap();
        queue.push(request("c", 0)).unwrap();

        let counts = queue.counts_by_priority();
        assert_eq!(counts[&0], 2);
        assert_eq!(counts[&2], 1);
    }
}
