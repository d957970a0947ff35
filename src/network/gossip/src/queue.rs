use crate::GossipMessage;
use axon_core::{AxonError, AxonResult, Priority};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// A message waiting for a dispatch round
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message: GossipMessage,
    pub enqueued_at: DateTime<Utc>,
}

/// Bounded pending queue, FIFO within each priority level
///
/// When full, `low` and `medium` submissions fail with `Backpressure` so
/// the application can decide to drop or retry; `high` and `critical`
/// submissions instead preempt the oldest entry of the lowest waiting
/// priority below their own.
#[derive(Debug)]
pub struct PendingQueue {
    capacity: usize,
    lanes: [VecDeque<PendingMessage>; 4],
    preempted: u64,
    rejected: u64,
}

fn lane_of(priority: Priority) -> usize {
    match priority {
        Priority::Low => 0,
        Priority::Medium => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lanes: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
            preempted: 0,
            rejected: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|lane| lane.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn preempted(&self) -> u64 {
        self.preempted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn push(&mut self, message: GossipMessage) -> AxonResult<()> {
        let lane = lane_of(message.priority);
        if self.is_full() {
            if message.priority >= Priority::High {
                // Preempt the oldest entry from the lowest lane below ours
                let victim_lane = self.lanes[..lane].iter().position(|l| !l.is_empty());
                match victim_lane {
                    Some(victim) => {
                        self.lanes[victim].pop_front();
                        self.preempted += 1;
                    }
                    None => {
                        self.rejected += 1;
                        return Err(AxonError::Backpressure {
                            capacity: self.capacity,
                        });
                    }
                }
            } else {
                self.rejected += 1;
                return Err(AxonError::Backpressure {
                    capacity: self.capacity,
                });
            }
        }
        self.lanes[lane].push_back(PendingMessage {
            message,
            enqueued_at: Utc::now(),
        });
        Ok(())
    }

    /// Drain up to `n` messages, highest priority first, FIFO within
    pub fn pop_batch(&mut self, n: usize) -> Vec<PendingMessage> {
        let mut batch = Vec::with_capacity(n.min(self.len()));
        for lane in self.lanes.iter_mut().rev() {
            while batch.len() < n {
                match lane.pop_front() {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
        }
        batch
    }

    pub fn clear(&mut self) {
        for lane in &mut self.lanes {
            lane.clear();
        }
    }
}
