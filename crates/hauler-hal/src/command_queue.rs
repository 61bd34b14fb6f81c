//! Priority-ordered outbound command queue with a short audit trail.
//!
//! Commands pop highest priority first; equal priorities pop in arrival
//! order. Every popped command is copied into a bounded audit ring so the
//! last few actuation intents can be inspected after the fact.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hauler_types::{MotorCommand, RingBuffer};

/// Number of delivered commands retained for inspection.
pub const AUDIT_CAPACITY: usize = 64;

#[derive(Debug)]
struct Queued {
    seq: u64,
    cmd: MotorCommand,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence number first.
        self.cmd
            .priority
            .cmp(&other.cmd.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    audit: RingBuffer<MotorCommand>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            audit: RingBuffer::new(AUDIT_CAPACITY),
        }
    }

    pub fn push(&mut self, cmd: MotorCommand) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued { seq, cmd });
    }

    /// Remove and return the highest-priority command.
    pub fn pop(&mut self) -> Option<MotorCommand> {
        let queued = self.heap.pop()?;
        self.audit.push(queued.cmd.clone());
        Some(queued.cmd)
    }

    pub fn peek_priority(&self) -> Option<u8> {
        self.heap.peek().map(|q| q.cmd.priority)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued command with priority below `min_priority`,
    /// returning how many were discarded.
    pub fn discard_below(&mut self, min_priority: u8) -> usize {
        let before = self.heap.len();
        self.heap.retain(|q| q.cmd.priority >= min_priority);
        before - self.heap.len()
    }

    /// Delivered commands, oldest first.
    pub fn audit(&self) -> Vec<MotorCommand> {
        self.audit.to_vec()
    }
}
