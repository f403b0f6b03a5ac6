/**
 * @file
 * @brief Per-instance message accounting. Each agent and the executive
 * own one histogram; nothing here is process global.
 */
use std::collections::HashMap;

use crate::message::MessageKind;

////////////////  Type definitions

/**
 * Counts processed messages by kind. `report` lists the nonzero rows,
 * busiest first.
 */
#[derive(Debug, Default)]
pub struct MessageStats {
    counts: HashMap<MessageKind, u64>,
}

////////////////  Functions

impl MessageStats {
    pub fn new() -> MessageStats {
        MessageStats {
            counts: HashMap::new(),
        }
    }

    pub fn record(&mut self, kind: MessageKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: MessageKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn report(&self) -> Vec<(MessageKind, u64)> {
        let mut rows: Vec<(MessageKind, u64)> =
            self.counts.iter().map(|(k, n)| (*k, *n)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_byte().cmp(&b.0.to_byte())));
        rows
    }
}
