/**
 * @file
 * @brief Registry of regulating peer clocks. The minimum entry is the
 * lower bound on the next timestamp the rest of the federation can
 * still produce; an empty registry bounds nothing.
 */
use std::cmp::Reverse;

use priority_queue::PriorityQueue;

use crate::errors::FederationError;
use crate::federation_time::LogicalTime;
use crate::message::FederateHandle;

////////////////  Type definitions

/**
 * One clock per regulating federate, ordered so the minimum is always
 * on top.
 */
#[derive(Debug, Default)]
pub struct RegulatorRegistry {
    clocks: PriorityQueue<FederateHandle, Reverse<LogicalTime>>,
}

////////////////  Functions

impl RegulatorRegistry {
    pub fn new() -> RegulatorRegistry {
        RegulatorRegistry {
            clocks: PriorityQueue::new(),
        }
    }

    pub fn insert(
        &mut self,
        federate: FederateHandle,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        if self.contains(federate) {
            return Err(FederationError::AlreadyRegulating(format!(
                "federate {} is already regulating",
                federate
            )));
        }
        self.clocks.push(federate, Reverse(time));
        Ok(())
    }

    pub fn remove(&mut self, federate: FederateHandle) -> Result<(), FederationError> {
        if self.clocks.remove(&federate).is_none() {
            return Err(FederationError::RtiInternal(format!(
                "federate {} is not regulating",
                federate
            )));
        }
        Ok(())
    }

    /// Replace one clock unconditionally. The federate must be present.
    pub fn update(
        &mut self,
        federate: FederateHandle,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        if !self.contains(federate) {
            return Err(FederationError::RtiInternal(format!(
                "time regulation is not enabled for federate {}",
                federate
            )));
        }
        self.clocks.push(federate, Reverse(time));
        Ok(())
    }

    /// Insert the clock, or replace it when the federate is present.
    pub fn upsert(&mut self, federate: FederateHandle, time: LogicalTime) {
        self.clocks.push(federate, Reverse(time));
    }

    /// Raise every clock that sits below `time` up to it.
    pub fn anonymous_raise(&mut self, time: LogicalTime) {
        for (_, Reverse(clock)) in self.clocks.iter_mut() {
            if *clock < time {
                *clock = time;
            }
        }
    }

    pub fn lower_bound(&self) -> LogicalTime {
        match self.clocks.peek() {
            Some((_, Reverse(clock))) => *clock,
            None => LogicalTime::positive_infinity(),
        }
    }

    pub fn contains(&self, federate: FederateHandle) -> bool {
        self.clocks.get(&federate).is_some()
    }

    pub fn clock_of(&self, federate: FederateHandle) -> Option<LogicalTime> {
        self.clocks.get(&federate).map(|(_, Reverse(clock))| *clock)
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// All entries sorted by handle, for enumeration toward new members.
    pub fn entries(&self) -> Vec<(FederateHandle, LogicalTime)> {
        let mut entries: Vec<(FederateHandle, LogicalTime)> = self
            .clocks
            .iter()
            .map(|(federate, Reverse(clock))| (*federate, *clock))
            .collect();
        entries.sort_by_key(|(federate, _)| *federate);
        entries
    }
}
