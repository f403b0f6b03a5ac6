/**
 * @file
 * @brief Delivery queues held by a federate agent. Commands bypass time
 * order, receive-order events drain FIFO, and timestamp-order events
 * drain lowest-time-first with arrival order breaking ties.
 */
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use priority_queue::PriorityQueue;

use crate::federation_time::LogicalTime;
use crate::message::Message;

////////////////  Type definitions

/**
 * Ordering key of one timestamp-order event. The sequence number makes
 * ties drain in arrival order.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TsoRank {
    time: LogicalTime,
    seq: u64,
}

/**
 * The three delivery queues. Timestamp-order events keep their payload
 * in a side table keyed by sequence number; the priority queue orders
 * the keys only.
 */
pub struct MessageQueues {
    commands: VecDeque<Message>,
    fifos: VecDeque<Message>,
    tso_store: HashMap<u64, Message>,
    tso_order: PriorityQueue<u64, Reverse<TsoRank>>,
    next_seq: u64,
}

////////////////  Functions

impl MessageQueues {
    pub fn new() -> MessageQueues {
        MessageQueues {
            commands: VecDeque::new(),
            fifos: VecDeque::new(),
            tso_store: HashMap::new(),
            tso_order: PriorityQueue::new(),
            next_seq: 0,
        }
    }

    pub fn insert_command(&mut self, msg: Message) {
        self.commands.push_back(msg);
    }

    pub fn insert_fifo(&mut self, msg: Message) {
        self.fifos.push_back(msg);
    }

    pub fn insert_tso(&mut self, time: LogicalTime, msg: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tso_store.insert(seq, msg);
        self.tso_order.push(seq, Reverse(TsoRank { time, seq }));
    }

    pub fn take_command(&mut self) -> (Option<Message>, bool) {
        let msg = self.commands.pop_front();
        (msg, !self.commands.is_empty())
    }

    pub fn take_fifo(&mut self) -> (Option<Message>, bool) {
        let msg = self.fifos.pop_front();
        (msg, !self.fifos.is_empty())
    }

    /**
     * Pop the earliest timestamp-order event not later than `bound`.
     * The flag reports whether another eligible event remains under the
     * same bound.
     */
    pub fn take_tso_up_to(&mut self, bound: LogicalTime) -> (Option<Message>, bool) {
        let eligible = match self.tso_order.peek() {
            Some((seq, Reverse(rank))) if rank.time <= bound => *seq,
            _ => return (None, false),
        };
        self.tso_order.pop();
        let msg = self.tso_store.remove(&eligible);
        let more = match self.tso_order.peek() {
            Some((_, Reverse(rank))) => rank.time <= bound,
            None => false,
        };
        (msg, more)
    }

    pub fn peek_next_tso_time(&self) -> Option<LogicalTime> {
        self.tso_order.peek().map(|(_, Reverse(rank))| rank.time)
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn fifo_count(&self) -> usize {
        self.fifos.len()
    }

    pub fn tso_count(&self) -> usize {
        self.tso_order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::MessageKind;

    fn timed_event(tag: &str) -> Message {
        let mut msg = Message::new(MessageKind::TimedEvent);
        msg.set_tag(tag);
        msg
    }

    #[test]
    fn test_tso_ordering_positive() {
        let mut queues = MessageQueues::new();
        queues.insert_tso(LogicalTime::new(5.0), timed_event("late"));
        queues.insert_tso(LogicalTime::new(1.0), timed_event("early"));
        queues.insert_tso(LogicalTime::new(3.0), timed_event("middle"));

        assert_eq!(Some(LogicalTime::new(1.0)), queues.peek_next_tso_time());
        let bound = LogicalTime::new(10.0);
        let (msg, more) = queues.take_tso_up_to(bound);
        assert_eq!("early", msg.unwrap().tag());
        assert!(more);
        let (msg, more) = queues.take_tso_up_to(bound);
        assert_eq!("middle", msg.unwrap().tag());
        assert!(more);
        let (msg, more) = queues.take_tso_up_to(bound);
        assert_eq!("late", msg.unwrap().tag());
        assert!(!more);
        assert_eq!(0, queues.tso_count());
    }

    #[test]
    fn test_tso_bound_negative() {
        let mut queues = MessageQueues::new();
        queues.insert_tso(LogicalTime::new(5.0), timed_event("blocked"));

        let (msg, more) = queues.take_tso_up_to(LogicalTime::new(4.0));
        assert!(msg.is_none());
        assert!(!more);
        assert_eq!(1, queues.tso_count());
        let (msg, _) = queues.take_tso_up_to(LogicalTime::new(5.0));
        assert!(msg.is_some());
    }

    #[test]
    fn test_tso_more_pending_respects_bound_positive() {
        let mut queues = MessageQueues::new();
        queues.insert_tso(LogicalTime::new(1.0), timed_event("eligible"));
        queues.insert_tso(LogicalTime::new(9.0), timed_event("beyond"));

        let (msg, more) = queues.take_tso_up_to(LogicalTime::new(2.0));
        assert_eq!("eligible", msg.unwrap().tag());
        assert!(!more);
        assert_eq!(1, queues.tso_count());
    }

    #[test]
    fn test_tso_tie_breaks_by_arrival_positive() {
        let mut queues = MessageQueues::new();
        let t = LogicalTime::new(2.0);
        queues.insert_tso(t, timed_event("first"));
        queues.insert_tso(t, timed_event("second"));
        queues.insert_tso(t, timed_event("third"));

        let bound = LogicalTime::new(2.0);
        assert_eq!("first", queues.take_tso_up_to(bound).0.unwrap().tag());
        assert_eq!("second", queues.take_tso_up_to(bound).0.unwrap().tag());
        assert_eq!("third", queues.take_tso_up_to(bound).0.unwrap().tag());
    }

    #[test]
    fn test_command_and_fifo_order_positive() {
        let mut queues = MessageQueues::new();
        queues.insert_command(timed_event("c1"));
        queues.insert_command(timed_event("c2"));
        queues.insert_fifo(timed_event("f1"));

        assert_eq!(2, queues.command_count());
        let (msg, more) = queues.take_command();
        assert_eq!("c1", msg.unwrap().tag());
        assert!(more);
        let (msg, more) = queues.take_command();
        assert_eq!("c2", msg.unwrap().tag());
        assert!(!more);
        let (msg, _) = queues.take_command();
        assert!(msg.is_none());
        let (msg, more) = queues.take_fifo();
        assert_eq!("f1", msg.unwrap().tag());
        assert!(!more);
        assert_eq!(0, queues.fifo_count());
    }
}
