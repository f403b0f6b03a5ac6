/**
 * @file
 * @brief Federate-side time management: advance requests, conservative
 * grant computation against the federation lower bound, NULL and NULL
 * PRIME emission with duplicate suppression, and the delivery loop.
 *
 * One manager runs per joined federate. Messages leave through two
 * sinks: the executive link carries protocol traffic, the federate
 * sink carries callbacks and delivered events.
 */
use tracing::{debug, trace};

use crate::errors::FederationError;
use crate::federation_time::{LogicalTime, Lookahead};
use crate::lbts::RegulatorRegistry;
use crate::message::{
    FederateHandle, FederationHandle, Message, MessageKind, MessageSink, ANONYMOUS_FEDERATE,
};
use crate::queues::MessageQueues;
use crate::stats::MessageStats;

////////////////  Type definitions

/// The pending advance request, if any.
#[derive(Clone, Copy, Debug, PartialEq)]
enum AdvanceState {
    Idle,
    Tar { requested: LogicalTime },
    Tara { requested: LogicalTime },
    Ner { requested: LogicalTime },
    Nera { requested: LogicalTime },
}

/**
 * How the last grant was reached. Decides whether outgoing event times
 * are checked strictly or against current time plus lookahead.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
enum GrantedState {
    AfterTarOrNer,
    AfterTarOrNerWithZeroLookahead,
    AfterTaraOrNera,
}

pub struct TimeManager {
    federation: FederationHandle,
    federate: FederateHandle,
    queues: MessageQueues,
    peers: RegulatorRegistry,
    state: AdvanceState,
    granted_state: GrantedState,
    current_time: LogicalTime,
    lookahead: Lookahead,
    regulating: bool,
    constrained: bool,
    async_delivery: bool,
    null_prime_enabled: bool,
    anonymous_update_received: bool,
    last_null_time: LogicalTime,
    last_null_prime_time: LogicalTime,
    executive: Box<dyn MessageSink>,
    federate_sink: Box<dyn MessageSink>,
    stats: MessageStats,
}

////////////////  Functions

impl TimeManager {
    pub fn new(
        federation: FederationHandle,
        federate: FederateHandle,
        executive: Box<dyn MessageSink>,
        federate_sink: Box<dyn MessageSink>,
    ) -> TimeManager {
        TimeManager {
            federation,
            federate,
            queues: MessageQueues::new(),
            peers: RegulatorRegistry::new(),
            state: AdvanceState::Idle,
            granted_state: GrantedState::AfterTarOrNer,
            current_time: LogicalTime::zero(),
            lookahead: Lookahead::zero(),
            regulating: false,
            constrained: false,
            async_delivery: false,
            null_prime_enabled: true,
            anonymous_update_received: false,
            last_null_time: LogicalTime::zero(),
            last_null_prime_time: LogicalTime::zero(),
            executive,
            federate_sink,
            stats: MessageStats::new(),
        }
    }

    pub fn current_time(&self) -> LogicalTime {
        self.current_time
    }

    /// The declared lookahead; the internal epsilon stands in for zero.
    pub fn lookahead(&self) -> Lookahead {
        if self.lookahead.is_epsilon() {
            Lookahead::zero()
        } else {
            self.lookahead
        }
    }

    pub fn is_regulating(&self) -> bool {
        self.regulating
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    pub fn is_advancing(&self) -> bool {
        self.state != AdvanceState::Idle
    }

    pub fn set_async_delivery(&mut self, on: bool) {
        self.async_delivery = on;
    }

    pub fn set_null_prime_enabled(&mut self, on: bool) {
        self.null_prime_enabled = on;
    }

    pub fn stats(&self) -> &MessageStats {
        &self.stats
    }

    pub fn pending_commands(&self) -> usize {
        self.queues.command_count()
    }

    pub fn pending_fifos(&self) -> usize {
        self.queues.fifo_count()
    }

    pub fn pending_tso(&self) -> usize {
        self.queues.tso_count()
    }

    /// Greatest time the federation guarantees not to undercut.
    pub fn lbts(&self) -> LogicalTime {
        self.peers.lower_bound()
    }

    /// The lower bound, capped by the earliest queued timestamped event.
    pub fn min_next_event_time(&self) -> LogicalTime {
        let lbts = self.peers.lower_bound();
        match self.queues.peek_next_tso_time() {
            Some(tso) => lbts.min(tso),
            None => lbts,
        }
    }

    ////////////////  Incoming traffic

    /**
     * A peer clock from the executive. The anonymous handle raises
     * every peer entry below the reported floor; a named entry is
     * inserted or replaced. Clock messages are never queued.
     */
    pub fn update(&mut self, federate: FederateHandle, time: LogicalTime) {
        if federate == ANONYMOUS_FEDERATE {
            self.peers.anonymous_raise(time);
            self.anonymous_update_received = true;
        } else {
            self.peers.upsert(federate, time);
        }
    }

    /// A regulator joined or left the federation.
    pub fn note_regulator(&mut self, federate: FederateHandle, on: bool, time: Option<LogicalTime>) {
        if federate == self.federate {
            return;
        }
        if on {
            self.peers.upsert(federate, time.unwrap_or_else(LogicalTime::zero));
        } else if self.peers.contains(federate) {
            let _ = self.peers.remove(federate);
        }
    }

    /**
     * Queue a message for delivery. Callbacks jump the line; events
     * with a timestamp wait their turn in timestamp order while the
     * federate is constrained.
     */
    pub fn enqueue(&mut self, msg: Message) {
        if msg.kind().is_immediate_callback() {
            self.queues.insert_command(msg);
        } else if self.constrained {
            match msg.date() {
                Some(date) => self.queues.insert_tso(date, msg),
                None => self.queues.insert_fifo(msg),
            }
        } else {
            self.queues.insert_fifo(msg);
        }
    }

    ////////////////  Role switches

    pub fn set_time_regulating(&mut self, on: bool) -> Result<(), FederationError> {
        if self.state != AdvanceState::Idle {
            return Err(FederationError::RtiInternal(String::from(
                "cannot change time regulation while an advance is pending",
            )));
        }
        if on {
            if self.regulating {
                return Err(FederationError::RtiInternal(String::from(
                    "time regulation is already enabled",
                )));
            }
            self.regulating = true;
            let mut msg = Message::new(MessageKind::SetTimeRegulating);
            msg.set_federation(self.federation);
            msg.set_federate(self.federate);
            msg.set_on(true);
            msg.set_date(self.current_time + self.lookahead);
            self.executive.send(&msg)?;
            self.stats.record(MessageKind::SetTimeRegulating);

            let mut callback = Message::new(MessageKind::TimeRegulationEnabled);
            callback.set_federation(self.federation);
            callback.set_federate(self.federate);
            callback.set_date(self.current_time);
            self.federate_sink.send(&callback)?;
            self.stats.record(MessageKind::TimeRegulationEnabled);
        } else {
            if !self.regulating {
                return Err(FederationError::RtiInternal(String::from(
                    "time regulation is not enabled",
                )));
            }
            self.regulating = false;
            let mut msg = Message::new(MessageKind::SetTimeRegulating);
            msg.set_federation(self.federation);
            msg.set_federate(self.federate);
            msg.set_on(false);
            self.executive.send(&msg)?;
            self.stats.record(MessageKind::SetTimeRegulating);
        }
        Ok(())
    }

    pub fn set_time_constrained(&mut self, on: bool) -> Result<(), FederationError> {
        if self.state != AdvanceState::Idle {
            return Err(FederationError::RtiInternal(String::from(
                "cannot change time constraint while an advance is pending",
            )));
        }
        if on {
            if self.constrained {
                return Err(FederationError::RtiInternal(String::from(
                    "time constraint is already enabled",
                )));
            }
            self.constrained = true;
            let mut msg = Message::new(MessageKind::SetTimeConstrained);
            msg.set_federation(self.federation);
            msg.set_federate(self.federate);
            msg.set_on(true);
            self.executive.send(&msg)?;
            self.stats.record(MessageKind::SetTimeConstrained);

            let mut callback = Message::new(MessageKind::TimeConstrainedEnabled);
            callback.set_federation(self.federation);
            callback.set_federate(self.federate);
            callback.set_date(self.current_time);
            self.federate_sink.send(&callback)?;
            self.stats.record(MessageKind::TimeConstrainedEnabled);
        } else {
            if !self.constrained {
                return Err(FederationError::RtiInternal(String::from(
                    "time constraint is not enabled",
                )));
            }
            self.constrained = false;
            let mut msg = Message::new(MessageKind::SetTimeConstrained);
            msg.set_federation(self.federation);
            msg.set_federate(self.federate);
            msg.set_on(false);
            self.executive.send(&msg)?;
            self.stats.record(MessageKind::SetTimeConstrained);
        }
        Ok(())
    }

    pub fn set_lookahead(&mut self, lookahead: Lookahead) -> Result<(), FederationError> {
        if lookahead.is_negative() || lookahead.is_epsilon() {
            return Err(FederationError::InvalidLookahead(format!(
                "lookahead {} is not allowed",
                lookahead
            )));
        }
        self.lookahead = lookahead;
        if self.regulating {
            self.send_null_message(self.current_time)?;
        }
        Ok(())
    }

    /**
     * Whether an outgoing event may carry this timestamp. After a
     * zero-lookahead grant the check is strict; otherwise the time must
     * clear the pending reference plus lookahead.
     */
    pub fn is_valid_time(&self, time: LogicalTime) -> bool {
        let reference = self.reference_time();
        match self.granted_state {
            GrantedState::AfterTarOrNerWithZeroLookahead => time > reference,
            _ => time >= reference + self.lookahead,
        }
    }

    fn reference_time(&self) -> LogicalTime {
        match self.state {
            AdvanceState::Idle => self.current_time,
            AdvanceState::Tar { requested }
            | AdvanceState::Tara { requested }
            | AdvanceState::Ner { requested }
            | AdvanceState::Nera { requested } => requested,
        }
    }

    ////////////////  Advance requests

    fn ensure_idle(&self) -> Result<(), FederationError> {
        if self.state != AdvanceState::Idle {
            return Err(FederationError::TimeAdvanceAlreadyInProgress(String::from(
                "a time advance is already pending",
            )));
        }
        Ok(())
    }

    fn ensure_not_passed(&self, time: LogicalTime) -> Result<(), FederationError> {
        if time < self.current_time {
            return Err(FederationError::FederationTimeAlreadyPassed(format!(
                "time {} is before the current time {}",
                time, self.current_time
            )));
        }
        Ok(())
    }

    pub fn time_advance_request(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        self.ensure_idle()?;
        self.ensure_not_passed(time)?;
        self.stats.record(MessageKind::TimeAdvanceRequest);
        if self.lookahead.is_zero() {
            self.lookahead = Lookahead::epsilon();
            self.granted_state = GrantedState::AfterTarOrNerWithZeroLookahead;
        } else {
            self.granted_state = GrantedState::AfterTarOrNer;
        }
        if self.regulating {
            self.send_null_message(time)?;
        }
        self.state = AdvanceState::Tar { requested: time };
        debug!("time advance requested to {}", time);
        Ok(())
    }

    pub fn time_advance_request_available(
        &mut self,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        self.ensure_idle()?;
        self.ensure_not_passed(time)?;
        self.stats.record(MessageKind::TimeAdvanceRequestAvailable);
        self.granted_state = GrantedState::AfterTaraOrNera;
        if self.regulating {
            self.send_null_message(time)?;
        }
        self.state = AdvanceState::Tara { requested: time };
        debug!("available time advance requested to {}", time);
        Ok(())
    }

    pub fn next_event_request(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        self.ensure_idle()?;
        self.ensure_not_passed(time)?;
        self.stats.record(MessageKind::NextEventRequest);
        if self.lookahead.is_zero() {
            self.lookahead = Lookahead::epsilon();
            self.granted_state = GrantedState::AfterTarOrNerWithZeroLookahead;
        } else {
            self.granted_state = GrantedState::AfterTarOrNer;
        }
        self.state = AdvanceState::Ner { requested: time };
        if self.regulating {
            self.send_null_prime_message(time)?;
        }
        debug!("next event requested up to {}", time);
        Ok(())
    }

    pub fn next_event_request_available(
        &mut self,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        self.ensure_idle()?;
        self.ensure_not_passed(time)?;
        self.stats.record(MessageKind::NextEventRequestAvailable);
        self.granted_state = GrantedState::AfterTaraOrNera;
        self.state = AdvanceState::Nera { requested: time };
        if self.regulating {
            self.send_null_prime_message(time)?;
        }
        debug!("available next event requested up to {}", time);
        Ok(())
    }

    ////////////////  Delivery loop

    /**
     * One unit of work: deliver one callback, else one queued event if
     * delivery is open, else re-evaluate the pending advance. Returns
     * whether more deliveries are immediately available.
     */
    pub fn tick(&mut self) -> Result<bool, FederationError> {
        let (msg, more) = self.queues.take_command();
        if let Some(msg) = msg {
            self.deliver(msg)?;
            return Ok(more);
        }
        let delivery_open =
            self.async_delivery || self.state != AdvanceState::Idle || !self.constrained;
        if delivery_open {
            let (msg, more) = self.queues.take_fifo();
            if let Some(msg) = msg {
                self.deliver(msg)?;
                return Ok(more);
            }
        }
        self.advance()
    }

    fn deliver(&mut self, msg: Message) -> Result<(), FederationError> {
        self.stats.record(msg.kind());
        self.federate_sink.send(&msg)
    }

    fn advance(&mut self) -> Result<bool, FederationError> {
        match self.state {
            AdvanceState::Idle => {
                trace!("no advance pending");
                Ok(false)
            }
            AdvanceState::Tar { requested } | AdvanceState::Tara { requested } => {
                self.time_advance(requested)
            }
            AdvanceState::Ner { requested } | AdvanceState::Nera { requested } => {
                self.next_event_advance(requested)
            }
        }
    }

    /**
     * Progress a TAR or TARA. Queued events up to the bound are
     * delivered one per round before any grant; the grant itself waits
     * for the federation lower bound to clear the requested time.
     */
    fn time_advance(&mut self, requested: LogicalTime) -> Result<bool, FederationError> {
        if !self.constrained {
            self.grant(requested)?;
            return Ok(false);
        }
        let lbts = self.lbts();
        let bound = requested.min(lbts);
        let (taken, more) = self.queues.take_tso_up_to(bound);
        if let Some(msg) = taken {
            self.deliver(msg)?;
            return Ok(more);
        }
        let available = matches!(self.state, AdvanceState::Tara { .. });
        if requested < lbts || (requested == lbts && available) {
            self.grant(requested)?;
        } else {
            trace!("waiting for the federation to clear {}", requested);
        }
        Ok(false)
    }

    /**
     * Progress a NER or NERA. The target ratchets down to the earliest
     * queued event; while blocked, a regulating federate keeps the
     * federation informed of the bound it can offer.
     */
    fn next_event_advance(&mut self, requested: LogicalTime) -> Result<bool, FederationError> {
        if !self.constrained {
            if self.regulating {
                self.send_null_message(requested)?;
            }
            self.grant(requested)?;
            return Ok(false);
        }
        let lbts = self.lbts();
        let date_min = match self.queues.peek_next_tso_time() {
            Some(tso) if tso < requested => tso,
            _ => requested,
        };
        let available = matches!(self.state, AdvanceState::Nera { .. });
        if date_min < lbts || (date_min == lbts && available) {
            self.set_anchor(date_min);
            if self.regulating {
                self.send_null_message(date_min)?;
            }
            let (taken, more) = self.queues.take_tso_up_to(date_min);
            match taken {
                Some(msg) => {
                    self.deliver(msg)?;
                    Ok(more)
                }
                None => {
                    self.grant(date_min)?;
                    Ok(false)
                }
            }
        } else {
            if self.regulating {
                self.send_null_message(lbts)?;
                if self.anonymous_update_received {
                    self.send_null_prime_message(self.reference_time())?;
                }
            }
            trace!("next event advance blocked at the lower bound {}", lbts);
            Ok(false)
        }
    }

    fn set_anchor(&mut self, time: LogicalTime) {
        match &mut self.state {
            AdvanceState::Ner { requested } | AdvanceState::Nera { requested } => {
                *requested = time;
            }
            _ => {}
        }
    }

    fn grant(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        if self.lookahead.is_epsilon() {
            self.lookahead = Lookahead::zero();
        }
        let mut msg = Message::new(MessageKind::TimeAdvanceGrant);
        msg.set_federation(self.federation);
        msg.set_federate(self.federate);
        msg.set_date(time);
        self.federate_sink.send(&msg)?;
        self.stats.record(MessageKind::TimeAdvanceGrant);
        self.current_time = time;
        self.anonymous_update_received = false;
        self.state = AdvanceState::Idle;
        debug!("advance granted to {}", time);
        Ok(())
    }

    /// Answer a local state query on the federate sink.
    pub fn answer_query(&mut self, kind: MessageKind) -> Result<(), FederationError> {
        let mut reply = Message::new(kind);
        reply.set_federation(self.federation);
        reply.set_federate(self.federate);
        match kind {
            MessageKind::QueryFederateTime => reply.set_date(self.current_time),
            MessageKind::QueryLbts => reply.set_date(self.lbts()),
            MessageKind::QueryMinNextEventTime => reply.set_date(self.min_next_event_time()),
            MessageKind::QueryLookahead => reply.set_lookahead(self.lookahead()),
            other => {
                return Err(FederationError::Protocol(format!(
                    "{:?} is not a state query",
                    other
                )))
            }
        }
        self.stats.record(kind);
        self.federate_sink.send(&reply)
    }

    /**
     * Publish an event to the federation. A timed event must carry a
     * timestamp the send rule allows.
     */
    pub fn send_event(&mut self, mut msg: Message) -> Result<(), FederationError> {
        match msg.kind() {
            MessageKind::Event => {}
            MessageKind::TimedEvent => {
                let date = msg.date().ok_or_else(|| {
                    FederationError::Protocol(String::from("timed event without a date"))
                })?;
                if !self.is_valid_time(date) {
                    return Err(FederationError::FederationTimeAlreadyPassed(format!(
                        "event time {} violates the send rule at {}",
                        date, self.current_time
                    )));
                }
            }
            other => {
                return Err(FederationError::Protocol(format!(
                    "{:?} is not an event",
                    other
                )))
            }
        }
        msg.set_federation(self.federation);
        msg.set_federate(self.federate);
        self.stats.record(msg.kind());
        self.executive.send(&msg)
    }

    ////////////////  Outgoing clocks

    /**
     * Announce current progress plus lookahead. A date at or below the
     * last announced one is suppressed without comment.
     */
    fn send_null_message(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        let date = time + self.lookahead;
        if date <= self.last_null_time {
            return Ok(());
        }
        let mut msg = Message::new(MessageKind::MessageNull);
        msg.set_federation(self.federation);
        msg.set_federate(self.federate);
        msg.set_date(date);
        msg.set_lookahead(self.lookahead);
        msg.set_strict(matches!(self.state, AdvanceState::Tar { .. }));
        msg.set_galt(self.lbts());
        msg.set_lits(self.min_next_event_time());
        self.executive.send(&msg)?;
        self.last_null_time = date;
        self.stats.record(MessageKind::MessageNull);
        Ok(())
    }

    /**
     * Announce the expected next event time. Suppressed unless the
     * date beats both the NULL and the NULL PRIME watermark.
     */
    fn send_null_prime_message(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        if !self.null_prime_enabled {
            return Ok(());
        }
        if time <= self.last_null_time || time <= self.last_null_prime_time {
            return Ok(());
        }
        let mut msg = Message::new(MessageKind::MessageNullPrime);
        msg.set_federation(self.federation);
        msg.set_federate(self.federate);
        msg.set_date(time);
        self.executive.send(&msg)?;
        self.last_null_prime_time = time;
        self.stats.record(MessageKind::MessageNullPrime);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use crate::federate::RecordingSink;

    fn manager() -> (
        TimeManager,
        Arc<Mutex<Vec<Message>>>,
        Arc<Mutex<Vec<Message>>>,
    ) {
        let (executive, to_executive) = RecordingSink::new();
        let (federate, to_federate) = RecordingSink::new();
        let manager = TimeManager::new(
            FederationHandle::from_raw(1),
            FederateHandle::from_raw(1),
            Box::new(executive),
            Box::new(federate),
        );
        (manager, to_executive, to_federate)
    }

    fn kinds(sent: &Arc<Mutex<Vec<Message>>>) -> Vec<MessageKind> {
        sent.lock().unwrap().iter().map(|m| m.kind()).collect()
    }

    fn count_of(sent: &Arc<Mutex<Vec<Message>>>, kind: MessageKind) -> usize {
        kinds(sent).iter().filter(|k| **k == kind).count()
    }

    fn timed_event(time: f64, tag: &str) -> Message {
        let mut msg = Message::new(MessageKind::TimedEvent);
        msg.set_date(LogicalTime::new(time));
        msg.set_tag(tag);
        msg
    }

    #[test]
    fn test_current_time_monotonic_positive() {
        let (mut manager, _, to_federate) = manager();
        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        assert!(manager.is_advancing());
        manager.tick().unwrap();
        assert_eq!(LogicalTime::new(5.0), manager.current_time());
        assert!(!manager.is_advancing());
        {
            let sent = to_federate.lock().unwrap();
            assert_eq!(MessageKind::TimeAdvanceGrant, sent[0].kind());
            assert_eq!(Some(LogicalTime::new(5.0)), sent[0].date());
        }

        let passed = manager.time_advance_request(LogicalTime::new(3.0));
        assert!(matches!(
            passed,
            Err(FederationError::FederationTimeAlreadyPassed(_))
        ));

        // requesting exactly the current time is allowed
        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        manager.tick().unwrap();
        assert_eq!(LogicalTime::new(5.0), manager.current_time());
    }

    #[test]
    fn test_advance_already_in_progress_negative() {
        let (mut manager, _, _) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(1.0));
        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        manager.tick().unwrap();
        assert!(manager.is_advancing());

        let second = manager.time_advance_request(LogicalTime::new(6.0));
        assert!(matches!(
            second,
            Err(FederationError::TimeAdvanceAlreadyInProgress(_))
        ));
    }

    #[test]
    fn test_zero_lookahead_epsilon_round_trip_positive() {
        let (mut manager, to_executive, to_federate) = manager();
        manager.set_time_regulating(true).unwrap();
        assert!(manager.lookahead().is_zero());

        manager.time_advance_request(LogicalTime::new(2.0)).unwrap();
        {
            let sent = to_executive.lock().unwrap();
            let null = sent
                .iter()
                .find(|m| m.kind() == MessageKind::MessageNull)
                .unwrap();
            // the internal epsilon pushes the announced date past the target
            assert_eq!(Some(LogicalTime::new(2.0 + 1.0e-4)), null.date());
            assert_eq!(Some(Lookahead::epsilon()), null.lookahead());
            assert!(!null.is_strict());
        }

        manager.tick().unwrap();
        assert_eq!(LogicalTime::new(2.0), manager.current_time());
        // the substitution is invisible once the grant lands
        assert!(manager.lookahead().is_zero());
        assert!(kinds(&to_federate).contains(&MessageKind::TimeAdvanceGrant));

        // zero-lookahead grants leave the strict send rule in force
        assert!(!manager.is_valid_time(LogicalTime::new(2.0)));
        assert!(manager.is_valid_time(LogicalTime::new(2.1)));
    }

    #[test]
    fn test_valid_time_with_lookahead_positive() {
        let (mut manager, _, _) = manager();
        manager.set_lookahead(Lookahead::new(2.0)).unwrap();
        assert!(!manager.is_valid_time(LogicalTime::new(1.9)));
        assert!(manager.is_valid_time(LogicalTime::new(2.0)));
        assert!(manager.is_valid_time(LogicalTime::new(7.5)));
    }

    #[test]
    fn test_tar_delivers_queued_events_before_grant_positive() {
        let (mut manager, _, to_federate) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(10.0));
        manager.enqueue(timed_event(3.0, "early"));

        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        manager.tick().unwrap();
        // the event goes first, without a grant
        assert!(manager.is_advancing());
        manager.tick().unwrap();
        assert_eq!(LogicalTime::new(5.0), manager.current_time());

        let sent = to_federate.lock().unwrap();
        let tail: Vec<MessageKind> = sent.iter().skip(1).map(|m| m.kind()).collect();
        assert_eq!(
            vec![MessageKind::TimedEvent, MessageKind::TimeAdvanceGrant],
            tail
        );
        assert_eq!("early", sent[1].tag());
    }

    #[test]
    fn test_tar_tick_reports_remaining_tso_positive() {
        let (mut manager, _, to_federate) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(10.0));
        manager.enqueue(timed_event(1.0, "first"));
        manager.enqueue(timed_event(2.0, "second"));

        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        // one event per round, with notice of the one still waiting
        assert!(manager.tick().unwrap());
        assert_eq!(1, count_of(&to_federate, MessageKind::TimedEvent));
        assert!(!manager.tick().unwrap());
        assert_eq!(2, count_of(&to_federate, MessageKind::TimedEvent));
        assert!(!manager.tick().unwrap());
        assert_eq!(LogicalTime::new(5.0), manager.current_time());
    }

    #[test]
    fn test_tar_blocked_at_lower_bound_positive() {
        let (mut plain, _, _) = manager();
        plain.set_time_constrained(true).unwrap();
        plain.update(FederateHandle::from_raw(2), LogicalTime::new(5.0));
        plain.time_advance_request(LogicalTime::new(5.0)).unwrap();
        plain.tick().unwrap();
        // a plain request must wait for the bound to strictly pass
        assert!(plain.is_advancing());

        let (mut available, _, _) = manager();
        available.set_time_constrained(true).unwrap();
        available.update(FederateHandle::from_raw(2), LogicalTime::new(5.0));
        available
            .time_advance_request_available(LogicalTime::new(5.0))
            .unwrap();
        available.tick().unwrap();
        // the available variant may land exactly on the bound
        assert_eq!(LogicalTime::new(5.0), available.current_time());
    }

    #[test]
    fn test_ner_delivers_earliest_event_then_grants_positive() {
        let (mut manager, _, to_federate) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(10.0));
        manager.enqueue(timed_event(7.0, "radar"));

        manager.next_event_request(LogicalTime::new(20.0)).unwrap();
        manager.tick().unwrap();
        assert!(manager.is_advancing());
        manager.tick().unwrap();

        // the grant lands on the event time, not the requested bound
        assert_eq!(LogicalTime::new(7.0), manager.current_time());
        let sent = to_federate.lock().unwrap();
        let tail: Vec<MessageKind> = sent.iter().skip(1).map(|m| m.kind()).collect();
        assert_eq!(
            vec![MessageKind::TimedEvent, MessageKind::TimeAdvanceGrant],
            tail
        );
        assert_eq!(Some(LogicalTime::new(7.0)), sent.last().unwrap().date());
    }

    #[test]
    fn test_ner_tick_reports_remaining_tso_positive() {
        let (mut manager, _, to_federate) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(10.0));
        manager.enqueue(timed_event(7.0, "first"));
        manager.enqueue(timed_event(7.0, "second"));

        manager.next_event_request(LogicalTime::new(20.0)).unwrap();
        assert!(manager.tick().unwrap());
        assert!(!manager.tick().unwrap());
        assert_eq!(2, count_of(&to_federate, MessageKind::TimedEvent));
        assert!(!manager.tick().unwrap());
        assert_eq!(LogicalTime::new(7.0), manager.current_time());
    }

    #[test]
    fn test_ner_unblocked_by_anonymous_update_positive() {
        let (mut manager, to_executive, to_federate) = manager();
        manager.set_time_regulating(true).unwrap();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(5.0));

        manager.next_event_request(LogicalTime::new(10.0)).unwrap();
        assert_eq!(1, count_of(&to_executive, MessageKind::MessageNullPrime));
        manager.tick().unwrap();
        assert!(manager.is_advancing());

        // the anonymous floor lifts every peer clock below it
        manager.update(ANONYMOUS_FEDERATE, LogicalTime::new(11.0));
        assert_eq!(LogicalTime::new(11.0), manager.lbts());
        manager.tick().unwrap();
        assert_eq!(LogicalTime::new(10.0), manager.current_time());
        assert!(kinds(&to_federate).contains(&MessageKind::TimeAdvanceGrant));
        // the watermarks keep the repeat announcements out
        assert_eq!(1, count_of(&to_executive, MessageKind::MessageNullPrime));
    }

    #[test]
    fn test_null_watermark_positive() {
        let (mut manager, to_executive, _) = manager();
        manager.set_time_regulating(true).unwrap();
        manager.set_lookahead(Lookahead::new(1.0)).unwrap();
        assert_eq!(1, count_of(&to_executive, MessageKind::MessageNull));

        // the same announcement again is suppressed
        manager.set_lookahead(Lookahead::new(1.0)).unwrap();
        assert_eq!(1, count_of(&to_executive, MessageKind::MessageNull));

        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        assert_eq!(2, count_of(&to_executive, MessageKind::MessageNull));
        manager.tick().unwrap();

        // a repeat request at the same time announces nothing new
        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        assert_eq!(2, count_of(&to_executive, MessageKind::MessageNull));
        {
            let sent = to_executive.lock().unwrap();
            let last_null = sent
                .iter()
                .rev()
                .find(|m| m.kind() == MessageKind::MessageNull)
                .unwrap();
            assert_eq!(Some(LogicalTime::new(6.0)), last_null.date());
            assert!(!last_null.is_strict());
        }
    }

    #[test]
    fn test_null_prime_dual_watermark_positive() {
        let (mut manager, to_executive, _) = manager();
        manager.set_time_regulating(true).unwrap();
        manager.set_lookahead(Lookahead::new(2.0)).unwrap();

        manager.next_event_request(LogicalTime::new(3.0)).unwrap();
        assert_eq!(1, count_of(&to_executive, MessageKind::MessageNullPrime));
        manager.tick().unwrap();
        assert_eq!(LogicalTime::new(3.0), manager.current_time());

        // a later request below the NULL watermark stays silent
        manager.next_event_request(LogicalTime::new(4.0)).unwrap();
        assert_eq!(1, count_of(&to_executive, MessageKind::MessageNullPrime));
    }

    #[test]
    fn test_null_prime_disabled_positive() {
        let (mut manager, to_executive, _) = manager();
        manager.set_time_regulating(true).unwrap();
        manager.set_null_prime_enabled(false);
        manager.next_event_request(LogicalTime::new(3.0)).unwrap();
        assert_eq!(0, count_of(&to_executive, MessageKind::MessageNullPrime));
    }

    #[test]
    fn test_tick_ordering_and_fifo_gate_positive() {
        let (mut manager, _, to_federate) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.enqueue(Message::new(MessageKind::Event));
        let mut callback = Message::new(MessageKind::AnnounceSynchronizationPoint);
        callback.set_label("alpha");
        manager.enqueue(callback);

        // callbacks outrank events regardless of arrival order
        let more = manager.tick().unwrap();
        assert!(!more);
        assert_eq!(
            MessageKind::AnnounceSynchronizationPoint,
            to_federate.lock().unwrap().last().unwrap().kind()
        );

        // an idle constrained federate holds plain events back
        manager.tick().unwrap();
        assert_eq!(1, manager.pending_fifos());

        manager.set_async_delivery(true);
        manager.tick().unwrap();
        assert_eq!(0, manager.pending_fifos());
        assert_eq!(
            MessageKind::Event,
            to_federate.lock().unwrap().last().unwrap().kind()
        );
    }

    #[test]
    fn test_role_toggle_negative() {
        let (mut manager, _, _) = manager();
        manager.set_time_regulating(true).unwrap();
        let double = manager.set_time_regulating(true);
        assert!(matches!(double, Err(FederationError::RtiInternal(_))));

        let off = manager.set_time_constrained(false);
        assert!(matches!(off, Err(FederationError::RtiInternal(_))));

        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(1.0));
        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        // blocked mid-advance, so role changes are refused
        let blocked = manager.set_time_regulating(false);
        assert!(matches!(blocked, Err(FederationError::RtiInternal(_))));
    }

    #[test]
    fn test_set_lookahead_negative() {
        let (mut manager, _, _) = manager();
        let negative = manager.set_lookahead(Lookahead::new(-1.0));
        assert!(matches!(
            negative,
            Err(FederationError::InvalidLookahead(_))
        ));
        let reserved = manager.set_lookahead(Lookahead::epsilon());
        assert!(matches!(
            reserved,
            Err(FederationError::InvalidLookahead(_))
        ));
    }

    #[test]
    fn test_note_regulator_positive() {
        let (mut manager, _, _) = manager();
        let peer = FederateHandle::from_raw(2);
        manager.note_regulator(peer, true, Some(LogicalTime::new(4.0)));
        assert_eq!(LogicalTime::new(4.0), manager.lbts());

        // own broadcasts are ignored
        manager.note_regulator(FederateHandle::from_raw(1), true, Some(LogicalTime::new(1.0)));
        assert_eq!(LogicalTime::new(4.0), manager.lbts());

        manager.note_regulator(peer, false, None);
        assert!(manager.lbts().is_positive_infinity());
        // removing an unknown regulator is harmless
        manager.note_regulator(peer, false, None);
    }

    #[test]
    fn test_min_next_event_time_positive() {
        let (mut manager, _, _) = manager();
        manager.set_time_constrained(true).unwrap();
        manager.update(FederateHandle::from_raw(2), LogicalTime::new(9.0));
        assert_eq!(LogicalTime::new(9.0), manager.min_next_event_time());
        manager.enqueue(timed_event(4.0, "queued"));
        assert_eq!(LogicalTime::new(4.0), manager.min_next_event_time());
    }

    #[test]
    fn test_stats_histogram_positive() {
        let (mut manager, _, _) = manager();
        manager.set_time_regulating(true).unwrap();
        manager.set_lookahead(Lookahead::new(1.0)).unwrap();
        manager.time_advance_request(LogicalTime::new(5.0)).unwrap();
        manager.tick().unwrap();

        let stats = manager.stats();
        assert_eq!(1, stats.count(MessageKind::SetTimeRegulating));
        assert_eq!(1, stats.count(MessageKind::TimeRegulationEnabled));
        assert_eq!(2, stats.count(MessageKind::MessageNull));
        assert_eq!(1, stats.count(MessageKind::TimeAdvanceRequest));
        assert_eq!(1, stats.count(MessageKind::TimeAdvanceGrant));
        let report = stats.report();
        assert_eq!(MessageKind::MessageNull, report[0].0);
    }
}
