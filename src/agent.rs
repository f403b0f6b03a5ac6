/**
 * @file
 * @brief Federate-side runtime. Owns the connection to the coordination
 * service and the time manager, and pumps a single channel that merges
 * decoded network traffic with requests from the application.
 *
 * A reader thread decodes frames and forwards them into the channel;
 * everything else runs on the caller's thread, one dispatch at a time.
 */
use std::net::TcpStream;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use tracing::{debug, warn};

use crate::errors::FederationError;
use crate::executive::JoinedIdentity;
use crate::federate::TcpChannel;
use crate::federation_time::{LogicalTime, Lookahead};
use crate::message::{
    FederateHandle, FederationHandle, Message, MessageKind, MessageSink, ANONYMOUS_FEDERATE,
};
use crate::time_management::TimeManager;
use crate::wire;

////////////////  Type definitions

/// Sends every message into an mpsc channel, for callback delivery.
pub struct ChannelSink {
    sender: Sender<Message>,
}

pub struct FederationAgent {
    federation: FederationHandle,
    federate: FederateHandle,
    manager: TimeManager,
    inbox: Receiver<Message>,
    injector: Sender<Message>,
    control: TcpStream,
}

////////////////  Functions

impl ChannelSink {
    pub fn new(sender: Sender<Message>) -> ChannelSink {
        ChannelSink { sender }
    }
}

impl MessageSink for ChannelSink {
    fn send(&mut self, msg: &Message) -> Result<(), FederationError> {
        self.sender.send(msg.clone()).map_err(|_| {
            FederationError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "callback channel closed",
            ))
        })
    }
}

impl FederationAgent {
    /**
     * Create a federation execution over an unjoined connection and
     * return its handle.
     */
    pub fn create_federation(
        stream: &mut TcpStream,
        name: &str,
        model_path: &str,
    ) -> Result<FederationHandle, FederationError> {
        let mut request = Message::new(MessageKind::CreateFederationExecution);
        request.set_name(name);
        request.set_model_path(model_path);
        wire::write_message(stream, &request)?;
        let reply = wire::read_message(stream)?;
        if reply.kind() != MessageKind::CreateFederationExecution {
            return Err(FederationError::Protocol(format!(
                "expected a creation answer, got {:?}",
                reply.kind()
            )));
        }
        if let Some(kind) = reply.exception() {
            return Err(kind.into_error(reply.reason().to_string()));
        }
        Ok(reply.federation())
    }

    pub fn destroy_federation(
        stream: &mut TcpStream,
        name: &str,
    ) -> Result<(), FederationError> {
        let mut request = Message::new(MessageKind::DestroyFederationExecution);
        request.set_name(name);
        wire::write_message(stream, &request)?;
        let reply = wire::read_message(stream)?;
        if reply.kind() != MessageKind::DestroyFederationExecution {
            return Err(FederationError::Protocol(format!(
                "expected a destruction answer, got {:?}",
                reply.kind()
            )));
        }
        if let Some(kind) = reply.exception() {
            return Err(kind.into_error(reply.reason().to_string()));
        }
        Ok(())
    }

    /**
     * Join a federation over an established connection. Consumes the
     * stream, spawns the reader thread, and replays any bootstrap
     * traffic that arrived ahead of the join answer.
     */
    pub fn join(
        mut stream: TcpStream,
        federation_name: &str,
        federate_name: &str,
        federate_sink: Box<dyn MessageSink>,
    ) -> Result<FederationAgent, FederationError> {
        let (identity, backlog) =
            Self::join_handshake(&mut stream, federation_name, federate_name)?;

        let (sender, receiver) = channel();
        let reader_stream = stream.try_clone()?;
        let reader_sender = sender.clone();
        thread::spawn(move || Self::forward_incoming(reader_stream, reader_sender));

        let executive = TcpChannel::new(stream.try_clone()?);
        let manager = TimeManager::new(
            identity.federation,
            identity.federate,
            Box::new(executive),
            federate_sink,
        );
        let mut agent = FederationAgent {
            federation: identity.federation,
            federate: identity.federate,
            manager,
            inbox: receiver,
            injector: sender,
            control: stream,
        };
        for msg in backlog {
            agent.dispatch(msg)?;
        }
        Ok(agent)
    }

    fn join_handshake(
        stream: &mut TcpStream,
        federation: &str,
        federate: &str,
    ) -> Result<(JoinedIdentity, Vec<Message>), FederationError> {
        let mut request = Message::new(MessageKind::JoinFederationExecution);
        request.set_name(federation);
        request.set_label(federate);
        wire::write_message(stream, &request)?;
        let mut backlog = Vec::new();
        loop {
            let msg = wire::read_message(stream)?;
            if msg.kind() != MessageKind::JoinFederationExecution {
                // bootstrap traffic precedes the join answer
                backlog.push(msg);
                continue;
            }
            if let Some(kind) = msg.exception() {
                return Err(kind.into_error(msg.reason().to_string()));
            }
            let identity = JoinedIdentity {
                federation: msg.federation(),
                federate: msg.federate(),
            };
            debug!(
                "joined federation {} as federate {} with {} regulators known",
                federation,
                identity.federate,
                msg.count()
            );
            return Ok((identity, backlog));
        }
    }

    fn forward_incoming(mut stream: TcpStream, sender: Sender<Message>) {
        loop {
            match wire::read_message(&mut stream) {
                Ok(msg) => {
                    if sender.send(msg).is_err() {
                        return;
                    }
                }
                Err(FederationError::Io(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("executive connection closed");
                    return;
                }
                Err(e) => {
                    warn!("executive connection failed: {}", e);
                    return;
                }
            }
        }
    }

    pub fn federation(&self) -> FederationHandle {
        self.federation
    }

    pub fn federate(&self) -> FederateHandle {
        self.federate
    }

    /// A handle other threads can use to feed requests into the loop.
    pub fn requests(&self) -> Sender<Message> {
        self.injector.clone()
    }

    pub fn current_time(&self) -> LogicalTime {
        self.manager.current_time()
    }

    pub fn lbts(&self) -> LogicalTime {
        self.manager.lbts()
    }

    pub fn lookahead(&self) -> Lookahead {
        self.manager.lookahead()
    }

    pub fn is_advancing(&self) -> bool {
        self.manager.is_advancing()
    }

    pub fn pending_tso(&self) -> usize {
        self.manager.pending_tso()
    }

    pub fn set_async_delivery(&mut self, on: bool) {
        self.manager.set_async_delivery(on);
    }

    pub fn set_time_regulating(&mut self, on: bool) -> Result<(), FederationError> {
        self.manager.set_time_regulating(on)
    }

    pub fn set_time_constrained(&mut self, on: bool) -> Result<(), FederationError> {
        self.manager.set_time_constrained(on)
    }

    pub fn set_lookahead(&mut self, lookahead: Lookahead) -> Result<(), FederationError> {
        self.manager.set_lookahead(lookahead)
    }

    pub fn time_advance_request(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        self.manager.time_advance_request(time)
    }

    pub fn time_advance_request_available(
        &mut self,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        self.manager.time_advance_request_available(time)
    }

    pub fn next_event_request(&mut self, time: LogicalTime) -> Result<(), FederationError> {
        self.manager.next_event_request(time)
    }

    pub fn next_event_request_available(
        &mut self,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        self.manager.next_event_request_available(time)
    }

    pub fn send_event(&mut self, msg: Message) -> Result<(), FederationError> {
        self.manager.send_event(msg)
    }

    /// Shed the time management roles and leave the federation.
    pub fn resign(&mut self) -> Result<(), FederationError> {
        if self.manager.is_regulating() {
            self.manager.set_time_regulating(false)?;
        }
        if self.manager.is_constrained() {
            self.manager.set_time_constrained(false)?;
        }
        let mut msg = Message::new(MessageKind::ResignFederationExecution);
        msg.set_federation(self.federation);
        msg.set_federate(self.federate);
        wire::write_message(&mut self.control, &msg)?;
        debug!("resigned from federation {}", self.federation);
        Ok(())
    }

    /**
     * Drain everything pending on the merged channel, then run one
     * delivery round. Returns whether more deliveries are immediately
     * available.
     */
    pub fn tick(&mut self) -> Result<bool, FederationError> {
        while let Ok(msg) = self.inbox.try_recv() {
            self.dispatch(msg)?;
        }
        self.manager.tick()
    }

    fn dispatch(&mut self, msg: Message) -> Result<(), FederationError> {
        match msg.kind() {
            MessageKind::MessageNull => {
                let date = msg.date().ok_or_else(|| {
                    FederationError::Protocol(String::from("NULL message without a date"))
                })?;
                self.manager.update(msg.federate(), date);
                Ok(())
            }
            MessageKind::SetTimeRegulating => {
                self.manager
                    .note_regulator(msg.federate(), msg.on(), msg.date());
                Ok(())
            }
            MessageKind::TimeAdvanceRequest => {
                self.manager.time_advance_request(Self::required_date(&msg)?)
            }
            MessageKind::TimeAdvanceRequestAvailable => self
                .manager
                .time_advance_request_available(Self::required_date(&msg)?),
            MessageKind::NextEventRequest => {
                self.manager.next_event_request(Self::required_date(&msg)?)
            }
            MessageKind::NextEventRequestAvailable => self
                .manager
                .next_event_request_available(Self::required_date(&msg)?),
            MessageKind::QueryFederateTime
            | MessageKind::QueryLbts
            | MessageKind::QueryLookahead
            | MessageKind::QueryMinNextEventTime => self.manager.answer_query(msg.kind()),
            MessageKind::Event | MessageKind::TimedEvent => {
                // relays always carry the true sender, so a message
                // stamped with our own handle or none at all is an
                // outbound request from the application
                if msg.federate() == self.federate || msg.federate() == ANONYMOUS_FEDERATE {
                    self.manager.send_event(msg)
                } else {
                    self.manager.enqueue(msg);
                    Ok(())
                }
            }
            kind if kind.is_immediate_callback() => {
                self.manager.enqueue(msg);
                Ok(())
            }
            other => Err(FederationError::Protocol(format!(
                "unexpected {:?} at the federate side",
                other
            ))),
        }
    }

    fn required_date(msg: &Message) -> Result<LogicalTime, FederationError> {
        msg.date().ok_or_else(|| {
            FederationError::Protocol(format!("{:?} without a date", msg.kind()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;
    use std::time::Duration;

    use rand::Rng;

    use crate::executive::Executive;
    use crate::federate::RecordingSink;
    use crate::server::Server;

    fn start_service() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let _ = Server::serve_listener(listener, Executive::new());
        });
        address
    }

    fn model_file() -> std::path::PathBuf {
        let mut rng = rand::thread_rng();
        let path = std::env::temp_dir().join(format!(
            "agent_model_{}.fed",
            rng.gen_range(0..1000000000u32)
        ));
        std::fs::write(&path, "(federation exercise)").unwrap();
        path
    }

    fn wait_until<F>(agent: &mut FederationAgent, mut ready: F)
    where
        F: FnMut(&FederationAgent) -> bool,
    {
        for _ in 0..500 {
            agent.tick().unwrap();
            if ready(agent) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_two_federates_conservative_exchange_positive() {
        let address = start_service();
        let model = model_file();

        let mut bootstrap = TcpStream::connect(address).unwrap();
        let federation =
            FederationAgent::create_federation(&mut bootstrap, "flight", model.to_str().unwrap())
                .unwrap();
        std::fs::remove_file(&model).unwrap();
        assert_eq!(FederationHandle::from_raw(1), federation);

        let (pilot_sink, pilot_callbacks) = RecordingSink::new();
        let mut pilot =
            FederationAgent::join(bootstrap, "flight", "pilot", Box::new(pilot_sink)).unwrap();
        assert_eq!(FederateHandle::from_raw(1), pilot.federate());

        let tower_stream = TcpStream::connect(address).unwrap();
        let (tower_sink, _tower_callbacks) = RecordingSink::new();
        let mut tower =
            FederationAgent::join(tower_stream, "flight", "tower", Box::new(tower_sink)).unwrap();

        tower.set_time_regulating(true).unwrap();
        tower.set_lookahead(Lookahead::new(1.0)).unwrap();
        pilot.set_time_constrained(true).unwrap();
        wait_until(&mut pilot, |a| a.lbts() == LogicalTime::new(1.0));

        // below the bound, the grant is immediate
        pilot.time_advance_request(LogicalTime::new(0.5)).unwrap();
        wait_until(&mut pilot, |a| !a.is_advancing());
        assert_eq!(LogicalTime::new(0.5), pilot.current_time());

        // the tower publishes a timed event through its request channel
        let mut squawk = Message::new(MessageKind::TimedEvent);
        squawk.set_date(LogicalTime::new(1.5));
        squawk.set_tag("squawk 7000");
        tower.requests().send(squawk).unwrap();
        tower.tick().unwrap();
        wait_until(&mut pilot, |a| a.pending_tso() == 1);

        // blocked: the event sits above the federation bound
        pilot.next_event_request(LogicalTime::new(5.0)).unwrap();
        pilot.tick().unwrap();
        assert!(pilot.is_advancing());

        // once the tower moves on, the pilot lands on the event time
        tower.time_advance_request(LogicalTime::new(2.0)).unwrap();
        wait_until(&mut tower, |a| !a.is_advancing());
        wait_until(&mut pilot, |a| !a.is_advancing());
        assert_eq!(LogicalTime::new(1.5), pilot.current_time());

        let callbacks = pilot_callbacks.lock().unwrap();
        let event = callbacks
            .iter()
            .find(|m| m.kind() == MessageKind::TimedEvent)
            .unwrap();
        assert_eq!("squawk 7000", event.tag());
        assert_eq!(tower.federate(), event.federate());
        let grant = callbacks.last().unwrap();
        assert_eq!(MessageKind::TimeAdvanceGrant, grant.kind());
        assert_eq!(Some(LogicalTime::new(1.5)), grant.date());
    }

    #[test]
    fn test_request_channel_merges_queries_positive() {
        let address = start_service();
        let model = model_file();

        let mut bootstrap = TcpStream::connect(address).unwrap();
        FederationAgent::create_federation(&mut bootstrap, "query", model.to_str().unwrap())
            .unwrap();
        std::fs::remove_file(&model).unwrap();
        let (callback_sender, callbacks) = channel();
        let sink = ChannelSink::new(callback_sender);
        let mut agent =
            FederationAgent::join(bootstrap, "query", "solo", Box::new(sink)).unwrap();

        let requests = agent.requests();
        requests
            .send(Message::new(MessageKind::QueryFederateTime))
            .unwrap();
        let mut tar = Message::new(MessageKind::TimeAdvanceRequest);
        tar.set_date(LogicalTime::new(4.0));
        requests.send(tar).unwrap();
        wait_until(&mut agent, |a| !a.is_advancing() && a.current_time() == LogicalTime::new(4.0));

        requests
            .send(Message::new(MessageKind::QueryLbts))
            .unwrap();
        requests
            .send(Message::new(MessageKind::QueryLookahead))
            .unwrap();
        agent.tick().unwrap();

        let answers: Vec<Message> = callbacks.try_iter().collect();
        assert!(answers.iter().any(|m| m.kind() == MessageKind::TimeAdvanceGrant));
        let time_answer = answers
            .iter()
            .find(|m| m.kind() == MessageKind::QueryFederateTime)
            .unwrap();
        assert_eq!(Some(LogicalTime::zero()), time_answer.date());
        let bound_answer = answers
            .iter()
            .find(|m| m.kind() == MessageKind::QueryLbts)
            .unwrap();
        assert!(bound_answer.date().unwrap().is_positive_infinity());
        let lookahead_answer = answers
            .iter()
            .find(|m| m.kind() == MessageKind::QueryLookahead)
            .unwrap();
        assert_eq!(Some(Lookahead::zero()), lookahead_answer.lookahead());
    }

    #[test]
    fn test_join_unknown_federation_negative() {
        let address = start_service();
        let stream = TcpStream::connect(address).unwrap();
        let (sink, _) = RecordingSink::new();
        let result = FederationAgent::join(stream, "phantom", "ghost", Box::new(sink));
        assert!(matches!(
            result,
            Err(FederationError::FederationExecutionDoesNotExist(_))
        ));
    }

    #[test]
    fn test_create_duplicate_negative() {
        let address = start_service();
        let model = model_file();
        let mut first = TcpStream::connect(address).unwrap();
        FederationAgent::create_federation(&mut first, "twice", model.to_str().unwrap()).unwrap();
        let mut second = TcpStream::connect(address).unwrap();
        let result =
            FederationAgent::create_federation(&mut second, "twice", model.to_str().unwrap());
        std::fs::remove_file(&model).unwrap();
        assert!(matches!(
            result,
            Err(FederationError::FederationExecutionAlreadyExists(_))
        ));
    }

    #[test]
    fn test_resign_then_destroy_positive() {
        let address = start_service();
        let model = model_file();
        let mut bootstrap = TcpStream::connect(address).unwrap();
        FederationAgent::create_federation(&mut bootstrap, "leaving", model.to_str().unwrap())
            .unwrap();
        std::fs::remove_file(&model).unwrap();

        let (sink, _) = RecordingSink::new();
        let mut agent =
            FederationAgent::join(bootstrap, "leaving", "short timer", Box::new(sink)).unwrap();
        agent.set_time_regulating(true).unwrap();
        agent.resign().unwrap();

        // the resignation races the fresh connection, so retry briefly
        let mut destroyed = false;
        for _ in 0..200 {
            let mut stream = TcpStream::connect(address).unwrap();
            match FederationAgent::destroy_federation(&mut stream, "leaving") {
                Ok(()) => {
                    destroyed = true;
                    break;
                }
                Err(FederationError::FederatesCurrentlyJoined(_)) => {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(e) => panic!("unexpected destruction failure: {}", e),
            }
        }
        assert!(destroyed);
    }

    #[test]
    fn test_send_event_rejects_invalid_time_negative() {
        let address = start_service();
        let model = model_file();
        let mut bootstrap = TcpStream::connect(address).unwrap();
        FederationAgent::create_federation(&mut bootstrap, "strict", model.to_str().unwrap())
            .unwrap();
        std::fs::remove_file(&model).unwrap();
        let (sink, _) = RecordingSink::new();
        let mut agent =
            FederationAgent::join(bootstrap, "strict", "sender", Box::new(sink)).unwrap();
        agent.set_lookahead(Lookahead::new(2.0)).unwrap();

        let mut early = Message::new(MessageKind::TimedEvent);
        early.set_date(LogicalTime::new(1.0));
        let result = agent.send_event(early);
        assert!(matches!(
            result,
            Err(FederationError::FederationTimeAlreadyPassed(_))
        ));

        let mut valid = Message::new(MessageKind::TimedEvent);
        valid.set_date(LogicalTime::new(2.0));
        agent.send_event(valid).unwrap();
    }

    #[test]
    fn test_exception_round_trip_positive() {
        // the reason string survives the full encode, relay, decode path
        let address = start_service();
        let mut stream = TcpStream::connect(address).unwrap();
        let result = FederationAgent::destroy_federation(&mut stream, "never created");
        match result {
            Err(FederationError::FederationExecutionDoesNotExist(reason)) => {
                assert!(reason.contains("never created"));
            }
            other => panic!("expected a missing-federation error, got {:?}", other),
        }
    }
}
