/**
 * @file
 * @brief Message vocabulary exchanged between federate agents and the
 * federation executive. One flat `Message` struct carries every kind;
 * unused fields stay at their defaults so the codec can skip them.
 */
use crate::errors::{ExceptionKind, FederationError};
use crate::federation_time::{LogicalTime, Lookahead};

////////////////  Type definitions

/**
 * Identifier of one federation execution inside the executive directory.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FederationHandle(u32);

impl FederationHandle {
    pub const fn from_raw(raw: u32) -> FederationHandle {
        FederationHandle(raw)
    }

    pub const fn to_raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FederationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/**
 * Identifier of one member federate inside a federation execution.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FederateHandle(u32);

impl FederateHandle {
    pub const fn from_raw(raw: u32) -> FederateHandle {
        FederateHandle(raw)
    }

    pub const fn to_raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FederateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/**
 * Sender handle of executive-originated null messages that do not speak
 * for any single member. Receivers raise every peer clock instead of one.
 */
pub const ANONYMOUS_FEDERATE: FederateHandle = FederateHandle(0);

/**
 * Every message kind of the coordination protocol. Requests flow from
 * federate to executive, callbacks flow back, and the two event kinds
 * are relayed between members.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    CreateFederationExecution,
    DestroyFederationExecution,
    JoinFederationExecution,
    ResignFederationExecution,
    SetTimeRegulating,
    SetTimeConstrained,
    MessageNull,
    MessageNullPrime,
    TimeAdvanceRequest,
    TimeAdvanceRequestAvailable,
    NextEventRequest,
    NextEventRequestAvailable,
    TimeAdvanceGrant,
    TimeRegulationEnabled,
    TimeConstrainedEnabled,
    RegisterSynchronizationPoint,
    SynchronizationPointRegistrationSucceeded,
    SynchronizationPointRegistrationFailed,
    AnnounceSynchronizationPoint,
    SynchronizationPointAchieved,
    FederationSynchronized,
    RequestFederationSave,
    InitiateFederateSave,
    FederateSaveBegun,
    FederateSaveComplete,
    FederateSaveNotComplete,
    FederationSaved,
    FederationNotSaved,
    RequestFederationRestore,
    RequestFederationRestoreSucceeded,
    RequestFederationRestoreFailed,
    FederationRestoreBegun,
    InitiateFederateRestore,
    FederateRestoreComplete,
    FederateRestoreNotComplete,
    FederationRestored,
    FederationNotRestored,
    Event,
    TimedEvent,
    QueryFederateTime,
    QueryLbts,
    QueryLookahead,
    QueryMinNextEventTime,
}

////////////////  Functions

impl MessageKind {
    pub fn to_byte(&self) -> u8 {
        match self {
            MessageKind::CreateFederationExecution => 1,
            MessageKind::DestroyFederationExecution => 2,
            MessageKind::JoinFederationExecution => 3,
            MessageKind::ResignFederationExecution => 4,
            MessageKind::SetTimeRegulating => 5,
            MessageKind::SetTimeConstrained => 6,
            MessageKind::MessageNull => 7,
            MessageKind::MessageNullPrime => 8,
            MessageKind::TimeAdvanceRequest => 9,
            MessageKind::TimeAdvanceRequestAvailable => 10,
            MessageKind::NextEventRequest => 11,
            MessageKind::NextEventRequestAvailable => 12,
            MessageKind::TimeAdvanceGrant => 13,
            MessageKind::TimeRegulationEnabled => 14,
            MessageKind::TimeConstrainedEnabled => 15,
            MessageKind::RegisterSynchronizationPoint => 16,
            MessageKind::SynchronizationPointRegistrationSucceeded => 17,
            MessageKind::SynchronizationPointRegistrationFailed => 18,
            MessageKind::AnnounceSynchronizationPoint => 19,
            MessageKind::SynchronizationPointAchieved => 20,
            MessageKind::FederationSynchronized => 21,
            MessageKind::RequestFederationSave => 22,
            MessageKind::InitiateFederateSave => 23,
            MessageKind::FederateSaveBegun => 24,
            MessageKind::FederateSaveComplete => 25,
            MessageKind::FederateSaveNotComplete => 26,
            MessageKind::FederationSaved => 27,
            MessageKind::FederationNotSaved => 28,
            MessageKind::RequestFederationRestore => 29,
            MessageKind::RequestFederationRestoreSucceeded => 30,
            MessageKind::RequestFederationRestoreFailed => 31,
            MessageKind::FederationRestoreBegun => 32,
            MessageKind::InitiateFederateRestore => 33,
            MessageKind::FederateRestoreComplete => 34,
            MessageKind::FederateRestoreNotComplete => 35,
            MessageKind::FederationRestored => 36,
            MessageKind::FederationNotRestored => 37,
            MessageKind::Event => 38,
            MessageKind::TimedEvent => 39,
            MessageKind::QueryFederateTime => 40,
            MessageKind::QueryLbts => 41,
            MessageKind::QueryLookahead => 42,
            MessageKind::QueryMinNextEventTime => 43,
        }
    }

    pub fn from_byte(byte: u8) -> Option<MessageKind> {
        match byte {
            1 => Some(MessageKind::CreateFederationExecution),
            2 => Some(MessageKind::DestroyFederationExecution),
            3 => Some(MessageKind::JoinFederationExecution),
            4 => Some(MessageKind::ResignFederationExecution),
            5 => Some(MessageKind::SetTimeRegulating),
            6 => Some(MessageKind::SetTimeConstrained),
            7 => Some(MessageKind::MessageNull),
            8 => Some(MessageKind::MessageNullPrime),
            9 => Some(MessageKind::TimeAdvanceRequest),
            10 => Some(MessageKind::TimeAdvanceRequestAvailable),
            11 => Some(MessageKind::NextEventRequest),
            12 => Some(MessageKind::NextEventRequestAvailable),
            13 => Some(MessageKind::TimeAdvanceGrant),
            14 => Some(MessageKind::TimeRegulationEnabled),
            15 => Some(MessageKind::TimeConstrainedEnabled),
            16 => Some(MessageKind::RegisterSynchronizationPoint),
            17 => Some(MessageKind::SynchronizationPointRegistrationSucceeded),
            18 => Some(MessageKind::SynchronizationPointRegistrationFailed),
            19 => Some(MessageKind::AnnounceSynchronizationPoint),
            20 => Some(MessageKind::SynchronizationPointAchieved),
            21 => Some(MessageKind::FederationSynchronized),
            22 => Some(MessageKind::RequestFederationSave),
            23 => Some(MessageKind::InitiateFederateSave),
            24 => Some(MessageKind::FederateSaveBegun),
            25 => Some(MessageKind::FederateSaveComplete),
            26 => Some(MessageKind::FederateSaveNotComplete),
            27 => Some(MessageKind::FederationSaved),
            28 => Some(MessageKind::FederationNotSaved),
            29 => Some(MessageKind::RequestFederationRestore),
            30 => Some(MessageKind::RequestFederationRestoreSucceeded),
            31 => Some(MessageKind::RequestFederationRestoreFailed),
            32 => Some(MessageKind::FederationRestoreBegun),
            33 => Some(MessageKind::InitiateFederateRestore),
            34 => Some(MessageKind::FederateRestoreComplete),
            35 => Some(MessageKind::FederateRestoreNotComplete),
            36 => Some(MessageKind::FederationRestored),
            37 => Some(MessageKind::FederationNotRestored),
            38 => Some(MessageKind::Event),
            39 => Some(MessageKind::TimedEvent),
            40 => Some(MessageKind::QueryFederateTime),
            41 => Some(MessageKind::QueryLbts),
            42 => Some(MessageKind::QueryLookahead),
            43 => Some(MessageKind::QueryMinNextEventTime),
            _ => None,
        }
    }

    /**
     * Whether a received message of this kind must reach the federate
     * ahead of time order, bypassing the event queues.
     */
    pub fn is_immediate_callback(&self) -> bool {
        matches!(
            self,
            MessageKind::SynchronizationPointRegistrationSucceeded
                | MessageKind::SynchronizationPointRegistrationFailed
                | MessageKind::AnnounceSynchronizationPoint
                | MessageKind::FederationSynchronized
                | MessageKind::InitiateFederateSave
                | MessageKind::FederationSaved
                | MessageKind::FederationNotSaved
                | MessageKind::RequestFederationRestoreSucceeded
                | MessageKind::RequestFederationRestoreFailed
                | MessageKind::FederationRestoreBegun
                | MessageKind::InitiateFederateRestore
                | MessageKind::FederationRestored
                | MessageKind::FederationNotRestored
        )
    }
}

/**
 * Flat protocol message. Only the fields relevant to `kind` are
 * meaningful; the rest stay at their `new()` defaults and the codec
 * omits them on the wire.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    kind: MessageKind,
    federation: FederationHandle,
    federate: FederateHandle,
    date: Option<LogicalTime>,
    lookahead: Option<Lookahead>,
    is_strict: bool,
    galt: Option<LogicalTime>,
    lits: Option<LogicalTime>,
    on: bool,
    count: u32,
    label: String,
    tag: String,
    name: String,
    model_path: String,
    targets: Vec<FederateHandle>,
    exception: Option<ExceptionKind>,
    reason: String,
}

impl Message {
    pub fn new(kind: MessageKind) -> Message {
        Message {
            kind,
            federation: FederationHandle(0),
            federate: ANONYMOUS_FEDERATE,
            date: None,
            lookahead: None,
            is_strict: false,
            galt: None,
            lits: None,
            on: false,
            count: 0,
            label: String::new(),
            tag: String::new(),
            name: String::new(),
            model_path: String::new(),
            targets: Vec::new(),
            exception: None,
            reason: String::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: MessageKind) {
        self.kind = kind;
    }

    pub fn federation(&self) -> FederationHandle {
        self.federation
    }

    pub fn set_federation(&mut self, federation: FederationHandle) {
        self.federation = federation;
    }

    pub fn federate(&self) -> FederateHandle {
        self.federate
    }

    pub fn set_federate(&mut self, federate: FederateHandle) {
        self.federate = federate;
    }

    pub fn date(&self) -> Option<LogicalTime> {
        self.date
    }

    pub fn set_date(&mut self, date: LogicalTime) {
        self.date = Some(date);
    }

    pub fn lookahead(&self) -> Option<Lookahead> {
        self.lookahead
    }

    pub fn set_lookahead(&mut self, lookahead: Lookahead) {
        self.lookahead = Some(lookahead);
    }

    pub fn is_strict(&self) -> bool {
        self.is_strict
    }

    pub fn set_strict(&mut self, is_strict: bool) {
        self.is_strict = is_strict;
    }

    pub fn galt(&self) -> Option<LogicalTime> {
        self.galt
    }

    pub fn set_galt(&mut self, galt: LogicalTime) {
        self.galt = Some(galt);
    }

    pub fn lits(&self) -> Option<LogicalTime> {
        self.lits
    }

    pub fn set_lits(&mut self, lits: LogicalTime) {
        self.lits = Some(lits);
    }

    pub fn on(&self) -> bool {
        self.on
    }

    pub fn set_on(&mut self, on: bool) {
        self.on = on;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn set_count(&mut self, count: u32) {
        self.count = count;
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag = tag.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn set_model_path(&mut self, model_path: &str) {
        self.model_path = model_path.to_string();
    }

    pub fn targets(&self) -> &[FederateHandle] {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: Vec<FederateHandle>) {
        self.targets = targets;
    }

    pub fn exception(&self) -> Option<ExceptionKind> {
        self.exception
    }

    pub fn set_exception(&mut self, exception: ExceptionKind) {
        self.exception = Some(exception);
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_reason(&mut self, reason: &str) {
        self.reason = reason.to_string();
    }
}

/**
 * Outbound edge of one message channel. The executive holds one sink per
 * member; the time manager holds one toward the executive and one toward
 * the local federate.
 */
pub trait MessageSink: Send {
    fn send(&mut self, msg: &Message) -> Result<(), FederationError>;
}
