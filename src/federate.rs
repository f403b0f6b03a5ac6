/**
 * @file
 * @brief Per-member state kept by the executive: identity, the time
 * management and save/restore flags, pending synchronization labels,
 * and the channel messages travel back on.
 */
use std::net::TcpStream;

use crate::errors::FederationError;
use crate::message::{FederateHandle, Message, MessageSink};
use crate::wire;

////////////////  Type definitions

/**
 * Message channel over a connected socket.
 */
pub struct TcpChannel {
    stream: TcpStream,
}

/**
 * One joined federate as the executive sees it.
 */
pub struct FederateRecord {
    handle: FederateHandle,
    name: String,
    regulating: bool,
    constrained: bool,
    saving: bool,
    restoring: bool,
    pending_labels: Vec<String>,
    channel: Box<dyn MessageSink>,
}

////////////////  Functions

impl TcpChannel {
    pub fn new(stream: TcpStream) -> TcpChannel {
        TcpChannel { stream }
    }
}

impl MessageSink for TcpChannel {
    fn send(&mut self, msg: &Message) -> Result<(), FederationError> {
        wire::write_message(&mut self.stream, msg)
    }
}

impl FederateRecord {
    pub fn new(handle: FederateHandle, name: &str, channel: Box<dyn MessageSink>) -> FederateRecord {
        FederateRecord {
            handle,
            name: name.to_string(),
            regulating: false,
            constrained: false,
            saving: false,
            restoring: false,
            pending_labels: Vec::new(),
            channel,
        }
    }

    pub fn handle(&self) -> FederateHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_regulating(&self) -> bool {
        self.regulating
    }

    pub fn set_regulating(&mut self, regulating: bool) {
        self.regulating = regulating;
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    pub fn set_constrained(&mut self, constrained: bool) {
        self.constrained = constrained;
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn set_saving(&mut self, saving: bool) {
        self.saving = saving;
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn set_restoring(&mut self, restoring: bool) {
        self.restoring = restoring;
    }

    pub fn pending_labels(&self) -> &[String] {
        &self.pending_labels
    }

    pub fn add_pending_label(&mut self, label: &str) {
        self.pending_labels.push(label.to_string());
    }

    /// Drop one pending label. Returns whether it was pending at all.
    pub fn remove_pending_label(&mut self, label: &str) -> bool {
        match self.pending_labels.iter().position(|l| l == label) {
            Some(index) => {
                self.pending_labels.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has_pending_label(&self, label: &str) -> bool {
        self.pending_labels.iter().any(|l| l == label)
    }

    pub fn send(&mut self, msg: &Message) -> Result<(), FederationError> {
        self.channel.send(msg)
    }
}

////////////////  Test doubles

/**
 * Channel that records what was sent, for assertions in tests.
 */
#[cfg(test)]
pub struct RecordingSink {
    sent: std::sync::Arc<std::sync::Mutex<Vec<Message>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> (
        RecordingSink,
        std::sync::Arc<std::sync::Mutex<Vec<Message>>>,
    ) {
        let sent = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (RecordingSink { sent: sent.clone() }, sent)
    }
}

#[cfg(test)]
impl MessageSink for RecordingSink {
    fn send(&mut self, msg: &Message) -> Result<(), FederationError> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

/**
 * Channel whose sends always fail, standing in for a dead peer.
 */
#[cfg(test)]
pub struct FailingSink {}

#[cfg(test)]
impl MessageSink for FailingSink {
    fn send(&mut self, _msg: &Message) -> Result<(), FederationError> {
        Err(FederationError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "channel closed",
        )))
    }
}
