/**
 * @file
 * @brief The coordination executive: decodes every request reaching the
 * service side, applies it to the federation directory, and emits the
 * replies and broadcasts the protocol calls for.
 *
 * Connections start unjoined and may only create, destroy, or join.
 * After a join the connection speaks for exactly one federate and the
 * remaining kinds apply to it.
 */
use std::net::TcpStream;

use tracing::{debug, warn};

use crate::directory::FederationDirectory;
use crate::errors::FederationError;
use crate::federate::TcpChannel;
use crate::federation_time::LogicalTime;
use crate::message::{FederateHandle, FederationHandle, Message, MessageKind};
use crate::stats::MessageStats;
use crate::wire;

////////////////  Type definitions

/// What a successful join binds a connection to.
#[derive(Clone, Copy, Debug)]
pub struct JoinedIdentity {
    pub federation: FederationHandle,
    pub federate: FederateHandle,
}

pub struct Executive {
    directory: FederationDirectory,
    stats: MessageStats,
}

////////////////  Functions

fn fill_exception(reply: &mut Message, error: &FederationError) {
    reply.set_exception(error.kind());
    reply.set_reason(&error.to_string());
}

impl Executive {
    pub fn new() -> Executive {
        Executive {
            directory: FederationDirectory::new(),
            stats: MessageStats::new(),
        }
    }

    pub fn directory(&self) -> &FederationDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut FederationDirectory {
        &mut self.directory
    }

    pub fn stats(&self) -> &MessageStats {
        &self.stats
    }

    /// Forced removal after a transport failure on a joined connection.
    pub fn kill_federate(&mut self, federation: FederationHandle, federate: FederateHandle) {
        self.directory.kill_federate(federation, federate);
    }

    /**
     * Handle a request from a connection that has not joined yet. The
     * reply goes straight back on the request stream; a join answer is
     * written after the membership side effects, so bootstrap traffic
     * precedes it on the wire. Returns the identity on a join.
     */
    pub fn process_pre_join(
        &mut self,
        msg: &Message,
        stream: &mut TcpStream,
    ) -> Result<Option<JoinedIdentity>, FederationError> {
        self.stats.record(msg.kind());
        debug!("processing {:?} from an unjoined connection", msg.kind());
        match msg.kind() {
            MessageKind::CreateFederationExecution => {
                let mut reply = Message::new(MessageKind::CreateFederationExecution);
                reply.set_name(msg.name());
                match self.directory.create_federation(msg.name(), msg.model_path()) {
                    Ok(handle) => reply.set_federation(handle),
                    Err(e) => fill_exception(&mut reply, &e),
                }
                wire::write_message(stream, &reply)?;
                Ok(None)
            }
            MessageKind::DestroyFederationExecution => {
                let mut reply = Message::new(MessageKind::DestroyFederationExecution);
                reply.set_name(msg.name());
                if let Err(e) = self.directory.destroy_federation(msg.name()) {
                    fill_exception(&mut reply, &e);
                }
                wire::write_message(stream, &reply)?;
                Ok(None)
            }
            MessageKind::JoinFederationExecution => {
                let mut reply = Message::new(MessageKind::JoinFederationExecution);
                reply.set_name(msg.name());
                let joined = self.join(msg, stream);
                let identity = match joined {
                    Ok((identity, regulators)) => {
                        reply.set_federation(identity.federation);
                        reply.set_federate(identity.federate);
                        reply.set_count(regulators);
                        Some(identity)
                    }
                    Err(e) => {
                        fill_exception(&mut reply, &e);
                        None
                    }
                };
                wire::write_message(stream, &reply)?;
                Ok(identity)
            }
            other => Err(FederationError::Protocol(format!(
                "unexpected {:?} before join",
                other
            ))),
        }
    }

    fn join(
        &mut self,
        msg: &Message,
        stream: &TcpStream,
    ) -> Result<(JoinedIdentity, u32), FederationError> {
        let federation = self.directory.lookup_mut(msg.name()).ok_or_else(|| {
            FederationError::FederationExecutionDoesNotExist(format!(
                "no federation named {}",
                msg.name()
            ))
        })?;
        let channel = TcpChannel::new(stream.try_clone()?);
        let federate = federation.add_federate(msg.label(), Box::new(channel))?;
        Ok((
            JoinedIdentity {
                federation: federation.handle(),
                federate,
            },
            federation.regulator_count() as u32,
        ))
    }

    /**
     * Handle a request from a joined connection. Domain rejections that
     * have a reply path are answered on the federate channel; an error
     * return means the connection itself misbehaved.
     */
    pub fn process(
        &mut self,
        federation: FederationHandle,
        federate: FederateHandle,
        msg: &Message,
    ) -> Result<(), FederationError> {
        self.stats.record(msg.kind());
        debug!(
            "processing {:?} from federate {} of federation {}",
            msg.kind(),
            federate,
            federation
        );
        match msg.kind() {
            MessageKind::ResignFederationExecution => self
                .directory
                .federation_mut(federation)?
                .remove_federate(federate),
            MessageKind::SetTimeRegulating => {
                let found = self.directory.federation_mut(federation)?;
                if msg.on() {
                    let time = msg.date().unwrap_or_else(LogicalTime::zero);
                    found.add_regulator(federate, time)
                } else {
                    found.remove_regulator(federate)
                }
            }
            MessageKind::SetTimeConstrained => {
                let found = self.directory.federation_mut(federation)?;
                if msg.on() {
                    found.add_constrained(federate)
                } else {
                    found.remove_constrained(federate)
                }
            }
            MessageKind::MessageNull => {
                let time = msg.date().ok_or_else(|| {
                    FederationError::Protocol(String::from("NULL message without a date"))
                })?;
                let found = self.directory.federation_mut(federation)?;
                // a NULL racing a resign or a role change is harmless
                if let Err(e) = found.update_regulator(federate, time) {
                    debug!("dropping NULL from federate {}: {}", federate, e);
                }
                Ok(())
            }
            MessageKind::MessageNullPrime => {
                let time = msg.date().ok_or_else(|| {
                    FederationError::Protocol(String::from("NULL PRIME message without a date"))
                })?;
                self.directory
                    .federation_mut(federation)?
                    .update_null_prime(federate, time)
            }
            MessageKind::RegisterSynchronizationPoint => {
                let found = self.directory.federation_mut(federation)?;
                match found.register_synchronization(
                    federate,
                    msg.label(),
                    msg.tag(),
                    msg.targets(),
                ) {
                    Ok(()) => {
                        let mut reply =
                            Message::new(MessageKind::SynchronizationPointRegistrationSucceeded);
                        reply.set_federation(federation);
                        reply.set_label(msg.label());
                        if let Err(e) = found.send_to(federate, &reply) {
                            warn!("failed to confirm label {} to federate {}: {}", msg.label(), federate, e);
                        }
                        found.announce_synchronization(msg.label())
                    }
                    Err(e) => {
                        let mut reply =
                            Message::new(MessageKind::SynchronizationPointRegistrationFailed);
                        reply.set_federation(federation);
                        reply.set_label(msg.label());
                        fill_exception(&mut reply, &e);
                        if let Err(e) = found.send_to(federate, &reply) {
                            warn!("failed to reject label {} to federate {}: {}", msg.label(), federate, e);
                        }
                        Ok(())
                    }
                }
            }
            MessageKind::SynchronizationPointAchieved => self
                .directory
                .federation_mut(federation)?
                .synchronization_achieved(federate, msg.label())
                .map(|_| ()),
            MessageKind::RequestFederationSave => self
                .directory
                .federation_mut(federation)?
                .request_save(federate, msg.label(), msg.date()),
            MessageKind::FederateSaveBegun => self
                .directory
                .federation_mut(federation)?
                .federate_save_begun(federate),
            MessageKind::FederateSaveComplete => self
                .directory
                .federation_mut(federation)?
                .federate_save_status(federate, true),
            MessageKind::FederateSaveNotComplete => self
                .directory
                .federation_mut(federation)?
                .federate_save_status(federate, false),
            MessageKind::RequestFederationRestore => self
                .directory
                .federation_mut(federation)?
                .request_restore(federate, msg.label()),
            MessageKind::FederateRestoreComplete => self
                .directory
                .federation_mut(federation)?
                .federate_restore_status(federate, true),
            MessageKind::FederateRestoreNotComplete => self
                .directory
                .federation_mut(federation)?
                .federate_restore_status(federate, false),
            MessageKind::Event | MessageKind::TimedEvent => {
                let found = self.directory.federation_mut(federation)?;
                found.ensure_member(federate)?;
                let mut relay = msg.clone();
                relay.set_federation(federation);
                relay.set_federate(federate);
                found.broadcast(&relay, Some(federate));
                Ok(())
            }
            other => Err(FederationError::Protocol(format!(
                "unexpected {:?} after join",
                other
            ))),
        }
    }
}
