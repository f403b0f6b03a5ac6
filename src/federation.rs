/**
 * @file
 * @brief One federation execution: the member records, the regulator
 * registry, pending synchronization labels, and the save/restore
 * coordination state. All mutations come through the executive.
 */
use std::fs::File;

use tracing::{debug, warn};

use crate::constants::{MAX_FEDERATION_NAME_LENGTH, MAX_LABEL_LENGTH};
use crate::errors::{ExceptionKind, FederationError};
use crate::federate::FederateRecord;
use crate::federation_time::LogicalTime;
use crate::lbts::RegulatorRegistry;
use crate::message::{
    FederateHandle, FederationHandle, Message, MessageKind, MessageSink, ANONYMOUS_FEDERATE,
};
use crate::snapshot::{
    read_snapshot, snapshot_path, write_snapshot, FederateSnapshot, FederationSnapshot,
};

////////////////  Type definitions

/**
 * Hands out member handles. Handles are never reused while the
 * federation is alive, even when a join fails later or a member leaves.
 */
#[derive(Debug)]
pub struct FederateHandleAllocator {
    next: u32,
}

/**
 * One registered synchronization label and the members that still have
 * to achieve it.
 */
struct SyncPoint {
    label: String,
    tag: String,
    awaiting: Vec<FederateHandle>,
}

/**
 * A federation execution. Created from a name and a model description
 * file; destroyed only when no members remain.
 */
pub struct Federation {
    handle: FederationHandle,
    name: String,
    model_path: String,
    federates: Vec<FederateRecord>,
    regulators: RegulatorRegistry,
    null_primes: RegulatorRegistry,
    anonymous_floor: LogicalTime,
    allocator: FederateHandleAllocator,
    sync_points: Vec<SyncPoint>,
    save_in_progress: bool,
    save_status: bool,
    save_label: String,
    restore_in_progress: bool,
    restore_status: bool,
}

////////////////  Functions

impl FederateHandleAllocator {
    pub fn new() -> FederateHandleAllocator {
        FederateHandleAllocator { next: 1 }
    }

    pub fn allocate(&mut self) -> FederateHandle {
        let handle = FederateHandle::from_raw(self.next);
        self.next += 1;
        handle
    }
}

impl Federation {
    /**
     * Validates the name and the model description file. The file must
     * open and be non-empty; its content is not interpreted here.
     */
    pub fn new(
        handle: FederationHandle,
        name: &str,
        model_path: &str,
    ) -> Result<Federation, FederationError> {
        if name.is_empty() {
            return Err(FederationError::RtiInternal(String::from(
                "federation name is empty",
            )));
        }
        if name.len() > MAX_FEDERATION_NAME_LENGTH {
            return Err(FederationError::RtiInternal(format!(
                "federation name exceeds {} bytes",
                MAX_FEDERATION_NAME_LENGTH
            )));
        }
        let file = File::open(model_path)
            .map_err(|e| FederationError::CouldNotOpenFed(format!("{}: {}", model_path, e)))?;
        let metadata = file
            .metadata()
            .map_err(|e| FederationError::ErrorReadingFed(format!("{}: {}", model_path, e)))?;
        if metadata.len() == 0 {
            return Err(FederationError::ErrorReadingFed(format!(
                "{} is empty",
                model_path
            )));
        }
        Ok(Federation {
            handle,
            name: name.to_string(),
            model_path: model_path.to_string(),
            federates: Vec::new(),
            regulators: RegulatorRegistry::new(),
            null_primes: RegulatorRegistry::new(),
            anonymous_floor: LogicalTime::zero(),
            allocator: FederateHandleAllocator::new(),
            sync_points: Vec::new(),
            save_in_progress: false,
            save_status: true,
            save_label: String::new(),
            restore_in_progress: false,
            restore_status: true,
        })
    }

    pub fn handle(&self) -> FederationHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn federate_count(&self) -> usize {
        self.federates.len()
    }

    pub fn regulator_count(&self) -> usize {
        self.regulators.len()
    }

    pub fn is_synchronizing(&self) -> bool {
        !self.sync_points.is_empty()
    }

    pub fn has_sync_label(&self, label: &str) -> bool {
        self.sync_points.iter().any(|p| p.label == label)
    }

    pub fn is_save_in_progress(&self) -> bool {
        self.save_in_progress
    }

    pub fn is_restore_in_progress(&self) -> bool {
        self.restore_in_progress
    }

    pub fn lower_bound(&self) -> LogicalTime {
        self.regulators.lower_bound()
    }

    pub fn federate(&self, federate: FederateHandle) -> Option<&FederateRecord> {
        self.federates.iter().find(|f| f.handle() == federate)
    }

    pub fn federate_by_name(&self, name: &str) -> Option<&FederateRecord> {
        self.federates.iter().find(|f| f.name() == name)
    }

    fn member_index(&self, federate: FederateHandle) -> Result<usize, FederationError> {
        self.federates
            .iter()
            .position(|f| f.handle() == federate)
            .ok_or_else(|| {
                FederationError::FederateNotExecutionMember(format!(
                    "federate {} is not a member of federation {}",
                    federate, self.name
                ))
            })
    }

    pub fn ensure_member(&self, federate: FederateHandle) -> Result<(), FederationError> {
        self.member_index(federate).map(|_| ())
    }

    pub fn ensure_empty(&self) -> Result<(), FederationError> {
        if self.federates.is_empty() {
            return Ok(());
        }
        Err(FederationError::FederatesCurrentlyJoined(format!(
            "{} federates are still joined to federation {}",
            self.federates.len(),
            self.name
        )))
    }

    ////////////////  Membership

    /**
     * Admit one member. On success the new member is bootstrapped with
     * one NULL per existing regulator and, when labels are pending, one
     * announce per label.
     */
    pub fn add_federate(
        &mut self,
        name: &str,
        channel: Box<dyn MessageSink>,
    ) -> Result<FederateHandle, FederationError> {
        if self.federate_by_name(name).is_some() {
            return Err(FederationError::FederateAlreadyExecutionMember(format!(
                "federate {} is already a member of federation {}",
                name, self.name
            )));
        }
        let handle = self.allocator.allocate();
        self.federates.push(FederateRecord::new(handle, name, channel));
        debug!("federate {} joined federation {} as {}", name, self.name, handle);

        let federation = self.handle;
        let regulators = self.regulators.entries();
        let pending: Vec<(String, String)> = self
            .sync_points
            .iter()
            .map(|p| (p.label.clone(), p.tag.clone()))
            .collect();
        for point in self.sync_points.iter_mut() {
            point.awaiting.push(handle);
        }
        if let Some(record) = self.federates.last_mut() {
            for (regulator, clock) in regulators {
                let mut msg = Message::new(MessageKind::MessageNull);
                msg.set_federation(federation);
                msg.set_federate(regulator);
                msg.set_date(clock);
                if let Err(e) = record.send(&msg) {
                    warn!("failed to bootstrap regulator clock to federate {}: {}", handle, e);
                }
            }
            for (label, tag) in pending {
                let mut msg = Message::new(MessageKind::AnnounceSynchronizationPoint);
                msg.set_federation(federation);
                msg.set_label(&label);
                msg.set_tag(&tag);
                if let Err(e) = record.send(&msg) {
                    warn!("failed to announce label {} to federate {}: {}", label, handle, e);
                }
                record.add_pending_label(&label);
            }
        }
        Ok(handle)
    }

    /// Plain removal: the member must have shed its roles already.
    pub fn remove_federate(&mut self, federate: FederateHandle) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        let record = self.federates.remove(index);
        debug!("federate {} left federation {}", record.name(), self.name);
        Ok(())
    }

    /**
     * Forced removal after a transport failure. Sheds regulator and
     * constrained roles first, swallowing "was not" errors; never fails.
     */
    pub fn kill_federate(&mut self, federate: FederateHandle) {
        debug!("forcibly removing federate {} from federation {}", federate, self.name);
        if self.regulators.contains(federate) {
            let _ = self.remove_regulator(federate);
        }
        let constrained = self
            .federate(federate)
            .map(|f| f.is_constrained())
            .unwrap_or(false);
        if constrained {
            let _ = self.remove_constrained(federate);
        }
        let _ = self.null_primes.remove(federate);
        let _ = self.remove_federate(federate);
    }

    ////////////////  Time management roles

    pub fn add_regulator(
        &mut self,
        federate: FederateHandle,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        self.regulators.insert(federate, time)?;
        self.federates[index].set_regulating(true);

        let mut msg = Message::new(MessageKind::SetTimeRegulating);
        msg.set_federation(self.handle);
        msg.set_federate(federate);
        msg.set_on(true);
        msg.set_date(time);
        self.broadcast(&msg, Some(federate));
        Ok(())
    }

    pub fn remove_regulator(&mut self, federate: FederateHandle) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        self.regulators.remove(federate)?;
        self.federates[index].set_regulating(false);

        let mut msg = Message::new(MessageKind::SetTimeRegulating);
        msg.set_federation(self.handle);
        msg.set_federate(federate);
        msg.set_on(false);
        self.broadcast(&msg, Some(federate));
        Ok(())
    }

    pub fn add_constrained(&mut self, federate: FederateHandle) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        if self.federates[index].is_constrained() {
            return Err(FederationError::AlreadyConstrained(format!(
                "federate {} is already constrained",
                federate
            )));
        }
        self.federates[index].set_constrained(true);
        Ok(())
    }

    pub fn remove_constrained(&mut self, federate: FederateHandle) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        if !self.federates[index].is_constrained() {
            return Err(FederationError::RtiInternal(format!(
                "time constrained is not enabled for federate {}",
                federate
            )));
        }
        self.federates[index].set_constrained(false);
        Ok(())
    }

    /// A member's NULL: record the new clock and relay it to the others.
    pub fn update_regulator(
        &mut self,
        federate: FederateHandle,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        if !self.federates[index].is_regulating() {
            return Err(FederationError::RtiInternal(format!(
                "time regulation is not enabled for federate {}",
                federate
            )));
        }
        self.regulators.update(federate, time)?;

        let mut msg = Message::new(MessageKind::MessageNull);
        msg.set_federation(self.handle);
        msg.set_federate(federate);
        msg.set_date(time);
        self.broadcast(&msg, Some(federate));
        Ok(())
    }

    /**
     * A member's NULL-PRIME: track its expected next-event time, and
     * whenever the minimum over all reported expectations rises above
     * the previous floor, publish the new floor as an anonymous NULL.
     */
    pub fn update_null_prime(
        &mut self,
        federate: FederateHandle,
        time: LogicalTime,
    ) -> Result<(), FederationError> {
        self.ensure_member(federate)?;
        self.null_primes.upsert(federate, time);
        let floor = self.null_primes.lower_bound();
        if floor > self.anonymous_floor {
            self.anonymous_floor = floor;
            let mut msg = Message::new(MessageKind::MessageNull);
            msg.set_federation(self.handle);
            msg.set_federate(ANONYMOUS_FEDERATE);
            msg.set_date(floor);
            self.broadcast(&msg, None);
        }
        Ok(())
    }

    ////////////////  Synchronization labels

    pub fn register_synchronization(
        &mut self,
        federate: FederateHandle,
        label: &str,
        tag: &str,
        targets: &[FederateHandle],
    ) -> Result<(), FederationError> {
        self.ensure_member(federate)?;
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            return Err(FederationError::RtiInternal(format!(
                "synchronization label must be 1 to {} bytes",
                MAX_LABEL_LENGTH
            )));
        }
        if self.has_sync_label(label) {
            return Err(FederationError::FederationAlreadyPaused(format!(
                "label {} is already registered in federation {}",
                label, self.name
            )));
        }
        let awaiting: Vec<FederateHandle> = if targets.is_empty() {
            self.federates.iter().map(|f| f.handle()).collect()
        } else {
            for target in targets {
                self.ensure_member(*target)?;
            }
            targets.to_vec()
        };
        for member in &awaiting {
            if let Ok(index) = self.member_index(*member) {
                self.federates[index].add_pending_label(label);
            }
        }
        debug!(
            "label {} registered in federation {} awaiting {} federates",
            label,
            self.name,
            awaiting.len()
        );
        self.sync_points.push(SyncPoint {
            label: label.to_string(),
            tag: tag.to_string(),
            awaiting,
        });
        Ok(())
    }

    /// Announce the label to every member still awaiting it.
    pub fn announce_synchronization(&mut self, label: &str) -> Result<(), FederationError> {
        let point = self
            .sync_points
            .iter()
            .find(|p| p.label == label)
            .ok_or_else(|| {
                FederationError::FederationNotPaused(format!(
                    "label {} is not registered in federation {}",
                    label, self.name
                ))
            })?;
        let awaiting = point.awaiting.clone();
        let tag = point.tag.clone();

        let mut msg = Message::new(MessageKind::AnnounceSynchronizationPoint);
        msg.set_federation(self.handle);
        msg.set_label(label);
        msg.set_tag(&tag);
        for member in awaiting {
            if let Ok(index) = self.member_index(member) {
                if let Err(e) = self.federates[index].send(&msg) {
                    warn!("failed to announce label {} to federate {}: {}", label, member, e);
                }
            }
        }
        Ok(())
    }

    /**
     * One member achieved the label. When the awaiting set empties, the
     * label is dropped and the synchronized broadcast goes out exactly
     * once. Returns whether the federation converged on this call.
     */
    pub fn synchronization_achieved(
        &mut self,
        federate: FederateHandle,
        label: &str,
    ) -> Result<bool, FederationError> {
        let index = self.member_index(federate)?;
        let position = self
            .sync_points
            .iter()
            .position(|p| p.label == label)
            .ok_or_else(|| {
                FederationError::FederationNotPaused(format!(
                    "label {} is not registered in federation {}",
                    label, self.name
                ))
            })?;
        let point = &mut self.sync_points[position];
        let slot = point
            .awaiting
            .iter()
            .position(|h| *h == federate)
            .ok_or_else(|| {
                FederationError::RtiInternal(format!(
                    "federate {} is not awaiting label {}",
                    federate, label
                ))
            })?;
        point.awaiting.remove(slot);
        self.federates[index].remove_pending_label(label);

        if !self.sync_points[position].awaiting.is_empty() {
            return Ok(false);
        }
        self.sync_points.remove(position);
        debug!("federation {} synchronized on label {}", self.name, label);

        let mut msg = Message::new(MessageKind::FederationSynchronized);
        msg.set_federation(self.handle);
        msg.set_label(label);
        self.broadcast(&msg, None);
        Ok(true)
    }

    ////////////////  Save / Restore

    pub fn request_save(
        &mut self,
        federate: FederateHandle,
        label: &str,
        time: Option<LogicalTime>,
    ) -> Result<(), FederationError> {
        self.ensure_member(federate)?;
        if self.save_in_progress {
            return Err(FederationError::SaveInProgress(format!(
                "a save is already in progress in federation {}",
                self.name
            )));
        }
        self.save_in_progress = true;
        self.save_status = true;
        self.save_label = label.to_string();
        for record in self.federates.iter_mut() {
            record.set_saving(true);
        }

        let mut msg = Message::new(MessageKind::InitiateFederateSave);
        msg.set_federation(self.handle);
        msg.set_label(label);
        if let Some(time) = time {
            msg.set_date(time);
        }
        self.broadcast(&msg, None);
        Ok(())
    }

    pub fn federate_save_begun(&mut self, federate: FederateHandle) -> Result<(), FederationError> {
        self.ensure_member(federate)?;
        debug!("federate {} began saving in federation {}", federate, self.name);
        Ok(())
    }

    /**
     * One member finished its save. Any failure poisons the aggregate.
     * When the last member reports, the image is persisted (aggregate
     * success only) and exactly one terminal broadcast goes out.
     */
    pub fn federate_save_status(
        &mut self,
        federate: FederateHandle,
        ok: bool,
    ) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        self.federates[index].set_saving(false);
        if !ok {
            self.save_status = false;
        }
        if self.federates.iter().any(|f| f.is_saving()) {
            return Ok(());
        }

        if self.save_status {
            if let Err(e) = self.persist_snapshot() {
                warn!("failed to persist federation {} image: {}", self.name, e);
                self.save_status = false;
            }
        }
        let kind = if self.save_status {
            MessageKind::FederationSaved
        } else {
            MessageKind::FederationNotSaved
        };
        let mut msg = Message::new(kind);
        msg.set_federation(self.handle);
        msg.set_label(&self.save_label.clone());
        self.broadcast(&msg, None);

        self.save_in_progress = false;
        self.save_status = true;
        self.save_label.clear();
        Ok(())
    }

    fn persist_snapshot(&self) -> Result<(), FederationError> {
        let snapshot = FederationSnapshot {
            federation: self.handle,
            name: self.name.clone(),
            federates: self
                .federates
                .iter()
                .map(|f| FederateSnapshot {
                    handle: f.handle(),
                    name: f.name().to_string(),
                    constrained: f.is_constrained(),
                    regulating: f.is_regulating(),
                })
                .collect(),
        };
        let path = snapshot_path(&self.name, &self.save_label);
        let mut file = File::create(&path)?;
        write_snapshot(&mut file, &snapshot)?;
        debug!("saved federation {} image to {}", self.name, path.display());
        Ok(())
    }

    fn load_snapshot(&self, label: &str) -> Result<FederationSnapshot, FederationError> {
        let path = snapshot_path(&self.name, label);
        let mut file = File::open(&path).map_err(|e| {
            FederationError::CouldNotRestore(format!("cannot open {}: {}", path.display(), e))
        })?;
        read_snapshot(&mut file)
    }

    /**
     * Start a restore. The requester is answered first; only on an
     * accepted request does the begun broadcast and the per-member
     * initiation go out. Every live member must appear in the image.
     */
    pub fn request_restore(
        &mut self,
        federate: FederateHandle,
        label: &str,
    ) -> Result<(), FederationError> {
        self.ensure_member(federate)?;
        if self.restore_in_progress {
            return Err(FederationError::RestoreInProgress(format!(
                "a restore is already in progress in federation {}",
                self.name
            )));
        }

        let snapshot = match self.load_snapshot(label) {
            Ok(snapshot) => {
                let missing = self
                    .federates
                    .iter()
                    .find(|f| !snapshot.federates.iter().any(|s| s.name == f.name()));
                match missing {
                    Some(missing) => {
                        let reason =
                            format!("federate {} is not in the saved image", missing.name());
                        self.reply_restore_failed(federate, label, &reason);
                        return Ok(());
                    }
                    None => snapshot,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.reply_restore_failed(federate, label, &reason);
                return Ok(());
            }
        };

        let mut accepted = Message::new(MessageKind::RequestFederationRestoreSucceeded);
        accepted.set_federation(self.handle);
        accepted.set_label(label);
        self.send_best_effort(federate, &accepted);

        self.restore_in_progress = true;
        self.restore_status = true;
        for record in self.federates.iter_mut() {
            record.set_restoring(true);
        }

        let mut begun = Message::new(MessageKind::FederationRestoreBegun);
        begun.set_federation(self.handle);
        self.broadcast(&begun, None);

        for index in 0..self.federates.len() {
            let name = self.federates[index].name().to_string();
            let member = self.federates[index].handle();
            if let Some(entry) = snapshot.federates.iter().find(|s| s.name == name) {
                let mut init = Message::new(MessageKind::InitiateFederateRestore);
                init.set_federation(self.handle);
                init.set_label(label);
                init.set_federate(entry.handle);
                if let Err(e) = self.federates[index].send(&init) {
                    warn!("failed to initiate restore for federate {}: {}", member, e);
                }
            }
        }
        Ok(())
    }

    fn reply_restore_failed(&mut self, federate: FederateHandle, label: &str, reason: &str) {
        debug!(
            "restore of federation {} from label {} rejected: {}",
            self.name, label, reason
        );
        let mut msg = Message::new(MessageKind::RequestFederationRestoreFailed);
        msg.set_federation(self.handle);
        msg.set_label(label);
        msg.set_exception(ExceptionKind::CouldNotRestore);
        msg.set_reason(reason);
        self.send_best_effort(federate, &msg);
    }

    pub fn federate_restore_status(
        &mut self,
        federate: FederateHandle,
        ok: bool,
    ) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        self.federates[index].set_restoring(false);
        if !ok {
            self.restore_status = false;
        }
        if self.federates.iter().any(|f| f.is_restoring()) {
            return Ok(());
        }

        let kind = if self.restore_status {
            MessageKind::FederationRestored
        } else {
            MessageKind::FederationNotRestored
        };
        let mut msg = Message::new(kind);
        msg.set_federation(self.handle);
        self.broadcast(&msg, None);

        self.restore_in_progress = false;
        self.restore_status = true;
        Ok(())
    }

    ////////////////  Fan-out

    /**
     * Send to every member except the optional subject. Per-recipient
     * failures are logged and skipped; a broadcast never rolls back.
     */
    pub fn broadcast(&mut self, msg: &Message, except: Option<FederateHandle>) {
        for record in self.federates.iter_mut() {
            if Some(record.handle()) == except {
                continue;
            }
            if let Err(e) = record.send(msg) {
                warn!(
                    "failed to send {:?} to federate {}: {}",
                    msg.kind(),
                    record.handle(),
                    e
                );
            }
        }
    }

    pub fn send_to(
        &mut self,
        federate: FederateHandle,
        msg: &Message,
    ) -> Result<(), FederationError> {
        let index = self.member_index(federate)?;
        self.federates[index].send(msg)
    }

    fn send_best_effort(&mut self, federate: FederateHandle, msg: &Message) {
        if let Err(e) = self.send_to(federate, msg) {
            warn!("failed to send {:?} to federate {}: {}", msg.kind(), federate, e);
        }
    }
}
