/**
 * @file
 * @brief The set of live federation executions, keyed by name and by
 * handle. The executive owns one directory for the process lifetime.
 */
use tracing::debug;

use crate::errors::FederationError;
use crate::federation::Federation;
use crate::message::{FederateHandle, FederationHandle};

////////////////  Type definitions

/// Hands out federation handles, monotonically, never reused.
#[derive(Debug)]
struct FederationHandleAllocator {
    next: u32,
}

pub struct FederationDirectory {
    federations: Vec<Federation>,
    allocator: FederationHandleAllocator,
}

////////////////  Functions

impl FederationHandleAllocator {
    fn new() -> FederationHandleAllocator {
        FederationHandleAllocator { next: 1 }
    }

    fn allocate(&mut self) -> FederationHandle {
        let handle = FederationHandle::from_raw(self.next);
        self.next += 1;
        handle
    }
}

impl FederationDirectory {
    pub fn new() -> FederationDirectory {
        FederationDirectory {
            federations: Vec::new(),
            allocator: FederationHandleAllocator::new(),
        }
    }

    pub fn federation_count(&self) -> usize {
        self.federations.len()
    }

    pub fn lookup(&self, name: &str) -> Option<&Federation> {
        self.federations.iter().find(|f| f.name() == name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Federation> {
        self.federations.iter_mut().find(|f| f.name() == name)
    }

    pub fn handle_of(&self, name: &str) -> Option<FederationHandle> {
        self.lookup(name).map(|f| f.handle())
    }

    pub fn federation(&self, federation: FederationHandle) -> Option<&Federation> {
        self.federations.iter().find(|f| f.handle() == federation)
    }

    pub fn federation_mut(
        &mut self,
        federation: FederationHandle,
    ) -> Result<&mut Federation, FederationError> {
        self.federations
            .iter_mut()
            .find(|f| f.handle() == federation)
            .ok_or_else(|| {
                FederationError::FederationExecutionDoesNotExist(format!(
                    "no federation with handle {}",
                    federation
                ))
            })
    }

    /**
     * Create an execution. The name must be unused and the model
     * description file readable; a failed creation still consumes the
     * allocated handle.
     */
    pub fn create_federation(
        &mut self,
        name: &str,
        model_path: &str,
    ) -> Result<FederationHandle, FederationError> {
        if self.lookup(name).is_some() {
            return Err(FederationError::FederationExecutionAlreadyExists(format!(
                "federation {} already exists",
                name
            )));
        }
        let handle = self.allocator.allocate();
        let federation = Federation::new(handle, name, model_path)?;
        debug!("created federation {} with handle {}", name, handle);
        self.federations.push(federation);
        Ok(handle)
    }

    /// Destroy an execution. Refused while any federate is joined.
    pub fn destroy_federation(&mut self, name: &str) -> Result<(), FederationError> {
        let index = self
            .federations
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| {
                FederationError::FederationExecutionDoesNotExist(format!(
                    "no federation named {}",
                    name
                ))
            })?;
        self.federations[index].ensure_empty()?;
        self.federations.remove(index);
        debug!("destroyed federation {}", name);
        Ok(())
    }

    /**
     * Forced removal of one member after its transport died. Unknown
     * federations are ignored; the connection is already gone.
     */
    pub fn kill_federate(&mut self, federation: FederationHandle, federate: FederateHandle) {
        match self.federation_mut(federation) {
            Ok(found) => found.kill_federate(federate),
            Err(_) => debug!(
                "ignoring dead federate {} of unknown federation {}",
                federate, federation
            ),
        }
    }
}
