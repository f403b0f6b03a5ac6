/**
 * @file
 * @brief Error taxonomy of the coordination runtime and its wire mapping.
 * Every fault a federate can observe is a `FederationError`; replies carry
 * the matching `ExceptionKind` discriminant plus a reason string.
 */
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FederationError {
    #[error("federate is not an execution member: {0}")]
    FederateNotExecutionMember(String),
    #[error("federate is already an execution member: {0}")]
    FederateAlreadyExecutionMember(String),
    #[error("federation execution already exists: {0}")]
    FederationExecutionAlreadyExists(String),
    #[error("federation execution does not exist: {0}")]
    FederationExecutionDoesNotExist(String),
    #[error("federates currently joined: {0}")]
    FederatesCurrentlyJoined(String),
    #[error("time regulation already enabled: {0}")]
    AlreadyRegulating(String),
    #[error("time constrained already enabled: {0}")]
    AlreadyConstrained(String),
    #[error("federation time already passed: {0}")]
    FederationTimeAlreadyPassed(String),
    #[error("time advance already in progress: {0}")]
    TimeAdvanceAlreadyInProgress(String),
    #[error("invalid lookahead: {0}")]
    InvalidLookahead(String),
    #[error("save already in progress: {0}")]
    SaveInProgress(String),
    #[error("restore already in progress: {0}")]
    RestoreInProgress(String),
    #[error("federation already paused: {0}")]
    FederationAlreadyPaused(String),
    #[error("federation is not paused: {0}")]
    FederationNotPaused(String),
    #[error("could not open federation description: {0}")]
    CouldNotOpenFed(String),
    #[error("error reading federation description: {0}")]
    ErrorReadingFed(String),
    #[error("could not restore federation: {0}")]
    CouldNotRestore(String),
    #[error("internal error: {0}")]
    RtiInternal(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/**
 * Wire discriminant of a `FederationError`. Byte 0 is reserved for
 * "no exception" in reply frames.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    FederateNotExecutionMember,
    FederateAlreadyExecutionMember,
    FederationExecutionAlreadyExists,
    FederationExecutionDoesNotExist,
    FederatesCurrentlyJoined,
    AlreadyRegulating,
    AlreadyConstrained,
    FederationTimeAlreadyPassed,
    TimeAdvanceAlreadyInProgress,
    InvalidLookahead,
    SaveInProgress,
    RestoreInProgress,
    FederationAlreadyPaused,
    FederationNotPaused,
    CouldNotOpenFed,
    ErrorReadingFed,
    CouldNotRestore,
    RtiInternal,
}

impl ExceptionKind {
    pub fn to_byte(&self) -> u8 {
        match self {
            ExceptionKind::FederateNotExecutionMember => 1,
            ExceptionKind::FederateAlreadyExecutionMember => 2,
            ExceptionKind::FederationExecutionAlreadyExists => 3,
            ExceptionKind::FederationExecutionDoesNotExist => 4,
            ExceptionKind::FederatesCurrentlyJoined => 5,
            ExceptionKind::AlreadyRegulating => 6,
            ExceptionKind::AlreadyConstrained => 7,
            ExceptionKind::FederationTimeAlreadyPassed => 8,
            ExceptionKind::TimeAdvanceAlreadyInProgress => 9,
            ExceptionKind::InvalidLookahead => 10,
            ExceptionKind::SaveInProgress => 11,
            ExceptionKind::RestoreInProgress => 12,
            ExceptionKind::FederationAlreadyPaused => 13,
            ExceptionKind::FederationNotPaused => 14,
            ExceptionKind::CouldNotOpenFed => 15,
            ExceptionKind::ErrorReadingFed => 16,
            ExceptionKind::CouldNotRestore => 17,
            ExceptionKind::RtiInternal => 18,
        }
    }

    pub fn from_byte(byte: u8) -> Option<ExceptionKind> {
        match byte {
            1 => Some(ExceptionKind::FederateNotExecutionMember),
            2 => Some(ExceptionKind::FederateAlreadyExecutionMember),
            3 => Some(ExceptionKind::FederationExecutionAlreadyExists),
            4 => Some(ExceptionKind::FederationExecutionDoesNotExist),
            5 => Some(ExceptionKind::FederatesCurrentlyJoined),
            6 => Some(ExceptionKind::AlreadyRegulating),
            7 => Some(ExceptionKind::AlreadyConstrained),
            8 => Some(ExceptionKind::FederationTimeAlreadyPassed),
            9 => Some(ExceptionKind::TimeAdvanceAlreadyInProgress),
            10 => Some(ExceptionKind::InvalidLookahead),
            11 => Some(ExceptionKind::SaveInProgress),
            12 => Some(ExceptionKind::RestoreInProgress),
            13 => Some(ExceptionKind::FederationAlreadyPaused),
            14 => Some(ExceptionKind::FederationNotPaused),
            15 => Some(ExceptionKind::CouldNotOpenFed),
            16 => Some(ExceptionKind::ErrorReadingFed),
            17 => Some(ExceptionKind::CouldNotRestore),
            18 => Some(ExceptionKind::RtiInternal),
            _ => None,
        }
    }

    /// Rebuild the typed error on the decoding side of a reply.
    pub fn into_error(self, reason: String) -> FederationError {
        match self {
            ExceptionKind::FederateNotExecutionMember => {
                FederationError::FederateNotExecutionMember(reason)
            }
            ExceptionKind::FederateAlreadyExecutionMember => {
                FederationError::FederateAlreadyExecutionMember(reason)
            }
            ExceptionKind::FederationExecutionAlreadyExists => {
                FederationError::FederationExecutionAlreadyExists(reason)
            }
            ExceptionKind::FederationExecutionDoesNotExist => {
                FederationError::FederationExecutionDoesNotExist(reason)
            }
            ExceptionKind::FederatesCurrentlyJoined => {
                FederationError::FederatesCurrentlyJoined(reason)
            }
            ExceptionKind::AlreadyRegulating => FederationError::AlreadyRegulating(reason),
            ExceptionKind::AlreadyConstrained => FederationError::AlreadyConstrained(reason),
            ExceptionKind::FederationTimeAlreadyPassed => {
                FederationError::FederationTimeAlreadyPassed(reason)
            }
            ExceptionKind::TimeAdvanceAlreadyInProgress => {
                FederationError::TimeAdvanceAlreadyInProgress(reason)
            }
            ExceptionKind::InvalidLookahead => FederationError::InvalidLookahead(reason),
            ExceptionKind::SaveInProgress => FederationError::SaveInProgress(reason),
            ExceptionKind::RestoreInProgress => FederationError::RestoreInProgress(reason),
            ExceptionKind::FederationAlreadyPaused => {
                FederationError::FederationAlreadyPaused(reason)
            }
            ExceptionKind::FederationNotPaused => FederationError::FederationNotPaused(reason),
            ExceptionKind::CouldNotOpenFed => FederationError::CouldNotOpenFed(reason),
            ExceptionKind::ErrorReadingFed => FederationError::ErrorReadingFed(reason),
            ExceptionKind::CouldNotRestore => FederationError::CouldNotRestore(reason),
            ExceptionKind::RtiInternal => FederationError::RtiInternal(reason),
        }
    }
}

impl FederationError {
    /**
     * The wire discriminant used when this error travels in a reply.
     * Transport and codec failures are never sent as-is; they collapse
     * to the internal-error kind.
     */
    pub fn kind(&self) -> ExceptionKind {
        match self {
            FederationError::FederateNotExecutionMember(_) => {
                ExceptionKind::FederateNotExecutionMember
            }
            FederationError::FederateAlreadyExecutionMember(_) => {
                ExceptionKind::FederateAlreadyExecutionMember
            }
            FederationError::FederationExecutionAlreadyExists(_) => {
                ExceptionKind::FederationExecutionAlreadyExists
            }
            FederationError::FederationExecutionDoesNotExist(_) => {
                ExceptionKind::FederationExecutionDoesNotExist
            }
            FederationError::FederatesCurrentlyJoined(_) => ExceptionKind::FederatesCurrentlyJoined,
            FederationError::AlreadyRegulating(_) => ExceptionKind::AlreadyRegulating,
            FederationError::AlreadyConstrained(_) => ExceptionKind::AlreadyConstrained,
            FederationError::FederationTimeAlreadyPassed(_) => {
                ExceptionKind::FederationTimeAlreadyPassed
            }
            FederationError::TimeAdvanceAlreadyInProgress(_) => {
                ExceptionKind::TimeAdvanceAlreadyInProgress
            }
            FederationError::InvalidLookahead(_) => ExceptionKind::InvalidLookahead,
            FederationError::SaveInProgress(_) => ExceptionKind::SaveInProgress,
            FederationError::RestoreInProgress(_) => ExceptionKind::RestoreInProgress,
            FederationError::FederationAlreadyPaused(_) => ExceptionKind::FederationAlreadyPaused,
            FederationError::FederationNotPaused(_) => ExceptionKind::FederationNotPaused,
            FederationError::CouldNotOpenFed(_) => ExceptionKind::CouldNotOpenFed,
            FederationError::ErrorReadingFed(_) => ExceptionKind::ErrorReadingFed,
            FederationError::CouldNotRestore(_) => ExceptionKind::CouldNotRestore,
            FederationError::RtiInternal(_) => ExceptionKind::RtiInternal,
            FederationError::Protocol(_) => ExceptionKind::RtiInternal,
            FederationError::Io(_) => ExceptionKind::RtiInternal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_kind_byte_round_trip_positive() {
        let kinds = [
            ExceptionKind::FederateNotExecutionMember,
            ExceptionKind::FederateAlreadyExecutionMember,
            ExceptionKind::FederationExecutionAlreadyExists,
            ExceptionKind::FederationExecutionDoesNotExist,
            ExceptionKind::FederatesCurrentlyJoined,
            ExceptionKind::AlreadyRegulating,
            ExceptionKind::AlreadyConstrained,
            ExceptionKind::FederationTimeAlreadyPassed,
            ExceptionKind::TimeAdvanceAlreadyInProgress,
            ExceptionKind::InvalidLookahead,
            ExceptionKind::SaveInProgress,
            ExceptionKind::RestoreInProgress,
            ExceptionKind::FederationAlreadyPaused,
            ExceptionKind::FederationNotPaused,
            ExceptionKind::CouldNotOpenFed,
            ExceptionKind::ErrorReadingFed,
            ExceptionKind::CouldNotRestore,
            ExceptionKind::RtiInternal,
        ];
        for kind in kinds {
            assert_eq!(Some(kind), ExceptionKind::from_byte(kind.to_byte()));
        }
    }

    #[test]
    fn test_exception_kind_from_byte_negative() {
        assert_eq!(None, ExceptionKind::from_byte(0));
        assert_eq!(None, ExceptionKind::from_byte(200));
    }

    #[test]
    fn test_error_kind_mapping_positive() {
        let err = FederationError::FederationTimeAlreadyPassed(String::from("t=3"));
        assert_eq!(ExceptionKind::FederationTimeAlreadyPassed, err.kind());

        let rebuilt = err.kind().into_error(String::from("t=3"));
        assert_eq!(ExceptionKind::FederationTimeAlreadyPassed, rebuilt.kind());

        let io = FederationError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        ));
        assert_eq!(ExceptionKind::RtiInternal, io.kind());
    }
}
