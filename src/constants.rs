/**
 * @file
 * @brief Protocol and runtime constants shared by the executive and the agents.
 */

/// Default TCP port of the federation executive.
pub const DEFAULT_PORT: u16 = 60400;

/// Substitute for a zero lookahead while a time advance is in flight.
/// Never surfaces to callers; `set_lookahead` rejects it as input.
pub const ZERO_LOOKAHEAD_EPSILON: f64 = 1.0e-4;

/// First two bytes of every frame on the wire.
pub const WIRE_MAGIC: u16 = 0x4654;

/// Bumped whenever the frame layout changes.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on the body length accepted by the decoder.
pub const MAX_BODY_SIZE: u32 = 1 << 20;

pub const MAX_FEDERATION_NAME_LENGTH: usize = 256;

pub const MAX_LABEL_LENGTH: usize = 100;

/// Magic number at the start of a federation snapshot file.
pub const SNAPSHOT_MAGIC: u32 = 0x46534E50;

pub const SNAPSHOT_VERSION: u16 = 1;

/// File extension of persisted federation snapshots.
pub const SNAPSHOT_EXTENSION: &str = "fsv";
