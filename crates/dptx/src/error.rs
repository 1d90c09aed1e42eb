//! Driver error taxonomy.
//!
//! Peripheral-reported failures are routed through state transitions, never
//! panics. The only fatal condition is a chip-identity mismatch at attach.

use thiserror::Error;

use crate::bus::BusError;

/// An AUX-channel transaction failed.
///
/// AUX failures are recoverable: the engine resets the AUX sub-block and the
/// calling state machine treats the operation as failed-this-attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuxError {
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The busy bit never cleared within the bounded poll.
    #[error("aux transaction timed out")]
    Timeout,

    /// The controller reported a nonzero completion status nibble.
    #[error("aux transaction failed with status {0:#03x}")]
    Status(u8),

    /// Request exceeds the 16-byte burst limit.
    #[error("aux burst of {0} bytes exceeds the 16-byte fifo")]
    BurstTooLong(usize),
}

/// Device-attach failure. Not retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The 16-bit identifier matched none of the supported silicon revisions.
    #[error("unrecognized chip identity {0:#06x}")]
    ChipIdentity(u16),

    #[error(transparent)]
    Bus(#[from] BusError),
}
