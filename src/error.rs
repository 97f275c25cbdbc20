use crate::ap::ApType;
use crate::transport::RunError;
use crate::RegisterParseError;

/// An error on the physical link between debugger and target.
///
/// These are produced by [`DapTransport`](crate::transport::DapTransport)
/// implementations and propagated through the driver verbatim.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The target responded with a WAIT acknowledge for longer than the
    /// transport was willing to retry.
    #[error("target kept responding with WAIT to the request")]
    Wait,
    /// The target responded with a FAULT acknowledge; a sticky error flag is
    /// set in the DP.
    #[error("target responded with a FAULT acknowledge")]
    Fault,
    /// The response from the target violated the wire protocol.
    #[error("protocol error in the communication between probe and target")]
    Protocol,
    /// The sticky overrun flag is set: a transaction was issued before the
    /// previous one completed. The debug port must be re-initialized.
    #[error("overrun detected, the debug port needs to be re-initialized")]
    Overrun,
    /// A register poll did not reach the expected value before its timeout.
    #[error("timeout while waiting for a register to reach the expected value")]
    Timeout,
}

/// An error surfaced by the DAP driver.
#[derive(Debug, thiserror::Error)]
pub enum DapError {
    /// A fault on the physical link.
    #[error("transport failure")]
    Transport(#[from] TransportError),

    /// The requested access size is not one of 1, 2 or 4 bytes, or the
    /// address is not aligned to the access size on an AP that cannot
    /// perform unaligned accesses.
    #[error("unaligned access of address {address:#010x} with size {size}")]
    UnalignedAccess {
        /// The requested start address.
        address: u32,
        /// The requested access size in bytes.
        size: u32,
    },

    /// A ROM table search was exhausted without finding the requested
    /// component. Recoverable; the component may simply not exist.
    #[error("no matching CoreSight component found in the ROM tables")]
    ResourceNotAvailable,

    /// No access port of the requested type exists on this DAP.
    #[error("no {0:?} found on this DAP")]
    ApNotFound(ApType),

    /// The scratch buffer backing a block read could not be allocated.
    #[error("failed to allocate a scratch buffer of {words} words")]
    Allocation {
        /// The requested capacity in 32-bit words.
        words: usize,
    },

    /// A register value read back from the target did not parse.
    #[error(transparent)]
    RegisterParse(#[from] RegisterParseError),
}

impl From<RunError> for DapError {
    fn from(failure: RunError) -> Self {
        DapError::Transport(failure.error)
    }
}
