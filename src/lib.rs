//! Driver for the ARM Debug Interface v5 (ADIv5) Debug Access Port.
//!
//! A DAP consists of a Debug Port (DP), which terminates the physical link
//! from the debugger, and up to 256 Access Ports (APs), which expose on-chip
//! resources. The most common AP is the MEM-AP, a window onto the target's
//! memory-mapped bus. This crate drives that register model on top of a
//! pluggable, *queued* transport: operations are enqueued, then transmitted
//! in one batch when the queue is flushed. Queuing is what makes the driver
//! usable over high-latency links; per-register round trips are not.
//!
//! The main pieces are:
//!
//! * [`transport::DapTransport`] — the capability set a physical link driver
//!   (serial wire or scan chain) provides to the core.
//! * [`Dap`] — the per-target handle: per-AP cached state, DP SELECT
//!   coalescing, power-up bring-up and AP discovery.
//! * MEM-AP memory access on [`Dap`]: banked single-word reads and writes,
//!   and block transfers at 8/16/32-bit access width with packed-transfer
//!   support and TI BE-32 byte-lane compensation.
//! * [`romtable`] — the CoreSight ROM table walker used to locate debug
//!   components behind a MEM-AP.
//!
//! Everything here is single-threaded by design: a `Dap` is owned by one
//! debug session, and the only suspension points are the transport's
//! `run` and `poll_register` operations.

pub mod ap;
pub mod dap;
pub mod dp;
pub mod error;
pub mod memory;
pub mod romtable;
pub mod transport;

pub use crate::ap::{ApType, GenericAp, MemoryAp};
pub use crate::dap::Dap;
pub use crate::error::{DapError, TransportError};
pub use crate::romtable::CoresightComponent;
pub use crate::transport::{DapTransport, DeferredResultIndex, DeferredResultSet, RunError};

use std::fmt::Debug;

/// A trait implemented by register types for typed device access.
pub trait Register:
    Clone + TryFrom<u32, Error = RegisterParseError> + Into<u32> + Sized + Debug
{
    /// The address of the register (in bytes).
    const ADDRESS: u8;
    /// The name of the register as string.
    const NAME: &'static str;
}

/// The raw value read back for a register did not parse into the typed
/// representation.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse register {name} from {value:#010x}")]
pub struct RegisterParseError {
    name: &'static str,
    value: u32,
}

impl RegisterParseError {
    pub fn new(name: &'static str, value: u32) -> Self {
        RegisterParseError { name, value }
    }
}
