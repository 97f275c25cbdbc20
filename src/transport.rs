//! The capability set the DAP core consumes from a physical link driver.
//!
//! Transports are *queued*: DP and AP register operations are enqueued and
//! only hit the wire when [`DapTransport::run`] flushes the journal. A queued
//! read hands back a [`DeferredResultIndex`]; the value becomes available in
//! the [`DeferredResultSet`] returned by the flush. Nothing about a queued
//! read may be assumed before `run` returns success — results of operations
//! queued after the first failing one are never inserted into the set.

#[cfg(test)]
pub(crate) mod mock;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Operations provided by a physical link driver (serial wire or scan chain).
///
/// AP operations address the register inside the currently selected AP bank;
/// emitting and coalescing DP SELECT updates is the DAP layer's job. The
/// `idle_cycles` argument carries the AP's configured number of extra link
/// cycles to insert after a memory access.
pub trait DapTransport {
    /// Schedule a DP register read.
    fn queue_dp_read(&mut self, reg: u8) -> Result<DeferredResultIndex, TransportError>;

    /// Schedule a DP register write.
    fn queue_dp_write(&mut self, reg: u8, value: u32) -> Result<(), TransportError>;

    /// Schedule an AP register read.
    fn queue_ap_read(&mut self, reg: u8, idle_cycles: u8)
        -> Result<DeferredResultIndex, TransportError>;

    /// Schedule an AP register write.
    fn queue_ap_write(
        &mut self,
        reg: u8,
        value: u32,
        idle_cycles: u8,
    ) -> Result<(), TransportError>;

    /// Flush the journal.
    ///
    /// Returns `Ok` only if every queued operation was acknowledged
    /// successfully; the set then contains a value for every scheduled read.
    /// On failure the journal is drained and the [`RunError`] classifies the
    /// first fault that occurred, carrying the results of the operations
    /// that completed before it.
    fn run(&mut self) -> Result<DeferredResultSet, RunError>;

    /// Flush and re-read `reg` until `(value & mask) == expected` or the
    /// timeout elapses.
    fn poll_register(
        &mut self,
        reg: u8,
        mask: u32,
        expected: u32,
        timeout: Duration,
    ) -> Result<u32, TransportError> {
        let start = Instant::now();
        loop {
            let token = self.queue_dp_read(reg)?;
            let mut results = self.run().map_err(|failure| failure.error)?;
            let value = results.take(token).ok_or(TransportError::Protocol)?;
            if value & mask == expected {
                return Ok(value);
            }
            if start.elapsed() >= timeout {
                tracing::debug!(
                    "timeout polling DP register {:#04x} for {:#010x} (last read {:#010x})",
                    reg,
                    expected,
                    value
                );
                return Err(TransportError::Timeout);
            }
        }
    }
}

/// A failed flush of the transaction queue.
///
/// Carries the first fault and the results of the operations that were
/// acknowledged before it. Destinations of reads queued after the fault are
/// never resolved.
#[derive(Debug, thiserror::Error)]
#[error("transaction queue flush failed ({error}) after {} completed reads", .results.len())]
pub struct RunError {
    /// The first fault encountered while executing the queue.
    pub error: TransportError,
    /// Results of the reads that completed before the fault.
    pub results: DeferredResultSet,
}

/// Handle for the result of a queued read.
///
/// Tokens are take-once: [`DeferredResultSet::take`] consumes the captured
/// value. A token is only valid against the result set of the flush that
/// resolved it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeferredResultIndex(u64);

/// The values captured for queued reads by a successful flush.
#[derive(Debug, Default)]
pub struct DeferredResultSet {
    results: HashMap<u64, u32>,
}

impl DeferredResultSet {
    /// Creates an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the value captured for a read.
    pub fn insert(&mut self, index: &DeferredResultIndex, value: u32) {
        self.results.insert(index.0, value);
    }

    /// Takes the value captured for `index`, if the read completed.
    pub fn take(&mut self, index: DeferredResultIndex) -> Option<u32> {
        self.results.remove(&index.0)
    }

    /// Returns the number of captured values.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns whether no values were captured.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// A single queued transaction, as recorded in a transport's journal.
#[derive(Debug)]
pub enum QueuedCommand {
    /// A DP register read resolving into `dest`.
    DpRead { reg: u8, dest: DeferredResultIndex },
    /// A DP register write.
    DpWrite { reg: u8, value: u32 },
    /// An AP register read resolving into `dest`.
    ApRead {
        reg: u8,
        idle_cycles: u8,
        dest: DeferredResultIndex,
    },
    /// An AP register write.
    ApWrite {
        reg: u8,
        value: u32,
        idle_cycles: u8,
    },
}

/// FIFO of pending transactions, owned by a transport implementation.
///
/// The journal allocates the read tokens handed back to the core; a transport
/// drains it in [`DapTransport::run`], executes the commands in order and
/// resolves each read token into the result set.
#[derive(Debug, Default)]
pub struct CommandJournal {
    commands: VecDeque<QueuedCommand>,
    next_token: u64,
}

impl CommandJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> (DeferredResultIndex, DeferredResultIndex) {
        let token = self.next_token;
        self.next_token += 1;
        (DeferredResultIndex(token), DeferredResultIndex(token))
    }

    /// Appends a DP read and returns the token its result will resolve to.
    pub fn push_dp_read(&mut self, reg: u8) -> DeferredResultIndex {
        let (dest, token) = self.allocate();
        self.commands.push_back(QueuedCommand::DpRead { reg, dest });
        token
    }

    /// Appends a DP write.
    pub fn push_dp_write(&mut self, reg: u8, value: u32) {
        self.commands.push_back(QueuedCommand::DpWrite { reg, value });
    }

    /// Appends an AP read and returns the token its result will resolve to.
    pub fn push_ap_read(&mut self, reg: u8, idle_cycles: u8) -> DeferredResultIndex {
        let (dest, token) = self.allocate();
        self.commands.push_back(QueuedCommand::ApRead {
            reg,
            idle_cycles,
            dest,
        });
        token
    }

    /// Appends an AP write.
    pub fn push_ap_write(&mut self, reg: u8, value: u32, idle_cycles: u8) {
        self.commands.push_back(QueuedCommand::ApWrite {
            reg,
            value,
            idle_cycles,
        });
    }

    /// Removes and returns all pending commands, oldest first.
    ///
    /// The journal is empty afterwards even if the caller stops executing
    /// commands at the first failure.
    pub fn drain(&mut self) -> impl Iterator<Item = QueuedCommand> {
        std::mem::take(&mut self.commands).into_iter()
    }

    /// Returns the number of pending commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns whether no commands are pending.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
