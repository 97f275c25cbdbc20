//! A deterministic transport double backed by a simulated MEM-AP target.
//!
//! The mock executes the queued transactions against a small memory image
//! with real MEM-AP semantics: CSW size and increment fields, TAR wrap at
//! the autoincrement block, packed sub-transfers, banked data registers and
//! the TI BE-32 byte-lane behavior. It also records every emitted
//! transaction so tests can assert on the exact traffic the driver
//! generates.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::TransportError;
use crate::transport::{
    CommandJournal, DapTransport, DeferredResultIndex, DeferredResultSet, QueuedCommand, RunError,
};

/// One transaction as it left the driver, in emission order.
///
/// AP entries carry the full 8-bit register address, reconstructed from the
/// SELECT value that was pending when they were queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    DpRead { reg: u8 },
    DpWrite { reg: u8, value: u32 },
    ApRead { ap: u8, reg: u8, idle_cycles: u8 },
    ApWrite { ap: u8, reg: u8, value: u32, idle_cycles: u8 },
}

#[derive(Debug)]
struct MockState {
    journal: CommandJournal,
    log: Vec<Emitted>,

    // Select routing as seen at queue time (for the log) and at execution
    // time (for the device).
    queued_select: u32,
    select: u32,

    // DP state.
    ctrl_stat: u32,
    sticky_err: bool,
    powered: bool,
    pwrup_polls_left: usize,

    // MEM-AP device state (AP #0).
    csw: u32,
    tar: u32,
    memory: Vec<u8>,
    tar_autoincr_block: u32,
    supports_packed: bool,
    be_32: bool,
    base: u32,
    cfg: u32,

    // Per-AP IDR values; APs not listed are absent.
    ap_idr: HashMap<u8, u32>,
    missing_ap_faults: bool,

    // Fault injection.
    fail_runs: usize,
    fail_once_at_ap_op: Option<usize>,
    fail_from_ap_op: Option<usize>,
    ap_ops_seen: usize,

    runs: usize,
}

impl MockState {
    fn new() -> Self {
        Self {
            journal: CommandJournal::new(),
            log: Vec::new(),
            queued_select: 0,
            select: 0,
            ctrl_stat: 0,
            sticky_err: false,
            powered: false,
            pwrup_polls_left: 0,
            csw: 0,
            tar: 0,
            memory: vec![0; 0x1_0000],
            tar_autoincr_block: 1 << 10,
            supports_packed: true,
            be_32: false,
            base: 0,
            cfg: 0,
            ap_idr: HashMap::new(),
            missing_ap_faults: false,
            fail_runs: 0,
            fail_once_at_ap_op: None,
            fail_from_ap_op: None,
            ap_ops_seen: 0,
            runs: 0,
        }
    }

    fn queued_ap(&self) -> u8 {
        (self.queued_select >> 24) as u8
    }

    fn queued_bank(&self) -> u8 {
        ((self.queued_select >> 4) & 0xF) as u8
    }

    fn dp_read(&mut self, reg: u8) -> u32 {
        match reg {
            0x4 => {
                if self.ctrl_stat & (1 << 28) != 0 {
                    if self.pwrup_polls_left == 0 {
                        self.powered = true;
                    } else {
                        self.pwrup_polls_left -= 1;
                    }
                }
                let mut value = self.ctrl_stat;
                if self.powered {
                    if self.ctrl_stat & (1 << 28) != 0 {
                        value |= 1 << 29;
                    }
                    if self.ctrl_stat & (1 << 30) != 0 {
                        value |= 1 << 31;
                    }
                }
                if self.sticky_err {
                    value |= 1 << 5;
                }
                value
            }
            0x8 => self.select,
            _ => 0,
        }
    }

    fn dp_write(&mut self, reg: u8, value: u32) {
        match reg {
            0x4 => {
                if value & (1 << 5) != 0 {
                    self.sticky_err = false;
                }
                self.ctrl_stat = value & !((1 << 5) | (1 << 29) | (1 << 31));
            }
            0x8 => self.select = value,
            _ => {}
        }
    }

    fn mem_read_u8(&self, address: u32) -> Result<u8, TransportError> {
        self.memory
            .get(address as usize)
            .copied()
            .ok_or(TransportError::Fault)
    }

    fn mem_write_u8(&mut self, address: u32, value: u8) -> Result<(), TransportError> {
        match self.memory.get_mut(address as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(TransportError::Fault),
        }
    }

    fn csw_size_bytes(&self) -> Result<u32, TransportError> {
        match self.csw & 0x7 {
            0 => Ok(1),
            1 => Ok(2),
            2 => Ok(4),
            _ => Err(TransportError::Fault),
        }
    }

    fn incr_tar(&mut self, size: u32) {
        let block = self.tar_autoincr_block;
        self.tar = (self.tar & !(block - 1)) | (self.tar.wrapping_add(size) & (block - 1));
    }

    /// One sub-transfer of `size` bytes at the current TAR.
    fn single_read(&mut self, size: u32) -> Result<u32, TransportError> {
        let mut word = 0u32;
        if self.be_32 {
            for k in 0..size {
                let addr = self.tar.wrapping_add(k);
                let lane = 3 ^ (addr & 3);
                word |= u32::from(self.mem_read_u8(addr)?) << (8 * lane);
            }
        } else {
            for k in 0..size {
                let addr = self.tar.wrapping_add(k);
                let lane = addr & 3;
                word |= u32::from(self.mem_read_u8(addr)?) << (8 * lane);
            }
        }
        Ok(word)
    }

    fn single_write(&mut self, size: u32, value: u32) -> Result<(), TransportError> {
        if self.be_32 {
            // Sub-word writes land at TAR ^ {0,2,3} with big-endian lanes.
            let xor = match size {
                4 => 0,
                2 => 2,
                _ => 3,
            };
            let effective = self.tar ^ xor;
            for k in 0..size {
                let addr = effective.wrapping_add(k);
                let lane = 3 ^ (addr & 3);
                self.mem_write_u8(addr, (value >> (8 * lane)) as u8)?;
            }
        } else {
            for k in 0..size {
                let addr = self.tar.wrapping_add(k);
                let lane = addr & 3;
                self.mem_write_u8(addr, (value >> (8 * lane)) as u8)?;
            }
        }
        Ok(())
    }

    fn drw_read(&mut self) -> Result<u32, TransportError> {
        let size = self.csw_size_bytes()?;
        match self.csw & 0x30 {
            0x20 => {
                if !self.supports_packed {
                    return Err(TransportError::Fault);
                }
                let mut word = 0;
                for _ in 0..(4 / size) {
                    word |= self.single_read(size)?;
                    self.incr_tar(size);
                }
                Ok(word)
            }
            0x10 => {
                let word = self.single_read(size)?;
                self.incr_tar(size);
                Ok(word)
            }
            _ => self.single_read(size),
        }
    }

    fn drw_write(&mut self, value: u32) -> Result<(), TransportError> {
        let size = self.csw_size_bytes()?;
        match self.csw & 0x30 {
            0x20 => {
                if !self.supports_packed {
                    return Err(TransportError::Fault);
                }
                for _ in 0..(4 / size) {
                    self.single_write(size, value)?;
                    self.incr_tar(size);
                }
                Ok(())
            }
            0x10 => {
                self.single_write(size, value)?;
                self.incr_tar(size);
                Ok(())
            }
            _ => self.single_write(size, value),
        }
    }

    fn bd_address(&self, reg: u8) -> u32 {
        (self.tar & !0xF) + u32::from(reg - 0x10)
    }

    fn bd_read(&self, reg: u8) -> Result<u32, TransportError> {
        let addr = self.bd_address(reg);
        let mut word = 0;
        for k in 0..4 {
            word |= u32::from(self.mem_read_u8(addr + k)?) << (8 * k);
        }
        Ok(word)
    }

    fn bd_write(&mut self, reg: u8, value: u32) -> Result<(), TransportError> {
        let addr = self.bd_address(reg);
        for k in 0..4 {
            self.mem_write_u8(addr + k, (value >> (8 * k)) as u8)?;
        }
        Ok(())
    }

    fn ap_op_gate(&mut self) -> Result<(), TransportError> {
        let index = self.ap_ops_seen;
        self.ap_ops_seen += 1;
        if self.fail_once_at_ap_op == Some(index) {
            return Err(TransportError::Fault);
        }
        if let Some(first_bad) = self.fail_from_ap_op {
            if index >= first_bad {
                return Err(TransportError::Fault);
            }
        }
        Ok(())
    }

    fn ap_read(&mut self, reg: u8) -> Result<u32, TransportError> {
        let ap = (self.select >> 24) as u8;
        let full_reg = (((self.select >> 4) & 0xF) as u8) << 4 | reg;

        if full_reg == 0xFC {
            return match self.ap_idr.get(&ap) {
                Some(idr) => Ok(*idr),
                None if self.missing_ap_faults => Err(TransportError::Fault),
                None => Ok(0),
            };
        }
        if ap != 0 {
            return if self.missing_ap_faults {
                Err(TransportError::Fault)
            } else {
                Ok(0)
            };
        }

        match full_reg {
            0x00 => {
                // Packed increment reads back as zero when unsupported.
                if !self.supports_packed && self.csw & 0x30 == 0x20 {
                    Ok(self.csw & !0x30)
                } else {
                    Ok(self.csw)
                }
            }
            0x04 => Ok(self.tar),
            0x0C => self.drw_read(),
            0x10 | 0x14 | 0x18 | 0x1C => self.bd_read(full_reg),
            0xF4 => Ok(self.cfg),
            0xF8 => Ok(self.base),
            _ => Ok(0),
        }
    }

    fn ap_write(&mut self, reg: u8, value: u32) -> Result<(), TransportError> {
        let ap = (self.select >> 24) as u8;
        let full_reg = (((self.select >> 4) & 0xF) as u8) << 4 | reg;

        if ap != 0 {
            return if self.missing_ap_faults {
                Err(TransportError::Fault)
            } else {
                Ok(())
            };
        }

        match full_reg {
            0x00 => self.csw = value,
            0x04 => self.tar = value,
            0x0C => self.drw_write(value)?,
            0x10 | 0x14 | 0x18 | 0x1C => self.bd_write(full_reg, value)?,
            _ => {}
        }
        Ok(())
    }

    fn run(&mut self) -> Result<DeferredResultSet, RunError> {
        self.runs += 1;

        if self.fail_runs > 0 {
            self.fail_runs -= 1;
            let _ = self.journal.drain().count();
            return Err(RunError {
                error: TransportError::Fault,
                results: DeferredResultSet::new(),
            });
        }

        let mut results = DeferredResultSet::new();
        let commands: Vec<QueuedCommand> = self.journal.drain().collect();
        for command in commands {
            let outcome = self.execute(command, &mut results);
            if let Err(error) = outcome {
                // Remaining commands were drained with the journal; their
                // destinations stay unresolved.
                return Err(RunError { error, results });
            }
        }
        Ok(results)
    }

    fn execute(
        &mut self,
        command: QueuedCommand,
        results: &mut DeferredResultSet,
    ) -> Result<(), TransportError> {
        match command {
            QueuedCommand::DpRead { reg, dest } => {
                let value = self.dp_read(reg);
                results.insert(&dest, value);
            }
            QueuedCommand::DpWrite { reg, value } => self.dp_write(reg, value),
            QueuedCommand::ApRead { reg, dest, .. } => {
                self.ap_op_gate()?;
                let value = self.ap_read(reg)?;
                results.insert(&dest, value);
            }
            QueuedCommand::ApWrite { reg, value, .. } => {
                self.ap_op_gate()?;
                self.ap_write(reg, value)?;
            }
        }
        Ok(())
    }
}

/// The mock transport handed to [`Dap::new`](crate::Dap::new) in tests.
#[derive(Debug)]
pub struct MockTransport {
    inner: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MockState::new())),
        }
    }

    /// Returns a handle that stays usable after the transport was moved into
    /// a DAP.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl DapTransport for MockTransport {
    fn queue_dp_read(&mut self, reg: u8) -> Result<DeferredResultIndex, TransportError> {
        let state = &mut *self.inner.borrow_mut();
        state.log.push(Emitted::DpRead { reg });
        Ok(state.journal.push_dp_read(reg))
    }

    fn queue_dp_write(&mut self, reg: u8, value: u32) -> Result<(), TransportError> {
        let state = &mut *self.inner.borrow_mut();
        state.log.push(Emitted::DpWrite { reg, value });
        if reg == 0x8 {
            state.queued_select = value;
        }
        state.journal.push_dp_write(reg, value);
        Ok(())
    }

    fn queue_ap_read(
        &mut self,
        reg: u8,
        idle_cycles: u8,
    ) -> Result<DeferredResultIndex, TransportError> {
        let state = &mut *self.inner.borrow_mut();
        let full_reg = state.queued_bank() << 4 | reg;
        let ap = state.queued_ap();
        state.log.push(Emitted::ApRead {
            ap,
            reg: full_reg,
            idle_cycles,
        });
        Ok(state.journal.push_ap_read(reg, idle_cycles))
    }

    fn queue_ap_write(
        &mut self,
        reg: u8,
        value: u32,
        idle_cycles: u8,
    ) -> Result<(), TransportError> {
        let state = &mut *self.inner.borrow_mut();
        let full_reg = state.queued_bank() << 4 | reg;
        let ap = state.queued_ap();
        state.log.push(Emitted::ApWrite {
            ap,
            reg: full_reg,
            value,
            idle_cycles,
        });
        state.journal.push_ap_write(reg, value, idle_cycles);
        Ok(())
    }

    fn run(&mut self) -> Result<DeferredResultSet, RunError> {
        self.inner.borrow_mut().run()
    }
}

/// Inspection and configuration access to a [`MockTransport`]'s state.
#[derive(Debug)]
pub struct MockHandle {
    inner: Rc<RefCell<MockState>>,
}

impl MockHandle {
    pub fn log(&self) -> Vec<Emitted> {
        self.inner.borrow().log.clone()
    }

    pub fn runs(&self) -> usize {
        self.inner.borrow().runs
    }

    pub fn ctrl_stat(&self) -> u32 {
        let state = &mut *self.inner.borrow_mut();
        state.dp_read(0x4)
    }

    pub fn tar(&self) -> u32 {
        self.inner.borrow().tar
    }

    pub fn memory(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.inner.borrow();
        state.memory[address as usize..address as usize + len].to_vec()
    }

    pub fn set_memory(&self, address: u32, data: &[u8]) {
        let state = &mut *self.inner.borrow_mut();
        state.memory[address as usize..address as usize + data.len()].copy_from_slice(data);
    }

    pub fn set_memory_u32(&self, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.set_memory(address + 4 * i as u32, &word.to_le_bytes());
        }
    }

    pub fn set_supports_packed(&self, enable: bool) {
        self.inner.borrow_mut().supports_packed = enable;
    }

    pub fn set_be_32(&self, enable: bool) {
        self.inner.borrow_mut().be_32 = enable;
    }

    pub fn set_base(&self, base: u32) {
        self.inner.borrow_mut().base = base;
    }

    pub fn set_cfg(&self, cfg: u32) {
        self.inner.borrow_mut().cfg = cfg;
    }

    pub fn insert_ap_idr(&self, ap: u8, idr: u32) {
        self.inner.borrow_mut().ap_idr.insert(ap, idr);
    }

    pub fn set_missing_ap_faults(&self, enable: bool) {
        self.inner.borrow_mut().missing_ap_faults = enable;
    }

    pub fn set_pwrup_wait_polls(&self, polls: usize) {
        self.inner.borrow_mut().pwrup_polls_left = polls;
    }

    pub fn set_fail_runs(&self, count: usize) {
        self.inner.borrow_mut().fail_runs = count;
    }

    pub fn set_fail_once_at_ap_op(&self, index: usize) {
        self.inner.borrow_mut().fail_once_at_ap_op = Some(index);
    }

    pub fn set_fail_from_ap_op(&self, index: usize) {
        self.inner.borrow_mut().fail_from_ap_op = Some(index);
    }
}
