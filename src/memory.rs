//! MEM-AP memory access: register staging, single-word I/O and the block
//! transfer engine.

use crate::ap::{
    AccessPort, MemoryAp, CFG, CSW, CSW_16BIT, CSW_32BIT, CSW_8BIT, CSW_ADDRINC_MASK,
    CSW_ADDRINC_OFF, CSW_ADDRINC_PACKED, CSW_ADDRINC_SINGLE, CSW_DBGSWENABLE, CSW_HPROT,
    CSW_MASTER_DEBUG, DRW, MEM_AP_REG_BD0, TAR,
};
use crate::ap::AddressIncrement;
use crate::dap::Dap;
use crate::error::{DapError, TransportError};
use crate::transport::{DeferredResultIndex, DeferredResultSet};
use crate::Register;

/// Returns the largest block starting at `address` that does not cross a TAR
/// autoincrement boundary.
fn max_tar_block_size(tar_autoincr_block: u32, address: u32) -> u32 {
    tar_autoincr_block - ((tar_autoincr_block - 1) & address)
}

impl Dap {
    /// Queues a CSW update for this MEM-AP, unless the cached value already
    /// matches.
    ///
    /// DBGSWENABLE, the debug master bits, HPROT and the AP's configured
    /// default bits are always ORed in.
    pub(crate) fn mem_ap_setup_csw(&mut self, ap: MemoryAp, csw: u32) -> Result<(), DapError> {
        let state = self.ap_state(ap);
        let csw = csw | CSW_DBGSWENABLE | CSW_MASTER_DEBUG | CSW_HPROT | state.csw_default;

        if state.csw_cache != Some(csw) {
            self.queue_ap_write(ap.ap_num(), CSW::ADDRESS, csw)?;
            self.ap_state_mut(ap).csw_cache = Some(csw);
        }
        Ok(())
    }

    /// Queues a TAR update for this MEM-AP.
    ///
    /// The write is elided only when the cached TAR matches *and* the
    /// current CSW has address increment off: with autoincrement enabled the
    /// device mutates TAR behind the driver's back, so the cached value
    /// cannot be trusted.
    pub(crate) fn mem_ap_setup_tar(&mut self, ap: MemoryAp, tar: u32) -> Result<(), DapError> {
        let state = self.ap_state(ap);
        let autoinc_active = state
            .csw_cache
            .map_or(true, |csw| csw & CSW_ADDRINC_MASK != 0);

        if state.tar_cache != Some(tar) || autoinc_active {
            self.queue_ap_write(ap.ap_num(), TAR::ADDRESS, tar)?;
            self.ap_state_mut(ap).tar_cache = Some(tar);
        }
        Ok(())
    }

    /// Queues transactions setting up transfer parameters for this MEM-AP.
    pub(crate) fn mem_ap_setup_transfer(
        &mut self,
        ap: MemoryAp,
        csw: u32,
        tar: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_setup_csw(ap, csw)?;
        self.mem_ap_setup_tar(ap, tar)
    }

    /// Queues a read of the 32-bit word at `address`.
    ///
    /// Uses banked addressing (BD0..BD3) so that successive accesses inside
    /// the same aligned 16-byte window need no TAR update. The returned
    /// token resolves once the queue is flushed.
    pub fn mem_ap_read_u32(
        &mut self,
        ap: MemoryAp,
        address: u32,
    ) -> Result<DeferredResultIndex, DapError> {
        self.mem_ap_setup_transfer(ap, CSW_32BIT | CSW_ADDRINC_OFF, address & 0xFFFF_FFF0)?;
        self.queue_ap_read(ap.ap_num(), MEM_AP_REG_BD0 | (address & 0xC) as u8)
    }

    /// Synchronously reads the 32-bit word at `address`, flushing the queue.
    pub fn mem_ap_read_atomic_u32(&mut self, ap: MemoryAp, address: u32) -> Result<u32, DapError> {
        let token = self.mem_ap_read_u32(ap, address)?;
        let mut results = self.run()?;
        Ok(results.take(token).ok_or(TransportError::Protocol)?)
    }

    /// Queues a write of the 32-bit word at `address`, through the banked
    /// data registers.
    pub fn mem_ap_write_u32(
        &mut self,
        ap: MemoryAp,
        address: u32,
        value: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_setup_transfer(ap, CSW_32BIT | CSW_ADDRINC_OFF, address & 0xFFFF_FFF0)?;
        self.queue_ap_write(
            ap.ap_num(),
            MEM_AP_REG_BD0 | (address & 0xC) as u8,
            value,
        )
    }

    /// Synchronously writes the 32-bit word at `address`, flushing the
    /// queue.
    pub fn mem_ap_write_atomic_u32(
        &mut self,
        ap: MemoryAp,
        address: u32,
        value: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_write_u32(ap, address, value)?;
        self.run()?;
        Ok(())
    }

    /// Synchronously writes a block of memory with autoincrementing target
    /// address.
    ///
    /// `size` is the access size in bytes (1, 2 or 4), `count` the number of
    /// accesses; `buffer` holds `size * count` bytes without alignment
    /// requirements.
    pub fn mem_ap_write_buf(
        &mut self,
        ap: MemoryAp,
        buffer: &[u8],
        size: u32,
        count: u32,
        address: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_write(ap, buffer, size, count, address, true)
    }

    /// Synchronously writes a block to a fixed target address, for FIFO-like
    /// peripherals.
    pub fn mem_ap_write_buf_noincr(
        &mut self,
        ap: MemoryAp,
        buffer: &[u8],
        size: u32,
        count: u32,
        address: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_write(ap, buffer, size, count, address, false)
    }

    /// Synchronously reads a block of memory with autoincrementing target
    /// address.
    pub fn mem_ap_read_buf(
        &mut self,
        ap: MemoryAp,
        buffer: &mut [u8],
        size: u32,
        count: u32,
        address: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_read(ap, buffer, size, count, address, true)
    }

    /// Synchronously reads a block from a fixed target address, for
    /// FIFO-like peripherals.
    pub fn mem_ap_read_buf_noincr(
        &mut self,
        ap: MemoryAp,
        buffer: &mut [u8],
        size: u32,
        count: u32,
        address: u32,
    ) -> Result<(), DapError> {
        self.mem_ap_read(ap, buffer, size, count, address, false)
    }

    fn mem_ap_write(
        &mut self,
        ap: MemoryAp,
        buffer: &[u8],
        size: u32,
        count: u32,
        address: u32,
        addrinc: bool,
    ) -> Result<(), DapError> {
        debug_assert_eq!(buffer.len(), (size as usize) * (count as usize));

        // TI BE-32 quirks mode: the target swaps byte lanes so that sub-word
        // writes land at the wrong byte. Compensate by XORing the address
        // before setting TAR and when picking byte lanes, and set TAR after
        // every transfer instead of relying on address increment.
        let quirks = self.ti_be_32_quirks();
        let (csw_size, addr_xor) = match size {
            4 => (CSW_32BIT, 0),
            2 => (CSW_16BIT, if quirks { 2 } else { 0 }),
            1 => (CSW_8BIT, if quirks { 3 } else { 0 }),
            _ => return Err(DapError::UnalignedAccess { address, size }),
        };

        if self.ap_state(ap).unaligned_access_bad && address % size != 0 {
            return Err(DapError::UnalignedAccess { address, size });
        }

        let result = self
            .queue_write_chunks(ap, buffer, size, csw_size, addr_xor, address, addrinc)
            .and_then(|()| {
                self.run()?;
                Ok(())
            });

        if result.is_err() {
            match self.read_back_tar(ap) {
                Some(tar) => tracing::error!("failed to write memory at {:#010x}", tar),
                None => tracing::error!(
                    "failed to write memory and, additionally, failed to find out where"
                ),
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_write_chunks(
        &mut self,
        ap: MemoryAp,
        buffer: &[u8],
        size: u32,
        csw_size: u32,
        addr_xor: u32,
        mut address: u32,
        addrinc: bool,
    ) -> Result<(), DapError> {
        let quirks = self.ti_be_32_quirks();
        let csw_addrincr = if addrinc {
            CSW_ADDRINC_SINGLE
        } else {
            CSW_ADDRINC_OFF
        };
        let state = self.ap_state(ap);
        let packed_transfers = state.packed_transfers;
        let tar_autoincr_block = state.tar_autoincr_block;

        self.mem_ap_setup_tar(ap, address ^ addr_xor)?;

        let mut offset = 0usize;
        let mut nbytes = buffer.len();
        while nbytes > 0 {
            // Select a packed transfer if possible.
            let packed = addrinc
                && packed_transfers
                && nbytes >= 4
                && max_tar_block_size(tar_autoincr_block, address) >= 4;
            let this_size = if packed { 4 } else { size };

            if packed {
                self.mem_ap_setup_csw(ap, csw_size | CSW_ADDRINC_PACKED)?;
            } else {
                self.mem_ap_setup_csw(ap, csw_size | csw_addrincr)?;
            }

            // How many source bytes each transfer consumes, and their
            // location in the DRW, depends on the transfer type and
            // alignment. See ARM document IHI0031C.
            let mut outvalue = 0u32;
            if quirks {
                let lane_base = match this_size {
                    4 => 3,
                    2 => 1,
                    _ => 0,
                };
                for k in 0..this_size {
                    let lane = lane_base ^ (address.wrapping_add(k) & 3) ^ addr_xor;
                    outvalue |= u32::from(buffer[offset + k as usize]) << (8 * lane);
                }
            } else {
                for k in 0..this_size {
                    let lane = address.wrapping_add(k) & 3;
                    outvalue |= u32::from(buffer[offset + k as usize]) << (8 * lane);
                }
            }
            address = address.wrapping_add(this_size);
            offset += this_size as usize;
            nbytes -= this_size as usize;

            self.queue_ap_write(ap.ap_num(), DRW::ADDRESS, outvalue)?;

            // Rewrite TAR if it wrapped or addresses are being XORed.
            if addrinc
                && (addr_xor != 0 || (address % tar_autoincr_block < size && nbytes > 0))
            {
                self.mem_ap_setup_tar(ap, address ^ addr_xor)?;
            }
        }

        Ok(())
    }

    fn mem_ap_read(
        &mut self,
        ap: MemoryAp,
        buffer: &mut [u8],
        size: u32,
        count: u32,
        address: u32,
        addrinc: bool,
    ) -> Result<(), DapError> {
        debug_assert_eq!(buffer.len(), (size as usize) * (count as usize));

        // TI BE-32 reads behave differently from writes: they read from the
        // requested address, but with the DRW byte-reversed. Packed 8/16-bit
        // transfers return garbage in some bytes, so mem_ap_init disables
        // them when the quirk is active.
        let csw_size = match size {
            4 => CSW_32BIT,
            2 => CSW_16BIT,
            1 => CSW_8BIT,
            _ => return Err(DapError::UnalignedAccess { address, size }),
        };

        if self.ap_state(ap).unaligned_access_bad && address % size != 0 {
            return Err(DapError::UnalignedAccess { address, size });
        }

        // One slot per queued DRW read. A significant over-allocation if
        // packed transfers end up being used, but determining the real need
        // here would be messy.
        let mut tokens: Vec<DeferredResultIndex> = Vec::new();
        tokens
            .try_reserve_exact(count as usize)
            .map_err(|_| DapError::Allocation {
                words: count as usize,
            })?;

        let queued =
            self.queue_read_chunks(ap, buffer.len(), size, csw_size, address, addrinc, &mut tokens);

        let flushed: Result<DeferredResultSet, (DapError, DeferredResultSet)> = match queued {
            Ok(()) => self
                .run()
                .map_err(|failure| (failure.error.into(), failure.results)),
            Err(error) => Err((error, DeferredResultSet::new())),
        };

        let mut nbytes = buffer.len();

        let (mut results, failure) = match flushed {
            Ok(results) => (results, None),
            Err((error, partial)) => (partial, Some(error)),
        };

        // If something failed, read TAR to find out how much data was
        // successfully transferred, so the caller at least gets that much.
        if failure.is_some() {
            match self.read_back_tar(ap) {
                Some(tar) => {
                    tracing::error!("failed to read memory at {:#010x}", tar);
                    let transferred = tar.wrapping_sub(address) as usize;
                    if nbytes > transferred {
                        nbytes = transferred;
                    }
                }
                None => {
                    tracing::error!(
                        "failed to read memory and, additionally, failed to find out where"
                    );
                    nbytes = 0;
                }
            }
        }

        self.replay_read_chunks(ap, buffer, &mut results, tokens, size, address, nbytes, addrinc);

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn queue_read_chunks(
        &mut self,
        ap: MemoryAp,
        total_bytes: usize,
        size: u32,
        csw_size: u32,
        mut address: u32,
        addrinc: bool,
        tokens: &mut Vec<DeferredResultIndex>,
    ) -> Result<(), DapError> {
        let csw_addrincr = if addrinc {
            CSW_ADDRINC_SINGLE
        } else {
            CSW_ADDRINC_OFF
        };
        let state = self.ap_state(ap);
        let packed_transfers = state.packed_transfers;
        let tar_autoincr_block = state.tar_autoincr_block;

        self.mem_ap_setup_tar(ap, address)?;

        let mut nbytes = total_bytes;
        while nbytes > 0 {
            let packed = addrinc
                && packed_transfers
                && nbytes >= 4
                && max_tar_block_size(tar_autoincr_block, address) >= 4;
            let this_size = if packed { 4 } else { size };

            if packed {
                self.mem_ap_setup_csw(ap, csw_size | CSW_ADDRINC_PACKED)?;
            } else {
                self.mem_ap_setup_csw(ap, csw_size | csw_addrincr)?;
            }

            tokens.push(self.queue_ap_read(ap.ap_num(), DRW::ADDRESS)?);

            nbytes -= this_size as usize;
            address = address.wrapping_add(this_size);

            // Rewrite TAR if it wrapped.
            if addrinc && address % tar_autoincr_block < size && nbytes > 0 {
                self.mem_ap_setup_tar(ap, address)?;
            }
        }

        Ok(())
    }

    /// Walks the chunks a second time and moves the useful bytes of each
    /// captured DRW word into the caller's buffer.
    #[allow(clippy::too_many_arguments)]
    fn replay_read_chunks(
        &self,
        ap: MemoryAp,
        buffer: &mut [u8],
        results: &mut DeferredResultSet,
        tokens: Vec<DeferredResultIndex>,
        size: u32,
        mut address: u32,
        mut nbytes: usize,
        addrinc: bool,
    ) {
        let quirks = self.ti_be_32_quirks();
        let state = self.ap_state(ap);
        let packed_transfers = state.packed_transfers;
        let tar_autoincr_block = state.tar_autoincr_block;

        let mut offset = 0usize;
        let mut tokens = tokens.into_iter();
        while nbytes > 0 {
            let packed = addrinc
                && packed_transfers
                && nbytes >= 4
                && max_tar_block_size(tar_autoincr_block, address) >= 4;
            let this_size = if packed { 4 } else { size };

            let Some(token) = tokens.next() else {
                break;
            };
            let Some(word) = results.take(token) else {
                break;
            };

            for k in 0..this_size {
                let lane = if quirks {
                    3 - (address.wrapping_add(k) & 3)
                } else {
                    address.wrapping_add(k) & 3
                };
                buffer[offset + k as usize] = (word >> (8 * lane)) as u8;
            }

            address = address.wrapping_add(this_size);
            offset += this_size as usize;
            nbytes -= this_size as usize;
        }
    }

    /// Reads back the AP's TAR for failure diagnostics. Returns `None` if
    /// even that does not succeed.
    fn read_back_tar(&mut self, ap: MemoryAp) -> Option<u32> {
        let token = self.queue_ap_read(ap.ap_num(), TAR::ADDRESS).ok()?;
        let mut results = self.run().ok()?;
        results.take(token)
    }

    /// Probes and configures a MEM-AP for use: packed transfer support,
    /// unaligned access policy and the CFG extensions.
    pub fn mem_ap_init(&mut self, ap: MemoryAp) -> Result<(), DapError> {
        // Check whether packed transfers are supported, by setting the
        // packed increment mode and reading it back.
        self.mem_ap_setup_transfer(ap, CSW_8BIT | CSW_ADDRINC_PACKED, 0)?;
        let csw = self.queue_ap_read(ap.ap_num(), CSW::ADDRESS)?;
        let cfg = self.queue_ap_read(ap.ap_num(), CFG::ADDRESS)?;
        let mut results = self.run()?;

        let csw = results.take(csw).ok_or(TransportError::Protocol)?;
        let cfg = results.take(cfg).ok_or(TransportError::Protocol)?;

        let csw = CSW::try_from(csw)?;
        let mut packed_transfers = csw.AddrInc == AddressIncrement::Packed;

        // Packed transfers on TI BE-32 processors do not work correctly in
        // many cases.
        if self.ti_be_32_quirks() {
            packed_transfers = false;
        }

        tracing::debug!(
            "MEM-AP packed transfers: {}",
            if packed_transfers { "enabled" } else { "disabled" }
        );

        // The ADI spec leaves it implementation-defined whether unaligned
        // accesses work, work partially, or set a sticky error. On TI BE-32
        // processors reads return garbage in some bytes and unaligned writes
        // set a sticky error.
        let unaligned_access_bad = self.ti_be_32_quirks();

        let cfg = CFG::try_from(cfg)?;
        tracing::debug!(
            "MEM-AP CFG: large data {}, long address {}, big-endian {}",
            cfg.LD,
            cfg.LA,
            cfg.BE
        );

        let state = self.ap_state_mut(ap);
        state.packed_transfers = packed_transfers;
        state.unaligned_access_bad = unaligned_access_bad;

        Ok(())
    }
}
