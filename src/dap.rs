//! The DAP object: per-AP cached state, SELECT coalescing, debug port
//! bring-up and access port discovery.

use std::time::Duration;

use crate::ap::{
    AccessPort, ApType, GenericAp, MemoryAp, AP_REG_IDR, BASE, CSW_SPROT, IDR_JEP106,
    IDR_JEP106_ARM, IDR_TYPE,
};
use crate::dp::{Ctrl, Select};
use crate::error::{DapError, TransportError};
use crate::transport::{DapTransport, DeferredResultIndex, DeferredResultSet, RunError};
use crate::Register;

/// How long to wait for each power domain acknowledge during bring-up.
const DAP_POWER_DOMAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// How often the power-up handshake is retried before giving up.
const DAP_POWER_UP_ATTEMPTS: usize = 10;

/// Cached state for one access port slot.
///
/// The CSW and TAR caches reflect device state only after a successful flush
/// of their pending writes; `None` means the value on the device is unknown
/// and the next setup must re-emit the register.
#[derive(Debug)]
pub struct ApState {
    ap_num: u8,
    pub(crate) csw_cache: Option<u32>,
    pub(crate) tar_cache: Option<u32>,
    pub(crate) csw_default: u32,
    pub(crate) memaccess_tck: u8,
    pub(crate) tar_autoincr_block: u32,
    pub(crate) packed_transfers: bool,
    pub(crate) unaligned_access_bad: bool,
}

impl ApState {
    fn new(ap_num: u8) -> Self {
        Self {
            ap_num,
            csw_cache: None,
            tar_cache: None,
            csw_default: 0,
            // memaccess_tck max is 255
            memaccess_tck: 255,
            // TAR autoincrement wrap is implementation defined, at least 2^10
            tar_autoincr_block: 1 << 10,
            packed_transfers: false,
            unaligned_access_bad: false,
        }
    }

    /// The number of this AP.
    pub fn ap_num(&self) -> u8 {
        self.ap_num
    }

    /// Whether packed 8/16-bit transfers work on this AP.
    pub fn packed_transfers(&self) -> bool {
        self.packed_transfers
    }

    /// Extra link cycles inserted after each memory access through this AP.
    pub fn memaccess_tck(&self) -> u8 {
        self.memaccess_tck
    }

    /// The CSW bits always ORed into this AP's control word.
    pub fn csw_default(&self) -> u32 {
        self.csw_default
    }
}

/// A handle for one attached target DAP.
///
/// Owns the transport, the 256 per-AP state slots and the cached DP
/// bookkeeping. Created empty by [`Dap::new`], populated by
/// [`Dap::dp_init`] and [`Dap::mem_ap_init`](crate::Dap::mem_ap_init), and
/// lives for the debug session.
pub struct Dap {
    transport: Box<dyn DapTransport>,
    /// Last value written to DP SELECT; `None` forces a re-emit.
    select: Option<u32>,
    /// Shadow of DP CTRL/STAT for the power and overrun-detect bits.
    dp_ctrl_stat: u32,
    /// The AP addressed by user-facing operations.
    apsel: u8,
    /// Apply the TI BE-32 byte-lane workaround to all APs under this DAP.
    ti_be_32_quirks: bool,
    aps: Vec<ApState>,
}

impl std::fmt::Debug for Dap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dap")
            .field("select", &self.select)
            .field("dp_ctrl_stat", &self.dp_ctrl_stat)
            .field("apsel", &self.apsel)
            .field("ti_be_32_quirks", &self.ti_be_32_quirks)
            .finish_non_exhaustive()
    }
}

impl Dap {
    /// Creates a new DAP on top of a transport, with all AP slots at safe
    /// defaults.
    pub fn new(transport: Box<dyn DapTransport>) -> Self {
        Self {
            transport,
            select: None,
            dp_ctrl_stat: 0,
            apsel: 0,
            ti_be_32_quirks: false,
            aps: (0..=255).map(ApState::new).collect(),
        }
    }

    /// Returns the cached state of an AP slot.
    pub fn ap_state(&self, ap: impl AccessPort) -> &ApState {
        &self.aps[usize::from(ap.ap_num())]
    }

    pub(crate) fn ap_state_mut(&mut self, ap: impl AccessPort) -> &mut ApState {
        &mut self.aps[usize::from(ap.ap_num())]
    }

    /// The AP addressed by user-facing operations.
    pub fn apsel(&self) -> u8 {
        self.apsel
    }

    /// Selects the AP addressed by user-facing operations.
    pub fn set_apsel(&mut self, apsel: u8) {
        self.apsel = apsel;
    }

    /// Toggles the CSW SPROT bit in the selected AP's default control word.
    pub fn set_apcsw_sprot(&mut self, sprot: bool) {
        let state = &mut self.aps[usize::from(self.apsel)];
        if sprot {
            state.csw_default |= CSW_SPROT;
        } else {
            state.csw_default &= !CSW_SPROT;
        }
    }

    /// Sets the number of extra link cycles inserted after each memory
    /// access through the selected AP.
    pub fn set_memaccess_tck(&mut self, cycles: u8) {
        self.aps[usize::from(self.apsel)].memaccess_tck = cycles;
    }

    /// Whether the TI BE-32 workaround is active for this DAP.
    pub fn ti_be_32_quirks(&self) -> bool {
        self.ti_be_32_quirks
    }

    /// Enables or disables the TI BE-32 workaround for all APs of this DAP.
    pub fn set_ti_be_32_quirks(&mut self, enable: bool) {
        self.ti_be_32_quirks = enable;
    }

    /// The shadow of the last CTRL/STAT value written by bring-up.
    pub fn dp_ctrl_stat(&self) -> u32 {
        self.dp_ctrl_stat
    }

    fn invalidate_caches(&mut self) {
        self.select = None;
        for ap in &mut self.aps {
            ap.csw_cache = None;
            ap.tar_cache = None;
        }
    }

    /// Queues a DP SELECT update routing AP accesses to `ap_num` and the
    /// register bank of `reg`, unless the cached SELECT already matches.
    fn select_ap_bank(&mut self, ap_num: u8, reg: u8) -> Result<(), DapError> {
        let mut select = Select::default();
        select.set_ap_sel(ap_num);
        select.set_ap_bank_sel(reg >> 4);
        let value = u32::from(select);

        if self.select != Some(value) {
            tracing::trace!("changing DP SELECT to {:#010x}", value);
            self.transport.queue_dp_write(Select::ADDRESS, value)?;
            self.select = Some(value);
        }

        Ok(())
    }

    /// Schedules a read of an AP register, emitting the SELECT update if
    /// needed.
    pub fn queue_ap_read(
        &mut self,
        ap_num: u8,
        reg: u8,
    ) -> Result<DeferredResultIndex, DapError> {
        self.select_ap_bank(ap_num, reg)?;
        let idle_cycles = self.aps[usize::from(ap_num)].memaccess_tck;
        Ok(self.transport.queue_ap_read(reg & 0x0F, idle_cycles)?)
    }

    /// Schedules a write of an AP register, emitting the SELECT update if
    /// needed.
    pub fn queue_ap_write(&mut self, ap_num: u8, reg: u8, value: u32) -> Result<(), DapError> {
        self.select_ap_bank(ap_num, reg)?;
        let idle_cycles = self.aps[usize::from(ap_num)].memaccess_tck;
        Ok(self.transport.queue_ap_write(reg & 0x0F, value, idle_cycles)?)
    }

    /// Schedules a read of a DP register.
    pub fn queue_dp_read(&mut self, reg: u8) -> Result<DeferredResultIndex, DapError> {
        Ok(self.transport.queue_dp_read(reg)?)
    }

    /// Schedules a write of a DP register.
    pub fn queue_dp_write(&mut self, reg: u8, value: u32) -> Result<(), DapError> {
        Ok(self.transport.queue_dp_write(reg, value)?)
    }

    /// Flushes the transaction queue.
    ///
    /// On failure all cached register state is treated as stale, so the next
    /// setup re-emits SELECT, CSW and TAR.
    pub fn run(&mut self) -> Result<DeferredResultSet, RunError> {
        match self.transport.run() {
            Ok(results) => Ok(results),
            Err(failure) => {
                self.invalidate_caches();
                Err(failure)
            }
        }
    }

    fn poll_dp_register(
        &mut self,
        reg: u8,
        mask: u32,
        expected: u32,
        timeout: Duration,
    ) -> Result<u32, DapError> {
        match self.transport.poll_register(reg, mask, expected, timeout) {
            Ok(value) => Ok(value),
            Err(error) => {
                self.invalidate_caches();
                Err(error.into())
            }
        }
    }

    /// Initializes the debug port: sets up the power domains, clears sticky
    /// errors and arms overrun detection.
    ///
    /// The power-up acknowledge can race the chip-side power domain ramp, so
    /// the whole handshake is retried a fixed number of times before the
    /// last error is surfaced.
    pub fn dp_init(&mut self) -> Result<(), DapError> {
        tracing::debug!("initializing debug port");
        self.select = None;

        let mut result = Ok(());
        for attempt in 0..DAP_POWER_UP_ATTEMPTS {
            result = self.try_dp_init();
            match &result {
                Ok(()) => break,
                Err(error) => {
                    tracing::debug!("debug port power-up attempt {attempt} failed: {error}")
                }
            }
        }
        result
    }

    fn try_dp_init(&mut self) -> Result<(), DapError> {
        // Pull any pending status, then clear the sticky error flag.
        self.queue_dp_read(Ctrl::ADDRESS)?;
        let mut clear = Ctrl::default();
        clear.set_sticky_err(true);
        self.queue_dp_write(Ctrl::ADDRESS, clear.into())?;
        self.queue_dp_read(Ctrl::ADDRESS)?;

        let mut ctrl = Ctrl::default();
        ctrl.set_cdbgpwrupreq(true);
        ctrl.set_csyspwrupreq(true);
        self.dp_ctrl_stat = ctrl.clone().into();
        self.queue_dp_write(Ctrl::ADDRESS, self.dp_ctrl_stat)?;

        tracing::debug!("waiting for CDBGPWRUPACK");
        self.poll_dp_register(
            Ctrl::ADDRESS,
            Ctrl::CDBGPWRUPACK,
            Ctrl::CDBGPWRUPACK,
            DAP_POWER_DOMAIN_TIMEOUT,
        )?;
        tracing::debug!("waiting for CSYSPWRUPACK");
        self.poll_dp_register(
            Ctrl::ADDRESS,
            Ctrl::CSYSPWRUPACK,
            Ctrl::CSYSPWRUPACK,
            DAP_POWER_DOMAIN_TIMEOUT,
        )?;

        self.queue_dp_read(Ctrl::ADDRESS)?;

        // With debug power on, overrun checking can be activated.
        ctrl.set_orun_detect(true);
        self.dp_ctrl_stat = ctrl.into();
        self.queue_dp_write(Ctrl::ADDRESS, self.dp_ctrl_stat)?;
        self.queue_dp_read(Ctrl::ADDRESS)?;

        self.run()?;
        Ok(())
    }

    /// Scans AP indices 0..=255 for the first AP designed by ARM whose type
    /// field matches.
    ///
    /// Reading the IDR of a non-existent AP produces an error rather than a
    /// zero value on some transports; the scan treats a failed flush as
    /// "keep going".
    pub fn find_ap(&mut self, type_to_find: ApType) -> Result<GenericAp, DapError> {
        for ap_num in 0..=255u8 {
            let token = self.queue_ap_read(ap_num, AP_REG_IDR)?;
            let Ok(mut results) = self.run() else {
                continue;
            };
            let Some(id_val) = results.take(token) else {
                continue;
            };

            if id_val & IDR_JEP106 == IDR_JEP106_ARM && id_val & IDR_TYPE == type_to_find as u32 {
                tracing::debug!(
                    "found {:?} at AP index {} (IDR = {:#010x})",
                    type_to_find,
                    ap_num,
                    id_val
                );
                return Ok(GenericAp::new(ap_num));
            }
        }

        tracing::debug!("no {:?} found", type_to_find);
        Err(DapError::ApNotFound(type_to_find))
    }

    /// Fetches a MEM-AP's debug base address and its IDR in a single flush.
    pub fn get_debugbase(&mut self, ap: MemoryAp) -> Result<(u32, u32), DapError> {
        let dbgbase = self.queue_ap_read(ap.ap_num(), BASE::ADDRESS)?;
        let apid = self.queue_ap_read(ap.ap_num(), AP_REG_IDR)?;
        let mut results = self.run()?;

        let dbgbase = results
            .take(dbgbase)
            .ok_or(TransportError::Protocol)?;
        let apid = results.take(apid).ok_or(TransportError::Protocol)?;
        Ok((dbgbase, apid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Emitted, MockHandle, MockTransport};

    fn mock_dap() -> (Dap, MockHandle) {
        let mock = MockTransport::new();
        let handle = mock.handle();
        (Dap::new(Box::new(mock)), handle)
    }

    #[test]
    fn dp_init_powers_up_and_arms_overrun_detect() {
        let (mut dap, mock) = mock_dap();

        dap.dp_init().unwrap();
        assert_eq!(dap.dp_ctrl_stat(), 0x5000_0001);

        // The last CTRL/STAT write of the handshake arms overrun detection.
        let last_ctrl_write = mock
            .log()
            .iter()
            .rev()
            .find_map(|entry| match entry {
                Emitted::DpWrite { reg: 0x4, value } => Some(*value),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_ctrl_write, 0x5000_0001);
        assert!(mock.ctrl_stat() & Ctrl::CDBGPWRUPACK != 0);
        assert!(mock.ctrl_stat() & Ctrl::CSYSPWRUPACK != 0);
    }

    #[test]
    fn dp_init_retries_after_a_failed_flush() {
        let (mut dap, mock) = mock_dap();
        mock.set_fail_runs(2);

        dap.dp_init().unwrap();
        assert_eq!(dap.dp_ctrl_stat(), 0x5000_0001);
    }

    #[test]
    fn dp_init_retries_while_power_ack_is_slow() {
        let (mut dap, mock) = mock_dap();
        mock.set_pwrup_wait_polls(3);

        dap.dp_init().unwrap();
    }

    #[test]
    fn select_updates_are_coalesced() {
        let (mut dap, mock) = mock_dap();

        // Two reads through the same AP and bank need one SELECT update.
        dap.queue_ap_read(0, 0x00).unwrap();
        dap.queue_ap_read(0, 0x04).unwrap();
        // A bank change forces another one.
        dap.queue_ap_read(0, 0xFC).unwrap();
        dap.run().unwrap();

        let selects: Vec<u32> = mock
            .log()
            .iter()
            .filter_map(|entry| match entry {
                Emitted::DpWrite { reg: 0x8, value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(selects, vec![0x0000_0000, 0x0000_00F0]);
    }

    #[test]
    fn select_cache_is_invalidated_by_a_failed_flush() {
        let (mut dap, mock) = mock_dap();
        mock.set_fail_runs(1);

        dap.queue_ap_read(0, 0x00).unwrap();
        assert!(dap.run().is_err());

        dap.queue_ap_read(0, 0x00).unwrap();
        dap.run().unwrap();

        let selects = mock
            .log()
            .iter()
            .filter(|entry| matches!(entry, Emitted::DpWrite { reg: 0x8, .. }))
            .count();
        assert_eq!(selects, 2);
    }

    #[test]
    fn find_ap_skips_faulting_slots() {
        let (mut dap, mock) = mock_dap();
        mock.set_missing_ap_faults(true);
        mock.insert_ap_idr(2, 0x2477_0011);

        let ap = dap.find_ap(ApType::AhbAp).unwrap();
        assert_eq!(ap.ap_num(), 2);
    }

    #[test]
    fn find_ap_reports_missing_type() {
        let (mut dap, mock) = mock_dap();
        mock.insert_ap_idr(0, 0x2477_0011);

        assert!(matches!(
            dap.find_ap(ApType::AxiAp),
            Err(DapError::ApNotFound(ApType::AxiAp))
        ));
    }

    #[test]
    fn get_debugbase_fetches_base_and_idr_in_one_flush() {
        let (mut dap, mock) = mock_dap();
        mock.insert_ap_idr(0, 0x2477_0011);
        mock.set_base(0xE00F_F003);

        let (dbgbase, apid) = dap.get_debugbase(MemoryAp::new(0)).unwrap();
        assert_eq!(dbgbase, 0xE00F_F003);
        assert_eq!(apid, 0x2477_0011);
        assert_eq!(mock.runs(), 1);
    }

    #[test]
    fn configuration_applies_to_the_selected_ap() {
        let (mut dap, _mock) = mock_dap();
        dap.set_apsel(3);
        assert_eq!(dap.apsel(), 3);

        dap.set_apcsw_sprot(true);
        assert_eq!(dap.ap_state(GenericAp::new(3)).csw_default(), CSW_SPROT);
        dap.set_apcsw_sprot(false);
        assert_eq!(dap.ap_state(GenericAp::new(3)).csw_default(), 0);

        dap.set_memaccess_tck(12);
        assert_eq!(dap.ap_state(GenericAp::new(3)).memaccess_tck(), 12);
        assert_eq!(dap.ap_state(GenericAp::new(0)).memaccess_tck(), 255);
    }

    #[test]
    fn ap_idle_cycles_ride_along_with_queued_operations() {
        let (mut dap, mock) = mock_dap();
        dap.set_apsel(0);
        dap.set_memaccess_tck(8);

        dap.queue_ap_read(0, 0x00).unwrap();
        dap.run().unwrap();
        assert!(mock.log().iter().any(|entry| matches!(
            entry,
            Emitted::ApRead { ap: 0, reg: 0x00, idle_cycles: 8 }
        )));
    }
}
