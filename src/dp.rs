//! Debug Port register definitions.

use bitfield::bitfield;

use crate::{Register, RegisterParseError};

/// Address of the RDBUFF register. Reading it returns the posted result of
/// the previous AP read without starting a new transaction.
pub const DP_RDBUFF: u8 = 0xC;

bitfield! {
    /// The AP ABORT register. Write-only; clears the sticky error flags.
    #[derive(Clone)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

impl Default for Abort {
    fn default() -> Self {
        Abort(0)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

impl TryFrom<u32> for Abort {
    type Error = RegisterParseError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(Abort(raw))
    }
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    /// The CTRL/STAT register: power domain handshake, transfer mode and the
    /// sticky error flags.
    ///
    /// The sticky flags are write-one-to-clear, so the setters double as the
    /// clear operations.
    #[derive(Clone)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub cdbgrstreq, set_cdbgrstreq: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub u8, mask_lane, set_mask_lane: 11, 8;
    pub wdataerr, _: 7;
    pub readok, _: 6;
    pub sticky_err, set_sticky_err: 5;
    pub sticky_cmp, set_sticky_cmp: 4;
    pub u8, trn_mode, _: 3, 2;
    pub sticky_orun, set_sticky_orun: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl Ctrl {
    /// Mask of the system power-up acknowledge bit.
    pub const CSYSPWRUPACK: u32 = 1 << 31;
    /// Mask of the debug power-up acknowledge bit.
    pub const CDBGPWRUPACK: u32 = 1 << 29;
}

impl Default for Ctrl {
    fn default() -> Self {
        Ctrl(0)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

impl TryFrom<u32> for Ctrl {
    type Error = RegisterParseError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(Ctrl(raw))
    }
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    /// The SELECT register: routes AP accesses to one of the 256 APs and one
    /// of its 16 register banks.
    #[derive(Clone, PartialEq, Eq)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl Default for Select {
    fn default() -> Self {
        Select(0)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

impl TryFrom<u32> for Select {
    type Error = RegisterParseError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(Select(raw))
    }
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

bitfield! {
    /// The DP identification register.
    #[derive(Clone)]
    pub struct DpIdr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

impl DpIdr {
    /// The JEP106 code of the DP designer.
    pub fn designer(&self) -> jep106::JEP106Code {
        jep106::JEP106Code::new(self.jep_cc(), self.jep_id())
    }
}

impl From<DpIdr> for u32 {
    fn from(raw: DpIdr) -> Self {
        raw.0
    }
}

impl TryFrom<u32> for DpIdr {
    type Error = RegisterParseError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(DpIdr(raw))
    }
}

impl Register for DpIdr {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_power_bits() {
        let mut ctrl = Ctrl::default();
        ctrl.set_cdbgpwrupreq(true);
        ctrl.set_csyspwrupreq(true);
        assert_eq!(u32::from(ctrl.clone()), 0x5000_0000);

        ctrl.set_orun_detect(true);
        assert_eq!(u32::from(ctrl), 0x5000_0001);

        let status = Ctrl(0xF000_0020);
        assert!(status.csyspwrupack());
        assert!(status.cdbgpwrupack());
        assert!(status.sticky_err());
    }

    #[test]
    fn select_routing() {
        let mut select = Select::default();
        select.set_ap_sel(0x2A);
        select.set_ap_bank_sel(0xF);
        assert_eq!(u32::from(select), 0x2A00_00F0);
    }
}
