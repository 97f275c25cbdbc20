//! Memory access port
//!
//! A MEM-AP exposes a memory-mapped region of the target system. Transfers
//! are parameterized through the CSW and TAR registers and move data through
//! DRW or one of the four banked data registers.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use crate::ap::register_generation::{define_ap, define_ap_register};
use crate::ap::{AccessPort, GenericAp};
use crate::RegisterParseError;

/// CSW size field: 8-bit accesses.
pub const CSW_8BIT: u32 = 0;
/// CSW size field: 16-bit accesses.
pub const CSW_16BIT: u32 = 1;
/// CSW size field: 32-bit accesses.
pub const CSW_32BIT: u32 = 2;

/// Mask of the CSW address increment field.
pub const CSW_ADDRINC_MASK: u32 = 3 << 4;
/// TAR is not changed by transfers.
pub const CSW_ADDRINC_OFF: u32 = 0;
/// TAR advances by the access size after every transfer.
pub const CSW_ADDRINC_SINGLE: u32 = 1 << 4;
/// One DRW transfer carries multiple sub-word transfers with implicit
/// increment.
pub const CSW_ADDRINC_PACKED: u32 = 2 << 4;

/// Secure protection bit; operator-configurable per AP.
pub const CSW_SPROT: u32 = 1 << 30;
/// HPROT1: privileged access.
pub const CSW_HPROT: u32 = 1 << 25;
/// Access as the default debugger master.
pub const CSW_MASTER_DEBUG: u32 = 1 << 29;
/// Debug software access enable.
pub const CSW_DBGSWENABLE: u32 = 1 << 31;

/// Address of the BD0 register; BD1..BD3 follow at word offsets.
pub const MEM_AP_REG_BD0: u8 = 0x10;

define_ap!(
    /// A handle for a memory access port.
    MemoryAp
);

impl From<GenericAp> for MemoryAp {
    fn from(other: GenericAp) -> Self {
        MemoryAp::new(other.ap_num())
    }
}

/// The access size of a MEM-AP transfer, as encoded in the CSW size field.
#[derive(Debug, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    /// 8-bit transfers.
    U8 = 0b000,
    /// 16-bit transfers.
    U16 = 0b001,
    /// 32-bit transfers.
    U32 = 0b010,
}

impl Default for DataSize {
    fn default() -> Self {
        DataSize::U32
    }
}

/// The TAR increment mode, as encoded in the CSW address increment field.
#[derive(Debug, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum AddressIncrement {
    /// No increment.
    Off = 0b00,
    /// Increment by the access size after each transfer.
    Single = 0b01,
    /// Packed transfers with implicit increment.
    Packed = 0b10,
}

impl Default for AddressIncrement {
    fn default() -> Self {
        AddressIncrement::Single
    }
}

define_ap_register!(
    /// Control and Status Word register
    ///
    /// The control and status word register (CSW) is used to configure
    /// memory access through the memory AP. Only the fields this driver
    /// stages are modelled; reserved and implementation-defined bits are
    /// dropped by the conversion.
    name: CSW,
    address: 0x00,
    fields: [
        /// Is debug software access enabled.
        DbgSwEnable: u8,
        /// Secure protection.
        SProt: u8,
        /// Access as default debug master.
        MasterDebug: u8,
        /// HPROT1: privileged access.
        Hprot: u8,
        /// Whether transactions can be issued through this AP.
        DeviceEn: u8,
        /// The address increment mode on DRW accesses.
        AddrInc: AddressIncrement,
        /// The access size of DRW transfers.
        Size: DataSize,
    ],
    from: value => Ok(CSW {
        DbgSwEnable: ((value >> 31) & 0x01) as u8,
        SProt: ((value >> 30) & 0x01) as u8,
        MasterDebug: ((value >> 29) & 0x01) as u8,
        Hprot: ((value >> 25) & 0x01) as u8,
        DeviceEn: ((value >> 6) & 0x01) as u8,
        AddrInc: AddressIncrement::from_u8(((value >> 4) & 0x03) as u8)
            .ok_or_else(|| RegisterParseError::new("CSW", value))?,
        Size: DataSize::from_u8((value & 0x07) as u8)
            .ok_or_else(|| RegisterParseError::new("CSW", value))?,
    }),
    to: value => (u32::from(value.DbgSwEnable) << 31)
        | (u32::from(value.SProt) << 30)
        | (u32::from(value.MasterDebug) << 29)
        | (u32::from(value.Hprot) << 25)
        | (u32::from(value.DeviceEn) << 6)
        | ((value.AddrInc as u32) << 4)
        | (value.Size as u32)
);

define_ap_register!(
    /// Transfer Address Register
    ///
    /// The transfer address register (TAR) holds the memory address which
    /// will be accessed through a read or write of the DRW register.
    name: TAR,
    address: 0x04,
    fields: [
        /// The target address.
        address: u32,
    ],
    from: value => Ok(TAR { address: value }),
    to: value => value.address
);

define_ap_register!(
    /// Data Read/Write register
    ///
    /// An access to the data read/write register (DRW) is translated to a
    /// memory access at the address held in TAR.
    name: DRW,
    address: 0x0C,
    fields: [
        /// The word moved by the transfer.
        data: u32,
    ],
    from: value => Ok(DRW { data: value }),
    to: value => value.data
);

define_ap_register!(
    /// Banked Data 0 register
    ///
    /// An access to BDx is translated to a memory access at
    /// `(TAR & 0xFFFFFFF0) + 4 * x`, without changing TAR. Successive
    /// accesses inside one aligned 16-byte window need no TAR updates.
    name: BD0,
    address: 0x10,
    fields: [
        /// The word moved by the transfer.
        data: u32,
    ],
    from: value => Ok(BD0 { data: value }),
    to: value => value.data
);

define_ap_register!(
    /// Banked Data 1 register
    name: BD1,
    address: 0x14,
    fields: [
        /// The word moved by the transfer.
        data: u32,
    ],
    from: value => Ok(BD1 { data: value }),
    to: value => value.data
);

define_ap_register!(
    /// Banked Data 2 register
    name: BD2,
    address: 0x18,
    fields: [
        /// The word moved by the transfer.
        data: u32,
    ],
    from: value => Ok(BD2 { data: value }),
    to: value => value.data
);

define_ap_register!(
    /// Banked Data 3 register
    name: BD3,
    address: 0x1C,
    fields: [
        /// The word moved by the transfer.
        data: u32,
    ],
    from: value => Ok(BD3 { data: value }),
    to: value => value.data
);

define_ap_register!(
    /// Configuration register
    ///
    /// The configuration register (CFG) is used to determine which
    /// extensions are included in the memory AP.
    name: CFG,
    address: 0xF4,
    fields: [
        /// Large data extension: 64-bit data accesses are supported.
        LD: u8,
        /// Long address extension: addresses are wider than 32 bits.
        LA: u8,
        /// The memory system is big-endian.
        BE: u8,
    ],
    from: value => Ok(CFG {
        LD: ((value >> 2) & 0x01) as u8,
        LA: ((value >> 1) & 0x01) as u8,
        BE: (value & 0x01) as u8,
    }),
    to: value => u32::from((value.LD << 2) | (value.LA << 1) | value.BE)
);

define_ap_register!(
    /// Base register
    ///
    /// BASE points to the start of the debug register region, usually the
    /// root CoreSight ROM table.
    name: BASE,
    address: 0xF8,
    fields: [
        /// The base address bits 31:12.
        BASEADDR: u32,
        /// Whether a debug entry is present at all.
        present: bool,
    ],
    from: value => Ok(BASE {
        BASEADDR: (value & 0xFFFF_F000) >> 12,
        present: (value & 0x01) == 1,
    }),
    to: value => (value.BASEADDR << 12) | u32::from(value.present)
);
