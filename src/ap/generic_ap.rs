//! Generic access port

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use crate::ap::register_generation::{define_ap, define_ap_register};
use crate::RegisterParseError;

/// Address of the IDR register, present on every AP.
pub const AP_REG_IDR: u8 = 0xFC;

/// IDR mask of the JEP106 designer field (bank and code).
pub const IDR_JEP106: u32 = 0x0FFE_0000;
/// The JEP106 designer field value for ARM (bank 0x4, code 0x3B).
pub const IDR_JEP106_ARM: u32 = 0x0476_0000;
/// IDR mask of the AP class field.
pub const IDR_CLASS: u32 = 0x0001_E000;
/// The AP class field value of a MEM-AP.
pub const IDR_CLASS_MEM_AP: u32 = 0x0001_0000;
/// IDR mask of the AP type field.
pub const IDR_TYPE: u32 = 0x0000_000F;

define_ap!(
    /// A generic access port, carrying only the registers every AP has to
    /// implement to be compliant with the ADIv5 specification.
    GenericAp
);

/// The class of an access port, from the IDR CLASS field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
pub enum ApClass {
    /// No class defined; the AP is not a debug AP.
    Undefined = 0b0000,
    /// An AP bridging to another protocol, e.g. a JTAG-AP.
    ComAp = 0b0001,
    /// A memory access port.
    MemAp = 0b1000,
}

define_ap_register!(
    /// Identification Register
    ///
    /// The identification register is used to identify an AP. It has to be
    /// present on every AP.
    name: IDR,
    address: 0xFC,
    fields: [
        /// The revision of this access port.
        REVISION: u8,
        /// The JEP106 code of the designer of this access port.
        DESIGNER: jep106::JEP106Code,
        /// The class of this access port.
        CLASS: ApClass,
        /// The variant of this access port.
        VARIANT: u8,
        /// The raw type field of this access port.
        TYPE: u8,
    ],
    from: value => Ok(IDR {
        REVISION: ((value >> 28) & 0x0F) as u8,
        DESIGNER: {
            let designer = ((value >> 17) & 0x7FF) as u16;
            let cc = (designer >> 7) as u8;
            let id = (designer & 0x7F) as u8;

            jep106::JEP106Code::new(cc, id)
        },
        CLASS: ApClass::from_u8(((value >> 13) & 0x0F) as u8)
            .ok_or_else(|| RegisterParseError::new("IDR", value))?,
        VARIANT: ((value >> 4) & 0x0F) as u8,
        TYPE: (value & 0x0F) as u8,
    }),
    to: value => (u32::from(value.REVISION) << 28)
        | (((u32::from(value.DESIGNER.cc) << 7) | u32::from(value.DESIGNER.id)) << 17)
        | ((value.CLASS as u32) << 13)
        | (u32::from(value.VARIANT) << 4)
        | u32::from(value.TYPE)
);
