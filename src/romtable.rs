//! CoreSight ROM table traversal and component identification.
//!
//! Every CoreSight component occupies a 4 KiB page whose tail holds the
//! component (CID) and peripheral (PID) identification registers. Class 1
//! components are ROM tables: arrays of 32-bit entries, each a signed page
//! offset to another component, terminated by a zero entry. The walker
//! recurses through nested tables, bounded in depth and entry count.

use std::fmt;

use crate::ap::MemoryAp;
use crate::dap::Dap;
use crate::error::{DapError, TransportError};

/// ROM tables deeper than this are considered malformed.
const MAX_ROM_TABLE_DEPTH: usize = 16;

/// Entries stop at this offset; the rest of the page is reserved for the
/// identification registers.
const MAX_ROM_TABLE_OFFSET: u32 = 0xF00;

/// Returns whether a composed component ID has the valid CoreSight preamble.
pub fn is_valid_cid(cid: u32) -> bool {
    (cid & 0xFFFF_0FFF) == 0xB105_000D
}

/// Human-readable names of the component class field, per the CID
/// interpretation tables of the CoreSight specification.
static CLASS_DESCRIPTIONS: [&str; 16] = [
    "Reserved",
    "ROM table",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "CoreSight component",
    "Reserved",
    "Peripheral Test Block",
    "Reserved",
    "OptimoDE DESS",
    "Generic IP component",
    "PrimeCell or System component",
];

/// Describes a component class nibble.
pub fn class_description(class: u8) -> &'static str {
    CLASS_DESCRIPTIONS[usize::from(class & 0xF)]
}

/// Decodes the DEVTYPE register of a class 9 component into its major and
/// minor type names.
pub fn devtype_description(devtype: u8) -> (&'static str, &'static str) {
    let minor = (devtype >> 4) & 0x0F;
    match devtype & 0x0F {
        0 => (
            "Miscellaneous",
            match minor {
                0 => "other",
                4 => "Validation component",
                _ => "Reserved",
            },
        ),
        1 => (
            "Trace Sink",
            match minor {
                0 => "other",
                1 => "Port",
                2 => "Buffer",
                3 => "Router",
                _ => "Reserved",
            },
        ),
        2 => (
            "Trace Link",
            match minor {
                0 => "other",
                1 => "Funnel, router",
                2 => "Filter",
                3 => "FIFO, buffer",
                _ => "Reserved",
            },
        ),
        3 => (
            "Trace Source",
            match minor {
                0 => "other",
                1 => "Processor",
                2 => "DSP",
                3 => "Engine/Coprocessor",
                4 => "Bus",
                6 => "Software",
                _ => "Reserved",
            },
        ),
        4 => (
            "Debug Control",
            match minor {
                0 => "other",
                1 => "Trigger Matrix",
                2 => "Debug Auth",
                3 => "Power Requestor",
                _ => "Reserved",
            },
        ),
        5 => (
            "Debug Logic",
            match minor {
                0 => "other",
                1 => "Processor",
                2 => "DSP",
                3 => "Engine/Coprocessor",
                4 => "Bus",
                5 => "Memory",
                _ => "Reserved",
            },
        ),
        6 => (
            "Performance Monitor",
            match minor {
                0 => "other",
                1 => "Processor",
                2 => "DSP",
                3 => "Engine/Coprocessor",
                4 => "Bus",
                5 => "Memory",
                _ => "Reserved",
            },
        ),
        _ => ("Reserved", "Reserved"),
    }
}

/// The peripheral identification value: a 64-bit composite of PID0..PID4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralId(u64);

impl PeripheralId {
    /// Builds the composite from the raw 40-bit value.
    pub fn from_raw(raw: u64) -> Self {
        PeripheralId(raw)
    }

    /// The raw composite value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The part number assigned by the designer.
    pub fn part(&self) -> u16 {
        (self.0 & 0xFFF) as u16
    }

    /// The designer identity code: continuation nibble in bits 11:8, JEP106
    /// identity (bit 7 set) or legacy ASCII code in bits 7:0.
    pub fn designer_id(&self) -> u16 {
        ((((self.0 >> 32) & 0xF) << 8) | ((self.0 >> 12) & 0xFF)) as u16
    }

    /// The designer's JEP106 code, or `None` for a legacy component that
    /// predates JEP106 identification.
    pub fn jep106(&self) -> Option<jep106::JEP106Code> {
        let designer = self.designer_id();
        if designer & 0x80 != 0 {
            Some(jep106::JEP106Code::new(
                (designer >> 8) as u8,
                (designer & 0x7F) as u8,
            ))
        } else {
            None
        }
    }

    /// The legacy 7-bit ASCII identity code, for components without a
    /// JEP106 designer.
    pub fn legacy_ascii_code(&self) -> Option<u8> {
        let designer = self.designer_id();
        if designer & 0x80 == 0 {
            Some((designer & 0x7F) as u8)
        } else {
            None
        }
    }

    /// The number of additional 4 KiB pages the component occupies below
    /// its base address, as a power of two exponent.
    pub fn size(&self) -> u32 {
        ((self.0 >> 36) & 0xF) as u32
    }
}

/// Wildcard designer code matching any designer; only used to preserve the
/// legacy entries that were identified by part number alone.
pub const ANY_ID: u16 = 0x1000;

/// The designer identity code of ARM.
pub const ARM_ID: u16 = 0x4BB;

/// A known CoreSight peripheral.
#[derive(Debug, Clone, Copy)]
pub struct PartNumber {
    /// The designer identity code, or [`ANY_ID`].
    pub designer_id: u16,
    /// The part number from the PID.
    pub part_num: u16,
    /// Short component name.
    pub type_name: &'static str,
    /// Expanded component name.
    pub full_name: &'static str,
}

macro_rules! part {
    ($designer:expr, $part:expr, $type_name:expr, $full_name:expr) => {
        PartNumber {
            designer_id: $designer,
            part_num: $part,
            type_name: $type_name,
            full_name: $full_name,
        }
    };
}

/// Part number interpretations from the Cortex core specs, the CoreSight
/// components TRM, the CoreSight System Design Guide, ETM specs and chip
/// observation.
static PART_NUMBERS: &[PartNumber] = &[
    part!(ARM_ID, 0x000, "Cortex-M3 SCS", "(System Control Space)"),
    part!(ARM_ID, 0x001, "Cortex-M3 ITM", "(Instrumentation Trace Module)"),
    part!(ARM_ID, 0x002, "Cortex-M3 DWT", "(Data Watchpoint and Trace)"),
    part!(ARM_ID, 0x003, "Cortex-M3 FPB", "(Flash Patch and Breakpoint)"),
    part!(ARM_ID, 0x008, "Cortex-M0 SCS", "(System Control Space)"),
    part!(ARM_ID, 0x00A, "Cortex-M0 DWT", "(Data Watchpoint and Trace)"),
    part!(ARM_ID, 0x00B, "Cortex-M0 BPU", "(Breakpoint Unit)"),
    part!(ARM_ID, 0x00C, "Cortex-M4 SCS", "(System Control Space)"),
    part!(ARM_ID, 0x00D, "CoreSight ETM11", "(Embedded Trace)"),
    part!(ARM_ID, 0x00E, "Cortex-M7 FPB", "(Flash Patch and Breakpoint)"),
    part!(ARM_ID, 0x470, "Cortex-M1 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x471, "Cortex-M0 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x490, "Cortex-A15 GIC", "(Generic Interrupt Controller)"),
    part!(ARM_ID, 0x4A1, "Cortex-A53 ROM", "(v8 Memory Map ROM Table)"),
    part!(ARM_ID, 0x4A2, "Cortex-A57 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x4A3, "Cortex-A53 ROM", "(v7 Memory Map ROM Table)"),
    part!(ARM_ID, 0x4A4, "Cortex-A72 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x4AF, "Cortex-A15 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x4C0, "Cortex-M0+ ROM", "(ROM Table)"),
    part!(ARM_ID, 0x4C3, "Cortex-M3 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x4C4, "Cortex-M4 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x4C7, "Cortex-M7 PPB ROM", "(Private Peripheral Bus ROM Table)"),
    part!(ARM_ID, 0x4C8, "Cortex-M7 ROM", "(ROM Table)"),
    part!(ARM_ID, 0x906, "CoreSight CTI", "(Cross Trigger)"),
    part!(ARM_ID, 0x907, "CoreSight ETB", "(Trace Buffer)"),
    part!(ARM_ID, 0x908, "CoreSight CSTF", "(Trace Funnel)"),
    part!(ARM_ID, 0x909, "CoreSight ATBR", "(Advanced Trace Bus Replicator)"),
    part!(ARM_ID, 0x910, "CoreSight ETM9", "(Embedded Trace)"),
    part!(ARM_ID, 0x912, "CoreSight TPIU", "(Trace Port Interface Unit)"),
    part!(ARM_ID, 0x913, "CoreSight ITM", "(Instrumentation Trace Macrocell)"),
    part!(ARM_ID, 0x914, "CoreSight SWO", "(Single Wire Output)"),
    part!(ARM_ID, 0x917, "CoreSight HTM", "(AHB Trace Macrocell)"),
    part!(ARM_ID, 0x920, "CoreSight ETM11", "(Embedded Trace)"),
    part!(ARM_ID, 0x921, "Cortex-A8 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x922, "Cortex-A8 CTI", "(Cross Trigger)"),
    part!(ARM_ID, 0x923, "Cortex-M3 TPIU", "(Trace Port Interface Unit)"),
    part!(ARM_ID, 0x924, "Cortex-M3 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x925, "Cortex-M4 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x930, "Cortex-R4 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x931, "Cortex-R5 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x932, "CoreSight MTB-M0+", "(Micro Trace Buffer)"),
    part!(ARM_ID, 0x941, "CoreSight TPIU-Lite", "(Trace Port Interface Unit)"),
    part!(ARM_ID, 0x950, "Cortex-A9 PTM", "(Program Trace Macrocell)"),
    part!(ARM_ID, 0x955, "Cortex-A5 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x95A, "Cortex-A72 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x95B, "Cortex-A17 PTM", "(Program Trace Macrocell)"),
    part!(ARM_ID, 0x95D, "Cortex-A53 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x95E, "Cortex-A57 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x95F, "Cortex-A15 PTM", "(Program Trace Macrocell)"),
    part!(ARM_ID, 0x961, "CoreSight TMC", "(Trace Memory Controller)"),
    part!(ARM_ID, 0x962, "CoreSight STM", "(System Trace Macrocell)"),
    part!(ARM_ID, 0x975, "Cortex-M7 ETM", "(Embedded Trace)"),
    part!(ARM_ID, 0x9A0, "CoreSight PMU", "(Performance Monitoring Unit)"),
    part!(ARM_ID, 0x9A1, "Cortex-M4 TPIU", "(Trace Port Interface Unit)"),
    part!(ARM_ID, 0x9A4, "CoreSight GPR", "(Granular Power Requester)"),
    part!(ARM_ID, 0x9A5, "Cortex-A5 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0x9A7, "Cortex-A7 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0x9A8, "Cortex-A53 CTI", "(Cross Trigger)"),
    part!(ARM_ID, 0x9A9, "Cortex-M7 TPIU", "(Trace Port Interface Unit)"),
    part!(ARM_ID, 0x9AE, "Cortex-A17 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0x9AF, "Cortex-A15 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0x9B7, "Cortex-R7 PMU", "(Performance Monitoring Unit)"),
    part!(ARM_ID, 0x9D3, "Cortex-A53 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0x9D7, "Cortex-A57 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0x9D8, "Cortex-A72 PMU", "(Performance Monitor Unit)"),
    part!(ARM_ID, 0xC05, "Cortex-A5 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC07, "Cortex-A7 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC08, "Cortex-A8 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC09, "Cortex-A9 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC0E, "Cortex-A17 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC0F, "Cortex-A15 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC14, "Cortex-R4 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC15, "Cortex-R5 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xC17, "Cortex-R7 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xD03, "Cortex-A53 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xD07, "Cortex-A57 Debug", "(Debug Unit)"),
    part!(ARM_ID, 0xD08, "Cortex-A72 Debug", "(Debug Unit)"),
    part!(0x09F, 0xCD0, "Atmel CPU with DSU", "(CPU)"),
    part!(0x0E5, 0x000, "SHARC+/Blackfin+", ""),
    part!(0x0F0, 0x440, "Qualcomm QDSS Component v1", "(Qualcomm Designed CoreSight Component v1)"),
    part!(ANY_ID, 0x120, "TI SDTI", "(System Debug Trace Interface)"),
    part!(ANY_ID, 0x343, "TI DAPCTL", ""),
];

/// Looks up a known peripheral by designer and part number. Wildcard
/// designers match any designer.
pub fn part_number_entry(designer_id: u16, part_num: u16) -> Option<&'static PartNumber> {
    PART_NUMBERS.iter().find(|entry| {
        (entry.designer_id == designer_id || entry.designer_id == ANY_ID)
            && entry.part_num == part_num
    })
}

/// One node of a scanned CoreSight component tree.
#[derive(Debug)]
pub struct CoresightComponent {
    /// The 4 KiB-aligned base address of the component.
    pub base_address: u32,
    /// What the scan found at that address.
    pub state: ComponentState,
}

/// The identification outcome for one component.
#[derive(Debug)]
pub enum ComponentState {
    /// The ID region could not be read; the corresponding power domain may
    /// be off.
    Unreadable,
    /// The ROM table entry's present bit was clear.
    NotPresent,
    /// The component ID preamble was invalid.
    InvalidCid {
        /// The composed CID value.
        cid: u32,
    },
    /// A readable, valid component.
    Identified {
        /// The composed CID value.
        cid: u32,
        /// The composed PID value.
        peripheral_id: PeripheralId,
        /// DEVTYPE, for class 9 components.
        devtype: Option<u8>,
        /// MEMTYPE, for class 1 ROM tables.
        memtype: Option<u32>,
        /// Components referenced by this ROM table, in entry order.
        children: Vec<CoresightComponent>,
    },
}

impl CoresightComponent {
    /// The component class nibble, if the component was identified.
    pub fn class(&self) -> Option<u8> {
        match &self.state {
            ComponentState::Identified { cid, .. } => Some(((cid >> 12) & 0xF) as u8),
            _ => None,
        }
    }

    fn fmt_at_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        writeln!(f, "{pad}Component base address {:#010x}", self.base_address)?;

        match &self.state {
            ComponentState::Unreadable => writeln!(
                f,
                "{pad}  Can't read component, the corresponding core might be turned off"
            ),
            ComponentState::NotPresent => writeln!(f, "{pad}  Component not present"),
            ComponentState::InvalidCid { cid } => writeln!(f, "{pad}  Invalid CID {cid:#010x}"),
            ComponentState::Identified {
                cid,
                peripheral_id,
                devtype,
                memtype,
                children,
            } => {
                if peripheral_id.size() > 0 {
                    writeln!(
                        f,
                        "{pad}  Start address {:#010x}",
                        self.base_address.wrapping_sub(0x1000 * peripheral_id.size())
                    )?;
                }
                writeln!(f, "{pad}  Peripheral ID {:#012x}", peripheral_id.raw())?;

                let designer_id = peripheral_id.designer_id();
                match peripheral_id.jep106() {
                    Some(code) => writeln!(
                        f,
                        "{pad}  Designer is {designer_id:#05x}, {}",
                        code.get().unwrap_or("<unknown>")
                    )?,
                    None => writeln!(
                        f,
                        "{pad}  Designer ASCII code {:#04x}, {}",
                        designer_id & 0x7F,
                        if designer_id & 0x7F == 0x41 { "ARM" } else { "<unknown>" }
                    )?,
                }

                let part = peripheral_id.part();
                let (type_name, full_name) = part_number_entry(designer_id, part)
                    .map(|entry| (entry.type_name, entry.full_name))
                    .unwrap_or(("Unrecognized", ""));
                writeln!(f, "{pad}  Part is {part:#05x}, {type_name} {full_name}")?;

                let class = ((cid >> 12) & 0xF) as u8;
                writeln!(
                    f,
                    "{pad}  Component class is {class:#x}, {}",
                    class_description(class)
                )?;

                if let Some(memtype) = memtype {
                    if memtype & 0x01 != 0 {
                        writeln!(f, "{pad}  MEMTYPE system memory present on bus")?;
                    } else {
                        writeln!(
                            f,
                            "{pad}  MEMTYPE system memory not present: dedicated debug bus"
                        )?;
                    }
                }
                if let Some(devtype) = devtype {
                    let (major, subtype) = devtype_description(*devtype);
                    writeln!(f, "{pad}  Type is {devtype:#04x}, {major}, {subtype}")?;
                }

                for child in children {
                    child.fmt_at_depth(f, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for CoresightComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at_depth(f, 0)
    }
}

impl Dap {
    /// Reads the CID and PID register quartets of the component at
    /// `component_base`, batching all nine reads into one flush.
    fn read_component_ids(
        &mut self,
        ap: MemoryAp,
        component_base: u32,
    ) -> Result<(u32, u64), DapError> {
        debug_assert_eq!(component_base & 0xFFF, 0);

        let pid0 = self.mem_ap_read_u32(ap, component_base + 0xFE0)?;
        let pid1 = self.mem_ap_read_u32(ap, component_base + 0xFE4)?;
        let pid2 = self.mem_ap_read_u32(ap, component_base + 0xFE8)?;
        let pid3 = self.mem_ap_read_u32(ap, component_base + 0xFEC)?;
        let pid4 = self.mem_ap_read_u32(ap, component_base + 0xFD0)?;
        let cid0 = self.mem_ap_read_u32(ap, component_base + 0xFF0)?;
        let cid1 = self.mem_ap_read_u32(ap, component_base + 0xFF4)?;
        let cid2 = self.mem_ap_read_u32(ap, component_base + 0xFF8)?;
        let cid3 = self.mem_ap_read_u32(ap, component_base + 0xFFC)?;

        let mut results = self.run()?;
        let mut take = |token| -> Result<u32, DapError> {
            Ok(results.take(token).ok_or(TransportError::Protocol)?)
        };

        let cid = (take(cid3)? & 0xFF) << 24
            | (take(cid2)? & 0xFF) << 16
            | (take(cid1)? & 0xFF) << 8
            | (take(cid0)? & 0xFF);
        let pid = u64::from(take(pid4)? & 0xFF) << 32
            | u64::from(take(pid3)? & 0xFF) << 24
            | u64::from(take(pid2)? & 0xFF) << 16
            | u64::from(take(pid1)? & 0xFF) << 8
            | u64::from(take(pid0)? & 0xFF);

        Ok((cid, pid))
    }

    /// Searches the ROM tables reachable from `dbgbase` for the `index`-th
    /// class 9 component whose DEVTYPE low byte equals `dev_type`, and
    /// returns its base address.
    ///
    /// Unreadable components are skipped; their power domain may be off.
    pub fn lookup_cs_component(
        &mut self,
        ap: MemoryAp,
        dbgbase: u32,
        dev_type: u8,
        index: usize,
    ) -> Result<u32, DapError> {
        let mut remaining = index;
        self.lookup_cs_component_at(ap, dbgbase, dev_type, &mut remaining, 0)
    }

    fn lookup_cs_component_at(
        &mut self,
        ap: MemoryAp,
        dbgbase: u32,
        dev_type: u8,
        remaining: &mut usize,
        depth: usize,
    ) -> Result<u32, DapError> {
        if depth > MAX_ROM_TABLE_DEPTH {
            tracing::warn!("ROM tables nested deeper than {MAX_ROM_TABLE_DEPTH}, giving up");
            return Err(DapError::ResourceNotAvailable);
        }

        let base_addr = dbgbase & 0xFFFF_F000;

        for entry_offset in (0..MAX_ROM_TABLE_OFFSET).step_by(4) {
            let romentry = self.mem_ap_read_atomic_u32(ap, base_addr | entry_offset)?;
            if romentry == 0 {
                break;
            }
            if romentry & 0x1 == 0 {
                continue;
            }

            let component_base = base_addr.wrapping_add(romentry & 0xFFFF_F000);

            let cid1 = match self.mem_ap_read_atomic_u32(ap, component_base | 0xFF4) {
                Ok(value) => value,
                Err(error) => {
                    tracing::error!(
                        "can't read component with base address {:#010x}, \
                         the corresponding core might be turned off: {error}",
                        component_base
                    );
                    continue;
                }
            };

            if (cid1 >> 4) & 0x0F == 1 {
                // A nested ROM table; search it first.
                match self.lookup_cs_component_at(ap, component_base, dev_type, remaining, depth + 1)
                {
                    Ok(addr) => return Ok(addr),
                    Err(DapError::ResourceNotAvailable) => {}
                    Err(error) => return Err(error),
                }
            } else {
                let devtype =
                    self.mem_ap_read_atomic_u32(ap, (component_base & 0xFFFF_F000) | 0xFCC)?;
                if devtype & 0xFF == u32::from(dev_type) {
                    if *remaining == 0 {
                        return Ok(component_base);
                    }
                    *remaining -= 1;
                }
            }
        }

        Err(DapError::ResourceNotAvailable)
    }

    /// Scans the component at `dbgbase`, recursing through ROM tables, and
    /// returns the identified component tree.
    ///
    /// Components that cannot be read or carry an invalid CID are recorded
    /// as such rather than aborting the scan.
    pub fn rom_table_scan(
        &mut self,
        ap: MemoryAp,
        dbgbase: u32,
    ) -> Result<CoresightComponent, DapError> {
        self.scan_component(ap, dbgbase, 0)
    }

    fn scan_component(
        &mut self,
        ap: MemoryAp,
        dbgbase: u32,
        depth: usize,
    ) -> Result<CoresightComponent, DapError> {
        if depth > MAX_ROM_TABLE_DEPTH {
            tracing::warn!("ROM tables nested deeper than {MAX_ROM_TABLE_DEPTH}, giving up");
            return Err(DapError::ResourceNotAvailable);
        }

        let base_address = dbgbase & 0xFFFF_F000;

        let (cid, pid) = match self.read_component_ids(ap, base_address) {
            Ok(ids) => ids,
            Err(error) => {
                tracing::debug!(
                    "can't read component at {:#010x}: {error}",
                    base_address
                );
                return Ok(CoresightComponent {
                    base_address,
                    state: ComponentState::Unreadable,
                });
            }
        };

        if !is_valid_cid(cid) {
            return Ok(CoresightComponent {
                base_address,
                state: ComponentState::InvalidCid { cid },
            });
        }

        let class = ((cid >> 12) & 0xF) as u8;
        let mut devtype = None;
        let mut memtype = None;
        let mut children = Vec::new();

        if class == 1 {
            memtype = Some(self.mem_ap_read_atomic_u32(ap, base_address | 0xFCC)?);

            for entry_offset in (0..MAX_ROM_TABLE_OFFSET).step_by(4) {
                let romentry = self.mem_ap_read_atomic_u32(ap, base_address | entry_offset)?;
                if romentry == 0 {
                    break;
                }

                let component_base = base_address.wrapping_add(romentry & 0xFFFF_F000);
                if romentry & 0x1 != 0 {
                    children.push(self.scan_component(ap, component_base, depth + 1)?);
                } else {
                    children.push(CoresightComponent {
                        base_address: component_base,
                        state: ComponentState::NotPresent,
                    });
                }
            }
        } else if class == 9 {
            devtype =
                Some((self.mem_ap_read_atomic_u32(ap, base_address | 0xFCC)? & 0xFF) as u8);
        }

        Ok(CoresightComponent {
            base_address,
            state: ComponentState::Identified {
                cid,
                peripheral_id: PeripheralId::from_raw(pid),
                devtype,
                memtype,
                children,
            },
        })
    }
}
