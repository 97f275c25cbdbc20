//! Helper macros for the access port register model.

/// Defines a typed access port register.
///
/// Takes
/// - name: The name of the constructed type for the register. Also accepts a
///   doc comment to be added to the type.
/// - address: The register address inside the AP's 256-byte window.
/// - fields: A list of fields of the register type.
/// - from: a closure to transform from an `u32` to the typed register.
/// - to: A closure to transform from the typed register to an `u32`.
macro_rules! define_ap_register {
    (
        $(#[$outer:meta])*
        name: $name:ident,
        address: $address:expr,
        fields: [$($(#[$inner:meta])*$field:ident: $type:ty$(,)?)*],
        from: $from_param:ident => $from:expr,
        to: $to_param:ident => $to:expr
    )
    => {
        $(#[$outer])*
        #[allow(non_snake_case)]
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            $($(#[$inner])*pub $field: $type,)*
        }

        impl $crate::Register for $name {
            const ADDRESS: u8 = $address;
            const NAME: &'static str = stringify!($name);
        }

        impl $crate::ap::ApRegister for $name {
            // The upper four address bits select the AP register bank.
            const BANK: u8 = $address >> 4;
        }

        impl TryFrom<u32> for $name {
            type Error = $crate::RegisterParseError;

            fn try_from($from_param: u32) -> Result<$name, Self::Error> {
                $from
            }
        }

        impl From<$name> for u32 {
            fn from($to_param: $name) -> u32 {
                $to
            }
        }
    }
}

/// Defines a lightweight, copyable handle for one of the 256 AP slots of a
/// DAP. The handle carries only the AP number; all state lives in the DAP's
/// AP table.
macro_rules! define_ap {
    ($(#[$outer:meta])* $name:ident) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name {
            ap_num: u8,
        }

        impl $name {
            #[doc = concat!("Creates a new ", stringify!($name), " handle for the AP with the given number.")]
            pub const fn new(ap_num: u8) -> Self {
                Self { ap_num }
            }
        }

        impl From<u8> for $name {
            fn from(ap_num: u8) -> Self {
                $name { ap_num }
            }
        }

        impl $crate::ap::AccessPort for $name {
            fn ap_num(&self) -> u8 {
                self.ap_num
            }
        }
    };
}

pub(crate) use {define_ap, define_ap_register};
