//! Access Rights
//!
//! Access masks follow the NT layout: the low 16 bits are object-specific,
//! bits 16-20 are the standard rights, and the top four bits are the generic
//! rights that every object kind maps onto its own specific rights when a
//! handle is granted.
//!
//! ```text
//!  31 30 29 28 | 25 | 20 ............ 16 | 15 ............... 0
//!  GR GW GX GA | MA | SYNC WO WD RC DEL  |   object specific
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Access mask carried by requests and stored in handle entries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AccessMask: u32 {
        /// Delete the object
        const DELETE = 0x0001_0000;
        /// Read the security descriptor
        const READ_CONTROL = 0x0002_0000;
        /// Change the discretionary ACL
        const WRITE_DAC = 0x0004_0000;
        /// Change the owner
        const WRITE_OWNER = 0x0008_0000;
        /// Wait on the object
        const SYNCHRONIZE = 0x0010_0000;

        const STANDARD_RIGHTS_REQUIRED = 0x000F_0000;
        const STANDARD_RIGHTS_READ = Self::READ_CONTROL.bits();
        const STANDARD_RIGHTS_WRITE = Self::READ_CONTROL.bits();
        const STANDARD_RIGHTS_EXECUTE = Self::READ_CONTROL.bits();
        const STANDARD_RIGHTS_ALL = 0x001F_0000;
        const SPECIFIC_RIGHTS_ALL = 0x0000_FFFF;

        /// Grant whatever the security descriptor allows
        const MAXIMUM_ALLOWED = 0x0200_0000;

        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;

        // Keep unknown object-specific bits instead of truncating them.
        const _ = !0;
    }
}

impl AccessMask {
    /// The four generic bits
    pub const GENERIC_MASK: Self = Self::GENERIC_READ
        .union(Self::GENERIC_WRITE)
        .union(Self::GENERIC_EXECUTE)
        .union(Self::GENERIC_ALL);

    /// Object-specific rights with the given raw value
    pub const fn specific(bits: u16) -> Self {
        Self::from_bits_retain(bits as u32)
    }

    /// True if any generic bit is present
    pub fn has_generic(self) -> bool {
        self.intersects(Self::GENERIC_MASK)
    }
}

/// Mapping from the generic rights to an object kind's specific rights
///
/// Each object kind has one of these; `map` is applied once when a handle is
/// granted and the generic bits never reach a handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericMapping {
    pub read: AccessMask,
    pub write: AccessMask,
    pub execute: AccessMask,
    pub all: AccessMask,
}

impl GenericMapping {
    /// Mapping used by object kinds without specific rights
    pub const STANDARD: Self = Self {
        read: AccessMask::STANDARD_RIGHTS_READ,
        write: AccessMask::STANDARD_RIGHTS_WRITE,
        execute: AccessMask::STANDARD_RIGHTS_EXECUTE,
        all: AccessMask::STANDARD_RIGHTS_ALL,
    };

    /// Expand generic bits and clear them from the result
    pub fn map(&self, access: AccessMask) -> AccessMask {
        let mut mapped = access;
        if access.contains(AccessMask::GENERIC_READ) {
            mapped |= self.read;
        }
        if access.contains(AccessMask::GENERIC_WRITE) {
            mapped |= self.write;
        }
        if access.contains(AccessMask::GENERIC_EXECUTE) {
            mapped |= self.execute;
        }
        if access.contains(AccessMask::GENERIC_ALL) {
            mapped |= self.all;
        }
        mapped - AccessMask::GENERIC_MASK
    }
}
