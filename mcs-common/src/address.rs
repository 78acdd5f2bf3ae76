//! Types for representing MCS module addresses
//!

use crate::messages::CanId;

/// Offset added to a module address to form the id the master sends on
pub const MASTER_OFFSET: u16 = 0x400;

/// An 8-bit MCS module address
///
/// A module answers on its bare address (the slave id, e.g. `0x011`) and is commanded on the
/// address plus [`MASTER_OFFSET`] (the master id, e.g. `0x411`). Both ids are always derived from
/// the same address, so they can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u8);

impl Address {
    /// Create an address from its raw value
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Create an address from either the master or the slave form of a standard id
    ///
    /// Only the low 8 bits are kept, so `0x411` and `0x011` give the same address.
    pub const fn from_can_id(id: u16) -> Self {
        Self((id & 0xff) as u8)
    }

    /// Decode the address from a standard frame id
    ///
    /// Returns None for extended ids, which belong to the TML address space.
    pub const fn decode(id: CanId) -> Option<Self> {
        match id {
            CanId::Std(id) => Some(Self::from_can_id(id)),
            CanId::Extended(_) => None,
        }
    }

    /// Get the raw address as a u8
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// The id used by the master when sending to this module
    pub const fn master_id(&self) -> CanId {
        CanId::Std(self.0 as u16 + MASTER_OFFSET)
    }

    /// The id used by the module when answering the master
    pub const fn slave_id(&self) -> CanId {
        CanId::Std(self.0 as u16)
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Address> for u8 {
    fn from(value: Address) -> Self {
        value.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_symmetry() {
        for raw in 0..=255u8 {
            let addr = Address::new(raw);
            assert_eq!(Some(addr), Address::decode(addr.master_id()));
            assert_eq!(Some(addr), Address::decode(addr.slave_id()));
        }
    }

    #[test]
    fn test_master_and_slave_ids() {
        let addr = Address::from_can_id(0x411);
        assert_eq!(0x11, addr.raw());
        assert_eq!(CanId::Std(0x411), addr.master_id());
        assert_eq!(CanId::Std(0x011), addr.slave_id());
        assert_eq!(None, Address::decode(CanId::Extended(0x411)));
    }
}
