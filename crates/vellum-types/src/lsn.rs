//! Log sequence numbers.
//!
//! An LSN is a dense per-namespace counter paired with the id of the server
//! that produced the record. Counter `-1` means "not set" (an item that has
//! never been through the WAL).

use serde::{Deserialize, Serialize};

/// LSN counter + originating server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lsn {
    pub counter: i64,
    pub server_id: i16,
}

impl Lsn {
    pub const EMPTY: Self = Self {
        counter: -1,
        server_id: 0,
    };

    #[must_use]
    pub const fn new(counter: i64, server_id: i16) -> Self {
        Self { counter, server_id }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.counter < 0
    }

    /// Pack into a u64 for the storage record header.
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.server_id as u64) << 48) | (self.counter as u64 & 0xffff_ffff_ffff)
    }

    /// Unpack from the storage record header.
    #[must_use]
    pub const fn from_u64(v: u64) -> Self {
        let server_id = (v >> 48) as i16;
        let mut counter = (v & 0xffff_ffff_ffff) as i64;
        // Sign-extend the 48-bit counter so EMPTY round-trips.
        if counter & (1 << 47) != 0 {
            counter |= !0xffff_ffff_ffff;
        }
        Self { server_id, counter }
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip() {
        for lsn in [Lsn::EMPTY, Lsn::new(0, 0), Lsn::new(12345, 7), Lsn::new(1, -1)] {
            assert_eq!(Lsn::from_u64(lsn.to_u64()), lsn);
        }
    }
}
