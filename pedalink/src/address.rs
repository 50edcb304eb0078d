use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};

/// 6-byte radio node address.
///
/// The all-ones value is the broadcast address; the all-zero value marks an
/// empty slot and never appears on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeAddress(pub [u8; 6]);

impl NodeAddress {
    pub const BROADCAST: Self = Self([0xFF; 6]);
    pub const EMPTY: Self = Self([0x00; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0x00)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.iter().all(|b| *b == 0xFF)
    }

    /// A real, unicast-capable address: neither empty nor broadcast.
    pub fn is_valid(&self) -> bool {
        !self.is_zero() && !self.is_broadcast()
    }
}

impl From<[u8; 6]> for NodeAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl core::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}
