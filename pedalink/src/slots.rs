//! Pedal modes and receiver-side capacity checks.

use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};

use crate::table::TransmitterTable;
use crate::MAX_PEDAL_SLOTS;

/// How many physical pedals a transmitter carries, and therefore how many
/// receiver slots it consumes.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PedalMode {
    /// Two pedals, keys `'1'` and `'2'`. Consumes 2 slots.
    Dual = 0,
    /// One pedal, key `'1'`. Consumes 1 slot.
    Single = 1,
}

impl PedalMode {
    pub const fn slots(self) -> u8 {
        match self {
            PedalMode::Dual => 2,
            PedalMode::Single => 1,
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PedalMode::Dual),
            1 => Some(PedalMode::Single),
            _ => None,
        }
    }
}

/// A new transmitter fits iff the responsive load plus its slots stays within
/// the bound.
pub fn can_fit_new(table: &TransmitterTable, slots_needed: u8) -> bool {
    table.used() + slots_needed <= MAX_PEDAL_SLOTS as u8
}

/// A known but currently non-responsive record becoming responsive. Records
/// that are already responsive always fit (their slots are already counted).
pub fn can_fit_reconnect(table: &TransmitterTable, index: usize, slots_needed: u8) -> bool {
    match table.record(index) {
        Some(record) if record.responsive => true,
        Some(_) => table.used() + slots_needed <= MAX_PEDAL_SLOTS as u8,
        None => false,
    }
}

/// An already-responsive record announcing a different pedal mode: its old
/// slots are released and the new ones claimed in the same step.
pub fn can_fit_mode_change(table: &TransmitterTable, index: usize, new_slots: u8) -> bool {
    match table.record(index) {
        Some(record) => {
            let old_slots = if record.responsive { record.mode.slots() } else { 0 };
            table.used() - old_slots + new_slots <= MAX_PEDAL_SLOTS as u8
        }
        None => false,
    }
}
