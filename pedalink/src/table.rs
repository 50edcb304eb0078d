//! Receiver-side table of known transmitters, indexed by slot.

use embassy_time::Instant;

use crate::address::NodeAddress;
use crate::slots::PedalMode;
use crate::MAX_PEDAL_SLOTS;

/// A bonded transmitter as seen by the receiver.
///
/// `responsive` is volatile: it is false on load from the bond store and set
/// once the transmitter is observed live in the current boot epoch.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransmitterRecord {
    pub addr: NodeAddress,
    pub mode: PedalMode,
    pub responsive: bool,
    pub last_seen: Instant,
}

/// The persistent part of a record, as written to the bond store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondEntry {
    pub addr: NodeAddress,
    pub mode: PedalMode,
}

/// Persistable snapshot of the whole table.
pub type BondSnapshot = [Option<BondEntry>; MAX_PEDAL_SLOTS];

/// Fixed-size set of transmitter records. A slot is occupied iff it holds a
/// record; records are only ever cleared by an explicit delete.
#[derive(Debug, Default)]
pub struct TransmitterTable {
    records: [Option<TransmitterRecord>; MAX_PEDAL_SLOTS],
}

impl TransmitterTable {
    pub const fn new() -> Self {
        Self {
            records: [None; MAX_PEDAL_SLOTS],
        }
    }

    /// Slot index of the record with the given address, if any.
    pub fn find(&self, addr: NodeAddress) -> Option<usize> {
        self.records
            .iter()
            .position(|r| matches!(r, Some(record) if record.addr == addr))
    }

    pub fn record(&self, index: usize) -> Option<&TransmitterRecord> {
        self.records.get(index).and_then(|r| r.as_ref())
    }

    pub fn record_mut(&mut self, index: usize) -> Option<&mut TransmitterRecord> {
        self.records.get_mut(index).and_then(|r| r.as_mut())
    }

    /// Occupied slots, lowest index first.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &TransmitterRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|record| (i, record)))
    }

    /// Insert a freshly handshaken transmitter into the lowest-indexed empty
    /// slot, so the first pedal deterministically gets slot 0. Returns the
    /// slot index, or `None` when every slot is occupied.
    pub fn insert(&mut self, addr: NodeAddress, mode: PedalMode, now: Instant) -> Option<usize> {
        if let Some(index) = self.find(addr) {
            let record = self.records[index].as_mut()?;
            record.mode = mode;
            record.responsive = true;
            record.last_seen = now;
            return Some(index);
        }
        let index = self.records.iter().position(|r| r.is_none())?;
        self.records[index] = Some(TransmitterRecord {
            addr,
            mode,
            responsive: true,
            last_seen: now,
        });
        Some(index)
    }

    /// Restore a record from the bond store. Loaded records are never
    /// responsive until observed live.
    pub fn restore(&mut self, index: usize, entry: BondEntry, boot: Instant) {
        if index < MAX_PEDAL_SLOTS {
            self.records[index] = Some(TransmitterRecord {
                addr: entry.addr,
                mode: entry.mode,
                responsive: false,
                last_seen: boot,
            });
        }
    }

    /// Clear a slot. The only caller is the delete-record handler.
    pub fn clear_slot(&mut self, index: usize) -> Option<TransmitterRecord> {
        self.records.get_mut(index).and_then(|r| r.take())
    }

    pub fn mark_responsive(&mut self, index: usize, now: Instant) {
        if let Some(record) = self.record_mut(index) {
            record.responsive = true;
            record.last_seen = now;
        }
    }

    /// Slots consumed by responsive records only.
    pub fn used(&self) -> u8 {
        self.occupied()
            .filter(|(_, r)| r.responsive)
            .map(|(_, r)| r.mode.slots())
            .sum()
    }

    /// Slots consumed by all records, responsive or not.
    pub fn reserved(&self) -> u8 {
        self.occupied().map(|(_, r)| r.mode.slots()).sum()
    }

    pub fn available(&self) -> u8 {
        MAX_PEDAL_SLOTS as u8 - self.used()
    }

    pub fn is_full(&self) -> bool {
        self.used() >= MAX_PEDAL_SLOTS as u8
    }

    /// Number of occupied slots.
    pub fn bond_count(&self) -> usize {
        self.occupied().count()
    }

    pub fn responsive_count(&self) -> usize {
        self.occupied().filter(|(_, r)| r.responsive).count()
    }

    pub fn bonds(&self) -> BondSnapshot {
        let mut snapshot: BondSnapshot = [None; MAX_PEDAL_SLOTS];
        for (i, record) in self.occupied() {
            snapshot[i] = Some(BondEntry {
                addr: record.addr,
                mode: record.mode,
            });
        }
        snapshot
    }
}
