//! Events flowing between the debouncer, the pairing services and the
//! keyboard writer.

/// A debounced pedal edge, published by the pedal reader and consumed by the
/// transmitter service. `key` is the wire key (`'1'` or `'2'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PedalKeyEvent {
    pub key: u8,
    pub pressed: bool,
}

/// A host keyboard action produced by the receiver's ingest pipeline and
/// consumed by the keyboard writer. `keycode` is the slot's canonical key
/// (`'l'` or `'r'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostKeyEvent {
    pub keycode: u8,
    pub pressed: bool,
}
