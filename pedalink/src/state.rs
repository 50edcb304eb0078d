//! Cross-task state flags.

use core::sync::atomic::AtomicBool;

/// True while the transmitter has a live pairing session. Written by the
/// transmitter service, read by LED rendering and power management.
pub static PAIRED_STATE: AtomicBool = AtomicBool::new(false);
