//! Keyboard output seam on the receiver.
//!
//! The receiver presents itself to the host as a keyboard; the actual HID
//! descriptor and transport are supplied by the target firmware through
//! [`KeyboardWriter`]. The core only maps pedal slots to keycodes and feeds
//! the report channel.

use crate::channel::ReportChannel;
use crate::event::HostKeyEvent;

/// Host keycode of pedal slot 0.
pub const HOST_KEY_LEFT: u8 = b'l';
/// Host keycode of pedal slot 1.
pub const HOST_KEY_RIGHT: u8 = b'r';

/// Canonical host keycode for a pedal slot.
pub const fn host_key(slot: usize) -> u8 {
    if slot == 0 {
        HOST_KEY_LEFT
    } else {
        HOST_KEY_RIGHT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidError {
    Disconnected,
    WriteError,
}

/// Writes key events to the host, via USB, BLE, etc.
pub trait KeyboardWriter {
    async fn write_key(&mut self, event: HostKeyEvent) -> Result<(), HidError>;

    /// Drain the report channel into the host forever. Write failures are
    /// logged and dropped; each event is independent.
    async fn run_writer(&mut self, reports: &ReportChannel) -> ! {
        loop {
            let event = reports.receive().await;
            if let Err(e) = self.write_key(event).await {
                error!("keyboard write failed: {:?}", e);
            }
        }
    }
}
