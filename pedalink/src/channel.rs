//! Channels shared between the ISR glue, the services and the writers.
//!
//! The statics wire up a real node, where each firmware image hosts exactly
//! one side of the link; tests construct their own channels and pass them to
//! the services by reference.

use embassy_sync::channel::Channel;

use crate::event::{HostKeyEvent, PedalKeyEvent};
use crate::radio::InboundFrame;
use crate::storage::FlashOperationMessage;
use crate::RawMutex;

pub const FRAME_CHANNEL_SIZE: usize = 8;
pub const EVENT_CHANNEL_SIZE: usize = 16;

pub type FrameChannel = Channel<RawMutex, InboundFrame, FRAME_CHANNEL_SIZE>;
pub type PedalEventChannel = Channel<RawMutex, PedalKeyEvent, EVENT_CHANNEL_SIZE>;
pub type ReportChannel = Channel<RawMutex, HostKeyEvent, EVENT_CHANNEL_SIZE>;
pub type FlashChannel = Channel<RawMutex, FlashOperationMessage, 4>;

/// Frames decoded in radio context, drained by the main loop.
pub static RADIO_FRAME_CHANNEL: FrameChannel = Channel::new();
/// Debounced pedal edges from the pedal reader.
pub static PEDAL_EVENT_CHANNEL: PedalEventChannel = Channel::new();
/// Host key actions from the receiver's ingest pipeline.
pub static KEYBOARD_REPORT_CHANNEL: ReportChannel = Channel::new();
/// Bond-store write requests, drained by the storage task.
pub static FLASH_CHANNEL: FlashChannel = Channel::new();
