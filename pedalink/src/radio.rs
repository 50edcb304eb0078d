//! The radio port: addressable unicast/broadcast of opaque frames.
//!
//! The driver is supplied by the target firmware. Sends are fire-and-forget
//! enqueues; the receive callback runs in radio context and must not re-enter
//! the driver, so it only decodes and pushes into a bounded channel that the
//! main loop drains.

use embassy_time::Duration;

use crate::address::NodeAddress;
use crate::channel::FrameChannel;
use crate::protocol::{Frame, FRAME_MAX_SIZE};

/// Cooperative delay after `register_peer` before the first unicast to that
/// peer, to satisfy the radio's peer-ready guard.
pub const PEER_READY_DELAY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// The radio has not been initialized.
    NotReady,
    /// The peer table rejected the registration.
    PeerTable,
}

/// A decoded frame handed to the main loop, with the sender address and the
/// radio channel it was heard on.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InboundFrame {
    pub sender: NodeAddress,
    pub frame: Frame,
    pub channel: u8,
}

/// Contract the radio driver presents to the pairing services.
pub trait RadioDriver {
    /// Open the radio for broadcast and directed unicast on the link channel.
    async fn init(&mut self) -> Result<(), RadioError>;

    /// Register a unicast peer. Idempotent: an already-registered peer is
    /// success. A peer must be registered before unicast.
    fn register_peer(&mut self, addr: NodeAddress, channel: u8) -> Result<(), RadioError>;

    /// Enqueue `bytes` for transmission to `addr`. Returns whether enqueueing
    /// succeeded; this is not a delivery guarantee.
    fn try_send(&mut self, addr: NodeAddress, bytes: &[u8]) -> bool;
}

/// Encode and enqueue a frame for a unicast peer. Failures are dropped; the
/// protocol retries on its own cadence.
pub fn send_frame<D: RadioDriver>(driver: &mut D, addr: NodeAddress, frame: &Frame) -> bool {
    let mut buf = [0u8; FRAME_MAX_SIZE];
    match frame.encode(&mut buf) {
        Ok(bytes) => driver.try_send(addr, bytes),
        Err(e) => {
            error!("frame encode failed: {:?}", e);
            false
        }
    }
}

/// Encode and enqueue a frame to the broadcast address.
pub fn broadcast_frame<D: RadioDriver>(driver: &mut D, frame: &Frame) -> bool {
    send_frame(driver, NodeAddress::BROADCAST, frame)
}

/// Receive-callback glue: decode a raw frame and push it to the node's frame
/// channel. Safe to call from radio context; invalid frames and overflow are
/// dropped silently.
pub fn on_frame_received(frames: &FrameChannel, sender: NodeAddress, bytes: &[u8], channel: u8) {
    let Ok(frame) = Frame::decode(bytes) else {
        trace!("dropping undecodable frame from {}", sender);
        return;
    };
    if frames
        .try_send(InboundFrame {
            sender,
            frame,
            channel,
        })
        .is_err()
    {
        warn!("inbound frame channel full, frame dropped");
    }
}
