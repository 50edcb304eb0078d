//! On-wire frames exchanged between transmitters and receivers.
//!
//! Every frame starts with a one-byte message tag followed by its packed
//! fields, little-endian. The tag values are fixed by the variant order below
//! and must match on both sides of the link (they are build-time constants).

use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};

use crate::address::NodeAddress;
use crate::slots::PedalMode;

/// Maximum encoded size of a frame.
pub const FRAME_MAX_SIZE: usize = Frame::POSTCARD_MAX_SIZE + 4;

/// Wire value of the first pedal key.
pub const KEY_PRIMARY: u8 = b'1';
/// Wire value of the second pedal key (dual-mode transmitters only).
pub const KEY_SECONDARY: u8 = b'2';

/// Messages of the pairing protocol and the pedal event transport.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, MaxSize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Frame {
    /// Receiver advertises free capacity during its grace period. Broadcast.
    Beacon {
        receiver: NodeAddress,
        available_slots: u8,
        total_slots: u8,
    },
    /// Transmitter asks the receiver for a pedal slot. Unicast.
    DiscoveryRequest { pedal_mode: PedalMode },
    /// Receiver grants a discovery request. Unicast.
    DiscoveryResponse,
    /// Directed liveness ping, and the receiver's invitation to handshake.
    Alive,
    /// Transmitter announces itself after boot or deep-sleep wake. Broadcast.
    TransmitterOnline { transmitter: NodeAddress },
    /// Transmitter tells all receivers which one it paired with. Broadcast.
    TransmitterPaired {
        transmitter: NodeAddress,
        receiver: NodeAddress,
    },
    /// A debounced pedal edge. Unicast to the bonded receiver.
    PedalEvent {
        key: u8,
        pressed: bool,
        pedal_mode: PedalMode,
    },
    /// Transmitter revokes its bond; the only message that evicts a record.
    DeleteRecord,
    /// Receiver confirms an existing pairing to a returning transmitter.
    PairingConfirmed { receiver: NodeAddress },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Input shorter than the kind's minimum.
    Length,
    /// Unknown message tag or malformed payload.
    UnknownKind,
    /// An embedded address is all-zero or all-ones where a real one is required.
    InvalidAddress,
    /// Encode buffer too small.
    Encode,
}

impl Frame {
    /// Encode into `buf`, returning the written prefix. No allocation.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a [u8], FrameError> {
        postcard::to_slice(self, buf)
            .map(|written| &*written)
            .map_err(|_| FrameError::Encode)
    }

    /// Decode and validate a received frame. Callers drop errors silently.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let frame: Frame = postcard::from_bytes(bytes).map_err(|e| match e {
            postcard::Error::DeserializeUnexpectedEnd => FrameError::Length,
            _ => FrameError::UnknownKind,
        })?;
        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<(), FrameError> {
        let ok = match self {
            Frame::Beacon { receiver, .. } => receiver.is_valid(),
            Frame::TransmitterOnline { transmitter } => transmitter.is_valid(),
            Frame::TransmitterPaired { transmitter, receiver } => {
                transmitter.is_valid() && receiver.is_valid()
            }
            Frame::PairingConfirmed { receiver } => receiver.is_valid(),
            Frame::DiscoveryRequest { .. }
            | Frame::DiscoveryResponse
            | Frame::Alive
            | Frame::PedalEvent { .. }
            | Frame::DeleteRecord => true,
        };
        if ok {
            Ok(())
        } else {
            Err(FrameError::InvalidAddress)
        }
    }
}
