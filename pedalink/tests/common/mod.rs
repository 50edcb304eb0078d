#![allow(dead_code)]

use core::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin};
use pedalink::address::NodeAddress;
use pedalink::channel::FrameChannel;
use pedalink::config::{PairingConfig, ReceiverConfig, StorageConfig, TransmitterConfig};
use pedalink::protocol::Frame;
use pedalink::radio::{on_frame_received, RadioDriver, RadioError};
use pedalink::slots::PedalMode;

// Init logger for tests
#[ctor::ctor]
fn init_log() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub const TX_A: NodeAddress = NodeAddress([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x01]);
pub const TX_B: NodeAddress = NodeAddress([0xBB, 0xBB, 0xBB, 0xBB, 0xBB, 0x02]);
pub const RX_1: NodeAddress = NodeAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
pub const RX_2: NodeAddress = NodeAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

/// Timings scaled down so grace-period tests finish quickly.
pub fn fast_pairing_config() -> PairingConfig {
    PairingConfig {
        initial_ping_wait: embassy_time::Duration::from_millis(50),
        grace_period: embassy_time::Duration::from_millis(500),
        beacon_interval: embassy_time::Duration::from_millis(100),
        alive_response_timeout: embassy_time::Duration::from_millis(100),
        discovery_response_timeout: embassy_time::Duration::from_millis(300),
        tick_interval: embassy_time::Duration::from_millis(10),
    }
}

pub fn fast_receiver_config() -> ReceiverConfig {
    ReceiverConfig {
        pairing: fast_pairing_config(),
        storage: StorageConfig::default(),
    }
}

pub fn fast_transmitter_config(mode: PedalMode) -> TransmitterConfig {
    let mut cfg = TransmitterConfig {
        pairing: fast_pairing_config(),
        ..Default::default()
    };
    cfg.pedal.mode = mode;
    cfg
}

/// Leak a frame channel so services and the radio can share it for the rest
/// of the test. Box::leak is acceptable in tests.
pub fn leak_frame_channel() -> &'static FrameChannel {
    Box::leak(Box::new(FrameChannel::new()))
}

pub fn leak_report_channel() -> &'static pedalink::channel::ReportChannel {
    Box::leak(Box::new(pedalink::channel::ReportChannel::new()))
}

pub fn leak_flash_channel() -> &'static pedalink::channel::FlashChannel {
    Box::leak(Box::new(pedalink::channel::FlashChannel::new()))
}

pub fn leak_pedal_channel() -> &'static pedalink::channel::PedalEventChannel {
    Box::leak(Box::new(pedalink::channel::PedalEventChannel::new()))
}

pub type SentLog = Rc<RefCell<Vec<(NodeAddress, Frame)>>>;

/// Loopback radio: unicast frames land in the linked node's frame channel,
/// broadcasts in every broadcast link. Every send is also appended to a log
/// the test can inspect.
pub struct TestRadio {
    own: NodeAddress,
    peers: Vec<NodeAddress>,
    unicast_links: Vec<(NodeAddress, &'static FrameChannel)>,
    broadcast_links: Vec<&'static FrameChannel>,
    pub sent: SentLog,
}

impl TestRadio {
    pub fn new(own: NodeAddress) -> Self {
        Self {
            own,
            peers: Vec::new(),
            unicast_links: Vec::new(),
            broadcast_links: Vec::new(),
            sent: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Deliver unicasts addressed to `addr` into `frames`.
    pub fn link(mut self, addr: NodeAddress, frames: &'static FrameChannel) -> Self {
        self.unicast_links.push((addr, frames));
        self
    }

    /// Deliver broadcasts into `frames`.
    pub fn link_broadcast(mut self, frames: &'static FrameChannel) -> Self {
        self.broadcast_links.push(frames);
        self
    }

    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }
}

impl RadioDriver for TestRadio {
    async fn init(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn register_peer(&mut self, addr: NodeAddress, _channel: u8) -> Result<(), RadioError> {
        if !self.peers.contains(&addr) {
            self.peers.push(addr);
        }
        Ok(())
    }

    fn try_send(&mut self, addr: NodeAddress, bytes: &[u8]) -> bool {
        let frame = Frame::decode(bytes).expect("test radio saw an invalid frame");
        self.sent.borrow_mut().push((addr, frame));
        if addr.is_broadcast() {
            for frames in &self.broadcast_links {
                on_frame_received(frames, self.own, bytes, 0);
            }
        } else {
            if !self.peers.contains(&addr) {
                return false;
            }
            for (dest, frames) in &self.unicast_links {
                if *dest == addr {
                    on_frame_received(frames, self.own, bytes, 0);
                }
            }
        }
        true
    }
}

/// Pedal pin double: `true` means the pin reads low (pressed).
#[derive(Clone)]
pub struct MockPin(pub Rc<Cell<bool>>);

impl MockPin {
    pub fn released() -> Self {
        Self(Rc::new(Cell::new(false)))
    }

    pub fn set_low(&self, low: bool) {
        self.0.set(low);
    }
}

impl ErrorType for MockPin {
    type Error = core::convert::Infallible;
}

impl InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.get())
    }
}

/// RAM-backed NOR flash for bond-store tests: 8 sectors of 4 KiB.
pub struct MemFlash {
    pub data: Vec<u8>,
}

pub const MEM_FLASH_SIZE: usize = 8 * 4096;

impl MemFlash {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; MEM_FLASH_SIZE],
        }
    }
}

#[derive(Debug)]
pub struct MemFlashError;

impl embedded_storage_async::nor_flash::NorFlashError for MemFlashError {
    fn kind(&self) -> embedded_storage_async::nor_flash::NorFlashErrorKind {
        embedded_storage_async::nor_flash::NorFlashErrorKind::Other
    }
}

impl embedded_storage_async::nor_flash::ErrorType for MemFlash {
    type Error = MemFlashError;
}

impl embedded_storage_async::nor_flash::ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        if offset + bytes.len() > self.data.len() {
            return Err(MemFlashError);
        }
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl embedded_storage_async::nor_flash::NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if from % Self::ERASE_SIZE != 0 || to % Self::ERASE_SIZE != 0 || to > self.data.len() {
            return Err(MemFlashError);
        }
        self.data[from..to].fill(0xFF);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        if offset % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(MemFlashError);
        }
        if offset + bytes.len() > self.data.len() {
            return Err(MemFlashError);
        }
        for (dst, src) in self.data[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            // NOR semantics: writes only clear bits.
            *dst &= *src;
        }
        Ok(())
    }
}
