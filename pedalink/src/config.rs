//! Build-time configuration for both node roles.

use embassy_time::Duration;

use crate::slots::PedalMode;

/// Timing of the pairing protocol. The defaults are the shipping values;
/// tests scale them down.
#[derive(Debug, Clone, Copy)]
pub struct PairingConfig {
    /// Phase A: wait for known transmitters to answer the boot ping before
    /// opening the grace period.
    pub initial_ping_wait: Duration,
    /// Length of the grace period, measured from boot.
    pub grace_period: Duration,
    /// Beacon cadence while slots are available during grace.
    pub beacon_interval: Duration,
    /// How long a replacement probe waits for alive responses.
    pub alive_response_timeout: Duration,
    /// How long the transmitter waits for a discovery response.
    pub discovery_response_timeout: Duration,
    /// Main-loop tick granularity.
    pub tick_interval: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            initial_ping_wait: Duration::from_millis(1000),
            grace_period: Duration::from_millis(30000),
            beacon_interval: Duration::from_millis(2000),
            alive_response_timeout: Duration::from_millis(2000),
            discovery_response_timeout: Duration::from_millis(5000),
            tick_interval: Duration::from_millis(50),
        }
    }
}

/// Pedal hardware configuration.
#[derive(Debug, Clone, Copy)]
pub struct PedalConfig {
    pub mode: PedalMode,
    /// Debounce window. 50 ms matches the shipping switches; noisier
    /// hardware variants have used 20 ms.
    pub debounce: Duration,
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            mode: PedalMode::Single,
            debounce: Duration::from_millis(50),
        }
    }
}

/// Flash region used by the bond store.
#[derive(Debug, Clone, Copy)]
pub struct StorageConfig {
    /// Start address; 0 means the last `num_sectors` sectors of the flash.
    pub start_addr: usize,
    pub num_sectors: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            start_addr: 0,
            num_sectors: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverConfig {
    pub pairing: PairingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct TransmitterConfig {
    pub pairing: PairingConfig,
    pub pedal: PedalConfig,
    /// Inactivity span after which the firmware may enter deep sleep.
    pub inactivity_timeout: Duration,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            pairing: PairingConfig::default(),
            pedal: PedalConfig::default(),
            inactivity_timeout: Duration::from_secs(300),
        }
    }
}
