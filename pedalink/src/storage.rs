//! Persistent bond store.
//!
//! Bonds live in a small flash map: one record per pedal slot plus an
//! optional debug-sink address. The receiver's main loop never touches flash
//! directly; it posts [`FlashOperationMessage`]s to [`FLASH_CHANNEL`]
//! (crate::channel) and the storage task does the writes.

use core::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use embassy_time::Instant;
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map::{fetch_item, store_item, SerializationError, Value};

use crate::address::NodeAddress;
use crate::channel::FlashChannel;
use crate::config::StorageConfig;
use crate::slots::PedalMode;
use crate::table::{BondEntry, BondSnapshot, TransmitterTable};
use crate::MAX_PEDAL_SLOTS;

/// Layout version written with the config marker; bump on layout changes.
const STORE_VERSION: u16 = 1;

/// Write requests posted by the receiver service.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashOperationMessage {
    /// Persist the current bond table.
    SaveBonds(BondSnapshot),
    /// Persist the debug-sink address.
    SaveDebugSink(NodeAddress),
    /// Clear every bond and the debug sink.
    Reset,
}

#[repr(u8)]
pub(crate) enum StorageKeys {
    // `pairedCount`/`pedalSlotsUsed` of the reference platform collapse into
    // the per-slot records; `dbgmon_*` is the debug sink.
    StorageConfig = 0x00,
    DebugSink = 0x01,
    BondInfo = 0x10,
}

const fn bond_key(slot: usize) -> u32 {
    StorageKeys::BondInfo as u32 + slot as u32
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StorageData {
    Config(LocalStorageConfig),
    Bond(StoredBond),
    DebugSink(StoredDebugSink),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalStorageConfig {
    pub(crate) version: u16,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StoredBond {
    pub(crate) slot: u8,
    pub(crate) addr: NodeAddress,
    pub(crate) mode: u8,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StoredDebugSink {
    pub(crate) paired: bool,
    pub(crate) addr: NodeAddress,
}

impl<'a> Value<'a> for StorageData {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        if buffer.len() < 9 {
            return Err(SerializationError::BufferTooSmall);
        }
        match self {
            StorageData::Config(c) => {
                buffer[0] = StorageKeys::StorageConfig as u8;
                LittleEndian::write_u16(&mut buffer[1..3], c.version);
                Ok(3)
            }
            StorageData::Bond(b) => {
                buffer[0] = StorageKeys::BondInfo as u8;
                buffer[1] = b.slot;
                buffer[2..8].copy_from_slice(&b.addr.0);
                buffer[8] = b.mode;
                Ok(9)
            }
            StorageData::DebugSink(d) => {
                buffer[0] = StorageKeys::DebugSink as u8;
                buffer[1] = d.paired as u8;
                buffer[2..8].copy_from_slice(&d.addr.0);
                Ok(8)
            }
        }
    }

    fn deserialize_from(buffer: &[u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        if buffer.is_empty() {
            return Err(SerializationError::InvalidFormat);
        }
        match buffer[0] {
            x if x == StorageKeys::StorageConfig as u8 => {
                if buffer.len() < 3 {
                    return Err(SerializationError::InvalidData);
                }
                Ok(StorageData::Config(LocalStorageConfig {
                    version: LittleEndian::read_u16(&buffer[1..3]),
                }))
            }
            x if x == StorageKeys::BondInfo as u8 => {
                if buffer.len() < 9 {
                    return Err(SerializationError::InvalidData);
                }
                let mut addr = [0u8; 6];
                addr.copy_from_slice(&buffer[2..8]);
                Ok(StorageData::Bond(StoredBond {
                    slot: buffer[1],
                    addr: NodeAddress(addr),
                    mode: buffer[8],
                }))
            }
            x if x == StorageKeys::DebugSink as u8 => {
                if buffer.len() < 8 {
                    return Err(SerializationError::InvalidData);
                }
                let mut addr = [0u8; 6];
                addr.copy_from_slice(&buffer[2..8]);
                Ok(StorageData::DebugSink(StoredDebugSink {
                    paired: buffer[1] == 1,
                    addr: NodeAddress(addr),
                }))
            }
            _ => Err(SerializationError::Custom(1)),
        }
    }
}

/// The bond store over an async NOR flash.
pub struct BondStorage<F: AsyncNorFlash> {
    flash: F,
    range: Range<u32>,
    buffer: [u8; 32],
}

impl<F: AsyncNorFlash> BondStorage<F> {
    pub async fn new(flash: F, config: &StorageConfig) -> Self {
        assert!(config.num_sectors >= 2, "Bond store needs at least 2 sectors");

        // start_addr == 0 means the last `num_sectors` sectors of the flash.
        let range = if config.start_addr == 0 {
            (flash.capacity() - config.num_sectors as usize * F::ERASE_SIZE) as u32..flash.capacity() as u32
        } else {
            assert!(
                config.start_addr % F::ERASE_SIZE == 0,
                "Bond store start addr MUST BE a multiple of the sector size"
            );
            config.start_addr as u32..(config.start_addr + config.num_sectors as usize * F::ERASE_SIZE) as u32
        };
        let mut storage = Self {
            flash,
            range,
            buffer: [0u8; 32],
        };

        if !storage.check_initialized().await {
            if let Err(e) = storage.initialize().await {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                error!("bond store init failed: {:?}", e);
            }
        }
        storage
    }

    async fn check_initialized(&mut self) -> bool {
        matches!(
            fetch_item::<u32, StorageData, _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut self.buffer,
                &(StorageKeys::StorageConfig as u32),
            )
            .await,
            Ok(Some(StorageData::Config(c))) if c.version == STORE_VERSION
        )
    }

    async fn initialize(&mut self) -> Result<(), sequential_storage::Error<F::Error>> {
        sequential_storage::erase_all(&mut self.flash, self.range.clone()).await?;
        store_item(
            &mut self.flash,
            self.range.clone(),
            &mut NoCache::new(),
            &mut self.buffer,
            &(StorageKeys::StorageConfig as u32),
            &StorageData::Config(LocalStorageConfig {
                version: STORE_VERSION,
            }),
        )
        .await
    }

    /// Load the transmitter table. Loaded records are never responsive.
    /// Records that fail validation, or whose slot cost would push the
    /// reserved total past the capacity bound, are treated as empty.
    pub async fn load_table(&mut self, boot: Instant) -> TransmitterTable {
        let mut table = TransmitterTable::new();
        let mut reserved: u8 = 0;
        for slot in 0..MAX_PEDAL_SLOTS {
            let fetched = fetch_item::<u32, StorageData, _>(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut self.buffer,
                &bond_key(slot),
            )
            .await;
            let Ok(Some(StorageData::Bond(bond))) = fetched else {
                continue;
            };
            if !bond.addr.is_valid() || bond.slot as usize != slot {
                continue;
            }
            let Some(mode) = PedalMode::from_u8(bond.mode) else {
                continue;
            };
            if reserved + mode.slots() > MAX_PEDAL_SLOTS as u8 {
                warn!("bond in slot {} exceeds capacity, dropping", slot);
                continue;
            }
            reserved += mode.slots();
            table.restore(slot, BondEntry { addr: bond.addr, mode }, boot);
            info!("loaded bond: slot {} -> {}", slot, bond.addr);
        }
        table
    }

    /// Load the persisted debug-sink address, if one was paired.
    pub async fn load_debug_sink(&mut self) -> Option<NodeAddress> {
        let fetched = fetch_item::<u32, StorageData, _>(
            &mut self.flash,
            self.range.clone(),
            &mut NoCache::new(),
            &mut self.buffer,
            &(StorageKeys::DebugSink as u32),
        )
        .await;
        match fetched {
            Ok(Some(StorageData::DebugSink(sink))) if sink.paired && sink.addr.is_valid() => Some(sink.addr),
            _ => None,
        }
    }

    /// Storage task: drain write requests posted by the receiver service.
    pub async fn run(&mut self, ops: &FlashChannel) -> ! {
        loop {
            let op = ops.receive().await;
            let result = match op {
                FlashOperationMessage::SaveBonds(snapshot) => self.save_bonds(&snapshot).await,
                FlashOperationMessage::SaveDebugSink(addr) => self.save_debug_sink(addr).await,
                FlashOperationMessage::Reset => self.initialize().await,
            };
            if let Err(e) = result {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                error!("bond store write failed: {:?}", e);
            }
        }
    }

    async fn save_bonds(
        &mut self,
        snapshot: &BondSnapshot,
    ) -> Result<(), sequential_storage::Error<F::Error>> {
        for (slot, entry) in snapshot.iter().enumerate() {
            // An empty slot is written as a zero-address record, which the
            // loader treats as empty.
            let stored = match entry {
                Some(bond) => StoredBond {
                    slot: slot as u8,
                    addr: bond.addr,
                    mode: bond.mode as u8,
                },
                None => StoredBond {
                    slot: slot as u8,
                    addr: NodeAddress::EMPTY,
                    mode: PedalMode::Single as u8,
                },
            };
            store_item(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut self.buffer,
                &bond_key(slot),
                &StorageData::Bond(stored),
            )
            .await?;
        }
        Ok(())
    }

    async fn save_debug_sink(
        &mut self,
        addr: NodeAddress,
    ) -> Result<(), sequential_storage::Error<F::Error>> {
        store_item(
            &mut self.flash,
            self.range.clone(),
            &mut NoCache::new(),
            &mut self.buffer,
            &(StorageKeys::DebugSink as u32),
            &StorageData::DebugSink(StoredDebugSink { paired: true, addr }),
        )
        .await
    }
}
