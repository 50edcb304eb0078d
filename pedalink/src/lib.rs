#![doc = include_str!("../README.md")]
#![allow(async_fn_in_trait)]
// Enable std for tests
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

pub mod address;
pub mod channel;
pub mod config;
pub mod event;
pub mod hid;
pub mod pedal;
pub mod protocol;
pub mod radio;
pub mod receiver;
pub mod slots;
pub mod state;
pub mod storage;
pub mod table;
pub mod transmitter;

pub use {embassy_futures, heapless};

pub(crate) type RawMutex = CriticalSectionRawMutex;

/// Hard capacity bound: pedal slots per receiver. A dual-pedal transmitter
/// consumes two slots, a single-pedal transmitter one.
pub const MAX_PEDAL_SLOTS: usize = 2;
