//! Pedal switch reader with interrupt-deferred debouncing.
//!
//! Pedal switches are active-low inputs with pull-ups, interrupting on both
//! edges. Sampling the pin inside the interrupt is unsafe on the target class
//! of MCU, so the ISR only sets a per-pin [`EdgeFlag`]; the main loop polls
//! flagged pins, samples the level and applies the debounce window. The one
//! loop iteration of added jitter is below human perception.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::InputPin;

use crate::channel::PedalEventChannel;
use crate::event::PedalKeyEvent;
use crate::protocol::{KEY_PRIMARY, KEY_SECONDARY};

/// Edge flag shared between a GPIO interrupt and the main loop. The ISR only
/// ever calls [`EdgeFlag::signal`]; the main loop takes and clears it.
pub struct EdgeFlag(AtomicBool);

impl EdgeFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Record an edge. ISR-safe: a single atomic store, nothing else.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for EdgeFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PinDebounce {
    stable_low: bool,
    last_transition: Instant,
}

/// Debouncing reader over `N` pedal pins. Dual-pedal devices use `N = 2`
/// (keys `'1'` and `'2'`), single-pedal devices `N = 1`.
pub struct PedalReader<'a, In: InputPin, const N: usize> {
    pins: [In; N],
    keys: [u8; N],
    flags: [&'a EdgeFlag; N],
    state: [PinDebounce; N],
    debounce: Duration,
}

impl<'a, In: InputPin> PedalReader<'a, In, 1> {
    pub fn single(pin: In, flag: &'a EdgeFlag, debounce: Duration, now: Instant) -> Self {
        Self::new([pin], [KEY_PRIMARY], [flag], debounce, now)
    }
}

impl<'a, In: InputPin> PedalReader<'a, In, 2> {
    pub fn dual(pins: [In; 2], flags: [&'a EdgeFlag; 2], debounce: Duration, now: Instant) -> Self {
        Self::new(pins, [KEY_PRIMARY, KEY_SECONDARY], flags, debounce, now)
    }
}

impl<'a, In: InputPin, const N: usize> PedalReader<'a, In, N> {
    pub fn new(
        mut pins: [In; N],
        keys: [u8; N],
        flags: [&'a EdgeFlag; N],
        debounce: Duration,
        now: Instant,
    ) -> Self {
        let mut state = [PinDebounce {
            stable_low: false,
            last_transition: now,
        }; N];
        for (pin, s) in pins.iter_mut().zip(state.iter_mut()) {
            // A read error at init is treated as released (pulled-up).
            s.stable_low = pin.is_low().unwrap_or(false);
        }
        Self {
            pins,
            keys,
            flags,
            state,
            debounce,
        }
    }

    /// Poll every pin whose edge flag is set, emitting debounced press and
    /// release events. Multiple edges since the last poll coalesce into one
    /// sample of the current level.
    pub fn poll(&mut self, now: Instant, events: &PedalEventChannel) {
        for i in 0..N {
            if !self.flags[i].take() {
                continue;
            }
            let Ok(low) = self.pins[i].is_low() else {
                continue;
            };
            let state = &mut self.state[i];
            if low == state.stable_low {
                // Spurious interrupt, level never changed.
                continue;
            }
            if now - state.last_transition < self.debounce {
                // Inside the bounce window: keep the edge pending so a later
                // poll re-samples once the window has elapsed.
                self.flags[i].signal();
                continue;
            }
            state.stable_low = low;
            state.last_transition = now;
            let event = PedalKeyEvent {
                key: self.keys[i],
                pressed: low,
            };
            debug!("pedal key {} {}", event.key, if low { "pressed" } else { "released" });
            if events.try_send(event).is_err() {
                warn!("pedal event channel full, edge dropped");
            }
        }
    }

    /// Drive the reader forever; pairs with the transmitter service draining
    /// the event channel.
    pub async fn run(&mut self, events: &PedalEventChannel) -> ! {
        loop {
            self.poll(Instant::now(), events);
            Timer::after_millis(1).await;
        }
    }
}
