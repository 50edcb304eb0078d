//! Transmitter-side pairing state machine and pedal event transport.
//!
//! Unpaired → discovered (a beacon or directed invitation was heard) →
//! waiting (discovery request sent) → paired. Outbound messages triggered by
//! a receipt go through a small deferred-action queue drained at the top of
//! each loop iteration, so nothing is ever sent from the receive path.

use core::sync::atomic::Ordering;

use embassy_futures::select::{select3, Either3};
use embassy_time::{Duration, Instant, Timer};
use heapless::Deque;

use crate::address::NodeAddress;
use crate::channel::{FrameChannel, PedalEventChannel};
use crate::config::TransmitterConfig;
use crate::event::PedalKeyEvent;
use crate::protocol::Frame;
use crate::radio::{broadcast_frame, send_frame, InboundFrame, RadioDriver, PEER_READY_DELAY};
use crate::state::PAIRED_STATE;

/// Bound on receipt-triggered outbound work; overflow drops the oldest.
pub const DEFERRED_QUEUE_DEPTH: usize = 4;

/// The latest receiver heard advertising capacity, from a beacon or a
/// directed invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredReceiver {
    pub addr: NodeAddress,
    pub available_slots: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy)]
enum DeferredAction {
    SendOnline { to: NodeAddress, channel: u8 },
    SendDiscoveryRequest { to: NodeAddress, channel: u8 },
    SendDeleteRecord { to: NodeAddress, channel: u8 },
}

/// The transmitter's pairing state machine.
pub struct PairingTransmitter<'a, D: RadioDriver> {
    driver: D,
    own_addr: NodeAddress,
    cfg: TransmitterConfig,
    /// Live session pair.
    paired: Option<NodeAddress>,
    /// Last receiver this transmitter bonded with; may be stale across
    /// reboots and is re-validated through the handshake.
    last_receiver: Option<NodeAddress>,
    discovered: Option<DiscoveredReceiver>,
    awaiting_since: Option<Instant>,
    deferred: Deque<DeferredAction, DEFERRED_QUEUE_DEPTH>,
    last_activity: Instant,
    frames: &'a FrameChannel,
    pedal_events: &'a PedalEventChannel,
}

impl<'a, D: RadioDriver> PairingTransmitter<'a, D> {
    pub fn new(
        driver: D,
        own_addr: NodeAddress,
        cfg: TransmitterConfig,
        last_receiver: Option<NodeAddress>,
        boot: Instant,
        frames: &'a FrameChannel,
        pedal_events: &'a PedalEventChannel,
    ) -> Self {
        Self {
            driver,
            own_addr,
            cfg,
            paired: None,
            last_receiver,
            discovered: None,
            awaiting_since: None,
            deferred: Deque::new(),
            last_activity: boot,
            frames,
            pedal_events,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.paired.is_some()
    }

    pub fn paired_receiver(&self) -> Option<NodeAddress> {
        self.paired
    }

    pub fn discovered(&self) -> Option<DiscoveredReceiver> {
        self.discovered
    }

    /// Time since the last pedal edge, for the deep-sleep scheduler.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now - self.last_activity
    }

    /// Run the transmitter service forever.
    pub async fn run(&mut self) -> ! {
        let _ = self.driver.register_peer(NodeAddress::BROADCAST, 0);
        // Announce the wake-up; the previous receiver answers with a
        // pairing confirmation or an invitation.
        broadcast_frame(
            &mut self.driver,
            &Frame::TransmitterOnline {
                transmitter: self.own_addr,
            },
        );
        let frames = self.frames;
        let pedal_events = self.pedal_events;
        loop {
            self.drain_deferred().await;
            match select3(
                frames.receive(),
                pedal_events.receive(),
                Timer::after(self.cfg.pairing.tick_interval),
            )
            .await
            {
                Either3::First(inbound) => self.dispatch(inbound, Instant::now()),
                Either3::Second(event) => self.on_pedal_event(event, Instant::now()),
                Either3::Third(_) => {}
            }
            self.tick(Instant::now());
        }
    }

    /// Dispatch one received frame.
    pub fn dispatch(&mut self, inbound: InboundFrame, now: Instant) {
        let InboundFrame {
            sender,
            frame,
            channel,
        } = inbound;
        if !sender.is_valid() {
            return;
        }
        match frame {
            Frame::Beacon {
                receiver,
                available_slots,
                ..
            } => self.handle_beacon(sender, receiver, available_slots, now),
            Frame::Alive => self.handle_alive(sender, channel, now),
            Frame::DiscoveryResponse => self.handle_discovery_response(sender, channel, now),
            Frame::PairingConfirmed { receiver } => self.handle_pairing_confirmed(sender, receiver),
            // Transmitter-originated frames heard over broadcast.
            Frame::DiscoveryRequest { .. }
            | Frame::TransmitterOnline { .. }
            | Frame::TransmitterPaired { .. }
            | Frame::PedalEvent { .. }
            | Frame::DeleteRecord => {}
        }
    }

    /// A receiver is advertising capacity. Remember it if it has room for
    /// this pedal mode, and silently recover a pairing the receiver forgot.
    pub fn handle_beacon(
        &mut self,
        _sender: NodeAddress,
        receiver: NodeAddress,
        available_slots: u8,
        now: Instant,
    ) {
        let needed = self.cfg.pedal.mode.slots();
        if available_slots < needed {
            self.discovered = None;
            return;
        }
        // Beacons carry no channel hint; the radio stays on the link channel.
        self.discovered = Some(DiscoveredReceiver {
            addr: receiver,
            available_slots,
            channel: 0,
        });
        if self.paired.is_none() && self.last_receiver == Some(receiver) {
            debug!("beacon from previous receiver {}, re-pairing", receiver);
            self.initiate_pairing(receiver, 0, now);
        }
    }

    /// A directed invitation. Paired to the sender: ask it to confirm.
    /// Paired elsewhere: tell the sender to drop its stale bond. Unpaired:
    /// run discovery.
    pub fn handle_alive(&mut self, sender: NodeAddress, channel: u8, now: Instant) {
        match self.paired {
            Some(receiver) if receiver == sender => {
                self.defer(DeferredAction::SendOnline { to: sender, channel });
            }
            Some(receiver) => {
                debug!("alive from {} but paired to {}, requesting delete", sender, receiver);
                self.defer(DeferredAction::SendDeleteRecord { to: sender, channel });
            }
            None => {
                self.discovered = Some(DiscoveredReceiver {
                    addr: sender,
                    available_slots: self.cfg.pedal.mode.slots(),
                    channel,
                });
                self.awaiting_since = Some(now);
                self.defer(DeferredAction::SendDiscoveryRequest { to: sender, channel });
            }
        }
    }

    /// The receiver granted our discovery request.
    pub fn handle_discovery_response(&mut self, sender: NodeAddress, channel: u8, _now: Instant) {
        if self.awaiting_since.is_none() {
            debug!("unsolicited discovery response from {}", sender);
            return;
        }
        let _ = self.driver.register_peer(sender, channel);
        self.paired = Some(sender);
        self.last_receiver = Some(sender);
        self.awaiting_since = None;
        PAIRED_STATE.store(true, Ordering::Release);
        // Let any other receiver that still remembers us know who won.
        broadcast_frame(
            &mut self.driver,
            &Frame::TransmitterPaired {
                transmitter: self.own_addr,
                receiver: sender,
            },
        );
        info!("paired with receiver {}", sender);
    }

    /// The bonded receiver confirmed us after a `TransmitterOnline`; the
    /// session is restored without a fresh handshake.
    pub fn handle_pairing_confirmed(&mut self, sender: NodeAddress, receiver: NodeAddress) {
        if sender != receiver {
            return;
        }
        match self.paired {
            Some(current) if current != sender => {
                debug!("pairing confirmation from {} ignored, paired to {}", sender, current);
            }
            Some(_) => {}
            None => {
                if self.last_receiver.is_none() || self.last_receiver == Some(sender) {
                    self.paired = Some(sender);
                    self.last_receiver = Some(sender);
                    self.awaiting_since = None;
                    PAIRED_STATE.store(true, Ordering::Release);
                    info!("pairing restored with receiver {}", sender);
                }
            }
        }
    }

    /// Begin a discovery handshake with a discovered receiver.
    pub fn initiate_pairing(&mut self, receiver: NodeAddress, channel: u8, now: Instant) {
        if !receiver.is_valid() || self.paired.is_some() {
            return;
        }
        let Some(discovered) = self.discovered else {
            return;
        };
        if discovered.available_slots < self.cfg.pedal.mode.slots() {
            return;
        }
        self.awaiting_since = Some(now);
        self.defer(DeferredAction::SendDiscoveryRequest { to: receiver, channel });
    }

    /// A debounced pedal edge. While paired every edge is unicast to the
    /// receiver; a press while unpaired opens the handshake instead.
    pub fn on_pedal_event(&mut self, event: PedalKeyEvent, now: Instant) {
        self.last_activity = now;
        match self.paired {
            Some(receiver) => {
                send_frame(
                    &mut self.driver,
                    receiver,
                    &Frame::PedalEvent {
                        key: event.key,
                        pressed: event.pressed,
                        pedal_mode: self.cfg.pedal.mode,
                    },
                );
            }
            None => {
                if event.pressed {
                    if let Some(discovered) = self.discovered {
                        debug!("pedal press while unpaired, initiating pairing");
                        self.initiate_pairing(discovered.addr, discovered.channel, now);
                    }
                }
            }
        }
    }

    /// Expire the discovery-response wait. No escalation: the next beacon or
    /// press retries.
    pub fn tick(&mut self, now: Instant) {
        if let Some(since) = self.awaiting_since {
            if now - since >= self.cfg.pairing.discovery_response_timeout {
                debug!("discovery response timed out");
                self.awaiting_since = None;
            }
        }
    }

    /// Drain the deferred-action queue. Each action registers its peer first
    /// and yields briefly so the radio's peer table settles.
    pub async fn drain_deferred(&mut self) {
        while let Some(action) = self.deferred.pop_front() {
            match action {
                DeferredAction::SendOnline { to, channel } => {
                    let _ = self.driver.register_peer(to, channel);
                    Timer::after(PEER_READY_DELAY).await;
                    send_frame(
                        &mut self.driver,
                        to,
                        &Frame::TransmitterOnline {
                            transmitter: self.own_addr,
                        },
                    );
                }
                DeferredAction::SendDiscoveryRequest { to, channel } => {
                    let _ = self.driver.register_peer(to, channel);
                    Timer::after(PEER_READY_DELAY).await;
                    // `awaiting_since` was set when the request was queued; a
                    // failed enqueue simply times out and retries.
                    send_frame(
                        &mut self.driver,
                        to,
                        &Frame::DiscoveryRequest {
                            pedal_mode: self.cfg.pedal.mode,
                        },
                    );
                }
                DeferredAction::SendDeleteRecord { to, channel } => {
                    let _ = self.driver.register_peer(to, channel);
                    Timer::after(PEER_READY_DELAY).await;
                    send_frame(&mut self.driver, to, &Frame::DeleteRecord);
                }
            }
        }
    }

    fn defer(&mut self, action: DeferredAction) {
        if self.deferred.is_full() {
            let _ = self.deferred.pop_front();
        }
        let _ = self.deferred.push_back(action);
    }
}
