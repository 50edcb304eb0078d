//! Receiver-side pairing service and pedal-event ingest.
//!
//! Boot sequence: ping every bonded transmitter (Phase A), give them
//! `initial_ping_wait` to reappear, then open a bounded grace period during
//! which free capacity is beaconed (Phase C). After grace, or as soon as the
//! responsive set fills every slot, discovery is closed to unknown
//! transmitters (Phase D). Bonds are only ever evicted by an explicit
//! `DeleteRecord` from the transmitter itself.

use embassy_futures::select::{select, Either};
use embassy_time::{Instant, Timer};

use crate::address::NodeAddress;
use crate::channel::{FlashChannel, FrameChannel, ReportChannel};
use crate::config::PairingConfig;
use crate::event::HostKeyEvent;
use crate::hid::host_key;
use crate::protocol::{Frame, KEY_SECONDARY};
use crate::radio::{send_frame, InboundFrame, RadioDriver, PEER_READY_DELAY};
use crate::slots::{can_fit_mode_change, can_fit_new, can_fit_reconnect, PedalMode};
use crate::storage::FlashOperationMessage;
use crate::table::TransmitterTable;
use crate::MAX_PEDAL_SLOTS;

/// State of a replacement probe: an unknown transmitter appeared while full,
/// so every bonded transmitter is pinged to see who is still alive. The
/// outcome is diagnostic; no bond is removed on timeout.
#[derive(Debug, Clone, Copy)]
struct ReplacementProbe {
    candidate: NodeAddress,
    channel: u8,
    deadline: Instant,
    responded: [bool; MAX_PEDAL_SLOTS],
}

/// The receiver's pairing state machine. Handlers take `now` explicitly so
/// the protocol can be driven without timers in tests.
pub struct PairingReceiver<'a, D: RadioDriver> {
    driver: D,
    own_addr: NodeAddress,
    cfg: PairingConfig,
    table: TransmitterTable,
    debug_sink: Option<NodeAddress>,
    boot: Instant,
    initial_ping_sent: bool,
    capture_done: bool,
    grace_over: bool,
    grace_skipped_full: bool,
    last_beacon: Instant,
    /// Unknown transmitter we invited after grace; its discovery request is
    /// honored even though discovery is otherwise closed.
    invited: Option<NodeAddress>,
    probe: Option<ReplacementProbe>,
    frames: &'a FrameChannel,
    reports: &'a ReportChannel,
    flash_ops: &'a FlashChannel,
}

impl<'a, D: RadioDriver> PairingReceiver<'a, D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: D,
        own_addr: NodeAddress,
        cfg: PairingConfig,
        table: TransmitterTable,
        debug_sink: Option<NodeAddress>,
        boot: Instant,
        frames: &'a FrameChannel,
        reports: &'a ReportChannel,
        flash_ops: &'a FlashChannel,
    ) -> Self {
        Self {
            driver,
            own_addr,
            cfg,
            table,
            debug_sink,
            boot,
            initial_ping_sent: false,
            capture_done: false,
            grace_over: false,
            grace_skipped_full: false,
            last_beacon: boot,
            invited: None,
            probe: None,
            frames,
            reports,
            flash_ops,
        }
    }

    pub fn table(&self) -> &TransmitterTable {
        &self.table
    }

    pub fn grace_skipped_full(&self) -> bool {
        self.grace_skipped_full
    }

    pub fn grace_over(&self) -> bool {
        self.grace_over
    }

    pub fn is_probing(&self) -> bool {
        self.probe.is_some()
    }

    pub fn debug_sink(&self) -> Option<NodeAddress> {
        self.debug_sink
    }

    /// Pair a debug monitor out of band and persist its address.
    pub fn set_debug_sink(&mut self, addr: NodeAddress, channel: u8) {
        if !addr.is_valid() {
            return;
        }
        let _ = self.driver.register_peer(addr, channel);
        self.debug_sink = Some(addr);
        if self.flash_ops.try_send(FlashOperationMessage::SaveDebugSink(addr)).is_err() {
            warn!("flash channel full, debug sink not persisted");
        }
    }

    /// Run the receiver service forever.
    pub async fn run(&mut self) -> ! {
        let _ = self.driver.register_peer(NodeAddress::BROADCAST, 0);
        let frames = self.frames;
        loop {
            match select(frames.receive(), Timer::after(self.cfg.tick_interval)).await {
                Either::First(inbound) => self.dispatch(inbound, Instant::now()).await,
                Either::Second(_) => {}
            }
            self.tick(Instant::now()).await;
        }
    }

    /// Dispatch one received frame.
    pub async fn dispatch(&mut self, inbound: InboundFrame, now: Instant) {
        let InboundFrame {
            sender,
            frame,
            channel,
        } = inbound;
        if !sender.is_valid() {
            return;
        }
        match frame {
            Frame::DiscoveryRequest { pedal_mode } => {
                self.handle_discovery_request(sender, pedal_mode, channel, now).await
            }
            // The payload address only repeats the sender; trust the sender.
            Frame::TransmitterOnline { transmitter: _ } => {
                self.handle_transmitter_online(sender, channel, now).await
            }
            Frame::Alive => self.handle_alive(sender, now),
            Frame::TransmitterPaired { transmitter: _, receiver } => {
                self.handle_transmitter_paired(sender, receiver, now)
            }
            Frame::DeleteRecord => self.handle_delete_record(sender),
            Frame::PedalEvent { key, pressed, .. } => self.handle_pedal_event(sender, key, pressed, now),
            // Receiver-originated frames heard over broadcast.
            Frame::Beacon { .. } | Frame::DiscoveryResponse | Frame::PairingConfirmed { .. } => {}
        }
    }

    /// Periodic work: phase transitions, beacon cadence, probe expiry.
    pub async fn tick(&mut self, now: Instant) {
        if !self.initial_ping_sent {
            self.send_initial_ping().await;
        }

        let elapsed = now - self.boot;

        // One-shot capture once the initial ping window closes: the
        // responsive set is considered stable for this boot epoch. No slot
        // reordering; every record keeps its slot.
        if !self.capture_done && elapsed >= self.cfg.initial_ping_wait {
            self.capture_done = true;
            info!(
                "initial ping window closed: {} of {} bonded transmitter(s) responsive, {}/{} slots used",
                self.table.responsive_count(),
                self.table.bond_count(),
                self.table.used(),
                MAX_PEDAL_SLOTS
            );
        }

        if self.capture_done && !self.grace_over {
            if self.table.is_full() {
                self.grace_over = true;
                self.grace_skipped_full = true;
                info!("slots full, ending grace period early");
            } else if elapsed >= self.cfg.grace_period {
                self.grace_over = true;
                info!(
                    "grace period ended: {}/{} slots used",
                    self.table.used(),
                    MAX_PEDAL_SLOTS
                );
            }
        }

        // Grace period: solicit. Re-ping bonded transmitters that have not
        // reappeared, and beacon free capacity.
        if self.capture_done && !self.grace_over && now - self.last_beacon >= self.cfg.beacon_interval {
            self.last_beacon = now;
            for (_, record) in self.table.occupied() {
                if !record.responsive {
                    send_frame(&mut self.driver, record.addr, &Frame::Alive);
                }
            }
            if self.table.available() > 0 {
                send_frame(
                    &mut self.driver,
                    NodeAddress::BROADCAST,
                    &Frame::Beacon {
                        receiver: self.own_addr,
                        available_slots: self.table.available(),
                        total_slots: MAX_PEDAL_SLOTS as u8,
                    },
                );
            }
        }

        if let Some(probe) = self.probe {
            if now >= probe.deadline {
                self.finish_probe(probe).await;
            }
        }
    }

    /// Phase A: ping every bonded transmitter so that paired ones confirm and
    /// unpaired ones re-run discovery.
    async fn send_initial_ping(&mut self) {
        self.initial_ping_sent = true;
        let mut pinged = 0;
        for slot in 0..MAX_PEDAL_SLOTS {
            let Some(addr) = self.table.record(slot).map(|r| r.addr) else {
                continue;
            };
            let _ = self.driver.register_peer(addr, 0);
            Timer::after(PEER_READY_DELAY).await;
            send_frame(&mut self.driver, addr, &Frame::Alive);
            pinged += 1;
        }
        if pinged > 0 {
            info!("pinged {} known transmitter(s) on boot", pinged);
        }
    }

    async fn handle_discovery_request(
        &mut self,
        tx: NodeAddress,
        mode: PedalMode,
        channel: u8,
        now: Instant,
    ) {
        if self.grace_skipped_full {
            debug!("discovery from {} rejected: slots were full at grace", tx);
            return;
        }
        let known = self.table.find(tx);
        let elapsed = now - self.boot;
        if known.is_none() && elapsed < self.cfg.initial_ping_wait {
            debug!("discovery from {} rejected: still waiting for known transmitters", tx);
            return;
        }
        if known.is_none() && self.grace_over && self.invited != Some(tx) {
            debug!("discovery from {} rejected: grace period over", tx);
            return;
        }

        let fits = match known {
            Some(index) => {
                let responsive = self.table.record(index).map(|r| r.responsive).unwrap_or(false);
                if responsive {
                    can_fit_mode_change(&self.table, index, mode.slots())
                } else {
                    can_fit_reconnect(&self.table, index, mode.slots())
                }
            }
            None => can_fit_new(&self.table, mode.slots()),
        };
        if !fits {
            debug!("discovery from {} rejected: not enough slots", tx);
            return;
        }

        let _ = self.driver.register_peer(tx, channel);
        Timer::after(PEER_READY_DELAY).await;
        if !send_frame(&mut self.driver, tx, &Frame::DiscoveryResponse) {
            // The transmitter times out and retries; leave the table alone.
            warn!("discovery response to {} not enqueued", tx);
            return;
        }

        match known {
            Some(index) => {
                if let Some(record) = self.table.record_mut(index) {
                    record.responsive = true;
                    record.mode = mode;
                    record.last_seen = now;
                }
                info!("transmitter {} reconnected in slot {}", tx, index);
            }
            None => match self.table.insert(tx, mode, now) {
                Some(slot) => {
                    if self.invited == Some(tx) {
                        self.invited = None;
                    }
                    info!("transmitter {} paired into slot {}", tx, slot);
                }
                None => {
                    warn!("no empty slot for {}", tx);
                    return;
                }
            },
        }
        self.save_bonds();
    }

    async fn handle_transmitter_online(&mut self, tx: NodeAddress, channel: u8, now: Instant) {
        match self.table.find(tx) {
            Some(index) => {
                let (responsive, slots) = match self.table.record(index) {
                    Some(r) => (r.responsive, r.mode.slots()),
                    None => return,
                };
                if responsive || can_fit_reconnect(&self.table, index, slots) {
                    let _ = self.driver.register_peer(tx, channel);
                    Timer::after(PEER_READY_DELAY).await;
                    send_frame(
                        &mut self.driver,
                        tx,
                        &Frame::PairingConfirmed {
                            receiver: self.own_addr,
                        },
                    );
                    self.table.mark_responsive(index, now);
                    debug!("confirmed pairing to returning transmitter {}", tx);
                } else if let Some(record) = self.table.record_mut(index) {
                    // Full; remember we heard it but send nothing.
                    record.last_seen = now;
                }
            }
            None => {
                if self.table.is_full() {
                    self.start_probe(tx, channel, now);
                } else if self.grace_over {
                    // Invite a handshake; this is how previously-deleted
                    // transmitters find their way back after grace.
                    let _ = self.driver.register_peer(tx, channel);
                    Timer::after(PEER_READY_DELAY).await;
                    send_frame(&mut self.driver, tx, &Frame::Alive);
                    self.invited = Some(tx);
                    debug!("invited unknown transmitter {}", tx);
                }
                // During grace the beacons already solicit; stay quiet.
            }
        }
    }

    fn handle_alive(&mut self, tx: NodeAddress, now: Instant) {
        if let Some(index) = self.table.find(tx) {
            self.table.mark_responsive(index, now);
            if let Some(probe) = self.probe.as_mut() {
                probe.responded[index] = true;
            }
        }
    }

    fn handle_transmitter_paired(&mut self, tx: NodeAddress, paired_with: NodeAddress, now: Instant) {
        let Some(index) = self.table.find(tx) else {
            return;
        };
        if paired_with == self.own_addr {
            if self.capture_done {
                if let Some(record) = self.table.record_mut(index) {
                    record.last_seen = now;
                }
            } else {
                self.table.mark_responsive(index, now);
            }
        } else if let Some(record) = self.table.record_mut(index) {
            // Paired elsewhere. Keep the bond; the transmitter sends
            // DeleteRecord itself if it wants out.
            record.last_seen = now;
        }
    }

    fn handle_delete_record(&mut self, tx: NodeAddress) {
        if let Some(index) = self.table.find(tx) {
            self.table.clear_slot(index);
            self.save_bonds();
            info!("transmitter {} deleted its bond in slot {}", tx, index);
        }
    }

    /// Ingest: map a pedal event from a bonded, responsive transmitter to the
    /// slot's host key. Everything else is dropped.
    fn handle_pedal_event(&mut self, tx: NodeAddress, key: u8, pressed: bool, now: Instant) {
        let Some(index) = self.table.find(tx) else {
            debug!("pedal event from unknown {} dropped", tx);
            return;
        };
        let Some(record) = self.table.record_mut(index) else {
            return;
        };
        if !record.responsive {
            debug!("pedal event from dormant {} dropped", tx);
            return;
        }
        record.last_seen = now;
        // The stored mode decides the mapping, not the frame's claim. A dual
        // transmitter reserves both pedal slots, so its keys are slots 0 and
        // 1 wherever its record sits; a single transmitter answers for the
        // slot its record occupies.
        let pedal_slot = match record.mode {
            PedalMode::Dual => (key == KEY_SECONDARY) as usize,
            PedalMode::Single => index,
        };
        let event = HostKeyEvent {
            keycode: host_key(pedal_slot),
            pressed,
        };
        if self.reports.try_send(event).is_err() {
            warn!("report channel full, key event dropped");
        }
    }

    fn start_probe(&mut self, candidate: NodeAddress, channel: u8, now: Instant) {
        if self.probe.is_some() {
            return;
        }
        info!("unknown transmitter {} while full, probing bonded transmitters", candidate);
        for (_, record) in self.table.occupied() {
            send_frame(&mut self.driver, record.addr, &Frame::Alive);
        }
        self.probe = Some(ReplacementProbe {
            candidate,
            channel,
            deadline: now + self.cfg.alive_response_timeout,
            responded: [false; MAX_PEDAL_SLOTS],
        });
    }

    /// Probe expiry. Bonds are untouched regardless of who answered; if
    /// capacity freed up in the meantime the stashed candidate is invited.
    async fn finish_probe(&mut self, probe: ReplacementProbe) {
        self.probe = None;
        let silent = self
            .table
            .occupied()
            .filter(|(i, _)| !probe.responded[*i])
            .count();
        info!("replacement probe done: {} bonded transmitter(s) silent", silent);
        if !self.table.is_full() && probe.candidate.is_valid() {
            let _ = self.driver.register_peer(probe.candidate, probe.channel);
            Timer::after(PEER_READY_DELAY).await;
            send_frame(&mut self.driver, probe.candidate, &Frame::Alive);
            self.invited = Some(probe.candidate);
        }
    }

    fn save_bonds(&mut self) {
        if self
            .flash_ops
            .try_send(FlashOperationMessage::SaveBonds(self.table.bonds()))
            .is_err()
        {
            warn!("flash channel full, bond save dropped");
        }
    }
}
