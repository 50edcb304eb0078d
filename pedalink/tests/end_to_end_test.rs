mod common;

use common::{
    fast_pairing_config, fast_transmitter_config, leak_flash_channel, leak_frame_channel,
    leak_pedal_channel, leak_report_channel, TestRadio, RX_1, TX_A,
};
use embassy_futures::block_on;
use embassy_futures::select::select3;
use embassy_time::{Duration, Instant, Timer};
use pedalink::event::{HostKeyEvent, PedalKeyEvent};
use pedalink::protocol::KEY_PRIMARY;
use pedalink::receiver::PairingReceiver;
use pedalink::slots::PedalMode;
use pedalink::table::TransmitterTable;
use pedalink::transmitter::PairingTransmitter;

/// Full link: a single-pedal transmitter pairs through the grace period and
/// its pedal edges come out of the receiver as host key events.
#[test]
fn press_pairs_and_then_types() {
    let rx_frames = leak_frame_channel();
    let tx_frames = leak_frame_channel();
    let reports = leak_report_channel();
    let flash_ops = leak_flash_channel();
    let pedal_events = leak_pedal_channel();

    // Each node's radio delivers into the other node's frame channel.
    let rx_radio = TestRadio::new(RX_1).link(TX_A, tx_frames).link_broadcast(tx_frames);
    let tx_radio = TestRadio::new(TX_A).link(RX_1, rx_frames).link_broadcast(rx_frames);

    let mut receiver = PairingReceiver::new(
        rx_radio,
        RX_1,
        fast_pairing_config(),
        TransmitterTable::new(),
        None,
        Instant::now(),
        rx_frames,
        reports,
        flash_ops,
    );
    let mut transmitter = PairingTransmitter::new(
        tx_radio,
        TX_A,
        fast_transmitter_config(PedalMode::Single),
        None,
        Instant::now(),
        tx_frames,
        pedal_events,
    );

    block_on(async {
        select3(receiver.run(), transmitter.run(), async {
            // Sit out the initial ping window; a grace beacon arrives and is
            // remembered but does not pair on its own.
            Timer::after(Duration::from_millis(150)).await;

            // The user's first press opens the handshake. That press itself
            // is not forwarded; nobody is paired yet.
            pedal_events
                .send(PedalKeyEvent {
                    key: KEY_PRIMARY,
                    pressed: true,
                })
                .await;
            Timer::after(Duration::from_millis(100)).await;

            // Paired now: a full press/release cycle reaches the host.
            pedal_events
                .send(PedalKeyEvent {
                    key: KEY_PRIMARY,
                    pressed: true,
                })
                .await;
            pedal_events
                .send(PedalKeyEvent {
                    key: KEY_PRIMARY,
                    pressed: false,
                })
                .await;
            Timer::after(Duration::from_millis(100)).await;
        })
        .await
    });

    assert!(transmitter.is_paired());
    assert_eq!(transmitter.paired_receiver(), Some(RX_1));
    assert_eq!(receiver.table().find(TX_A), Some(0));
    assert!(receiver.table().record(0).unwrap().responsive);
    assert_eq!(receiver.table().used(), 1);

    // Exactly one press and one release, on slot 0's key.
    assert_eq!(
        reports.try_receive(),
        Ok(HostKeyEvent {
            keycode: b'l',
            pressed: true,
        })
    );
    assert_eq!(
        reports.try_receive(),
        Ok(HostKeyEvent {
            keycode: b'l',
            pressed: false,
        })
    );
    assert!(reports.try_receive().is_err());
}

/// A receiver that rebooted with a stored bond confirms the returning
/// transmitter without a fresh discovery handshake.
#[test]
fn bonded_transmitter_reconnects_after_receiver_reboot() {
    let rx_frames = leak_frame_channel();
    let tx_frames = leak_frame_channel();
    let reports = leak_report_channel();
    let flash_ops = leak_flash_channel();
    let pedal_events = leak_pedal_channel();

    let rx_radio = TestRadio::new(RX_1).link(TX_A, tx_frames).link_broadcast(tx_frames);
    let tx_radio = TestRadio::new(TX_A).link(RX_1, rx_frames).link_broadcast(rx_frames);

    // The receiver wakes with tx_A bonded in slot 0; the transmitter wakes
    // with no session but remembers its receiver.
    let mut table = TransmitterTable::new();
    table.restore(
        0,
        pedalink::table::BondEntry {
            addr: TX_A,
            mode: PedalMode::Single,
        },
        Instant::now(),
    );
    let mut receiver = PairingReceiver::new(
        rx_radio,
        RX_1,
        fast_pairing_config(),
        table,
        None,
        Instant::now(),
        rx_frames,
        reports,
        flash_ops,
    );
    let mut transmitter = PairingTransmitter::new(
        tx_radio,
        TX_A,
        fast_transmitter_config(PedalMode::Single),
        Some(RX_1),
        Instant::now(),
        tx_frames,
        pedal_events,
    );

    block_on(async {
        select3(receiver.run(), transmitter.run(), async {
            // The boot ping and the online broadcast cross paths and either
            // way the session comes back without user action.
            Timer::after(Duration::from_millis(200)).await;
        })
        .await
    });

    assert!(transmitter.is_paired());
    assert!(receiver.table().record(0).unwrap().responsive);
    assert_eq!(receiver.table().used(), 1);
}
