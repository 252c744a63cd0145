//! End-to-end transport protocol tests: two full stack instances joined by
//! an in-memory CAN segment, driven through their update pumps with explicit
//! timestamps.
//!
//! Each test follows the pattern: transmit → pump both nodes → inspect the
//! frames on the wire and the delivered message.
mod helpers;

use std::cell::RefCell;
use std::rc::Rc;

use helpers::SegmentDriver;
use korri_isobus::protocol::network::manager::NetworkManager;
use korri_isobus::protocol::network::{
    NetworkConfiguration, PGN_TP_CONNECTION_MANAGEMENT, PGN_TP_DATA_TRANSFER,
};
use korri_isobus::protocol::transport::data::TransportData;

type Node = NetworkManager<'static, SegmentDriver, 16>;

fn node_pair() -> (Node, Node) {
    let (first_driver, second_driver) = SegmentDriver::create_pair();
    (
        NetworkManager::new(first_driver, NetworkConfiguration::default()),
        NetworkManager::new(second_driver, NetworkConfiguration::default()),
    )
}

/// Alternate both update pumps over a span of simulated milliseconds,
/// collecting everything the receiver delivers.
fn pump(
    sender: &mut Node,
    receiver: &mut Node,
    start_ms: u64,
    end_ms: u64,
    step_ms: u64,
) -> Vec<korri_isobus::protocol::network::message::CanMessage> {
    let mut delivered = Vec::new();
    let mut now = start_ms;
    while now <= end_ms {
        sender.update(now);
        delivered.extend(receiver.update(now));
        now += step_ms;
    }
    delivered
}

#[test]
/// Destination-specific round trip: RTS, CTS window, 15 sequenced data
/// frames, EOM-ACK, completion callback, byte-exact delivery.
fn test_connection_mode_round_trip() {
    let (mut sender, mut receiver) = node_pair();
    let tx_cf = sender.control_functions_mut().register_internal(0xA00001, 0x31);
    receiver.control_functions_mut().register_internal(0xB00002, 0x80);
    // The sender must know its peer before a directed transfer starts.
    let rx_seen_by_sender = sender.control_functions_mut().register_external(0xB00002, 0x80);

    let payload: Vec<u8> = (0..100u8).collect();
    let completion: Rc<RefCell<Option<(u32, usize, bool)>>> = Rc::new(RefCell::new(None));
    let completion_in_callback = completion.clone();

    assert!(sender.send_message(
        0x1F001,
        TransportData::Owned(payload.clone()),
        tx_cf,
        Some(rx_seen_by_sender),
        7,
        Some(Box::new(move |pgn, length, success| {
            *completion_in_callback.borrow_mut() = Some((pgn, length, success));
        })),
        0,
    ));

    let delivered = pump(&mut sender, &mut receiver, 0, 200, 10);

    // The receiver hands the reassembled payload up exactly once.
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].pgn, 0x1F001);
    assert_eq!(delivered[0].data, payload);
    assert_eq!(*completion.borrow(), Some((0x1F001, 100, true)));

    // Wire inspection: one RTS, one CTS covering all 15 packets, 15 data
    // frames with sequence numbers 1..=15, one EOM-ACK.
    let sender_cm = sender.driver().sent_with_pgn(PGN_TP_CONNECTION_MANAGEMENT);
    assert_eq!(sender_cm.len(), 1);
    assert_eq!(sender_cm[0].data[0], 0x10);
    assert_eq!(u16::from_le_bytes([sender_cm[0].data[1], sender_cm[0].data[2]]), 100);
    assert_eq!(sender_cm[0].data[3], 15);

    let receiver_cm = receiver.driver().sent_with_pgn(PGN_TP_CONNECTION_MANAGEMENT);
    assert_eq!(receiver_cm.len(), 2, "CTS and EOM-ACK");
    assert_eq!(receiver_cm[0].data[0], 0x11);
    assert_eq!(receiver_cm[0].data[1], 15);
    assert_eq!(receiver_cm[0].data[2], 1);
    assert_eq!(receiver_cm[1].data[0], 0x13);

    let data_frames = sender.driver().sent_with_pgn(PGN_TP_DATA_TRANSFER);
    assert_eq!(data_frames.len(), 15, "one data frame per packet");
    for (index, frame) in data_frames.iter().enumerate() {
        assert_eq!(frame.data[0] as usize, index + 1);
        assert!(frame.data[0] >= 1);
    }
    // Final frame: payload bytes 98..100 then pad bytes.
    let last = data_frames[14];
    assert_eq!(last.data[1], 98);
    assert_eq!(last.data[2], 99);
    assert_eq!(&last.data[3..], &[0xFF; 5]);

    assert_eq!(sender.transport().active_session_count(), 0);
    assert_eq!(receiver.transport().active_session_count(), 0);
}

#[test]
/// Broadcast round trip: BAM, three paced data frames, single delivery, and
/// no acknowledge in either direction.
fn test_broadcast_round_trip() {
    let (mut sender, mut receiver) = node_pair();
    let tx_cf = sender.control_functions_mut().register_internal(0xA00001, 0x31);
    receiver.control_functions_mut().register_internal(0xB00002, 0x80);

    let payload: Vec<u8> = (0..20u8).collect();
    assert!(sender.send_message(
        0x1FEAB,
        TransportData::Owned(payload.clone()),
        tx_cf,
        None,
        7,
        None,
        0,
    ));

    let delivered = pump(&mut sender, &mut receiver, 0, 400, 10);

    assert_eq!(delivered.len(), 1, "broadcast delivered exactly once");
    assert_eq!(delivered[0].data, payload);
    assert!(delivered[0].is_destination_global());

    // BAM first, then three data frames at least 50 ms apart.
    let cm_frames = sender.driver().sent_with_pgn(PGN_TP_CONNECTION_MANAGEMENT);
    assert_eq!(cm_frames.len(), 1);
    assert_eq!(cm_frames[0].data[0], 0x20);
    assert_eq!(u16::from_le_bytes([cm_frames[0].data[1], cm_frames[0].data[2]]), 20);
    assert_eq!(cm_frames[0].data[3], 3);

    let data_frames = sender.driver().sent_with_pgn(PGN_TP_DATA_TRANSFER);
    assert_eq!(data_frames.len(), 3);

    // The receiver never acknowledges a broadcast.
    assert!(receiver.driver().sent.is_empty());
}

#[test]
/// The largest legal payload (1785 bytes, 255 packets) round-trips intact.
fn test_maximum_length_round_trip() {
    let (mut sender, mut receiver) = node_pair();
    let tx_cf = sender.control_functions_mut().register_internal(0xA00001, 0x31);
    receiver.control_functions_mut().register_internal(0xB00002, 0x80);
    let rx_seen_by_sender = sender.control_functions_mut().register_external(0xB00002, 0x80);

    let payload: Vec<u8> = (0..1785usize).map(|byte| (byte % 251) as u8).collect();
    assert!(sender.send_message(
        0x1F001,
        TransportData::Owned(payload.clone()),
        tx_cf,
        Some(rx_seen_by_sender),
        7,
        None,
        0,
    ));

    // 255 packets split over 16-packet CTS windows take a while.
    let delivered = pump(&mut sender, &mut receiver, 0, 2000, 10);

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].data.len(), 1785);
    assert_eq!(delivered[0].data, payload);
    assert_eq!(sender.driver().sent_with_pgn(PGN_TP_DATA_TRANSFER).len(), 255);
}

#[test]
/// A zero-copy static payload behaves exactly like an owned one.
fn test_static_payload_round_trip() {
    static POOL_IMAGE: [u8; 64] = {
        let mut image = [0u8; 64];
        let mut index = 0;
        while index < 64 {
            image[index] = index as u8 ^ 0x5A;
            index += 1;
        }
        image
    };

    let (mut sender, mut receiver) = node_pair();
    let tx_cf = sender.control_functions_mut().register_internal(0xA00001, 0x31);
    receiver.control_functions_mut().register_internal(0xB00002, 0x80);
    let rx_seen_by_sender = sender.control_functions_mut().register_external(0xB00002, 0x80);

    assert!(sender.send_message(
        0x1F001,
        TransportData::Static(&POOL_IMAGE),
        tx_cf,
        Some(rx_seen_by_sender),
        7,
        None,
        0,
    ));

    let delivered = pump(&mut sender, &mut receiver, 0, 200, 10);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].data, POOL_IMAGE);
}

#[test]
/// With the session table full, a further RTS is answered with abort reason
/// AlreadyInCMSession (1) and no session is created for it.
fn test_admission_abort_when_table_full() {
    let config = NetworkConfiguration {
        max_transport_protocol_sessions: 1,
        ..NetworkConfiguration::default()
    };
    let (first_driver, second_driver) = SegmentDriver::create_pair();
    let mut sender: Node = NetworkManager::new(first_driver, NetworkConfiguration::default());
    let mut receiver: Node = NetworkManager::new(second_driver, config);

    let tx_a = sender.control_functions_mut().register_internal(0xA00001, 0x31);
    let tx_b = sender.control_functions_mut().register_internal(0xA00003, 0x32);
    receiver.control_functions_mut().register_internal(0xB00002, 0x80);
    let rx_seen_by_sender = sender.control_functions_mut().register_external(0xB00002, 0x80);

    let second_completion: Rc<RefCell<Option<bool>>> = Rc::new(RefCell::new(None));
    let second_result = second_completion.clone();

    assert!(sender.send_message(
        0x1F001,
        TransportData::Owned(vec![1u8; 100]),
        tx_a,
        Some(rx_seen_by_sender),
        7,
        None,
        0,
    ));
    assert!(sender.send_message(
        0x1F002,
        TransportData::Owned(vec![2u8; 100]),
        tx_b,
        Some(rx_seen_by_sender),
        7,
        Some(Box::new(move |_, _, success| {
            *second_result.borrow_mut() = Some(success);
        })),
        0,
    ));

    pump(&mut sender, &mut receiver, 0, 300, 10);

    // Exactly one abort, reason 1, addressed to the second sender.
    let aborts: Vec<_> = receiver
        .driver()
        .sent_with_pgn(PGN_TP_CONNECTION_MANAGEMENT)
        .into_iter()
        .filter(|frame| frame.data[0] == 0xFF)
        .cloned()
        .collect();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].data[1], 1, "AlreadyInCMSession");
    assert_eq!(aborts[0].id.destination(), Some(0x32));

    // The aborted sender learned about the failure.
    assert_eq!(*second_completion.borrow(), Some(false));
    assert!(receiver.transport().active_session_count() <= 1);
}
