use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use super::*;
use crate::protocol::network::control_function::CfHandle;
use crate::protocol::network::manager::NetworkManager;
use crate::protocol::network::message::CanMessage;
use crate::protocol::network::{
    NetworkConfiguration, PGN_ACKNOWLEDGE, PGN_ECU_TO_VIRTUAL_TERMINAL,
    PGN_VIRTUAL_TERMINAL_TO_ECU,
};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::NULL_CAN_ADDRESS;
use crate::protocol::transport::traits::can_driver::CanDriver;
use crate::protocol::vt::objects::{AttributeError, ObjectKind, VtObject, NULL_OBJECT_ID};
use crate::protocol::vt::pool::ObjectPool;
use crate::protocol::vt::working_set::PoolParseState;

struct MockDriver {
    sent: Vec<CanFrame>,
    rx: VecDeque<CanFrame>,
}

impl MockDriver {
    fn new() -> Self {
        Self { sent: Vec::new(), rx: VecDeque::new() }
    }
}

impl CanDriver for MockDriver {
    fn start(&mut self) -> bool {
        true
    }

    fn stop(&mut self) {}

    fn send(&mut self, frame: &CanFrame) -> bool {
        self.sent.push(frame.clone());
        true
    }

    fn receive(&mut self) -> Option<CanFrame> {
        self.rx.pop_front()
    }
}

/// Backend double recording every storage interaction.
struct MockBackend {
    enough_memory: bool,
    store: Vec<([u8; 7], Vec<u8>)>,
    parse_template: Option<ObjectPool>,
    parse_failure: Option<u16>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self { enough_memory: true, store: Vec::new(), parse_template: None, parse_failure: None }
    }
}

impl VtServerBackend for MockBackend {
    fn is_enough_memory(&self, _required_bytes: u32) -> bool {
        self.enough_memory
    }

    fn save_version(&mut self, label: &[u8; 7], _client_name: u64, data: &[u8]) -> bool {
        self.store.push((*label, data.to_vec()));
        true
    }

    fn load_version(&mut self, label: &[u8; 7], _client_name: u64) -> Vec<u8> {
        self.store
            .iter()
            .find(|(stored, _)| stored == label)
            .map(|(_, data)| data.clone())
            .unwrap_or_default()
    }

    fn list_versions(&self, _client_name: u64) -> Vec<[u8; 7]> {
        self.store.iter().map(|(label, _)| *label).collect()
    }

    fn parse_object_pool(&self, _data: &[u8]) -> Result<ObjectPool, crate::error::PoolError> {
        if let Some(id) = self.parse_failure {
            return Err(crate::error::PoolError::FaultingObject { id });
        }
        Ok(self.parse_template.clone().unwrap_or_default())
    }
}

struct Fixture {
    network: NetworkManager<'static, MockDriver, 16>,
    server: VirtualTerminalServer<MockBackend>,
    client: CfHandle,
}

fn fixture() -> Fixture {
    fixture_with_backend(MockBackend::default())
}

fn fixture_with_backend(backend: MockBackend) -> Fixture {
    let mut network = NetworkManager::new(MockDriver::new(), NetworkConfiguration::default());
    let server_cf = network.control_functions_mut().register_internal(0x26A1, 0x26);
    let client = network.control_functions_mut().register_external(0x80B2, 0x80);
    let server = VirtualTerminalServer::new(server_cf, VtConfiguration::default(), backend);
    Fixture { network, server, client }
}

fn message(client: CfHandle, data: &[u8]) -> CanMessage {
    CanMessage {
        pgn: PGN_ECU_TO_VIRTUAL_TERMINAL,
        data: data.to_vec(),
        source: client,
        destination: None,
        priority: 7,
    }
}

fn maintenance_with_init_bit(client: CfHandle) -> CanMessage {
    message(client, &[0xFF, 0x01, 0x05, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
}

fn attach(f: &mut Fixture) {
    let attach_message = maintenance_with_init_bit(f.client);
    f.server.process_message(&attach_message, &mut f.network, 0);
    assert_eq!(f.server.managed_working_set_count(), 1);
}

/// Place an object directly into an attached client's pool.
fn inject_object(f: &mut Fixture, object: VtObject) {
    f.server
        .working_set_for_mut(f.client)
        .expect("client is attached")
        .pool_mut()
        .insert(object);
}

fn last_sent(f: &Fixture) -> &CanFrame {
    f.network.driver().sent.last().expect("a frame was sent")
}

//==================================================================================Attach

#[test]
/// A maintenance message with the init bit attaches the client.
fn test_attach_on_maintenance_init_bit() {
    let mut f = fixture();
    attach(&mut f);

    let working_set = f.server.working_set_for(f.client).expect("attached");
    assert_eq!(working_set.client_version(), 5);
    assert!(f.network.driver().sent.is_empty(), "attach sends nothing");
}

#[test]
/// Any other message from an unknown source earns a negative acknowledge.
fn test_unmanaged_source_is_nacked() {
    let mut f = fixture();
    let get_memory = message(f.client, &[0xC0, 0xFF, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF]);
    f.server.process_message(&get_memory, &mut f.network, 0);

    assert_eq!(f.server.managed_working_set_count(), 0);
    let nack = last_sent(&f);
    assert_eq!(nack.id.pgn(), PGN_ACKNOWLEDGE);
    assert_eq!(nack.data[0], AcknowledgementType::Negative as u8);
    assert_eq!(nack.data[4], 0x80, "NACK names the offending address");
    assert_eq!(nack.data[5], 0x00);
    assert_eq!(nack.data[6], 0xE6);
    assert_eq!(nack.data[7], 0x00);
}

#[test]
/// A maintenance heartbeat refreshes the timestamp; silence disconnects.
fn test_maintenance_timeout_drops_working_set() {
    let mut f = fixture();
    attach(&mut f);

    // Heartbeats keep the client alive.
    let heartbeat = message(f.client, &[0xFF, 0x00, 0x05, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&heartbeat, &mut f.network, 2000);
    f.server.update(&mut f.network, 4000);
    assert_eq!(f.server.managed_working_set_count(), 1);

    // Silence past the timeout disconnects.
    f.server.update(&mut f.network, 5001);
    assert_eq!(f.server.managed_working_set_count(), 0);
}

//==================================================================================Capability queries

#[test]
/// Get Memory replies with the version byte and the backend's verdict.
fn test_get_memory_response() {
    let mut f = fixture();
    attach(&mut f);

    let query = message(f.client, &[0xC0, 0xFF, 0x00, 0x10, 0x00, 0x00, 0xFF, 0xFF]);
    f.server.process_message(&query, &mut f.network, 10);

    let reply = last_sent(&f);
    assert_eq!(reply.id.pgn(), PGN_VIRTUAL_TERMINAL_TO_ECU);
    assert_eq!(reply.id.destination(), Some(0x80));
    assert_eq!(reply.data[0], 0xC0);
    assert_eq!(reply.data[1], 5, "advertised version byte");
    assert_eq!(reply.data[2], 0, "0 = enough memory");
}

#[test]
/// Get Hardware reports the configured screen geometry.
fn test_get_hardware_response() {
    let mut f = fixture();
    attach(&mut f);

    let query = message(f.client, &[0xC2, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&query, &mut f.network, 10);

    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0xC2);
    assert_eq!(reply.data[2], GraphicMode::TwoHundredFiftySixColour as u8);
    assert_eq!(u16::from_le_bytes([reply.data[4], reply.data[5]]), 480);
    assert_eq!(u16::from_le_bytes([reply.data[6], reply.data[7]]), 480);
}

#[test]
/// Get Supported Objects advertises the capability table over TP.
fn test_get_supported_objects_uses_transport() {
    let mut f = fixture();
    attach(&mut f);

    let query = message(f.client, &[0xC5, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&query, &mut f.network, 10);

    // 2 + 35 type codes cannot fit one frame.
    assert_eq!(f.network.transport().active_session_count(), 1);
}

//==================================================================================Change Numeric Value

#[test]
/// Writing a number variable succeeds, answers, and repaints once.
fn test_change_numeric_value_number_variable() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(501, ObjectKind::NumberVariable { value: 0 }));

    let repaints: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let repaint_counter = repaints.clone();
    f.server.on_repaint().add_listener(alloc::boxed::Box::new(move |_| {
        *repaint_counter.borrow_mut() += 1;
        true
    }));
    let values: Rc<RefCell<Vec<(u16, u32)>>> = Rc::new(RefCell::new(Vec::new()));
    let value_log = values.clone();
    f.server.on_numeric_value_changed().add_listener(alloc::boxed::Box::new(move |event| {
        value_log.borrow_mut().push((event.object_id, event.value));
        true
    }));

    let command = message(f.client, &[0xA8, 0xF5, 0x01, 0xFF, 0x78, 0x56, 0x34, 0x12]);
    f.server.process_message(&command, &mut f.network, 10);

    let working_set = f.server.working_set_for(f.client).expect("attached");
    assert_eq!(
        working_set.pool().object(501).map(|o| &o.kind),
        Some(&ObjectKind::NumberVariable { value: 0x1234_5678 })
    );

    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0xA8);
    assert_eq!(u16::from_le_bytes([reply.data[1], reply.data[2]]), 501);
    assert_eq!(reply.data[3], 0, "no error bits");
    assert_eq!(
        u32::from_le_bytes([reply.data[4], reply.data[5], reply.data[6], reply.data[7]]),
        0x1234_5678
    );

    assert_eq!(*repaints.borrow(), 1, "exactly one repaint per mutation");
    assert_eq!(*values.borrow(), alloc::vec![(501, 0x1234_5678)]);
}

#[test]
/// An unknown object ID is reported and changes nothing.
fn test_change_numeric_value_invalid_object() {
    let mut f = fixture();
    attach(&mut f);

    let command = message(f.client, &[0xA8, 0xF5, 0x01, 0xFF, 0x01, 0x00, 0x00, 0x00]);
    f.server.process_message(&command, &mut f.network, 10);

    let reply = last_sent(&f);
    assert_eq!(reply.data[3], 1 << ChangeNumericValueErrorBit::InvalidObjectId as u8);
}

//==================================================================================Change Size

#[test]
/// An output meter only resizes while staying square.
fn test_change_size_meter_must_stay_square() {
    let mut f = fixture();
    attach(&mut f);
    let mut meter = VtObject::new(
        600,
        ObjectKind::OutputMeter { value: 0, minimum_value: 0, maximum_value: 100, needle_colour: 12 },
    );
    meter.width = 40;
    meter.height = 40;
    inject_object(&mut f, meter);

    let repaints: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let repaint_counter = repaints.clone();
    f.server.on_repaint().add_listener(alloc::boxed::Box::new(move |_| {
        *repaint_counter.borrow_mut() += 1;
        true
    }));

    // 100 x 50 is not square: rejected, nothing repainted.
    let command = message(f.client, &[0xAB, 0x58, 0x02, 100, 0, 50, 0, 0xFF]);
    f.server.process_message(&command, &mut f.network, 10);

    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0xAB);
    assert_eq!(reply.data[3], 1 << ChangeSizeErrorBit::AnyOtherError as u8);

    let object = f.server.working_set_for(f.client).expect("attached").pool().object(600).expect("meter");
    assert_eq!((object.width, object.height), (40, 40), "size must be unchanged");
    assert_eq!(*repaints.borrow(), 0, "no repaint on a rejected command");

    // 80 x 80 is square: accepted.
    let command = message(f.client, &[0xAB, 0x58, 0x02, 80, 0, 80, 0, 0xFF]);
    f.server.process_message(&command, &mut f.network, 11);
    let object = f.server.working_set_for(f.client).expect("attached").pool().object(600).expect("meter");
    assert_eq!((object.width, object.height), (80, 80));
    assert_eq!(*repaints.borrow(), 1);
}

//==================================================================================Hide/Show and Enable/Disable

#[test]
/// Hide/Show only applies to containers.
fn test_hide_show_requires_container() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(10, ObjectKind::Container { hidden: false }));
    inject_object(&mut f, VtObject::new(11, ObjectKind::NumberVariable { value: 0 }));

    // Hide the container (byte 3 = 0).
    let command = message(f.client, &[0xA0, 10, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 10);
    assert_eq!(last_sent(&f).data[4], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    assert_eq!(pool.object(10).map(|o| &o.kind), Some(&ObjectKind::Container { hidden: true }));

    // A number variable cannot be hidden.
    let command = message(f.client, &[0xA0, 11, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 11);
    assert_eq!(last_sent(&f).data[4], 1 << HideShowObjectErrorBit::InvalidObjectId as u8);
}

#[test]
/// Enable/Disable validates the command byte and the object type.
fn test_enable_disable_object() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(20, ObjectKind::Button { key_code: 1, enabled: true }));

    // Disable the button.
    let command = message(f.client, &[0xA1, 20, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 10);
    assert_eq!(last_sent(&f).data[4], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    assert_eq!(
        pool.object(20).map(|o| &o.kind),
        Some(&ObjectKind::Button { key_code: 1, enabled: false })
    );

    // Command values above 1 are rejected.
    let command = message(f.client, &[0xA1, 20, 0, 2, 0xFF, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 11);
    assert_eq!(
        last_sent(&f).data[4],
        1 << EnableDisableObjectErrorBit::InvalidEnableDisableCommandValue as u8
    );
}

//==================================================================================Child geometry

#[test]
/// Child location deltas are biased by 127 and apply to all instances.
fn test_change_child_location() {
    let mut f = fixture();
    attach(&mut f);
    let mut container = VtObject::new(30, ObjectKind::Container { hidden: false });
    container.add_child(31, 10, 10);
    container.add_child(31, 20, 20);
    inject_object(&mut f, container);
    inject_object(&mut f, VtObject::new(31, ObjectKind::NumberVariable { value: 0 }));

    // Raw 130/120 decode to +3/-7.
    let command = message(f.client, &[0xA5, 30, 0, 31, 0, 130, 120, 0xFF]);
    f.server.process_message(&command, &mut f.network, 10);

    assert_eq!(last_sent(&f).data[5], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    let parent = pool.object(30).expect("container");
    assert_eq!((parent.children[0].x, parent.children[0].y), (13, 3));
    assert_eq!((parent.children[1].x, parent.children[1].y), (23, 13));
}

#[test]
/// Child position requires a TP-length command and an eligible parent type.
fn test_change_child_position() {
    let mut f = fixture();
    attach(&mut f);
    let mut mask = VtObject::new(40, ObjectKind::DataMask { soft_key_mask: NULL_OBJECT_ID });
    mask.add_child(41, 0, 0);
    inject_object(&mut f, mask);
    inject_object(&mut f, VtObject::new(41, ObjectKind::NumberVariable { value: 0 }));

    // Nine-byte command carried over TP.
    let command = message(f.client, &[0xB4, 40, 0, 41, 0, 0x2C, 0x01, 0x90, 0x01]);
    f.server.process_message(&command, &mut f.network, 10);

    assert_eq!(last_sent(&f).data[5], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    let parent = pool.object(40).expect("data mask");
    assert_eq!((parent.children[0].x, parent.children[0].y), (300, 400));

    // An eight-byte rendition is malformed.
    let command = message(f.client, &[0xB4, 40, 0, 41, 0, 0x2C, 0x01, 0x90]);
    f.server.process_message(&command, &mut f.network, 11);
    assert_eq!(
        last_sent(&f).data[5],
        1 << ChangeChildLocationOrPositionErrorBit::AnyOtherError as u8
    );
}

//==================================================================================Masks

#[test]
/// Change Active Mask validates both object IDs.
fn test_change_active_mask() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(1, ObjectKind::WorkingSet { active_mask: 100, selectable: true }));
    inject_object(&mut f, VtObject::new(100, ObjectKind::DataMask { soft_key_mask: NULL_OBJECT_ID }));
    inject_object(&mut f, VtObject::new(101, ObjectKind::DataMask { soft_key_mask: NULL_OBJECT_ID }));

    let command = message(f.client, &[0xA6, 1, 0, 101, 0, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 10);
    assert_eq!(last_sent(&f).data[3], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    assert_eq!(
        pool.object(1).map(|o| &o.kind),
        Some(&ObjectKind::WorkingSet { active_mask: 101, selectable: true })
    );

    // A mask ID that resolves to nothing is refused.
    let command = message(f.client, &[0xA6, 1, 0, 0xC8, 0, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 11);
    assert_eq!(last_sent(&f).data[3], 1 << ChangeActiveMaskErrorBit::InvalidMaskObjectId as u8);
}

#[test]
/// Change Soft Key Mask applies to data and alarm masks only.
fn test_change_soft_key_mask() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(50, ObjectKind::DataMask { soft_key_mask: NULL_OBJECT_ID }));
    inject_object(&mut f, VtObject::new(51, ObjectKind::SoftKeyMask));

    let command = message(f.client, &[0xA7, 50, 0, 51, 0, 0xFF, 0xFF, 0xFF]);
    f.server.process_message(&command, &mut f.network, 10);
    assert_eq!(last_sent(&f).data[5], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    assert_eq!(pool.object(50).map(|o| &o.kind), Some(&ObjectKind::DataMask { soft_key_mask: 51 }));
}

//==================================================================================Strings

#[test]
/// Change String Value verifies the length field against the payload.
fn test_change_string_value() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(70, ObjectKind::StringVariable { value: String::new() }));

    let mut command = alloc::vec![0xB3, 70, 0, 5, 0];
    command.extend_from_slice(b"hello");
    let command = message(f.client, &command);
    f.server.process_message(&command, &mut f.network, 10);

    assert_eq!(last_sent(&f).data[5], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    match pool.object(70).map(|o| &o.kind) {
        Some(ObjectKind::StringVariable { value }) => assert_eq!(value, "hello"),
        other => panic!("unexpected kind: {other:?}"),
    }

    // Length field larger than the actual payload.
    let short = message(f.client, &[0xB3, 70, 0, 9, 0, b'x', b'y', b'z']);
    f.server.process_message(&short, &mut f.network, 11);
    assert_eq!(last_sent(&f).data[5], 1 << ChangeStringValueErrorBit::AnyOtherError as u8);
}

//==================================================================================Attributes

#[test]
/// Change Attribute delegates to the object's setter and maps its errors.
fn test_change_attribute() {
    let mut f = fixture();
    attach(&mut f);
    inject_object(&mut f, VtObject::new(80, ObjectKind::NumberVariable { value: 0 }));

    let command = message(f.client, &[0xAF, 80, 0, 1, 0x2A, 0, 0, 0]);
    f.server.process_message(&command, &mut f.network, 10);
    let reply = last_sent(&f);
    assert_eq!(reply.data[3], 1, "attribute ID echoes back");
    assert_eq!(reply.data[4], 0);
    let pool = f.server.working_set_for(f.client).expect("attached").pool();
    assert_eq!(pool.object(80).map(|o| &o.kind), Some(&ObjectKind::NumberVariable { value: 42 }));

    // Attribute 0 is the read-only type attribute.
    let command = message(f.client, &[0xAF, 80, 0, 0, 0x2A, 0, 0, 0]);
    f.server.process_message(&command, &mut f.network, 11);
    assert_eq!(last_sent(&f).data[4], 1 << AttributeError::InvalidAttributeId as u8);
}

//==================================================================================Versions

#[test]
/// Store Version without pools is a protocol violation; with pools every
/// stored buffer reaches the backend.
fn test_store_version() {
    let mut f = fixture();
    attach(&mut f);

    let label = *b"VER0001";
    let mut command = alloc::vec![0xD0];
    command.extend_from_slice(&label);
    let store = message(f.client, &command);

    // Nothing uploaded yet: NACK.
    f.server.process_message(&store, &mut f.network, 10);
    assert_eq!(last_sent(&f).id.pgn(), PGN_ACKNOWLEDGE);

    // Upload a pool chunk, then store.
    let transfer = message(f.client, &[0x11, 1, 2, 3, 4, 5, 6, 7]);
    f.server.process_message(&transfer, &mut f.network, 11);
    f.server.process_message(&store, &mut f.network, 12);

    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0xD0);
    assert_eq!(reply.data[5], 0, "all pools saved");
    assert_eq!(f.server.backend().store.len(), 1);
    assert_eq!(f.server.backend().store[0].0, label);
    assert_eq!(f.server.backend().store[0].1, alloc::vec![1, 2, 3, 4, 5, 6, 7]);
}

#[test]
/// Load Version recalls a stored pool and queues it for parsing.
fn test_load_version() {
    let mut backend = MockBackend::default();
    backend.store.push((*b"VER0001", alloc::vec![9, 9, 9]));
    let mut f = fixture_with_backend(backend);
    attach(&mut f);

    let mut command = alloc::vec![0xD1];
    command.extend_from_slice(b"VER0001");
    f.server.process_message(&message(f.client, &command), &mut f.network, 10);

    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0xD1);
    assert_eq!(reply.data[5], 0, "label found");
    let working_set = f.server.working_set_for(f.client).expect("attached");
    assert_eq!(working_set.parse_state(), PoolParseState::Running);

    // An unknown label reports "version label incorrect".
    let mut command = alloc::vec![0xD1];
    command.extend_from_slice(b"NOLABEL");
    f.server.process_message(&message(f.client, &command), &mut f.network, 11);
    assert_eq!(last_sent(&f).data[5], 0x01);
}

#[test]
/// Get Versions lists the stored labels padded to a full frame.
fn test_get_versions() {
    let mut backend = MockBackend::default();
    backend.store.push((*b"VER0001", alloc::vec![1]));
    let mut f = fixture_with_backend(backend);
    attach(&mut f);

    f.server.process_message(
        &message(f.client, &[0xDF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
        &mut f.network,
        10,
    );

    // 2 header bytes + 7 label bytes go out over TP.
    assert_eq!(f.network.transport().active_session_count(), 1);
}

//==================================================================================Pool parsing

#[test]
/// End of object pool parses on one update, reports on the next, and the
/// first successful client becomes the active master.
fn test_end_of_object_pool_and_master_promotion() {
    let mut pool = ObjectPool::new();
    pool.insert(VtObject::new(1, ObjectKind::WorkingSet { active_mask: 1000, selectable: true }));
    let backend = MockBackend { parse_template: Some(pool), ..MockBackend::default() };
    let mut f = fixture_with_backend(backend);
    attach(&mut f);

    f.server.process_message(&message(f.client, &[0x11, 1, 2, 3, 4, 5, 6, 7]), &mut f.network, 10);
    f.server.process_message(&message(f.client, &[0x12, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]), &mut f.network, 11);

    assert_eq!(
        f.server.working_set_for(f.client).expect("attached").parse_state(),
        PoolParseState::Running
    );

    // First update runs the one-shot parse job.
    f.server.update(&mut f.network, 20);
    assert_eq!(
        f.server.working_set_for(f.client).expect("attached").parse_state(),
        PoolParseState::Success
    );

    // Second update observes the terminal state: response plus promotion.
    f.server.update(&mut f.network, 30);
    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0x12);
    assert_eq!(reply.data[1], 0, "0 = no error in the pool");
    assert_eq!(f.server.active_working_set_master_address(), 0x80);
    assert_eq!(f.server.active_data_mask_object_id(), 1000);
    assert_eq!(
        f.server.working_set_for(f.client).expect("attached").parse_state(),
        PoolParseState::Idle
    );
}

#[test]
/// A failed parse reports the faulting object ID.
fn test_end_of_object_pool_failure() {
    let backend = MockBackend { parse_failure: Some(0x0203), ..MockBackend::default() };
    let mut f = fixture_with_backend(backend);
    attach(&mut f);

    f.server.process_message(&message(f.client, &[0x11, 1, 2, 3, 4, 5, 6, 7]), &mut f.network, 10);
    f.server.process_message(&message(f.client, &[0x12, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]), &mut f.network, 11);
    f.server.update(&mut f.network, 20);
    f.server.update(&mut f.network, 30);

    let reply = last_sent(&f);
    assert_eq!(reply.data[0], 0x12);
    assert_eq!(reply.data[1], 1, "1 = error in the pool");
    assert_eq!(u16::from_le_bytes([reply.data[4], reply.data[5]]), 0x0203);
    assert_eq!(f.server.active_working_set_master_address(), NULL_CAN_ADDRESS);
}

//==================================================================================Status heartbeat

#[test]
/// The status message broadcasts every second with the active master state.
fn test_status_heartbeat() {
    let mut f = fixture();
    attach(&mut f);

    f.server.update(&mut f.network, 0);
    assert!(f.network.driver().sent.is_empty(), "first interval not elapsed");

    f.server.update(&mut f.network, 1000);
    let status = last_sent(&f);
    assert_eq!(status.data[0], 0xFE);
    assert_eq!(status.data[1], NULL_CAN_ADDRESS, "no master yet");
    assert_eq!(u16::from_le_bytes([status.data[2], status.data[3]]), NULL_OBJECT_ID);
    assert!(status.id.is_destination_global());

    // No second status inside the same interval.
    let sent = f.network.driver().sent.len();
    f.server.update(&mut f.network, 1500);
    assert_eq!(f.network.driver().sent.len(), sent);

    f.server.update(&mut f.network, 2000);
    assert_eq!(f.network.driver().sent.len(), sent + 1);
}
