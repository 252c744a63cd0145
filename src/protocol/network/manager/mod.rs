//! Network manager: the single owner of the CAN driver, the participant
//! table, and the transport protocol engine. Decodes incoming frames, routes
//! them to the protocol handlers and registered PGN callbacks, and exposes
//! the frame/message send paths to the layers above.
//!
//! There is exactly one manager per bus and it is an explicit value, threaded
//! through the constructors of whatever sits on top of it. `update()` is the
//! single cooperative scheduling point: all transport state transitions and
//! all message delivery happen inside that call, so the caller's driving task
//! serializes every mutation of the protocol state.
use alloc::boxed::Box;
use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::protocol::network::control_function::{CfHandle, ControlFunctionTable};
use crate::protocol::network::message::CanMessage;
use crate::protocol::network::{
    NetworkConfiguration, PGN_TP_CONNECTION_MANAGEMENT, PGN_TP_DATA_TRANSFER,
};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{BROADCAST_CAN_ADDRESS, CanId, NULL_CAN_ADDRESS};
use crate::protocol::transport::data::TransportData;
use crate::protocol::transport::protocol_manager::{
    TransmitCompleteCallback, TransportProtocolManager,
};
use crate::protocol::transport::traits::can_driver::CanDriver;

/// NAME placeholder for participants observed before their address claim.
const UNKNOWN_NAME: u64 = u64::MAX;

/// Subscriber invoked with every completed message matching its PGN.
pub type PgnCallback = Box<dyn FnMut(&CanMessage)>;

struct PgnCallbackEntry {
    pgn: u32,
    callback: PgnCallback,
}

/// Where a decoded frame was addressed.
enum FrameDestination {
    /// Broadcast: PDU2 or PDU1 to 0xFF.
    Global,
    /// Addressed to a participant we know about.
    Specific(CfHandle),
    /// Addressed to an address nobody we track holds; not ours to process.
    Unknown,
}

//==================================================================================Manager

/// PGN dispatcher and update pump for one CAN bus.
///
/// `RX_CAP` sizes the optional frame injection channel; firmware that drains
/// its CAN peripheral from an interrupt or a separate task hands the manager
/// a pre-allocated [`embassy_sync::channel::Channel`] and pushes frames into
/// it with `try_send`. The channel is drained only from inside [`update`],
/// which keeps every protocol mutation on the driving task.
///
/// [`update`]: NetworkManager::update
pub struct NetworkManager<'a, D: CanDriver, const RX_CAP: usize = 16> {
    driver: D,
    control_functions: ControlFunctionTable,
    transport: TransportProtocolManager,
    configuration: NetworkConfiguration,
    rx_channel: Option<&'a Channel<CriticalSectionRawMutex, CanFrame, RX_CAP>>,
    pgn_callbacks: Vec<PgnCallbackEntry>,
    any_control_function_callbacks: Vec<PgnCallbackEntry>,
}

impl<'a, D: CanDriver, const RX_CAP: usize> NetworkManager<'a, D, RX_CAP> {
    /// Take ownership of a driver and start the interface.
    pub fn new(mut driver: D, configuration: NetworkConfiguration) -> Self {
        driver.start();
        Self {
            driver,
            control_functions: ControlFunctionTable::new(),
            transport: TransportProtocolManager::new(),
            configuration,
            rx_channel: None,
            pgn_callbacks: Vec::new(),
            any_control_function_callbacks: Vec::new(),
        }
    }

    /// Attach a frame injection channel filled by an I/O task or ISR.
    pub fn with_rx_channel(
        mut self,
        channel: &'a Channel<CriticalSectionRawMutex, CanFrame, RX_CAP>,
    ) -> Self {
        self.rx_channel = Some(channel);
        self
    }

    /// Participant registry.
    pub fn control_functions(&self) -> &ControlFunctionTable {
        &self.control_functions
    }

    /// Mutable participant registry, e.g. to register the local nodes.
    pub fn control_functions_mut(&mut self) -> &mut ControlFunctionTable {
        &mut self.control_functions
    }

    /// Transport protocol engine (read access, e.g. for diagnostics).
    pub fn transport(&self) -> &TransportProtocolManager {
        &self.transport
    }

    /// Underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Underlying driver, mutable.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Active configuration.
    pub fn configuration(&self) -> &NetworkConfiguration {
        &self.configuration
    }

    /// Stop the underlying driver.
    pub fn shutdown(&mut self) {
        self.driver.stop();
    }

    //==================================================================================Subscriptions

    /// Subscribe to a PGN for messages addressed to a local internal control
    /// function. Broadcast traffic does not reach these subscribers.
    pub fn add_pgn_callback(&mut self, pgn: u32, callback: PgnCallback) {
        self.pgn_callbacks.push(PgnCallbackEntry { pgn, callback });
    }

    /// Subscribe to a PGN regardless of who the message was addressed to.
    /// A message matching both registries is delivered to both.
    pub fn add_any_control_function_pgn_callback(&mut self, pgn: u32, callback: PgnCallback) {
        self.any_control_function_callbacks.push(PgnCallbackEntry { pgn, callback });
    }

    //==================================================================================Send paths

    /// Encode and emit a single frame (payload ≤ 8 bytes).
    /// Destination `None` broadcasts; PDU2 PGNs are inherently global.
    pub fn send_frame(
        &mut self,
        pgn: u32,
        data: &[u8],
        source: CfHandle,
        destination: Option<CfHandle>,
        priority: u8,
    ) -> bool {
        if data.len() > 8 {
            return false;
        }
        let Some(source_address) = self.control_functions.address(source) else {
            return false;
        };

        let pdu_format = ((pgn >> 8) & 0xFF) as u8;
        let mut builder = CanId::builder(pgn, source_address).with_priority(priority);
        if pdu_format < 240 {
            let destination_address = match destination {
                Some(handle) => match self.control_functions.address(handle) {
                    Some(address) => address,
                    None => return false,
                },
                None => BROADCAST_CAN_ADDRESS,
            };
            builder = builder.to_destination(destination_address);
        }

        match builder.build() {
            Ok(id) => self.driver.send(&CanFrame::new(id, data)),
            Err(_) => false,
        }
    }

    /// Send a message of any supported length: one frame when the payload
    /// fits, a transport protocol session otherwise.
    pub fn send_message(
        &mut self,
        pgn: u32,
        data: TransportData,
        source: CfHandle,
        destination: Option<CfHandle>,
        priority: u8,
        on_complete: Option<TransmitCompleteCallback>,
        now_ms: u64,
    ) -> bool {
        if data.len() <= 8 {
            let mut buffer = [0u8; 8];
            let length = data.len();
            let mut data = data;
            data.read_at(0, &mut buffer[..length]);
            return self.send_frame(pgn, &buffer[..length], source, destination, priority);
        }
        self.transport.transmit(
            pgn,
            data,
            source,
            destination,
            &self.control_functions,
            on_complete,
            now_ms,
        )
    }

    //==================================================================================Update pump

    /// Drain received frames, run the transport session clock, and deliver
    /// completed messages to the registered subscribers.
    ///
    /// Returns the completed messages so a protocol server layered on top of
    /// the manager (e.g. the VT server) can consume them as well. Call on a
    /// ≥ 10 ms cadence with monotonic milliseconds.
    pub fn update(&mut self, now_ms: u64) -> Vec<CanMessage> {
        let mut completed = Vec::new();

        if let Some(channel) = self.rx_channel {
            while let Ok(frame) = channel.try_receive() {
                self.process_frame(&frame, now_ms, &mut completed);
            }
        }
        while let Some(frame) = self.driver.receive() {
            self.process_frame(&frame, now_ms, &mut completed);
        }

        self.transport.update(
            &mut self.driver,
            &self.control_functions,
            &self.configuration,
            now_ms,
        );

        for message in &completed {
            Self::dispatch(
                &self.control_functions,
                &mut self.pgn_callbacks,
                &mut self.any_control_function_callbacks,
                message,
            );
        }
        completed
    }

    fn process_frame(&mut self, frame: &CanFrame, now_ms: u64, completed: &mut Vec<CanMessage>) {
        let source_address = frame.id.source_address();
        if source_address >= NULL_CAN_ADDRESS {
            // Frames from the null or global address belong to the address
            // claim machinery, which sits outside this manager.
            return;
        }

        // First sighting of an address registers an external participant;
        // its NAME stays unknown until an address claim is observed.
        let source = match self.control_functions.find_by_address(source_address) {
            Some(handle) => handle,
            None => self.control_functions.register_external(UNKNOWN_NAME, source_address),
        };

        let destination = match frame.id.destination() {
            None => FrameDestination::Global,
            Some(BROADCAST_CAN_ADDRESS) => FrameDestination::Global,
            Some(address) => match self.control_functions.find_by_address(address) {
                Some(handle) => FrameDestination::Specific(handle),
                None => FrameDestination::Unknown,
            },
        };
        let destination = match destination {
            FrameDestination::Global => None,
            FrameDestination::Specific(handle) => Some(handle),
            FrameDestination::Unknown => return,
        };

        match frame.id.pgn() {
            PGN_TP_CONNECTION_MANAGEMENT => {
                self.transport.process_connection_management(
                    frame,
                    source,
                    destination,
                    &mut self.driver,
                    &self.control_functions,
                    &self.configuration,
                    now_ms,
                );
            }
            PGN_TP_DATA_TRANSFER => {
                if let Some(message) = self.transport.process_data_transfer(
                    frame,
                    source,
                    destination,
                    &mut self.driver,
                    &self.control_functions,
                    now_ms,
                ) {
                    completed.push(message);
                }
            }
            pgn => {
                completed.push(CanMessage {
                    pgn,
                    data: frame.data[..frame.len].to_vec(),
                    source,
                    destination,
                    priority: frame.id.priority(),
                });
            }
        }
    }

    fn dispatch(
        control_functions: &ControlFunctionTable,
        pgn_callbacks: &mut [PgnCallbackEntry],
        any_control_function_callbacks: &mut [PgnCallbackEntry],
        message: &CanMessage,
    ) {
        let addressed_to_internal = message
            .destination
            .map(|handle| control_functions.is_internal(handle))
            .unwrap_or(false);

        if addressed_to_internal {
            for entry in pgn_callbacks.iter_mut() {
                if entry.pgn == message.pgn {
                    (entry.callback)(message);
                }
            }
        }
        for entry in any_control_function_callbacks.iter_mut() {
            if entry.pgn == message.pgn {
                (entry.callback)(message);
            }
        }
    }
}
