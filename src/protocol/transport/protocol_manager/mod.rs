//! ISO 11783-3 / J1939 transport protocol engine: moves messages of 9 to
//! 1785 bytes as sequences of 8-byte frames. Both the broadcast flavour
//! (BAM, unacknowledged, paced) and the destination-specific flavour
//! (RTS/CTS handshake with flow control and end-of-message acknowledge)
//! are handled by one session table.
//!
//! The manager owns no clock and no bus: every entry point receives the
//! current time in milliseconds and a [`CanDriver`] to emit frames on, so
//! the whole state machine is deterministic and driveable from tests.
use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::protocol::network::control_function::{CfHandle, ControlFunctionTable};
use crate::protocol::network::message::CanMessage;
use crate::protocol::network::{
    NetworkConfiguration, PGN_TP_CONNECTION_MANAGEMENT, PGN_TP_DATA_TRANSFER,
};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{CanId, BROADCAST_CAN_ADDRESS};
use crate::protocol::transport::data::TransportData;
use crate::protocol::transport::traits::can_driver::CanDriver;
use crate::protocol::transport::{
    MAX_PROTOCOL_DATA_LENGTH, PROTOCOL_BYTES_PER_FRAME, T1_TIMEOUT_MS, T2_T3_TIMEOUT_MS,
    T4_TIMEOUT_MS, TR_TIMEOUT_MS,
};

//==================================================================================Constants

/// TP.CM_RTS multiplexor.
pub const REQUEST_TO_SEND_MULTIPLEXOR: u8 = 0x10;
/// TP.CM_CTS multiplexor.
pub const CLEAR_TO_SEND_MULTIPLEXOR: u8 = 0x11;
/// TP.CM_EOM_ACK multiplexor.
pub const END_OF_MESSAGE_ACKNOWLEDGE_MULTIPLEXOR: u8 = 0x13;
/// TP.BAM multiplexor.
pub const BROADCAST_ANNOUNCE_MESSAGE_MULTIPLEXOR: u8 = 0x20;
/// TP.Conn_Abort multiplexor.
pub const CONNECTION_ABORT_MULTIPLEXOR: u8 = 0xFF;

/// Every transport protocol frame is sent at the lowest priority.
const TRANSPORT_PRIORITY: u8 = 7;

//==================================================================================Enums and Structs

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Abort reasons defined by ISO 11783-3.
pub enum ConnectionAbortReason {
    /// Node is already in a connection-mode session with this peer.
    AlreadyInCmSession = 1,
    /// Session dropped because the node needs its resources elsewhere.
    SystemResourcesNeeded = 2,
    /// A protocol timeout expired.
    Timeout = 3,
    /// A CTS arrived while a transfer was already running.
    CtsWhileTransferInProgress = 4,
    /// The retransmit limit was reached.
    MaxRetransmitReached = 5,
    /// A data transfer frame arrived outside a data session.
    UnexpectedDataTransfer = 6,
    /// A sequence number that cannot be recovered from.
    BadSequenceNumber = 7,
    /// A sequence number that was already processed.
    DuplicateSequenceNumber = 8,
    /// Announced size exceeds the 1785-byte protocol limit.
    TotalMessageTooBig = 9,
    /// Any error not enumerated above.
    AnyOtherError = 250,
}

impl ConnectionAbortReason {
    /// Decode a received reason byte. Unknown codes collapse to
    /// `AnyOtherError`; the standard requires tolerating them.
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => Self::AlreadyInCmSession,
            2 => Self::SystemResourcesNeeded,
            3 => Self::Timeout,
            4 => Self::CtsWhileTransferInProgress,
            5 => Self::MaxRetransmitReached,
            6 => Self::UnexpectedDataTransfer,
            7 => Self::BadSequenceNumber,
            8 => Self::DuplicateSequenceNumber,
            9 => Self::TotalMessageTooBig,
            _ => Self::AnyOtherError,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// States of the per-session machine.
pub enum SessionState {
    /// We owe the peer a Clear To Send frame.
    ClearToSend,
    /// An rx data session is in progress.
    RxDataSession,
    /// We owe the peer a Request To Send frame.
    RequestToSend,
    /// Waiting for the peer to grant a window.
    WaitForClearToSend,
    /// We owe the bus a Broadcast Announce frame.
    BroadcastAnnounce,
    /// A tx data session is in progress.
    TxDataSession,
    /// All data sent, waiting for the final acknowledge.
    WaitForEndOfMessageAcknowledge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Session direction, seen from this node.
pub enum Direction {
    /// We are transmitting a message.
    Transmit,
    /// We are receiving a message.
    Receive,
}

/// Callback invoked once a tx session closes: `(pgn, length, successful)`.
pub type TransmitCompleteCallback = Box<dyn FnMut(u32, usize, bool)>;

/// Internal record tracking one active transfer.
struct TransportSession {
    direction: Direction,
    state: SessionState,
    pgn: u32,
    source: CfHandle,
    /// `None` marks a broadcast session.
    destination: Option<CfHandle>,
    data: TransportData,
    /// Timestamp of the last state change or accepted frame.
    timestamp_ms: u64,
    /// Last processed 1-based sequence number. Always ≤ `packet_count`.
    last_packet_number: u8,
    /// Total number of packets in the message: ⌈len / 7⌉.
    packet_count: u8,
    /// Cumulative processed packet count.
    processed_packets: u8,
    /// Largest per-CTS window the peer can accept (from the RTS, rx only).
    cts_packet_max: u8,
    /// Packets still outstanding in the current window.
    window_remaining: u8,
    /// A CTS with zero packets parked the sender; T4 applies.
    wait_hinted: bool,
    on_complete: Option<TransmitCompleteCallback>,
}

impl TransportSession {
    fn new(
        direction: Direction,
        pgn: u32,
        source: CfHandle,
        destination: Option<CfHandle>,
        data: TransportData,
    ) -> Self {
        Self {
            direction,
            state: SessionState::RxDataSession,
            pgn,
            source,
            destination,
            data,
            timestamp_ms: 0,
            last_packet_number: 0,
            packet_count: 0,
            processed_packets: 0,
            cts_packet_max: 0,
            window_remaining: 0,
            wait_hinted: false,
            on_complete: None,
        }
    }

    fn set_state(&mut self, state: SessionState, now_ms: u64) {
        self.state = state;
        self.timestamp_ms = now_ms;
    }

    fn is_broadcast(&self) -> bool {
        self.destination.is_none()
    }

    fn message_len(&self) -> usize {
        self.data.len()
    }
}

/// What the update pass decided to do with a session.
enum SessionVerdict {
    Keep,
    Close { successful: bool },
    Abort(ConnectionAbortReason),
}

//==================================================================================Manager

/// Session table and state machine driver for the transport protocol.
#[derive(Default)]
pub struct TransportProtocolManager {
    active_sessions: Vec<TransportSession>,
}

impl TransportProtocolManager {
    /// Create a manager with no active sessions.
    pub fn new() -> Self {
        Self { active_sessions: Vec::new() }
    }

    /// Number of sessions currently tracked.
    pub fn active_session_count(&self) -> usize {
        self.active_sessions.len()
    }

    /// Whether a session already occupies the (source, destination) slot.
    pub fn has_session(&self, source: CfHandle, destination: Option<CfHandle>) -> bool {
        self.session_index(source, destination).is_some()
    }

    fn session_index(&self, source: CfHandle, destination: Option<CfHandle>) -> Option<usize> {
        self.active_sessions
            .iter()
            .position(|session| session.source == source && session.destination == destination)
    }

    //==================================================================================Transmit

    /// Accept a message for multi-packet transmission.
    ///
    /// Returns `false` when the payload does not need or cannot use the
    /// protocol (≤ 8 or > 1785 bytes), when `source` is not a valid local
    /// control function, or when the (source, destination) slot is busy.
    /// `destination = None` starts a broadcast (BAM) session.
    pub fn transmit(
        &mut self,
        pgn: u32,
        data: TransportData,
        source: CfHandle,
        destination: Option<CfHandle>,
        control_functions: &ControlFunctionTable,
        on_complete: Option<TransmitCompleteCallback>,
        now_ms: u64,
    ) -> bool {
        let length = data.len();
        if length <= 8 || length > MAX_PROTOCOL_DATA_LENGTH {
            return false;
        }
        if !control_functions.is_internal(source) || !control_functions.is_address_valid(source) {
            return false;
        }
        if self.has_session(source, destination) {
            return false;
        }

        let mut session = TransportSession::new(Direction::Transmit, pgn, source, destination, data);
        session.packet_count = length.div_ceil(PROTOCOL_BYTES_PER_FRAME) as u8;
        session.on_complete = on_complete;

        if destination.is_some() {
            session.set_state(SessionState::RequestToSend, now_ms);
        } else {
            // Broadcast: no flow control, the whole message is one window.
            session.window_remaining = session.packet_count;
            session.set_state(SessionState::BroadcastAnnounce, now_ms);
        }
        self.active_sessions.push(session);
        true
    }

    //==================================================================================Update

    /// Drive timeouts, pending control frames, and tx data windows.
    /// Called from the network manager's update pump.
    pub fn update<D: CanDriver>(
        &mut self,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        config: &NetworkConfiguration,
        now_ms: u64,
    ) {
        let mut index = 0;
        while index < self.active_sessions.len() {
            match self.update_session(index, bus, control_functions, config, now_ms) {
                SessionVerdict::Keep => index += 1,
                SessionVerdict::Close { successful } => {
                    self.close_session(index, successful);
                }
                SessionVerdict::Abort(reason) => {
                    self.abort_session(index, reason, bus, control_functions);
                }
            }
        }
    }

    fn update_session<D: CanDriver>(
        &mut self,
        index: usize,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        config: &NetworkConfiguration,
        now_ms: u64,
    ) -> SessionVerdict {
        let session = &mut self.active_sessions[index];

        // A session whose endpoints lost their address cannot continue.
        let endpoints_valid = control_functions.is_address_valid(session.source)
            && session
                .destination
                .map(|destination| control_functions.is_address_valid(destination))
                .unwrap_or(true);
        if !endpoints_valid {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Closing session for {=u32:x}, endpoint lost", session.pgn);
            return if session.is_broadcast() {
                SessionVerdict::Close { successful: false }
            } else {
                SessionVerdict::Abort(ConnectionAbortReason::AnyOtherError)
            };
        }

        match session.state {
            SessionState::RequestToSend => {
                if Self::send_request_to_send(session, bus, control_functions) {
                    session.set_state(SessionState::WaitForClearToSend, now_ms);
                }
                SessionVerdict::Keep
            }

            SessionState::BroadcastAnnounce => {
                if Self::send_broadcast_announce(session, bus, control_functions) {
                    session.set_state(SessionState::TxDataSession, now_ms);
                }
                SessionVerdict::Keep
            }

            SessionState::ClearToSend => {
                if Self::send_clear_to_send(session, bus, control_functions, config) {
                    session.set_state(SessionState::RxDataSession, now_ms);
                }
                SessionVerdict::Keep
            }

            SessionState::WaitForClearToSend | SessionState::WaitForEndOfMessageAcknowledge => {
                let timeout = if session.wait_hinted
                    && session.state == SessionState::WaitForClearToSend
                {
                    T4_TIMEOUT_MS
                } else {
                    T2_T3_TIMEOUT_MS
                };
                if time_expired(session.timestamp_ms, timeout, now_ms) {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: Timeout on tx session for {=u32:x}", session.pgn);
                    SessionVerdict::Abort(ConnectionAbortReason::Timeout)
                } else {
                    SessionVerdict::Keep
                }
            }

            SessionState::TxDataSession => {
                if session.is_broadcast()
                    && !time_expired(session.timestamp_ms, config.minimum_bam_frame_gap_ms, now_ms)
                {
                    // The standard-mandated gap between broadcast frames.
                    SessionVerdict::Keep
                } else {
                    Self::send_data_transfer_packets(session, bus, control_functions, config, now_ms)
                }
            }

            SessionState::RxDataSession => {
                if session.is_broadcast() {
                    if time_expired(session.timestamp_ms, T1_TIMEOUT_MS, now_ms) {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("[TP]: Broadcast rx session timeout");
                        SessionVerdict::Close { successful: false }
                    } else {
                        SessionVerdict::Keep
                    }
                } else if time_expired(session.timestamp_ms, TR_TIMEOUT_MS, now_ms) {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: Destination specific rx session timeout");
                    SessionVerdict::Abort(ConnectionAbortReason::Timeout)
                } else {
                    SessionVerdict::Keep
                }
            }
        }
    }

    /// Emit as many data transfer frames as the current window, the per-update
    /// throttle, and the bus allow.
    fn send_data_transfer_packets<D: CanDriver>(
        session: &mut TransportSession,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        config: &NetworkConfiguration,
        now_ms: u64,
    ) -> SessionVerdict {
        let mut frames_sent: u8 = 0;

        while session.window_remaining > 0 {
            let mut buffer = [0xFF_u8; 8];
            buffer[0] = session.processed_packets + 1;
            let offset = PROTOCOL_BYTES_PER_FRAME * session.processed_packets as usize;
            session.data.read_at(offset, &mut buffer[1..]);

            if !Self::send_transport_frame(
                bus,
                control_functions,
                PGN_TP_DATA_TRANSFER,
                session.source,
                session.destination,
                &buffer,
            ) {
                // Bus is saturated; resume on the next update.
                return SessionVerdict::Keep;
            }

            frames_sent += 1;
            session.window_remaining -= 1;
            session.last_packet_number = session.processed_packets + 1;
            session.processed_packets += 1;
            session.timestamp_ms = now_ms;

            if session.is_broadcast() {
                // Only one frame per update; pacing applies between frames.
                break;
            }
            if frames_sent >= config.max_frames_per_update {
                break;
            }
        }

        if session.processed_packets == session.packet_count {
            if session.is_broadcast() {
                return SessionVerdict::Close { successful: true };
            }
            session.set_state(SessionState::WaitForEndOfMessageAcknowledge, now_ms);
        } else if session.window_remaining == 0 && !session.is_broadcast() {
            session.set_state(SessionState::WaitForClearToSend, now_ms);
        }
        SessionVerdict::Keep
    }

    //==================================================================================Rx - Connection Management

    /// Process a frame received on the TP.CM PGN. `destination` is `None`
    /// for global frames and must resolve to a local internal control
    /// function otherwise.
    pub fn process_connection_management<D: CanDriver>(
        &mut self,
        frame: &CanFrame,
        source: CfHandle,
        destination: Option<CfHandle>,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        config: &NetworkConfiguration,
        now_ms: u64,
    ) {
        if frame.len != 8 {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Connection management frame of invalid length {=usize}", frame.len);
            return;
        }
        if let Some(destination) = destination {
            if !control_functions.is_internal(destination) {
                // Addressed to another node; not ours to answer.
                return;
            }
        }

        let pgn = u32::from(frame.data[5])
            | (u32::from(frame.data[6]) << 8)
            | (u32::from(frame.data[7]) << 16);

        match frame.data[0] {
            BROADCAST_ANNOUNCE_MESSAGE_MULTIPLEXOR => {
                if destination.is_none() {
                    let total_length = u16::from_le_bytes([frame.data[1], frame.data[2]]);
                    let packet_count = frame.data[3];
                    self.process_broadcast_announce(source, pgn, total_length, packet_count, config, now_ms);
                } else {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: BAM with a specific destination, ignoring");
                }
            }

            REQUEST_TO_SEND_MULTIPLEXOR => match destination {
                Some(destination) => {
                    let total_length = u16::from_le_bytes([frame.data[1], frame.data[2]]);
                    let packet_count = frame.data[3];
                    let cts_packet_max = frame.data[4];
                    self.process_request_to_send(
                        source,
                        destination,
                        pgn,
                        total_length,
                        packet_count,
                        cts_packet_max,
                        bus,
                        control_functions,
                        config,
                        now_ms,
                    );
                }
                None => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: RTS with a global destination, ignoring");
                }
            },

            CLEAR_TO_SEND_MULTIPLEXOR => match destination {
                Some(destination) => {
                    let packets_to_send = frame.data[1];
                    let next_packet_number = frame.data[2];
                    self.process_clear_to_send(
                        source,
                        destination,
                        pgn,
                        packets_to_send,
                        next_packet_number,
                        bus,
                        control_functions,
                        now_ms,
                    );
                }
                None => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: CTS with a global destination, ignoring");
                }
            },

            END_OF_MESSAGE_ACKNOWLEDGE_MULTIPLEXOR => match destination {
                Some(destination) => {
                    self.process_end_of_message_acknowledge(source, destination, pgn, bus, control_functions);
                }
                None => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: EOM-ACK with a global destination, ignoring");
                }
            },

            CONNECTION_ABORT_MULTIPLEXOR => match destination {
                Some(destination) => {
                    let reason = ConnectionAbortReason::from_byte(frame.data[1]);
                    self.process_abort(source, destination, pgn, reason);
                }
                None => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("[TP]: Abort with a global destination, ignoring");
                }
            },

            _ => {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: Bad multiplexor {=u8:x} in connection management frame", frame.data[0]);
            }
        }
    }

    fn process_broadcast_announce(
        &mut self,
        source: CfHandle,
        pgn: u32,
        total_length: u16,
        packet_count: u8,
        config: &NetworkConfiguration,
        now_ms: u64,
    ) {
        // The standard forbids aborting a broadcast; over-limit announcements
        // are silently ignored.
        if self.active_sessions.len() >= config.max_transport_protocol_sessions {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Ignoring BAM for {=u32:x}, session limit reached", pgn);
            return;
        }
        if usize::from(total_length) > MAX_PROTOCOL_DATA_LENGTH || total_length < 9 {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Ignoring BAM for {=u32:x} with invalid length", pgn);
            return;
        }

        if let Some(index) = self.session_index(source, None) {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: BAM while a broadcast session existed, overwriting for {=u32:x}", pgn);
            self.close_session(index, false);
        }

        let mut session = TransportSession::new(
            Direction::Receive,
            pgn,
            source,
            None,
            TransportData::rx_buffer(usize::from(total_length)),
        );
        session.packet_count = packet_count;
        session.set_state(SessionState::RxDataSession, now_ms);
        self.active_sessions.push(session);
    }

    #[allow(clippy::too_many_arguments)]
    fn process_request_to_send<D: CanDriver>(
        &mut self,
        source: CfHandle,
        destination: CfHandle,
        pgn: u32,
        total_length: u16,
        packet_count: u8,
        cts_packet_max: u8,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        config: &NetworkConfiguration,
        now_ms: u64,
    ) {
        if self.active_sessions.len() >= config.max_transport_protocol_sessions {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Aborting RTS for {=u32:x}, session limit reached", pgn);
            Self::send_abort_frame(
                bus,
                control_functions,
                destination,
                source,
                pgn,
                ConnectionAbortReason::AlreadyInCmSession,
            );
            return;
        }
        if usize::from(total_length) > MAX_PROTOCOL_DATA_LENGTH {
            Self::send_abort_frame(
                bus,
                control_functions,
                destination,
                source,
                pgn,
                ConnectionAbortReason::TotalMessageTooBig,
            );
            return;
        }

        if let Some(index) = self.session_index(source, Some(destination)) {
            if self.active_sessions[index].pgn != pgn {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: RTS while a session existed for another PGN, aborting {=u32:x}", pgn);
                self.abort_session(index, ConnectionAbortReason::AlreadyInCmSession, bus, control_functions);
            } else {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: RTS while a session existed, overwriting for {=u32:x}", pgn);
                self.close_session(index, false);
            }
        }

        let mut session = TransportSession::new(
            Direction::Receive,
            pgn,
            source,
            Some(destination),
            TransportData::rx_buffer(usize::from(total_length)),
        );
        session.packet_count = packet_count;
        session.cts_packet_max = cts_packet_max;
        session.set_state(SessionState::ClearToSend, now_ms);
        self.active_sessions.push(session);
    }

    #[allow(clippy::too_many_arguments)]
    fn process_clear_to_send<D: CanDriver>(
        &mut self,
        source: CfHandle,
        destination: CfHandle,
        pgn: u32,
        packets_to_send: u8,
        next_packet_number: u8,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        now_ms: u64,
    ) {
        // The tx session the grant refers to is keyed by the reversed pair:
        // we are its source, the CTS sender its destination.
        let Some(index) = self.session_index(destination, Some(source)) else {
            // Aborting clears the peer up faster than letting it time out.
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: CTS for {=u32:x} without a session, sending abort", pgn);
            Self::send_abort_frame(
                bus,
                control_functions,
                destination,
                source,
                pgn,
                ConnectionAbortReason::AnyOtherError,
            );
            return;
        };

        let abort_reason = {
            let session = &self.active_sessions[index];
            if session.pgn != pgn {
                Some(ConnectionAbortReason::AnyOtherError)
            } else if session.state != SessionState::WaitForClearToSend {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: CTS for {=u32:x} while not expecting one, aborting", pgn);
                Some(ConnectionAbortReason::CtsWhileTransferInProgress)
            } else if packets_to_send != 0
                && next_packet_number != session.processed_packets.wrapping_add(1)
            {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: CTS for {=u32:x} with a bad sequence number, aborting", pgn);
                Some(ConnectionAbortReason::BadSequenceNumber)
            } else {
                None
            }
        };
        if let Some(reason) = abort_reason {
            self.abort_session(index, reason, bus, control_functions);
            return;
        }

        let session = &mut self.active_sessions[index];
        if packets_to_send == 0 {
            // Wait hint: hold position, T4 now bounds the wait.
            session.wait_hinted = true;
            session.timestamp_ms = now_ms;
        } else {
            let packets_remaining = session.packet_count - session.processed_packets;
            session.wait_hinted = false;
            session.window_remaining = packets_to_send.min(packets_remaining);
            session.set_state(SessionState::TxDataSession, now_ms);
        }
    }

    fn process_end_of_message_acknowledge<D: CanDriver>(
        &mut self,
        source: CfHandle,
        destination: CfHandle,
        pgn: u32,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
    ) {
        match self.session_index(destination, Some(source)) {
            Some(index)
                if self.active_sessions[index].state
                    == SessionState::WaitForEndOfMessageAcknowledge =>
            {
                self.close_session(index, true);
            }
            Some(_) => {
                // Session exists but is mid-transfer; the standard says ignore.
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: EOM-ACK for {=u32:x} while not expecting one, ignoring", pgn);
            }
            None => {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: EOM-ACK for {=u32:x} without a session, sending abort", pgn);
                Self::send_abort_frame(
                    bus,
                    control_functions,
                    destination,
                    source,
                    pgn,
                    ConnectionAbortReason::AnyOtherError,
                );
            }
        }
    }

    fn process_abort(
        &mut self,
        source: CfHandle,
        destination: CfHandle,
        pgn: u32,
        _reason: ConnectionAbortReason,
    ) {
        // A received abort closes the matching session without a reply,
        // whichever direction it was running in.
        let mut found_session = false;

        if let Some(index) = self.session_index(source, Some(destination)) {
            if self.active_sessions[index].pgn == pgn {
                found_session = true;
                self.close_session(index, false);
            }
        }
        if let Some(index) = self.session_index(destination, Some(source)) {
            if self.active_sessions[index].pgn == pgn {
                found_session = true;
                self.close_session(index, false);
            }
        }

        if !found_session {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Abort ({}) with no matching session for {=u32:x}", _reason, pgn);
        }
    }

    //==================================================================================Rx - Data Transfer

    /// Process a frame received on the TP.DT PGN. Returns the reassembled
    /// message when this frame completed a session.
    pub fn process_data_transfer<D: CanDriver>(
        &mut self,
        frame: &CanFrame,
        source: CfHandle,
        destination: Option<CfHandle>,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        now_ms: u64,
    ) -> Option<CanMessage> {
        if frame.len != 8 {
            #[cfg(feature = "defmt")]
            defmt::warn!("[TP]: Data transfer frame of invalid length {=usize}", frame.len);
            return None;
        }

        let Some(index) = self.session_index(source, destination) else {
            if destination.is_some() {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: Data transfer frame with no matching session, ignoring");
            }
            return None;
        };

        let sequence_number = frame.data[0];

        let abort_reason = {
            let session = &self.active_sessions[index];
            if session.state != SessionState::RxDataSession {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: Data transfer while not expecting one, aborting");
                Some(ConnectionAbortReason::UnexpectedDataTransfer)
            } else if sequence_number == session.last_packet_number {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: Duplicate sequence number {=u8}, aborting", sequence_number);
                Some(ConnectionAbortReason::DuplicateSequenceNumber)
            } else if sequence_number != session.last_packet_number.wrapping_add(1) {
                #[cfg(feature = "defmt")]
                defmt::warn!("[TP]: Bad sequence number {=u8}, aborting", sequence_number);
                Some(ConnectionAbortReason::BadSequenceNumber)
            } else {
                None
            }
        };
        if let Some(reason) = abort_reason {
            self.abort_session(index, reason, bus, control_functions);
            return None;
        }

        // Correct sequence number, store the payload bytes.
        let message_complete = {
            let session = &mut self.active_sessions[index];
            let total_length = session.message_len();
            let offset = PROTOCOL_BYTES_PER_FRAME * session.last_packet_number as usize;
            for byte_index in 0..PROTOCOL_BYTES_PER_FRAME {
                if offset + byte_index < total_length {
                    session.data.write_byte(offset + byte_index, frame.data[1 + byte_index]);
                }
            }
            session.last_packet_number = sequence_number;
            session.processed_packets = session.processed_packets.wrapping_add(1);
            session.timestamp_ms = now_ms;
            if session.window_remaining > 0 {
                session.window_remaining -= 1;
            }

            let complete =
                session.last_packet_number as usize * PROTOCOL_BYTES_PER_FRAME >= total_length;
            if complete {
                // Acknowledged only for specific destinations.
                if session.destination.is_some() {
                    Self::send_end_of_message_acknowledge(session, bus, control_functions);
                }
            } else if session.destination.is_some() && session.window_remaining == 0 {
                // Window consumed, owe the sender a fresh grant.
                session.set_state(SessionState::ClearToSend, now_ms);
            }
            complete
        };

        if message_complete {
            let session = self.active_sessions.swap_remove(index);
            return Some(CanMessage {
                pgn: session.pgn,
                data: session.data.into_vec(),
                source: session.source,
                destination: session.destination,
                priority: TRANSPORT_PRIORITY,
            });
        }
        None
    }

    //==================================================================================Session teardown

    fn close_session(&mut self, index: usize, successful: bool) {
        let mut session = self.active_sessions.swap_remove(index);
        if session.direction == Direction::Transmit {
            if let Some(mut on_complete) = session.on_complete.take() {
                on_complete(session.pgn, session.message_len(), successful);
            }
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("[TP]: Session closed for {=u32:x}", session.pgn);
    }

    fn abort_session<D: CanDriver>(
        &mut self,
        index: usize,
        reason: ConnectionAbortReason,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
    ) {
        let (own, partner, pgn) = {
            let session = &self.active_sessions[index];
            match session.direction {
                Direction::Transmit => (Some(session.source), session.destination, session.pgn),
                Direction::Receive => (session.destination, Some(session.source), session.pgn),
            }
        };
        // Broadcast sessions close silently, aborting them is forbidden.
        if let (Some(own), Some(partner)) = (own, partner) {
            Self::send_abort_frame(bus, control_functions, own, partner, pgn, reason);
        }
        self.close_session(index, false);
    }

    //==================================================================================Frame builders

    fn send_request_to_send<D: CanDriver>(
        session: &TransportSession,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
    ) -> bool {
        let length = session.message_len();
        let buffer = [
            REQUEST_TO_SEND_MULTIPLEXOR,
            (length & 0xFF) as u8,
            ((length >> 8) & 0xFF) as u8,
            session.packet_count,
            0xFF,
            (session.pgn & 0xFF) as u8,
            ((session.pgn >> 8) & 0xFF) as u8,
            ((session.pgn >> 16) & 0xFF) as u8,
        ];
        Self::send_transport_frame(
            bus,
            control_functions,
            PGN_TP_CONNECTION_MANAGEMENT,
            session.source,
            session.destination,
            &buffer,
        )
    }

    fn send_broadcast_announce<D: CanDriver>(
        session: &TransportSession,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
    ) -> bool {
        let length = session.message_len();
        let buffer = [
            BROADCAST_ANNOUNCE_MESSAGE_MULTIPLEXOR,
            (length & 0xFF) as u8,
            ((length >> 8) & 0xFF) as u8,
            session.packet_count,
            0xFF,
            (session.pgn & 0xFF) as u8,
            ((session.pgn >> 8) & 0xFF) as u8,
            ((session.pgn >> 16) & 0xFF) as u8,
        ];
        Self::send_transport_frame(
            bus,
            control_functions,
            PGN_TP_CONNECTION_MANAGEMENT,
            session.source,
            None,
            &buffer,
        )
    }

    /// Send the next window grant and remember how much was granted.
    fn send_clear_to_send<D: CanDriver>(
        session: &mut TransportSession,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        config: &NetworkConfiguration,
    ) -> bool {
        let Some(own) = session.destination else {
            return false;
        };
        let packets_remaining = session.packet_count - session.processed_packets;
        let packets_this_window = session
            .cts_packet_max
            .min(config.number_of_packets_per_cts_message)
            .min(packets_remaining);

        let buffer = [
            CLEAR_TO_SEND_MULTIPLEXOR,
            packets_this_window,
            session.processed_packets + 1,
            0xFF,
            0xFF,
            (session.pgn & 0xFF) as u8,
            ((session.pgn >> 8) & 0xFF) as u8,
            ((session.pgn >> 16) & 0xFF) as u8,
        ];
        let sent = Self::send_transport_frame(
            bus,
            control_functions,
            PGN_TP_CONNECTION_MANAGEMENT,
            own,
            Some(session.source),
            &buffer,
        );
        if sent {
            session.window_remaining = packets_this_window;
        }
        sent
    }

    fn send_end_of_message_acknowledge<D: CanDriver>(
        session: &TransportSession,
        bus: &mut D,
        control_functions: &ControlFunctionTable,
    ) -> bool {
        let Some(own) = session.destination else {
            return false;
        };
        let length = session.message_len();
        let buffer = [
            END_OF_MESSAGE_ACKNOWLEDGE_MULTIPLEXOR,
            (length & 0xFF) as u8,
            ((length >> 8) & 0xFF) as u8,
            session.packet_count,
            0xFF,
            (session.pgn & 0xFF) as u8,
            ((session.pgn >> 8) & 0xFF) as u8,
            ((session.pgn >> 16) & 0xFF) as u8,
        ];
        Self::send_transport_frame(
            bus,
            control_functions,
            PGN_TP_CONNECTION_MANAGEMENT,
            own,
            Some(session.source),
            &buffer,
        )
    }

    fn send_abort_frame<D: CanDriver>(
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        sender: CfHandle,
        receiver: CfHandle,
        pgn: u32,
        reason: ConnectionAbortReason,
    ) -> bool {
        let buffer = [
            CONNECTION_ABORT_MULTIPLEXOR,
            reason as u8,
            0xFF,
            0xFF,
            0xFF,
            (pgn & 0xFF) as u8,
            ((pgn >> 8) & 0xFF) as u8,
            ((pgn >> 16) & 0xFF) as u8,
        ];
        Self::send_transport_frame(
            bus,
            control_functions,
            PGN_TP_CONNECTION_MANAGEMENT,
            sender,
            Some(receiver),
            &buffer,
        )
    }

    fn send_transport_frame<D: CanDriver>(
        bus: &mut D,
        control_functions: &ControlFunctionTable,
        pgn: u32,
        source: CfHandle,
        destination: Option<CfHandle>,
        payload: &[u8; 8],
    ) -> bool {
        let Some(source_address) = control_functions.address(source) else {
            return false;
        };
        let destination_address = match destination {
            Some(destination) => match control_functions.address(destination) {
                Some(address) => address,
                None => return false,
            },
            None => BROADCAST_CAN_ADDRESS,
        };
        let id = match CanId::builder(pgn, source_address)
            .to_destination(destination_address)
            .with_priority(TRANSPORT_PRIORITY)
            .build()
        {
            Ok(id) => id,
            Err(_) => return false,
        };
        bus.send(&CanFrame { id, data: *payload, len: 8 })
    }
}

fn time_expired(start_ms: u64, timeout_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(start_ms) >= timeout_ms
}
