//! Network layer: participant registry (control functions), PGN routing, and
//! the update pump that drives every protocol state machine.

pub mod control_function;
pub mod iso_name;
pub mod manager;
pub mod message;

/// Transport Protocol Connection Management (TP.CM).
pub const PGN_TP_CONNECTION_MANAGEMENT: u32 = 0x00EC00;
/// Transport Protocol Data Transfer (TP.DT).
pub const PGN_TP_DATA_TRANSFER: u32 = 0x00EB00;
/// Messages from an ECU (VT client) to the Virtual Terminal.
pub const PGN_ECU_TO_VIRTUAL_TERMINAL: u32 = 0x00E600;
/// Messages from the Virtual Terminal to an ECU (VT client).
pub const PGN_VIRTUAL_TERMINAL_TO_ECU: u32 = 0x00E700;
/// Acknowledgement PGN used for N-ACKing unexpected traffic.
pub const PGN_ACKNOWLEDGE: u32 = 0x00E800;

/// Tunables of the network and transport layers. The defaults carry the
/// values mandated or recommended by ISO 11783-3.
#[derive(Clone, Debug)]
pub struct NetworkConfiguration {
    /// Admission cap for concurrent transport protocol sessions. An RTS
    /// received over the limit is answered with an abort, a BAM is dropped.
    pub max_transport_protocol_sessions: usize,
    /// Upper bound on data transfer frames emitted per update for
    /// destination-specific sessions.
    pub max_frames_per_update: u8,
    /// Minimum delay between two data frames of a broadcast (BAM) session.
    pub minimum_bam_frame_gap_ms: u64,
    /// Largest window this node grants in a Clear To Send message.
    pub number_of_packets_per_cts_message: u8,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            max_transport_protocol_sessions: 4,
            max_frames_per_update: 255,
            minimum_bam_frame_gap_ms: crate::protocol::transport::DEFAULT_BAM_FRAME_GAP_MS,
            number_of_packets_per_cts_message: 16,
        }
    }
}
