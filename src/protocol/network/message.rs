//! Assembled, arbitrary-length message delivered to protocol consumers.
//! Single CAN frames and reassembled transport protocol payloads share this
//! representation once they leave the network manager.
use alloc::vec::Vec;

use crate::protocol::network::control_function::CfHandle;

#[derive(Clone, Debug)]
/// A complete message: one frame's payload, or up to 1785 reassembled bytes.
pub struct CanMessage {
    /// Parameter Group Number the payload belongs to.
    pub pgn: u32,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Sending control function.
    pub source: CfHandle,
    /// Destination control function; `None` for broadcast traffic.
    pub destination: Option<CfHandle>,
    /// Priority the message was (last) carried with.
    pub priority: u8,
}

impl CanMessage {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the message was addressed to every node.
    pub fn is_destination_global(&self) -> bool {
        self.destination.is_none()
    }

    /// Little-endian u16 read, saturating reads past the end return 0xFF bytes.
    pub fn u16_at(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.byte(index), self.byte(index + 1)])
    }

    /// Little-endian u32 read.
    pub fn u32_at(&self, index: usize) -> u32 {
        u32::from_le_bytes([
            self.byte(index),
            self.byte(index + 1),
            self.byte(index + 2),
            self.byte(index + 3),
        ])
    }

    /// Single byte read; out-of-range indexes read as the pad value 0xFF.
    pub fn byte(&self, index: usize) -> u8 {
        self.data.get(index).copied().unwrap_or(0xFF)
    }
}
