//! Minimal abstraction for a CAN bus driver. Allows the library to plug into
//! various implementations (kernel socket, USB adapter, embedded HAL, test
//! double).
//!
//! The stack is tick-driven, so the trait is polled: received frames are
//! buffered by the driver (or by an [`embassy_sync`] channel handed to the
//! network manager) and drained from inside the update pump. Nothing blocks.
use crate::protocol::transport::can_frame::CanFrame;

/// Contract to send and receive CAN frames from the update pump.
pub trait CanDriver {
    /// Bring the interface up. Returns `false` when the hardware refused.
    fn start(&mut self) -> bool;

    /// Bring the interface down.
    fn stop(&mut self);

    /// Emit a frame on the bus. Returns `false` when the frame could not be
    /// queued; the protocol layer retries on the next update where the
    /// standard allows it.
    fn send(&mut self, frame: &CanFrame) -> bool;

    /// Retrieve the next buffered frame, or `None` when the queue is empty.
    fn receive(&mut self) -> Option<CanFrame>;
}
