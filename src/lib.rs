//! `korri-isobus` library: primitives and protocols required to run an
//! ISO 11783 / SAE J1939 communication stack in a `no_std` environment.
//! The crate exposes the transport layer (CAN identifiers, multi-packet
//! transport protocol), the network layer (control functions, PGN dispatch),
//! and a Virtual Terminal server built on top of both.
//!
//! The stack is tick-driven: a driving task calls the update entry points on
//! a ≥ 10 ms cadence and supplies monotonic milliseconds. No clock is read
//! internally and nothing blocks.
//!
//! ```rust,ignore
//! let mut network = NetworkManager::<_, 16>::new(driver, NetworkConfiguration::default());
//! let server_cf = network.control_functions_mut().register_internal(name, 0x26);
//! let mut server = VirtualTerminalServer::new(server_cf, VtConfiguration::default(), backend);
//!
//! loop {
//!     let now_ms = clock.now_ms();
//!     for message in network.update(now_ms) {
//!         server.process_message(&message, &mut network, now_ms);
//!     }
//!     server.update(&mut network, now_ms);
//! }
//! ```
#![no_std]

extern crate alloc;

/// Domain and low-level errors (CAN identifier construction, object pool
/// parsing, and related issues).
pub mod error;
/// ISO 11783 protocol implementation: CAN transport, network management,
/// and the Virtual Terminal server.
pub mod protocol;
