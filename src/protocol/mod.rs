//! ISO 11783 protocol stack layers, bottom up: `transport` carries frames and
//! multi-packet sessions, `network` tracks participants and routes PGNs, and
//! `vt` implements the Virtual Terminal server on top of both.

pub mod network;
pub mod transport;
pub mod vt;
