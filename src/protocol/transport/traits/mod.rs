//! Abstraction traits decoupling the protocol state machines from the
//! hardware they run on.

pub mod can_driver;
