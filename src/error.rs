//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (CAN ID construction,
//! object pool parsing, etc.).
use thiserror_no_std::Error;

#[derive(Error, Debug, PartialEq, Eq)]
/// Errors that can occur while building a 29-bit CAN identifier.
pub enum CanIdBuildError {
    /// Attempt to build a broadcast message (PDU2) with an explicit destination.
    #[error("Invalid destination for broadcast message: PF is too high")]
    InvalidForBroadcast,
    /// Attempt to send an addressed message (PDU1) without a destination.
    #[error("Addressed message requires a destination: PF is {pf}")]
    MissingDestination { pf: u8 },
    /// In PDU1 the lower 8 bits of the PGN must remain zero.
    #[error("PDU1 PGNs require PS = 0")]
    PsMustBeNullForAddressed,
}

#[derive(Error, Debug, PartialEq, Eq)]
/// Failures reported by the object pool parser collaborator.
pub enum PoolError {
    /// A specific object could not be parsed or failed validation.
    #[error("Object {id} is faulty")]
    FaultingObject { id: u16 },
    /// The pool data ended in the middle of an object definition.
    #[error("Truncated object pool data")]
    Truncated,
}

impl PoolError {
    /// Object ID to report in the End Of Object Pool response.
    /// Truncation has no attributable object, the null ID is used instead.
    pub fn faulting_object_id(&self) -> u16 {
        match self {
            PoolError::FaultingObject { id } => *id,
            PoolError::Truncated => crate::protocol::vt::objects::NULL_OBJECT_ID,
        }
    }
}
