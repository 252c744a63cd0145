//! Registry of CAN participants ("control functions" in ISO 11783 terms).
//! Local nodes that are allowed to transmit are *internal*; remote nodes
//! observed on the bus are *external*.
//!
//! Long-lived protocol state (transport sessions, VT working sets) never
//! stores addresses or names directly: it stores a [`CfHandle`] and asks the
//! table on every update whether the participant is still valid. Addresses
//! can change at any time while a session is alive.
use alloc::vec::Vec;

use crate::protocol::network::iso_name::IsoName;
use crate::protocol::transport::can_id::{BROADCAST_CAN_ADDRESS, NULL_CAN_ADDRESS};

//==================================================================================HANDLE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Non-owning reference to a registry entry. Cheap to copy, survives address
/// changes, and turns stale (every lookup fails) once the entry is removed.
pub struct CfHandle(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Whether the control function is locally owned or observed on the bus.
pub enum CfKind {
    /// Locally owned, allowed to transmit.
    Internal,
    /// Remote participant.
    External,
}

#[derive(Debug)]
struct ControlFunctionSlot {
    name: u64,
    address: u8,
    kind: CfKind,
    occupied: bool,
}

//==================================================================================TABLE
/// Flat registry of all known control functions. Lookups are linear; the
/// population of a CAN segment is bounded by the address space (≤ 254 nodes).
#[derive(Debug, Default)]
pub struct ControlFunctionTable {
    slots: Vec<ControlFunctionSlot>,
}

impl ControlFunctionTable {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register a locally owned control function.
    pub fn register_internal(&mut self, name: u64, address: u8) -> CfHandle {
        self.register(name, address, CfKind::Internal)
    }

    /// Register a remote control function observed on the bus.
    pub fn register_external(&mut self, name: u64, address: u8) -> CfHandle {
        self.register(name, address, CfKind::External)
    }

    fn register(&mut self, name: u64, address: u8, kind: CfKind) -> CfHandle {
        // Reuse a vacated slot before growing so handles stay small.
        if let Some(index) = self.slots.iter().position(|slot| !slot.occupied) {
            self.slots[index] = ControlFunctionSlot { name, address, kind, occupied: true };
            return CfHandle(index);
        }
        self.slots.push(ControlFunctionSlot { name, address, kind, occupied: true });
        CfHandle(self.slots.len() - 1)
    }

    fn slot(&self, handle: CfHandle) -> Option<&ControlFunctionSlot> {
        self.slots.get(handle.0).filter(|slot| slot.occupied)
    }

    /// Current address of the control function, if it is still registered.
    pub fn address(&self, handle: CfHandle) -> Option<u8> {
        self.slot(handle).map(|slot| slot.address)
    }

    /// 64-bit NAME of the control function.
    pub fn name(&self, handle: CfHandle) -> Option<u64> {
        self.slot(handle).map(|slot| slot.name)
    }

    /// Decoded NAME of the control function.
    pub fn iso_name(&self, handle: CfHandle) -> Option<IsoName> {
        self.name(handle).map(IsoName::from_raw)
    }

    /// Whether the handle refers to a registered participant holding a
    /// claimable address (0..=253).
    pub fn is_address_valid(&self, handle: CfHandle) -> bool {
        match self.address(handle) {
            Some(address) => address < NULL_CAN_ADDRESS,
            None => false,
        }
    }

    /// Whether the handle refers to a locally owned control function.
    pub fn is_internal(&self, handle: CfHandle) -> bool {
        matches!(self.slot(handle), Some(slot) if slot.kind == CfKind::Internal)
    }

    /// Change the address of a participant, e.g. after it re-claims.
    /// Setting the null address invalidates every session holding the handle.
    pub fn set_address(&mut self, handle: CfHandle, address: u8) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            if slot.occupied {
                slot.address = address;
            }
        }
    }

    /// Remove a participant. The handle turns stale.
    pub fn remove(&mut self, handle: CfHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            slot.occupied = false;
        }
    }

    /// Find any participant currently holding `address`.
    pub fn find_by_address(&self, address: u8) -> Option<CfHandle> {
        if address >= NULL_CAN_ADDRESS {
            return None;
        }
        self.slots
            .iter()
            .position(|slot| slot.occupied && slot.address == address)
            .map(CfHandle)
    }

    /// Find the local internal control function holding `address`.
    pub fn find_internal_by_address(&self, address: u8) -> Option<CfHandle> {
        if address >= NULL_CAN_ADDRESS {
            return None;
        }
        self.slots
            .iter()
            .position(|slot| {
                slot.occupied && slot.kind == CfKind::Internal && slot.address == address
            })
            .map(CfHandle)
    }

    /// Resolve the control function a frame was addressed to. The broadcast
    /// address resolves to `None` (global).
    pub fn resolve_destination(&self, address: u8) -> Option<CfHandle> {
        if address == BROADCAST_CAN_ADDRESS {
            None
        } else {
            self.find_by_address(address)
        }
    }
}
