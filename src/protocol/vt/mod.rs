//! ISO 11783-6 Virtual Terminal: object model, per-client working sets, and
//! the server state machine that executes client commands.

pub mod colour_table;
pub mod events;
pub mod objects;
pub mod pool;
pub mod server;
pub mod working_set;

/// VT protocol versions this server can advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VtVersion {
    /// ISO 11783-6 second edition.
    Version2,
    Version3,
    Version4,
    Version5,
    Version6,
}

impl VtVersion {
    /// Version byte reported in status and capability replies.
    pub fn to_byte(self) -> u8 {
        match self {
            VtVersion::Version2 => 2,
            VtVersion::Version3 => 3,
            VtVersion::Version4 => 4,
            VtVersion::Version5 => 5,
            VtVersion::Version6 => 6,
        }
    }
}

/// Function codes carried in byte 0 of every VT PGN frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum VtFunction {
    /// Soft key press/release event (VT → ECU).
    SoftKeyActivation = 0x00,
    /// Button press/release event (VT → ECU).
    ButtonActivation = 0x01,
    /// Input object selection event (VT → ECU).
    SelectInputObject = 0x03,
    /// Operator-entered numeric value (VT → ECU).
    VtChangeNumericValue = 0x05,
    /// Raw object pool bytes (ECU → VT).
    ObjectPoolTransfer = 0x11,
    /// Pool upload finished, parse and activate (ECU → VT).
    EndOfObjectPool = 0x12,
    /// Hide or show a container.
    HideShowObject = 0xA0,
    /// Enable or disable an input object or button.
    EnableDisableObject = 0xA1,
    /// Move child objects by a relative offset.
    ChangeChildLocation = 0xA5,
    /// Switch the active mask of a working set.
    ChangeActiveMask = 0xA6,
    /// Switch the soft key mask of a data or alarm mask.
    ChangeSoftKeyMask = 0xA7,
    /// Write a 32-bit value into a numeric-valued object.
    ChangeNumericValue = 0xA8,
    /// Rewrite a fill attributes object.
    ChangeFillAttributes = 0xAA,
    /// Resize a geometric object.
    ChangeSize = 0xAB,
    /// Rewrite a font attributes object.
    ChangeFontAttributes = 0xAC,
    /// Write one attribute of any object.
    ChangeAttribute = 0xAF,
    /// Replace an entry of an input/output list.
    ChangeListItem = 0xB2,
    /// Write a new string value; may span more than one frame.
    ChangeStringValue = 0xB3,
    /// Move child objects to an absolute position.
    ChangeChildPosition = 0xB4,
    /// Memory availability query.
    GetMemory = 0xC0,
    /// Soft key geometry and count query.
    GetNumberOfSoftKeys = 0xC1,
    /// Display hardware query.
    GetHardware = 0xC2,
    /// Supported font query.
    GetTextFontData = 0xC3,
    /// Supported object type query.
    GetSupportedObjects = 0xC5,
    /// Supported widechar range query.
    GetSupportedWidechars = 0xC6,
    /// Persist the uploaded pools under a version label.
    StoreVersion = 0xD0,
    /// Recall pools stored under a version label.
    LoadVersion = 0xD1,
    /// List stored version labels.
    GetVersions = 0xDF,
    /// Reply carrying the stored version labels.
    GetVersionsResponse = 0xE0,
    /// Periodic server status broadcast (VT → ECU).
    VtStatus = 0xFE,
    /// Client heartbeat; the init bit of byte 1 attaches a new client.
    WorkingSetMaintenance = 0xFF,
}

impl VtFunction {
    /// Decode a received function byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::SoftKeyActivation,
            0x01 => Self::ButtonActivation,
            0x03 => Self::SelectInputObject,
            0x05 => Self::VtChangeNumericValue,
            0x11 => Self::ObjectPoolTransfer,
            0x12 => Self::EndOfObjectPool,
            0xA0 => Self::HideShowObject,
            0xA1 => Self::EnableDisableObject,
            0xA5 => Self::ChangeChildLocation,
            0xA6 => Self::ChangeActiveMask,
            0xA7 => Self::ChangeSoftKeyMask,
            0xA8 => Self::ChangeNumericValue,
            0xAA => Self::ChangeFillAttributes,
            0xAB => Self::ChangeSize,
            0xAC => Self::ChangeFontAttributes,
            0xAF => Self::ChangeAttribute,
            0xB2 => Self::ChangeListItem,
            0xB3 => Self::ChangeStringValue,
            0xB4 => Self::ChangeChildPosition,
            0xC0 => Self::GetMemory,
            0xC1 => Self::GetNumberOfSoftKeys,
            0xC2 => Self::GetHardware,
            0xC3 => Self::GetTextFontData,
            0xC5 => Self::GetSupportedObjects,
            0xC6 => Self::GetSupportedWidechars,
            0xD0 => Self::StoreVersion,
            0xD1 => Self::LoadVersion,
            0xDF => Self::GetVersions,
            0xE0 => Self::GetVersionsResponse,
            0xFE => Self::VtStatus,
            0xFF => Self::WorkingSetMaintenance,
            _ => return None,
        })
    }
}
