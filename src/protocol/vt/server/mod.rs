//! Virtual Terminal server state machine: tracks connected clients, executes
//! the ECU → VT command set against their object pools, emits the response
//! frames, and broadcasts the periodic status message.
//!
//! The server sits on top of a [`NetworkManager`]: the driving loop feeds it
//! every completed message the manager returns, then calls
//! [`VirtualTerminalServer::update`].
use alloc::vec::Vec;

use crate::error::PoolError;
use crate::protocol::network::control_function::CfHandle;
use crate::protocol::network::manager::NetworkManager;
use crate::protocol::network::message::CanMessage;
use crate::protocol::network::{
    PGN_ACKNOWLEDGE, PGN_ECU_TO_VIRTUAL_TERMINAL, PGN_VIRTUAL_TERMINAL_TO_ECU,
};
use crate::protocol::transport::can_id::NULL_CAN_ADDRESS;
use crate::protocol::transport::data::TransportData;
use crate::protocol::transport::traits::can_driver::CanDriver;
use crate::protocol::vt::events::{
    ActiveMaskChangedEvent, ChildLocationChangedEvent, ChildPositionChangedEvent, EventDispatcher,
    EnableDisableEvent, HideShowEvent, NumericValueChangedEvent, RepaintEvent,
    StringValueChangedEvent,
};
use crate::protocol::vt::objects::{
    AttributeError, FillType, FontSize, ObjectKind, ObjectType, VtObject, NULL_OBJECT_ID,
};
use crate::protocol::vt::pool::ObjectPool;
use crate::protocol::vt::working_set::{ManagedWorkingSet, PoolParseState};
use crate::protocol::vt::{VtFunction, VtVersion};

/// Response frames leave the server at the lowest priority.
const VT_PRIORITY: u8 = 7;

/// Interval of the VT status broadcast.
const STATUS_MESSAGE_INTERVAL_MS: u64 = 1000;

/// Version label length used by the version storage commands.
const VERSION_LABEL_LENGTH: usize = 7;

/// Object types this server implements, advertised by Get Supported Objects.
const SUPPORTED_OBJECT_TYPES: &[ObjectType] = &[
    ObjectType::WorkingSet,
    ObjectType::DataMask,
    ObjectType::AlarmMask,
    ObjectType::Container,
    ObjectType::SoftKeyMask,
    ObjectType::Key,
    ObjectType::Button,
    ObjectType::InputBoolean,
    ObjectType::InputString,
    ObjectType::InputNumber,
    ObjectType::InputList,
    ObjectType::OutputString,
    ObjectType::OutputNumber,
    ObjectType::OutputLine,
    ObjectType::OutputRectangle,
    ObjectType::OutputEllipse,
    ObjectType::OutputPolygon,
    ObjectType::OutputMeter,
    ObjectType::OutputLinearBarGraph,
    ObjectType::OutputArchedBarGraph,
    ObjectType::PictureGraphic,
    ObjectType::NumberVariable,
    ObjectType::StringVariable,
    ObjectType::FontAttributes,
    ObjectType::LineAttributes,
    ObjectType::FillAttributes,
    ObjectType::InputAttributes,
    ObjectType::ObjectPointer,
    ObjectType::Macro,
    ObjectType::WindowMask,
    ObjectType::KeyGroup,
    ObjectType::GraphicsContext,
    ObjectType::OutputList,
    ObjectType::ColourMap,
    ObjectType::ExternalObjectPointer,
];

//==================================================================================Error bits

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change Numeric Value response.
pub enum ChangeNumericValueErrorBit {
    InvalidObjectId = 0,
    InvalidValue = 1,
    ValueInUse = 2,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Hide/Show Object response.
pub enum HideShowObjectErrorBit {
    InvalidObjectId = 0,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Enable/Disable Object response.
pub enum EnableDisableObjectErrorBit {
    InvalidObjectId = 0,
    InvalidEnableDisableCommandValue = 1,
    CouldNotComplete = 2,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions shared by the child location and position responses.
pub enum ChangeChildLocationOrPositionErrorBit {
    ParentObjectDoesNotExist = 0,
    TargetObjectDoesNotExistOrIsNotApplicable = 1,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change Active Mask response.
pub enum ChangeActiveMaskErrorBit {
    InvalidWorkingSetObjectId = 0,
    InvalidMaskObjectId = 1,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change Soft Key Mask response.
pub enum ChangeSoftKeyMaskErrorBit {
    InvalidDataOrAlarmMaskObjectId = 0,
    InvalidSoftKeyMaskObjectId = 1,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change String Value response.
pub enum ChangeStringValueErrorBit {
    InvalidObjectId = 0,
    StringTooLong = 1,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change Fill Attributes response.
pub enum ChangeFillAttributesErrorBit {
    InvalidObjectId = 0,
    InvalidType = 1,
    InvalidPatternObjectId = 2,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change Font Attributes response.
pub enum ChangeFontAttributesErrorBit {
    InvalidObjectId = 0,
    InvalidSize = 2,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change List Item response.
pub enum ChangeListItemErrorBit {
    InvalidObjectId = 0,
    InvalidListIndex = 1,
    InvalidNewListItemObjectId = 2,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug)]
/// Error bit positions of the Change Size response.
pub enum ChangeSizeErrorBit {
    InvalidObjectId = 0,
    AnyOtherError = 4,
}

fn bit(position: impl Into<u8>) -> u8 {
    1 << position.into()
}

macro_rules! error_bit_into {
    ($($name:ident),+ $(,)?) => {
        $(impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        })+
    };
}

error_bit_into!(
    ChangeNumericValueErrorBit,
    HideShowObjectErrorBit,
    EnableDisableObjectErrorBit,
    ChangeChildLocationOrPositionErrorBit,
    ChangeActiveMaskErrorBit,
    ChangeSoftKeyMaskErrorBit,
    ChangeStringValueErrorBit,
    ChangeFillAttributesErrorBit,
    ChangeFontAttributesErrorBit,
    ChangeListItemErrorBit,
    ChangeSizeErrorBit,
);

//==================================================================================Configuration

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Display colour depths a VT can report.
pub enum GraphicMode {
    Monochrome = 0,
    SixteenColour = 1,
    TwoHundredFiftySixColour = 2,
}

#[derive(Clone, Debug)]
/// Capabilities and timing the server advertises to its clients.
pub struct VtConfiguration {
    /// Protocol version byte advertised to clients.
    pub version: VtVersion,
    /// Data mask area width in pixels.
    pub data_mask_area_x_pixels: u16,
    /// Data mask area height in pixels.
    pub data_mask_area_y_pixels: u16,
    /// Soft key descriptor width in pixels.
    pub soft_key_descriptor_x_pixels: u8,
    /// Soft key descriptor height in pixels.
    pub soft_key_descriptor_y_pixels: u8,
    /// Navigation soft keys available on the bezel.
    pub number_of_navigation_soft_keys: u8,
    /// Virtual soft keys per soft key mask.
    pub number_of_virtual_soft_keys: u8,
    /// Physical soft keys on the terminal.
    pub number_of_physical_soft_keys: u8,
    /// Seconds since power-up, 0xFF when unknown.
    pub powerup_time: u8,
    /// Reported colour depth.
    pub graphic_mode: GraphicMode,
    /// Bitfield of supported small fonts.
    pub supported_small_fonts: u8,
    /// Bitfield of supported large fonts.
    pub supported_large_fonts: u8,
    /// A client missing maintenance messages for this long is disconnected.
    pub working_set_maintenance_timeout_ms: u64,
}

impl Default for VtConfiguration {
    fn default() -> Self {
        Self {
            version: VtVersion::Version5,
            data_mask_area_x_pixels: 480,
            data_mask_area_y_pixels: 480,
            soft_key_descriptor_x_pixels: 60,
            soft_key_descriptor_y_pixels: 60,
            number_of_navigation_soft_keys: 0,
            number_of_virtual_soft_keys: 64,
            number_of_physical_soft_keys: 6,
            powerup_time: 0xFF,
            graphic_mode: GraphicMode::TwoHundredFiftySixColour,
            supported_small_fonts: 0xFF,
            supported_large_fonts: 0xFF,
            working_set_maintenance_timeout_ms: 3000,
        }
    }
}

//==================================================================================Backend

/// User-supplied collaborators of the server: memory accounting, version
/// storage, widechar capability, and the object pool parser.
pub trait VtServerBackend {
    /// Whether `required_bytes` of pool storage can be satisfied.
    fn is_enough_memory(&self, required_bytes: u32) -> bool {
        let _ = required_bytes;
        true
    }

    /// Persist one raw pool under a label for a client NAME.
    fn save_version(&mut self, label: &[u8; VERSION_LABEL_LENGTH], client_name: u64, data: &[u8]) -> bool;

    /// Recall a pool stored under a label; empty when unknown.
    fn load_version(&mut self, label: &[u8; VERSION_LABEL_LENGTH], client_name: u64) -> Vec<u8>;

    /// Labels stored for a client NAME.
    fn list_versions(&self, client_name: u64) -> Vec<[u8; VERSION_LABEL_LENGTH]>;

    /// Widechar ranges supported in `code_plane` between `first` and `last`.
    /// Returns the error code and the encoded range array.
    fn supported_wide_chars(&self, code_plane: u8, first: u16, last: u16) -> (u8, Vec<u8>) {
        let _ = (code_plane, first, last);
        (0, Vec::new())
    }

    /// Parse one raw pool buffer into a typed object tree.
    fn parse_object_pool(&self, data: &[u8]) -> Result<ObjectPool, PoolError>;
}

#[derive(Clone, Copy, Debug)]
/// Acknowledgement flavours of the Acknowledge PGN.
pub enum AcknowledgementType {
    Positive = 0,
    Negative = 1,
}

#[derive(Clone, Copy, Debug)]
/// Key state codes carried by the activation event messages.
pub enum KeyActivationCode {
    ButtonUnlatchedOrReleased = 0,
    ButtonPressedOrLatched = 1,
    ButtonStillHeld = 2,
    ButtonPressAborted = 3,
}

//==================================================================================Server

/// The VT server proper. One instance serves every client on its bus.
pub struct VirtualTerminalServer<B: VtServerBackend> {
    backend: B,
    internal_control_function: CfHandle,
    configuration: VtConfiguration,
    working_sets: Vec<ManagedWorkingSet>,

    on_repaint: EventDispatcher<RepaintEvent>,
    on_active_mask_changed: EventDispatcher<ActiveMaskChangedEvent>,
    on_hide_show: EventDispatcher<HideShowEvent>,
    on_enable_disable: EventDispatcher<EnableDisableEvent>,
    on_numeric_value_changed: EventDispatcher<NumericValueChangedEvent>,
    on_string_value_changed: EventDispatcher<StringValueChangedEvent>,
    on_child_location_changed: EventDispatcher<ChildLocationChangedEvent>,
    on_child_position_changed: EventDispatcher<ChildPositionChangedEvent>,

    active_working_set: Option<CfHandle>,
    active_working_set_master_address: u8,
    active_data_mask_object_id: u16,
    active_soft_key_mask_object_id: u16,
    busy_codes: u8,
    current_command_function_code: u8,
    status_timestamp_ms: u64,
}

impl<B: VtServerBackend> VirtualTerminalServer<B> {
    /// Create a server transmitting as `internal_control_function`.
    pub fn new(
        internal_control_function: CfHandle,
        configuration: VtConfiguration,
        backend: B,
    ) -> Self {
        Self {
            backend,
            internal_control_function,
            configuration,
            working_sets: Vec::new(),
            on_repaint: EventDispatcher::new(),
            on_active_mask_changed: EventDispatcher::new(),
            on_hide_show: EventDispatcher::new(),
            on_enable_disable: EventDispatcher::new(),
            on_numeric_value_changed: EventDispatcher::new(),
            on_string_value_changed: EventDispatcher::new(),
            on_child_location_changed: EventDispatcher::new(),
            on_child_position_changed: EventDispatcher::new(),
            active_working_set: None,
            active_working_set_master_address: NULL_CAN_ADDRESS,
            active_data_mask_object_id: NULL_OBJECT_ID,
            active_soft_key_mask_object_id: NULL_OBJECT_ID,
            busy_codes: 0,
            current_command_function_code: 0xFF,
            status_timestamp_ms: 0,
        }
    }

    //==================================================================================Accessors

    /// User collaborators.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Address of the active working set master, `254` when none.
    pub fn active_working_set_master_address(&self) -> u8 {
        self.active_working_set_master_address
    }

    /// Data mask currently displayed for the active working set.
    pub fn active_data_mask_object_id(&self) -> u16 {
        self.active_data_mask_object_id
    }

    /// Number of clients currently attached.
    pub fn managed_working_set_count(&self) -> usize {
        self.working_sets.len()
    }

    /// Working set state of one client, when attached.
    pub fn working_set_for(&self, client: CfHandle) -> Option<&ManagedWorkingSet> {
        self.working_sets.iter().find(|ws| ws.control_function() == client)
    }

    /// Mutable working set state, e.g. for VT-side pool mutation.
    pub fn working_set_for_mut(&mut self, client: CfHandle) -> Option<&mut ManagedWorkingSet> {
        self.working_sets.iter_mut().find(|ws| ws.control_function() == client)
    }

    /// Repaint event dispatcher.
    pub fn on_repaint(&mut self) -> &mut EventDispatcher<RepaintEvent> {
        &mut self.on_repaint
    }

    /// Active mask change event dispatcher.
    pub fn on_active_mask_changed(&mut self) -> &mut EventDispatcher<ActiveMaskChangedEvent> {
        &mut self.on_active_mask_changed
    }

    /// Hide/show event dispatcher.
    pub fn on_hide_show(&mut self) -> &mut EventDispatcher<HideShowEvent> {
        &mut self.on_hide_show
    }

    /// Enable/disable event dispatcher.
    pub fn on_enable_disable(&mut self) -> &mut EventDispatcher<EnableDisableEvent> {
        &mut self.on_enable_disable
    }

    /// Numeric value change event dispatcher.
    pub fn on_numeric_value_changed(&mut self) -> &mut EventDispatcher<NumericValueChangedEvent> {
        &mut self.on_numeric_value_changed
    }

    /// String value change event dispatcher.
    pub fn on_string_value_changed(&mut self) -> &mut EventDispatcher<StringValueChangedEvent> {
        &mut self.on_string_value_changed
    }

    /// Child location change event dispatcher.
    pub fn on_child_location_changed(&mut self) -> &mut EventDispatcher<ChildLocationChangedEvent> {
        &mut self.on_child_location_changed
    }

    /// Child position change event dispatcher.
    pub fn on_child_position_changed(&mut self) -> &mut EventDispatcher<ChildPositionChangedEvent> {
        &mut self.on_child_position_changed
    }

    fn version_byte(&self) -> u8 {
        self.configuration.version.to_byte()
    }

    fn working_set_index(&self, client: CfHandle) -> Option<usize> {
        self.working_sets.iter().position(|ws| ws.control_function() == client)
    }

    //==================================================================================Message intake

    /// Process one completed message from the network manager. Only the
    /// ECU → VT PGN is of interest; everything else is ignored.
    pub fn process_message<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        if message.pgn != PGN_ECU_TO_VIRTUAL_TERMINAL {
            return;
        }
        // Commands are 8 bytes minimum except Change String Value, which is
        // legal from 6 bytes up (and may arrive over the transport protocol).
        let is_change_string_value = message.byte(0) == VtFunction::ChangeStringValue as u8;
        if message.len() < 8 && !(is_change_string_value && message.len() > 5) {
            return;
        }

        let Some(index) = self.working_set_index(message.source) else {
            self.process_unmanaged_source(message, network, now_ms);
            return;
        };

        let Some(function) = VtFunction::from_byte(message.byte(0)) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("[VT Server]: Unimplemented command {=u8:x}", message.byte(0));
            return;
        };
        self.current_command_function_code = message.byte(0);

        match function {
            VtFunction::ObjectPoolTransfer => {
                self.working_sets[index].add_iop_raw_data(message.data[1..].to_vec());
            }
            VtFunction::EndOfObjectPool => self.handle_end_of_object_pool(index),
            VtFunction::WorkingSetMaintenance => {
                self.working_sets[index].refresh_maintenance(now_ms);
            }
            VtFunction::GetMemory => self.handle_get_memory(message, network),
            VtFunction::GetNumberOfSoftKeys => self.handle_get_number_of_soft_keys(message, network),
            VtFunction::GetTextFontData => self.handle_get_text_font_data(message, network),
            VtFunction::GetHardware => self.handle_get_hardware(message, network),
            VtFunction::GetSupportedWidechars => {
                self.handle_get_supported_widechars(message, network, now_ms)
            }
            VtFunction::GetSupportedObjects => {
                self.handle_get_supported_objects(message, network, now_ms)
            }
            VtFunction::GetVersions => self.handle_get_versions(message, network, now_ms),
            VtFunction::StoreVersion => self.handle_store_version(index, message, network),
            VtFunction::LoadVersion => self.handle_load_version(index, message, network),
            VtFunction::ChangeNumericValue => {
                self.handle_change_numeric_value(index, message, network)
            }
            VtFunction::HideShowObject => self.handle_hide_show_object(index, message, network),
            VtFunction::EnableDisableObject => {
                self.handle_enable_disable_object(index, message, network)
            }
            VtFunction::ChangeChildLocation => {
                self.handle_change_child_location(index, message, network)
            }
            VtFunction::ChangeChildPosition => {
                self.handle_change_child_position(index, message, network)
            }
            VtFunction::ChangeActiveMask => self.handle_change_active_mask(index, message, network),
            VtFunction::ChangeSoftKeyMask => {
                self.handle_change_soft_key_mask(index, message, network)
            }
            VtFunction::ChangeStringValue => {
                self.handle_change_string_value(index, message, network)
            }
            VtFunction::ChangeFillAttributes => {
                self.handle_change_fill_attributes(index, message, network)
            }
            VtFunction::ChangeAttribute => self.handle_change_attribute(index, message, network),
            VtFunction::ChangeSize => self.handle_change_size(index, message, network),
            VtFunction::ChangeListItem => self.handle_change_list_item(index, message, network),
            VtFunction::ChangeFontAttributes => {
                self.handle_change_font_attributes(index, message, network)
            }
            _ => {
                #[cfg(feature = "defmt")]
                defmt::warn!("[VT Server]: Unhandled command {=u8:x}", message.byte(0));
            }
        }
    }

    /// First contact: a working set maintenance message with the init bit
    /// attaches the client, anything else earns a negative acknowledge.
    fn process_unmanaged_source<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        if message.byte(0) == VtFunction::WorkingSetMaintenance as u8
            && (message.byte(1) & 0x01) != 0
        {
            let client_version = message.byte(2);
            #[cfg(feature = "defmt")]
            defmt::info!(
                "[VT Server]: Client initiated working set maintenance with version {=u8}",
                client_version
            );
            if client_version > self.version_byte() {
                #[cfg(feature = "defmt")]
                defmt::warn!("[VT Server]: Client version {=u8} is not supported", client_version);
            }
            self.working_sets.push(ManagedWorkingSet::new(message.source, client_version, now_ms));
        } else {
            // Whoever this is has probably timed out on our side.
            #[cfg(feature = "defmt")]
            defmt::warn!("[VT Server]: Non-status message from an unconnected client");
            self.send_acknowledgement(
                network,
                AcknowledgementType::Negative,
                PGN_ECU_TO_VIRTUAL_TERMINAL,
                message.source,
            );
        }
    }

    //==================================================================================Update

    /// Periodic work: status heartbeat, client lifetime checks, parse job
    /// servicing, and parse completion responses. Call once per tick after
    /// the messages of that tick were processed.
    pub fn update<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        if now_ms.saturating_sub(self.status_timestamp_ms) >= STATUS_MESSAGE_INTERVAL_MS
            && self.send_status_message(network)
        {
            self.status_timestamp_ms = now_ms;
        }

        self.remove_expired_working_sets(network, now_ms);

        // Completion scan happens before parse servicing so a terminal state
        // set by a previous update is reported exactly once, on the next
        // poll after the job finished.
        for index in 0..self.working_sets.len() {
            match self.working_sets[index].parse_state() {
                PoolParseState::Success => {
                    let client = self.working_sets[index].control_function();
                    self.send_end_of_object_pool_response(
                        network,
                        true,
                        NULL_OBJECT_ID,
                        NULL_OBJECT_ID,
                        client,
                    );
                    if self.active_working_set.is_none() {
                        self.promote_to_master(network, index);
                    }
                    self.working_sets[index].acknowledge_parse_result();
                }
                PoolParseState::Fail => {
                    let client = self.working_sets[index].control_function();
                    let faulting_object_id = self.working_sets[index].faulting_object_id();
                    self.send_end_of_object_pool_response(
                        network,
                        false,
                        NULL_OBJECT_ID,
                        faulting_object_id,
                        client,
                    );
                    self.working_sets[index].acknowledge_parse_result();
                }
                _ => {}
            }
        }

        // One-shot parse jobs: the parser collaborator is pure, so the job
        // runs to a terminal state within a single service pass.
        for index in 0..self.working_sets.len() {
            if self.working_sets[index].parse_state() != PoolParseState::Running {
                continue;
            }
            let mut merged = ObjectPool::new();
            let mut outcome: Result<ObjectPool, u16> = Ok(ObjectPool::new());
            for file_index in 0..self.working_sets[index].iop_file_count() {
                let parsed = match self.working_sets[index].iop_file(file_index) {
                    Some(file) => self.backend.parse_object_pool(file),
                    None => break,
                };
                match parsed {
                    Ok(pool) => merged.merge(pool),
                    Err(error) => {
                        outcome = Err(error.faulting_object_id());
                        break;
                    }
                }
            }
            if outcome.is_ok() {
                outcome = Ok(merged);
            }
            self.working_sets[index].finish_parsing(outcome);
        }
    }

    fn remove_expired_working_sets<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        let timeout = self.configuration.working_set_maintenance_timeout_ms;
        let mut index = 0;
        while index < self.working_sets.len() {
            let expired = {
                let working_set = &self.working_sets[index];
                let client_gone =
                    !network.control_functions().is_address_valid(working_set.control_function());
                client_gone
                    || now_ms.saturating_sub(working_set.maintenance_timestamp_ms()) > timeout
            };
            if expired {
                let client = self.working_sets[index].control_function();
                #[cfg(feature = "defmt")]
                defmt::warn!("[VT Server]: Dropping working set, client timed out or lost");
                self.working_sets.swap_remove(index);
                if self.active_working_set == Some(client) {
                    self.active_working_set = None;
                    self.active_working_set_master_address = NULL_CAN_ADDRESS;
                    self.active_data_mask_object_id = NULL_OBJECT_ID;
                    self.active_soft_key_mask_object_id = NULL_OBJECT_ID;
                }
            } else {
                index += 1;
            }
        }
    }

    fn promote_to_master<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        index: usize,
    ) {
        let working_set = &self.working_sets[index];
        let client = working_set.control_function();
        let active_mask = working_set
            .pool()
            .working_set_object()
            .map(|object| match &object.kind {
                ObjectKind::WorkingSet { active_mask, .. } => *active_mask,
                _ => NULL_OBJECT_ID,
            })
            .unwrap_or(NULL_OBJECT_ID);

        self.active_working_set = Some(client);
        self.active_working_set_master_address =
            network.control_functions().address(client).unwrap_or(NULL_CAN_ADDRESS);
        self.active_data_mask_object_id = active_mask;
    }

    fn handle_end_of_object_pool(&mut self, index: usize) {
        if self.working_sets[index].has_object_pools() {
            self.working_sets[index].start_parsing();
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("[VT Server]: End of object pool ignored, no pools are loaded");
        }
    }

    //==================================================================================Capability queries

    fn handle_get_memory<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let required_bytes = message.u32_at(2);
        let is_enough = self.backend.is_enough_memory(required_bytes);
        #[cfg(feature = "defmt")]
        defmt::debug!("[VT Server]: Client requested {=u32} bytes of memory", required_bytes);

        let buffer = [
            VtFunction::GetMemory as u8,
            self.version_byte(),
            u8::from(!is_enough),
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);
    }

    fn handle_get_number_of_soft_keys<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let configuration = &self.configuration;
        let buffer = [
            VtFunction::GetNumberOfSoftKeys as u8,
            configuration.number_of_navigation_soft_keys,
            0xFF,
            0xFF,
            configuration.soft_key_descriptor_x_pixels,
            configuration.soft_key_descriptor_y_pixels,
            configuration.number_of_virtual_soft_keys,
            configuration.number_of_physical_soft_keys,
        ];
        self.send_vt_frame(network, &buffer, message.source);
    }

    fn handle_get_text_font_data<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let buffer = [
            VtFunction::GetTextFontData as u8,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            self.configuration.supported_small_fonts,
            self.configuration.supported_large_fonts,
            // Normal, bold, italic, proportional.
            0x8F,
        ];
        self.send_vt_frame(network, &buffer, message.source);
    }

    fn handle_get_hardware<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let configuration = &self.configuration;
        let buffer = [
            VtFunction::GetHardware as u8,
            configuration.powerup_time,
            configuration.graphic_mode as u8,
            // Pointing event reporting supported.
            0x0F,
            (configuration.data_mask_area_x_pixels & 0xFF) as u8,
            (configuration.data_mask_area_x_pixels >> 8) as u8,
            (configuration.data_mask_area_y_pixels & 0xFF) as u8,
            (configuration.data_mask_area_y_pixels >> 8) as u8,
        ];
        self.send_vt_frame(network, &buffer, message.source);
    }

    fn handle_get_supported_widechars<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        let code_plane = message.byte(1);
        let first = message.u16_at(2);
        let last = message.u16_at(4);
        let (error_code, ranges) = self.backend.supported_wide_chars(code_plane, first, last);
        let number_of_ranges = (ranges.len() / 4) as u8;

        let mut buffer = Vec::with_capacity(8 + ranges.len());
        buffer.push(VtFunction::GetSupportedWidechars as u8);
        buffer.push(code_plane);
        buffer.extend_from_slice(&first.to_le_bytes());
        buffer.extend_from_slice(&last.to_le_bytes());
        buffer.push(error_code);
        buffer.push(number_of_ranges);
        buffer.extend_from_slice(&ranges);
        self.send_vt_payload(network, buffer, message.source, now_ms);
    }

    fn handle_get_supported_objects<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        let mut buffer = Vec::with_capacity(2 + SUPPORTED_OBJECT_TYPES.len());
        buffer.push(VtFunction::GetSupportedObjects as u8);
        buffer.push(SUPPORTED_OBJECT_TYPES.len() as u8);
        for object_type in SUPPORTED_OBJECT_TYPES {
            buffer.push(*object_type as u8);
        }
        self.send_vt_payload(network, buffer, message.source, now_ms);
    }

    //==================================================================================Version storage

    fn handle_get_versions<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        now_ms: u64,
    ) {
        let client_name = network.control_functions().name(message.source).unwrap_or(0);
        let versions = self.backend.list_versions(client_name);

        if versions.len() > 255 {
            #[cfg(feature = "defmt")]
            defmt::warn!("[VT Server]: Version store returned more than 255 labels");
        }

        let mut buffer = Vec::with_capacity(2 + versions.len() * VERSION_LABEL_LENGTH);
        buffer.push(VtFunction::GetVersionsResponse as u8);
        buffer.push((versions.len() & 0xFF) as u8);
        for version in &versions {
            buffer.extend_from_slice(version);
        }
        while buffer.len() < 8 {
            buffer.push(0xFF);
        }
        self.send_vt_payload(network, buffer, message.source, now_ms);
    }

    fn version_label(message: &CanMessage) -> [u8; VERSION_LABEL_LENGTH] {
        let mut label = [0u8; VERSION_LABEL_LENGTH];
        for (offset, byte) in label.iter_mut().enumerate() {
            *byte = message.byte(1 + offset);
        }
        label
    }

    fn handle_store_version<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        if !self.working_sets[index].has_object_pools() {
            // Storing nothing is a protocol violation.
            self.send_acknowledgement(
                network,
                AcknowledgementType::Negative,
                PGN_ECU_TO_VIRTUAL_TERMINAL,
                message.source,
            );
            return;
        }

        let label = Self::version_label(message);
        let client_name = network.control_functions().name(message.source).unwrap_or(0);
        let mut all_pools_saved = true;

        for file_index in 0..self.working_sets[index].iop_file_count() {
            let saved = match self.working_sets[index].iop_file(file_index) {
                Some(file) => self.backend.save_version(&label, client_name, file),
                None => false,
            };
            if !saved {
                #[cfg(feature = "defmt")]
                defmt::warn!("[VT Server]: Object pool {=usize} could not be stored", file_index);
                all_pools_saved = false;
                break;
            }
        }

        let buffer = [
            VtFunction::StoreVersion as u8,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            if all_pools_saved { 0x00 } else { 0x04 },
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);
    }

    fn handle_load_version<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let label = Self::version_label(message);
        let client_name = network.control_functions().name(message.source).unwrap_or(0);

        // 0x01 = version label incorrect.
        let mut error_codes = 0x01;
        let loaded = self.backend.load_version(&label, client_name);
        if !loaded.is_empty() {
            self.working_sets[index].add_iop_raw_data(loaded);
            error_codes = 0;
        }
        if self.working_sets[index].has_object_pools() {
            self.working_sets[index].start_parsing();
            #[cfg(feature = "defmt")]
            defmt::debug!("[VT Server]: Parsing loaded pool data");
        }

        let buffer = [
            VtFunction::LoadVersion as u8,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            error_codes,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);
    }

    //==================================================================================Object mutation commands

    fn handle_change_numeric_value<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let value = message.u32_at(4);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            match pool.object_mut(object_id) {
                None => bit(ChangeNumericValueErrorBit::InvalidObjectId),
                Some(object) => match object.object_type() {
                    ObjectType::InputBoolean
                    | ObjectType::InputNumber
                    | ObjectType::InputList
                    | ObjectType::OutputNumber
                    | ObjectType::OutputList
                    | ObjectType::OutputMeter
                    | ObjectType::OutputLinearBarGraph
                    | ObjectType::OutputArchedBarGraph
                    | ObjectType::NumberVariable => {
                        set_numeric_value(object, value);
                        0
                    }
                    ObjectType::ObjectPointer => {
                        // The pointer's single child is replaced wholesale.
                        object.pop_child();
                        object.add_child(value as u16, 0, 0);
                        0
                    }
                    ObjectType::ExternalObjectPointer => {
                        if let ObjectKind::ExternalObjectPointer {
                            external_reference_name_id,
                            external_object_id,
                            ..
                        } = &mut object.kind
                        {
                            *external_reference_name_id = message.u16_at(4);
                            *external_object_id = message.u16_at(6);
                        }
                        0
                    }
                    _ => bit(ChangeNumericValueErrorBit::InvalidObjectId),
                },
            }
        };

        self.send_change_numeric_value_response(network, object_id, error_bits, value, message.source);
        if error_bits == 0 {
            self.on_numeric_value_changed.invoke(&NumericValueChangedEvent {
                working_set: client,
                object_id,
                value,
            });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_hide_show_object<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let hide = message.byte(3) == 0;

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            match pool.object_mut(object_id) {
                Some(object) => {
                    if let ObjectKind::Container { hidden } = &mut object.kind {
                        *hidden = hide;
                        0
                    } else {
                        // Only containers can be hidden.
                        bit(HideShowObjectErrorBit::InvalidObjectId)
                    }
                }
                None => bit(HideShowObjectErrorBit::InvalidObjectId),
            }
        };

        let buffer = [
            VtFunction::HideShowObject as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            u8::from(!hide),
            error_bits,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_hide_show.invoke(&HideShowEvent { working_set: client, object_id, hidden: hide });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_enable_disable_object<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let command_value = message.byte(3);
        let enable = command_value != 0;

        let error_bits = if command_value > 1 {
            bit(EnableDisableObjectErrorBit::InvalidEnableDisableCommandValue)
        } else {
            let pool = self.working_sets[index].pool_mut();
            match pool.object_mut(object_id) {
                Some(object) => {
                    if set_enabled(object, enable) {
                        0
                    } else {
                        bit(EnableDisableObjectErrorBit::InvalidObjectId)
                    }
                }
                None => bit(EnableDisableObjectErrorBit::InvalidObjectId),
            }
        };

        let buffer = [
            VtFunction::EnableDisableObject as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            u8::from(enable),
            error_bits,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_enable_disable.invoke(&EnableDisableEvent {
                working_set: client,
                object_id,
                enabled: enable,
            });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_child_location<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let parent_object_id = message.u16_at(1);
        let object_id = message.u16_at(3);
        // Offsets are biased by 127 on the wire.
        let x_offset = (i16::from(message.byte(5)) - 127) as i8;
        let y_offset = (i16::from(message.byte(6)) - 127) as i8;

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            let target_exists = pool.object(object_id).is_some();
            match pool.object_mut(parent_object_id) {
                None => bit(ChangeChildLocationOrPositionErrorBit::ParentObjectDoesNotExist),
                Some(parent) => {
                    if !target_exists {
                        bit(
                            ChangeChildLocationOrPositionErrorBit::TargetObjectDoesNotExistOrIsNotApplicable,
                        )
                    } else if parent.offset_children_with_id(object_id, x_offset, y_offset) {
                        0
                    } else {
                        bit(
                            ChangeChildLocationOrPositionErrorBit::TargetObjectDoesNotExistOrIsNotApplicable,
                        )
                    }
                }
            }
        };

        let buffer = [
            VtFunction::ChangeChildLocation as u8,
            (parent_object_id & 0xFF) as u8,
            (parent_object_id >> 8) as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_child_location_changed.invoke(&ChildLocationChangedEvent {
                working_set: client,
                parent_object_id,
                object_id,
                x_offset,
                y_offset,
            });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_child_position<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let parent_object_id = message.u16_at(1);
        let object_id = message.u16_at(3);

        // Nine data bytes minimum; the command always travels over the
        // transport protocol.
        if message.len() <= 8 {
            let buffer = [
                VtFunction::ChangeChildPosition as u8,
                (parent_object_id & 0xFF) as u8,
                (parent_object_id >> 8) as u8,
                (object_id & 0xFF) as u8,
                (object_id >> 8) as u8,
                bit(ChangeChildLocationOrPositionErrorBit::AnyOtherError),
                0xFF,
                0xFF,
            ];
            self.send_vt_frame(network, &buffer, message.source);
            return;
        }

        let new_x = message.u16_at(5);
        let new_y = message.u16_at(7);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            let target_exists = pool.object(object_id).is_some();
            match pool.object_mut(parent_object_id) {
                None => bit(ChangeChildLocationOrPositionErrorBit::ParentObjectDoesNotExist),
                Some(parent) => {
                    if !target_exists {
                        bit(
                            ChangeChildLocationOrPositionErrorBit::TargetObjectDoesNotExistOrIsNotApplicable,
                        )
                    } else {
                        match parent.object_type() {
                            ObjectType::WorkingSet
                            | ObjectType::Container
                            | ObjectType::Button
                            | ObjectType::DataMask
                            | ObjectType::AlarmMask
                            | ObjectType::WindowMask
                            | ObjectType::Key => {
                                // Every instance of the child moves.
                                if parent.position_children_with_id(
                                    object_id,
                                    new_x as i16,
                                    new_y as i16,
                                ) {
                                    0
                                } else {
                                    bit(ChangeChildLocationOrPositionErrorBit::TargetObjectDoesNotExistOrIsNotApplicable)
                                }
                            }
                            _ => bit(ChangeChildLocationOrPositionErrorBit::AnyOtherError),
                        }
                    }
                }
            }
        };

        let buffer = [
            VtFunction::ChangeChildPosition as u8,
            (parent_object_id & 0xFF) as u8,
            (parent_object_id >> 8) as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_child_position_changed.invoke(&ChildPositionChangedEvent {
                working_set: client,
                parent_object_id,
                object_id,
                x: new_x,
                y: new_y,
            });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_active_mask<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let working_set_object_id = message.u16_at(1);
        let new_mask_object_id = message.u16_at(3);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            let mask_exists = pool.object(new_mask_object_id).is_some();
            match pool.object_mut(working_set_object_id) {
                Some(object) => {
                    if let ObjectKind::WorkingSet { active_mask, .. } = &mut object.kind {
                        if mask_exists {
                            *active_mask = new_mask_object_id;
                            0
                        } else {
                            bit(ChangeActiveMaskErrorBit::InvalidMaskObjectId)
                        }
                    } else {
                        bit(ChangeActiveMaskErrorBit::InvalidWorkingSetObjectId)
                    }
                }
                None => bit(ChangeActiveMaskErrorBit::InvalidWorkingSetObjectId),
            }
        };

        let buffer = [
            VtFunction::ChangeActiveMask as u8,
            (new_mask_object_id & 0xFF) as u8,
            (new_mask_object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            if self.active_working_set == Some(client) {
                self.active_data_mask_object_id = new_mask_object_id;
            }
            self.on_active_mask_changed.invoke(&ActiveMaskChangedEvent {
                working_set: client,
                working_set_object_id,
                new_mask_object_id,
            });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_soft_key_mask<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let mask_object_id = message.u16_at(1);
        let new_mask_object_id = message.u16_at(3);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            let new_is_soft_key_mask = new_mask_object_id == NULL_OBJECT_ID
                || matches!(
                    pool.object(new_mask_object_id).map(VtObject::object_type),
                    Some(ObjectType::SoftKeyMask)
                );
            let new_exists = new_mask_object_id == NULL_OBJECT_ID
                || pool.object(new_mask_object_id).is_some();
            match pool.object_mut(mask_object_id) {
                None => bit(ChangeSoftKeyMaskErrorBit::InvalidDataOrAlarmMaskObjectId),
                Some(object) => {
                    if !new_exists {
                        bit(ChangeSoftKeyMaskErrorBit::InvalidSoftKeyMaskObjectId)
                    } else {
                        match &mut object.kind {
                            ObjectKind::DataMask { soft_key_mask }
                            | ObjectKind::AlarmMask { soft_key_mask, .. } => {
                                if new_is_soft_key_mask {
                                    *soft_key_mask = new_mask_object_id;
                                    0
                                } else {
                                    bit(ChangeSoftKeyMaskErrorBit::AnyOtherError)
                                }
                            }
                            _ => bit(ChangeSoftKeyMaskErrorBit::AnyOtherError),
                        }
                    }
                }
            }
        };

        let buffer = [
            VtFunction::ChangeSoftKeyMask as u8,
            (mask_object_id & 0xFF) as u8,
            (mask_object_id >> 8) as u8,
            (new_mask_object_id & 0xFF) as u8,
            (new_mask_object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            if self.active_working_set == Some(client) {
                self.active_soft_key_mask_object_id = new_mask_object_id;
            }
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_string_value<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let string_length = usize::from(message.u16_at(3));

        let mut applied_value = None;
        let error_bits = if message.len() < string_length + 5 {
            // The length field disagrees with what actually arrived.
            bit(ChangeStringValueErrorBit::AnyOtherError)
        } else {
            let new_value =
                alloc::string::String::from_utf8_lossy(&message.data[5..5 + string_length])
                    .into_owned();
            let pool = self.working_sets[index].pool_mut();
            match pool.object_mut(object_id) {
                None => bit(ChangeStringValueErrorBit::InvalidObjectId),
                Some(object) => match &mut object.kind {
                    ObjectKind::StringVariable { value }
                    | ObjectKind::OutputString { value }
                    | ObjectKind::InputString { value, .. } => {
                        *value = new_value.clone();
                        applied_value = Some(new_value);
                        0
                    }
                    _ => bit(ChangeStringValueErrorBit::InvalidObjectId),
                },
            }
        };

        let buffer = [
            VtFunction::ChangeStringValue as u8,
            0xFF,
            0xFF,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if let Some(value) = applied_value {
            self.on_string_value_changed.invoke(&StringValueChangedEvent {
                working_set: client,
                object_id,
                value,
            });
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_fill_attributes<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let fill_type_byte = message.byte(3);
        let fill_colour = message.byte(4);
        let pattern_object_id = message.u16_at(5);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            let pattern_is_valid = pattern_object_id == NULL_OBJECT_ID
                || matches!(
                    pool.object(pattern_object_id).map(VtObject::object_type),
                    Some(ObjectType::PictureGraphic)
                );
            match pool.object_mut(object_id) {
                None => bit(ChangeFillAttributesErrorBit::InvalidObjectId),
                Some(object) => match &mut object.kind {
                    ObjectKind::FillAttributes { fill_type, colour, pattern } => {
                        if !pattern_is_valid {
                            bit(ChangeFillAttributesErrorBit::InvalidPatternObjectId)
                        } else {
                            match FillType::from_byte(fill_type_byte) {
                                Some(new_fill_type) => {
                                    *fill_type = new_fill_type;
                                    *colour = fill_colour;
                                    *pattern = pattern_object_id;
                                    0
                                }
                                None => bit(ChangeFillAttributesErrorBit::InvalidType),
                            }
                        }
                    }
                    _ => bit(ChangeFillAttributesErrorBit::InvalidObjectId),
                },
            }
        };

        let buffer = [
            VtFunction::ChangeFillAttributes as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_attribute<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let attribute_id = message.byte(3);
        let attribute_value = message.u32_at(4);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            if object_id == NULL_OBJECT_ID {
                1 << AttributeError::InvalidObjectId as u8
            } else {
                match pool.object_mut(object_id) {
                    None => 1 << AttributeError::InvalidObjectId as u8,
                    Some(object) => match object.set_attribute(attribute_id, attribute_value) {
                        Ok(()) => 0,
                        Err(error) => 1 << error as u8,
                    },
                }
            }
        };

        let buffer = [
            VtFunction::ChangeAttribute as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            attribute_id,
            error_bits,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_size<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let new_width = message.u16_at(3);
        let new_height = message.u16_at(5);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            match pool.object_mut(object_id) {
                None => bit(ChangeSizeErrorBit::InvalidObjectId),
                Some(object) => match object.object_type() {
                    ObjectType::OutputMeter => {
                        // Meters are round; the standard requires them square.
                        if new_width == new_height {
                            object.width = new_width;
                            object.height = new_height;
                            0
                        } else {
                            bit(ChangeSizeErrorBit::AnyOtherError)
                        }
                    }
                    ObjectType::OutputArchedBarGraph
                    | ObjectType::OutputPolygon
                    | ObjectType::OutputEllipse
                    | ObjectType::OutputRectangle
                    | ObjectType::OutputLine
                    | ObjectType::OutputNumber
                    | ObjectType::OutputList
                    | ObjectType::InputList
                    | ObjectType::Button
                    | ObjectType::Container => {
                        object.width = new_width;
                        object.height = new_height;
                        0
                    }
                    _ => bit(ChangeSizeErrorBit::AnyOtherError),
                },
            }
        };

        let buffer = [
            VtFunction::ChangeSize as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_list_item<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let list_index = message.byte(3);
        let new_object_id = message.u16_at(4);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            let new_exists =
                new_object_id == NULL_OBJECT_ID || pool.object(new_object_id).is_some();
            match pool.object_mut(object_id) {
                None => bit(ChangeListItemErrorBit::InvalidObjectId),
                Some(object) => {
                    if !new_exists {
                        bit(ChangeListItemErrorBit::InvalidNewListItemObjectId)
                    } else {
                        match object.object_type() {
                            ObjectType::InputList | ObjectType::OutputList => {
                                if object.change_list_item(list_index, new_object_id) {
                                    0
                                } else {
                                    bit(ChangeListItemErrorBit::InvalidListIndex)
                                }
                            }
                            _ => bit(ChangeListItemErrorBit::AnyOtherError),
                        }
                    }
                }
            }
        };

        // Per-standard layout: list index at byte 3, error bitfield at byte 6.
        let buffer = [
            VtFunction::ChangeListItem as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            list_index,
            (new_object_id & 0xFF) as u8,
            (new_object_id >> 8) as u8,
            error_bits,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    fn handle_change_font_attributes<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        index: usize,
        message: &CanMessage,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) {
        let client = self.working_sets[index].control_function();
        let object_id = message.u16_at(1);
        let font_colour = message.byte(3);
        let font_size = message.byte(4);
        let font_type = message.byte(5);
        let font_style = message.byte(6);

        let error_bits = {
            let pool = self.working_sets[index].pool_mut();
            match pool.object_mut(object_id) {
                None => bit(ChangeFontAttributesErrorBit::InvalidObjectId),
                Some(object) => match &mut object.kind {
                    ObjectKind::FontAttributes { colour, size, font_type: kind, style } => {
                        match FontSize::from_byte(font_size) {
                            Some(new_size) => {
                                *colour = font_colour;
                                *size = new_size;
                                *kind = font_type;
                                *style = font_style;
                                0
                            }
                            None => bit(ChangeFontAttributesErrorBit::InvalidSize),
                        }
                    }
                    _ => bit(ChangeFontAttributesErrorBit::InvalidObjectId),
                },
            }
        };

        let buffer = [
            VtFunction::ChangeFontAttributes as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, message.source);

        if error_bits == 0 {
            self.on_repaint.invoke(&RepaintEvent { working_set: client });
        }
    }

    //==================================================================================Vt-initiated events

    /// Report a physical button press or release to its owning client.
    pub fn send_button_activation_message<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        activation_code: KeyActivationCode,
        object_id: u16,
        parent_object_id: u16,
        key_number: u8,
        destination: CfHandle,
    ) -> bool {
        let buffer = [
            VtFunction::ButtonActivation as u8,
            activation_code as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            (parent_object_id & 0xFF) as u8,
            (parent_object_id >> 8) as u8,
            key_number,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, destination)
    }

    /// Report a soft key press or release to its owning client.
    pub fn send_soft_key_activation_message<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        activation_code: KeyActivationCode,
        object_id: u16,
        parent_object_id: u16,
        key_number: u8,
        destination: CfHandle,
    ) -> bool {
        let buffer = [
            VtFunction::SoftKeyActivation as u8,
            activation_code as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            (parent_object_id & 0xFF) as u8,
            (parent_object_id >> 8) as u8,
            key_number,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, destination)
    }

    /// Report an input object selection change to its owning client.
    pub fn send_select_input_object_message<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        object_id: u16,
        is_selected: bool,
        is_open_for_input: bool,
        destination: CfHandle,
    ) -> bool {
        let buffer = [
            VtFunction::SelectInputObject as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            u8::from(is_selected),
            u8::from(is_open_for_input),
            0xFF,
            0xFF,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, destination)
    }

    /// Report an operator-entered numeric value to the owning client.
    pub fn send_change_numeric_value_message<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        object_id: u16,
        value: u32,
        destination: CfHandle,
    ) -> bool {
        let buffer = [
            VtFunction::VtChangeNumericValue as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            0xFF,
            (value & 0xFF) as u8,
            ((value >> 8) & 0xFF) as u8,
            ((value >> 16) & 0xFF) as u8,
            ((value >> 24) & 0xFF) as u8,
        ];
        self.send_vt_frame(network, &buffer, destination)
    }

    //==================================================================================Response senders

    fn send_change_numeric_value_response<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        object_id: u16,
        error_bits: u8,
        value: u32,
        destination: CfHandle,
    ) -> bool {
        let buffer = [
            VtFunction::ChangeNumericValue as u8,
            (object_id & 0xFF) as u8,
            (object_id >> 8) as u8,
            error_bits,
            (value & 0xFF) as u8,
            ((value >> 8) & 0xFF) as u8,
            ((value >> 16) & 0xFF) as u8,
            ((value >> 24) & 0xFF) as u8,
        ];
        self.send_vt_frame(network, &buffer, destination)
    }

    fn send_end_of_object_pool_response<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        success: bool,
        parent_of_faulting_object_id: u16,
        faulting_object_id: u16,
        destination: CfHandle,
    ) -> bool {
        let buffer = [
            VtFunction::EndOfObjectPool as u8,
            u8::from(!success),
            (parent_of_faulting_object_id & 0xFF) as u8,
            (parent_of_faulting_object_id >> 8) as u8,
            (faulting_object_id & 0xFF) as u8,
            (faulting_object_id >> 8) as u8,
            0,
            0xFF,
        ];
        self.send_vt_frame(network, &buffer, destination)
    }

    /// Periodic status broadcast: active master, active masks, busy state.
    fn send_status_message<D: CanDriver, const RX_CAP: usize>(
        &mut self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
    ) -> bool {
        let buffer = [
            VtFunction::VtStatus as u8,
            self.active_working_set_master_address,
            (self.active_data_mask_object_id & 0xFF) as u8,
            (self.active_data_mask_object_id >> 8) as u8,
            (self.active_soft_key_mask_object_id & 0xFF) as u8,
            (self.active_soft_key_mask_object_id >> 8) as u8,
            self.busy_codes,
            self.current_command_function_code,
        ];
        network.send_frame(
            PGN_VIRTUAL_TERMINAL_TO_ECU,
            &buffer,
            self.internal_control_function,
            None,
            VT_PRIORITY,
        )
    }

    fn send_acknowledgement<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        acknowledgement_type: AcknowledgementType,
        pgn: u32,
        client: CfHandle,
    ) -> bool {
        let Some(client_address) = network.control_functions().address(client) else {
            return false;
        };
        let buffer = [
            acknowledgement_type as u8,
            0xFF,
            0xFF,
            0xFF,
            client_address,
            (pgn & 0xFF) as u8,
            ((pgn >> 8) & 0xFF) as u8,
            ((pgn >> 16) & 0xFF) as u8,
        ];
        network.send_frame(PGN_ACKNOWLEDGE, &buffer, self.internal_control_function, None, VT_PRIORITY)
    }

    fn send_vt_frame<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        buffer: &[u8; 8],
        destination: CfHandle,
    ) -> bool {
        network.send_frame(
            PGN_VIRTUAL_TERMINAL_TO_ECU,
            buffer,
            self.internal_control_function,
            Some(destination),
            VT_PRIORITY,
        )
    }

    /// Emit a variable-length reply: one frame when it fits, a transport
    /// protocol session otherwise.
    fn send_vt_payload<D: CanDriver, const RX_CAP: usize>(
        &self,
        network: &mut NetworkManager<'_, D, RX_CAP>,
        buffer: Vec<u8>,
        destination: CfHandle,
        now_ms: u64,
    ) -> bool {
        network.send_message(
            PGN_VIRTUAL_TERMINAL_TO_ECU,
            TransportData::Owned(buffer),
            self.internal_control_function,
            Some(destination),
            VT_PRIORITY,
            None,
            now_ms,
        )
    }
}

/// Store a numeric command value into any numeric-valued object kind.
fn set_numeric_value(object: &mut VtObject, new_value: u32) {
    match &mut object.kind {
        ObjectKind::InputBoolean { value, .. }
        | ObjectKind::InputNumber { value, .. }
        | ObjectKind::InputList { value, .. }
        | ObjectKind::OutputNumber { value, .. }
        | ObjectKind::OutputList { value }
        | ObjectKind::OutputMeter { value, .. }
        | ObjectKind::OutputLinearBarGraph { value, .. }
        | ObjectKind::OutputArchedBarGraph { value, .. }
        | ObjectKind::NumberVariable { value } => *value = new_value,
        _ => {}
    }
}

/// Flip the enabled flag of an object kind that has one.
/// Returns `false` for types that cannot be enabled or disabled.
fn set_enabled(object: &mut VtObject, enable: bool) -> bool {
    match &mut object.kind {
        ObjectKind::InputBoolean { enabled, .. }
        | ObjectKind::InputString { enabled, .. }
        | ObjectKind::InputNumber { enabled, .. }
        | ObjectKind::InputList { enabled, .. }
        | ObjectKind::Button { enabled, .. } => {
            *enabled = enable;
            true
        }
        _ => false,
    }
}

//==================================================================================TESTS
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
