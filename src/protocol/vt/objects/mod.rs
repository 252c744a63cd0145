//! Typed VT object tree. The original standard models objects as a class
//! hierarchy; here each object is one struct carrying the attributes every
//! type shares, plus a tagged [`ObjectKind`] for the per-type fields.
//! Child references stay object IDs resolved through the owning pool, so the
//! tree has no cyclic ownership.
use alloc::string::String;
use alloc::vec::Vec;

/// The reserved "no object" ID.
pub const NULL_OBJECT_ID: u16 = 0xFFFF;

//==================================================================================Object types

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Object type codes defined by ISO 11783-6.
pub enum ObjectType {
    WorkingSet = 0,
    DataMask = 1,
    AlarmMask = 2,
    Container = 3,
    SoftKeyMask = 4,
    Key = 5,
    Button = 6,
    InputBoolean = 7,
    InputString = 8,
    InputNumber = 9,
    InputList = 10,
    OutputString = 11,
    OutputNumber = 12,
    OutputLine = 13,
    OutputRectangle = 14,
    OutputEllipse = 15,
    OutputPolygon = 16,
    OutputMeter = 17,
    OutputLinearBarGraph = 18,
    OutputArchedBarGraph = 19,
    PictureGraphic = 20,
    NumberVariable = 21,
    StringVariable = 22,
    FontAttributes = 23,
    LineAttributes = 24,
    FillAttributes = 25,
    InputAttributes = 26,
    ObjectPointer = 27,
    Macro = 28,
    WindowMask = 34,
    KeyGroup = 35,
    GraphicsContext = 36,
    OutputList = 37,
    ColourMap = 39,
    ExternalObjectPointer = 43,
}

impl ObjectType {
    /// Child object types this parent type may reference, per the standard.
    /// An empty list marks a leaf type.
    pub fn allowed_child_types(self) -> &'static [ObjectType] {
        use ObjectType::*;
        match self {
            WorkingSet => &[
                OutputList,
                Container,
                OutputString,
                OutputNumber,
                OutputLine,
                OutputRectangle,
                OutputEllipse,
                OutputPolygon,
                OutputMeter,
                OutputLinearBarGraph,
                OutputArchedBarGraph,
                GraphicsContext,
                PictureGraphic,
                ObjectPointer,
            ],
            DataMask | AlarmMask => &[
                WorkingSet,
                Button,
                InputBoolean,
                InputString,
                InputNumber,
                InputList,
                OutputString,
                OutputNumber,
                OutputList,
                OutputLine,
                OutputRectangle,
                OutputEllipse,
                OutputPolygon,
                OutputMeter,
                OutputLinearBarGraph,
                OutputArchedBarGraph,
                GraphicsContext,
                PictureGraphic,
                ObjectPointer,
                ExternalObjectPointer,
            ],
            Container => &[
                WorkingSet,
                Container,
                Button,
                InputBoolean,
                InputString,
                InputNumber,
                InputList,
                OutputString,
                OutputNumber,
                OutputList,
                OutputLine,
                OutputRectangle,
                OutputEllipse,
                OutputPolygon,
                OutputMeter,
                GraphicsContext,
                OutputArchedBarGraph,
                OutputLinearBarGraph,
                PictureGraphic,
                ObjectPointer,
                ExternalObjectPointer,
            ],
            SoftKeyMask => &[ObjectPointer, ExternalObjectPointer, Key],
            Key => &[
                WorkingSet,
                Container,
                OutputString,
                OutputNumber,
                OutputList,
                OutputLine,
                OutputRectangle,
                OutputEllipse,
                OutputPolygon,
                OutputMeter,
                GraphicsContext,
                OutputArchedBarGraph,
                OutputLinearBarGraph,
                PictureGraphic,
                ObjectPointer,
                ExternalObjectPointer,
            ],
            KeyGroup => &[Key, ObjectPointer],
            Button => &[
                WorkingSet,
                OutputList,
                Container,
                OutputString,
                OutputNumber,
                OutputLine,
                OutputRectangle,
                OutputEllipse,
                OutputPolygon,
                OutputMeter,
                OutputLinearBarGraph,
                OutputArchedBarGraph,
                GraphicsContext,
                PictureGraphic,
                ObjectPointer,
            ],
            InputBoolean => &[NumberVariable],
            InputString => &[StringVariable, FontAttributes, InputAttributes],
            InputNumber => &[NumberVariable, FontAttributes],
            InputList => &[NumberVariable, OutputString],
            OutputString => &[StringVariable, FontAttributes],
            OutputNumber => &[NumberVariable, FontAttributes],
            OutputList => &[NumberVariable, OutputString],
            OutputLine => &[LineAttributes],
            OutputRectangle | OutputEllipse | OutputPolygon => &[LineAttributes, FillAttributes],
            OutputMeter | OutputLinearBarGraph | OutputArchedBarGraph => &[NumberVariable],
            WindowMask => &[
                ObjectPointer,
                OutputString,
                Container,
                OutputNumber,
                OutputList,
                OutputLine,
                OutputRectangle,
                OutputEllipse,
                OutputPolygon,
                OutputMeter,
                OutputLinearBarGraph,
                OutputArchedBarGraph,
                GraphicsContext,
                PictureGraphic,
                InputNumber,
                InputString,
                Button,
            ],
            _ => &[],
        }
    }
}

//==================================================================================Attribute enums

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Error kinds an attribute setter can report. The numeric value is the bit
/// position used in the Change Attribute response.
pub enum AttributeError {
    InvalidObjectId = 0,
    InvalidAttributeId = 1,
    InvalidValue = 2,
    AnyOtherError = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
/// Font sizes defined by the standard, smallest to largest.
pub enum FontSize {
    Size6x8 = 0,
    Size8x8 = 1,
    Size8x12 = 2,
    Size12x16 = 3,
    Size16x16 = 4,
    Size16x24 = 5,
    Size24x32 = 6,
    Size32x32 = 7,
    Size32x48 = 8,
    Size48x64 = 9,
    Size64x64 = 10,
    Size64x96 = 11,
    Size96x128 = 12,
    Size128x128 = 13,
    Size128x192 = 14,
}

impl FontSize {
    /// Decode a font size byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Size6x8,
            1 => Self::Size8x8,
            2 => Self::Size8x12,
            3 => Self::Size12x16,
            4 => Self::Size16x16,
            5 => Self::Size16x24,
            6 => Self::Size24x32,
            7 => Self::Size32x32,
            8 => Self::Size32x48,
            9 => Self::Size48x64,
            10 => Self::Size64x64,
            11 => Self::Size64x96,
            12 => Self::Size96x128,
            13 => Self::Size128x128,
            14 => Self::Size128x192,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Fill styles of a fill attributes object.
pub enum FillType {
    NoFill = 0,
    FillWithLineColour = 1,
    FillWithSpecifiedColour = 2,
    FillWithPattern = 3,
}

impl FillType {
    /// Decode a fill type byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::NoFill,
            1 => Self::FillWithLineColour,
            2 => Self::FillWithSpecifiedColour,
            3 => Self::FillWithPattern,
            _ => return None,
        })
    }
}

//==================================================================================Object tree

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Reference from a parent object to a child, with the child's position
/// relative to the parent.
pub struct ChildObject {
    /// Object ID of the child.
    pub id: u16,
    /// Horizontal offset in pixels.
    pub x: i16,
    /// Vertical offset in pixels.
    pub y: i16,
}

#[derive(Clone, Debug, PartialEq)]
/// Per-type attributes of a VT object.
pub enum ObjectKind {
    WorkingSet { active_mask: u16, selectable: bool },
    DataMask { soft_key_mask: u16 },
    AlarmMask { soft_key_mask: u16, priority: u8 },
    Container { hidden: bool },
    SoftKeyMask,
    Key { key_code: u8 },
    KeyGroup { name: u16 },
    Button { key_code: u8, enabled: bool },
    InputBoolean { value: u32, enabled: bool, variable_reference: u16 },
    InputString { value: String, enabled: bool },
    InputNumber {
        value: u32,
        minimum_value: u32,
        maximum_value: u32,
        offset: i32,
        scale: f32,
        number_of_decimals: u8,
        enabled: bool,
    },
    InputList { value: u32, enabled: bool },
    OutputString { value: String },
    OutputNumber { value: u32, offset: i32, scale: f32, number_of_decimals: u8 },
    OutputList { value: u32 },
    OutputLine { line_attributes: u16 },
    OutputRectangle { line_attributes: u16, fill_attributes: u16 },
    OutputEllipse { line_attributes: u16, fill_attributes: u16 },
    OutputPolygon { line_attributes: u16, fill_attributes: u16 },
    OutputMeter { value: u32, minimum_value: u32, maximum_value: u32, needle_colour: u8 },
    OutputLinearBarGraph {
        value: u32,
        minimum_value: u32,
        maximum_value: u32,
        colour: u8,
        target_value: u32,
    },
    OutputArchedBarGraph { value: u32, minimum_value: u32, maximum_value: u32, colour: u8 },
    GraphicsContext { viewport_width: u16, viewport_height: u16 },
    PictureGraphic { actual_width: u16, actual_height: u16, format: u8, transparency_colour: u8 },
    NumberVariable { value: u32 },
    StringVariable { value: String },
    FontAttributes { colour: u8, size: FontSize, font_type: u8, style: u8 },
    LineAttributes { colour: u8, width: u8, art: u16 },
    FillAttributes { fill_type: FillType, colour: u8, pattern: u16 },
    InputAttributes { validation_type: u8, validation_string: String },
    ObjectPointer,
    ExternalObjectPointer {
        default_object_id: u16,
        external_reference_name_id: u16,
        external_object_id: u16,
    },
    Macro { commands: Vec<u8> },
    ColourMap,
    WindowMask { window_type: u8 },
}

#[derive(Clone, Debug, PartialEq)]
/// One node of the object tree.
pub struct VtObject {
    /// 16-bit object ID, unique within a pool.
    pub id: u16,
    /// Width in pixels; unused by dimensionless types.
    pub width: u16,
    /// Height in pixels; unused by dimensionless types.
    pub height: u16,
    /// Index into the working set's colour table.
    pub background_colour: u8,
    /// Ordered child references.
    pub children: Vec<ChildObject>,
    /// Per-type attributes.
    pub kind: ObjectKind,
}

impl VtObject {
    /// Create an object with no children and zeroed common attributes.
    pub fn new(id: u16, kind: ObjectKind) -> Self {
        Self { id, width: 0, height: 0, background_colour: 0, children: Vec::new(), kind }
    }

    /// Type tag of this object.
    pub fn object_type(&self) -> ObjectType {
        match self.kind {
            ObjectKind::WorkingSet { .. } => ObjectType::WorkingSet,
            ObjectKind::DataMask { .. } => ObjectType::DataMask,
            ObjectKind::AlarmMask { .. } => ObjectType::AlarmMask,
            ObjectKind::Container { .. } => ObjectType::Container,
            ObjectKind::SoftKeyMask => ObjectType::SoftKeyMask,
            ObjectKind::Key { .. } => ObjectType::Key,
            ObjectKind::KeyGroup { .. } => ObjectType::KeyGroup,
            ObjectKind::Button { .. } => ObjectType::Button,
            ObjectKind::InputBoolean { .. } => ObjectType::InputBoolean,
            ObjectKind::InputString { .. } => ObjectType::InputString,
            ObjectKind::InputNumber { .. } => ObjectType::InputNumber,
            ObjectKind::InputList { .. } => ObjectType::InputList,
            ObjectKind::OutputString { .. } => ObjectType::OutputString,
            ObjectKind::OutputNumber { .. } => ObjectType::OutputNumber,
            ObjectKind::OutputList { .. } => ObjectType::OutputList,
            ObjectKind::OutputLine { .. } => ObjectType::OutputLine,
            ObjectKind::OutputRectangle { .. } => ObjectType::OutputRectangle,
            ObjectKind::OutputEllipse { .. } => ObjectType::OutputEllipse,
            ObjectKind::OutputPolygon { .. } => ObjectType::OutputPolygon,
            ObjectKind::OutputMeter { .. } => ObjectType::OutputMeter,
            ObjectKind::OutputLinearBarGraph { .. } => ObjectType::OutputLinearBarGraph,
            ObjectKind::OutputArchedBarGraph { .. } => ObjectType::OutputArchedBarGraph,
            ObjectKind::GraphicsContext { .. } => ObjectType::GraphicsContext,
            ObjectKind::PictureGraphic { .. } => ObjectType::PictureGraphic,
            ObjectKind::NumberVariable { .. } => ObjectType::NumberVariable,
            ObjectKind::StringVariable { .. } => ObjectType::StringVariable,
            ObjectKind::FontAttributes { .. } => ObjectType::FontAttributes,
            ObjectKind::LineAttributes { .. } => ObjectType::LineAttributes,
            ObjectKind::FillAttributes { .. } => ObjectType::FillAttributes,
            ObjectKind::InputAttributes { .. } => ObjectType::InputAttributes,
            ObjectKind::ObjectPointer => ObjectType::ObjectPointer,
            ObjectKind::ExternalObjectPointer { .. } => ObjectType::ExternalObjectPointer,
            ObjectKind::Macro { .. } => ObjectType::Macro,
            ObjectKind::ColourMap => ObjectType::ColourMap,
            ObjectKind::WindowMask { .. } => ObjectType::WindowMask,
        }
    }

    //==================================================================================Children

    /// Append a child reference.
    pub fn add_child(&mut self, id: u16, x: i16, y: i16) {
        self.children.push(ChildObject { id, x, y });
    }

    /// Remove the most recently added child, if any.
    pub fn pop_child(&mut self) {
        self.children.pop();
    }

    /// Number of child references.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Move every child with the given ID by a relative offset.
    /// Returns whether any child matched.
    pub fn offset_children_with_id(&mut self, child_id: u16, x_offset: i8, y_offset: i8) -> bool {
        let mut any_matched = false;
        for child in &mut self.children {
            if child.id == child_id {
                child.x = child.x.wrapping_add(i16::from(x_offset));
                child.y = child.y.wrapping_add(i16::from(y_offset));
                any_matched = true;
            }
        }
        any_matched
    }

    /// Place every child with the given ID at an absolute position.
    /// Returns whether any child matched.
    pub fn position_children_with_id(&mut self, child_id: u16, x: i16, y: i16) -> bool {
        let mut any_matched = false;
        for child in &mut self.children {
            if child.id == child_id {
                child.x = x;
                child.y = y;
                any_matched = true;
            }
        }
        any_matched
    }

    /// Replace the list entry at `index` with another object ID.
    /// Returns `false` when the index is out of range.
    pub fn change_list_item(&mut self, index: u8, new_id: u16) -> bool {
        match self.children.get_mut(usize::from(index)) {
            Some(child) => {
                child.id = new_id;
                true
            }
            None => false,
        }
    }

    //==================================================================================Attributes

    /// Write one attribute addressed by its ID.
    ///
    /// Attribute 0 is the read-only type attribute on every object. Sized
    /// objects map 1 → width, 2 → height, 3 → background colour; the
    /// remaining IDs are type-specific. Setters validate ranges and report
    /// an [`AttributeError`] that the server folds into its response bitfield.
    pub fn set_attribute(&mut self, attribute_id: u8, value: u32) -> Result<(), AttributeError> {
        if attribute_id == 0 {
            return Err(AttributeError::InvalidAttributeId);
        }
        match &mut self.kind {
            ObjectKind::WorkingSet { active_mask, selectable } => match attribute_id {
                1 => self.background_colour = colour(value)?,
                2 => *selectable = flag(value)?,
                3 => *active_mask = value as u16,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::DataMask { soft_key_mask } => match attribute_id {
                1 => self.background_colour = colour(value)?,
                2 => *soft_key_mask = value as u16,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::AlarmMask { soft_key_mask, priority } => match attribute_id {
                1 => self.background_colour = colour(value)?,
                2 => *soft_key_mask = value as u16,
                3 => *priority = colour(value)?,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::Container { hidden } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => *hidden = flag(value)?,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::Key { key_code } => match attribute_id {
                1 => self.background_colour = colour(value)?,
                2 => *key_code = colour(value)?,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::Button { key_code, .. } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => self.background_colour = colour(value)?,
                4 => *key_code = colour(value)?,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::InputBoolean { value: current, variable_reference, .. } => {
                match attribute_id {
                    1 => self.background_colour = colour(value)?,
                    2 => self.width = value as u16,
                    3 => *variable_reference = value as u16,
                    4 => *current = value,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::InputString { .. } | ObjectKind::OutputString { .. } => {
                match attribute_id {
                    1 => self.width = value as u16,
                    2 => self.height = value as u16,
                    3 => self.background_colour = colour(value)?,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::InputNumber { minimum_value, maximum_value, offset, .. } => {
                match attribute_id {
                    1 => self.width = value as u16,
                    2 => self.height = value as u16,
                    3 => self.background_colour = colour(value)?,
                    4 => *minimum_value = value,
                    5 => *maximum_value = value,
                    6 => *offset = value as i32,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::InputList { value: current, .. } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => *current = value,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::OutputNumber { offset, .. } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => self.background_colour = colour(value)?,
                4 => *offset = value as i32,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::OutputList { value: current } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => *current = value,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::OutputLine { line_attributes } => match attribute_id {
                1 => *line_attributes = value as u16,
                2 => self.width = value as u16,
                3 => self.height = value as u16,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::OutputRectangle { line_attributes, fill_attributes }
            | ObjectKind::OutputEllipse { line_attributes, fill_attributes }
            | ObjectKind::OutputPolygon { line_attributes, fill_attributes } => {
                match attribute_id {
                    1 => *line_attributes = value as u16,
                    2 => self.width = value as u16,
                    3 => self.height = value as u16,
                    4 => *fill_attributes = value as u16,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::OutputMeter { minimum_value, maximum_value, needle_colour, .. } => {
                match attribute_id {
                    1 => self.width = value as u16,
                    2 => *needle_colour = colour(value)?,
                    3 => *minimum_value = value,
                    4 => *maximum_value = value,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::OutputLinearBarGraph {
                minimum_value, maximum_value, colour: bar_colour, target_value, ..
            } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => *bar_colour = colour(value)?,
                4 => *minimum_value = value,
                5 => *maximum_value = value,
                6 => *target_value = value,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::OutputArchedBarGraph {
                minimum_value, maximum_value, colour: bar_colour, ..
            } => match attribute_id {
                1 => self.width = value as u16,
                2 => self.height = value as u16,
                3 => *bar_colour = colour(value)?,
                4 => *minimum_value = value,
                5 => *maximum_value = value,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::NumberVariable { value: current } => match attribute_id {
                1 => *current = value,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::FontAttributes { colour: font_colour, size, font_type, style } => {
                match attribute_id {
                    1 => *font_colour = colour(value)?,
                    2 => {
                        let byte = colour(value)?;
                        *size = FontSize::from_byte(byte).ok_or(AttributeError::InvalidValue)?;
                    }
                    3 => *font_type = colour(value)?,
                    4 => *style = colour(value)?,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::LineAttributes { colour: line_colour, width, art } => match attribute_id {
                1 => *line_colour = colour(value)?,
                2 => *width = colour(value)?,
                3 => *art = value as u16,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            ObjectKind::FillAttributes { fill_type, colour: fill_colour, pattern } => {
                match attribute_id {
                    1 => {
                        let byte = colour(value)?;
                        *fill_type = FillType::from_byte(byte).ok_or(AttributeError::InvalidValue)?;
                    }
                    2 => *fill_colour = colour(value)?,
                    3 => *pattern = value as u16,
                    _ => return Err(AttributeError::InvalidAttributeId),
                }
            }
            ObjectKind::ExternalObjectPointer {
                default_object_id,
                external_reference_name_id,
                external_object_id,
            } => match attribute_id {
                1 => *default_object_id = value as u16,
                2 => *external_reference_name_id = value as u16,
                3 => *external_object_id = value as u16,
                _ => return Err(AttributeError::InvalidAttributeId),
            },
            // String values change through Change String Value, the rest of
            // these types have no writable attributes.
            _ => return Err(AttributeError::InvalidAttributeId),
        }
        Ok(())
    }
}

/// Validate a byte-ranged attribute value.
fn colour(value: u32) -> Result<u8, AttributeError> {
    if value <= 0xFF {
        Ok(value as u8)
    } else {
        Err(AttributeError::InvalidValue)
    }
}

/// Validate a boolean attribute value.
fn flag(value: u32) -> Result<bool, AttributeError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(AttributeError::InvalidValue),
    }
}
