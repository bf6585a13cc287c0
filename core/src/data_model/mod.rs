//! The introspected object model.
//!
//! A device is a flat, immutable table of features; each feature owns tables
//! of states, commands, properties and events, all keyed by one-byte ids.
//! Descriptors are `'static` so application code can declare them as plain
//! `static` tables, the same way the firmware this protocol grew up on kept
//! them in flash. The only mutable per-feature data lives in
//! [`FeatureRuntime`], owned by the engine.

use thiserror::Error;

use crate::constants::{
    FEATURE_ID_CORE, MAX_FEATURES, MAX_VALUE_SLOTS, PROPERTY_SLOT_SIZE, RESERVED_ID_FLOOR,
};
use crate::message::CommandContext;
use crate::property::{PropContext, PropContextMut, PropValue};

pub mod mandatory;

/// Data-type ids carry their own layout: the upper nibble classifies the
/// kind, the lower nibble is the byte width, and a lower nibble of `0xF`
/// marks a variable-width type.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DataType {
    Uint8 = 0x01,
    Uint16 = 0x02,
    Uint32 = 0x04,
    Int8 = 0x11,
    Int16 = 0x12,
    Int32 = 0x14,
    Float = 0x24,
    Double = 0x28,
    Utf8 = 0xAF,
    Bool = 0xB1,
    Blob = 0xBF,
    Dtype = 0xD1,
}

impl DataType {
    pub const fn is_variable_size(self) -> bool {
        (self as u8) & 0x0F == 0x0F
    }

    /// Byte width of fixed-width types, from the lower nibble of the id.
    pub const fn fixed_size(self) -> Option<usize> {
        if self.is_variable_size() {
            None
        } else {
            Some(((self as u8) & 0x0F) as usize)
        }
    }

    /// Uppercase name used in the IDL-JSON.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Uint32 => "UINT32",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Utf8 => "UTF8",
            DataType::Bool => "BOOL",
            DataType::Blob => "BLOB",
            DataType::Dtype => "DTYPE",
        }
    }
}

/// Same numeric log-levels as Python's `logging` module.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive)]
pub enum LogLevel {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

/// A typed command failure. Id 0x00 is reserved to mean "no error", ids
/// 0xF0 and above belong to the engine.
#[derive(Debug)]
pub struct Exc {
    pub id: u8,
    pub name: &'static str,
    pub doc: Option<&'static str>,
}

pub const EXC_ID_NO_ERROR: u8 = 0x00;

/// Declared but never raised by the engine itself; reserved for
/// application command handlers.
pub const EXC_COMMAND_FAILED: Exc = Exc {
    id: 0xF0,
    name: "CommandFailed",
    doc: None,
};
pub const EXC_UNKNOWN_FEATURE: Exc = Exc {
    id: 0xF1,
    name: "UnknownFeature",
    doc: None,
};
pub const EXC_UNKNOWN_COMMAND: Exc = Exc {
    id: 0xF2,
    name: "UnknownCommand",
    doc: None,
};
pub const EXC_INVALID_ARGS: Exc = Exc {
    id: 0xF3,
    name: "InvalidArgs",
    doc: None,
};
pub const EXC_NOT_NOW: Exc = Exc {
    id: 0xF4,
    name: "NotNow",
    doc: Some("Command supported, but not allowed in the feature's current state."),
};
pub const EXC_UNKNOWN_PROPERTY: Exc = Exc {
    id: 0xF5,
    name: "UnknownProperty",
    doc: None,
};
pub const EXC_READ_ONLY_PROPERTY: Exc = Exc {
    id: 0xF6,
    name: "ReadOnlyProperty",
    doc: None,
};

/// Argument or return-value descriptor of a command or event.
#[derive(Debug)]
pub struct Arg {
    pub dtype: DataType,
    pub name: Option<&'static str>,
    pub doc: Option<&'static str>,
}

/// One named state of a feature's state-machine.
#[derive(Debug)]
pub struct State {
    pub id: u8,
    pub name: &'static str,
    pub doc: Option<&'static str>,
}

pub type CommandHandler = fn(&mut CommandContext<'_>);

pub struct Command {
    pub id: u8,
    pub name: &'static str,
    pub doc: Option<&'static str>,
    /// At most four of each, checked at init.
    pub args: &'static [Arg],
    pub returns: &'static [Arg],
    pub raises: &'static [&'static Exc],
    pub handler: CommandHandler,
}

#[derive(Debug)]
pub struct Event {
    pub id: u8,
    pub name: &'static str,
    pub doc: Option<&'static str>,
    pub args: &'static [Arg],
}

pub type PropertyGetter = fn(&PropContext<'_>) -> Result<PropValue, u8>;
pub type PropertySetter = fn(&mut PropContextMut<'_>, &[u8]) -> Result<(), u8>;

/// What answers reads and writes of a property: either a pair of callbacks,
/// or one of the engine-owned value slots.
pub enum PropertyBacking {
    Computed {
        get: PropertyGetter,
        set: Option<PropertySetter>,
    },
    Storage {
        /// Index into the engine's value-slot arena.
        slot: usize,
        /// Capacity for variable-width dtypes (one byte of it is kept for
        /// the NUL terminator of UTF-8 values). Ignored for fixed-width
        /// dtypes, whose width comes from the type id.
        value_size: usize,
        /// Initial slot contents, copied in at engine construction.
        init: &'static [u8],
    },
}

pub struct Property {
    pub id: u8,
    pub name: &'static str,
    pub dtype: DataType,
    pub read_only: bool,
    pub backing: PropertyBacking,
    pub doc: Option<&'static str>,
}

pub struct Feature {
    pub id: u8,
    pub name: &'static str,
    pub class_name: &'static str,
    pub class_version: &'static str,
    pub doc: Option<&'static str>,
    pub states: &'static [State],
    pub commands: &'static [Command],
    pub properties: &'static [Property],
    pub events: &'static [Event],
    /// Opaque handle for command handlers and getters that need access to
    /// application state beyond the value slots.
    pub api: Option<&'static (dyn core::any::Any + Send + Sync)>,
    pub initial_state: u8,
    pub initial_log_threshold: LogLevel,
}

pub struct Device {
    /// Returned by Meta/HdcVersion and embedded in the IDL-JSON.
    pub version: &'static str,
    /// Core (id 0x00) first, by convention.
    pub features: &'static [Feature],
}

/// The two mutable per-feature slots. Everything else is immutable once the
/// engine is constructed.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRuntime {
    pub feature_state: u8,
    pub log_event_threshold: u8,
}

/// Descriptor-integrity failures. These are programming errors in the
/// application's tables and are surfaced when the engine is constructed,
/// never at request time.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("the Core feature (id 0x00) must come first in the feature list")]
    MissingCoreFeature,
    #[error("device declares more than {} features", MAX_FEATURES)]
    TooManyFeatures,
    #[error("duplicate feature id 0x{0:02X}")]
    DuplicateFeatureId(u8),
    #[error("duplicate {kind} id 0x{id:02X} within feature 0x{feature:02X}")]
    DuplicateId {
        feature: u8,
        kind: &'static str,
        id: u8,
    },
    #[error("{kind} id 0x{id:02X} on feature 0x{feature:02X} lies in the range reserved for the engine")]
    ReservedId {
        feature: u8,
        kind: &'static str,
        id: u8,
    },
    #[error("exception id 0x{0:02X} is not usable by application commands")]
    InvalidExceptionId(u8),
    #[error("{kind} of command/event 0x{id:02X} on feature 0x{feature:02X} exceed the limit of 4")]
    TooManyValues {
        feature: u8,
        kind: &'static str,
        id: u8,
    },
    #[error("property 0x{property:02X} on feature 0x{feature:02X} is malformed: {reason}")]
    MalformedProperty {
        feature: u8,
        property: u8,
        reason: &'static str,
    },
    #[error("descriptor string {0:?} contains characters that are unsafe for the IDL")]
    UnsafeString(&'static str),
}

/// Rejects descriptor strings the IDL-JSON generator cannot emit, since it
/// intentionally does not escape.
fn check_str(s: &'static str) -> Result<(), InitError> {
    if s.chars().any(|c| c == '"' || c == '\\' || (c as u32) < 0x20) {
        return Err(InitError::UnsafeString(s));
    }
    Ok(())
}

fn check_opt_str(s: Option<&'static str>) -> Result<(), InitError> {
    s.map_or(Ok(()), check_str)
}

fn check_unique(
    ids: impl Iterator<Item = u8> + Clone,
    feature: u8,
    kind: &'static str,
) -> Result<(), InitError> {
    let mut seen = [false; 256];
    for id in ids {
        if seen[id as usize] {
            return Err(InitError::DuplicateId { feature, kind, id });
        }
        seen[id as usize] = true;
    }
    Ok(())
}

fn check_args(
    args: &[Arg],
    feature: u8,
    id: u8,
    kind: &'static str,
) -> Result<(), InitError> {
    if args.len() > 4 {
        return Err(InitError::TooManyValues { feature, kind, id });
    }
    for arg in args {
        check_opt_str(arg.name)?;
        check_opt_str(arg.doc)?;
    }
    Ok(())
}

fn check_exc(exc: &Exc) -> Result<(), InitError> {
    // Reserved exceptions 0xF0..=0xF6 may be referenced in `raises` lists;
    // anything else above the floor, and the "no error" id, may not.
    if exc.id == EXC_ID_NO_ERROR
        || (exc.id >= RESERVED_ID_FLOOR && exc.id > EXC_READ_ONLY_PROPERTY.id)
    {
        return Err(InitError::InvalidExceptionId(exc.id));
    }
    check_str(exc.name)?;
    check_opt_str(exc.doc)
}

fn check_property(prop: &Property, feature: u8) -> Result<(), InitError> {
    let malformed = |reason| InitError::MalformedProperty {
        feature,
        property: prop.id,
        reason,
    };
    check_str(prop.name)?;
    check_opt_str(prop.doc)?;
    match &prop.backing {
        PropertyBacking::Computed { set, .. } => {
            if !prop.read_only && set.is_none() {
                return Err(malformed("writable computed property lacks a setter"));
            }
            if prop.read_only && set.is_some() {
                return Err(malformed("read-only property declares a setter"));
            }
        }
        PropertyBacking::Storage {
            slot,
            value_size,
            init,
        } => {
            if *slot >= MAX_VALUE_SLOTS {
                return Err(malformed("storage slot index out of range"));
            }
            match prop.dtype.fixed_size() {
                Some(width) => {
                    if !init.is_empty() && init.len() != width {
                        return Err(malformed("initial value does not match the dtype width"));
                    }
                }
                None => {
                    if *value_size == 0 {
                        return Err(malformed("variable-width storage needs value_size > 0"));
                    }
                    if *value_size > PROPERTY_SLOT_SIZE {
                        return Err(malformed("value_size exceeds the slot capacity"));
                    }
                    let cap = if prop.dtype == DataType::Utf8 {
                        *value_size - 1
                    } else {
                        *value_size
                    };
                    if init.len() > cap {
                        return Err(malformed("initial value does not fit the slot"));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Full integrity check of a device's descriptor tables.
pub fn validate(device: &Device) -> Result<(), InitError> {
    check_str(device.version)?;
    if device.features.first().map(|f| f.id) != Some(FEATURE_ID_CORE) {
        return Err(InitError::MissingCoreFeature);
    }
    if device.features.len() > MAX_FEATURES {
        return Err(InitError::TooManyFeatures);
    }
    let mut seen = [false; 256];
    for feature in device.features {
        if seen[feature.id as usize] {
            return Err(InitError::DuplicateFeatureId(feature.id));
        }
        seen[feature.id as usize] = true;

        check_str(feature.name)?;
        check_str(feature.class_name)?;
        check_str(feature.class_version)?;
        check_opt_str(feature.doc)?;

        check_unique(feature.states.iter().map(|s| s.id), feature.id, "state")?;
        check_unique(feature.commands.iter().map(|c| c.id), feature.id, "command")?;
        check_unique(feature.events.iter().map(|e| e.id), feature.id, "event")?;
        check_unique(
            feature.properties.iter().map(|p| p.id),
            feature.id,
            "property",
        )?;

        for state in feature.states {
            check_str(state.name)?;
            check_opt_str(state.doc)?;
        }
        for command in feature.commands {
            if command.id >= RESERVED_ID_FLOOR {
                return Err(InitError::ReservedId {
                    feature: feature.id,
                    kind: "command",
                    id: command.id,
                });
            }
            check_str(command.name)?;
            check_opt_str(command.doc)?;
            check_args(command.args, feature.id, command.id, "args")?;
            check_args(command.returns, feature.id, command.id, "returns")?;
            for exc in command.raises {
                check_exc(exc)?;
            }
        }
        for event in feature.events {
            if event.id >= RESERVED_ID_FLOOR {
                return Err(InitError::ReservedId {
                    feature: feature.id,
                    kind: "event",
                    id: event.id,
                });
            }
            check_str(event.name)?;
            check_opt_str(event.doc)?;
            check_args(event.args, feature.id, event.id, "args")?;
        }
        for property in feature.properties {
            if property.id >= RESERVED_ID_FLOOR {
                return Err(InitError::ReservedId {
                    feature: feature.id,
                    kind: "property",
                    id: property.id,
                });
            }
            check_property(property, feature.id)?;
        }
    }
    Ok(())
}
