//! The generic machinery behind `GetPropertyValue` / `SetPropertyValue`.
//!
//! Properties are looked up by id (application tables first, then the
//! reserved table), values are coerced between wire bytes and their declared
//! dtype, and reads after a successful write report the value that actually
//! stuck, which may differ from the requested one when a setter clamps.

use bytes::Buf;

use crate::constants::{MAX_VALUE_SLOTS, PROPERTY_SLOT_SIZE};
use crate::data_model::mandatory::MANDATORY_PROPERTIES;
use crate::data_model::{
    DataType, Feature, FeatureRuntime, Property, PropertyBacking, EXC_INVALID_ARGS,
    EXC_READ_ONLY_PROPERTY, EXC_UNKNOWN_PROPERTY,
};
use crate::message::CommandContext;

/// A property value serialized to wire bytes. 256 bytes is the protocol
/// bound: no id list nor slot-backed value can be larger.
pub type PropValue = heapless::Vec<u8, 256>;

/// The engine-owned arena backing `PropertyBacking::Storage` properties.
/// Slots hold raw little-endian value bytes, NUL-terminated for UTF-8.
pub struct ValueSlots {
    data: [[u8; PROPERTY_SLOT_SIZE]; MAX_VALUE_SLOTS],
}

impl ValueSlots {
    pub(crate) fn new() -> Self {
        Self {
            data: [[0; PROPERTY_SLOT_SIZE]; MAX_VALUE_SLOTS],
        }
    }

    pub fn raw(&self, slot: usize) -> &[u8; PROPERTY_SLOT_SIZE] {
        &self.data[slot]
    }

    pub fn raw_mut(&mut self, slot: usize) -> &mut [u8; PROPERTY_SLOT_SIZE] {
        &mut self.data[slot]
    }

    pub fn u8(&self, slot: usize) -> u8 {
        self.data[slot][0]
    }

    pub fn set_u8(&mut self, slot: usize, value: u8) {
        self.data[slot][0] = value;
    }

    pub fn u16(&self, slot: usize) -> u16 {
        (&self.data[slot][..]).get_u16_le()
    }

    pub fn u32(&self, slot: usize) -> u32 {
        (&self.data[slot][..]).get_u32_le()
    }

    pub fn f32(&self, slot: usize) -> f32 {
        (&self.data[slot][..]).get_f32_le()
    }
}

/// What a property getter sees.
pub struct PropContext<'e> {
    pub feature: &'static Feature,
    pub runtime: &'e FeatureRuntime,
    pub slots: &'e ValueSlots,
}

/// What a property setter sees.
pub struct PropContextMut<'e> {
    pub feature: &'static Feature,
    pub runtime: &'e mut FeatureRuntime,
    pub slots: &'e mut ValueSlots,
}

pub(crate) fn lookup(feature: &'static Feature, id: u8) -> Option<&'static Property> {
    feature
        .properties
        .iter()
        .find(|p| p.id == id)
        .or_else(|| MANDATORY_PROPERTIES.iter().find(|p| p.id == id))
}

/// Serializes the current value of a property.
pub(crate) fn read_value(prop: &Property, ctx: &PropContext<'_>) -> Result<PropValue, u8> {
    match &prop.backing {
        PropertyBacking::Computed { get, .. } => get(ctx),
        PropertyBacking::Storage {
            slot, value_size, ..
        } => {
            let data = ctx.slots.raw(*slot);
            let mut value = PropValue::new();
            match prop.dtype {
                DataType::Bool => {
                    let _ = value.push((data[0] != 0) as u8);
                }
                DataType::Utf8 => {
                    let text = &data[..*value_size];
                    let len = text.iter().position(|&b| b == 0).unwrap_or(text.len());
                    let _ = value.extend_from_slice(&text[..len]);
                }
                DataType::Blob => {
                    let _ = value.extend_from_slice(&data[..*value_size]);
                }
                fixed => {
                    // Validated at init: storage-backed fixed dtypes always
                    // have a width.
                    let width = fixed.fixed_size().unwrap_or(0);
                    let _ = value.extend_from_slice(&data[..width]);
                }
            }
            Ok(value)
        }
    }
}

/// Handler of the mandatory `GetPropertyValue` command (0xF0).
pub(crate) fn cmd_get_property_value(ctx: &mut CommandContext<'_>) {
    let request = ctx.request();
    if request.len() != 4 {
        return ctx.reply_error(&EXC_INVALID_ARGS);
    }
    let Some(prop) = lookup(ctx.feature(), request[3]) else {
        return ctx.reply_error(&EXC_UNKNOWN_PROPERTY);
    };
    match read_value(prop, &ctx.prop_context()) {
        Ok(value) => ctx.reply_blob(&value),
        Err(exc_id) => ctx.reply_error_id(exc_id),
    }
}

/// Handler of the mandatory `SetPropertyValue` command (0xF1).
pub(crate) fn cmd_set_property_value(ctx: &mut CommandContext<'_>) {
    let request = ctx.request();
    if request.len() < 4 {
        return ctx.reply_error(&EXC_INVALID_ARGS);
    }
    let Some(prop) = lookup(ctx.feature(), request[3]) else {
        return ctx.reply_error(&EXC_UNKNOWN_PROPERTY);
    };
    if prop.read_only {
        return ctx.reply_error(&EXC_READ_ONLY_PROPERTY);
    }

    let new_value = &request[4..];
    match prop.dtype.fixed_size() {
        Some(width) => {
            if new_value.len() != width {
                return ctx.reply_error(&EXC_INVALID_ARGS);
            }
        }
        None => {
            // One byte of the slot stays reserved for the NUL terminator.
            if let PropertyBacking::Storage { value_size, .. } = &prop.backing {
                if new_value.len() >= *value_size {
                    return ctx.reply_error(&EXC_INVALID_ARGS);
                }
            }
        }
    }

    match &prop.backing {
        PropertyBacking::Computed { set: Some(set), .. } => {
            if let Err(exc_id) = set(&mut ctx.prop_context_mut(), new_value) {
                return ctx.reply_error_id(exc_id);
            }
        }
        PropertyBacking::Computed { set: None, .. } => {
            // Unreachable past init validation.
            return ctx.reply_error(&EXC_READ_ONLY_PROPERTY);
        }
        PropertyBacking::Storage { slot, .. } => {
            let data = ctx.slots_mut().raw_mut(*slot);
            data[..new_value.len()].copy_from_slice(new_value);
            if prop.dtype == DataType::Utf8 {
                data[new_value.len()] = 0;
            }
        }
    }

    // The reply mirrors GetPropertyValue: the host learns the value that
    // actually took effect.
    match read_value(prop, &ctx.prop_context()) {
        Ok(value) => ctx.reply_blob(&value),
        Err(exc_id) => ctx.reply_error_id(exc_id),
    }
}
