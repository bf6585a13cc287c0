//! The reserved surface every feature exposes: two commands, two events and
//! five properties. Hosts rely on these without consulting the IDL, which is
//! why their ids all live above [`RESERVED_ID_FLOOR`](crate::constants::RESERVED_ID_FLOOR).

use crate::data_model::{
    Arg, Command, DataType, Event, LogLevel, Property, PropertyBacking, EXC_READ_ONLY_PROPERTY,
    EXC_UNKNOWN_PROPERTY,
};
use crate::property::{self, PropContext, PropContextMut, PropValue};

pub const CMD_ID_GET_PROPERTY_VALUE: u8 = 0xF0;
pub const CMD_ID_SET_PROPERTY_VALUE: u8 = 0xF1;

pub const EVENT_ID_LOG: u8 = 0xF0;
pub const EVENT_ID_FEATURE_STATE_TRANSITION: u8 = 0xF1;

pub const PROP_ID_LOG_EVENT_THRESHOLD: u8 = 0xF0;
pub const PROP_ID_FEATURE_STATE: u8 = 0xF1;
pub const PROP_ID_AVAILABLE_COMMANDS: u8 = 0xF2;
pub const PROP_ID_AVAILABLE_EVENTS: u8 = 0xF3;
pub const PROP_ID_AVAILABLE_PROPERTIES: u8 = 0xF4;

pub static MANDATORY_COMMANDS: [Command; 2] = [
    Command {
        id: CMD_ID_GET_PROPERTY_VALUE,
        name: "GetPropertyValue",
        doc: Some("(UINT8 property_id) -> value in the property's dtype"),
        args: &[Arg {
            dtype: DataType::Uint8,
            name: Some("property_id"),
            doc: None,
        }],
        returns: &[Arg {
            dtype: DataType::Blob,
            name: None,
            doc: None,
        }],
        raises: &[&EXC_UNKNOWN_PROPERTY],
        handler: property::cmd_get_property_value,
    },
    Command {
        id: CMD_ID_SET_PROPERTY_VALUE,
        name: "SetPropertyValue",
        doc: Some(
            "(UINT8 property_id, BLOB new_value) -> the value that actually took effect, \
             which may differ from the requested one, e.g. after clamping or discretisation",
        ),
        args: &[
            Arg {
                dtype: DataType::Uint8,
                name: Some("property_id"),
                doc: None,
            },
            Arg {
                dtype: DataType::Blob,
                name: Some("new_value"),
                doc: None,
            },
        ],
        returns: &[Arg {
            dtype: DataType::Blob,
            name: Some("actual_new_value"),
            doc: None,
        }],
        raises: &[&EXC_UNKNOWN_PROPERTY, &EXC_READ_ONLY_PROPERTY],
        handler: property::cmd_set_property_value,
    },
];

pub static MANDATORY_EVENTS: [Event; 2] = [
    Event {
        id: EVENT_ID_LOG,
        name: "Log",
        doc: Some("Software logging. Log-levels match Python's logging module."),
        args: &[
            Arg {
                dtype: DataType::Uint8,
                name: Some("log_level"),
                doc: None,
            },
            Arg {
                dtype: DataType::Utf8,
                name: Some("log_msg"),
                doc: None,
            },
        ],
    },
    Event {
        id: EVENT_ID_FEATURE_STATE_TRANSITION,
        name: "FeatureStateTransition",
        doc: Some("Notifies the host about transitions of this feature's state-machine."),
        args: &[
            Arg {
                dtype: DataType::Uint8,
                name: Some("previous_state_id"),
                doc: None,
            },
            Arg {
                dtype: DataType::Uint8,
                name: Some("current_state_id"),
                doc: None,
            },
        ],
    },
];

pub static MANDATORY_PROPERTIES: [Property; 5] = [
    Property {
        id: PROP_ID_LOG_EVENT_THRESHOLD,
        name: "LogEventThreshold",
        dtype: DataType::Uint8,
        read_only: false,
        backing: PropertyBacking::Computed {
            get: log_event_threshold_get,
            set: Some(log_event_threshold_set),
        },
        doc: Some("Suppresses Log-events with lower log-levels."),
    },
    Property {
        id: PROP_ID_FEATURE_STATE,
        name: "FeatureState",
        dtype: DataType::Uint8,
        read_only: true,
        backing: PropertyBacking::Computed {
            get: feature_state_get,
            set: None,
        },
        doc: Some("Current state of this feature's state-machine."),
    },
    Property {
        id: PROP_ID_AVAILABLE_COMMANDS,
        name: "AvailableCommands",
        dtype: DataType::Blob,
        read_only: true,
        backing: PropertyBacking::Computed {
            get: available_commands_get,
            set: None,
        },
        doc: Some("List of IDs of commands available on this feature."),
    },
    Property {
        id: PROP_ID_AVAILABLE_EVENTS,
        name: "AvailableEvents",
        dtype: DataType::Blob,
        read_only: true,
        backing: PropertyBacking::Computed {
            get: available_events_get,
            set: None,
        },
        doc: Some("List of IDs of events available on this feature."),
    },
    Property {
        id: PROP_ID_AVAILABLE_PROPERTIES,
        name: "AvailableProperties",
        dtype: DataType::Blob,
        read_only: true,
        backing: PropertyBacking::Computed {
            get: available_properties_get,
            set: None,
        },
        doc: Some("List of IDs of properties available on this feature."),
    },
];

fn single_byte(value: u8) -> PropValue {
    let mut v = PropValue::new();
    let _ = v.push(value);
    v
}

fn log_event_threshold_get(ctx: &PropContext<'_>) -> Result<PropValue, u8> {
    Ok(single_byte(ctx.runtime.log_event_threshold))
}

/// Custom log-levels are disallowed for the same reason Python's logging
/// documentation discourages them, so anything the host sends is clamped to
/// [10, 50] and rounded to the nearest multiple of ten.
fn log_event_threshold_set(ctx: &mut PropContextMut<'_>, value: &[u8]) -> Result<(), u8> {
    let clamped = value[0].clamp(LogLevel::Debug as u8, LogLevel::Critical as u8);
    ctx.runtime.log_event_threshold = (clamped + 5) / 10 * 10;
    Ok(())
}

fn feature_state_get(ctx: &PropContext<'_>) -> Result<PropValue, u8> {
    Ok(single_byte(ctx.runtime.feature_state))
}

// The id lists below are assembled in a fixed scratch array: there can never
// be more than 256 ids per feature.

fn available_commands_get(ctx: &PropContext<'_>) -> Result<PropValue, u8> {
    let mut ids = [0u8; 256];
    let mut n = 0;
    for command in ctx.feature.commands {
        ids[n] = command.id;
        n += 1;
    }
    for command in &MANDATORY_COMMANDS {
        ids[n] = command.id;
        n += 1;
    }
    Ok(PropValue::from_slice(&ids[..n]).unwrap_or_default())
}

fn available_events_get(ctx: &PropContext<'_>) -> Result<PropValue, u8> {
    let mut ids = [0u8; 256];
    let mut n = 0;
    for event in ctx.feature.events {
        ids[n] = event.id;
        n += 1;
    }
    for event in &MANDATORY_EVENTS {
        ids[n] = event.id;
        n += 1;
    }
    Ok(PropValue::from_slice(&ids[..n]).unwrap_or_default())
}

fn available_properties_get(ctx: &PropContext<'_>) -> Result<PropValue, u8> {
    let mut ids = [0u8; 256];
    let mut n = 0;
    for property in ctx.feature.properties {
        ids[n] = property.id;
        n += 1;
    }
    for property in &MANDATORY_PROPERTIES {
        ids[n] = property.id;
        n += 1;
    }
    Ok(PropValue::from_slice(&ids[..n]).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{Feature, FeatureRuntime};
    use crate::property::ValueSlots;

    static FEATURE: Feature = Feature {
        id: 0x00,
        name: "core",
        class_name: "TestCore",
        class_version: "0.0.1",
        doc: None,
        states: &[],
        commands: &[],
        properties: &[],
        events: &[],
        api: None,
        initial_state: 0,
        initial_log_threshold: LogLevel::Info,
    };

    fn rounded(input: u8) -> u8 {
        let mut runtime = FeatureRuntime {
            feature_state: 0,
            log_event_threshold: 20,
        };
        let mut slots = ValueSlots::new();
        let mut ctx = PropContextMut {
            feature: &FEATURE,
            runtime: &mut runtime,
            slots: &mut slots,
        };
        log_event_threshold_set(&mut ctx, &[input]).unwrap();
        runtime.log_event_threshold
    }

    #[test]
    fn threshold_rounds_to_nearest_multiple_of_ten() {
        assert_eq!(rounded(42), 40);
        assert_eq!(rounded(45), 50);
        assert_eq!(rounded(44), 40);
        assert_eq!(rounded(10), 10);
        assert_eq!(rounded(50), 50);
    }

    #[test]
    fn threshold_clamps_into_the_python_range() {
        assert_eq!(rounded(0), 10);
        assert_eq!(rounded(3), 10);
        assert_eq!(rounded(255), 50);
    }

    #[test]
    fn threshold_always_lands_on_a_known_level() {
        for input in 0..=255u8 {
            let out = rounded(input);
            assert!(matches!(out, 10 | 20 | 30 | 40 | 50), "input {input} -> {out}");
            let clamped = input.clamp(10, 50);
            assert!(out.abs_diff(clamped) <= 5, "input {input} -> {out}");
        }
    }

    #[test]
    fn empty_feature_still_reports_the_reserved_ids() {
        let runtime = FeatureRuntime {
            feature_state: 0,
            log_event_threshold: 20,
        };
        let slots = ValueSlots::new();
        let ctx = PropContext {
            feature: &FEATURE,
            runtime: &runtime,
            slots: &slots,
        };
        let commands = available_commands_get(&ctx).unwrap();
        assert_eq!(&commands[..], &[0xF0, 0xF1]);
        let events = available_events_get(&ctx).unwrap();
        assert_eq!(&events[..], &[0xF0, 0xF1]);
        let properties = available_properties_get(&ctx).unwrap();
        assert_eq!(&properties[..], &[0xF0, 0xF1, 0xF2, 0xF3, 0xF4]);
    }
}
