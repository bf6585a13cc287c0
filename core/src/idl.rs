//! Streaming generator of the IDL-JSON self-description.
//!
//! The document describes the whole device surface so a host can generate
//! proxies without out-of-band knowledge. It is streamed fragment by
//! fragment into the packet writer and never materialized in RAM. Strings
//! are emitted unescaped; init-time validation guarantees descriptor
//! strings contain nothing that would need escaping.

use core::fmt::Write;

use crate::constants::MAX_REQ_MESSAGE_SIZE;
use crate::data_model::mandatory::{MANDATORY_COMMANDS, MANDATORY_EVENTS, MANDATORY_PROPERTIES};
use crate::data_model::{
    Arg, Command, Device, Event, Exc, Feature, Property, PropertyBacking, State,
};
use crate::packet::PacketWriter;

pub(crate) fn write_device(writer: &mut PacketWriter<'_>, device: &Device) {
    let mut json = Json { writer };
    json.raw("{");
    json.attr_str("version", device.version);
    json.raw(",");
    json.attr_uint("max_req", MAX_REQ_MESSAGE_SIZE as u32);
    json.raw(",");
    json.key("features");
    json.raw("[");
    for (i, feature) in device.features.iter().enumerate() {
        if i > 0 {
            json.raw(",");
        }
        json.feature(feature);
    }
    json.raw("]}");
}

struct Json<'j, 'w> {
    writer: &'j mut PacketWriter<'w>,
}

impl Json<'_, '_> {
    fn raw(&mut self, fragment: &str) {
        self.writer.feed(fragment.as_bytes());
    }

    fn quoted(&mut self, value: &str) {
        self.raw("\"");
        self.raw(value);
        self.raw("\"");
    }

    fn key(&mut self, name: &str) {
        self.quoted(name);
        self.raw(":");
    }

    fn attr_str(&mut self, name: &str, value: &str) {
        self.key(name);
        self.quoted(value);
    }

    fn attr_uint(&mut self, name: &str, value: u32) {
        self.key(name);
        let _ = write!(self.writer, "{value}");
    }

    fn attr_bool(&mut self, name: &str, value: bool) {
        self.key(name);
        self.raw(if value { "true" } else { "false" });
    }

    /// Absent descriptor fields are omitted, never emitted as `null`.
    fn opt_attr_str(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.raw(",");
            self.attr_str(name, value);
        }
    }

    fn feature(&mut self, feature: &Feature) {
        self.raw("{");
        self.attr_uint("id", feature.id as u32);
        self.raw(",");
        self.attr_str("name", feature.name);
        self.raw(",");
        self.attr_str("cls", feature.class_name);
        self.raw(",");
        self.attr_str("version", feature.class_version);
        self.opt_attr_str("doc", feature.doc);

        self.raw(",");
        self.key("states");
        self.raw("[");
        for (i, state) in feature.states.iter().enumerate() {
            if i > 0 {
                self.raw(",");
            }
            self.state(state);
        }
        self.raw("]");

        // The reserved surface is appended to each array, so the host sees
        // the mandatory commands, events and properties like any other.
        self.raw(",");
        self.key("commands");
        self.raw("[");
        let mut first = true;
        for command in feature.commands.iter().chain(&MANDATORY_COMMANDS) {
            if !first {
                self.raw(",");
            }
            first = false;
            self.command(command);
        }
        self.raw("]");

        self.raw(",");
        self.key("events");
        self.raw("[");
        let mut first = true;
        for event in feature.events.iter().chain(&MANDATORY_EVENTS) {
            if !first {
                self.raw(",");
            }
            first = false;
            self.event(event);
        }
        self.raw("]");

        self.raw(",");
        self.key("properties");
        self.raw("[");
        let mut first = true;
        for property in feature.properties.iter().chain(&MANDATORY_PROPERTIES) {
            if !first {
                self.raw(",");
            }
            first = false;
            self.property(property);
        }
        self.raw("]");

        self.raw("}");
    }

    fn state(&mut self, state: &State) {
        self.raw("{");
        self.attr_uint("id", state.id as u32);
        self.raw(",");
        self.attr_str("name", state.name);
        self.opt_attr_str("doc", state.doc);
        self.raw("}");
    }

    fn command(&mut self, command: &Command) {
        self.raw("{");
        self.attr_uint("id", command.id as u32);
        self.raw(",");
        self.attr_str("name", command.name);
        self.opt_attr_str("doc", command.doc);
        self.raw(",");
        self.args_array("args", command.args);
        self.raw(",");
        self.args_array("returns", command.returns);
        self.raw(",");
        self.key("raises");
        self.raw("[");
        for (i, exc) in command.raises.iter().enumerate() {
            if i > 0 {
                self.raw(",");
            }
            self.exc(exc);
        }
        self.raw("]");
        self.raw("}");
    }

    fn event(&mut self, event: &Event) {
        self.raw("{");
        self.attr_uint("id", event.id as u32);
        self.raw(",");
        self.attr_str("name", event.name);
        self.opt_attr_str("doc", event.doc);
        self.raw(",");
        self.args_array("args", event.args);
        self.raw("}");
    }

    fn args_array(&mut self, name: &str, args: &[Arg]) {
        self.key(name);
        self.raw("[");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.raw(",");
            }
            self.raw("{");
            self.attr_str("dtype", arg.dtype.name());
            self.opt_attr_str("name", arg.name);
            self.opt_attr_str("doc", arg.doc);
            self.raw("}");
        }
        self.raw("]");
    }

    fn exc(&mut self, exc: &Exc) {
        self.raw("{");
        self.attr_uint("id", exc.id as u32);
        self.raw(",");
        self.attr_str("name", exc.name);
        self.opt_attr_str("doc", exc.doc);
        self.raw("}");
    }

    fn property(&mut self, property: &Property) {
        self.raw("{");
        self.attr_uint("id", property.id as u32);
        self.raw(",");
        self.attr_str("name", property.name);
        self.raw(",");
        self.attr_str("dtype", property.dtype.name());
        if property.dtype.is_variable_size() {
            if let PropertyBacking::Storage { value_size, .. } = &property.backing {
                if *value_size > 0 {
                    self.raw(",");
                    self.attr_uint("size", *value_size as u32);
                }
            }
        }
        self.raw(",");
        self.attr_bool("ro", property.read_only);
        self.opt_attr_str("doc", property.doc);
        self.raw("}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PACKET_OVERHEAD;
    use crate::data_model::LogLevel;
    use crate::transport::loopback::LoopbackTransport;
    use crate::transport::TxComposer;

    static DEVICE: Device = Device {
        version: crate::constants::VERSION_STRING,
        features: &[Feature {
            id: 0x00,
            name: "core",
            class_name: "TestCore",
            class_version: "0.0.1",
            doc: Some("A bare core feature."),
            states: &[State {
                id: 0,
                name: "OFF",
                doc: None,
            }],
            commands: &[],
            properties: &[],
            events: &[],
            api: None,
            initial_state: 0,
            initial_log_threshold: LogLevel::Info,
        }],
    };

    fn generated_json() -> serde_json::Value {
        let mut tx = TxComposer::new();
        let mut transport = LoopbackTransport::new();
        let mut writer = PacketWriter::begin(&mut tx, &mut transport);
        write_device(&mut writer, &DEVICE);
        writer.end();
        tx.flush(&mut transport);

        // Reassemble the multi-packet stream into one message.
        let stream = transport.host_receive();
        let mut message = vec![];
        let mut rest = stream.as_slice();
        loop {
            let ps = rest[0] as usize;
            message.extend_from_slice(&rest[1..1 + ps]);
            rest = &rest[ps + PACKET_OVERHEAD..];
            if ps < 255 {
                break;
            }
        }
        serde_json::from_slice(&message).expect("generator must stream valid JSON")
    }

    #[test]
    fn document_has_the_expected_shape() {
        let doc = generated_json();
        assert_eq!(doc["version"], crate::constants::VERSION_STRING);
        assert_eq!(doc["max_req"], MAX_REQ_MESSAGE_SIZE as u64);
        let feature = &doc["features"][0];
        assert_eq!(feature["id"], 0);
        assert_eq!(feature["cls"], "TestCore");
        assert_eq!(feature["states"][0]["name"], "OFF");
    }

    #[test]
    fn mandatory_surface_is_appended() {
        let doc = generated_json();
        let feature = &doc["features"][0];
        let names: Vec<&str> = feature["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["GetPropertyValue", "SetPropertyValue"]);

        let events: Vec<&str> = feature["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(events, vec!["Log", "FeatureStateTransition"]);

        let props: Vec<&str> = feature["properties"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            props,
            vec![
                "LogEventThreshold",
                "FeatureState",
                "AvailableCommands",
                "AvailableEvents",
                "AvailableProperties"
            ]
        );
    }

    #[test]
    fn log_event_args_use_snake_case_wire_names() {
        let doc = generated_json();
        let log = &doc["features"][0]["events"][0];
        assert_eq!(log["args"][0]["name"], "log_level");
        assert_eq!(log["args"][1]["name"], "log_msg");
    }

    #[test]
    fn absent_fields_are_omitted_not_null() {
        let doc = generated_json();
        let get_cmd = &doc["features"][0]["commands"][0];
        // GetPropertyValue's return value has no name.
        assert!(get_cmd["returns"][0].get("name").is_none());
        assert_eq!(get_cmd["returns"][0]["dtype"], "BLOB");
    }
}
