//! The message layer: routing of incoming requests and composition of
//! replies.
//!
//! A message's first byte selects its class. The reserved classes are
//! handled here; ids below the reserved floor can be delegated to an
//! application-defined router. Hosts never push unsolicited Event messages,
//! so that direction is rejected.

use num::FromPrimitive;

use crate::constants::{MAX_REQ_MESSAGE_SIZE, RESERVED_ID_FLOOR};
use crate::data_model::mandatory::MANDATORY_COMMANDS;
use crate::data_model::{
    Device, Exc, Feature, FeatureRuntime, LogLevel, EXC_ID_NO_ERROR, EXC_UNKNOWN_COMMAND,
    EXC_UNKNOWN_FEATURE,
};
use crate::event;
use crate::idl;
use crate::packet::PacketWriter;
use crate::property::{PropContext, PropContextMut, ValueSlots};
use crate::transport::{Transport, TxComposer};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MessageType {
    Meta = 0xF0,
    Echo = 0xF1,
    Command = 0xF2,
    Event = 0xF3,
}

/// Second byte of a Meta request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MetaId {
    HdcVersion = 0xF0,
    MaxReq = 0xF1,
    IdlJson = 0xF2,
}

/// Application hook for message classes below the reserved floor. Returns
/// whether the message was handled.
pub type CustomMessageHandler = fn(&mut MessageContext<'_>, &[u8]) -> bool;

/// Everything the dispatch path needs, split out of the engine handle so
/// that the borrow of the RX buffer stays independent.
pub(crate) struct EngineCtx<'e> {
    pub device: &'static Device,
    pub tx: &'e mut TxComposer,
    pub transport: &'e mut dyn Transport,
    pub runtime: &'e mut [FeatureRuntime],
    pub slots: &'e mut ValueSlots,
    pub custom_router: Option<CustomMessageHandler>,
}

impl EngineCtx<'_> {
    /// Best-effort Log event through the Core feature.
    pub(crate) fn log_core(&mut self, level: LogLevel, text: &str) {
        event::emit_log(
            self.tx,
            self.transport,
            self.device.features[0].id,
            self.runtime[0].log_event_threshold,
            level,
            text,
        );
    }
}

/// Composes one message from its pieces, packetizing as needed.
pub(crate) fn compose_message(
    tx: &mut TxComposer,
    transport: &mut dyn Transport,
    pieces: &[&[u8]],
) {
    let mut writer = PacketWriter::begin(tx, transport);
    for piece in pieces {
        writer.feed(piece);
    }
    writer.end();
}

/// Command reply carrying an exception id and an optional UTF-8 description.
/// The reply header mirrors the request header.
pub(crate) fn command_error(
    tx: &mut TxComposer,
    transport: &mut dyn Transport,
    request: &[u8],
    exc_id: u8,
    description: Option<&str>,
) {
    let header = [MessageType::Command as u8, request[1], request[2], exc_id];
    let text = description.map(str::as_bytes).unwrap_or_default();
    compose_message(tx, transport, &[&header, text]);
}

/// Successful command reply with a payload.
pub(crate) fn command_reply(
    tx: &mut TxComposer,
    transport: &mut dyn Transport,
    request: &[u8],
    payload: &[u8],
) {
    let header = [
        MessageType::Command as u8,
        request[1],
        request[2],
        EXC_ID_NO_ERROR,
    ];
    compose_message(tx, transport, &[&header, payload]);
}

/// Routes one received message.
pub(crate) fn process_message(ctx: &mut EngineCtx<'_>, msg: &[u8]) {
    if msg.is_empty() {
        // Legal, currently without purpose.
        return;
    }
    match MessageType::from_u8(msg[0]) {
        Some(MessageType::Meta) => meta_reply(ctx, msg),
        Some(MessageType::Echo) => {
            compose_message(ctx.tx, ctx.transport, &[msg]);
        }
        Some(MessageType::Command) => {
            if msg.len() < 3 {
                ctx.log_core(LogLevel::Error, "Malformed command request");
                return;
            }
            dispatch_command(ctx, msg);
        }
        Some(MessageType::Event) => {
            // Hosts have no business sending events.
            ctx.log_core(LogLevel::Error, "Unknown message type");
        }
        None => {
            if msg[0] < RESERVED_ID_FLOOR {
                if let Some(router) = ctx.custom_router {
                    let mut mctx = MessageContext {
                        tx: &mut *ctx.tx,
                        transport: &mut *ctx.transport,
                    };
                    if router(&mut mctx, msg) {
                        return;
                    }
                }
            }
            tracing::debug!(message_type = msg[0], "unroutable message");
            ctx.log_core(LogLevel::Error, "Unknown message type");
        }
    }
}

/// Meta requests are self-description queries. Anything malformed (missing
/// MetaID, an unknown one, trailing payload) is echoed back verbatim so the
/// host can recognize an unsupported query, with a best-effort ERROR log
/// alongside.
fn meta_reply(ctx: &mut EngineCtx<'_>, msg: &[u8]) {
    if msg.len() == 2 {
        match MetaId::from_u8(msg[1]) {
            Some(MetaId::HdcVersion) => {
                compose_message(
                    ctx.tx,
                    ctx.transport,
                    &[msg, ctx.device.version.as_bytes()],
                );
                return;
            }
            Some(MetaId::MaxReq) => {
                let max_req = (MAX_REQ_MESSAGE_SIZE as u32).to_le_bytes();
                compose_message(ctx.tx, ctx.transport, &[msg, &max_req]);
                return;
            }
            Some(MetaId::IdlJson) => {
                let mut writer = PacketWriter::begin(ctx.tx, ctx.transport);
                writer.feed(msg);
                idl::write_device(&mut writer, ctx.device);
                writer.end();
                return;
            }
            None => {}
        }
    }
    compose_message(ctx.tx, ctx.transport, &[msg]);
    ctx.log_core(LogLevel::Error, "Malformed Meta request");
}

fn dispatch_command(ctx: &mut EngineCtx<'_>, msg: &[u8]) {
    let feature_id = msg[1];
    let command_id = msg[2];

    let Some(feature_index) = ctx
        .device
        .features
        .iter()
        .position(|f| f.id == feature_id)
    else {
        command_error(ctx.tx, ctx.transport, msg, EXC_UNKNOWN_FEATURE.id, None);
        return;
    };
    let feature = &ctx.device.features[feature_index];

    let command = feature
        .commands
        .iter()
        .find(|c| c.id == command_id)
        .or_else(|| MANDATORY_COMMANDS.iter().find(|c| c.id == command_id));
    let Some(command) = command else {
        command_error(ctx.tx, ctx.transport, msg, EXC_UNKNOWN_COMMAND.id, None);
        return;
    };

    let mut cctx = CommandContext {
        request: msg,
        feature,
        runtime: &mut ctx.runtime[feature_index],
        slots: &mut *ctx.slots,
        tx: &mut *ctx.tx,
        transport: &mut *ctx.transport,
    };
    (command.handler)(&mut cctx);
}

/// What a command handler works with: the raw request, its feature, and
/// every way of answering. Each handler code path must finish through
/// exactly one `reply_*` call.
pub struct CommandContext<'e> {
    request: &'e [u8],
    feature: &'static Feature,
    runtime: &'e mut FeatureRuntime,
    slots: &'e mut ValueSlots,
    tx: &'e mut TxComposer,
    transport: &'e mut (dyn Transport + 'e),
}

impl<'e> CommandContext<'e> {
    /// Full request message, `[0xF2][feature_id][command_id][args…]`.
    pub fn request(&self) -> &'e [u8] {
        self.request
    }

    /// Argument bytes following the three header bytes.
    pub fn args(&self) -> &'e [u8] {
        &self.request[3..]
    }

    pub fn feature(&self) -> &'static Feature {
        self.feature
    }

    pub fn feature_state(&self) -> u8 {
        self.runtime.feature_state
    }

    pub fn slots(&self) -> &ValueSlots {
        &*self.slots
    }

    pub fn slots_mut(&mut self) -> &mut ValueSlots {
        &mut *self.slots
    }

    pub(crate) fn prop_context(&self) -> PropContext<'_> {
        PropContext {
            feature: self.feature,
            runtime: &*self.runtime,
            slots: &*self.slots,
        }
    }

    pub(crate) fn prop_context_mut(&mut self) -> PropContextMut<'_> {
        PropContextMut {
            feature: self.feature,
            runtime: &mut *self.runtime,
            slots: &mut *self.slots,
        }
    }

    /// Reply of a command that returns nothing.
    pub fn reply_void(&mut self) {
        self.reply_blob(&[]);
    }

    pub fn reply_error(&mut self, exc: &Exc) {
        self.reply_error_id(exc.id);
    }

    pub fn reply_error_id(&mut self, exc_id: u8) {
        command_error(self.tx, self.transport, self.request, exc_id, None);
    }

    /// Failure reply with a human-readable detail for the host's exception.
    pub fn reply_error_with_description(&mut self, exc: &Exc, description: &str) {
        command_error(
            self.tx,
            self.transport,
            self.request,
            exc.id,
            Some(description),
        );
    }

    pub fn reply_blob(&mut self, payload: &[u8]) {
        command_reply(self.tx, self.transport, self.request, payload);
    }

    pub fn reply_bool(&mut self, value: bool) {
        self.reply_blob(&[value as u8]);
    }

    pub fn reply_u8(&mut self, value: u8) {
        self.reply_blob(&[value]);
    }

    pub fn reply_u16(&mut self, value: u16) {
        self.reply_blob(&value.to_le_bytes());
    }

    pub fn reply_u32(&mut self, value: u32) {
        self.reply_blob(&value.to_le_bytes());
    }

    pub fn reply_i8(&mut self, value: i8) {
        self.reply_blob(&value.to_le_bytes());
    }

    pub fn reply_i16(&mut self, value: i16) {
        self.reply_blob(&value.to_le_bytes());
    }

    pub fn reply_i32(&mut self, value: i32) {
        self.reply_blob(&value.to_le_bytes());
    }

    pub fn reply_f32(&mut self, value: f32) {
        self.reply_blob(&value.to_le_bytes());
    }

    pub fn reply_f64(&mut self, value: f64) {
        self.reply_blob(&value.to_le_bytes());
    }

    /// String replies omit any terminator; the message length carries the
    /// string length.
    pub fn reply_str(&mut self, value: &str) {
        self.reply_blob(value.as_bytes());
    }

    /// Moves this feature's state-machine and notifies the host. Emitted
    /// after the reply when called past a `reply_*`, which is the documented
    /// pattern for commands like `reset`.
    pub fn transition_state(&mut self, new_state: u8) {
        event::state_transition(
            self.tx,
            self.transport,
            self.feature.id,
            self.runtime,
            new_state,
        );
    }

    /// Emits a custom event of this feature.
    pub fn emit_event(&mut self, event_id: u8, prefix: &[u8], suffix: &[u8]) {
        event::emit(
            self.tx,
            self.transport,
            self.feature.id,
            event_id,
            prefix,
            suffix,
        );
    }

    /// Emits a Log event of this feature, subject to its threshold.
    pub fn log(&mut self, level: LogLevel, text: &str) {
        event::emit_log(
            self.tx,
            self.transport,
            self.feature.id,
            self.runtime.log_event_threshold,
            level,
            text,
        );
    }

    /// Pushes out everything composed so far and waits for the wire to
    /// drain. Commands that reset the device call this after their reply.
    pub fn flush(&mut self) {
        self.tx.flush(self.transport);
    }
}

/// Handed to the custom message router.
pub struct MessageContext<'e> {
    tx: &'e mut TxComposer,
    transport: &'e mut (dyn Transport + 'e),
}

impl MessageContext<'_> {
    /// Composes one reply message from its pieces.
    pub fn send_message(&mut self, pieces: &[&[u8]]) {
        compose_message(self.tx, self.transport, pieces);
    }
}
