//! Device-side engine for the Host–Device Communication (HDC) protocol.
//!
//! HDC lets a host discover a device's features, commands, properties and
//! events over a byte-oriented serial link, invoke commands, read and write
//! properties, and receive asynchronous events and log lines. This crate is
//! the engine a device builds on: the packet framer, the message router, the
//! introspected descriptor model and the property/event machinery. The
//! application supplies static descriptor tables and a [`Transport`], then
//! pumps [`HdcDevice::work`] from its super-loop.
//!
//! The engine allocates nothing after construction; all buffers and runtime
//! state are fixed-size.

#[macro_use]
extern crate num_derive;

pub mod constants;
pub mod data_model;
mod event;
mod idl;
pub mod message;
pub mod packet;
pub mod property;
pub mod transport;

use constants::{FEATURE_ID_CORE, RX_BUFFER_SIZE};
use heapless::Vec;
use message::EngineCtx;
use property::ValueSlots;
use transport::TxComposer;

pub use data_model::{
    Arg, Command, DataType, Device, Event, Exc, Feature, FeatureRuntime, InitError, LogLevel,
    Property, PropertyBacking, State, EXC_COMMAND_FAILED, EXC_INVALID_ARGS, EXC_NOT_NOW,
    EXC_READ_ONLY_PROPERTY, EXC_UNKNOWN_COMMAND, EXC_UNKNOWN_FEATURE, EXC_UNKNOWN_PROPERTY,
};
pub use message::{CommandContext, CustomMessageHandler, MessageContext, MessageType, MetaId};
pub use transport::Transport;

/// The protocol engine. One per device; owns the RX buffer, both TX buffers,
/// the per-feature runtime slots and the property value arena.
pub struct HdcDevice<T: Transport> {
    transport: T,
    device: &'static Device,
    custom_router: Option<CustomMessageHandler>,
    tx: TxComposer,
    rx_buf: [u8; RX_BUFFER_SIZE],
    rx_len: usize,
    runtime: Vec<FeatureRuntime, { constants::MAX_FEATURES }>,
    slots: ValueSlots,
}

impl<T: Transport> HdcDevice<T> {
    /// Validates the descriptor tables and brings the engine into its
    /// running state. Descriptor mistakes surface here, never at request
    /// time.
    pub fn new(transport: T, device: &'static Device) -> Result<Self, InitError> {
        Self::build(transport, device, None)
    }

    /// Like [`new`](Self::new), with a router for application-defined
    /// message classes (MessageTypeIDs below 0xF0).
    pub fn with_custom_router(
        transport: T,
        device: &'static Device,
        router: CustomMessageHandler,
    ) -> Result<Self, InitError> {
        Self::build(transport, device, Some(router))
    }

    fn build(
        transport: T,
        device: &'static Device,
        custom_router: Option<CustomMessageHandler>,
    ) -> Result<Self, InitError> {
        data_model::validate(device)?;

        let mut runtime = Vec::new();
        let mut slots = ValueSlots::new();
        for feature in device.features {
            let _ = runtime.push(FeatureRuntime {
                feature_state: feature.initial_state,
                log_event_threshold: feature.initial_log_threshold as u8,
            });
            for property in feature.properties {
                if let PropertyBacking::Storage { slot, init, .. } = &property.backing {
                    slots.raw_mut(*slot)[..init.len()].copy_from_slice(init);
                }
            }
        }

        tracing::debug!(features = device.features.len(), "hdc engine running");
        Ok(Self {
            transport,
            device,
            custom_router,
            tx: TxComposer::new(),
            rx_buf: [0; RX_BUFFER_SIZE],
            rx_len: 0,
            runtime,
            slots,
        })
    }

    /// One iteration of the engine, to be called from the application's
    /// super-loop: parse and dispatch a received request if one completed,
    /// then start transmitting anything composed but not yet on the wire.
    pub fn work(&mut self) {
        if let Some(n) = self.transport.poll_rx(&mut self.rx_buf[self.rx_len..]) {
            self.rx_len = (self.rx_len + n).min(RX_BUFFER_SIZE);
            self.process_rx();
        }
        if self.transport.poll_tx_complete() {
            self.tx.start_pending(&mut self.transport);
        }
    }

    fn process_rx(&mut self) {
        let Self {
            transport,
            device,
            custom_router,
            tx,
            rx_buf,
            rx_len,
            runtime,
            slots,
        } = self;

        let (packet, frame_errors) = packet::parse_packet(&rx_buf[..*rx_len]);
        let restart = packet.is_some() || frame_errors > 0;
        if restart {
            // The host may not send again before our reply, so the next
            // packet can safely start at buffer offset zero.
            transport.abort_receive();
        }

        let mut ctx = EngineCtx {
            device: *device,
            tx,
            transport: &mut *transport,
            runtime: &mut runtime[..],
            slots,
            custom_router: *custom_router,
        };
        if let Some(pkt) = packet {
            let ps = pkt[0] as usize;
            message::process_message(&mut ctx, &pkt[1..1 + ps]);
        }
        if frame_errors > 0 {
            tracing::warn!(frame_errors, "reading-frame errors while parsing request");
            ctx.log_core(
                LogLevel::Warning,
                "Reading-frame-errors detected while parsing request message on device.",
            );
        }
        if restart {
            *rx_len = 0;
        }
    }

    /// Pushes out pending packets and waits for the transport to drain,
    /// bounded by [`constants::FLUSH_TIMEOUT_MS`].
    pub fn flush(&mut self) {
        self.tx.flush(&mut self.transport);
    }

    /// Emits an event of the given feature; `None` addresses Core. Payload
    /// may come as two chunks. Events of unknown features are dropped.
    pub fn emit_event(
        &mut self,
        feature_id: Option<u8>,
        event_id: u8,
        prefix: &[u8],
        suffix: &[u8],
    ) {
        let Some(index) = self.feature_index(feature_id) else {
            tracing::warn!(?feature_id, "event of unknown feature dropped");
            return;
        };
        event::emit(
            &mut self.tx,
            &mut self.transport,
            self.device.features[index].id,
            event_id,
            prefix,
            suffix,
        );
    }

    /// Emits a Log event, unless the feature's threshold filters it out.
    pub fn emit_log(&mut self, feature_id: Option<u8>, level: LogLevel, text: &str) {
        let Some(index) = self.feature_index(feature_id) else {
            return;
        };
        event::emit_log(
            &mut self.tx,
            &mut self.transport,
            self.device.features[index].id,
            self.runtime[index].log_event_threshold,
            level,
            text,
        );
    }

    /// Moves a feature's state-machine and emits the transition event.
    /// Transitions into the current state do nothing.
    pub fn set_feature_state(&mut self, feature_id: Option<u8>, new_state: u8) {
        let Some(index) = self.feature_index(feature_id) else {
            return;
        };
        event::state_transition(
            &mut self.tx,
            &mut self.transport,
            self.device.features[index].id,
            &mut self.runtime[index],
            new_state,
        );
    }

    pub fn feature_state(&self, feature_id: u8) -> Option<u8> {
        let index = self.feature_index(Some(feature_id))?;
        Some(self.runtime[index].feature_state)
    }

    pub fn log_event_threshold(&self, feature_id: u8) -> Option<u8> {
        let index = self.feature_index(Some(feature_id))?;
        Some(self.runtime[index].log_event_threshold)
    }

    /// The value arena behind `PropertyBacking::Storage` properties, for
    /// application code that shares state with the host this way.
    pub fn slots(&self) -> &ValueSlots {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut ValueSlots {
        &mut self.slots
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn feature_index(&self, feature_id: Option<u8>) -> Option<usize> {
        let id = feature_id.unwrap_or(FEATURE_ID_CORE);
        self.device.features.iter().position(|f| f.id == id)
    }
}
