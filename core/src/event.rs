//! Event emission: the asynchronous device→host path.
//!
//! Everything here composes `[0xF3][feature_id][event_id][payload…]` through
//! the packet writer into the TX buffers, where replies and events share the
//! same ordering.

use crate::data_model::mandatory::{EVENT_ID_FEATURE_STATE_TRANSITION, EVENT_ID_LOG};
use crate::data_model::{FeatureRuntime, LogLevel};
use crate::message::MessageType;
use crate::packet::PacketWriter;
use crate::transport::{Transport, TxComposer};

/// Emits an event message. The payload may arrive in two chunks, which
/// handlers often find convenient (a fixed prefix plus variable text).
pub(crate) fn emit(
    tx: &mut TxComposer,
    transport: &mut dyn Transport,
    feature_id: u8,
    event_id: u8,
    prefix: &[u8],
    suffix: &[u8],
) {
    let mut writer = PacketWriter::begin(tx, transport);
    writer.feed(&[MessageType::Event as u8, feature_id, event_id]);
    writer.feed(prefix);
    writer.feed(suffix);
    writer.end();
}

/// Emits a Log event, unless the feature's threshold filters it out.
pub(crate) fn emit_log(
    tx: &mut TxComposer,
    transport: &mut dyn Transport,
    feature_id: u8,
    threshold: u8,
    level: LogLevel,
    text: &str,
) {
    if (level as u8) < threshold {
        return;
    }
    emit(
        tx,
        transport,
        feature_id,
        EVENT_ID_LOG,
        &[level as u8],
        text.as_bytes(),
    );
}

/// Updates a feature's state and notifies the host. Transitions into the
/// current state are no-ops and emit nothing.
pub(crate) fn state_transition(
    tx: &mut TxComposer,
    transport: &mut dyn Transport,
    feature_id: u8,
    runtime: &mut FeatureRuntime,
    new_state: u8,
) {
    if new_state == runtime.feature_state {
        return;
    }
    let previous = runtime.feature_state;
    runtime.feature_state = new_state;
    emit(
        tx,
        transport,
        feature_id,
        EVENT_ID_FEATURE_STATE_TRANSITION,
        &[previous],
        &[new_state],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackTransport;

    fn emitted(f: impl FnOnce(&mut TxComposer, &mut LoopbackTransport)) -> Vec<u8> {
        let mut tx = TxComposer::new();
        let mut transport = LoopbackTransport::new();
        f(&mut tx, &mut transport);
        tx.flush(&mut transport);
        transport.host_receive()
    }

    #[test]
    fn log_below_threshold_is_dropped() {
        let bytes = emitted(|tx, transport| {
            emit_log(tx, transport, 0x00, 30, LogLevel::Info, "quiet");
        });
        assert!(bytes.is_empty());
    }

    #[test]
    fn log_at_threshold_is_emitted() {
        let bytes = emitted(|tx, transport| {
            emit_log(tx, transport, 0x00, 30, LogLevel::Warning, "hi");
        });
        // One packet: [PS][0xF3][0x00][0xF0][30]['h']['i'][CHK][TERM]
        assert_eq!(bytes[0], 6);
        assert_eq!(&bytes[1..7], &[0xF3, 0x00, 0xF0, 30, b'h', b'i']);
    }

    #[test]
    fn same_state_transition_is_a_no_op() {
        let mut runtime = FeatureRuntime {
            feature_state: 2,
            log_event_threshold: 20,
        };
        let bytes = emitted(|tx, transport| {
            state_transition(tx, transport, 0x00, &mut runtime, 2);
        });
        assert!(bytes.is_empty());
        assert_eq!(runtime.feature_state, 2);
    }

    #[test]
    fn transition_updates_state_then_reports_both() {
        let mut runtime = FeatureRuntime {
            feature_state: 1,
            log_event_threshold: 20,
        };
        let bytes = emitted(|tx, transport| {
            state_transition(tx, transport, 0x00, &mut runtime, 2);
        });
        assert_eq!(runtime.feature_state, 2);
        assert_eq!(&bytes[1..6], &[0xF3, 0x00, 0xF1, 1, 2]);
    }
}
