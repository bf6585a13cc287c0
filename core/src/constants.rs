//! Protocol constants and the build-time configuration of the engine.
//!
//! Sizing knobs are the ones a firmware project pins in a private
//! configuration header; the `const` assertions reject values the wire
//! format cannot support.

/// Version literal returned by Meta/HdcVersion and embedded in the IDL-JSON.
pub const VERSION_STRING: &str = "HDC 1.0.0-alpha.12";

/// Literal byte closing every packet.
pub const PACKET_TERMINATOR: u8 = 0x1E;

/// PS byte + checksum + terminator.
pub const PACKET_OVERHEAD: usize = 3;

/// Largest payload a single packet can carry. A packet carrying exactly this
/// much signals that the message continues in the next packet.
pub const MAX_PACKET_PAYLOAD: usize = 255;

/// Reserved id of the mandatory Core feature.
pub const FEATURE_ID_CORE: u8 = 0x00;

/// Ids at or above this value are reserved for the engine, for message
/// types, commands, events, properties and exceptions alike.
pub const RESERVED_ID_FLOOR: u8 = 0xF0;

/// Largest request message accepted from a host. Requests must fit a single
/// packet, so this can never exceed 254.
pub const MAX_REQ_MESSAGE_SIZE: usize = 128;

/// Size of each of the two TX buffers. Anything smaller than a full packet
/// plus overhead would make multi-packet replies impossible.
pub const TX_BUFFER_SIZE: usize = 512;

/// The RX buffer holds exactly one max-size request packet.
pub const RX_BUFFER_SIZE: usize = MAX_REQ_MESSAGE_SIZE + PACKET_OVERHEAD;

/// Upper bound on `flush()` busy-waiting for the transport to drain.
pub const FLUSH_TIMEOUT_MS: u32 = 100;

/// Capacity of each engine-owned property value slot.
pub const PROPERTY_SLOT_SIZE: usize = 64;

/// Number of property value slots the engine reserves.
pub const MAX_VALUE_SLOTS: usize = 16;

/// Upper bound on registered features.
pub const MAX_FEATURES: usize = 8;

const _: () = assert!(MAX_REQ_MESSAGE_SIZE >= 5 && MAX_REQ_MESSAGE_SIZE <= 254);
const _: () = assert!(TX_BUFFER_SIZE >= MAX_PACKET_PAYLOAD + PACKET_OVERHEAD);
