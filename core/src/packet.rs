//! Wire framing.
//!
//! A packet is `[PS][payload…][CHK][TERM]`: a one-byte payload size, up to
//! 255 payload bytes, an additive two's-complement checksum over PS and the
//! payload, and the literal terminator `0x1E`. A logical message is the
//! concatenation of consecutive packet payloads; a payload of exactly 255
//! bytes means the message continues, anything shorter ends it, and a
//! message sized at an exact multiple of 255 is closed by an empty packet.

use crate::constants::{
    MAX_PACKET_PAYLOAD, MAX_REQ_MESSAGE_SIZE, PACKET_OVERHEAD, PACKET_TERMINATOR,
};
use crate::transport::{Transport, TxComposer};

/// Why a byte sequence cannot be a packet at its current alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// PS exceeds the largest request this device accepts.
    Oversized,
    /// The byte after the payload and checksum is not `0x1E`.
    MissingTerminator,
    /// PS, payload and checksum do not fold to zero.
    BadChecksum,
}

/// Inspects `chunk` for a packet starting at offset zero.
///
/// `Ok(Some(len))` is a whole packet of `len` bytes, `Ok(None)` means more
/// bytes are needed, and `Err` flags a reading-frame error at this
/// alignment.
fn packet_at(chunk: &[u8]) -> Result<Option<usize>, FrameError> {
    let ps = chunk[0] as usize;
    if ps > MAX_REQ_MESSAGE_SIZE {
        return Err(FrameError::Oversized);
    }
    if ps + PACKET_OVERHEAD > chunk.len() {
        return Ok(None);
    }
    if chunk[ps + 2] != PACKET_TERMINATOR {
        return Err(FrameError::MissingTerminator);
    }
    let folded = chunk[..ps + 2]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    if folded != 0 {
        return Err(FrameError::BadChecksum);
    }
    Ok(Some(ps + PACKET_OVERHEAD))
}

/// Scans the RX buffer for a single request packet.
///
/// Recovers from reading-frame errors by advancing one byte and retrying.
/// Returns the packet slice, if any, and the number of frame errors seen.
/// Bytes beyond a recognized packet are counted as frame errors as well:
/// hosts must not send another request before receiving a reply.
pub fn parse_packet(buf: &[u8]) -> (Option<&[u8]>, u16) {
    let mut errors: u16 = 0;
    let mut offset = 0;
    while buf.len() - offset >= PACKET_OVERHEAD {
        let chunk = &buf[offset..];
        match packet_at(chunk) {
            Ok(Some(len)) => {
                errors += (chunk.len() - len) as u16;
                return (Some(&chunk[..len]), errors);
            }
            Ok(None) => return (None, errors),
            Err(e) => {
                tracing::trace!(?e, offset, "reading-frame error");
                offset += 1;
                errors += 1;
            }
        }
    }
    (None, errors)
}

/// Streaming packetizer for messages whose size is not known up front,
/// e.g. the IDL-JSON reply.
///
/// Construction opens the first packet, [`feed`](Self::feed) appends payload
/// and closes packets as they fill up, and [`end`](Self::end) consumes the
/// writer while closing the last one. Packets are written straight into the
/// TX composition buffer; the PS byte of a packet is populated only once the
/// packet is complete, so a buffer handed to the transport never contains a
/// half-written packet.
pub struct PacketWriter<'a> {
    tx: &'a mut TxComposer,
    transport: &'a mut dyn Transport,
    pkt_start: usize,
    payload_len: usize,
}

impl<'a> PacketWriter<'a> {
    pub(crate) fn begin(tx: &'a mut TxComposer, transport: &'a mut dyn Transport) -> Self {
        let mut writer = Self {
            tx,
            transport,
            pkt_start: 0,
            payload_len: 0,
        };
        writer.open_packet();
        writer
    }

    /// Reserves room for one full packet, swapping TX buffers if necessary,
    /// and stakes out the PS byte of a fresh packet.
    fn open_packet(&mut self) {
        let buf = self
            .tx
            .request_capacity(MAX_PACKET_PAYLOAD + PACKET_OVERHEAD, self.transport);
        self.pkt_start = buf.len();
        let _ = buf.push(0);
        self.payload_len = 0;
    }

    /// Appends payload bytes, splitting into further packets at 255 bytes.
    pub fn feed(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = MAX_PACKET_PAYLOAD - self.payload_len;
            let take = room.min(data.len());
            // Room for a whole packet was reserved by open_packet().
            let _ = self.tx.composition_buffer().extend_from_slice(&data[..take]);
            self.payload_len += take;
            data = &data[take..];
            if self.payload_len == MAX_PACKET_PAYLOAD {
                self.close_packet();
                self.open_packet();
            }
        }
    }

    /// Writes PS, checksum and terminator around the accumulated payload.
    fn close_packet(&mut self) {
        let ps = self.payload_len as u8;
        let buf = self.tx.composition_buffer();
        buf[self.pkt_start] = ps;
        let folded = buf[self.pkt_start..]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        let _ = buf.push(folded.wrapping_neg());
        let _ = buf.push(PACKET_TERMINATOR);
    }

    /// Closes the message. A message that filled its last packet to exactly
    /// 255 bytes gets the empty packet that terminates it, because
    /// [`feed`](Self::feed) has already opened the next (still empty) one.
    pub fn end(mut self) {
        self.close_packet();
    }
}

impl core::fmt::Write for PacketWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.feed(s.as_bytes());
        Ok(())
    }
}
