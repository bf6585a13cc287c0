//! Byte transport boundary and the double-buffered TX path.
//!
//! The engine never touches the wire itself. A [`Transport`] adapts whatever
//! moves the bytes (UART + DMA, USB-CDC, a pty, an in-memory pipe) to three
//! notions: a completed RX burst, a non-blocking transmission, and a
//! TX-complete flag. On a microcontroller the two poll methods read volatile
//! flags that the interrupt handlers set; nothing else may be done from
//! interrupt context.

use heapless::Vec;

use crate::constants::{FLUSH_TIMEOUT_MS, TX_BUFFER_SIZE};

pub mod loopback;

pub trait Transport {
    /// Copies a completed RX burst into `buf` and returns its length, or
    /// `None` while reception is still in progress. Bursts longer than `buf`
    /// are truncated; the packet parser treats the damage as reading-frame
    /// errors.
    fn poll_rx(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Discards any partially received bytes. The next burst is delivered
    /// from its first byte again.
    fn abort_receive(&mut self);

    /// Begins a non-blocking transmission of `bytes`. Callers must not start
    /// another transmission before [`poll_tx_complete`](Self::poll_tx_complete)
    /// reports completion.
    fn start_transmit(&mut self, bytes: &[u8]);

    /// Whether the last transmission has finished. `true` when idle.
    fn poll_tx_complete(&mut self) -> bool;

    /// Millisecond tick, used only to bound `flush()`.
    fn now_ms(&mut self) -> u32;
}

/// The two TX buffers. While one is handed to the transport, replies and
/// events are composed into the other; buffers swap when the composition
/// buffer cannot take a whole further packet.
pub(crate) struct TxComposer {
    bufs: [Vec<u8, TX_BUFFER_SIZE>; 2],
    /// Buffer currently owned by the transport. The other one is being
    /// composed into.
    active_dma: usize,
}

impl TxComposer {
    pub fn new() -> Self {
        Self {
            bufs: [Vec::new(), Vec::new()],
            active_dma: 0,
        }
    }

    fn composition_index(&self) -> usize {
        1 - self.active_dma
    }

    pub fn composition_buffer(&mut self) -> &mut Vec<u8, TX_BUFFER_SIZE> {
        let i = self.composition_index();
        &mut self.bufs[i]
    }

    /// Returns the composition buffer with at least `capacity` bytes free.
    ///
    /// If the current one is too full: wait for the in-flight transmission,
    /// clear the transmitted buffer, swap roles, hand the freshly composed
    /// buffer to the transport, and compose into the cleared one.
    pub fn request_capacity(
        &mut self,
        capacity: usize,
        transport: &mut dyn Transport,
    ) -> &mut Vec<u8, TX_BUFFER_SIZE> {
        debug_assert!(capacity <= TX_BUFFER_SIZE);
        let composing = self.composition_index();
        if self.bufs[composing].len() + capacity <= TX_BUFFER_SIZE {
            return &mut self.bufs[composing];
        }

        while !transport.poll_tx_complete() {}

        self.bufs[self.active_dma].clear();
        self.active_dma = composing;
        transport.start_transmit(&self.bufs[self.active_dma]);
        let i = self.composition_index();
        &mut self.bufs[i]
    }

    /// Starts transmitting anything composed so far. Requesting the whole
    /// buffer either finds the composition buffer empty (nothing to do) or
    /// forces a swap, which is exactly the transmission start.
    pub fn start_pending(&mut self, transport: &mut dyn Transport) {
        let _ = self.request_capacity(TX_BUFFER_SIZE, transport);
    }

    /// Pushes out pending packets and waits for the transport to drain,
    /// giving up after [`FLUSH_TIMEOUT_MS`]. A timeout is silent; the host
    /// has its own and will retry at a higher layer.
    pub fn flush(&mut self, transport: &mut dyn Transport) {
        self.start_pending(transport);
        let start = transport.now_ms();
        while !transport.poll_tx_complete() {
            if transport.now_ms().wrapping_sub(start) > FLUSH_TIMEOUT_MS {
                tracing::debug!("flush timed out waiting for TX-complete");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport whose transmissions complete only after a fixed number of
    /// completion polls, to exercise the buffer-swap wait.
    struct SlowTransport {
        sent: Vec<u8, 2048>,
        transmissions: usize,
        pending_polls: u32,
        ticks: u32,
    }

    impl SlowTransport {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                transmissions: 0,
                pending_polls: 0,
                ticks: 0,
            }
        }
    }

    impl Transport for SlowTransport {
        fn poll_rx(&mut self, _buf: &mut [u8]) -> Option<usize> {
            None
        }

        fn abort_receive(&mut self) {}

        fn start_transmit(&mut self, bytes: &[u8]) {
            assert!(self.pending_polls == 0, "transmit while busy");
            let _ = self.sent.extend_from_slice(bytes);
            self.transmissions += 1;
            self.pending_polls = 3;
        }

        fn poll_tx_complete(&mut self) -> bool {
            if self.pending_polls > 0 {
                self.pending_polls -= 1;
                return false;
            }
            true
        }

        fn now_ms(&mut self) -> u32 {
            self.ticks += 1;
            self.ticks
        }
    }

    #[test]
    fn composition_starts_in_second_buffer_and_swaps_when_full() {
        let mut tx = TxComposer::new();
        let mut transport = SlowTransport::new();

        let first = [0x11_u8; 300];
        let _ = tx
            .request_capacity(first.len(), &mut transport)
            .extend_from_slice(&first);
        assert_eq!(transport.transmissions, 0, "still composing");

        // No room for another 300 bytes: swap must transmit the first chunk.
        let second = [0x22_u8; 300];
        let _ = tx
            .request_capacity(second.len(), &mut transport)
            .extend_from_slice(&second);
        assert_eq!(transport.transmissions, 1);
        assert_eq!(&transport.sent[..], &first[..]);
    }

    #[test]
    fn start_pending_is_a_no_op_on_an_empty_buffer() {
        let mut tx = TxComposer::new();
        let mut transport = SlowTransport::new();
        tx.start_pending(&mut transport);
        assert_eq!(transport.transmissions, 0);
    }

    #[test]
    fn flush_transmits_and_drains() {
        let mut tx = TxComposer::new();
        let mut transport = SlowTransport::new();
        let _ = tx
            .request_capacity(4, &mut transport)
            .extend_from_slice(&[1, 2, 3, 4]);
        tx.flush(&mut transport);
        assert_eq!(&transport.sent[..], &[1, 2, 3, 4]);
        assert!(transport.poll_tx_complete());
    }

    #[test]
    fn buffers_alternate_across_swaps() {
        let mut tx = TxComposer::new();
        let mut transport = SlowTransport::new();
        for round in 0u8..4 {
            let chunk = [round; 300];
            let _ = tx
                .request_capacity(chunk.len(), &mut transport)
                .extend_from_slice(&chunk);
        }
        tx.flush(&mut transport);
        assert_eq!(transport.sent.len(), 4 * 300);
        for round in 0u8..4 {
            let at = round as usize * 300;
            assert_eq!(transport.sent[at], round);
        }
    }
}
