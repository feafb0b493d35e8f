//! # M365 Stream Parser
//!
//! Reassembles notification fragments into complete M365 frames.
//!
//! Notifications arrive in chunks of any size with boundaries that can split a
//! frame anywhere, so the parser keeps one bounded accumulation buffer across
//! calls. It resynchronizes on the two-byte header alone: a `55 AA` pair inside
//! payload bytes can start a bogus frame. Checksum verification is optional and
//! off by default.

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use super::checksum::verify_frame;
use super::protocol::*;

/// Counters for framing events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Complete frames handed out
    pub frames: u64,

    /// Partial frames dropped because the second header byte did not match
    pub header_resyncs: u64,

    /// Resets caused by the accumulation buffer reaching its bound
    pub overflows: u64,

    /// Complete frames dropped by checksum verification
    pub checksum_failures: u64,
}

/// Incremental frame reassembler
#[derive(Debug)]
pub struct StreamParser {
    buffer: BytesMut,
    verify_checksum: bool,
    stats: ParserStats,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Create a parser that accepts frames without checking their checksum
    pub fn new() -> Self {
        Self::with_checksum_verification(false)
    }

    /// Create a parser, optionally dropping frames whose checksum mismatches
    pub fn with_checksum_verification(verify_checksum: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(M365_RX_BUFFER_CAPACITY),
            verify_checksum,
            stats: ParserStats::default(),
        }
    }

    /// Feed a notification chunk, returning every frame it completes in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<InboundFrame> {
        chunk.iter().filter_map(|&byte| self.push_byte(byte)).collect()
    }

    /// Feed a single byte
    ///
    /// # Returns
    ///
    /// * `Option<InboundFrame>` - The frame this byte completed, if any
    pub fn push_byte(&mut self, byte: u8) -> Option<InboundFrame> {
        match self.buffer.len() {
            0 if byte != M365_HEADER_0 => return None,
            1 if byte != M365_HEADER_1 => {
                self.buffer.clear();
                self.stats.header_resyncs += 1;
                trace!("Header mismatch (0x{:02X}), resyncing", byte);

                // The rejected byte may itself open the next frame
                if byte == M365_HEADER_0 {
                    self.buffer.put_u8(byte);
                }
                return None;
            }
            _ => {}
        }

        self.buffer.put_u8(byte);

        if self.buffer.len() >= 4 {
            let expected = self.buffer[M365_LENGTH_OFFSET] as usize + M365_FRAME_OVERHEAD;
            if self.buffer.len() >= expected {
                return self.complete_frame();
            }
        }

        if self.buffer.len() >= M365_RX_BUFFER_CAPACITY {
            debug!(
                "Receive buffer reached {} bytes without a complete frame, resetting",
                M365_RX_BUFFER_CAPACITY
            );
            self.buffer.clear();
            self.stats.overflows += 1;
        }

        None
    }

    /// Split the buffered bytes off as one frame and reset to empty
    fn complete_frame(&mut self) -> Option<InboundFrame> {
        let raw = self.buffer.split().freeze();
        self.buffer.reserve(M365_RX_BUFFER_CAPACITY);

        if self.verify_checksum && !verify_frame(&raw) {
            self.stats.checksum_failures += 1;
            debug!("Dropping frame with bad checksum: {:02X?}", &raw[..]);
            return None;
        }

        let declared_len = raw[M365_LENGTH_OFFSET];
        let register = (declared_len > 1).then(|| raw[M365_REGISTER_OFFSET]);
        let payload = if declared_len >= 2 {
            raw.slice(M365_PAYLOAD_OFFSET..raw.len() - 2)
        } else {
            raw.slice(0..0)
        };

        self.stats.frames += 1;

        Some(InboundFrame {
            address: raw[M365_ADDRESS_OFFSET],
            command: raw[M365_COMMAND_OFFSET],
            register,
            declared_len,
            payload,
        })
    }

    /// Drop any partially accumulated frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }
}
