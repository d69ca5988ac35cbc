//! Decoded frames and the receive buffer they are extracted from.
//!
//! Every vendor codec produces the same transient [`Frame`] variants from its
//! own wire format, and buffered drivers own one [`FrameBuffer`] that inbound
//! notification bytes are appended to. Codecs consume exactly the bytes they
//! decoded from the front, so partial frames survive across notification
//! deliveries and malformed frames cannot pile up.

use bytes::{Buf, BytesMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One decoded protocol message, already normalized to host units.
///
/// Frames are produced transiently by a codec and consumed immediately by the
/// driver; they are never persisted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Frame {
    /// A weight reading in grams, sign already applied.
    Weight {
        /// Weight in grams.
        grams: f32,
    },
    /// A keep-alive acknowledgment from the scale.
    Heartbeat,
    /// A battery level report.
    Battery {
        /// Battery charge in percent.
        percent: u8,
    },
    /// A brew-timer report.
    Timer {
        /// Elapsed timer value in seconds.
        seconds: u32,
    },
    /// A flow-rate report (scales that differentiate pour rate).
    FlowRate {
        /// Flow rate in grams per second.
        grams_per_sec: f32,
    },
    /// A structurally valid frame the codec does not decode, such as a
    /// button press. Consumed so the buffer stays in sync.
    Unknown,
}

/// Growable receive buffer with explicit consume-from-front semantics.
///
/// Wraps [`BytesMut`] so drivers never slice past the valid length: reads go
/// through `as_slice()` and removal through [`consume`](Self::consume), which
/// clamps to the buffered length.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append inbound bytes to the back of the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// View the buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remove `n` bytes from the front, clamped to the buffered length.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Drop everything (vendors that discard the whole buffer on any decode).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
