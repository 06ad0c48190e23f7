//! Audio frame types and the queues that carry them
//!
//! Frames are immutable once built and move between workers by value over
//! bounded crossbeam channels, which deliver in submission order.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

/// Synchronisation source identifier distinguishing senders on one connection
pub type Ssrc = u32;

/// One fixed-length chunk of interleaved 16-bit PCM
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Arc<[i16]>,
}

impl Frame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// A frame of `len` zero samples
    pub fn silence(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Build a frame from little-endian s16 bytes; a trailing odd byte is ignored
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples)
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Total sample count across all channels
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples per channel
    pub fn samples_per_channel(&self, channels: u16) -> usize {
        self.samples.len() / channels.max(1) as usize
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self, channels: u16, sample_rate: u32) -> u64 {
        (self.samples_per_channel(channels) as u64 * 1_000_000) / sample_rate as u64
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.len()).finish()
    }
}

/// One compressed frame, produced and consumed whole
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Bytes);

impl EncodedFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw packet bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hand the packet to a transport without copying
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A compressed packet received from the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub ssrc: Ssrc,
    pub sequence: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Decoded PCM attributed to the sender it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub ssrc: Ssrc,
    pub sequence: u16,
    pub timestamp: u32,
    pub frame: Frame,
}

/// Raw frame queue feeding the encoder
pub fn frame_queue(capacity: usize) -> (Sender<Frame>, Receiver<Frame>) {
    bounded(capacity)
}
