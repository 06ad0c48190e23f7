//! # Voice Stream
//!
//! Real-time voice audio streaming engine for a live bidirectional voice
//! connection.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── OUTBOUND ─────────────────────────────┐
//! │                                                                   │
//! │  ┌──────────────┐  s16le PCM  ┌──────────────┐  Frame             │
//! │  │ FrameSource  │────────────▶│ Player       │──────────┐         │
//! │  │ (ffmpeg)     │             │ reader thread│          │         │
//! │  └──────────────┘             └──────────────┘          ▼         │
//! │                                               ┌──────────────┐    │
//! │                                               │ FrameEncoder │    │
//! │                                               │ (Opus)       │    │
//! │                                               └──────┬───────┘    │
//! │                                                      │ Encoded    │
//! │                                                      ▼            │
//! │                                           connection send queue   │
//! └───────────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────── INBOUND ──────────────────────────────┐
//! │                                                                   │
//! │  connection receive queue ──▶ ┌──────────────┐ ──▶ DecodedFrame   │
//! │      (ssrc, opus bytes)       │ FrameDecoder │     output queue   │
//! │                               │ ssrc ▶ ctx   │                    │
//! │                               └──────────────┘                    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers are dedicated threads talking over bounded crossbeam channels.
//! [`backoff::BackoffPolicy`] supplies reconnect delays for whoever owns the
//! connection.

pub mod backoff;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod player;

pub use backoff::BackoffPolicy;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use frame::{DecodedFrame, EncodedFrame, Frame, InboundPacket, Ssrc};
pub use pipeline::{FrameDecoder, FrameEncoder, VoicePipeline};
pub use player::{Player, PlayerState};

/// Application-wide constants
pub mod constants {
    /// Sample rate of every frame on the wire
    pub const SAMPLE_RATE: u32 = 48000;

    /// Channel count (stereo)
    pub const CHANNELS: u16 = 2;

    /// Samples per channel in one 20 ms frame
    pub const FRAME_SIZE: usize = 960;

    /// Largest Opus packet we will produce
    pub const MAX_PACKET_SIZE: usize = 4000;

    /// Default capacity of the frame queues (in frames)
    pub const FRAME_QUEUE_CAPACITY: usize = 64;
}
