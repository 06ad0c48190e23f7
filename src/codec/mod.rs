//! Opus codec wrapper
//!
//! The pipeline workers only see the [`Encode`] and [`Decode`] traits, so
//! the codec stays a swappable black box.

pub mod decoder;
pub mod encoder;

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;

use crate::error::CodecError;
use crate::frame::{EncodedFrame, Frame};

/// Stateful frame compressor
pub trait Encode: Send {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, CodecError>;
}

/// Stateful packet decompressor, one per sender
pub trait Decode: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<Frame, CodecError>;
}

fn opus_channels(channels: u16) -> Option<opus::Channels> {
    match channels {
        1 => Some(opus::Channels::Mono),
        2 => Some(opus::Channels::Stereo),
        _ => None,
    }
}
