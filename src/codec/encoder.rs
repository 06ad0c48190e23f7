//! Opus encoder wrapper

use bytes::Bytes;
use opus::{Application, Encoder};

use super::{opus_channels, Encode};
use crate::config::{CodecApplication, CodecConfig};
use crate::constants::MAX_PACKET_SIZE;
use crate::error::CodecError;
use crate::frame::{EncodedFrame, Frame};

/// Opus encoder configured for one outbound stream
pub struct OpusEncoder {
    encoder: Encoder,
    config: CodecConfig,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    pub fn new(config: CodecConfig) -> Result<Self, CodecError> {
        let channels = opus_channels(config.channels).ok_or_else(|| {
            CodecError::EncoderInit(format!("Unsupported channel count: {}", config.channels))
        })?;

        let application = match config.application {
            CodecApplication::Voip => Application::Voip,
            CodecApplication::Audio => Application::Audio,
            CodecApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = Encoder::new(config.sample_rate, channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &config)?;

        Ok(Self {
            encoder,
            config,
            encode_buffer: vec![0u8; MAX_PACKET_SIZE],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &CodecConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| {
                    CodecError::EncoderInit(format!("Failed to set packet loss: {}", e))
                })?;
        }

        Ok(())
    }

    /// Get the codec configuration
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Total interleaved samples expected per frame
    pub fn samples_per_frame(&self) -> usize {
        self.config.samples_per_frame()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}

impl Encode for OpusEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, CodecError> {
        if frame.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(frame.len()));
        }

        let size = self
            .encoder
            .encode(frame.samples(), &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(EncodedFrame::new(Bytes::copy_from_slice(
            &self.encode_buffer[..size],
        )))
    }
}
