//! Opus decoder wrapper

use opus::Decoder;

use super::{opus_channels, Decode};
use crate::config::CodecConfig;
use crate::error::CodecError;
use crate::frame::Frame;

/// Opus decoder for a single sender's stream
pub struct OpusDecoder {
    decoder: Decoder,
    channels: u16,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
}

impl OpusDecoder {
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        let channels = opus_channels(config.channels).ok_or_else(|| {
            CodecError::DecoderInit(format!("Unsupported channel count: {}", config.channels))
        })?;

        let decoder = Decoder::new(config.sample_rate, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // Room for the longest Opus packet: 120 ms
        let max_samples = config.sample_rate as usize * 120 / 1000 * config.channels as usize;

        Ok(Self {
            decoder,
            channels: config.channels,
            decode_buffer: vec![0i16; max_samples],
            frames_decoded: 0,
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }
}

impl Decode for OpusDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Frame, CodecError> {
        if packet.is_empty() {
            // Opus treats an empty packet as loss concealment; inbound
            // payloads must carry data.
            return Err(CodecError::DecodingFailed("empty packet".to_string()));
        }

        let per_channel = self
            .decoder
            .decode(packet, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total = per_channel * self.channels as usize;
        self.frames_decoded += 1;

        Ok(Frame::new(self.decode_buffer[..total].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encode, OpusEncoder};

    #[test]
    fn test_decoder_creation() {
        assert!(OpusDecoder::new(&CodecConfig::default()).is_ok());
    }

    #[test]
    fn test_decodes_full_frame() {
        let config = CodecConfig::default();
        let mut encoder = OpusEncoder::new(config.clone()).unwrap();
        let mut decoder = OpusDecoder::new(&config).unwrap();

        // 440 Hz tone, same in both channels
        let samples: Vec<i16> = (0..config.frame_size)
            .flat_map(|i| {
                let t = i as f32 / config.sample_rate as f32;
                let v = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16;
                [v, v]
            })
            .collect();

        let encoded = encoder.encode(&Frame::new(samples)).unwrap();
        let decoded = decoder.decode(encoded.as_bytes()).unwrap();

        assert_eq!(decoded.len(), config.samples_per_frame());
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn test_empty_packet_is_rejected() {
        let mut decoder = OpusDecoder::new(&CodecConfig::default()).unwrap();
        assert!(matches!(
            decoder.decode(&[]),
            Err(CodecError::DecodingFailed(_))
        ));
    }
}
