//! Encoder and decoder workers for one voice connection

pub mod decode;
pub mod encode;

pub use decode::{DecoderExit, DecoderStats, FrameDecoder};
pub use encode::{EncoderExit, EncoderStats, FrameEncoder};

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::codec::{Decode, Encode, OpusDecoder, OpusEncoder};
use crate::config::EngineConfig;
use crate::error::{CodecError, Result};
use crate::frame::{frame_queue, DecodedFrame, EncodedFrame, InboundPacket, Ssrc};
use crate::player::{FfmpegSource, FrameSource, Player, SpeakingSignal};

/// Final statistics of a shut down pipeline
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub encoder: EncoderStats,
    pub decoder: DecoderStats,
}

/// Player, encoder and decoder bound to one connection's queues
pub struct VoicePipeline {
    player: Player,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
}

impl VoicePipeline {
    /// Start an Opus pipeline fed by ffmpeg.
    ///
    /// `outbound` is the connection's send queue and `inbound` its receive
    /// queue. Returns the queue of decoded frames.
    pub fn start(
        config: &EngineConfig,
        signal: Arc<dyn SpeakingSignal>,
        outbound: Sender<EncodedFrame>,
        inbound: Receiver<InboundPacket>,
    ) -> Result<(Self, Receiver<DecodedFrame>)> {
        config.validate()?;
        let encoder = OpusEncoder::new(config.codec.clone())?;
        let codec = config.codec.clone();
        let source = Arc::new(FfmpegSource::from_config(&config.player, &config.codec));

        Self::start_with(
            config,
            encoder,
            move |_| OpusDecoder::new(&codec),
            source,
            signal,
            outbound,
            inbound,
        )
    }

    /// Start a pipeline from explicit parts
    pub fn start_with<E, D, F>(
        config: &EngineConfig,
        encoder: E,
        make_decoder: F,
        source: Arc<dyn FrameSource>,
        signal: Arc<dyn SpeakingSignal>,
        outbound: Sender<EncodedFrame>,
        inbound: Receiver<InboundPacket>,
    ) -> Result<(Self, Receiver<DecodedFrame>)>
    where
        E: Encode + 'static,
        D: Decode + 'static,
        F: FnMut(Ssrc) -> std::result::Result<D, CodecError> + Send + 'static,
    {
        let (frames_tx, frames_rx) = frame_queue(config.player.frame_queue_capacity);
        let encoder = FrameEncoder::spawn(encoder, frames_rx, outbound)?;

        let (decoded_tx, decoded_rx) = bounded(config.decoder.queue_capacity);
        let decoder = FrameDecoder::spawn(
            make_decoder,
            inbound,
            decoded_tx,
            config.decoder.failure_policy,
        )?;

        let player = Player::new(source, signal, frames_tx, config.codec.samples_per_frame());

        tracing::info!(
            sample_rate = config.codec.sample_rate,
            channels = config.codec.channels,
            frame_size = config.codec.frame_size,
            "Voice pipeline started"
        );
        Ok((
            Self {
                player,
                encoder,
                decoder,
            },
            decoded_rx,
        ))
    }

    /// Player feeding this pipeline's encoder
    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Tear everything down, producers before consumers.
    ///
    /// The decoded frame queue must keep being drained (or be dropped)
    /// until this returns.
    pub fn shutdown(self) -> PipelineStats {
        let Self {
            player,
            encoder,
            decoder,
        } = self;

        // Closes the encoder input once every reader has exited
        player.destroy();
        let encoder = encoder.join();
        let decoder = decoder.join();

        tracing::info!(
            frames_encoded = encoder.frames_encoded,
            packets_decoded = decoder.packets_decoded,
            speakers = decoder.speakers,
            "Voice pipeline shut down"
        );
        PipelineStats { encoder, decoder }
    }
}
