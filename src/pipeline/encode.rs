//! Outbound encoder worker

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::codec::Encode;
use crate::error::{CodecError, Result};
use crate::frame::{EncodedFrame, Frame};

/// Why the encoder worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderExit {
    /// Every producer hung up; normal shutdown
    InputClosed,
    /// The connection dropped its send queue
    OutputClosed,
    CodecFailed(CodecError),
    Panicked,
}

/// Encoder statistics, available once the worker has stopped
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub exit: EncoderExit,
}

/// Handle to the single encoder worker of a connection
///
/// Running two workers against one send queue interleaves their packets;
/// callers must not do that.
pub struct FrameEncoder {
    worker: JoinHandle<EncoderStats>,
}

impl FrameEncoder {
    /// Start encoding frames from `input` into `output` until `input` closes.
    pub fn spawn<E>(codec: E, input: Receiver<Frame>, output: Sender<EncodedFrame>) -> Result<Self>
    where
        E: Encode + 'static,
    {
        let worker = thread::Builder::new()
            .name("voice-encoder".to_string())
            .spawn(move || run_encoder(codec, input, output))?;
        Ok(Self { worker })
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker to stop. Only returns once the input queue has
    /// closed or the worker failed.
    pub fn join(self) -> EncoderStats {
        self.worker.join().unwrap_or_else(|_| {
            tracing::error!("Encoder worker panicked");
            EncoderStats {
                frames_encoded: 0,
                bytes_produced: 0,
                exit: EncoderExit::Panicked,
            }
        })
    }
}

fn run_encoder<E: Encode>(
    mut codec: E,
    input: Receiver<Frame>,
    output: Sender<EncodedFrame>,
) -> EncoderStats {
    let mut frames_encoded = 0u64;
    let mut bytes_produced = 0u64;
    tracing::debug!("Encoder worker started");

    let exit = loop {
        let Ok(frame) = input.recv() else {
            break EncoderExit::InputClosed;
        };

        let encoded = match codec.encode(&frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(frames = frames_encoded, error = %e, "Encoding failed, stopping encoder");
                break EncoderExit::CodecFailed(e);
            }
        };

        let size = encoded.len() as u64;
        if output.send(encoded).is_err() {
            tracing::warn!(frames = frames_encoded, "Send queue closed, stopping encoder");
            break EncoderExit::OutputClosed;
        }
        frames_encoded += 1;
        bytes_produced += size;
    };

    tracing::debug!(frames = frames_encoded, bytes = bytes_produced, ?exit, "Encoder worker exited");
    EncoderStats {
        frames_encoded,
        bytes_produced,
        exit,
    }
}
