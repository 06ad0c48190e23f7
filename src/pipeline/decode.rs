//! Inbound decoder worker
//!
//! Each sender on the connection gets its own stateful decoder, created on
//! its first packet and kept until the worker stops. The table of contexts
//! never leaves the worker thread.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::codec::Decode;
use crate::config::FailurePolicy;
use crate::error::{CodecError, Result};
use crate::frame::{DecodedFrame, Frame, InboundPacket, Ssrc};

struct SpeakerContext<D> {
    decoder: D,
    packets: u64,
    failures: u64,
}

/// Per-sender decode state, keyed by SSRC
struct SpeakerTable<D, F> {
    contexts: HashMap<Ssrc, SpeakerContext<D>>,
    make_decoder: F,
}

impl<D, F> SpeakerTable<D, F>
where
    D: Decode,
    F: FnMut(Ssrc) -> std::result::Result<D, CodecError>,
{
    fn new(make_decoder: F) -> Self {
        Self {
            contexts: HashMap::new(),
            make_decoder,
        }
    }

    fn context(&mut self, ssrc: Ssrc) -> std::result::Result<&mut SpeakerContext<D>, CodecError> {
        match self.contexts.entry(ssrc) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let decoder = (self.make_decoder)(ssrc)?;
                tracing::debug!(ssrc, "New speaker");
                Ok(entry.insert(SpeakerContext {
                    decoder,
                    packets: 0,
                    failures: 0,
                }))
            }
        }
    }

    fn decode(&mut self, packet: &InboundPacket) -> std::result::Result<Frame, CodecError> {
        let context = self.context(packet.ssrc)?;
        match context.decoder.decode(&packet.payload) {
            Ok(frame) => {
                context.packets += 1;
                Ok(frame)
            }
            Err(e) => {
                context.failures += 1;
                Err(e)
            }
        }
    }

    fn len(&self) -> usize {
        self.contexts.len()
    }

    fn log_summary(&self) {
        for (ssrc, context) in &self.contexts {
            tracing::debug!(
                ssrc,
                packets = context.packets,
                failures = context.failures,
                "Speaker summary"
            );
        }
    }
}

/// Why the decoder worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderExit {
    Cancelled,
    /// The connection's receive queue closed
    InboundClosed,
    /// The consumer dropped the output queue
    OutputClosed,
    /// A packet failed under [`FailurePolicy::Abort`]
    CodecFailed(CodecError),
    Panicked,
}

/// Decoder statistics, available once the worker has stopped
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub packets_decoded: u64,
    pub packets_failed: u64,
    /// Distinct senders seen
    pub speakers: usize,
    pub exit: DecoderExit,
}

/// Handle to the single decoder worker of a connection
pub struct FrameDecoder {
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<DecoderStats>>,
}

impl FrameDecoder {
    /// Start decoding packets from `inbound` into `output`.
    ///
    /// `make_decoder` builds the decoder for a sender the first time its
    /// SSRC shows up.
    pub fn spawn<D, F>(
        make_decoder: F,
        inbound: Receiver<InboundPacket>,
        output: Sender<DecodedFrame>,
        policy: FailurePolicy,
    ) -> Result<Self>
    where
        D: Decode + 'static,
        F: FnMut(Ssrc) -> std::result::Result<D, CodecError> + Send + 'static,
    {
        let (cancel, cancelled) = bounded(0);
        let worker = thread::Builder::new()
            .name("voice-decoder".to_string())
            .spawn(move || {
                run_decoder(SpeakerTable::new(make_decoder), inbound, cancelled, output, policy)
            })?;
        Ok(Self {
            cancel: Some(cancel),
            worker: Some(worker),
        })
    }

    /// Ask the worker to stop after the packet it is working on
    pub fn cancel(&mut self) {
        self.cancel.take();
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Cancel and wait for the worker to stop
    pub fn join(mut self) -> DecoderStats {
        self.cancel();
        let worker = self.worker.take();
        match worker.map(|w| w.join()) {
            Some(Ok(stats)) => stats,
            _ => {
                tracing::error!("Decoder worker panicked");
                DecoderStats {
                    packets_decoded: 0,
                    packets_failed: 0,
                    speakers: 0,
                    exit: DecoderExit::Panicked,
                }
            }
        }
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_decoder<D, F>(
    mut speakers: SpeakerTable<D, F>,
    inbound: Receiver<InboundPacket>,
    cancelled: Receiver<()>,
    output: Sender<DecodedFrame>,
    policy: FailurePolicy,
) -> DecoderStats
where
    D: Decode,
    F: FnMut(Ssrc) -> std::result::Result<D, CodecError>,
{
    let mut packets_decoded = 0u64;
    let mut packets_failed = 0u64;
    tracing::debug!(?policy, "Decoder worker started");

    let exit = 'worker: loop {
        let packet = select! {
            recv(cancelled) -> _ => break 'worker DecoderExit::Cancelled,
            recv(inbound) -> msg => match msg {
                Ok(packet) => packet,
                Err(_) => break 'worker DecoderExit::InboundClosed,
            },
        };

        let frame = match speakers.decode(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                packets_failed += 1;
                match policy {
                    FailurePolicy::Isolate => {
                        tracing::warn!(ssrc = packet.ssrc, sequence = packet.sequence, error = %e, "Dropping undecodable packet");
                        continue;
                    }
                    FailurePolicy::Abort => {
                        tracing::error!(ssrc = packet.ssrc, error = %e, "Decoding failed, stopping decoder");
                        break DecoderExit::CodecFailed(e);
                    }
                }
            }
        };

        let decoded = DecodedFrame {
            ssrc: packet.ssrc,
            sequence: packet.sequence,
            timestamp: packet.timestamp,
            frame,
        };
        if output.send(decoded).is_err() {
            tracing::debug!("Output queue closed, stopping decoder");
            break DecoderExit::OutputClosed;
        }
        packets_decoded += 1;
    };

    speakers.log_summary();
    tracing::debug!(
        decoded = packets_decoded,
        failed = packets_failed,
        speakers = speakers.len(),
        ?exit,
        "Decoder worker exited"
    );
    DecoderStats {
        packets_decoded,
        packets_failed,
        speakers: speakers.len(),
        exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Stamps every sample with the SSRC it was built for; an `0xff`
    /// payload is corrupt
    struct StampDecoder {
        ssrc: Ssrc,
    }

    impl Decode for StampDecoder {
        fn decode(&mut self, packet: &[u8]) -> std::result::Result<Frame, CodecError> {
            if packet == [0xff] {
                return Err(CodecError::DecodingFailed("corrupt".into()));
            }
            Ok(Frame::new(vec![self.ssrc as i16, packet[0] as i16]))
        }
    }

    fn packet(ssrc: Ssrc, sequence: u16, payload: u8) -> InboundPacket {
        InboundPacket {
            ssrc,
            sequence,
            timestamp: sequence as u32 * 960,
            payload: Bytes::copy_from_slice(&[payload]),
        }
    }

    fn spawn(
        policy: FailurePolicy,
    ) -> (
        FrameDecoder,
        Sender<InboundPacket>,
        Receiver<DecodedFrame>,
        Arc<Mutex<Vec<Ssrc>>>,
    ) {
        let created = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&created);
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let decoder = FrameDecoder::spawn(
            move |ssrc| {
                log.lock().push(ssrc);
                Ok(StampDecoder { ssrc })
            },
            in_rx,
            out_tx,
            policy,
        )
        .unwrap();
        (decoder, in_tx, out_rx, created)
    }

    #[test]
    fn test_one_context_per_sender() {
        let (decoder, in_tx, out_rx, created) = spawn(FailurePolicy::Isolate);

        for seq in 0..10u16 {
            in_tx.send(packet(11, seq, seq as u8)).unwrap();
            in_tx.send(packet(22, seq, seq as u8)).unwrap();
        }
        drop(in_tx);

        let frames: Vec<DecodedFrame> = out_rx.iter().collect();
        let stats = decoder.join();

        assert_eq!(stats.exit, DecoderExit::InboundClosed);
        assert_eq!(stats.speakers, 2);
        assert_eq!(stats.packets_decoded, 20);
        assert_eq!(*created.lock(), vec![11, 22]);

        for decoded in &frames {
            // Frame came from the decoder built for this packet's sender
            assert_eq!(decoded.frame.samples()[0], decoded.ssrc as i16);
            assert_eq!(decoded.frame.samples()[1], decoded.sequence as i16);
        }
        let seqs_11: Vec<u16> = frames.iter().filter(|f| f.ssrc == 11).map(|f| f.sequence).collect();
        assert_eq!(seqs_11, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_isolate_keeps_other_senders_alive() {
        let (decoder, in_tx, out_rx, _) = spawn(FailurePolicy::Isolate);

        in_tx.send(packet(1, 0, 0)).unwrap();
        in_tx.send(packet(2, 0, 0xff)).unwrap();
        in_tx.send(packet(1, 1, 1)).unwrap();
        in_tx.send(packet(2, 1, 2)).unwrap();
        drop(in_tx);

        let frames: Vec<(Ssrc, u16)> = out_rx.iter().map(|f| (f.ssrc, f.sequence)).collect();
        let stats = decoder.join();

        assert_eq!(frames, vec![(1, 0), (1, 1), (2, 1)]);
        assert_eq!(stats.packets_failed, 1);
        assert_eq!(stats.speakers, 2);
    }

    #[test]
    fn test_abort_policy_stops_everything() {
        let (decoder, in_tx, out_rx, _) = spawn(FailurePolicy::Abort);

        in_tx.send(packet(1, 0, 0)).unwrap();
        in_tx.send(packet(2, 0, 0xff)).unwrap();
        in_tx.send(packet(1, 1, 1)).unwrap();

        let frames: Vec<DecodedFrame> = out_rx.iter().collect();
        let stats = decoder.join();

        assert_eq!(frames.len(), 1);
        assert!(matches!(stats.exit, DecoderExit::CodecFailed(_)));
    }

    #[test]
    fn test_cancel_closes_output() {
        let (mut decoder, in_tx, out_rx, _) = spawn(FailurePolicy::Isolate);

        in_tx.send(packet(5, 0, 0)).unwrap();
        let first = out_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.ssrc, 5);

        decoder.cancel();
        // Output disconnects once the worker has wound down
        assert!(out_rx.recv_timeout(Duration::from_secs(5)).is_err());
        assert_eq!(decoder.join().exit, DecoderExit::Cancelled);
        drop(in_tx);
    }

    #[test]
    fn test_failed_context_creation_is_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        let mut table = SpeakerTable::new(move |ssrc| {
            let mut n = counter.lock();
            *n += 1;
            if *n == 1 {
                Err(CodecError::DecoderInit("busy".into()))
            } else {
                Ok(StampDecoder { ssrc })
            }
        });

        assert!(table.decode(&packet(9, 0, 0)).is_err());
        assert_eq!(table.len(), 0);
        assert!(table.decode(&packet(9, 1, 1)).is_ok());
        assert!(table.decode(&packet(9, 2, 2)).is_ok());
        assert_eq!(table.len(), 1);
        assert_eq!(*attempts.lock(), 2);
    }

    #[test]
    fn test_opus_round_trip_through_worker() {
        use crate::codec::{Encode, OpusDecoder, OpusEncoder};
        use crate::config::CodecConfig;

        let config = CodecConfig::default();
        let mut encoder = OpusEncoder::new(config.clone()).unwrap();
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let decoder_config = config.clone();
        let decoder = FrameDecoder::spawn(
            move |_| OpusDecoder::new(&decoder_config),
            in_rx,
            out_tx,
            FailurePolicy::Isolate,
        )
        .unwrap();

        for seq in 0..3u16 {
            let encoded = encoder.encode(&Frame::silence(config.samples_per_frame())).unwrap();
            in_tx
                .send(InboundPacket {
                    ssrc: 42,
                    sequence: seq,
                    timestamp: seq as u32 * 960,
                    payload: encoded.into_bytes(),
                })
                .unwrap();
        }
        drop(in_tx);

        let frames: Vec<DecodedFrame> = out_rx.iter().collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.frame.len() == config.samples_per_frame()));
        assert_eq!(decoder.join().speakers, 1);
    }
}
