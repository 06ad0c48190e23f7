//! Playback of external audio sources into the encoder
//!
//! A [`Player`] owns one frame source session at a time:
//!
//! ```text
//!   Idle ──play──▶ Playing ──end of stream / stop──▶ Idle
//!     │               │
//!     └───destroy─────┴──────────▶ Destroyed (terminal)
//! ```
//!
//! Each session runs a dedicated reader thread that slices the source's
//! PCM into frames and pushes them into the encoder queue. The reader holds
//! its own clone of the queue sender; the player closes its sender only on
//! destroy, after every reader has signalled completion.
//!
//! Stopping a session cancels its reader before the speaking flag drops, so
//! once `stop` returns the retired session enqueues nothing more, even if
//! the source still had buffered output or the reader was blocked on a full
//! queue.

pub mod source;

use std::io::Read;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::{Result, TransportError, UsageError};
use crate::frame::Frame;

pub use source::{FfmpegSource, FrameSource, ProcessHandle, SourceProcess};

/// Connection-side switch announcing that audio is being transmitted
pub trait SpeakingSignal: Send + Sync {
    fn set_speaking(&self, speaking: bool) -> std::result::Result<(), TransportError>;
}

/// Player lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Destroyed,
}

/// One-shot event that fires when its paired sender is dropped.
///
/// Readers use one to report completion, the player uses one to cancel a
/// reader, and readers use a third to report that they stopped producing.
#[derive(Clone)]
struct Latch(Receiver<()>);

impl Latch {
    fn new() -> (Sender<()>, Self) {
        let (tx, rx) = bounded(0);
        (tx, Self(rx))
    }

    fn wait(&self) {
        // Nothing is ever sent; recv returns once the sender is gone
        let _ = self.0.recv();
    }

    fn is_resolved(&self) -> bool {
        matches!(self.0.try_recv(), Err(TryRecvError::Disconnected))
    }
}

struct ActiveSession {
    id: u64,
    process: Box<dyn ProcessHandle>,
    /// Dropped to cancel the reader
    cancel: Sender<()>,
    /// Resolves once the reader will not enqueue another frame
    parked: Latch,
}

struct Inner {
    state: PlayerState,
    session: Option<ActiveSession>,
    /// Completions of reader threads that may still be running
    pending: Vec<Latch>,
    frames: Option<Sender<Frame>>,
    next_session: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    signal: Arc<dyn SpeakingSignal>,
}

impl Shared {
    fn signal_speaking(&self, speaking: bool) {
        if let Err(e) = self.signal.set_speaking(speaking) {
            tracing::warn!(speaking, error = %e, "Failed to update speaking state");
        }
    }

    /// Retire the active session. Caller holds the lock.
    ///
    /// Waits for the reader to stop producing, which is bounded by one read
    /// from a terminated process.
    fn stop_locked(&self, inner: &mut Inner) {
        if let Some(session) = inner.session.take() {
            let ActiveSession {
                id,
                mut process,
                cancel,
                parked,
            } = session;
            drop(cancel);
            if let Err(e) = process.terminate() {
                tracing::warn!(session = id, error = %e, "Failed to terminate source");
            }
            parked.wait();
            tracing::info!(session = id, "Playback stopped");
        }
        inner.state = PlayerState::Idle;
        self.signal_speaking(false);
    }

    /// Called by a reader thread on every exit path. A no-op if stop or
    /// destroy already retired the session.
    fn finish_session(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.session.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        self.stop_locked(&mut inner);
    }
}

/// How a reader thread ended
#[derive(Debug)]
enum ReaderExit {
    EndOfStream,
    Cancelled,
    QueueClosed,
    Failed(std::io::Error),
}

/// Per-session channels handed to a reader thread
struct ReaderControl {
    cancel: Latch,
    /// Dropped as soon as the reader stops producing
    parked: Sender<()>,
}

/// Plays one source at a time into the encoder's frame queue
pub struct Player {
    shared: Arc<Shared>,
    source: Arc<dyn FrameSource>,
    samples_per_frame: usize,
}

impl Player {
    /// `samples_per_frame` counts interleaved samples (frame size × channels).
    pub fn new(
        source: Arc<dyn FrameSource>,
        signal: Arc<dyn SpeakingSignal>,
        frames: Sender<Frame>,
        samples_per_frame: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: PlayerState::Idle,
                    session: None,
                    pending: Vec::new(),
                    frames: Some(frames),
                    next_session: 0,
                }),
                signal,
            }),
            source,
            samples_per_frame,
        }
    }

    /// Get current state
    pub fn state(&self) -> PlayerState {
        self.shared.inner.lock().state
    }

    /// Start playing `locator`.
    ///
    /// Fails without side effects when already playing or destroyed.
    pub fn play(&self, locator: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            PlayerState::Destroyed => return Err(UsageError::Destroyed.into()),
            PlayerState::Playing => return Err(UsageError::AlreadyPlaying.into()),
            PlayerState::Idle => {}
        }
        let Some(frames) = inner.frames.clone() else {
            return Err(UsageError::Destroyed.into());
        };
        inner.pending.retain(|c| !c.is_resolved());

        let SourceProcess { output, mut handle } = self.source.spawn(locator)?;
        self.shared.signal_speaking(true);

        let id = inner.next_session;
        let (done, completion) = Latch::new();
        let (cancel, cancel_latch) = Latch::new();
        let (parked_tx, parked) = Latch::new();
        let control = ReaderControl {
            cancel: cancel_latch,
            parked: parked_tx,
        };
        let shared = Arc::clone(&self.shared);
        let samples_per_frame = self.samples_per_frame;

        let spawned = thread::Builder::new()
            .name(format!("voice-reader-{}", id))
            .spawn(move || {
                let _done = done;
                run_reader(&shared, id, output, frames, control, samples_per_frame);
            });
        if let Err(e) = spawned {
            if let Err(term) = handle.terminate() {
                tracing::warn!(
                    session = id,
                    error = %term,
                    "Failed to terminate source after reader spawn failure"
                );
            }
            self.shared.signal_speaking(false);
            return Err(e.into());
        }

        inner.next_session += 1;
        inner.session = Some(ActiveSession {
            id,
            process: handle,
            cancel,
            parked,
        });
        inner.pending.push(completion);
        inner.state = PlayerState::Playing;
        tracing::info!(session = id, locator, "Playback started");
        Ok(())
    }

    /// Stop the current session, if any.
    ///
    /// No frame from the stopped session enters the queue after this
    /// returns.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            PlayerState::Destroyed => Err(UsageError::Destroyed.into()),
            PlayerState::Idle => Ok(()),
            PlayerState::Playing => {
                self.shared.stop_locked(&mut inner);
                Ok(())
            }
        }
    }

    /// Stop playback for good and close the encoder queue.
    ///
    /// Blocks until every reader thread has exited. Later calls return
    /// immediately.
    pub fn destroy(&self) {
        let (pending, frames) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == PlayerState::Destroyed {
                return;
            }
            if inner.state == PlayerState::Playing {
                self.shared.stop_locked(&mut inner);
            }
            inner.state = PlayerState::Destroyed;
            (std::mem::take(&mut inner.pending), inner.frames.take())
        };

        for completion in &pending {
            completion.wait();
        }
        drop(frames);
        tracing::info!("Player destroyed");
    }

    /// Block until every reader thread started so far has exited.
    ///
    /// Returns right away when idle; while playing it waits for the source
    /// to end or for another thread to stop the player.
    pub fn wait(&self) {
        let pending = self.shared.inner.lock().pending.clone();
        for completion in &pending {
            completion.wait();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn run_reader(
    shared: &Shared,
    session: u64,
    mut output: Box<dyn Read + Send>,
    frames: Sender<Frame>,
    control: ReaderControl,
    samples_per_frame: usize,
) {
    let ReaderControl { cancel, parked } = control;
    let mut buf = vec![0u8; samples_per_frame * 2];
    let mut sent = 0u64;

    let exit = 'reader: loop {
        let filled = match source::read_frame(&mut output, &mut buf) {
            Ok(0) => break ReaderExit::EndOfStream,
            Ok(n) => n,
            Err(e) => break ReaderExit::Failed(e),
        };
        // Short read: pad the last frame with silence
        buf[filled..].fill(0);

        // Buffered output of a stopped source must not reach the queue
        if cancel.is_resolved() {
            break ReaderExit::Cancelled;
        }
        let frame = Frame::from_le_bytes(&buf);
        select! {
            send(frames, frame) -> res => {
                if res.is_err() {
                    break 'reader ReaderExit::QueueClosed;
                }
            }
            recv(cancel.0) -> _ => break 'reader ReaderExit::Cancelled,
        }
        sent += 1;

        if filled < buf.len() {
            break ReaderExit::EndOfStream;
        }
    };
    drop(parked);

    match &exit {
        ReaderExit::EndOfStream => {
            tracing::debug!(session, frames = sent, "Source reached end of stream")
        }
        ReaderExit::Cancelled => {
            tracing::debug!(session, frames = sent, "Reader cancelled")
        }
        ReaderExit::QueueClosed => {
            tracing::warn!(session, frames = sent, "Frame queue closed under reader")
        }
        ReaderExit::Failed(e) => {
            tracing::error!(session, frames = sent, error = %e, "Failed to read from source")
        }
    }

    drop(frames);
    shared.finish_session(session);
}
