//! Frame sources for the player
//!
//! A source turns a locator (path or URL) into a raw s16le PCM byte stream
//! plus a handle that can kill whatever produces it. The ffmpeg subprocess
//! is the stock implementation; anything else that yields PCM (an
//! in-process decoder, a test fixture) plugs in through [`FrameSource`].

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};

use crate::config::{CodecConfig, PlayerConfig};
use crate::error::TransportError;

/// Control over the producer behind a [`SourceProcess`]
pub trait ProcessHandle: Send {
    /// Kill the producer if it is still running and release its resources.
    ///
    /// Must cause the paired output stream to reach end-of-stream.
    fn terminate(&mut self) -> io::Result<()>;
}

/// A started source: PCM output plus its kill switch
pub struct SourceProcess {
    pub output: Box<dyn Read + Send>,
    pub handle: Box<dyn ProcessHandle>,
}

/// Factory for PCM streams
pub trait FrameSource: Send + Sync {
    /// Start producing little-endian s16 PCM for `locator` at the engine's
    /// sample rate and channel count.
    fn spawn(&self, locator: &str) -> Result<SourceProcess, TransportError>;
}

impl ProcessHandle for Child {
    fn terminate(&mut self) -> io::Result<()> {
        if self.try_wait()?.is_none() {
            self.kill()?;
        }
        self.wait()?;
        Ok(())
    }
}

/// Decodes any input ffmpeg understands into raw PCM on its stdout
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    program: String,
    sample_rate: u32,
    channels: u16,
}

impl FfmpegSource {
    pub fn new(program: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            program: program.into(),
            sample_rate,
            channels,
        }
    }

    pub fn from_config(player: &PlayerConfig, codec: &CodecConfig) -> Self {
        Self::new(player.ffmpeg_path.clone(), codec.sample_rate, codec.channels)
    }

    /// The command line used for `locator`
    pub fn command(&self, locator: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-loglevel", "error", "-i", locator])
            .args(["-f", "s16le"])
            .args(["-ar", &self.sample_rate.to_string()])
            .args(["-ac", &self.channels.to_string()])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        command
    }
}

impl FrameSource for FfmpegSource {
    fn spawn(&self, locator: &str) -> Result<SourceProcess, TransportError> {
        let mut child = self
            .command(locator)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            if let Err(e) = child.terminate() {
                tracing::warn!(
                    program = %self.program,
                    error = %e,
                    "Failed to terminate decode process without stdout"
                );
            }
            return Err(TransportError::MissingPipe);
        };

        tracing::debug!(program = %self.program, pid = child.id(), locator, "Spawned decode process");

        Ok(SourceProcess {
            output: Box::new(stdout),
            handle: Box::new(child),
        })
    }
}

/// Fill `buf` from `reader`, returning how many bytes arrived.
///
/// Anything short of `buf.len()` means the stream ended; `0` means it ended
/// cleanly on a frame boundary.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_command_line() {
        let source = FfmpegSource::from_config(&PlayerConfig::default(), &CodecConfig::default());
        let command = source.command("song.mp3");

        assert_eq!(command.get_program(), "ffmpeg");
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-hide_banner", "-loglevel", "error", "-i", "song.mp3", "-f", "s16le", "-ar",
                "48000", "-ac", "2", "pipe:1"
            ]
        );
    }

    #[test]
    fn test_spawn_failure_reports_program() {
        let source = FfmpegSource::new("/nonexistent/ffmpeg-binary", 48000, 2);
        match source.spawn("song.mp3") {
            Err(TransportError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/ffmpeg-binary")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn test_read_frame_across_short_reads() {
        // A chain of tiny readers forces several read calls per frame
        let mut reader = (&[1u8, 2][..]).chain(&[3u8][..]).chain(&[4u8, 5, 6][..]);
        let mut buf = [0u8; 4];

        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_frame(&mut reader, &mut buf).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_child_terminate_reaches_end_of_stream() {
        // `yes` writes forever until killed
        let mut child = Command::new("yes").stdout(Stdio::piped()).spawn().unwrap();
        let mut stdout = child.stdout.take().unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(read_frame(&mut stdout, &mut buf).unwrap(), 64);

        child.terminate().unwrap();
        let mut rest = Vec::new();
        stdout.read_to_end(&mut rest).unwrap();

        // Already reaped; a second terminate is harmless
        child.terminate().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_source_that_exits_immediately() {
        // `true` ignores its arguments and writes nothing
        let source = FfmpegSource::new("true", 48000, 2);
        let mut process = source.spawn("song.mp3").unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(read_frame(&mut process.output, &mut buf).unwrap(), 0);
        process.handle.terminate().unwrap();
    }
}
