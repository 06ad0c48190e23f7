//! Engine configuration
//!
//! Every section has sensible defaults so a partial TOML file (or none at
//! all) yields a working engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::constants::{CHANNELS, FRAME_QUEUE_CAPACITY, FRAME_SIZE, SAMPLE_RATE};
use crate::error::ConfigError;

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodecApplication {
    Voip,
    #[default]
    Audio,
    LowDelay,
}

/// Codec parameters shared by the encoder and every speaker decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame_size: usize,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub application: CodecApplication,
    /// In-band forward error correction
    pub fec: bool,
    pub packet_loss_perc: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
            bitrate: 64_000,
            application: CodecApplication::Audio,
            fec: false,
            packet_loss_perc: 0,
        }
    }
}

impl CodecConfig {
    /// Voice-tuned settings
    pub fn voice() -> Self {
        Self {
            application: CodecApplication::Voip,
            fec: true,
            packet_loss_perc: 5,
            ..Self::default()
        }
    }

    /// Total interleaved samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Frame duration in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Frame size in samples per channel for a duration
    pub fn frame_size_from_ms(sample_rate: u32, ms: f32) -> usize {
        (sample_rate as f32 * ms / 1000.0) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(ConfigError::invalid(
                "codec.sample_rate",
                format!("{} Hz is not an Opus rate", self.sample_rate),
            ));
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(ConfigError::invalid(
                "codec.channels",
                format!("{} channels unsupported", self.channels),
            ));
        }
        // Opus accepts 2.5, 5, 10, 20, 40 and 60 ms frames.
        let valid_sizes = [2.5f32, 5.0, 10.0, 20.0, 40.0, 60.0]
            .map(|ms| Self::frame_size_from_ms(self.sample_rate, ms));
        if !valid_sizes.contains(&self.frame_size) {
            return Err(ConfigError::invalid(
                "codec.frame_size",
                format!("{} samples is not a valid Opus frame", self.frame_size),
            ));
        }
        if self.packet_loss_perc > 100 {
            return Err(ConfigError::invalid(
                "codec.packet_loss_perc",
                "must be between 0 and 100",
            ));
        }
        Ok(())
    }
}

/// Playback source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Decoder executable used by the ffmpeg frame source
    pub ffmpeg_path: String,
    /// Capacity of the raw frame queue feeding the encoder
    pub frame_queue_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            frame_queue_capacity: FRAME_QUEUE_CAPACITY,
        }
    }
}

/// What the decoder worker does when a packet fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the packet and keep decoding every sender
    #[default]
    Isolate,
    /// Stop the decoder worker entirely
    Abort,
}

/// Inbound decoding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Capacity of the decoded frame output queue
    pub queue_capacity: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: FRAME_QUEUE_CAPACITY,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

/// Reconnect delay schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 120_000,
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> Result<BackoffPolicy, ConfigError> {
        BackoffPolicy::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
            self.factor,
            self.jitter,
        )
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub codec: CodecConfig,
    pub player: PlayerConfig,
    pub decoder: DecoderConfig,
    pub backoff: BackoffConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.codec.validate()?;
        if self.player.frame_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "player.frame_queue_capacity",
                "must be at least 1",
            ));
        }
        if self.player.ffmpeg_path.trim().is_empty() {
            return Err(ConfigError::invalid("player.ffmpeg_path", "must not be empty"));
        }
        if self.decoder.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "decoder.queue_capacity",
                "must be at least 1",
            ));
        }
        self.backoff.policy()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_wire_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.codec.sample_rate, 48000);
        assert_eq!(config.codec.channels, 2);
        assert_eq!(config.codec.samples_per_frame(), 1920);
        assert!((config.codec.frame_duration_ms() - 20.0).abs() < 0.01);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [codec]
            bitrate = 96000
            application = "voip"

            [decoder]
            failure_policy = "abort"
            "#,
        )
        .unwrap();

        assert_eq!(config.codec.bitrate, 96000);
        assert_eq!(config.codec.application, CodecApplication::Voip);
        assert_eq!(config.codec.frame_size, 960);
        assert_eq!(config.decoder.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.player.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_rejects_bad_frame_size() {
        let err = EngineConfig::from_toml_str("[codec]\nframe_size = 1000\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "codec.frame_size", .. }
        ));
    }

    #[test]
    fn test_rejects_bad_backoff() {
        let err = EngineConfig::from_toml_str("[backoff]\nbase_ms = 5000\nmax_ms = 10\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "backoff.max", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[player]\nffmpeg_path = \"/usr/bin/ffmpeg\"").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.player.ffmpeg_path, "/usr/bin/ffmpeg");
    }

    #[test]
    fn test_frame_size_from_ms() {
        assert_eq!(CodecConfig::frame_size_from_ms(48000, 20.0), 960);
        assert_eq!(CodecConfig::frame_size_from_ms(48000, 2.5), 120);
    }
}
