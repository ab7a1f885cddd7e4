//! # Channel Configuration
//!
//! Settings shared by the producer and consumer roles of one channel.

use crate::error::{RelayError, Result};
use crate::media::{AudioTiming, DEFAULT_VIDEO_MAX_REPEATS};
use crate::strategy::{BufferMode, ClientOptions, OverflowPolicy};
use core_runtime::config::{RuntimeConfig, DEFAULT_CHANNEL};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Channel configuration.
///
/// Both roles of a channel should agree on `channel`. The buffering fields
/// only take effect for whichever role creates the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name the producer and consumer rendezvous on.
    ///
    /// Default: `"default"`.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Buffering strategy of the app-data client.
    ///
    /// Default: `latest`.
    #[serde(default)]
    pub buffer_mode: BufferMode,

    /// Pre-roll queue depth for `latest_from_keyframe`. `None` is unbounded.
    ///
    /// Default: unbounded.
    #[serde(default)]
    pub max_buffers: Option<NonZeroUsize>,

    /// What a full pre-roll queue does.
    ///
    /// Default: `drop_and_resync`.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Times the consumer repeats a video frame before rendering filler.
    ///
    /// Default: 30.
    #[serde(default = "default_video_max_repeats")]
    pub video_max_repeats: u32,

    /// Audio slot timing, applied by the producer.
    #[serde(default)]
    pub audio: AudioTiming,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_video_max_repeats() -> u32 {
    DEFAULT_VIDEO_MAX_REPEATS
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            buffer_mode: BufferMode::default(),
            max_buffers: None,
            overflow: OverflowPolicy::default(),
            video_max_repeats: default_video_max_repeats(),
            audio: AudioTiming::default(),
        }
    }
}

impl ChannelConfig {
    /// Default configuration on the runtime's default channel.
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            channel: runtime.default_channel.clone(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Create a configuration optimized for low latency.
    ///
    /// - Latest buffer only
    /// - Video frames are never repeated
    /// - 200 ms audio buffer with 10 ms periods
    pub fn low_latency() -> Self {
        Self {
            buffer_mode: BufferMode::Latest,
            video_max_repeats: 1,
            audio: AudioTiming {
                buffer_time: Duration::from_millis(200),
                latency_time: Duration::from_millis(20),
                period_time: Duration::from_millis(10),
            },
            ..Default::default()
        }
    }

    /// Create a configuration for decoders that must start on a keyframe.
    ///
    /// - Pre-roll a group of pictures of up to `max_buffers`
    /// - Drop and resync when the group overflows
    pub fn keyframe_preroll(max_buffers: usize) -> Self {
        Self {
            buffer_mode: BufferMode::LatestFromKeyframe,
            max_buffers: NonZeroUsize::new(max_buffers),
            overflow: OverflowPolicy::DropAndResync,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.channel.is_empty() {
            return Err(invalid("channel name cannot be empty"));
        }

        if self.channel.trim() != self.channel {
            return Err(invalid(
                "channel name has leading or trailing whitespace",
            ));
        }

        if self.overflow == OverflowPolicy::Block && self.max_buffers.is_none() {
            return Err(invalid("block overflow policy requires max_buffers"));
        }

        if self.video_max_repeats == 0 {
            return Err(invalid("video_max_repeats must be > 0"));
        }

        if self.audio.period_time.is_zero() {
            return Err(invalid("audio period_time must be > 0"));
        }

        if self.audio.latency_time < self.audio.period_time {
            return Err(invalid("audio latency_time cannot be below period_time"));
        }

        if self.audio.buffer_time < self.audio.latency_time {
            return Err(invalid("audio buffer_time cannot be below latency_time"));
        }

        Ok(())
    }

    /// Options for the app-data client.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            mode: self.buffer_mode,
            max_buffers: self.max_buffers,
            overflow: self.overflow,
        }
    }
}

fn invalid(message: &str) -> RelayError {
    RelayError::InvalidConfig(message.to_string())
}
