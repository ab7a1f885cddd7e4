//! # Per-Medium Surface State
//!
//! Besides the app-data client, a surface carries one slot per raw medium.
//! These paths do not queue: the producer overwrites and the consumer renders
//! filler (black, silence, nothing) whenever a slot has nothing to give.
//!
//! - [`VideoSlot`]: the latest frame, repeated a bounded number of times.
//! - [`AudioSlot`]: a byte adapter trimmed to `buffer_time`, drained one
//!   period at a time.
//! - [`SubtitleSlot`]: the latest subtitle buffer.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{RelayError, Result};
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Number of times a video frame is handed out before it expires.
pub const DEFAULT_VIDEO_MAX_REPEATS: u32 = 30;

/// Upper bound on interleaved channels accepted from audio caps.
pub const MAX_AUDIO_CHANNELS: u32 = 64;

/// Widest sample accepted from audio caps, in bits.
const MAX_SAMPLE_BITS: u32 = 64;

// ============================================================================
// Video
// ============================================================================

#[derive(Debug, Default)]
pub struct VideoSlot {
    caps: Option<Caps>,
    frame: Option<Buffer>,
    repeats: u32,
}

impl VideoSlot {
    /// Sets the video caps. A frame in the old format is dropped.
    pub fn set_caps(&mut self, caps: Caps) {
        if self.caps.as_ref() != Some(&caps) && self.frame.take().is_some() {
            debug!(caps = %caps, "dropping video frame on caps change");
        }
        self.caps = Some(caps);
    }

    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    /// Replaces the latest frame and restarts its repeat count.
    pub fn put_frame(&mut self, frame: Buffer) {
        self.frame = Some(frame);
        self.repeats = 0;
    }

    /// Returns the latest frame. After it was returned `max_repeats` times
    /// without a new one arriving, the slot empties and returns `None`.
    pub fn take_frame(&mut self, max_repeats: u32) -> Option<Buffer> {
        let frame = self.frame.as_ref()?.clone();
        self.repeats += 1;
        if self.repeats >= max_repeats {
            trace!(repeats = self.repeats, "video frame expired");
            self.frame = None;
        }
        Some(frame)
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    pub fn clear(&mut self) {
        self.caps = None;
        self.frame = None;
        self.repeats = 0;
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Audio buffering parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTiming {
    /// Maximum audio kept in the slot. Older bytes are discarded.
    ///
    /// Default: 1 second.
    #[serde(default = "default_buffer_time")]
    pub buffer_time: Duration,

    /// Latency the consumer reports downstream.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_latency_time")]
    pub latency_time: Duration,

    /// Amount of audio handed out per pull.
    ///
    /// Default: 25 ms.
    #[serde(default = "default_period_time")]
    pub period_time: Duration,
}

impl Default for AudioTiming {
    fn default() -> Self {
        Self {
            buffer_time: default_buffer_time(),
            latency_time: default_latency_time(),
            period_time: default_period_time(),
        }
    }
}

fn default_buffer_time() -> Duration {
    Duration::from_secs(1)
}

fn default_latency_time() -> Duration {
    Duration::from_millis(100)
}

fn default_period_time() -> Duration {
    Duration::from_millis(25)
}

/// Raw interleaved audio layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    pub channels: u32,
    pub bytes_per_sample: u32,
}

impl AudioFormat {
    /// Reads `rate`, `channels` and `format` (e.g. `S16LE`) from raw audio caps.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidCaps`] for anything but `audio/x-raw`, or
    /// when a field is missing or out of range.
    pub fn from_caps(caps: &Caps) -> Result<Self> {
        if caps.media_type() != "audio/x-raw" {
            return Err(RelayError::InvalidCaps(format!(
                "expected audio/x-raw caps, got '{}'",
                caps.media_type()
            )));
        }
        let rate = positive_u32(caps, "rate")?;
        let channels = positive_u32(caps, "channels")?;
        if channels > MAX_AUDIO_CHANNELS {
            return Err(RelayError::InvalidCaps(format!(
                "{} audio channels exceeds the limit of {}",
                channels, MAX_AUDIO_CHANNELS
            )));
        }
        let format = caps
            .get_str("format")
            .ok_or_else(|| RelayError::InvalidCaps("audio caps missing 'format'".to_string()))?;

        let bits: u32 = format
            .get(1..)
            .map(|rest| rest.trim_end_matches(char::is_alphabetic))
            .and_then(|digits| digits.parse().ok())
            .filter(|bits| bits % 8 == 0 && (8..=MAX_SAMPLE_BITS).contains(bits))
            .ok_or_else(|| {
                RelayError::InvalidCaps(format!("unsupported audio format '{}'", format))
            })?;

        Ok(Self {
            rate,
            channels,
            bytes_per_sample: bits / 8,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        let bytes = u64::from(self.channels) * u64::from(self.bytes_per_sample);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }

    /// Whole frames' worth of bytes covering `duration`, saturating at the
    /// largest whole-frame count a `usize` can hold.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frame = self.bytes_per_frame().max(1);
        let frames = u128::from(self.rate).saturating_mul(duration.as_nanos()) / 1_000_000_000;
        let max_frames = (usize::MAX / frame) as u128;
        // Bounded by `max_frames`, so the cast and multiply cannot wrap.
        frames.min(max_frames) as usize * frame
    }
}

fn positive_u32(caps: &Caps, field: &str) -> Result<u32> {
    caps.get_int(field)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            RelayError::InvalidCaps(format!("audio caps need a positive '{}'", field))
        })
}

#[derive(Debug, Default)]
pub struct AudioSlot {
    timing: AudioTiming,
    format: Option<AudioFormat>,
    adapter: BytesMut,
}

impl AudioSlot {
    pub fn new(timing: AudioTiming) -> Self {
        Self {
            timing,
            format: None,
            adapter: BytesMut::new(),
        }
    }

    pub fn timing(&self) -> AudioTiming {
        self.timing
    }

    /// Replaces the timing and trims what no longer fits.
    pub fn configure(&mut self, timing: AudioTiming) {
        self.timing = timing;
        self.trim();
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Sets the raw audio format. Bytes in a different layout are discarded.
    pub fn set_caps(&mut self, caps: &Caps) -> Result<()> {
        let format = AudioFormat::from_caps(caps)?;
        if self.format != Some(format) && !self.adapter.is_empty() {
            debug!(discarded = self.adapter.len(), "audio format changed");
            self.adapter.clear();
        }
        self.format = Some(format);
        Ok(())
    }

    /// Appends samples, discarding the oldest beyond `buffer_time`.
    ///
    /// Returns the number of bytes discarded.
    pub fn push(&mut self, data: &[u8]) -> Result<usize> {
        if self.format.is_none() {
            return Err(RelayError::InvalidCaps(
                "audio pushed before caps were set".to_string(),
            ));
        }
        self.adapter.extend_from_slice(data);
        Ok(self.trim())
    }

    /// Takes exactly one period of audio if that much is buffered.
    pub fn take_period(&mut self) -> Option<Bytes> {
        let period = self.period_bytes()?;
        if period == 0 || self.adapter.len() < period {
            return None;
        }
        Some(self.adapter.split_to(period).freeze())
    }

    pub fn period_bytes(&self) -> Option<usize> {
        self.format.map(|f| f.bytes_for(self.timing.period_time))
    }

    pub fn available(&self) -> usize {
        self.adapter.len()
    }

    pub fn clear(&mut self) {
        self.format = None;
        self.adapter.clear();
    }

    fn trim(&mut self) -> usize {
        let Some(format) = self.format else {
            return 0;
        };
        let max = format.bytes_for(self.timing.buffer_time);
        if self.adapter.len() <= max {
            return 0;
        }

        // Drop whole frames so the remaining bytes stay aligned.
        let frame = format.bytes_per_frame().max(1);
        let excess = (self.adapter.len() - max).div_ceil(frame) * frame;
        let excess = excess.min(self.adapter.len());
        self.adapter.advance(excess);
        trace!(discarded = excess, "trimmed audio beyond buffer time");
        excess
    }
}

// ============================================================================
// Subtitles
// ============================================================================

#[derive(Debug, Default)]
pub struct SubtitleSlot {
    buffer: Option<Buffer>,
}

impl SubtitleSlot {
    /// Replaces the pending subtitle. Returns `true` if one was overwritten.
    pub fn put(&mut self, buffer: Buffer) -> bool {
        self.buffer.replace(buffer).is_some()
    }

    pub fn take(&mut self) -> Option<Buffer> {
        self.buffer.take()
    }

    pub fn clear(&mut self) {
        self.buffer = None;
    }
}
