//! # Producer and Consumer Roles
//!
//! [`AppSink`] and [`AppSrc`] drive a channel the way pipeline elements do:
//! attach on `start`, move caps and buffers, detach on `stop`. Both are
//! `Send + Sync` so a pipeline can call [`AppSrc::unlock`] from its control
//! thread while the streaming thread is blocked in [`AppSrc::create`].
//!
//! ```rust
//! use core_relay::{AppSink, AppSrc, Buffer, Caps, ChannelConfig, SurfaceRegistry};
//!
//! # fn main() -> core_relay::Result<()> {
//! let registry = SurfaceRegistry::new();
//! let sink = AppSink::new(registry.clone(), ChannelConfig::default())?;
//! let src = AppSrc::new(registry, ChannelConfig::default())?;
//!
//! sink.start()?;
//! src.start()?;
//!
//! sink.set_caps(Caps::new("application/x-custom"))?;
//! sink.render(Buffer::new(vec![1, 2, 3]))?;
//!
//! let pulled = src.create()?;
//! assert!(pulled.caps.is_some());
//! assert_eq!(pulled.buffer.len(), 3);
//!
//! src.stop()?;
//! sink.stop()?;
//! # Ok(())
//! # }
//! ```

use crate::buffer::Buffer;
use crate::caps::{Caps, Medium};
use crate::config::ChannelConfig;
use crate::error::{RelayError, Result};
use crate::registry::{SurfaceHandle, SurfaceRegistry};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

/// Attachment state shared by both roles.
struct Attachment {
    registry: SurfaceRegistry,
    config: ChannelConfig,
    surface: Mutex<Option<SurfaceHandle>>,
}

impl Attachment {
    fn new(registry: SurfaceRegistry, config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            surface: Mutex::new(None),
        })
    }

    fn attach(&self) -> Result<SurfaceHandle> {
        let mut surface = self.surface.lock();
        if surface.is_some() {
            return Err(RelayError::AlreadyStarted(self.config.channel.clone()));
        }
        let handle = self
            .registry
            .get_or_create_with(&self.config.channel, &self.config.client_options());
        *surface = Some(handle.clone());
        Ok(handle)
    }

    /// A holder for the duration of one call, so `stop` never frees the
    /// surface under a blocked caller.
    fn handle(&self) -> Result<SurfaceHandle> {
        self.surface.lock().clone().ok_or(RelayError::NotStarted)
    }

    /// Like [`handle`](Self::handle), plus the client's flush epoch read
    /// while still attached. A `stop` or `unlock` after this fails the call.
    fn pinned(&self) -> Result<(SurfaceHandle, u64)> {
        let surface = self.surface.lock();
        let handle = surface.clone().ok_or(RelayError::NotStarted)?;
        let epoch = handle.client().flush_epoch();
        Ok((handle, epoch))
    }

    fn detach(&self) -> Result<SurfaceHandle> {
        self.surface.lock().take().ok_or(RelayError::NotStarted)
    }

    fn is_attached(&self) -> bool {
        self.surface.lock().is_some()
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Producer role: publishes caps and buffers on a channel.
pub struct AppSink {
    attachment: Attachment,
}

impl AppSink {
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if `config` fails validation.
    pub fn new(registry: SurfaceRegistry, config: ChannelConfig) -> Result<Self> {
        Ok(Self {
            attachment: Attachment::new(registry, config)?,
        })
    }

    /// Attaches to the channel and applies the configured audio timing.
    #[instrument(skip(self), fields(channel = %self.channel()))]
    pub fn start(&self) -> Result<()> {
        let handle = self.attachment.attach()?;
        handle.audio().configure(self.attachment.config.audio);
        info!("producer attached");
        Ok(())
    }

    /// Resets the channel's client and detaches.
    ///
    /// A consumer still attached keeps waiting for the next producer.
    #[instrument(skip(self), fields(channel = %self.channel()))]
    pub fn stop(&self) -> Result<()> {
        let handle = self.attachment.detach()?;
        handle.client().reset();
        drop(handle);
        info!("producer detached");
        Ok(())
    }

    pub fn set_caps(&self, caps: Caps) -> Result<()> {
        self.attachment.handle()?.client().set_caps(caps);
        Ok(())
    }

    /// Pushes one buffer to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Flushing`] if the consumer is unlocked.
    pub fn render(&self, buffer: Buffer) -> Result<()> {
        trace!(channel = %self.channel(), len = buffer.len(), "render");
        self.attachment.handle()?.client().push_buffer(buffer)
    }

    /// # Errors
    ///
    /// Returns [`RelayError::InvalidCaps`] if `caps` do not describe video.
    pub fn set_video_caps(&self, caps: Caps) -> Result<()> {
        if caps.medium() != Medium::Video {
            return Err(RelayError::InvalidCaps(format!(
                "expected video caps, got '{}'",
                caps.media_type()
            )));
        }
        self.attachment.handle()?.video().set_caps(caps);
        Ok(())
    }

    pub fn put_video_frame(&self, frame: Buffer) -> Result<()> {
        self.attachment.handle()?.video().put_frame(frame);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RelayError::InvalidCaps`] unless `caps` are `audio/x-raw`
    /// with a usable rate, channel count and sample format.
    pub fn set_audio_caps(&self, caps: &Caps) -> Result<()> {
        self.attachment.handle()?.audio().set_caps(caps)
    }

    /// Appends raw samples. Returns the number of old bytes discarded.
    pub fn push_audio(&self, samples: &[u8]) -> Result<usize> {
        let discarded = self.attachment.handle()?.audio().push(samples)?;
        if discarded > 0 {
            debug!(channel = %self.channel(), discarded, "audio overrun");
        }
        Ok(discarded)
    }

    pub fn put_subtitle(&self, buffer: Buffer) -> Result<()> {
        self.attachment.handle()?.subtitle().put(buffer);
        Ok(())
    }

    pub fn channel(&self) -> &str {
        &self.attachment.config.channel
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.attachment.config
    }

    pub fn is_started(&self) -> bool {
        self.attachment.is_attached()
    }
}

impl fmt::Debug for AppSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSink")
            .field("channel", &self.channel())
            .field("started", &self.is_started())
            .finish()
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// One unit pulled by [`AppSrc::create`].
#[derive(Debug, Clone)]
pub struct Pulled {
    /// New caps, present only if they changed since the previous pull.
    pub caps: Option<Caps>,
    pub buffer: Buffer,
}

/// Consumer role: pulls caps and buffers from a channel.
pub struct AppSrc {
    attachment: Attachment,
}

impl AppSrc {
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if `config` fails validation.
    pub fn new(registry: SurfaceRegistry, config: ChannelConfig) -> Result<Self> {
        Ok(Self {
            attachment: Attachment::new(registry, config)?,
        })
    }

    /// Attaches to the channel. Clears a flushing state left behind by an
    /// earlier `unlock` without `unlock_stop`.
    #[instrument(skip(self), fields(channel = %self.channel()))]
    pub fn start(&self) -> Result<()> {
        let handle = self.attachment.attach()?;
        handle.client().set_flushing(false);
        info!("consumer attached");
        Ok(())
    }

    /// Fails any `create` in flight, whether already blocked or about to
    /// block, and detaches.
    #[instrument(skip(self), fields(channel = %self.channel()))]
    pub fn stop(&self) -> Result<()> {
        let handle = self.attachment.detach()?;
        handle.client().flush();
        drop(handle);
        info!("consumer detached");
        Ok(())
    }

    /// Waits for caps, then for the next buffer.
    ///
    /// Caps replaced while waiting are reported with the buffer that follows
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Flushing`] when interrupted by `unlock` or `stop`.
    pub fn create(&self) -> Result<Pulled> {
        let (handle, epoch) = self.attachment.pinned()?;
        let (caps, buffer) = handle.client().pull_with_caps(epoch)?;

        if let Some(caps) = &caps {
            debug!(channel = %self.channel(), caps = %caps, "got caps");
        }
        trace!(channel = %self.channel(), len = buffer.len(), "pulled buffer");

        Ok(Pulled { caps, buffer })
    }

    /// Interrupts `create` until [`unlock_stop`](Self::unlock_stop).
    /// No-op when not started.
    pub fn unlock(&self) {
        if let Ok(handle) = self.attachment.handle() {
            handle.client().set_flushing(true);
        }
    }

    /// Re-arms `create` after [`unlock`](Self::unlock). No-op when not started.
    pub fn unlock_stop(&self) {
        if let Ok(handle) = self.attachment.handle() {
            handle.client().set_flushing(false);
        }
    }

    /// Audio latency to report downstream, as configured for this channel's
    /// surface.
    pub fn audio_latency(&self) -> Result<Duration> {
        Ok(self.attachment.handle()?.audio().timing().latency_time)
    }

    pub fn video_caps(&self) -> Result<Option<Caps>> {
        Ok(self.attachment.handle()?.video().caps().cloned())
    }

    /// The latest video frame, or `None` when the consumer should render
    /// filler because the producer stopped sending.
    pub fn take_video_frame(&self) -> Result<Option<Buffer>> {
        let max_repeats = self.attachment.config.video_max_repeats;
        Ok(self.attachment.handle()?.video().take_frame(max_repeats))
    }

    /// One period of audio, or `None` when the consumer should render silence.
    pub fn take_audio_period(&self) -> Result<Option<Bytes>> {
        Ok(self.attachment.handle()?.audio().take_period())
    }

    pub fn take_subtitle(&self) -> Result<Option<Buffer>> {
        Ok(self.attachment.handle()?.subtitle().take())
    }

    pub fn channel(&self) -> &str {
        &self.attachment.config.channel
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.attachment.config
    }

    pub fn is_started(&self) -> bool {
        self.attachment.is_attached()
    }
}

impl fmt::Debug for AppSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppSrc")
            .field("channel", &self.channel())
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pair(config: ChannelConfig) -> (SurfaceRegistry, AppSink, AppSrc) {
        let registry = SurfaceRegistry::new();
        let sink = AppSink::new(registry.clone(), config.clone()).unwrap();
        let src = AppSrc::new(registry.clone(), config).unwrap();
        (registry, sink, src)
    }

    #[test]
    fn test_calls_before_start_fail() {
        let (_, sink, src) = pair(ChannelConfig::default());

        assert!(matches!(
            sink.render(Buffer::new(vec![1])),
            Err(RelayError::NotStarted)
        ));
        assert!(matches!(src.create(), Err(RelayError::NotStarted)));
        assert!(matches!(sink.stop(), Err(RelayError::NotStarted)));
    }

    #[test]
    fn test_double_start_fails() {
        let (_, sink, _) = pair(ChannelConfig::default());
        sink.start().unwrap();

        let err = sink.start().unwrap_err();
        assert!(matches!(err, RelayError::AlreadyStarted(ref c) if c == "default"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let registry = SurfaceRegistry::new();
        let result = AppSink::new(registry, ChannelConfig::default().with_channel(""));
        assert!(matches!(result, Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn test_caps_reported_only_on_change() {
        let (_, sink, src) = pair(ChannelConfig::default());
        sink.start().unwrap();
        src.start().unwrap();

        sink.set_caps(Caps::new("application/x-custom")).unwrap();
        sink.render(Buffer::new(vec![1])).unwrap();
        assert!(src.create().unwrap().caps.is_some());

        sink.render(Buffer::new(vec![2])).unwrap();
        assert!(src.create().unwrap().caps.is_none());
    }

    #[test]
    fn test_stop_releases_surface() {
        let (registry, sink, src) = pair(ChannelConfig::default());
        sink.start().unwrap();
        src.start().unwrap();
        assert_eq!(registry.refcount("default"), Some(2));

        sink.stop().unwrap();
        assert_eq!(registry.refcount("default"), Some(1));
        src.stop().unwrap();
        assert!(registry.is_empty());
        assert!(!sink.is_started());
    }

    #[test]
    fn test_producer_stop_resets_client() {
        let (registry, sink, src) = pair(ChannelConfig::default());
        sink.start().unwrap();
        src.start().unwrap();
        sink.set_caps(Caps::new("application/x-custom")).unwrap();

        sink.stop().unwrap();

        let handle = registry.get_or_create("default");
        assert!(!handle.client().has_caps());
    }

    #[test]
    fn test_unlock_interrupts_create() {
        let (_, sink, src) = pair(ChannelConfig::default());
        let src = Arc::new(src);
        sink.start().unwrap();
        src.start().unwrap();

        let consumer = {
            let src = Arc::clone(&src);
            thread::spawn(move || src.create())
        };

        thread::sleep(Duration::from_millis(30));
        src.unlock();
        assert!(consumer.join().unwrap().unwrap_err().is_cancellation());

        // Producer pushes are refused while the consumer is unlocked.
        assert!(sink.render(Buffer::new(vec![1])).is_err());

        src.unlock_stop();
        sink.set_caps(Caps::new("application/x-custom")).unwrap();
        sink.render(Buffer::new(vec![2])).unwrap();
        assert_eq!(src.create().unwrap().buffer.data().as_ref(), &[2]);
    }

    #[test]
    fn test_consumer_stop_leaves_producer_usable() {
        let (_, sink, src) = pair(ChannelConfig::default());
        sink.start().unwrap();
        src.start().unwrap();

        src.stop().unwrap();
        sink.render(Buffer::new(vec![1])).unwrap();
    }

    #[test]
    fn test_media_slots_through_roles() {
        let (_, sink, src) = pair(ChannelConfig {
            video_max_repeats: 2,
            ..ChannelConfig::default()
        });
        sink.start().unwrap();
        src.start().unwrap();

        sink.set_video_caps(Caps::new("video/x-raw")).unwrap();
        sink.put_video_frame(Buffer::new(vec![7])).unwrap();
        assert!(src.take_video_frame().unwrap().is_some());
        assert!(src.take_video_frame().unwrap().is_some());
        assert!(src.take_video_frame().unwrap().is_none());
        assert_eq!(src.video_caps().unwrap(), Some(Caps::new("video/x-raw")));

        let audio = Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("rate", 8000)
            .field("channels", 1)
            .build();
        sink.set_audio_caps(&audio).unwrap();
        // 25 ms at 8 kHz mono S16 = 400 bytes
        sink.push_audio(&[0u8; 400]).unwrap();
        assert_eq!(src.take_audio_period().unwrap().unwrap().len(), 400);
        assert!(src.take_audio_period().unwrap().is_none());

        sink.put_subtitle(Buffer::new(&b"hi"[..])).unwrap();
        assert!(src.take_subtitle().unwrap().is_some());
    }

    #[test]
    fn test_producer_applies_audio_timing() {
        let config = ChannelConfig::low_latency();
        let (registry, sink, _) = pair(config.clone());
        sink.start().unwrap();

        let handle = registry.get_or_create("default");
        assert_eq!(handle.audio().timing(), config.audio);
    }

    #[test]
    fn test_caps_change_while_blocked_reported_with_buffer() {
        let (_, sink, src) = pair(ChannelConfig::default());
        let src = Arc::new(src);
        sink.start().unwrap();
        src.start().unwrap();

        let first = Caps::builder("application/x-custom").field("version", 1).build();
        sink.set_caps(first.clone()).unwrap();
        sink.render(Buffer::new(vec![1])).unwrap();
        assert_eq!(src.create().unwrap().caps, Some(first));

        let consumer = {
            let src = Arc::clone(&src);
            thread::spawn(move || src.create())
        };
        thread::sleep(Duration::from_millis(30));

        let second = Caps::builder("application/x-custom").field("version", 2).build();
        sink.set_caps(second.clone()).unwrap();
        sink.render(Buffer::new(vec![2])).unwrap();

        let pulled = consumer.join().unwrap().unwrap();
        assert_eq!(pulled.caps, Some(second));
        assert_eq!(pulled.buffer.data().as_ref(), &[2]);
    }

    #[test]
    fn test_stop_fails_create_that_has_not_blocked_yet() {
        let (_, sink, src) = pair(ChannelConfig::default());
        sink.start().unwrap();
        src.start().unwrap();

        // A create that took its handle but has not parked yet.
        let (handle, epoch) = src.attachment.pinned().unwrap();
        src.stop().unwrap();

        let result = handle.client().pull_with_caps(epoch);
        assert!(matches!(result, Err(RelayError::Flushing)));

        // The producer keeps its surface and is not flushing.
        sink.set_caps(Caps::new("application/x-custom")).unwrap();
        sink.render(Buffer::new(vec![1])).unwrap();
    }

    #[test]
    fn test_media_caps_checked_against_slot() {
        let (_, sink, src) = pair(ChannelConfig::default());
        sink.start().unwrap();
        src.start().unwrap();

        let video_layout = Caps::builder("video/x-raw")
            .field("format", "S16LE")
            .field("rate", 8000)
            .field("channels", 1)
            .build();
        assert!(matches!(
            sink.set_audio_caps(&video_layout),
            Err(RelayError::InvalidCaps(_))
        ));
        assert!(sink.push_audio(&[0u8; 400]).is_err());

        assert!(matches!(
            sink.set_video_caps(Caps::new("audio/x-raw")),
            Err(RelayError::InvalidCaps(_))
        ));
        assert_eq!(src.video_caps().unwrap(), None);
    }

    #[test]
    fn test_audio_latency_follows_config() {
        let config = ChannelConfig::low_latency();
        let (_, sink, src) = pair(config.clone());
        assert!(matches!(src.audio_latency(), Err(RelayError::NotStarted)));

        sink.start().unwrap();
        src.start().unwrap();
        assert_eq!(src.audio_latency().unwrap(), config.audio.latency_time);
    }
}
