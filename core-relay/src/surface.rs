//! # Surface
//!
//! The shared state behind one channel name: the app-data
//! [`DeferredClient`] plus one slot per raw medium. Surfaces are only
//! reachable through a [`SurfaceHandle`](crate::SurfaceHandle) obtained from
//! the [`SurfaceRegistry`](crate::SurfaceRegistry).

use crate::client::DeferredClient;
use crate::media::{AudioSlot, AudioTiming, SubtitleSlot, VideoSlot};
use crate::strategy::ClientOptions;
use core_runtime::events::EventBus;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;

pub struct Surface {
    name: String,
    client: DeferredClient,
    video: Mutex<VideoSlot>,
    audio: Mutex<AudioSlot>,
    subtitle: Mutex<SubtitleSlot>,
}

impl Surface {
    pub(crate) fn new(name: &str, options: ClientOptions, events: Option<EventBus>) -> Self {
        let client = DeferredClient::new(name, options);
        let client = match events {
            Some(bus) => client.with_event_bus(bus),
            None => client,
        };

        Self {
            name: name.to_string(),
            client,
            video: Mutex::new(VideoSlot::default()),
            audio: Mutex::new(AudioSlot::new(AudioTiming::default())),
            subtitle: Mutex::new(SubtitleSlot::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The app-data handoff for this channel.
    pub fn client(&self) -> &DeferredClient {
        &self.client
    }

    pub fn video(&self) -> MutexGuard<'_, VideoSlot> {
        self.video.lock()
    }

    pub fn audio(&self) -> MutexGuard<'_, AudioSlot> {
        self.audio.lock()
    }

    pub fn subtitle(&self) -> MutexGuard<'_, SubtitleSlot> {
        self.subtitle.lock()
    }

    /// Called once the last holder is gone.
    pub(crate) fn teardown(&self) {
        self.client.reset();
        self.video.lock().clear();
        self.audio.lock().clear();
        self.subtitle.lock().clear();
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("name", &self.name)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
