//! # Surface Registry
//!
//! Maps channel names to live [`Surface`]s. A registry is an ordinary value
//! owned by the composition root and cloned into every producer and consumer
//! that should be able to rendezvous; separate registries never share
//! surfaces, which keeps tests isolated.
//!
//! ## Lifecycle
//!
//! [`get_or_create`](SurfaceRegistry::get_or_create) returns a
//! [`SurfaceHandle`]. Each handle (and each clone of one) is a holder. When
//! the last holder is released, the entry is removed under the registry
//! lock, so a concurrent `get_or_create` of the same name sees either the
//! old surface or a fresh one, never a half-destroyed entry. Teardown runs
//! after the lock is released, on a surface nothing can reach anymore.
//!
//! ```rust
//! use core_relay::SurfaceRegistry;
//!
//! let registry = SurfaceRegistry::new();
//! let producer = registry.get_or_create("default");
//! let consumer = registry.get_or_create("default");
//! assert_eq!(registry.refcount("default"), Some(2));
//!
//! registry.release(producer);
//! drop(consumer);
//! assert!(!registry.contains("default"));
//! ```

use crate::strategy::ClientOptions;
use crate::surface::Surface;
use core_runtime::config::RuntimeConfig;
use core_runtime::events::{EventBus, RelayEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Name-to-surface map shared by every clone.
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    surfaces: Mutex<HashMap<String, Weak<Surface>>>,
    events: Option<EventBus>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes surface lifecycle and client events on `bus`.
    pub fn with_event_bus(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                surfaces: Mutex::new(HashMap::new()),
                events: Some(bus),
            }),
        }
    }

    /// Registry with an event bus sized by `config`.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::with_event_bus(config.event_bus())
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.inner.events.as_ref()
    }

    /// Attaches to `name` with default client options.
    pub fn get_or_create(&self, name: &str) -> SurfaceHandle {
        self.get_or_create_with(name, &ClientOptions::default())
    }

    /// Attaches to `name`. `options` only apply if this call creates the surface.
    pub fn get_or_create_with(&self, name: &str, options: &ClientOptions) -> SurfaceHandle {
        let mut surfaces = self.inner.surfaces.lock();

        if let Some(surface) = surfaces.get(name).and_then(Weak::upgrade) {
            if surface.client().options() != *options {
                debug!(
                    channel = name,
                    existing = ?surface.client().options(),
                    requested = ?options,
                    "surface exists, keeping its client options"
                );
            }
            return SurfaceHandle::new(surface, &self.inner);
        }

        let surface = Arc::new(Surface::new(name, *options, self.inner.events.clone()));
        surfaces.insert(name.to_string(), Arc::downgrade(&surface));
        drop(surfaces);

        debug!(channel = name, ?options, "surface created");
        self.inner.emit(RelayEvent::SurfaceCreated {
            channel: name.to_string(),
        });

        SurfaceHandle::new(surface, &self.inner)
    }

    /// Releases one holder. Equivalent to dropping the handle.
    pub fn release(&self, handle: SurfaceHandle) {
        drop(handle);
    }

    /// Number of live holders of `name`.
    pub fn refcount(&self, name: &str) -> Option<usize> {
        let surfaces = self.inner.surfaces.lock();
        surfaces
            .get(name)
            .map(Weak::strong_count)
            .filter(|count| *count > 0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.refcount(name).is_some()
    }

    pub fn len(&self) -> usize {
        let surfaces = self.inner.surfaces.lock();
        surfaces.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live channel names, sorted.
    pub fn names(&self) -> Vec<String> {
        let surfaces = self.inner.surfaces.lock();
        let mut names: Vec<String> = surfaces
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for SurfaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceRegistry")
            .field("surfaces", &self.names())
            .field("has_event_bus", &self.inner.events.is_some())
            .finish()
    }
}

impl RegistryInner {
    fn emit(&self, event: RelayEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(event);
        }
    }

    fn release(&self, surface: Arc<Surface>) {
        let mut surfaces = self.surfaces.lock();

        if Arc::strong_count(&surface) > 1 {
            // Drop while locked so a concurrent release sees the new count.
            drop(surface);
            return;
        }

        let name = surface.name().to_string();
        let registered = surfaces
            .get(&name)
            .is_some_and(|w| Weak::ptr_eq(w, &Arc::downgrade(&surface)));
        if registered {
            surfaces.remove(&name);
        }
        drop(surfaces);

        // Removed and last holder: teardown can run unlocked.
        surface.teardown();
        drop(surface);

        debug!(channel = %name, "surface destroyed");
        self.emit(RelayEvent::SurfaceDestroyed { channel: name });
    }
}

// ============================================================================
// Surface Handle
// ============================================================================

/// One holder of a [`Surface`]. Cloning adds a holder; dropping releases one.
pub struct SurfaceHandle {
    surface: Option<Arc<Surface>>,
    registry: Arc<RegistryInner>,
}

impl SurfaceHandle {
    fn new(surface: Arc<Surface>, registry: &Arc<RegistryInner>) -> Self {
        Self {
            surface: Some(surface),
            registry: Arc::clone(registry),
        }
    }

    /// Releases this holder.
    pub fn release(self) {
        drop(self);
    }

    /// `true` if both handles hold the same surface.
    pub fn ptr_eq(a: &SurfaceHandle, b: &SurfaceHandle) -> bool {
        std::ptr::eq::<Surface>(&**a, &**b)
    }
}

impl Deref for SurfaceHandle {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        match &self.surface {
            Some(surface) => surface,
            // Only emptied inside `drop`.
            None => unreachable!("surface handle used after release"),
        }
    }
}

impl Clone for SurfaceHandle {
    fn clone(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            self.registry.release(surface);
        }
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("name", &self.surface.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}
