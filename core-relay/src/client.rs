//! # Deferred Client
//!
//! The synchronization core of a channel. A producer publishes caps and
//! buffers; a consumer on an unrelated thread waits for caps, then pulls
//! stream headers followed by data.
//!
//! ## Guarantees
//!
//! - Every operation runs under one mutex, released only while parked on a
//!   condition variable. Waits always re-check state after waking.
//! - Stream headers queued by a format change are delivered before any data.
//! - Data queued under old caps is discarded when the caps change by value.
//! - [`set_flushing(true)`](DeferredClient::set_flushing) wakes every blocked
//!   caller with [`RelayError::Flushing`]. Detaching roles flush before they
//!   release their surface, so no thread is left parked on a dead client.
//!
//! ## Usage
//!
//! ```rust
//! use core_relay::{Buffer, Caps, ClientOptions, DeferredClient};
//!
//! let client = DeferredClient::new("default", ClientOptions::latest());
//!
//! let headers = vec![Buffer::header(vec![1]), Buffer::header(vec![2])];
//! client.set_caps(Caps::builder("video/x-h264").stream_headers(headers).build());
//! client.push_buffer(Buffer::new(vec![3])).unwrap();
//!
//! let update = client.get_caps(true).unwrap().unwrap();
//! assert!(update.changed);
//!
//! assert_eq!(client.get_buffer().unwrap().data().as_ref(), &[1]);
//! assert_eq!(client.get_buffer().unwrap().data().as_ref(), &[2]);
//! assert_eq!(client.get_buffer().unwrap().data().as_ref(), &[3]);
//! ```

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{RelayError, Result};
use crate::strategy::{BufferingStrategy, ClientOptions, Phase, Push};
use core_runtime::events::{DropReason, EventBus, RelayEvent};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Caps returned by [`DeferredClient::get_caps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsUpdate {
    pub caps: Caps,
    /// `true` if the caps were replaced since the last fetch.
    pub changed: bool,
}

/// Counters kept by a client since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub buffers_pushed: u64,
    pub buffers_delivered: u64,
    pub buffers_dropped: u64,
    pub headers_delivered: u64,
    pub caps_changes: u64,
    pub resets: u64,
}

struct ClientState {
    caps: Option<Caps>,
    caps_changed: bool,
    headers: VecDeque<Buffer>,
    strategy: BufferingStrategy,
    flushing: bool,
    /// Bumped on every flush so parked callers notice one even if flushing
    /// was cleared again before they woke.
    flush_epoch: u64,
    stats: ClientStats,
}

#[derive(Debug, Clone, Copy)]
enum Wait {
    Never,
    Forever,
    Until(Instant),
}

impl Wait {
    fn timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Wait::Until(deadline),
            None => Wait::Forever,
        }
    }
}

/// Caps and buffer handoff between one producer and one consumer.
pub struct DeferredClient {
    channel: String,
    options: ClientOptions,
    state: Mutex<ClientState>,
    caps_cond: Condvar,
    buffer_cond: Condvar,
    space_cond: Condvar,
    events: Option<EventBus>,
}

impl DeferredClient {
    pub fn new(channel: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            channel: channel.into(),
            options,
            state: Mutex::new(ClientState {
                caps: None,
                caps_changed: false,
                headers: VecDeque::new(),
                strategy: BufferingStrategy::new(&options),
                flushing: false,
                flush_epoch: 0,
                stats: ClientStats::default(),
            }),
            caps_cond: Condvar::new(),
            buffer_cond: Condvar::new(),
            space_cond: Condvar::new(),
            events: None,
        }
    }

    /// Publishes drops, caps changes and resets on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    // ========================================================================
    // Producer Side
    // ========================================================================

    /// Replaces the current caps. Never blocks.
    ///
    /// Queues the new stream headers when they must be (re)sent and discards
    /// pending data if the caps differ by value from the previous ones.
    pub fn set_caps(&self, caps: Caps) {
        let mut state = self.state.lock();

        if needs_header_resend(state.caps.as_ref(), &caps) {
            state.headers.clear();
            state.headers.extend(caps.stream_headers().iter().cloned());
            debug!(
                channel = %self.channel,
                headers = state.headers.len(),
                "queued stream headers"
            );
        }

        let changed = state.caps.as_ref() != Some(&caps);
        let dropped = if changed { state.strategy.clear() } else { 0 };

        if changed {
            state.stats.caps_changes += 1;
            state.stats.buffers_dropped += dropped;
            debug!(channel = %self.channel, caps = %caps, dropped, "caps changed");
        }

        let description = changed.then(|| caps.to_string());
        let headers_queued = state.headers.len();

        state.caps = Some(caps);
        state.caps_changed = true;
        self.caps_cond.notify_all();
        if dropped > 0 {
            self.space_cond.notify_all();
        }
        drop(state);

        if let Some(caps) = description {
            self.emit(RelayEvent::CapsChanged {
                channel: self.channel.clone(),
                caps,
                headers_queued,
            });
        }
        self.emit_dropped(dropped, DropReason::CapsChanged);
    }

    /// Offers a buffer to the buffering strategy.
    ///
    /// Under [`OverflowPolicy::Block`](crate::OverflowPolicy::Block) this waits
    /// for the consumer to make room.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Flushing`] if the client is flushing, including
    /// when flushing starts while the producer is blocked.
    pub fn push_buffer(&self, mut buf: Buffer) -> Result<()> {
        let mut state = self.state.lock();
        let epoch = state.flush_epoch;

        let outcome = loop {
            if state.flushing || state.flush_epoch != epoch {
                state.stats.buffers_dropped += 1;
                drop(state);
                trace!(channel = %self.channel, "discarding buffer while flushing");
                self.emit_dropped(1, DropReason::Flushing);
                return Err(RelayError::Flushing);
            }

            match state.strategy.push(buf) {
                Push::Done(outcome) => break outcome,
                Push::Full(returned) => {
                    buf = returned;
                    trace!(channel = %self.channel, "queue full, waiting for space");
                    self.space_cond.wait(&mut state);
                }
            }
        };

        state.stats.buffers_pushed += 1;
        state.stats.buffers_dropped += outcome.dropped;

        if outcome.queued {
            trace!(
                channel = %self.channel,
                pending = state.strategy.len(),
                "buffer queued"
            );
            self.buffer_cond.notify_one();
        }
        drop(state);

        if let Some(reason) = outcome.reason {
            debug!(
                channel = %self.channel,
                dropped = outcome.dropped,
                ?reason,
                "dropped pending buffers"
            );
            self.emit_dropped(outcome.dropped, reason);
        }

        Ok(())
    }

    // ========================================================================
    // Consumer Side
    // ========================================================================

    /// Returns the current caps, optionally waiting until there are some.
    ///
    /// With `wait == false` and no caps yet, returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Flushing`] if waiting is requested while the
    /// client is flushing, or flushing starts during the wait.
    pub fn get_caps(&self, wait: bool) -> Result<Option<CapsUpdate>> {
        self.caps_with(if wait { Wait::Forever } else { Wait::Never })
    }

    /// Non-blocking [`get_caps`](Self::get_caps).
    pub fn try_get_caps(&self) -> Option<CapsUpdate> {
        let mut state = self.state.lock();
        take_caps_update(&mut state, false)
    }

    /// Like `get_caps(true)` but gives up after `timeout` with `Ok(None)`.
    pub fn get_caps_timeout(&self, timeout: Duration) -> Result<Option<CapsUpdate>> {
        self.caps_with(Wait::timeout(timeout))
    }

    fn caps_with(&self, wait: Wait) -> Result<Option<CapsUpdate>> {
        let mut state = self.state.lock();

        if state.caps.is_some() {
            return Ok(take_caps_update(&mut state, false));
        }
        if matches!(wait, Wait::Never) {
            return Ok(None);
        }

        trace!(channel = %self.channel, "waiting for caps");
        let epoch = state.flush_epoch;
        if !self.park(&self.caps_cond, &mut state, wait, epoch, |s| s.caps.is_some())? {
            return Ok(None);
        }
        debug_assert!(state.caps.is_some(), "woke from caps wait without caps");

        Ok(take_caps_update(&mut state, true))
    }

    /// Returns the next buffer, blocking until one is available.
    ///
    /// Queued stream headers come first. Pulling a data buffer ends pre-roll.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Flushing`] if the client is flushing.
    pub fn get_buffer(&self) -> Result<Buffer> {
        let buffer = self.pull(Wait::Forever)?;
        debug_assert!(buffer.is_some(), "unbounded buffer wait returned nothing");
        buffer.ok_or(RelayError::Flushing)
    }

    /// Non-blocking [`get_buffer`](Self::get_buffer). Returns `None` when
    /// nothing is queued or the client is flushing.
    pub fn try_get_buffer(&self) -> Option<Buffer> {
        self.pull(Wait::Never).ok().flatten()
    }

    /// Like [`get_buffer`](Self::get_buffer) but gives up after `timeout`
    /// with `Ok(None)`.
    pub fn get_buffer_timeout(&self, timeout: Duration) -> Result<Option<Buffer>> {
        self.pull(Wait::timeout(timeout))
    }

    /// Waits for caps, then for the next buffer, in one locked sequence.
    ///
    /// Fails with [`RelayError::Flushing`] if the client was flushed at any
    /// point after `epoch` was read, including before this call started.
    /// The caps are returned too if they changed since they were last
    /// fetched, so a change made while parked is reported with the first
    /// buffer that follows it.
    pub(crate) fn pull_with_caps(&self, epoch: u64) -> Result<(Option<Caps>, Buffer)> {
        let mut state = self.state.lock();

        if state.caps.is_none() {
            trace!(channel = %self.channel, "waiting for caps");
            self.park(&self.caps_cond, &mut state, Wait::Forever, epoch, |s| {
                s.caps.is_some()
            })?;
        }

        let buffer = self
            .pull_locked(&mut state, Wait::Forever, epoch)?
            .ok_or(RelayError::Flushing)?;
        let caps = take_caps_update(&mut state, false)
            .filter(|update| update.changed)
            .map(|update| update.caps);

        Ok((caps, buffer))
    }

    /// Current flush epoch. Pass it to [`pull_with_caps`](Self::pull_with_caps)
    /// to make every later flush fail that call.
    pub(crate) fn flush_epoch(&self) -> u64 {
        self.state.lock().flush_epoch
    }

    fn pull(&self, wait: Wait) -> Result<Option<Buffer>> {
        let mut state = self.state.lock();
        let epoch = state.flush_epoch;
        self.pull_locked(&mut state, wait, epoch)
    }

    fn pull_locked(
        &self,
        state: &mut MutexGuard<'_, ClientState>,
        wait: Wait,
        epoch: u64,
    ) -> Result<Option<Buffer>> {
        if state.flushing || state.flush_epoch != epoch {
            return Err(RelayError::Flushing);
        }

        let ready = |s: &ClientState| !s.headers.is_empty() || !s.strategy.is_empty();
        if !ready(&**state) {
            if matches!(wait, Wait::Never) {
                return Ok(None);
            }
            trace!(channel = %self.channel, "waiting for a buffer");
            if !self.park(&self.buffer_cond, state, wait, epoch, ready)? {
                return Ok(None);
            }
        }

        if let Some(header) = state.headers.pop_front() {
            state.stats.headers_delivered += 1;
            trace!(channel = %self.channel, len = header.len(), "delivering stream header");
            return Ok(Some(header));
        }

        let buffer = state.strategy.pop();
        if buffer.is_some() {
            state.stats.buffers_delivered += 1;
            self.space_cond.notify_one();
        }
        Ok(buffer)
    }

    /// Parks on `cond` until `ready` holds. Returns `Ok(false)` on timeout.
    ///
    /// Any flush since `epoch` fails the wait.
    fn park<F>(
        &self,
        cond: &Condvar,
        state: &mut MutexGuard<'_, ClientState>,
        wait: Wait,
        epoch: u64,
        ready: F,
    ) -> Result<bool>
    where
        F: Fn(&ClientState) -> bool,
    {
        loop {
            if state.flushing || state.flush_epoch != epoch {
                return Err(RelayError::Flushing);
            }
            if ready(&**state) {
                return Ok(true);
            }
            match wait {
                Wait::Never => return Ok(false),
                Wait::Forever => cond.wait(state),
                Wait::Until(deadline) => {
                    if cond.wait_until(state, deadline).timed_out() {
                        if state.flushing || state.flush_epoch != epoch {
                            return Err(RelayError::Flushing);
                        }
                        return Ok(ready(&**state));
                    }
                }
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drops caps, headers and pending data and returns to pre-roll.
    ///
    /// The flushing state is left untouched.
    pub fn reset(&self) {
        let mut state = self.state.lock();

        state.caps = None;
        state.caps_changed = false;
        state.headers.clear();
        let dropped = state.strategy.reset();
        state.stats.resets += 1;
        state.stats.buffers_dropped += dropped;
        self.space_cond.notify_all();
        drop(state);

        debug!(channel = %self.channel, dropped, "client reset");
        self.emit(RelayEvent::ClientReset {
            channel: self.channel.clone(),
        });
        self.emit_dropped(dropped, DropReason::Reset);
    }

    /// Enters or leaves the flushing state.
    ///
    /// Entering wakes every blocked caller with [`RelayError::Flushing`];
    /// later blocking calls fail immediately until flushing is cleared.
    /// Queued caps and data are kept.
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock();
        if state.flushing == flushing {
            return;
        }
        state.flushing = flushing;
        if flushing {
            self.wake_all(&mut state);
        }
        drop(state);

        debug!(channel = %self.channel, flushing, "flushing state changed");
        self.emit(RelayEvent::FlushingChanged {
            channel: self.channel.clone(),
            flushing,
        });
    }

    /// Wakes every blocked caller with [`RelayError::Flushing`] without
    /// entering the flushing state. Later calls behave normally.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        self.wake_all(&mut state);
        drop(state);

        debug!(channel = %self.channel, "flushed blocked callers");
    }

    fn wake_all(&self, state: &mut ClientState) {
        state.flush_epoch += 1;
        self.caps_cond.notify_all();
        self.buffer_cond.notify_all();
        self.space_cond.notify_all();
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn options(&self) -> ClientOptions {
        self.options
    }

    /// Current caps, without clearing the changed flag.
    pub fn caps(&self) -> Option<Caps> {
        self.state.lock().caps.clone()
    }

    pub fn has_caps(&self) -> bool {
        self.state.lock().caps.is_some()
    }

    pub fn pending_buffers(&self) -> usize {
        self.state.lock().strategy.len()
    }

    pub fn pending_headers(&self) -> usize {
        self.state.lock().headers.len()
    }

    /// `true` once the consumer pulled a data buffer since the last reset.
    pub fn is_started(&self) -> bool {
        self.state.lock().strategy.phase() == Phase::Started
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().flushing
    }

    pub fn stats(&self) -> ClientStats {
        self.state.lock().stats
    }

    fn emit(&self, event: RelayEvent) {
        if let Some(bus) = &self.events {
            // No subscribers is fine.
            let _ = bus.emit(event);
        }
    }

    fn emit_dropped(&self, count: u64, reason: DropReason) {
        if count > 0 {
            self.emit(RelayEvent::BuffersDropped {
                channel: self.channel.clone(),
                count,
                reason,
            });
        }
    }
}

impl fmt::Debug for DeferredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeferredClient")
            .field("channel", &self.channel)
            .field("options", &self.options)
            .field("caps", &state.caps)
            .field("pending_headers", &state.headers.len())
            .field("pending_buffers", &state.strategy.len())
            .field("flushing", &state.flushing)
            .finish()
    }
}

fn take_caps_update(state: &mut ClientState, force_changed: bool) -> Option<CapsUpdate> {
    let caps = state.caps.clone()?;
    let changed = std::mem::take(&mut state.caps_changed) || force_changed;
    Some(CapsUpdate { caps, changed })
}

/// Whether `new` brings stream headers the consumer has not seen.
fn needs_header_resend(old: Option<&Caps>, new: &Caps) -> bool {
    let Some(old) = old else {
        return new.has_stream_headers();
    };

    if old == new || !new.has_stream_headers() {
        return false;
    }

    !old.has_stream_headers() || old.stream_headers() != new.stream_headers()
}
