//! # Media Buffers
//!
//! A [`Buffer`] is a cheaply clonable, immutable chunk of media data plus its
//! timing metadata. Clones share the same allocation; the payload is freed
//! when the last holder drops it.
//!
//! ```rust
//! use core_relay::Buffer;
//! use std::time::Duration;
//!
//! let keyframe = Buffer::new(vec![0u8; 16]).with_pts(Duration::from_millis(40));
//! let delta = Buffer::delta(vec![1u8; 4]);
//!
//! assert!(keyframe.is_sync_point());
//! assert!(!delta.is_sync_point());
//! ```

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Immutable, shared media buffer.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

#[derive(Clone)]
struct BufferInner {
    data: Bytes,
    pts: Option<Duration>,
    dts: Option<Duration>,
    duration: Option<Duration>,
    offset: Option<u64>,
    delta_unit: bool,
    header: bool,
}

impl Buffer {
    /// Creates a sync-point buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data: data.into(),
                pts: None,
                dts: None,
                duration: None,
                offset: None,
                delta_unit: false,
                header: false,
            }),
        }
    }

    /// Creates a delta-unit buffer that cannot be decoded on its own.
    pub fn delta(data: impl Into<Bytes>) -> Self {
        Self::new(data).with_delta_unit(true)
    }

    /// Creates a stream-header buffer.
    pub fn header(data: impl Into<Bytes>) -> Self {
        let mut buffer = Self::new(data);
        Arc::make_mut(&mut buffer.inner).header = true;
        buffer
    }

    // Builders copy the metadata if the buffer is already shared, so a
    // published clone never observes the change.

    pub fn with_pts(mut self, pts: Duration) -> Self {
        Arc::make_mut(&mut self.inner).pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        Arc::make_mut(&mut self.inner).dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        Arc::make_mut(&mut self.inner).duration = Some(duration);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        Arc::make_mut(&mut self.inner).offset = Some(offset);
        self
    }

    pub fn with_delta_unit(mut self, delta_unit: bool) -> Self {
        Arc::make_mut(&mut self.inner).delta_unit = delta_unit;
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.inner.data
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn pts(&self) -> Option<Duration> {
        self.inner.pts
    }

    pub fn dts(&self) -> Option<Duration> {
        self.inner.dts
    }

    pub fn duration(&self) -> Option<Duration> {
        self.inner.duration
    }

    pub fn offset(&self) -> Option<u64> {
        self.inner.offset
    }

    /// `true` if decoding can start at this buffer.
    pub fn is_sync_point(&self) -> bool {
        !self.inner.delta_unit
    }

    pub fn is_delta_unit(&self) -> bool {
        self.inner.delta_unit
    }

    /// `true` if this buffer came from a caps stream-header list.
    pub fn is_header(&self) -> bool {
        self.inner.header
    }

    /// `true` if both handles point at the same published buffer.
    pub fn ptr_eq(a: &Buffer, b: &Buffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Buffer::ptr_eq(self, other)
            || (self.inner.delta_unit == other.inner.delta_unit
                && self.inner.data == other.inner.data)
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("pts", &self.inner.pts)
            .field("dts", &self.inner.dts)
            .field("duration", &self.inner.duration)
            .field("offset", &self.inner.offset)
            .field("delta_unit", &self.inner.delta_unit)
            .field("header", &self.inner.header)
            .finish()
    }
}
