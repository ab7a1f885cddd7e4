//! # Caps
//!
//! [`Caps`] describe the layout of the data flowing through a channel: a
//! media type, a set of typed fields and an ordered list of stream-header
//! buffers that a fresh consumer must see before any data.
//!
//! Caps are compared by value. Two independently built caps with the same
//! media type, fields and header payloads are equal.
//!
//! ```rust
//! use core_relay::{Buffer, Caps};
//!
//! let caps = Caps::builder("video/x-h264")
//!     .field("width", 1280)
//!     .field("height", 720)
//!     .fraction("framerate", 30, 1)
//!     .field("stream-format", "byte-stream")
//!     .stream_headers(vec![Buffer::header(vec![0, 0, 0, 1, 0x67])])
//!     .build();
//!
//! assert_eq!(caps.get_int("width"), Some(1280));
//! assert!(caps.has_stream_headers());
//! ```

use crate::buffer::Buffer;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Typed caps field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Fraction(i32, i32),
}

impl CapsValue {
    fn type_name(&self) -> &'static str {
        match self {
            CapsValue::Int(_) => "int",
            CapsValue::Bool(_) => "boolean",
            CapsValue::Str(_) => "string",
            CapsValue::Fraction(_, _) => "fraction",
        }
    }
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapsValue::Int(v) => write!(f, "{}", v),
            CapsValue::Bool(v) => write!(f, "{}", v),
            CapsValue::Str(v) => write!(f, "{}", v),
            CapsValue::Fraction(n, d) => write!(f, "{}/{}", n, d),
        }
    }
}

impl From<i32> for CapsValue {
    fn from(v: i32) -> Self {
        CapsValue::Int(i64::from(v))
    }
}

impl From<i64> for CapsValue {
    fn from(v: i64) -> Self {
        CapsValue::Int(v)
    }
}

impl From<bool> for CapsValue {
    fn from(v: bool) -> Self {
        CapsValue::Bool(v)
    }
}

impl From<&str> for CapsValue {
    fn from(v: &str) -> Self {
        CapsValue::Str(v.to_string())
    }
}

impl From<String> for CapsValue {
    fn from(v: String) -> Self {
        CapsValue::Str(v)
    }
}

/// Which per-medium path a media type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// Immutable, value-comparable format descriptor.
#[derive(Clone)]
pub struct Caps {
    inner: Arc<CapsInner>,
}

#[derive(PartialEq, Eq)]
struct CapsInner {
    media_type: String,
    fields: BTreeMap<String, CapsValue>,
    stream_headers: Vec<Buffer>,
}

impl Caps {
    /// Caps with a media type and nothing else.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self::builder(media_type).build()
    }

    pub fn builder(media_type: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            media_type: media_type.into(),
            fields: BTreeMap::new(),
            stream_headers: Vec::new(),
        }
    }

    pub fn media_type(&self) -> &str {
        &self.inner.media_type
    }

    pub fn field(&self, name: &str) -> Option<&CapsValue> {
        self.inner.fields.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.field(name)? {
            CapsValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.field(name)? {
            CapsValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_fraction(&self, name: &str) -> Option<(i32, i32)> {
        match self.field(name)? {
            CapsValue::Fraction(n, d) => Some((*n, *d)),
            _ => None,
        }
    }

    /// Stream headers, in the order they must be delivered.
    pub fn stream_headers(&self) -> &[Buffer] {
        &self.inner.stream_headers
    }

    pub fn has_stream_headers(&self) -> bool {
        !self.inner.stream_headers.is_empty()
    }

    /// Classifies the caps by the top-level part of the media type.
    pub fn medium(&self) -> Medium {
        let top = self
            .inner
            .media_type
            .split('/')
            .next()
            .unwrap_or_default();

        match top {
            "video" | "image" => Medium::Video,
            "audio" => Medium::Audio,
            "text" | "subpicture" | "application" if self.is_subtitle() => Medium::Subtitle,
            _ => Medium::Other,
        }
    }

    fn is_subtitle(&self) -> bool {
        let media_type = self.inner.media_type.as_str();
        media_type.starts_with("text/")
            || media_type.starts_with("subpicture/")
            || media_type == "application/x-subtitle"
    }
}

impl PartialEq for Caps {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for Caps {}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.media_type)?;
        for (name, value) in &self.inner.fields {
            write!(f, ", {}=({}){}", name, value.type_name(), value)?;
        }
        if self.has_stream_headers() {
            f.write_str(", streamheader=(buffer)<")?;
            for (i, header) in self.inner.stream_headers.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                for byte in header.data().iter() {
                    write!(f, "{:02x}", byte)?;
                }
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caps({})", self)
    }
}

/// Builder for [`Caps`].
#[derive(Debug)]
pub struct CapsBuilder {
    media_type: String,
    fields: BTreeMap<String, CapsValue>,
    stream_headers: Vec<Buffer>,
}

impl CapsBuilder {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<CapsValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn fraction(mut self, name: impl Into<String>, num: i32, den: i32) -> Self {
        self.fields.insert(name.into(), CapsValue::Fraction(num, den));
        self
    }

    /// Sets the stream headers. Each buffer is flagged as a header.
    pub fn stream_headers(mut self, headers: Vec<Buffer>) -> Self {
        self.stream_headers = headers
            .into_iter()
            .map(|h| {
                if h.is_header() {
                    h
                } else {
                    Buffer::header(h.data().clone())
                }
            })
            .collect();
        self
    }

    pub fn build(self) -> Caps {
        Caps {
            inner: Arc::new(CapsInner {
                media_type: self.media_type,
                fields: self.fields,
                stream_headers: self.stream_headers,
            }),
        }
    }
}
