//! # In-Process Relay
//!
//! Hands media from a producer pipeline to a consumer pipeline in the same
//! process, rendezvousing on a channel name.
//!
//! ## Overview
//!
//! This module handles:
//! - Caps and buffer handoff through a [`DeferredClient`]
//! - Stream-header replay when a consumer joins late or caps change
//! - Latest-only and keyframe pre-roll buffering
//! - Refcounted surfaces in a [`SurfaceRegistry`]
//! - Producer and consumer roles ([`AppSink`], [`AppSrc`])
//!
//! ```rust
//! use core_relay::{Buffer, Caps, ClientOptions, DeferredClient};
//!
//! let client = DeferredClient::new("default", ClientOptions::latest());
//! client.set_caps(Caps::new("application/x-custom"));
//! client.push_buffer(Buffer::new(vec![1, 2, 3])).unwrap();
//!
//! let update = client.try_get_caps().unwrap();
//! assert!(update.changed);
//! assert_eq!(client.try_get_buffer().unwrap().len(), 3);
//! ```

pub mod buffer;
pub mod caps;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod media;
pub mod registry;
pub mod strategy;
pub mod surface;

pub use buffer::Buffer;
pub use caps::{Caps, CapsBuilder, CapsValue, Medium};
pub use client::{CapsUpdate, ClientStats, DeferredClient};
pub use config::ChannelConfig;
pub use endpoint::{AppSink, AppSrc, Pulled};
pub use error::{RelayError, Result};
pub use media::{AudioFormat, AudioSlot, AudioTiming, SubtitleSlot, VideoSlot};
pub use registry::{SurfaceHandle, SurfaceRegistry};
pub use strategy::{BufferMode, ClientOptions, OverflowPolicy};
pub use surface::Surface;
