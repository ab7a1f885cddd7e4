//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates (`core-runtime`, `core-relay`). Host applications can depend on
//! `inter-workspace` and enable the documented features without wiring each
//! crate individually.

#[cfg(feature = "relay")]
pub use core_relay as relay;
#[cfg(feature = "runtime")]
pub use core_runtime as runtime;
