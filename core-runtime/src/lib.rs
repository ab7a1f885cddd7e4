//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the inter relay:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Relay event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that `core-relay` depends on.
//! It establishes the logging conventions and the event broadcasting
//! mechanism used to observe channel lifecycles from the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
