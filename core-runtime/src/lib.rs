//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline audio core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions,
//! the `CoreEvent` vocabulary and the host bridges bundled in `CoreConfig`.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
