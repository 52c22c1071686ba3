//! Workspace placeholder crate.
//!
//! Exposes the `desktop-shims` feature so a host can depend on
//! `archive-offline-workspace` alone and get the service façade with the
//! desktop HTTP client and disk usage estimator wired in.

#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreError, MediaSource, OfflineLibrary};
