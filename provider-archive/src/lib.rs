//! # Archive Provider
//!
//! Client for the public archive's metadata API.
//!
//! ## Overview
//!
//! This module provides:
//! - Item metadata lookup with timeout and exponential backoff
//! - Lenient parsing of the loosely typed file listing
//! - Audio file selection ordered by track number
//! - Download URL construction for the offline manager

pub mod client;
pub mod error;
pub mod types;

pub use client::{ArchiveClient, ArchiveConfig, ItemDetails, DEFAULT_BASE_URL};
pub use error::{ArchiveError, Result};
pub use types::{ArchiveFile, ItemMetadata, MetadataResponse};
