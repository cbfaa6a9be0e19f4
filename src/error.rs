// src/error.rs

//! Crate-wide error type
//!
//! Every failure here is fatal to the current invocation: the tool fails
//! closed, leaving no partial manifest entries and no partition ranges that
//! the manifest references but that were never fully written. The one
//! exception is `MissingManifestEntry`, which `install_optional` and
//! `download` downgrade to a skip-with-warning.

use std::path::PathBuf;
use thiserror::Error;

use crate::compression::CompressionError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Unknown component: {0}")]
    UnsupportedComponent(String),

    #[error("No partition table reader available (need cgpt or partx on PATH)")]
    PartitionToolMissing,

    #[error("Transfer incomplete for {name}: {actual} bytes decompressed")]
    TransferIncomplete { name: String, actual: u64 },

    #[error("Mount failed: {0}")]
    MountFailure(String),

    #[error("Fetch failed: {0}")]
    RemoteFetchFailure(String),

    #[error("Manifest has no entry for {component}.{subtype}")]
    MissingManifestEntry { component: String, subtype: String },

    #[error("Destination not usable for {component}: {reason}")]
    UnsupportedDestination { component: String, reason: String },

    #[error("Copy geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
