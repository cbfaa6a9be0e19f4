// src/lib.rs

//! Depot payload packaging and installation
//!
//! Content-addressed, manifest-driven distribution of disk images, toolkit
//! archives and configuration bundles for an OS-manufacturing pipeline.
//!
//! # Architecture
//!
//! - Manifest-first: a single JSON file is the source of truth; blobs next
//!   to it are immutable and content-addressed by MD5 of compressed bytes
//! - Producer side: `add`/`add_meta` commit blobs before touching the
//!   manifest, so readers never observe a dangling reference
//! - Consumer side: `install`/`download` stream blobs from local paths,
//!   HTTP or multicast onto block devices, directories or files
//! - Scoped cleanup: every mount and scratch file is registered and torn
//!   down on all exit paths, including signals

pub mod cleanup;
pub mod commands;
pub mod component;
pub mod compression;
pub mod config;
pub mod disk;
mod error;
pub mod hash;
pub mod manifest;
pub mod store;
pub mod stub;
pub mod transport;

pub use error::{Error, Result};
