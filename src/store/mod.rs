// src/store/mod.rs

//! Content-addressed blob store
//!
//! Blobs are immutable compressed files named
//! `component[.subtype].md5hex.ext` where the hash covers the compressed
//! bytes. Identical content always lands on the same name (a re-add is a
//! no-op) and different content always produces a different name, so readers
//! need no locking and the store only ever grows by whole, finished files.
//!
//! Commit streams through a unique temp file in the payload directory while
//! hashing, then hard-links the temp into place, falling back to a copy when
//! the link fails. The blob is fully on disk before the caller is handed the
//! name to record in the manifest.

use crate::component::FILE_SUBTYPE;
use crate::error::Result;
use crate::hash::Hasher;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A committed blob, ready to be recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub component: String,
    pub subtype: String,
    pub name: String,
}

/// Construct a blob filename. The default `file` subtype is omitted.
pub fn blob_name(component: &str, subtype: &str, hash: &str, ext: &str) -> String {
    if subtype == FILE_SUBTYPE {
        format!("{}.{}.{}", component, hash, ext)
    } else {
        format!("{}.{}.{}.{}", component, subtype, hash, ext)
    }
}

/// The payload directory holding content-addressed blobs
#[derive(Debug, Clone)]
pub struct PayloadStore {
    dir: PathBuf,
}

impl PayloadStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Payload directory sibling to a manifest path
    pub fn for_manifest(manifest_path: &Path) -> Result<Self> {
        let dir = manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Begin committing a blob; write compressed bytes into the returned
    /// handle, then call [`BlobCommit::finish`]
    pub fn committer(&self, component: &str, subtype: &str, ext: &str) -> Result<BlobCommit> {
        let temp = tempfile::Builder::new()
            .prefix(".blob.")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        Ok(BlobCommit {
            dir: self.dir.clone(),
            temp,
            hasher: Hasher::new(),
            written: 0,
            component: component.to_string(),
            subtype: subtype.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Commit a blob from an in-memory buffer
    pub fn commit_bytes(
        &self,
        component: &str,
        subtype: &str,
        ext: &str,
        data: &[u8],
    ) -> Result<BlobRef> {
        let mut commit = self.committer(component, subtype, ext)?;
        commit.write_all(data)?;
        commit.finish()
    }

    /// Absolute path of a blob by name
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// In-progress blob commit: a unique temp file plus a running hash
pub struct BlobCommit {
    dir: PathBuf,
    temp: NamedTempFile,
    hasher: Hasher,
    written: u64,
    component: String,
    subtype: String,
    ext: String,
}

impl BlobCommit {
    /// Compressed bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finalize: derive the content-addressed name and link the temp file
    /// into place
    pub fn finish(self) -> Result<BlobRef> {
        let hash = self.hasher.finalize();
        let name = blob_name(&self.component, &self.subtype, &hash, &self.ext);
        let dest = self.dir.join(&name);

        let temp_path = self.temp.into_temp_path();

        if dest.exists() {
            // identical content already committed; the temp file is dropped
            debug!("Blob already present: {}", name);
        } else {
            // hard link keeps this a metadata operation; copy covers
            // cross-device payload directories
            if fs::hard_link(&temp_path, &dest).is_err() {
                fs::copy(&temp_path, &dest)?;
            }
            fs::set_permissions(&dest, fs::Permissions::from_mode(0o644))?;
            debug!("Committed blob {} ({} bytes)", name, self.written);
        }

        Ok(BlobRef {
            component: self.component,
            subtype: self.subtype,
            name,
        })
    }
}

impl Write for BlobCommit {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.temp.as_file_mut().write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.as_file_mut().flush()
    }
}
