// src/disk/install.rs

//! Payload installation targets
//!
//! A destination is a block device (a target disk being provisioned), an
//! existing directory, or a plain file path. Disk-image components stream
//! straight onto mapped partitions of a block device; simple files land in
//! the payload directory of the device's stateful partition, or directly in
//! a directory destination.

use crate::compression;
use crate::disk::gpt::partition_device;
use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::io::Read;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory (relative to the stateful partition root) holding installed
/// file payloads and their activation stubs.
pub const INSTALL_DIR: &str = "cros_payloads";

/// Test-image partition mapping: (source partition, target partition).
/// The rootfs is listed last so an interrupted install never leaves a
/// bootable-looking target with missing pieces.
pub const TEST_IMAGE_PART_MAP: &[(u32, u32)] = &[(1, 1), (4, 2), (3, 3)];

/// Source partition carrying the root filesystem
pub const ROOTFS_SOURCE_PART: u32 = 3;

/// Classified installation destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    BlockDevice(PathBuf),
    Directory(PathBuf),
    File(PathBuf),
}

impl Destination {
    pub fn classify(path: &Path) -> Result<Destination> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_block_device() => {
                Ok(Destination::BlockDevice(path.to_path_buf()))
            }
            Ok(meta) if meta.is_dir() => Ok(Destination::Directory(path.to_path_buf())),
            _ => Ok(Destination::File(path.to_path_buf())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Destination::BlockDevice(p) | Destination::Directory(p) | Destination::File(p) => p,
        }
    }
}

/// Surface a permission failure on a device node as a destination problem;
/// the sudo prefix covers mount/umount but raw partition writes open the
/// node directly and need an already-privileged process.
fn classify_open_error(node: &Path, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        Error::UnsupportedDestination {
            component: node.display().to_string(),
            reason: "writing partitions requires running as root".to_string(),
        }
    } else {
        Error::Io(err)
    }
}

/// Decode a compressed partition blob onto one partition of a block device
pub fn write_partition(device: &Path, target_part: u32, reader: impl Read) -> Result<u64> {
    let node = partition_device(device, target_part);
    info!("Writing partition image to {}", node.display());

    let mut out = OpenOptions::new()
        .write(true)
        .open(&node)
        .map_err(|e| classify_open_error(&node, e))?;
    let written = compression::decode_stream(reader, &mut out)?;
    if written == 0 {
        return Err(Error::TransferIncomplete {
            name: node.display().to_string(),
            actual: 0,
        });
    }
    Ok(written)
}

/// Name of an installed file payload: the blob name with its compression
/// suffix removed.
pub fn installed_file_name(blob_name: &str) -> String {
    for suffix in [".gz", ".bz2", ".xz"] {
        if let Some(stem) = blob_name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    blob_name.to_string()
}

/// Decode a file payload blob into `dir`, returning the installed path
pub fn install_file(dir: &Path, blob_name: &str, reader: impl Read) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let dest = dir.join(installed_file_name(blob_name));
    let mut out = std::fs::File::create(&dest)?;
    let written = compression::decode_stream(reader, &mut out)?;
    if written == 0 {
        return Err(Error::TransferIncomplete {
            name: dest.display().to_string(),
            actual: 0,
        });
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn classify_directory_and_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            Destination::classify(dir.path()).unwrap(),
            Destination::Directory(dir.path().to_path_buf())
        );
        let file = dir.path().join("out.bin");
        assert_eq!(
            Destination::classify(&file).unwrap(),
            Destination::File(file.clone())
        );
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(
            Destination::classify(&file).unwrap(),
            Destination::File(file)
        );
    }

    #[test]
    fn permission_denied_on_device_node_names_the_destination() {
        let node = Path::new("/dev/sda3");
        let err = classify_open_error(
            node,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        match err {
            Error::UnsupportedDestination { component, reason } => {
                assert_eq!(component, "/dev/sda3");
                assert!(reason.contains("root"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = classify_open_error(
            node,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn rootfs_is_written_last() {
        let last = TEST_IMAGE_PART_MAP.last().unwrap();
        assert_eq!(last.0, ROOTFS_SOURCE_PART);
    }

    #[test]
    fn installed_name_strips_one_compression_suffix() {
        assert_eq!(installed_file_name("toolkit.abc123.gz"), "toolkit.abc123");
        assert_eq!(installed_file_name("hwid.def.bz2"), "hwid.def");
        assert_eq!(installed_file_name("fw.0011.xz"), "fw.0011");
        assert_eq!(installed_file_name("plain.bin"), "plain.bin");
        assert_eq!(
            installed_file_name("release_image.crx_cache.aa.tar.gz"),
            "release_image.crx_cache.aa.tar"
        );
    }

    #[test]
    fn install_file_decodes_payload() {
        let dir = TempDir::new().unwrap();
        let mut blob = Vec::new();
        {
            let mut enc =
                flate2::write::GzEncoder::new(&mut blob, flate2::Compression::default());
            enc.write_all(b"payload body").unwrap();
            enc.finish().unwrap();
        }
        let dest = install_file(dir.path(), "toolkit.aabb.gz", blob.as_slice()).unwrap();
        assert_eq!(dest.file_name().unwrap(), "toolkit.aabb");
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload body");
    }

    #[test]
    fn install_file_rejects_empty_payload() {
        let dir = TempDir::new().unwrap();
        let err = install_file(dir.path(), "toolkit.aabb.gz", [].as_slice()).unwrap_err();
        assert!(matches!(err, Error::TransferIncomplete { .. }));
    }
}
