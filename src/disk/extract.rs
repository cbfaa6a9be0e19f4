// src/disk/extract.rs

//! Disk image extraction
//!
//! Splits a disk image into one compressed blob per partition, using the
//! block-size optimizer to keep the raw copies fast. The first partition is
//! additionally scanned for a cached extension archive, and the rootfs is
//! mounted read-only to record the release version in the manifest.

use crate::cleanup::CleanupRegistry;
use crate::compression::Compressor;
use crate::config::Config;
use crate::disk::geometry::{self, CopyGeometry};
use crate::disk::gpt::{self, Partition};
use crate::disk::mount::mount_image_partition_ro;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::store::{BlobRef, PayloadStore};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Where a test image keeps imported extensions, relative to its stateful
/// partition root.
const CRX_CACHE_DIR: &str = "unencrypted/import_extensions";

/// Partition index holding the stateful filesystem
const STATEFUL_PART: u32 = 1;

/// Partition index holding the root filesystem
const ROOTFS_PART: u32 = 3;

/// Copy a partition's sectors from `image` into `out`, returning raw bytes
/// copied. The read is performed in the optimizer's adjusted block size.
pub fn copy_range(image: &Path, geometry: CopyGeometry, out: &mut dyn Write) -> io::Result<u64> {
    let mut file = File::open(image)?;
    file.seek(SeekFrom::Start(geometry.byte_offset()))?;

    let block_size = geometry.block_size as usize;
    let mut buf = vec![0u8; block_size];
    let mut remaining = geometry.byte_len();
    let mut copied = 0u64;
    while remaining > 0 {
        let want = remaining.min(block_size as u64) as usize;
        file.read_exact(&mut buf[..want])?;
        out.write_all(&buf[..want])?;
        copied += want as u64;
        remaining -= want as u64;
    }
    Ok(copied)
}

fn extract_partition(
    image: &Path,
    partition: &Partition,
    component: &str,
    store: &PayloadStore,
    compressor: &Compressor,
) -> Result<BlobRef> {
    let geometry = geometry::optimize(partition.start, partition.sectors)?;
    debug!(
        "Partition {}: start {} count {} bs {}",
        partition.index, geometry.start, geometry.count, geometry.block_size
    );

    let subtype = format!("part{}", partition.index);
    let ext = compressor.format().extension();
    let mut committer = store.committer(component, &subtype, ext)?;
    let raw = compressor.encode_from(
        |out| copy_range(image, geometry, out),
        &mut committer,
    )?;
    let blob = committer.finish()?;
    info!(
        "Packed partition {} ({} raw bytes) as {}",
        partition.index, raw, blob.name
    );
    Ok(blob)
}

/// Archive the stateful partition's extension cache, if present.
/// Always a tar.gz, regardless of the configured backend, so the installer
/// can unpack it without consulting the manifest.
fn extract_crx_cache(
    image: &Path,
    partition: &Partition,
    component: &str,
    store: &PayloadStore,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<Option<BlobRef>> {
    let mount = mount_image_partition_ro(image, partition, None, config, registry)?;
    let cache_dir = mount.path().join(CRX_CACHE_DIR);
    if !cache_dir.is_dir() {
        return Ok(None);
    }

    info!("Capturing extension cache from partition {}", partition.index);
    let mut committer = store.committer(component, "crx_cache", "tar.gz")?;
    {
        let encoder = flate2::write::GzEncoder::new(&mut committer, flate2::Compression::default());
        let mut archive = tar::Builder::new(encoder);
        archive.follow_symlinks(false);
        archive.append_dir_all(CRX_CACHE_DIR, &cache_dir)?;
        archive.into_inner()?.finish()?;
    }
    let blob = committer.finish()?;
    mount.unmount()?;
    Ok(Some(blob))
}

/// Read CHROMEOS_RELEASE_VERSION (falling back to GOOGLE_RELEASE) from the
/// rootfs partition's /etc/lsb-release.
fn sniff_version(
    image: &Path,
    partition: &Partition,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<Option<String>> {
    // Force ext2 so the kernel cannot replay the ext4 journal on a read-only
    // source image.
    let mount = mount_image_partition_ro(image, partition, Some("ext2"), config, registry)?;
    let lsb = mount.path().join("etc/lsb-release");
    let text = match std::fs::read_to_string(&lsb) {
        Ok(text) => text,
        Err(_) => {
            mount.unmount()?;
            return Ok(None);
        }
    };
    mount.unmount()?;

    for key in ["CHROMEOS_RELEASE_VERSION", "GOOGLE_RELEASE"] {
        for line in text.lines() {
            if let Some(value) = line.strip_prefix(key).and_then(|r| r.strip_prefix('=')) {
                return Ok(Some(value.trim().to_string()));
            }
        }
    }
    Ok(None)
}

/// Extract every partition of `image` into the store and record the result
/// in `manifest` under `component`.
pub fn extract_image(
    image: &Path,
    component: &str,
    store: &PayloadStore,
    manifest: &mut Manifest,
    compressor: &Compressor,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<()> {
    let partitions = gpt::list_partitions(image)?;
    info!(
        "Extracting {} partitions from {}",
        partitions.len(),
        image.display()
    );

    for partition in &partitions {
        let blob = extract_partition(image, partition, component, store, compressor)?;
        manifest.set_blob(component, &format!("part{}", partition.index), &blob.name);
    }

    capture_metadata(image, &partitions, component, store, manifest, config, registry)
}

/// Capture the crx cache and rootfs version for a disk image
///
/// An absent cache directory or lsb-release file is a normal skip; a mount
/// or copy failure is fatal, like every other failure during `add`.
fn capture_metadata(
    image: &Path,
    partitions: &[Partition],
    component: &str,
    store: &PayloadStore,
    manifest: &mut Manifest,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<()> {
    if let Some(stateful) = partitions.iter().find(|p| p.index == STATEFUL_PART) {
        match extract_crx_cache(image, stateful, component, store, config, registry)? {
            Some(blob) => manifest.set_blob(component, "crx_cache", &blob.name),
            None => debug!("No extension cache in partition {}", STATEFUL_PART),
        }
    }

    if let Some(rootfs) = partitions.iter().find(|p| p.index == ROOTFS_PART) {
        match sniff_version(image, rootfs, config, registry)? {
            Some(version) => {
                manifest.set_meta(component, "version", serde_json::Value::String(version))
            }
            None => warn!("No release version found in partition {}", ROOTFS_PART),
        }
    }

    Ok(())
}
