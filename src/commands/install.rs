// src/commands/install.rs

//! `install`, `install_optional` and `download`: the consumer side
//!
//! Components are processed in the order given on the command line. For the
//! strict mode a component absent from the manifest aborts the run; the
//! optional and download modes log and skip it. Disk-image components can
//! only land on a block device; simple files land in the payload directory
//! of the device's first partition (with activation stubs), in a plain
//! directory, or at an exact file path.

use crate::cleanup::CleanupRegistry;
use crate::component::{self, ComponentKind, FILE_SUBTYPE};
use crate::compression;
use crate::config::Config;
use crate::disk::install::{install_file, write_partition, Destination, INSTALL_DIR, TEST_IMAGE_PART_MAP};
use crate::disk::mount::mount_device_partition;
use crate::disk::partition_device;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::stub;
use crate::transport::{self, multicast, Transport};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Missing components are fatal; payloads are decoded and activated
    Install,
    /// Missing components are skipped with a warning
    Optional,
    /// Blobs are copied compressed, no decoding or activation
    Download,
}

impl InstallMode {
    fn skips_missing(&self) -> bool {
        !matches!(self, InstallMode::Install)
    }
}

/// Open a blob for reading, preferring an advertised multicast channel and
/// falling back to unicast fetch from the bundle base.
fn open_blob(
    manifest: &Manifest,
    base: &str,
    component: &str,
    subtype: &str,
    name: &str,
    transport: &Transport,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<Box<dyn Read>> {
    if let Some(channel) = manifest.multicast_channel(component, subtype) {
        let staging = tempfile::NamedTempFile::new()?;
        multicast::mcast_fetch(channel, staging.path(), config, registry)?;
        // the reopened handle stays readable after the temp file is unlinked
        return Ok(Box::new(staging.reopen()?));
    }
    transport.fetch_stream(&transport::join_source(base, name))
}

fn missing(
    mode: InstallMode,
    component: &str,
    subtype: &str,
) -> Result<()> {
    if mode.skips_missing() {
        warn!("Component {} has no {} entry, skipping", component, subtype);
        Ok(())
    } else {
        Err(Error::MissingManifestEntry {
            component: component.to_string(),
            subtype: subtype.to_string(),
        })
    }
}

fn install_disk_image(
    manifest: &Manifest,
    base: &str,
    component: &str,
    dest: &Destination,
    transport: &Transport,
    mode: InstallMode,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<()> {
    let Destination::BlockDevice(device) = dest else {
        return Err(Error::UnsupportedDestination {
            component: component.to_string(),
            reason: "disk images can only be installed onto a block device".to_string(),
        });
    };

    // rootfs is the last row of the map; a crash mid-install must never
    // leave a complete-looking rootfs next to unwritten boot partitions
    for (source_part, target_part) in TEST_IMAGE_PART_MAP {
        let subtype = format!("part{source_part}");
        let Some(name) = manifest.get(component, &subtype) else {
            missing(mode, component, &subtype)?;
            continue;
        };
        let reader = open_blob(
            manifest, base, component, &subtype, name, transport, config, registry,
        )?;
        let written = write_partition(device, *target_part, reader)?;
        info!(
            "Installed {}.{} onto partition {} ({} bytes)",
            component, subtype, target_part, written
        );
    }
    Ok(())
}

fn install_simple_file(
    manifest: &Manifest,
    base: &str,
    kind: &ComponentKind,
    dest: &Destination,
    transport: &Transport,
    mode: InstallMode,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<()> {
    let component = kind.name;
    let Some(name) = manifest.get(component, FILE_SUBTYPE) else {
        return missing(mode, component, FILE_SUBTYPE);
    };
    let reader = open_blob(
        manifest, base, component, FILE_SUBTYPE, name, transport, config, registry,
    )?;

    match dest {
        Destination::BlockDevice(device) => {
            let stateful = partition_device(device, 1);
            let mount = mount_device_partition(&stateful, config, registry)?;
            let payload_dir = mount.path().join(INSTALL_DIR);
            let installed = install_file(&payload_dir, name, reader)?;
            info!("Installed {} as {}", component, installed.display());

            if let Some(payload) = installed.file_name().and_then(|n| n.to_str()) {
                stub::generate(mount.path(), kind, payload)?;
            }
            mount.unmount()?;
        }
        Destination::Directory(dir) => {
            let installed = install_file(dir, name, reader)?;
            info!("Installed {} as {}", component, installed.display());
        }
        Destination::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(path)?;
            let written = compression::decode_stream(reader, &mut out)?;
            if written == 0 {
                return Err(Error::TransferIncomplete {
                    name: path.display().to_string(),
                    actual: 0,
                });
            }
            info!("Installed {} to {} ({} bytes)", component, path.display(), written);
        }
    }
    Ok(())
}

fn download_component(
    manifest: &Manifest,
    base: &str,
    component: &str,
    dest_dir: &Path,
    transport: &Transport,
) -> Result<()> {
    let blobs = manifest.blob_files(component);
    if blobs.is_empty() {
        return missing(InstallMode::Download, component, FILE_SUBTYPE);
    }
    for (subtype, name) in blobs {
        let out = dest_dir.join(&name);
        let copied = transport.fetch_to(&transport::join_source(base, &name), &out)?;
        info!("Downloaded {}.{} ({} bytes)", component, subtype, copied);
    }
    Ok(())
}

pub fn cmd_install(
    source: &str,
    dest: &Path,
    components: &[String],
    mode: InstallMode,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<()> {
    let transport = Transport::new()?;
    let manifest = Manifest::load(source, &transport)?;
    let base = transport::source_base(source);
    let destination = Destination::classify(dest)?;

    if mode == InstallMode::Download {
        // download keeps blobs compressed, mirrored under the payload
        // directory next to a copy of the manifest
        let payload_dir = match &destination {
            Destination::Directory(dir) => dir.join(INSTALL_DIR),
            _ => {
                return Err(Error::UnsupportedDestination {
                    component: components.join(","),
                    reason: "download requires a directory destination".to_string(),
                })
            }
        };
        std::fs::create_dir_all(&payload_dir)?;
        for component in components {
            component::lookup(component)?;
            download_component(&manifest, &base, component, &payload_dir, &transport)?;
        }
        manifest.write(&payload_dir.join("depot.json"))?;
        return Ok(());
    }

    for component in components {
        let kind = component::lookup(component)?;
        if kind.is_disk_image() {
            install_disk_image(
                &manifest,
                &base,
                component,
                &destination,
                &transport,
                mode,
                config,
                registry,
            )?;
        } else {
            install_simple_file(
                &manifest,
                &base,
                kind,
                &destination,
                &transport,
                mode,
                config,
                registry,
            )?;
        }
    }
    Ok(())
}
