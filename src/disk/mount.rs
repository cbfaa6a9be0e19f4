// src/disk/mount.rs

//! Scoped mounts
//!
//! Every mount is registered with the cleanup registry before use and
//! unmounted in `Drop`, so a failed extraction never leaves a stale loop
//! mount behind. Image-file partitions are mounted via loop offsets; device
//! partitions are mounted by node. A filesystem type can be forced (the
//! rootfs is read as ext2 so no journal replay can mutate the source image).

use crate::cleanup::CleanupRegistry;
use crate::config::Config;
use crate::disk::geometry::SECTOR_SIZE;
use crate::disk::gpt::Partition;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// A mounted filesystem, unmounted when dropped
pub struct MountGuard {
    target: PathBuf,
    sudo: Option<String>,
    registry: CleanupRegistry,
    token: u64,
    mounted: bool,
}

impl MountGuard {
    /// Mount point path
    pub fn path(&self) -> &Path {
        &self.target
    }

    /// Unmount now instead of at drop, surfacing errors
    pub fn unmount(mut self) -> Result<()> {
        self.do_unmount(true)
    }

    fn do_unmount(&mut self, strict: bool) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        self.mounted = false;
        self.registry.release(self.token);

        let status = sudo_command(&self.sudo, "umount")
            .arg(&self.target)
            .status()?;
        let _ = std::fs::remove_dir(&self.target);
        if !status.success() && strict {
            return Err(Error::MountFailure(format!(
                "umount {} failed",
                self.target.display()
            )));
        }
        Ok(())
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        let _ = self.do_unmount(false);
    }
}

fn sudo_command(sudo: &Option<String>, program: &str) -> Command {
    match sudo {
        Some(prefix) => {
            let mut cmd = Command::new(prefix);
            cmd.arg(program);
            cmd
        }
        None => Command::new(program),
    }
}

fn mount_with_options(
    source: &Path,
    options: &str,
    fs_type: Option<&str>,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<MountGuard> {
    let target = tempfile::Builder::new()
        .prefix("depot.mount.")
        .tempdir()?
        .keep();
    let token = registry.register_mount(&target, config.sudo.as_deref());

    let mut cmd = sudo_command(&config.sudo, "mount");
    cmd.arg("-o").arg(options);
    if let Some(t) = fs_type {
        cmd.arg("-t").arg(t);
    }
    cmd.arg(source).arg(&target);

    debug!("Mounting {} at {}", source.display(), target.display());
    let output = cmd.output()?;
    if !output.status.success() {
        registry.release(token);
        let _ = std::fs::remove_dir(&target);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::MountFailure(format!(
            "mount {}: {}",
            source.display(),
            stderr.trim()
        )));
    }

    Ok(MountGuard {
        target,
        sudo: config.sudo.clone(),
        registry: registry.clone(),
        token,
        mounted: true,
    })
}

/// Mount one partition of a disk image read-only via a loop offset
pub fn mount_image_partition_ro(
    image: &Path,
    partition: &Partition,
    fs_type: Option<&str>,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<MountGuard> {
    let options = format!(
        "ro,loop,offset={},sizelimit={}",
        partition.start * SECTOR_SIZE,
        partition.sectors * SECTOR_SIZE
    );
    mount_with_options(image, &options, fs_type, config, registry)
}

/// Mount a block-device partition read-write
pub fn mount_device_partition(
    device: &Path,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<MountGuard> {
    mount_with_options(device, "rw", None, config, registry)
}
