// src/disk/gpt.rs

//! Partition table introspection
//!
//! Shells out to `cgpt show` when available, falling back to `partx`.
//! Neither tool on PATH is a hard error: partition math on guessed offsets
//! would write to the wrong sectors.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// One partition entry: sector-denominated start and length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: u32,
    pub start: u64,
    pub sectors: u64,
}

/// List partitions of a disk image or block device
pub fn list_partitions(image: &Path) -> Result<Vec<Partition>> {
    if let Ok(cgpt) = which::which("cgpt") {
        return cgpt_list(&cgpt, image);
    }
    if let Ok(partx) = which::which("partx") {
        return partx_list(&partx, image);
    }
    Err(Error::PartitionToolMissing)
}

/// `cgpt show -q` prints one line per partition: `start size index label`
fn cgpt_list(cgpt: &Path, image: &Path) -> Result<Vec<Partition>> {
    let output = Command::new(cgpt).arg("show").arg("-q").arg(image).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::CommandFailed(format!(
            "cgpt show {}: {}",
            image.display(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut partitions = parse_triples(&stdout, TripleOrder::StartSizeIndex)?;
    partitions.sort_by_key(|p| p.index);
    debug!("cgpt: {} partitions in {}", partitions.len(), image.display());
    Ok(partitions)
}

/// `partx -r -g -o NR,START,SECTORS` prints `index start size` per line
fn partx_list(partx: &Path, image: &Path) -> Result<Vec<Partition>> {
    let output = Command::new(partx)
        .args(["-r", "-g", "-o", "NR,START,SECTORS"])
        .arg(image)
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::CommandFailed(format!(
            "partx {}: {}",
            image.display(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut partitions = parse_triples(&stdout, TripleOrder::IndexStartSize)?;
    partitions.sort_by_key(|p| p.index);
    debug!("partx: {} partitions in {}", partitions.len(), image.display());
    Ok(partitions)
}

#[derive(Clone, Copy)]
enum TripleOrder {
    /// cgpt: start, size, index
    StartSizeIndex,
    /// partx: index, start, size
    IndexStartSize,
}

fn parse_triples(text: &str, order: TripleOrder) -> Result<Vec<Partition>> {
    let mut partitions = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let parse = |s: &str| -> Result<u64> {
            s.parse()
                .map_err(|_| Error::CommandFailed(format!("unparsable partition line: {line}")))
        };
        let (start, sectors, index) = match order {
            TripleOrder::StartSizeIndex => (parse(fields[0])?, parse(fields[1])?, parse(fields[2])?),
            TripleOrder::IndexStartSize => (parse(fields[1])?, parse(fields[2])?, parse(fields[0])?),
        };
        partitions.push(Partition {
            index: index as u32,
            start,
            sectors,
        });
    }
    Ok(partitions)
}

/// Device node of partition `index` on a block device
///
/// Devices whose name ends in a digit (nvme0n1, mmcblk0, loop0) take a `p`
/// separator; others (sda) append the number directly.
pub fn partition_device(device: &Path, index: u32) -> std::path::PathBuf {
    let name = device.to_string_lossy();
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        std::path::PathBuf::from(format!("{}p{}", name, index))
    } else {
        std::path::PathBuf::from(format!("{}{}", name, index))
    }
}
