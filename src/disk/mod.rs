// src/disk/mod.rs

//! Disk image handling: partition discovery, geometry optimization, scoped
//! mounts, extraction into the payload store, and installation onto targets.

pub mod extract;
pub mod geometry;
pub mod gpt;
pub mod install;
pub mod mount;

pub use extract::extract_image;
pub use geometry::{optimize, CopyGeometry};
pub use gpt::{list_partitions, partition_device, Partition};
pub use install::{Destination, INSTALL_DIR, TEST_IMAGE_PART_MAP};
pub use mount::{mount_device_partition, mount_image_partition_ro, MountGuard};
