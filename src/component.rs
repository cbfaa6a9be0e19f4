// src/component.rs

//! Component registry
//!
//! Components are the stable top-level identifiers in the manifest. The set
//! is fixed: disk images are split into per-partition blobs, everything else
//! is a single compressed file. A few components carry activation logic that
//! must run on the target after unpacking; those get a stub script, and the
//! toolkit's stub is ordered before all others.

use crate::error::{Error, Result};

/// Default subtype for single-file components. Stored under this key in the
/// manifest, omitted from blob filenames.
pub const FILE_SUBTYPE: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClass {
    /// Partitioned disk image, committed as `part1`..`partN`
    DiskImage,
    /// Single compressed file under the `file` subtype
    SimpleFile,
}

/// A known component and its handling rules
#[derive(Debug, Clone, Copy)]
pub struct ComponentKind {
    pub name: &'static str,
    pub class: ComponentClass,
    /// Stub ordering prefix; `None` means no post-install activation
    pub stub_order: Option<u8>,
}

/// All components this tool will package or install. The toolkit stub runs
/// before every other stub (order 0 vs 1).
pub const COMPONENTS: &[ComponentKind] = &[
    ComponentKind {
        name: "test_image",
        class: ComponentClass::DiskImage,
        stub_order: None,
    },
    ComponentKind {
        name: "release_image",
        class: ComponentClass::DiskImage,
        stub_order: None,
    },
    ComponentKind {
        name: "toolkit",
        class: ComponentClass::SimpleFile,
        stub_order: Some(0),
    },
    ComponentKind {
        name: "firmware",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
    ComponentKind {
        name: "hwid",
        class: ComponentClass::SimpleFile,
        stub_order: Some(1),
    },
    ComponentKind {
        name: "complete",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
    ComponentKind {
        name: "toolkit_config",
        class: ComponentClass::SimpleFile,
        stub_order: Some(1),
    },
    ComponentKind {
        name: "lsb_factory",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
    ComponentKind {
        name: "description",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
    ComponentKind {
        name: "project_config",
        class: ComponentClass::SimpleFile,
        stub_order: Some(1),
    },
    ComponentKind {
        name: "netboot_kernel",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
    ComponentKind {
        name: "netboot_firmware",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
    ComponentKind {
        name: "netboot_cmdline",
        class: ComponentClass::SimpleFile,
        stub_order: None,
    },
];

/// Look up a component by name
pub fn lookup(name: &str) -> Result<&'static ComponentKind> {
    COMPONENTS
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| Error::UnsupportedComponent(name.to_string()))
}

impl ComponentKind {
    pub fn is_disk_image(&self) -> bool {
        self.class == ComponentClass::DiskImage
    }

    pub fn needs_stub(&self) -> bool {
        self.stub_order.is_some()
    }

    /// Shell command the activation stub runs against the installed payload
    pub fn stub_command(&self, payload: &str) -> Option<String> {
        match self.name {
            "toolkit" => Some(format!("sh \"./{}\" -- --yes", payload)),
            "hwid" => Some(format!("sh \"./{}\"", payload)),
            "toolkit_config" => Some(format!(
                "mkdir -p /usr/local/factory && cp \"./{}\" /usr/local/factory/toolkit_config.json",
                payload
            )),
            "project_config" => Some(format!(
                "mkdir -p /usr/local/factory/project_config && \
                 tar -xf \"./{}\" -C /usr/local/factory/project_config",
                payload
            )),
            _ => None,
        }
    }
}
