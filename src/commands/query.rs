// src/commands/query.rs

//! `list`, `get_file` and `get_all_files`: read-only manifest queries

use crate::component::FILE_SUBTYPE;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::transport::{self, Transport};

/// List components present in a manifest, with versions where recorded
pub fn cmd_list(source: &str) -> Result<()> {
    let transport = Transport::new()?;
    let manifest = Manifest::load(source, &transport)?;
    for component in manifest.components() {
        match manifest.version(component) {
            Some(version) => println!("{component}: {version}"),
            None => println!("{component}"),
        }
    }
    Ok(())
}

/// Print the resolved location of a component's `file` blob
pub fn cmd_get_file(source: &str, component: &str) -> Result<()> {
    let transport = Transport::new()?;
    let manifest = Manifest::load(source, &transport)?;
    let name = manifest
        .get(component, FILE_SUBTYPE)
        .ok_or_else(|| Error::MissingManifestEntry {
            component: component.to_string(),
            subtype: FILE_SUBTYPE.to_string(),
        })?;
    let base = transport::source_base(source);
    println!("{}", transport::join_source(&base, name));
    Ok(())
}

/// Print the resolved location of every blob in the manifest
pub fn cmd_get_all_files(source: &str) -> Result<()> {
    let transport = Transport::new()?;
    let manifest = Manifest::load(source, &transport)?;
    let base = transport::source_base(source);
    for component in manifest.components() {
        for (_, name) in manifest.blob_files(component) {
            println!("{}", transport::join_source(&base, &name));
        }
    }
    Ok(())
}
