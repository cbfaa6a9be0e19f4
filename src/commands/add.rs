// src/commands/add.rs

//! `add` and `add_meta`: the producer side

use crate::cleanup::CleanupRegistry;
use crate::component::{self, FILE_SUBTYPE};
use crate::config::Config;
use crate::disk;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, ManifestLock};
use crate::store::PayloadStore;
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Meta field recording a component's human-readable version
const VERSION_META: &str = "version";

/// Package `file` as `component` and record it in the manifest at
/// `manifest_path`. The blob is committed before the manifest is touched, so
/// a failure partway through never leaves the manifest referencing a blob
/// that does not exist.
pub fn cmd_add(
    manifest_path: &Path,
    component: &str,
    file: &Path,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<()> {
    if !file.exists() {
        return Err(Error::InputNotFound(file.to_path_buf()));
    }
    let kind = component::lookup(component)?;
    let store = PayloadStore::for_manifest(manifest_path)?;
    let compressor = config.compressor();

    let _lock = ManifestLock::acquire(manifest_path)?;
    let mut manifest = Manifest::load_or_default(manifest_path)?;

    if kind.is_disk_image() {
        disk::extract_image(
            file,
            component,
            &store,
            &mut manifest,
            &compressor,
            config,
            registry,
        )?;
    } else {
        let ext = compressor.format().extension();
        let mut committer = store.committer(component, FILE_SUBTYPE, ext)?;
        let raw = compressor.encode_file(file, &mut committer)?;
        let blob = committer.finish()?;
        info!("Packed {} ({} raw bytes) as {}", file.display(), raw, blob.name);

        manifest.set_blob(component, FILE_SUBTYPE, &blob.name);
        if let Some(basename) = file.file_name().and_then(|n| n.to_str()) {
            manifest.set_meta(component, VERSION_META, Value::String(basename.to_string()));
        }
    }

    manifest.write(manifest_path)?;
    info!("Updated {}", manifest_path.display());
    Ok(())
}

/// Set one scalar meta field on a component
pub fn cmd_add_meta(
    manifest_path: &Path,
    component: &str,
    name: &str,
    value: &str,
) -> Result<()> {
    component::lookup(component)?;

    let _lock = ManifestLock::acquire(manifest_path)?;
    let mut manifest = Manifest::load_or_default(manifest_path)?;
    manifest.set_meta(component, name, Value::String(value.to_string()));
    manifest.write(manifest_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config {
            backend: crate::compression::Backend::Gzip,
            parallel: false,
            sudo: None,
            telemetry_url: None,
        }
    }

    #[test]
    fn test_add_commits_blob_then_manifest() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("depot.json");
        let source = dir.path().join("toolkit_v1.run");
        std::fs::write(&source, b"toolkit body").unwrap();

        let registry = CleanupRegistry::new();
        cmd_add(&manifest_path, "toolkit", &source, &test_config(), &registry).unwrap();

        let manifest = Manifest::load_or_default(&manifest_path).unwrap();
        let blob = manifest.get("toolkit", FILE_SUBTYPE).unwrap().to_string();
        assert!(blob.starts_with("toolkit."));
        assert!(blob.ends_with(".gz"));
        assert!(dir.path().join(&blob).is_file());
        assert_eq!(manifest.version("toolkit"), Some("toolkit_v1.run"));
    }

    #[test]
    fn test_add_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("depot.json");
        let err = cmd_add(
            &manifest_path,
            "toolkit",
            &dir.path().join("absent.run"),
            &test_config(),
            &CleanupRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));
        assert!(!manifest_path.exists());
    }

    #[test]
    fn test_add_unknown_component_fails() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("x.bin");
        std::fs::write(&source, b"x").unwrap();
        let err = cmd_add(
            &dir.path().join("depot.json"),
            "mystery",
            &source,
            &test_config(),
            &CleanupRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedComponent(_)));
    }

    #[test]
    fn test_add_meta_preserves_existing_entries() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("depot.json");
        let source = dir.path().join("hwid.sh");
        std::fs::write(&source, b"#!/bin/sh").unwrap();

        cmd_add(
            &manifest_path,
            "hwid",
            &source,
            &test_config(),
            &CleanupRegistry::new(),
        )
        .unwrap();
        cmd_add_meta(&manifest_path, "hwid", "version", "PROJ 1234").unwrap();

        let manifest = Manifest::load_or_default(&manifest_path).unwrap();
        assert!(manifest.get("hwid", FILE_SUBTYPE).is_some());
        assert_eq!(manifest.version("hwid"), Some("PROJ 1234"));
    }
}
