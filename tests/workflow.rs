// tests/workflow.rs

//! End-to-end packaging and installation workflows through the public API

use depot::cleanup::CleanupRegistry;
use depot::commands::{cmd_add, cmd_add_meta, cmd_install, InstallMode};
use depot::compression::{self, Backend};
use depot::config::Config;
use depot::manifest::Manifest;
use depot::Error;
use std::path::PathBuf;
use tempfile::TempDir;

fn test_config() -> Config {
    Config {
        backend: Backend::Gzip,
        parallel: false,
        sudo: None,
        telemetry_url: None,
    }
}

fn add_file(bundle: &TempDir, component: &str, name: &str, body: &[u8]) -> PathBuf {
    let manifest_path = bundle.path().join("depot.json");
    let source = bundle.path().join(name);
    std::fs::write(&source, body).unwrap();
    cmd_add(
        &manifest_path,
        component,
        &source,
        &test_config(),
        &CleanupRegistry::new(),
    )
    .unwrap();
    manifest_path
}

#[test]
fn add_then_install_round_trips_payload() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(
        &bundle,
        "toolkit",
        "install_factory_toolkit.run",
        b"toolkit bits",
    );

    let dest = TempDir::new().unwrap();
    cmd_install(
        manifest_path.to_str().unwrap(),
        dest.path(),
        &["toolkit".to_string()],
        InstallMode::Install,
        &test_config(),
        &CleanupRegistry::new(),
    )
    .unwrap();

    let entries: Vec<_> = std::fs::read_dir(dest.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(&entries[0]).unwrap(), b"toolkit bits");
}

#[test]
fn installing_twice_produces_identical_output() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(&bundle, "firmware", "fw_updater.bin", b"firmware image");
    let dest = TempDir::new().unwrap();

    let install = || {
        cmd_install(
            manifest_path.to_str().unwrap(),
            dest.path(),
            &["firmware".to_string()],
            InstallMode::Install,
            &test_config(),
            &CleanupRegistry::new(),
        )
        .unwrap();
    };

    install();
    let entries: Vec<_> = std::fs::read_dir(dest.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1);
    let first = std::fs::read(&entries[0]).unwrap();

    install();
    let entries_after: Vec<_> = std::fs::read_dir(dest.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries_after, entries);
    assert_eq!(std::fs::read(&entries[0]).unwrap(), first);
}

#[test]
fn re_adding_identical_content_does_not_grow_the_bundle() {
    let bundle = TempDir::new().unwrap();
    add_file(&bundle, "toolkit", "toolkit.run", b"same bytes");
    let first = std::fs::read_dir(bundle.path()).unwrap().count();

    add_file(&bundle, "toolkit", "toolkit.run", b"same bytes");
    let second = std::fs::read_dir(bundle.path()).unwrap().count();
    assert_eq!(first, second);
}

#[test]
fn different_content_produces_a_different_blob() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(&bundle, "toolkit", "toolkit.run", b"version one");
    let manifest = Manifest::load_or_default(&manifest_path).unwrap();
    let old_blob = manifest.get("toolkit", "file").unwrap().to_string();

    add_file(&bundle, "toolkit", "toolkit.run", b"version two");
    let manifest = Manifest::load_or_default(&manifest_path).unwrap();
    let new_blob = manifest.get("toolkit", "file").unwrap().to_string();

    assert_ne!(old_blob, new_blob);
    // the superseded blob stays on disk, content-addressed and immutable
    assert!(bundle.path().join(&old_blob).is_file());
    assert!(bundle.path().join(&new_blob).is_file());
}

#[test]
fn add_meta_round_trips_through_rewrite() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(&bundle, "hwid", "hwid_bundle.sh", b"#!/bin/sh");
    cmd_add_meta(&manifest_path, "hwid", "version", "PROJ 9000").unwrap();
    let bytes_before = std::fs::read(&manifest_path).unwrap();

    // a no-op meta update must reproduce the same serialized form
    cmd_add_meta(&manifest_path, "hwid", "version", "PROJ 9000").unwrap();
    let bytes_after = std::fs::read(&manifest_path).unwrap();
    assert_eq!(bytes_before, bytes_after);

    let manifest = Manifest::load_or_default(&manifest_path).unwrap();
    assert_eq!(manifest.version("hwid"), Some("PROJ 9000"));
    assert!(manifest.get("hwid", "file").is_some());
}

#[test]
fn multiple_components_coexist_in_one_bundle() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(&bundle, "toolkit", "toolkit.run", b"toolkit");
    add_file(&bundle, "hwid", "hwid.sh", b"hwid");
    add_file(&bundle, "firmware", "fw.bin", b"firmware");

    let manifest = Manifest::load_or_default(&manifest_path).unwrap();
    let components: Vec<_> = manifest.components().collect();
    assert_eq!(components, vec!["firmware", "hwid", "toolkit"]);
}

#[test]
fn download_leaves_blobs_compressed_with_manifest_copy() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(&bundle, "toolkit", "toolkit.run", b"toolkit body");

    let dest = TempDir::new().unwrap();
    cmd_install(
        manifest_path.to_str().unwrap(),
        dest.path(),
        &["toolkit".to_string()],
        InstallMode::Download,
        &test_config(),
        &CleanupRegistry::new(),
    )
    .unwrap();

    let payload_dir = dest.path().join("cros_payloads");
    let copied_manifest = Manifest::load_or_default(&payload_dir.join("depot.json")).unwrap();
    let blob = copied_manifest.get("toolkit", "file").unwrap();
    let data = std::fs::read(payload_dir.join(blob)).unwrap();
    assert_eq!(compression::decode_bytes(&data).unwrap(), b"toolkit body");
}

#[test]
fn install_of_unknown_component_is_rejected() {
    let bundle = TempDir::new().unwrap();
    let manifest_path = add_file(&bundle, "toolkit", "toolkit.run", b"x");
    let dest = TempDir::new().unwrap();

    let err = cmd_install(
        manifest_path.to_str().unwrap(),
        dest.path(),
        &["flux_capacitor".to_string()],
        InstallMode::Install,
        &test_config(),
        &CleanupRegistry::new(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedComponent(_)));
}
