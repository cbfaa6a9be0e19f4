// src/manifest/mod.rs

//! Manifest store
//!
//! The manifest is a single JSON object, one key per component, mapping
//! subtypes to blob filenames alongside scalar meta fields. It is the single
//! source of truth: blobs are committed to disk before the manifest is ever
//! mutated, and the manifest file itself is replaced atomically, so readers
//! never observe partial state. Writers serialize through an advisory file
//! lock around the read-merge-write sequence.
//!
//! `serde_json`'s map is BTree-backed here, which gives stable key ordering
//! on every rewrite.

use crate::component::FILE_SUBTYPE;
use crate::error::{Error, Result};
use crate::transport::Transport;
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subtypes that reference blobs (everything else on a component is meta)
fn is_blob_subtype(subtype: &str) -> bool {
    subtype == FILE_SUBTYPE || subtype == "crx_cache" || subtype.starts_with("part")
}

/// The manifest document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse from JSON bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(data)?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Error::Json(serde::de::Error::custom(
                "manifest root must be a JSON object",
            ))),
        }
    }

    /// Load from a local path or URL
    pub fn load(source: &str, transport: &Transport) -> Result<Self> {
        let data = transport.fetch_bytes(source)?;
        Self::parse(&data)
    }

    /// Load from a local path, returning an empty manifest if absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::parse(&fs::read(path)?)
        } else {
            Ok(Self::new())
        }
    }

    /// Deep-merge a delta into this manifest
    ///
    /// Scalars in the delta replace; nested objects merge key-by-key. A
    /// nested object is never wholesale-replaced unless the delta carries a
    /// scalar at that key.
    pub fn merge(&mut self, delta: &Manifest) {
        for (key, value) in &delta.0 {
            merge_value(self.0.entry(key.clone()).or_insert(Value::Null), value);
        }
    }

    /// Serialize and atomically replace the file at `path`
    ///
    /// Writes to a temp file in the same directory, renames over the
    /// original, and makes the result world-readable.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".manifest.")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        serde_json::to_writer_pretty(temp.as_file_mut(), &Value::Object(self.0.clone()))?;
        temp.as_file_mut().write_all(b"\n")?;
        temp.as_file_mut().sync_all()?;

        let temp_path = temp.into_temp_path();
        temp_path.persist(path).map_err(|e| Error::Io(e.error))?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;

        debug!("Wrote manifest {}", path.display());
        Ok(())
    }

    /// Resolve a blob filename for `(component, subtype)`
    ///
    /// A bare string value is shorthand for the `file` subtype. Missing keys
    /// return `None`; the caller decides whether that is fatal.
    pub fn get(&self, component: &str, subtype: &str) -> Option<&str> {
        match self.0.get(component)? {
            Value::String(name) if subtype == FILE_SUBTYPE => Some(name),
            Value::Object(map) => map.get(subtype).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Record a committed blob under `component.subtype`
    pub fn set_blob(&mut self, component: &str, subtype: &str, name: &str) {
        let entry = self
            .0
            .entry(component.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        // promote a bare-string shorthand to an object before inserting
        if let Value::String(existing) = entry {
            let mut map = Map::new();
            map.insert(FILE_SUBTYPE.to_string(), Value::String(existing.clone()));
            *entry = Value::Object(map);
        }
        if let Value::Object(map) = entry {
            map.insert(subtype.to_string(), Value::String(name.to_string()));
        }
    }

    /// Set a scalar meta field on a component
    pub fn set_meta(&mut self, component: &str, name: &str, value: Value) {
        let mut delta = Map::new();
        let mut inner = Map::new();
        inner.insert(name.to_string(), value);
        delta.insert(component.to_string(), Value::Object(inner));
        self.merge(&Manifest(delta));
    }

    /// Component names (the `multicast` table is not a component)
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0
            .keys()
            .map(String::as_str)
            .filter(|k| *k != "multicast")
    }

    /// All blob filenames referenced by a component
    pub fn blob_files(&self, component: &str) -> Vec<(String, String)> {
        match self.0.get(component) {
            Some(Value::String(name)) => {
                vec![(FILE_SUBTYPE.to_string(), name.clone())]
            }
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(subtype, _)| is_blob_subtype(subtype))
                .filter_map(|(subtype, v)| {
                    v.as_str().map(|name| (subtype.clone(), name.to_string()))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The `version` meta field of a component, if present
    pub fn version(&self, component: &str) -> Option<&str> {
        match self.0.get(component)? {
            Value::Object(map) => map.get("version").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Multicast channel advertised for `component.subtype`, if any
    pub fn multicast_channel(&self, component: &str, subtype: &str) -> Option<&str> {
        let table = self.0.get("multicast")?.as_object()?;
        table
            .get(&format!("{}.{}", component, subtype))
            .and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn merge_value(base: &mut Value, delta: &Value) {
    match (base, delta) {
        (Value::Object(base_map), Value::Object(delta_map)) => {
            for (key, value) in delta_map {
                merge_value(
                    base_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
        (base, delta) => *base = delta.clone(),
    }
}

/// Advisory lock serializing manifest writers
///
/// Held across the whole read-merge-write sequence in `add`/`add_meta`.
/// Readers need no lock: blobs are immutable and the manifest file is
/// replaced atomically.
pub struct ManifestLock {
    file: File,
    path: PathBuf,
}

impl ManifestLock {
    pub fn acquire(manifest_path: &Path) -> Result<Self> {
        let path = lock_path(manifest_path);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        debug!("Locked manifest via {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!("Released manifest lock {}", self.path.display());
    }
}

fn lock_path(manifest_path: &Path) -> PathBuf {
    let mut name = manifest_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest.json".to_string());
    name.push_str(".lock");
    manifest_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn manifest_from(value: Value) -> Manifest {
        Manifest::parse(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_get_bare_string_shorthand() {
        let m = manifest_from(json!({"toolkit": "toolkit.abc123.gz"}));
        assert_eq!(m.get("toolkit", "file"), Some("toolkit.abc123.gz"));
        assert_eq!(m.get("toolkit", "part1"), None);
    }

    #[test]
    fn test_get_object_subtype() {
        let m = manifest_from(json!({
            "test_image": {"part1": "test_image.part1.aa.gz", "version": "R100"}
        }));
        assert_eq!(m.get("test_image", "part1"), Some("test_image.part1.aa.gz"));
        assert_eq!(m.get("test_image", "part9"), None);
        assert_eq!(m.get("hwid", "file"), None);
    }

    #[test]
    fn test_merge_disjoint_keys() {
        let mut base = Manifest::new();
        base.merge(&manifest_from(json!({"a": 1})));
        base.merge(&manifest_from(json!({"b": 2})));

        let mut other = Manifest::new();
        other.merge(&manifest_from(json!({"b": 2})));
        other.merge(&manifest_from(json!({"a": 1})));

        assert_eq!(base, other);
    }

    #[test]
    fn test_merge_never_drops_sibling_keys() {
        let mut m = manifest_from(json!({"a": {"x": 1}}));
        m.merge(&manifest_from(json!({"a": {"y": 2}})));
        assert_eq!(
            serde_json::to_value(&m.0).unwrap(),
            json!({"a": {"x": 1, "y": 2}})
        );
    }

    #[test]
    fn test_merge_scalar_replaces_object() {
        let mut m = manifest_from(json!({"a": {"x": 1}}));
        m.merge(&manifest_from(json!({"a": "flat"})));
        assert_eq!(serde_json::to_value(&m.0).unwrap(), json!({"a": "flat"}));
    }

    #[test]
    fn test_set_blob_promotes_bare_string() {
        let mut m = manifest_from(json!({"toolkit": "toolkit.old.gz"}));
        m.set_blob("toolkit", "crx_cache", "toolkit.crx_cache.bb.tar.gz");
        assert_eq!(m.get("toolkit", "file"), Some("toolkit.old.gz"));
        assert_eq!(
            m.get("toolkit", "crx_cache"),
            Some("toolkit.crx_cache.bb.tar.gz")
        );
    }

    #[test]
    fn test_write_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");

        let mut m = Manifest::new();
        m.set_blob("toolkit", "file", "toolkit.abc.gz");
        m.set_meta("toolkit", "version", json!("4.20 Factory Toolkit"));
        m.write(&path).unwrap();

        let loaded = Manifest::load_or_default(&path).unwrap();
        assert_eq!(loaded, m);

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_write_is_stable_across_rewrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");

        let mut m = Manifest::new();
        m.set_blob("toolkit", "file", "toolkit.abc.gz");
        m.set_blob("hwid", "file", "hwid.def.gz");
        m.write(&path).unwrap();
        let first = fs::read(&path).unwrap();

        let reloaded = Manifest::load_or_default(&path).unwrap();
        reloaded.write(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_blob_files_excludes_meta() {
        let m = manifest_from(json!({
            "test_image": {
                "part1": "test_image.part1.aa.gz",
                "part3": "test_image.part3.bb.gz",
                "crx_cache": "test_image.crx_cache.cc.tar.gz",
                "version": "R100-14526.0.0"
            }
        }));
        let mut files = m.blob_files("test_image");
        files.sort();
        assert_eq!(
            files,
            vec![
                ("crx_cache".to_string(), "test_image.crx_cache.cc.tar.gz".to_string()),
                ("part1".to_string(), "test_image.part1.aa.gz".to_string()),
                ("part3".to_string(), "test_image.part3.bb.gz".to_string()),
            ]
        );
    }

    #[test]
    fn test_multicast_channel_lookup() {
        let m = manifest_from(json!({
            "test_image": {"part3": "x.gz"},
            "multicast": {"test_image.part3": "239.0.0.1:12345"}
        }));
        assert_eq!(
            m.multicast_channel("test_image", "part3"),
            Some("239.0.0.1:12345")
        );
        assert_eq!(m.multicast_channel("test_image", "part1"), None);
        // multicast table is not a component
        assert_eq!(m.components().collect::<Vec<_>>(), vec!["test_image"]);
    }

    #[test]
    fn test_lock_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        {
            let _lock = ManifestLock::acquire(&path).unwrap();
            assert!(path.with_file_name("manifest.json.lock").exists());
        }
        // reacquire works after release
        let _lock = ManifestLock::acquire(&path).unwrap();
    }
}
