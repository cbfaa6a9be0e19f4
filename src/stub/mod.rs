// src/stub/mod.rs

//! Activation stub generation
//!
//! Components that must run code after landing on a target (toolkit, hwid
//! bundle, config bundles) get a small POSIX-sh script dropped into
//! `cros_payloads/install/` on the stateful partition. The provisioning
//! flow later runs these scripts in lexical order, so the filename carries a
//! numeric ordering prefix and the toolkit sorts before everything else.

use crate::component::ComponentKind;
use crate::disk::INSTALL_DIR;
use crate::error::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory for activation stubs, relative to the payload root
pub const STUB_DIR: &str = "install";

/// Stub filename for a component: `<order>-<component>.sh`
pub fn stub_name(kind: &ComponentKind) -> Option<String> {
    kind.stub_order
        .map(|order| format!("{}-{}.sh", order, kind.name))
}

fn render(kind: &ComponentKind, payload: &str) -> Option<String> {
    let command = kind.stub_command(payload)?;
    // The target shell may run with a restricted environment; keep to plain
    // POSIX sh and pin TMPDIR inside the payload tree.
    Some(format!(
        "#!/bin/sh\n\
         # Activation stub for {component}, generated at packaging time.\n\
         set -e\n\
         cd \"$(dirname \"$0\")/..\"\n\
         export TMPDIR=\"$PWD/tmp\"\n\
         mkdir -p \"$TMPDIR\"\n\
         {command}\n",
        component = kind.name,
        command = command,
    ))
}

/// Write the activation stub for one installed payload under `root` (the
/// mounted stateful filesystem). Returns the stub path, or `None` when the
/// component needs no activation.
pub fn generate(root: &Path, kind: &ComponentKind, payload: &str) -> Result<Option<PathBuf>> {
    let Some(name) = stub_name(kind) else {
        return Ok(None);
    };
    let script = match render(kind, payload) {
        Some(script) => script,
        None => return Ok(None),
    };

    let dir = root.join(INSTALL_DIR).join(STUB_DIR);
    fs::create_dir_all(&dir)?;
    let path = dir.join(name);
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    info!("Wrote activation stub {}", path.display());
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::lookup;
    use tempfile::TempDir;

    #[test]
    fn test_stub_written_with_ordering_prefix() {
        let dir = TempDir::new().unwrap();
        let toolkit = lookup("toolkit").unwrap();
        let path = generate(dir.path(), toolkit, "toolkit.aabb")
            .unwrap()
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "0-toolkit.sh");
        assert!(path.starts_with(dir.path().join("cros_payloads/install")));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.contains("sh \"./toolkit.aabb\" -- --yes"));
        assert!(body.contains("TMPDIR"));
    }

    #[test]
    fn test_toolkit_sorts_before_other_stubs() {
        let toolkit = stub_name(lookup("toolkit").unwrap()).unwrap();
        let hwid = stub_name(lookup("hwid").unwrap()).unwrap();
        assert!(toolkit < hwid);
    }

    #[test]
    fn test_no_stub_for_plain_components() {
        let dir = TempDir::new().unwrap();
        let firmware = lookup("firmware").unwrap();
        assert!(generate(dir.path(), firmware, "fw.bin").unwrap().is_none());
    }
}
