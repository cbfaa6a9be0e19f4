// src/cleanup.rs

//! Scoped cleanup of temp files and mounts
//!
//! Mount leaks on a manufacturing line corrupt subsequent runs, so every
//! scratch resource is registered here the moment it is created and released
//! only after it has been torn down by its owner. The registry drains in
//! reverse registration order on `Drop`, which covers normal returns, `?`
//! propagation, and panics. A process-global mirror backs the signal handler
//! installed once at startup, so Ctrl-C tears down the same resources.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Action {
    RemovePath(PathBuf),
    Unmount {
        target: PathBuf,
        sudo: Option<String>,
    },
}

#[derive(Debug)]
struct Entry {
    id: u64,
    action: Action,
}

/// Registry of cleanup actions, drained LIFO
#[derive(Clone)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<Vec<Entry>>>,
    next_id: Arc<Mutex<u64>>,
}

static GLOBAL: OnceLock<CleanupRegistry> = OnceLock::new();

impl CleanupRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    /// The process-wide registry consulted by the signal handler
    pub fn global() -> &'static CleanupRegistry {
        GLOBAL.get_or_init(CleanupRegistry::new)
    }

    /// Install the signal handler that drains the global registry.
    /// Call once at startup.
    pub fn install_signal_handler() {
        let registry = Self::global().clone();
        if let Err(e) = ctrlc::set_handler(move || {
            registry.drain();
            std::process::exit(130);
        }) {
            warn!("Failed to install signal handler: {}", e);
        }
    }

    /// Register a path to delete on cleanup; returns a token for release
    pub fn register_path(&self, path: &Path) -> u64 {
        self.push(Action::RemovePath(path.to_path_buf()))
    }

    /// Register a mount point to unmount (and remove) on cleanup
    pub fn register_mount(&self, target: &Path, sudo: Option<&str>) -> u64 {
        self.push(Action::Unmount {
            target: target.to_path_buf(),
            sudo: sudo.map(str::to_string),
        })
    }

    /// Remove an entry without running it (the owner cleaned up itself)
    pub fn release(&self, id: u64) {
        let mut entries = self.inner.lock().expect("cleanup registry poisoned");
        entries.retain(|e| e.id != id);
    }

    /// Run and clear every registered action, newest first
    pub fn drain(&self) {
        let mut entries = self.inner.lock().expect("cleanup registry poisoned");
        while let Some(entry) = entries.pop() {
            run_action(&entry.action);
        }
    }

    fn push(&self, action: Action) -> u64 {
        let mut next = self.next_id.lock().expect("cleanup registry poisoned");
        let id = *next;
        *next += 1;
        let mut entries = self.inner.lock().expect("cleanup registry poisoned");
        entries.push(Entry { id, action });
        id
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        // only the last clone tears things down
        if Arc::strong_count(&self.inner) == 1 {
            self.drain();
        }
    }
}

fn run_action(action: &Action) {
    match action {
        Action::RemovePath(path) => {
            debug!("Cleanup: removing {}", path.display());
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(path);
            } else {
                let _ = std::fs::remove_file(path);
            }
        }
        Action::Unmount { target, sudo } => {
            debug!("Cleanup: unmounting {}", target.display());
            let status = match sudo {
                Some(prefix) => Command::new(prefix).arg("umount").arg(target).status(),
                None => Command::new("umount").arg(target).status(),
            };
            match status {
                Ok(s) if s.success() => {
                    let _ = std::fs::remove_dir(target);
                }
                Ok(_) | Err(_) => warn!("Cleanup: failed to unmount {}", target.display()),
            }
        }
    }
}
