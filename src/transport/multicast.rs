// src/transport/multicast.rs

//! Multicast blob reception
//!
//! Blobs whose manifest advertises a multicast channel are received with the
//! UFTP client (`uftpd`) instead of unicast HTTP. The receiver is spawned in
//! the foreground writing its status file into a scratch directory; we poll
//! that file for the semicolon-delimited status protocol and complete once a
//! `RESULT` line reports the transfer as `copied`. An unexpectedly exiting
//! receiver is respawned up to a fixed retry bound.

use crate::cleanup::CleanupRegistry;
use crate::config::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Status value marking a completed transfer
const STATUS_COPIED: &str = "copied";

/// Receiver respawn attempts before giving up
const MCAST_RETRIES: u32 = 5;

/// Poll interval while the receiver is running
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One line of the receiver's status file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Server announcement reached this receiver
    Connect { server_id: String },
    /// A session finished for one file
    Outcome {
        timestamp: String,
        server_id: String,
        session_id: String,
        filename: String,
        size: u64,
        status: String,
    },
}

impl StatusEvent {
    /// Parse one status line; unknown record types yield `None`
    pub fn parse(line: &str) -> Option<StatusEvent> {
        let fields: Vec<&str> = line.trim().split(';').collect();
        match fields.as_slice() {
            ["CONNECT", _, server_id, ..] => Some(StatusEvent::Connect {
                server_id: (*server_id).to_string(),
            }),
            ["RESULT", timestamp, server_id, session_id, filename, size, status] => {
                Some(StatusEvent::Outcome {
                    timestamp: (*timestamp).to_string(),
                    server_id: (*server_id).to_string(),
                    session_id: (*session_id).to_string(),
                    filename: (*filename).to_string(),
                    size: size.parse().ok()?,
                    status: (*status).to_string(),
                })
            }
            _ => None,
        }
    }

    fn completed(&self) -> Option<(&str, u64)> {
        match self {
            StatusEvent::Outcome {
                filename,
                size,
                status,
                ..
            } if status == STATUS_COPIED => Some((filename.as_str(), *size)),
            _ => None,
        }
    }
}

fn spawn_receiver(channel: &str, recv_dir: &Path, status_file: &Path) -> Result<Child> {
    let (address, port) = channel
        .split_once(':')
        .ok_or_else(|| Error::RemoteFetchFailure(format!("bad multicast channel {channel}")))?;

    let child = Command::new("uftpd")
        .arg("-d")
        .arg("-M")
        .arg(address)
        .arg("-p")
        .arg(port)
        .arg("-D")
        .arg(recv_dir)
        .arg("-S")
        .arg(status_file)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::RemoteFetchFailure(format!("cannot spawn uftpd: {e}")))?;
    Ok(child)
}

fn post_telemetry(config: &Config, event: &StatusEvent) {
    let Some(url) = &config.telemetry_url else {
        return;
    };
    let body = match event {
        StatusEvent::Connect { server_id } => serde_json::json!({
            "event": "connect",
            "server_id": server_id,
        }),
        StatusEvent::Outcome {
            filename,
            size,
            status,
            ..
        } => serde_json::json!({
            "event": "result",
            "file": filename,
            "size": size,
            "status": status,
        }),
    };
    let result = reqwest::blocking::Client::new()
        .post(url)
        .json(&body)
        .timeout(Duration::from_secs(5))
        .send();
    if let Err(e) = result {
        debug!("Telemetry post failed: {}", e);
    }
}

/// Read new status lines past `offset`, reporting them and returning the
/// completed file, if any.
fn scan_status(
    status_file: &Path,
    offset: &mut usize,
    config: &Config,
) -> Option<(String, u64)> {
    let text = fs::read_to_string(status_file).unwrap_or_default();
    // a truncated or rewritten file can leave the offset past the end or
    // mid-character; rescan from the start in that case
    let fresh = match text.get(*offset..) {
        Some(rest) => rest,
        None => {
            *offset = 0;
            text.as_str()
        }
    };
    // Only consume whole lines; a partial tail is re-read next poll.
    let consumed = fresh.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut done = None;
    for line in fresh[..consumed].lines() {
        let Some(event) = StatusEvent::parse(line) else {
            continue;
        };
        match &event {
            StatusEvent::Connect { server_id } => {
                info!("Multicast server {} announced", server_id)
            }
            StatusEvent::Outcome {
                filename, status, ..
            } => info!("Multicast session for {}: {}", filename, status),
        }
        post_telemetry(config, &event);
        if let Some((name, size)) = event.completed() {
            done = Some((name.to_string(), size));
        }
    }
    *offset += consumed;
    done
}

/// Receive one blob over `channel` into `output`
pub fn mcast_fetch(
    channel: &str,
    output: &Path,
    config: &Config,
    registry: &CleanupRegistry,
) -> Result<u64> {
    let scratch = tempfile::Builder::new().prefix("depot.mcast.").tempdir()?;
    let recv_dir = scratch.path().join("recv");
    fs::create_dir_all(&recv_dir)?;
    let status_file = scratch.path().join("status.log");
    let token = registry.register_path(scratch.path());

    info!("Fetching {} over multicast channel {}", output.display(), channel);
    let mut attempt = 0;
    let received = loop {
        attempt += 1;
        fs::write(&status_file, "")?;
        let mut child = spawn_receiver(channel, &recv_dir, &status_file)?;
        let mut offset = 0usize;

        let outcome = loop {
            if let Some(done) = scan_status(&status_file, &mut offset, config) {
                let _ = child.kill();
                let _ = child.wait();
                break Some(done);
            }
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => {
                    // Drain any final lines the receiver wrote on the way out.
                    if let Some(done) = scan_status(&status_file, &mut offset, config) {
                        break Some(done);
                    }
                    warn!("Multicast receiver exited with {}", status);
                    break None;
                }
                Ok(None) => continue,
                Err(e) => {
                    let _ = child.kill();
                    return Err(e.into());
                }
            }
        };

        match outcome {
            Some(done) => break done,
            None if attempt >= MCAST_RETRIES => {
                registry.release(token);
                return Err(Error::RemoteFetchFailure(format!(
                    "multicast receive on {channel} failed after {attempt} attempts"
                )));
            }
            None => warn!("Retrying multicast receive ({}/{})", attempt, MCAST_RETRIES),
        }
    };

    let (filename, size) = received;
    let source = recv_dir.join(
        Path::new(&filename)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&filename)),
    );
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let copied = fs::copy(&source, output)?;
    if copied != size {
        return Err(Error::TransferIncomplete {
            name: output.display().to_string(),
            actual: copied,
        });
    }
    registry.release(token);
    Ok(copied)
}
