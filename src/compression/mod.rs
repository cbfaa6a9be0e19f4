// src/compression/mod.rs
//! Streaming compression engine with format auto-detection
//!
//! Payloads are stored compressed; the wire formats are gzip, bzip2, and xz,
//! plus decode-only handling of POSIX tar (single-member extraction). Encoding
//! goes through a [`Compressor`] strategy chosen once at startup: it prefers a
//! parallel external tool (`pigz`, `pbzip2`) when one is on PATH and falls
//! back to the in-process codec otherwise.
//!
//! Decoding auto-detects the format from magic bytes and transparently
//! handles one level of nesting (e.g. a `.tar.gz` source artifact), so `add`
//! accepts already-compressed inputs without special-casing.

use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Bytes probed for format detection. The tar check needs the ustar magic at
/// offset 257, and the probe is sized to cover a full header block region.
pub const PROBE_LEN: usize = 786;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to compress data: {0}")]
    Encode(#[source] io::Error),

    #[error("External compressor {tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("Archive contains no regular file to extract")]
    EmptyArchive,

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),
}

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Gzip (.gz), magic `1f 8b`
    Gzip,
    /// Bzip2 (.bz2), magic `42 5a 68`
    Bzip2,
    /// XZ (.xz), magic `fd 37 7a 58 5a 00`
    Xz,
    /// POSIX tar, ustar magic at offset 257. Decode-only.
    Tar,
}

impl Format {
    /// Detect format from the probed head of a stream
    ///
    /// Returns `None` for unrecognized data, which callers treat as "already
    /// uncompressed".
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            Some(Self::Gzip)
        } else if data.len() >= 3 && &data[0..3] == b"BZh" {
            Some(Self::Bzip2)
        } else if data.len() >= 6 && data[0..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
            Some(Self::Xz)
        } else if data.len() >= 262 && &data[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Blob filename extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
            Self::Xz => "xz",
            Self::Tar => "tar",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Tar => "tar",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Encode backend selection (what `add` produces)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Gzip,
    Bzip2,
}

impl Backend {
    /// Parse a backend name; unknown names are a hard error
    pub fn parse(s: &str) -> Result<Self, CompressionError> {
        match s {
            "gz" | "gzip" => Ok(Self::Gzip),
            "bz2" | "bzip2" => Ok(Self::Bzip2),
            other => Err(CompressionError::UnsupportedFormat(other.to_string())),
        }
    }

    /// The wire format this backend produces
    pub fn format(&self) -> Format {
        match self {
            Self::Gzip => Format::Gzip,
            Self::Bzip2 => Format::Bzip2,
        }
    }

    /// Name of the parallel external tool for this backend
    fn parallel_tool(&self) -> &'static str {
        match self {
            Self::Gzip => "pigz",
            Self::Bzip2 => "pbzip2",
        }
    }
}

/// Encoding strategy fixed at startup
///
/// Holds the selected backend and, when discovered on PATH, the parallel
/// external compressor to prefer for bulk encoding.
pub struct Compressor {
    backend: Backend,
    external: Option<PathBuf>,
}

impl Compressor {
    /// Select a compressor, probing PATH for the parallel variant
    pub fn select(backend: Backend) -> Self {
        let external = which::which(backend.parallel_tool()).ok();
        match &external {
            Some(tool) => debug!("Using parallel compressor {}", tool.display()),
            None => debug!("Using in-process {} codec", backend.format()),
        }
        Self { backend, external }
    }

    /// In-process codec only; used by tests and when subprocesses are unwanted
    pub fn library(backend: Backend) -> Self {
        Self {
            backend,
            external: None,
        }
    }

    /// The wire format this compressor produces
    pub fn format(&self) -> Format {
        self.backend.format()
    }

    /// Compress whatever `feed` writes, sending compressed bytes to `out`
    ///
    /// `feed` receives the raw (uncompressed) side of the pipeline and must
    /// return the number of raw bytes it produced. The return value is that
    /// same count, for size accounting by the caller.
    pub fn encode_from<F>(&self, feed: F, out: &mut dyn Write) -> Result<u64, CompressionError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<u64> + Send,
    {
        match &self.external {
            Some(tool) => self.encode_external(tool.clone(), feed, out),
            None => self.encode_library(feed, out),
        }
    }

    /// Compress a file (convenience over [`Compressor::encode_from`])
    pub fn encode_file(
        &self,
        path: &std::path::Path,
        out: &mut dyn Write,
    ) -> Result<u64, CompressionError> {
        let mut file = std::fs::File::open(path).map_err(CompressionError::Encode)?;
        self.encode_from(|w| io::copy(&mut file, w), out)
    }

    fn encode_library<F>(&self, feed: F, out: &mut dyn Write) -> Result<u64, CompressionError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<u64>,
    {
        match self.backend {
            Backend::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(out, flate2::Compression::default());
                let raw = feed(&mut encoder).map_err(CompressionError::Encode)?;
                encoder.finish().map_err(CompressionError::Encode)?;
                Ok(raw)
            }
            Backend::Bzip2 => {
                let mut encoder = bzip2::write::BzEncoder::new(out, bzip2::Compression::default());
                let raw = feed(&mut encoder).map_err(CompressionError::Encode)?;
                encoder.finish().map_err(CompressionError::Encode)?;
                Ok(raw)
            }
        }
    }

    fn encode_external<F>(
        &self,
        tool: PathBuf,
        feed: F,
        out: &mut dyn Write,
    ) -> Result<u64, CompressionError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<u64> + Send,
    {
        let tool_name = tool.display().to_string();
        let mut child = Command::new(&tool)
            .arg("-c")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CompressionError::ExternalTool {
                tool: tool_name.clone(),
                message: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let mut stdout = child.stdout.take().expect("piped stdout");

        let raw = std::thread::scope(|scope| -> Result<u64, CompressionError> {
            let feeder = scope.spawn(move || -> io::Result<u64> {
                let n = feed(&mut stdin)?;
                // dropping stdin closes the pipe so the tool can finish
                Ok(n)
            });

            io::copy(&mut stdout, out).map_err(CompressionError::Encode)?;

            feeder
                .join()
                .map_err(|_| CompressionError::ExternalTool {
                    tool: tool_name.clone(),
                    message: "feeder thread panicked".to_string(),
                })?
                .map_err(CompressionError::Encode)
        })?;

        let output = child
            .wait_with_output()
            .map_err(|e| CompressionError::ExternalTool {
                tool: tool_name.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompressionError::ExternalTool {
                tool: tool_name,
                message: stderr.trim().to_string(),
            });
        }

        Ok(raw)
    }
}

/// Create a decompressing reader for a concrete format
///
/// Tar is not a streaming wrap; it goes through [`extract_tar_member`].
pub fn decoder<'a, R: Read + 'a>(
    reader: R,
    format: Format,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        Format::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        Format::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
        Format::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        Format::Tar => Err(CompressionError::UnsupportedFormat(
            "tar (use archive extraction)".to_string(),
        )),
    }
}

/// Stream the first regular file out of a tar archive
pub fn extract_tar_member<R: Read>(
    reader: R,
    out: &mut dyn Write,
) -> Result<u64, CompressionError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| CompressionError::Decompression {
            format: "tar",
            source: e,
        })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| CompressionError::Decompression {
            format: "tar",
            source: e,
        })?;
        if entry.header().entry_type().is_file() {
            return io::copy(&mut entry, out).map_err(|e| CompressionError::Decompression {
                format: "tar",
                source: e,
            });
        }
    }

    Err(CompressionError::EmptyArchive)
}

/// Read up to [`PROBE_LEN`] bytes without losing them for the caller
fn read_probe<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut probe = vec![0u8; PROBE_LEN];
    let mut filled = 0;
    while filled < PROBE_LEN {
        let n = reader.read(&mut probe[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    probe.truncate(filled);
    Ok(probe)
}

/// Decompress a stream to `out`, auto-detecting the format
///
/// Unknown input is copied through untouched. A compressed stream whose
/// payload is itself compressed (one level, e.g. gz-of-tar) is decoded twice.
/// Returns the number of bytes written to `out`.
pub fn decode_stream<R: Read>(
    mut reader: R,
    out: &mut dyn Write,
) -> Result<u64, CompressionError> {
    let probe = read_probe(&mut reader).map_err(|e| CompressionError::Decompression {
        format: "unknown",
        source: e,
    })?;
    let format = Format::from_magic_bytes(&probe);
    let source: Box<dyn Read> = Box::new(Cursor::new(probe).chain(reader));

    match format {
        None => copy_through(source, out, "raw"),
        Some(Format::Tar) => extract_tar_member(source, out),
        Some(outer) => {
            debug!("Decoding {} stream", outer);
            let mut decoded = decoder(source, outer)?;
            let inner_probe =
                read_probe(&mut decoded).map_err(|e| CompressionError::Decompression {
                    format: outer.name(),
                    source: e,
                })?;
            let inner_format = Format::from_magic_bytes(&inner_probe);
            let inner: Box<dyn Read> = Box::new(Cursor::new(inner_probe).chain(decoded));

            match inner_format {
                None => copy_through(inner, out, outer.name()),
                Some(Format::Tar) => extract_tar_member(inner, out),
                Some(nested) => {
                    debug!("Nested {} stream inside {}", nested, outer);
                    copy_through(decoder(inner, nested)?, out, nested.name())
                }
            }
        }
    }
}

fn copy_through<R: Read>(
    mut reader: R,
    out: &mut dyn Write,
    format: &'static str,
) -> Result<u64, CompressionError> {
    io::copy(&mut reader, out).map_err(|e| CompressionError::Decompression { format, source: e })
}

/// Decompress a byte slice (convenience for small inputs)
pub fn decode_bytes(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::new();
    decode_stream(Cursor::new(data), &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gz(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let compressor = Compressor::library(Backend::Gzip);
        compressor
            .encode_from(
                |w| {
                    w.write_all(data)?;
                    Ok(data.len() as u64)
                },
                &mut out,
            )
            .unwrap();
        out
    }

    fn bz2(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let compressor = Compressor::library(Backend::Bzip2);
        compressor
            .encode_from(
                |w| {
                    w.write_all(data)?;
                    Ok(data.len() as u64)
                },
                &mut out,
            )
            .unwrap();
        out
    }

    #[test]
    fn test_detect_magic_bytes() {
        assert_eq!(
            Format::from_magic_bytes(&[0x1f, 0x8b, 0x08, 0x00]),
            Some(Format::Gzip)
        );
        assert_eq!(Format::from_magic_bytes(b"BZh91AY"), Some(Format::Bzip2));
        assert_eq!(
            Format::from_magic_bytes(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
            Some(Format::Xz)
        );
        assert_eq!(Format::from_magic_bytes(&[0x00; 786]), None);
        assert_eq!(Format::from_magic_bytes(&[0x1f]), None);
    }

    #[test]
    fn test_detect_tar_at_offset() {
        let mut buf = vec![0u8; PROBE_LEN];
        buf[257..262].copy_from_slice(b"ustar");
        assert_eq!(Format::from_magic_bytes(&buf), Some(Format::Tar));

        // too short to reach the ustar magic
        assert_eq!(Format::from_magic_bytes(&buf[..200]), None);
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("gz").unwrap(), Backend::Gzip);
        assert_eq!(Backend::parse("bz2").unwrap(), Backend::Bzip2);
        assert!(matches!(
            Backend::parse("zst"),
            Err(CompressionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_roundtrip_gzip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = gz(&data);
        assert_eq!(Format::from_magic_bytes(&compressed), Some(Format::Gzip));
        assert_eq!(decode_bytes(&compressed).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_bzip2() {
        let data = b"partition payload bytes".repeat(100);
        let compressed = bz2(&data);
        assert_eq!(Format::from_magic_bytes(&compressed), Some(Format::Bzip2));
        assert_eq!(decode_bytes(&compressed).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_xz() {
        // decode-only format: sources arrive xz-compressed from upstream
        let data = b"firmware blob bytes".repeat(80);
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(Format::from_magic_bytes(&compressed), Some(Format::Xz));
        assert_eq!(decode_bytes(&compressed).unwrap(), data);
    }

    #[test]
    fn test_passthrough_uncompressed() {
        let data = b"plain text that matches no magic";
        assert_eq!(decode_bytes(data).unwrap(), data);
    }

    #[test]
    fn test_nested_single_level() {
        // gz(gz(data)): decoding runs a second pass automatically
        let data = b"doubly wrapped payload".repeat(20);
        let once = gz(&data);
        let twice = gz(&once);
        assert_eq!(decode_bytes(&twice).unwrap(), data);
    }

    #[test]
    fn test_gz_of_tar_extracts_member() {
        let content = b"member file contents";
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "payload.bin", &content[..])
            .unwrap();
        let tarball = builder.into_inner().unwrap();

        let wrapped = gz(&tarball);
        assert_eq!(decode_bytes(&wrapped).unwrap(), content);
    }

    #[test]
    fn test_decoder_rejects_tar() {
        assert!(decoder(Cursor::new(Vec::new()), Format::Tar).is_err());
    }

    #[test]
    fn test_encode_reports_raw_size() {
        let data = vec![7u8; 4096];
        let compressor = Compressor::library(Backend::Gzip);
        let mut out = Vec::new();
        let raw = compressor
            .encode_from(
                |w| {
                    w.write_all(&data)?;
                    Ok(data.len() as u64)
                },
                &mut out,
            )
            .unwrap();
        assert_eq!(raw, 4096);
        assert!(!out.is_empty());
    }
}
