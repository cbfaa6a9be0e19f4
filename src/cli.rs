// src/cli.rs
//! CLI definitions for the depot payload tool
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "depot")]
#[command(version)]
#[command(
    about = "Content-addressed payload packaging and installation",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Package a file or disk image into the bundle next to MANIFEST
    Add {
        /// Path to the manifest JSON file
        manifest: PathBuf,

        /// Component name (e.g. test_image, toolkit, hwid)
        component: String,

        /// Source file or disk image
        file: PathBuf,
    },

    /// Set a scalar meta field on a component
    #[command(name = "add_meta")]
    AddMeta {
        /// Path to the manifest JSON file
        manifest: PathBuf,

        /// Component name
        component: String,

        /// Meta field name (e.g. version)
        name: String,

        /// Meta field value
        value: String,
    },

    /// Install components onto a block device (requires root), directory or file
    Install {
        /// Manifest location: local path, file:// or http(s):// URL
        source: String,

        /// Destination device, directory or file path
        dest: PathBuf,

        /// Components to install, processed in order
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Like install, but missing components are skipped with a warning
    #[command(name = "install_optional")]
    InstallOptional {
        /// Manifest location: local path, file:// or http(s):// URL
        source: String,

        /// Destination device, directory or file path
        dest: PathBuf,

        /// Components to install, processed in order
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Copy blobs compressed into DEST without decoding or activation
    Download {
        /// Manifest location: local path, file:// or http(s):// URL
        source: String,

        /// Destination directory
        dest: PathBuf,

        /// Components to download
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// List components recorded in a manifest
    List {
        /// Manifest location: local path, file:// or http(s):// URL
        source: String,
    },

    /// Print the resolved location of a component's file blob
    #[command(name = "get_file")]
    GetFile {
        /// Manifest location: local path, file:// or http(s):// URL
        source: String,

        /// Component name
        component: String,
    },

    /// Print the resolved location of every blob in a manifest
    #[command(name = "get_all_files")]
    GetAllFiles {
        /// Manifest location: local path, file:// or http(s):// URL
        source: String,
    },
}
