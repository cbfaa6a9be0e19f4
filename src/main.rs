// src/main.rs

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use depot::cleanup::CleanupRegistry;
use depot::commands::{
    cmd_add, cmd_add_meta, cmd_get_all_files, cmd_get_file, cmd_install, cmd_list, InstallMode,
};
use depot::config::Config;

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let registry = CleanupRegistry::global().clone();

    match cli.command {
        Commands::Add {
            manifest,
            component,
            file,
        } => cmd_add(&manifest, &component, &file, &config, &registry)?,
        Commands::AddMeta {
            manifest,
            component,
            name,
            value,
        } => cmd_add_meta(&manifest, &component, &name, &value)?,
        Commands::Install {
            source,
            dest,
            components,
        } => cmd_install(
            &source,
            &dest,
            &components,
            InstallMode::Install,
            &config,
            &registry,
        )?,
        Commands::InstallOptional {
            source,
            dest,
            components,
        } => cmd_install(
            &source,
            &dest,
            &components,
            InstallMode::Optional,
            &config,
            &registry,
        )?,
        Commands::Download {
            source,
            dest,
            components,
        } => cmd_install(
            &source,
            &dest,
            &components,
            InstallMode::Download,
            &config,
            &registry,
        )?,
        Commands::List { source } => cmd_list(&source)?,
        Commands::GetFile { source, component } => cmd_get_file(&source, &component)?,
        Commands::GetAllFiles { source } => cmd_get_all_files(&source)?,
    }
    Ok(())
}

fn main() {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    CleanupRegistry::install_signal_handler();

    let result = run();
    CleanupRegistry::global().drain();
    if let Err(err) = result {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}
