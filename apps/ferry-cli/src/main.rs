//! Ferry command line entry point.

mod app;
mod config;

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use ferry_protocol::Destination;
use ferry_protocol::constants::ROOT_UPLOADS;
use tracing_subscriber::EnvFilter;

use crate::app::{Backend, UploadArgs};

#[derive(Parser)]
#[command(name = "ferry", version, about = "Resumable uploads to a content store")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Content store base URL, overriding the configured one.
    #[arg(long, global = true, conflicts_with = "local")]
    server: Option<String>,

    /// Serve a repository directory in-process instead of using HTTP.
    #[arg(long, global = true)]
    local: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload files or a folder, resuming whatever the store already holds.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Destination root key.
        #[arg(long, default_value = ROOT_UPLOADS)]
        root: String,

        /// Folder under the root to upload into.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Library label for the registered entry.
        #[arg(long)]
        label: Option<String>,

        /// Replace objects of a different size at the destination.
        #[arg(long)]
        overwrite: bool,
    },
    /// List the library of a `--local` repository.
    Library,
    /// Print the effective configuration.
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(server) = &cli.server {
        config.http.base_url = server.clone();
    }
    let backend = match &cli.local {
        Some(repo) => Backend::Local(repo.clone()),
        None => Backend::Http(config.http.clone()),
    };

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Upload {
            paths,
            root,
            prefix,
            label,
            overwrite,
        } => {
            let args = UploadArgs {
                paths,
                destination: Destination::new(root, prefix),
                label,
                overwrite,
            };
            let snapshot = rt.block_on(app::upload(&config, &backend, args))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if !app::exit_ok(&snapshot) {
                bail!("{}", snapshot.message());
            }
        }
        Command::Library => {
            let Backend::Local(repo) = &backend else {
                bail!("`library` needs --local <repo>");
            };
            let entries = rt.block_on(app::library(&config, repo))?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
