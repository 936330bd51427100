//! chartops
//!
//! Package manager CLI for lightweight Kubernetes clusters. `update` fetches
//! a remote package index and fills a local chart cache; `install`, `delete`
//! and `purge` drive helm and kubectl against the cached packages.

mod archive;
mod cache;
mod commands;
mod fetch;
mod package;
mod types;

use anyhow::Result;
use clap::Parser;

use crate::types::{ChartOpsCli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = ChartOpsCli::parse();
    match cli.command {
        Command::Update => commands::update::run().await,
        Command::Install {
            package,
            profile,
            update_crd_only,
            custom_options,
        } => commands::install::run(&package, profile.as_deref(), update_crd_only, &custom_options).await,
        Command::Delete {
            package,
            custom_options,
        } => commands::delete::run(&package, &custom_options).await,
        Command::Purge { package } => commands::purge::run(&package).await,
    }
}
