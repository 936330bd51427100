//! Command-line interface definition.

use clap::{Parser, Subcommand};

/// Main CLI structure
#[derive(Parser, Debug)]
#[clap(name = "chartops", version, about = "Package manager for lightweight Kubernetes clusters")]
pub struct ChartOpsCli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Refresh the local chart cache from the package index
    Update,

    /// Install or upgrade a cached package
    Install {
        /// Package name from the index
        package: String,

        /// Named set of answer values for the chart
        #[arg(short, long)]
        profile: Option<String>,

        /// Only apply the package's CRD manifest
        #[arg(long)]
        update_crd_only: bool,

        /// Extra options passed through to helm
        #[arg(long = "custom-options")]
        custom_options: Vec<String>,
    },

    /// Delete an installed package
    Delete {
        /// Package name from the index
        package: String,

        /// Extra options passed through to helm delete
        #[arg(long = "custom-options")]
        custom_options: Vec<String>,
    },

    /// Remove the CRD configuration a package installed
    Purge {
        /// Package name from the index
        package: String,
    },
}
