use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tfdep",
    about = "Terraform provider updates - opens GitLab merge requests for outdated provider pins",
    version,
    author
)]
pub struct Cli {
    /// Optional TOML configuration file; environment variables override it
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open merge requests for outdated providers and close obsolete ones
    Run {
        /// Log what would change without creating or deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Report outdated providers without touching GitLab
    Check,

    /// List the providers declared in the manifest
    List,
}
