use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "assetmatrix")]
#[command(about = "Streaming asset build pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build every asset under the input directories
    Build(BuildArgs),
    /// Print each output's handler chain without building
    Plan(BuildArgs),
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Configuration file (defaults to assetmatrix.toml or $ASSETMATRIX_CONFIG)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Input directory; repeat to scan several (replaces the configured list)
    #[arg(long = "input", short)]
    pub inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Maximum concurrently open source files
    #[arg(long)]
    pub fd_limit: Option<usize>,
}
