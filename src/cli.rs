use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::build::BuildType;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// More output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON build config; absent keys keep their defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a project and write the generated sources
    Compile {
        /// Project .json file; asset paths are relative to its directory
        project: PathBuf,
        /// Output directory
        out_dir: PathBuf,
    },
    /// Compile a project and run the cartridge toolchain over it
    Build {
        project: PathBuf,
        /// Root of the toolchain's source tree
        #[arg(long)]
        src_root: Option<PathBuf>,
        /// Where generated sources are staged
        #[arg(long)]
        build_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = BuildType::Rom)]
        build_type: BuildType,
    },
}
