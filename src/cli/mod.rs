pub mod commands;

use crate::config::Config;
use crate::ebpf::PinnedMap;
use crate::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ktrace")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trace kernel filesystem and TCP activity with kprobes", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Trace filesystem operations slower than a threshold")]
    Fsslower {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(short, long, help = "Filesystem to trace (btrfs, ext4, nfs, xfs)")]
        filesystem: Option<String>,

        #[arg(short, long, help = "Minimum latency to report, in milliseconds")]
        min_latency: Option<u64>,
    },
    #[command(about = "Trace TCP connect, accept and close")]
    Tcptracer {
        #[command(flatten)]
        common: CommonArgs,
    },
    #[command(about = "Trace outgoing TCP connections")]
    Tcpconnect {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(short, long, help = "YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Pinned mount_ns_filter map restricting traced namespaces")]
    pub mntns_filter: Option<PathBuf>,

    #[arg(long, help = "Directory holding the compiled program images")]
    pub probes_dir: Option<PathBuf>,
}

impl CommonArgs {
    /// Config file (or defaults) with command-line flags layered on top
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(path) = &self.mntns_filter {
            config.mntns_filter = Some(PinnedMap::new(path.clone()));
        }
        config.validate()?;
        Ok(config)
    }
}
