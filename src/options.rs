use clap::Parser;
use std::path::PathBuf;

use crate::indexer::IndexerConfig;
use crate::stats::SnapshotPeriod;
use crate::subcommand::Subcommand;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Batch parser and address analyzer for the on-disk Bitcoin block-chain"
)]
pub struct Options {
    #[clap(
        long,
        default_value = ".",
        help = "Directory holding blk00000.dat and its successors"
    )]
    pub blocks_dir: PathBuf,
    #[clap(long, default_value = ".", help = "Directory reports are written to")]
    pub output_dir: PathBuf,
    #[clap(long, help = "Stop scanning after this many block headers")]
    pub max_blocks: Option<u32>,
    #[clap(
        long,
        value_enum,
        default_value = "month",
        help = "Statistics bucket size: day, month, year"
    )]
    pub period: SnapshotPeriod,
    #[clap(
        long,
        default_value = "365",
        help = "Days of inactivity before an address counts as a zombie"
    )]
    pub zombie_days: u32,
    #[clap(
        long,
        help = "Keep per-address snapshots and write the binary history file"
    )]
    pub record_addresses: bool,
    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            blocks_dir: self.blocks_dir.clone(),
            output_dir: self.output_dir.clone(),
            max_blocks: self.max_blocks,
            period: self.period,
            zombie_days: self.zombie_days,
            record_addresses: self.record_addresses,
        }
    }
}
