use anyhow::Result;
use clap::{Parser, Subcommand as ClapSubcommand};
use std::path::PathBuf;

use crate::indexer::Indexer;
use crate::options::Options;
use crate::report::read_address_history;

#[derive(ClapSubcommand, Debug, Clone)]
pub enum Subcommand {
    /// Scan the container files and report how many headers they hold
    Scan,
    /// Run the full pipeline: scan, chain selection, ledger aggregation
    Process,
    /// Run the pipeline and write stats.csv (and the address-history file
    /// when --record-addresses is on)
    Statistics,
    /// Run the pipeline and print totals and the balance distribution
    Counts,
    Block(Block),
    Transaction(Transaction),
    Address(Address),
    TopBalance(TopBalance),
    Oldest(Oldest),
    Zombie(Zombie),
    History(History),
}

/// Print one block by chain height
#[derive(Parser, Debug, Clone)]
pub struct Block {
    #[clap(help = "Height on the reconstructed main chain")]
    pub height: usize,
}

/// Re-read and print one transaction by id
#[derive(Parser, Debug, Clone)]
pub struct Transaction {
    #[clap(help = "Transaction id, human-order hex")]
    pub txid: String,
}

/// Print the ledger entry of one address
#[derive(Parser, Debug, Clone)]
pub struct Address {
    #[clap(help = "Base58Check address")]
    pub address: String,
}

/// List the richest addresses
#[derive(Parser, Debug, Clone)]
pub struct TopBalance {
    #[clap(default_value = "25", help = "How many addresses to list")]
    pub count: usize,
    #[clap(long, default_value = "1", help = "Minimum balance in whole BTC")]
    pub min_balance: u64,
}

/// List the longest-idle addresses
#[derive(Parser, Debug, Clone)]
pub struct Oldest {
    #[clap(default_value = "25", help = "How many addresses to list")]
    pub count: usize,
    #[clap(long, default_value = "1", help = "Minimum balance in whole BTC")]
    pub min_balance: u64,
}

/// List addresses idle longer than a threshold
#[derive(Parser, Debug, Clone)]
pub struct Zombie {
    #[clap(default_value = "365", help = "Days of inactivity")]
    pub days: u32,
    #[clap(long, default_value = "1", help = "Minimum balance in whole BTC")]
    pub min_balance: u64,
}

/// Validate and summarize a previously written address-history file
#[derive(Parser, Debug, Clone)]
pub struct History {
    #[clap(default_value = "BlockChainAddresses.bin", help = "History file path")]
    pub path: PathBuf,
}

impl Subcommand {
    pub fn run(self, options: &Options) -> Result<()> {
        if let Subcommand::History(history) = self {
            let loaded = read_address_history(&history.path)?;
            println!(
                "{} unique addresses over {} rows",
                loaded.addresses.len(),
                loaded.rows.len()
            );
            for row in &loaded.rows {
                println!(
                    "  {}: {} new, {} changed, {} deleted",
                    crate::report::time_label(row.start_time),
                    row.new.len(),
                    row.changed.len(),
                    row.deleted.len()
                );
            }
            return Ok(());
        }

        let mut indexer = Indexer::new(options.indexer_config())?;

        if let Subcommand::Scan = self {
            indexer.scan()?;
            let chain = indexer.build_chain();
            println!(
                "{} headers on disk, {} on the main chain, {} orphans",
                indexer.header_count(),
                chain,
                indexer.header_count() - chain
            );
            return Ok(());
        }

        indexer.scan()?;
        indexer.build_chain();
        indexer.process()?;

        match self {
            Subcommand::Scan => unreachable!(),
            Subcommand::Process => {
                println!("processed {} blocks", indexer.chain_len());
            }
            Subcommand::Statistics => {
                indexer.write_reports()?;
                println!(
                    "wrote {} statistic rows to {:?}",
                    indexer.snapshots().rows().len(),
                    options.output_dir
                );
            }
            Subcommand::Counts => indexer.report_counts(),
            Subcommand::Block(block) => indexer.print_block(block.height)?,
            Subcommand::Transaction(tx) => indexer.print_transaction(&tx.txid)?,
            Subcommand::Address(address) => indexer.print_address(&address.address)?,
            Subcommand::TopBalance(top) => {
                indexer.print_top_balances(top.count, top.min_balance)
            }
            Subcommand::Oldest(oldest) => indexer.print_oldest(oldest.count, oldest.min_balance),
            Subcommand::Zombie(zombie) => indexer.print_zombies(zombie.days, zombie.min_balance),
            Subcommand::History(_) => unreachable!(),
        }
        Ok(())
    }
}
