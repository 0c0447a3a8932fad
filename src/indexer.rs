//! Pipeline orchestration.
//!
//! A run proceeds in strict phases, single-threaded: scan every container
//! file for headers, reconstruct the main chain, then decode each block in
//! chain order, registering its transactions in the directory and applying
//! them to the ledger, snapshotting the address population whenever a time
//! boundary is crossed. The query commands read the state this builds.

use std::path::PathBuf;

use chrono::Utc;
use log::{info, warn};

use blockscan_support::address::{ascii_to_hash160, hash160_to_ascii};

use crate::arena::{AddressArena, AddressId};
use crate::block::{decode_block, decode_transaction, RawBlock};
use crate::chain::{HeaderIndex, HeaderRecord};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::logging::Diagnostics;
use crate::report;
use crate::scan::{scan_headers, BlockFiles};
use crate::stats::{SnapshotEngine, SnapshotPeriod, ONE_BTC};
use crate::txindex::{TxDirectory, TxLocation};

pub struct IndexerConfig {
    pub blocks_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_blocks: Option<u32>,
    pub period: SnapshotPeriod,
    pub zombie_days: u32,
    pub record_addresses: bool,
}

pub struct Indexer {
    config: IndexerConfig,
    files: BlockFiles,
    headers: HeaderIndex,
    chain: Vec<HeaderRecord>,
    directory: TxDirectory,
    arena: AddressArena,
    ledger: Ledger,
    snapshots: SnapshotEngine,
    pub diag: Diagnostics,
    total_inputs: u64,
}

fn wall_clock() -> u32 {
    Utc::now().timestamp().max(0) as u32
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Result<Indexer, EngineError> {
        let files = BlockFiles::open(&config.blocks_dir)?;
        let snapshots =
            SnapshotEngine::new(config.period, config.zombie_days, config.record_addresses);
        Ok(Indexer {
            config,
            files,
            headers: HeaderIndex::new(),
            chain: Vec::new(),
            directory: TxDirectory::new(),
            arena: AddressArena::new(),
            ledger: Ledger::new(),
            snapshots,
            diag: Diagnostics::new(),
            total_inputs: 0,
        })
    }

    /// Phase one: recover every header on disk.
    pub fn scan(&mut self) -> Result<u32, EngineError> {
        let scanned = scan_headers(
            &mut self.files,
            &mut self.headers,
            self.config.max_blocks,
            &mut self.diag,
        )?;
        info!("scan recovered {} headers", self.headers.len());
        Ok(scanned)
    }

    /// Phase two: pick the main chain out of the header graph.
    pub fn build_chain(&mut self) -> usize {
        self.chain = self.headers.reconstruct();
        self.chain.len()
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// Phase three: decode the chain in order and aggregate the ledger.
    pub fn process(&mut self) -> Result<(), EngineError> {
        let mut buf: Vec<u8> = Vec::new();
        for index in 0..self.chain.len() {
            let header = self.chain[index];
            self.diag.enter_block(index as u32);
            buf.resize(header.payload_length as usize, 0);
            if !self
                .files
                .read_at(header.file_index, header.file_offset as u64, &mut buf)?
            {
                self.diag.truncated_record(header.file_index);
                self.diag.flag_block();
                continue;
            }
            let block = match decode_block(&buf, &mut self.diag) {
                Ok(block) => block,
                Err(err) => {
                    warn!("skipping undecodable block {}: {}", header.id, err);
                    self.diag.flag_block();
                    continue;
                }
            };
            self.snapshots.observe_block(block.timestamp, &self.arena);
            let misses_before = self.diag.unresolved_inputs;
            self.apply_block(&header, &block)?;
            if block.flagged || self.diag.unresolved_inputs > misses_before {
                self.diag.flag_block();
            }
        }
        self.snapshots.finalize(&self.arena);
        info!(
            "processed {} blocks, {} transactions, {} inputs, {} outputs, {} addresses",
            self.chain.len(),
            self.ledger.transaction_count(),
            self.total_inputs,
            self.ledger.output_count(),
            self.arena.len(),
        );
        self.diag.log_summary();
        Ok(())
    }

    fn apply_block(&mut self, header: &HeaderRecord, block: &RawBlock<'_>) -> Result<(), EngineError> {
        // Register the whole block in the directory first, so transactions
        // spending an earlier output of the same block resolve.
        let base = self.ledger.transaction_count();
        for (i, tx) in block.transactions.iter().enumerate() {
            let inserted = self.directory.insert(TxLocation {
                id: tx.id,
                file_index: header.file_index,
                file_offset: header.file_offset + tx.offset_in_block,
                length: tx.length,
                sequence: base + i as u64,
            });
            if !inserted {
                self.diag.enter_transaction(i as u32);
                self.diag.duplicate_transaction();
            }
        }
        for (i, tx) in block.transactions.iter().enumerate() {
            self.diag.enter_transaction(i as u32);
            if tx.flagged {
                self.diag.flag_transaction();
            }
            self.total_inputs += tx.inputs.len() as u64;
            self.ledger.apply_transaction(
                &mut self.arena,
                &self.directory,
                tx,
                block.timestamp,
                base + i as u64,
                &mut self.diag,
            )?;
        }
        Ok(())
    }

    /// Writes `stats.csv` and, when address recording is on, the binary
    /// address-history file.
    pub fn write_reports(&self) -> anyhow::Result<()> {
        let now = wall_clock();
        let csv_path = self.config.output_dir.join("stats.csv");
        report::write_stats_csv(&csv_path, self.snapshots.rows(), &self.arena, now)?;
        if self.config.record_addresses {
            let bin_path = self.config.output_dir.join("BlockChainAddresses.bin");
            report::write_address_history(&bin_path, self.snapshots.rows(), &self.arena)?;
        }
        Ok(())
    }

    /// Totals plus a coarse balance-distribution breakdown.
    pub fn report_counts(&self) {
        println!("{} blocks on the main chain", self.chain.len());
        println!("{} transactions", self.ledger.transaction_count());
        println!("{} inputs", self.total_inputs);
        println!("{} outputs", self.ledger.output_count());
        println!("{} addresses", self.arena.len());

        const LIMITS: [(u64, &str); 8] = [
            (ONE_BTC / 1000, "under 1 mBTC (dust)"),
            (ONE_BTC, "1 mBTC to 1 BTC"),
            (10 * ONE_BTC, "1 to 10 BTC"),
            (100 * ONE_BTC, "10 to 100 BTC"),
            (1_000 * ONE_BTC, "100 to 1,000 BTC"),
            (10_000 * ONE_BTC, "1,000 to 10,000 BTC"),
            (100_000 * ONE_BTC, "10,000 to 100,000 BTC"),
            (u64::MAX, "over 100,000 BTC"),
        ];
        let mut zero_count = 0u64;
        let mut counts = [0u64; LIMITS.len()];
        let mut values = [0u64; LIMITS.len()];
        for (_, entry) in self.arena.iter() {
            let balance = entry.balance();
            if balance == 0 {
                zero_count += 1;
                continue;
            }
            let slot = LIMITS
                .iter()
                .position(|(limit, _)| balance < *limit)
                .unwrap_or(LIMITS.len() - 1);
            counts[slot] += 1;
            values[slot] += balance;
        }
        println!("{} addresses with a zero balance", zero_count);
        for (slot, (_, label)) in LIMITS.iter().enumerate() {
            println!(
                "{} addresses {} holding {:.4} BTC",
                counts[slot],
                label,
                values[slot] as f64 / ONE_BTC as f64
            );
        }
    }

    fn picked_addresses(&self, min_balance_btc: u64) -> Vec<(AddressId, u64)> {
        let floor = min_balance_btc * ONE_BTC;
        self.arena
            .iter()
            .filter(|(_, e)| e.balance() >= floor)
            .map(|(id, e)| (id, e.balance()))
            .collect()
    }

    fn print_address_line(&self, id: AddressId, now: u32) {
        let entry = self.arena.get(id);
        println!(
            "{:<36} {:>14.4} BTC  {:>6} days idle  {} tx",
            hash160_to_ascii(&entry.hash),
            entry.balance() as f64 / ONE_BTC as f64,
            entry.days_since_last_used(now),
            entry.transaction_count,
        );
    }

    /// The `count` richest addresses at or above a balance floor.
    pub fn print_top_balances(&self, count: usize, min_balance_btc: u64) {
        let now = wall_clock();
        let mut picked = self.picked_addresses(min_balance_btc);
        if picked.is_empty() {
            println!("no addresses hold {} BTC or more", min_balance_btc);
            return;
        }
        picked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        println!("top {} addresses by balance", count.min(picked.len()));
        for (id, _) in picked.iter().take(count) {
            self.print_address_line(*id, now);
        }
    }

    /// The `count` longest-idle addresses at or above a balance floor.
    pub fn print_oldest(&self, count: usize, min_balance_btc: u64) {
        let now = wall_clock();
        let mut picked = self.picked_addresses(min_balance_btc);
        if picked.is_empty() {
            println!("no addresses hold {} BTC or more", min_balance_btc);
            return;
        }
        picked.sort_by_key(|(id, _)| {
            (
                std::cmp::Reverse(self.arena.get(*id).days_since_last_used(now)),
                *id,
            )
        });
        println!("{} least recently used addresses", count.min(picked.len()));
        for (id, _) in picked.iter().take(count) {
            self.print_address_line(*id, now);
        }
    }

    /// Addresses idle for at least `days` with at least the balance floor.
    pub fn print_zombies(&self, days: u32, min_balance_btc: u64) {
        let now = wall_clock();
        let mut zombie_count = 0u64;
        let mut zombie_value = 0u64;
        for (id, entry) in self.arena.iter() {
            if entry.balance() >= min_balance_btc * ONE_BTC
                && entry.days_since_last_used(now) >= days
            {
                self.print_address_line(id, now);
                zombie_count += 1;
                zombie_value += entry.balance();
            }
        }
        println!(
            "{} addresses idle for {} days or more, holding {:.4} BTC",
            zombie_count,
            days,
            zombie_value as f64 / ONE_BTC as f64
        );
    }

    /// Looks one address up by its ASCII form.
    pub fn print_address(&self, ascii: &str) -> anyhow::Result<()> {
        let hash = ascii_to_hash160(ascii)?;
        let now = wall_clock();
        match self.arena.lookup(&hash) {
            Some(id) => {
                let entry = self.arena.get(id);
                println!("address      {}", ascii);
                println!("hash160      {}", entry.hash);
                println!(
                    "received     {:.8} BTC over {} outputs",
                    entry.total_received as f64 / ONE_BTC as f64,
                    entry.output_count
                );
                println!(
                    "sent         {:.8} BTC over {} inputs",
                    entry.total_sent as f64 / ONE_BTC as f64,
                    entry.input_count
                );
                println!("balance      {:.8} BTC", entry.balance() as f64 / ONE_BTC as f64);
                println!("transactions {}", entry.transaction_count);
                println!("first funded {}", report::time_label(entry.first_output_time));
                println!("last funded  {}", report::time_label(entry.last_output_time));
                println!("last spent   {}", report::time_label(entry.last_input_time));
                println!("idle         {} days", entry.days_since_last_used(now));
            }
            None => println!("{} never appears on the chain", ascii),
        }
        Ok(())
    }

    /// Decodes and prints one block, resolving each input back to the
    /// address and value it spends.
    pub fn print_block(&mut self, index: usize) -> anyhow::Result<()> {
        let header = match self.chain.get(index) {
            Some(header) => *header,
            None => anyhow::bail!("block {} is past the chain tip", index),
        };
        let mut buf = vec![0u8; header.payload_length as usize];
        if !self
            .files
            .read_at(header.file_index, header.file_offset as u64, &mut buf)?
        {
            anyhow::bail!("block {} bytes are no longer readable", index);
        }
        let mut diag = Diagnostics::new();
        let block = decode_block(&buf, &mut diag)?;

        println!("block #{}", index);
        println!("id            {}", header.id);
        println!("previous      {}", block.previous_id);
        println!("merkle root   {}", block.merkle_root);
        println!("timestamp     {}", report::time_label(block.timestamp));
        println!("bits          {:08x}", block.bits);
        println!("nonce         {}", block.nonce);
        println!("version       {}", block.version);
        println!("size          {} bytes", header.payload_length);
        println!(
            "output total  {:.8} BTC",
            block.total_output_value as f64 / ONE_BTC as f64
        );
        println!("transactions  {}", block.transactions.len());

        for (i, tx) in block.transactions.iter().enumerate() {
            println!("  tx {} {} ({} in, {} out)", i, tx.id, tx.inputs.len(), tx.outputs.len());
            for input in &tx.inputs {
                if input.is_coinbase() {
                    println!("    input  COINBASE");
                    continue;
                }
                match self.resolve_input_source(&input.prev_tx, input.prev_index) {
                    Some((address, value)) => println!(
                        "    input  {} {:.8} BTC",
                        address,
                        value as f64 / ONE_BTC as f64
                    ),
                    None => println!(
                        "    input  unresolved {}[{}]",
                        input.prev_tx, input.prev_index
                    ),
                }
            }
            for output in &tx.outputs {
                match output.recipient {
                    Some(hash) => println!(
                        "    output {} {:.8} BTC",
                        hash160_to_ascii(&hash),
                        output.value as f64 / ONE_BTC as f64
                    ),
                    None => println!(
                        "    output (no recipient) {:.8} BTC",
                        output.value as f64 / ONE_BTC as f64
                    ),
                }
            }
        }
        Ok(())
    }

    fn resolve_input_source(&self, prev_tx: &blockscan_support::Hash256, prev_index: u32) -> Option<(String, u64)> {
        let location = self.directory.lookup(prev_tx)?;
        let resolved = self.ledger.resolve(location.sequence, prev_index)?;
        if resolved.address == 0 {
            return Some(("(unknown recipient)".to_string(), resolved.value));
        }
        let hash = self.arena.get(resolved.address).hash;
        Some((hash160_to_ascii(&hash), resolved.value))
    }

    /// Re-reads one transaction through the directory and prints it; the
    /// slow path the hot loop never takes.
    pub fn print_transaction(&mut self, id_ascii: &str) -> anyhow::Result<()> {
        let mut raw = [0u8; 32];
        hex::decode_to_slice(id_ascii, &mut raw)?;
        raw.reverse(); // ids render human-reversed
        let id = blockscan_support::Hash256(raw);
        let location = match self.directory.lookup(&id) {
            Some(location) => *location,
            None => anyhow::bail!("transaction {} is not in the directory", id_ascii),
        };
        let bytes = self.directory.read_transaction(&location, &mut self.files)?;
        let mut diag = Diagnostics::new();
        let mut reader = blockscan_support::ByteReader::new(&bytes);
        let tx = decode_transaction(&mut reader, &mut diag)?;
        println!("tx {} (sequence {})", tx.id, location.sequence);
        println!(
            "  stored in blk{:05}.dat at offset {} ({} bytes)",
            location.file_index, location.file_offset, location.length
        );
        println!("  {} inputs, {} outputs", tx.inputs.len(), tx.outputs.len());
        for output in &tx.outputs {
            match output.recipient {
                Some(hash) => println!(
                    "  output {} {:.8} BTC",
                    hash160_to_ascii(&hash),
                    output.value as f64 / ONE_BTC as f64
                ),
                None => println!(
                    "  output (no recipient) {:.8} BTC",
                    output.value as f64 / ONE_BTC as f64
                ),
            }
        }
        Ok(())
    }

    pub fn arena(&self) -> &AddressArena {
        &self.arena
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn snapshots(&self) -> &SnapshotEngine {
        &self.snapshots
    }
}
