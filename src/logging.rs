//! Run diagnostics.
//!
//! The decoder and resolver carry a `Diagnostics` value down the call chain
//! instead of mutating globals; it tracks where the walk currently is (block,
//! transaction, output) so warnings come out with their location attached,
//! and it counts every non-fatal condition for the end-of-run summary.

use log::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    /// Position of the walk, for warning attribution.
    pub block_index: u32,
    pub transaction_index: u32,
    pub output_index: u32,

    /// Counters for every non-fatal condition.
    pub unknown_scripts: u64,
    pub unusual_scripts: u64,
    pub oversize_scripts: u64,
    pub excessive_counts: u64,
    pub oversize_varints: u64,
    pub odd_tx_versions: u64,
    pub truncated_records: u64,
    pub gap_recoveries: u64,
    pub unresolved_inputs: u64,
    pub duplicate_transactions: u64,
    pub flagged_blocks: u64,
    pub flagged_transactions: u64,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn enter_block(&mut self, block_index: u32) {
        self.block_index = block_index;
        self.transaction_index = 0;
        self.output_index = 0;
    }

    pub fn enter_transaction(&mut self, transaction_index: u32) {
        self.transaction_index = transaction_index;
        self.output_index = 0;
    }

    fn location(&self) -> String {
        format!(
            "block {} tx {} output {}",
            self.block_index, self.transaction_index, self.output_index
        )
    }

    pub fn unknown_script(&mut self, script_len: usize) {
        self.unknown_scripts += 1;
        warn!(
            "failed to decode a recipient from output script ({} bytes) at {}",
            script_len,
            self.location()
        );
    }

    pub fn unusual_script(&mut self) {
        self.unusual_scripts += 1;
        warn!("unusual but expected output script at {}", self.location());
    }

    pub fn oversize_script(&mut self, script_len: usize) {
        self.oversize_scripts += 1;
        warn!(
            "script of {} bytes exceeds the cap at {}",
            script_len,
            self.location()
        );
    }

    pub fn excessive_count(&mut self, what: &'static str, count: u64) {
        self.excessive_counts += 1;
        warn!(
            "unreasonable {} count {} at {}",
            what,
            count,
            self.location()
        );
    }

    pub fn oversize_varint(&mut self, value: u64) {
        self.oversize_varints += 1;
        warn!(
            "eight-byte varint (value {}) at {}",
            value,
            self.location()
        );
    }

    pub fn odd_tx_version(&mut self, version: u32) {
        self.odd_tx_versions += 1;
        warn!(
            "unexpected transaction version {} at {}",
            version,
            self.location()
        );
    }

    pub fn truncated_record(&mut self, file_index: u32) {
        self.truncated_records += 1;
        warn!("truncated record in blk{:05}.dat", file_index);
    }

    pub fn gap_recovered(&mut self, file_index: u32, skipped: u64) {
        self.gap_recoveries += 1;
        warn!(
            "missing record magic in blk{:05}.dat; found the next one {} bytes forward",
            file_index, skipped
        );
    }

    pub fn unresolved_input(&mut self) {
        self.unresolved_inputs += 1;
        warn!(
            "input references an unknown funding transaction at {}",
            self.location()
        );
    }

    pub fn duplicate_transaction(&mut self) {
        self.duplicate_transactions += 1;
        warn!("duplicate transaction id at {}", self.location());
    }

    pub fn flag_block(&mut self) {
        self.flagged_blocks += 1;
    }

    pub fn flag_transaction(&mut self) {
        self.flagged_transactions += 1;
    }

    /// Printed once at the end of a run.
    pub fn log_summary(&self) {
        info!(
            "diagnostics: {} flagged blocks, {} flagged transactions",
            self.flagged_blocks, self.flagged_transactions
        );
        info!(
            "diagnostics: {} unknown scripts, {} unusual scripts, {} oversize scripts",
            self.unknown_scripts, self.unusual_scripts, self.oversize_scripts
        );
        info!(
            "diagnostics: {} unresolved inputs, {} duplicate transaction ids",
            self.unresolved_inputs, self.duplicate_transactions
        );
        info!(
            "diagnostics: {} truncated records, {} gap recoveries, {} oversize varints, {} excessive counts, {} odd tx versions",
            self.truncated_records,
            self.gap_recoveries,
            self.oversize_varints,
            self.excessive_counts,
            self.odd_tx_versions
        );
    }
}
