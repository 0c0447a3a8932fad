//! Ledger aggregator.
//!
//! Walks transactions in main-chain order and maintains the per-address
//! totals. Every output a transaction creates is recorded in a flat resolved
//! table indexed by the creating transaction's sequence number, so resolving
//! a later input is a directory lookup plus two array indexings; container
//! files are never re-read on this path.
//!
//! A spend is only recorded after its funding output has been resolved, which
//! is what keeps `total_received >= total_sent` for every address at every
//! prefix of the walk.

use crate::arena::{AddressArena, AddressId};
use crate::block::RawTransaction;
use crate::error::EngineError;
use crate::logging::Diagnostics;
use crate::txindex::TxDirectory;

/// One output after recipient resolution: who it pays and how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub address: AddressId,
    pub value: u64,
}

#[derive(Default)]
pub struct Ledger {
    outputs: Vec<ResolvedOutput>,
    /// Start of each transaction's span in `outputs`, indexed by sequence.
    out_start: Vec<u64>,
    /// Summed coinbase output value; the subsidy-plus-fees side of the
    /// conservation check.
    pub coinbase_value: u64,
    pub resolved_input_count: u64,
}

impl Ledger {
    pub fn new() -> Ledger {
        Ledger::default()
    }

    pub fn transaction_count(&self) -> u64 {
        self.out_start.len() as u64
    }

    pub fn output_count(&self) -> u64 {
        self.outputs.len() as u64
    }

    /// The resolved outputs created by the transaction with this sequence.
    /// Empty when the transaction has not been applied yet, which covers a
    /// corrupt input referencing a not-yet-seen transaction.
    pub fn outputs_of(&self, sequence: u64) -> &[ResolvedOutput] {
        let start = match self.out_start.get(sequence as usize) {
            Some(start) => *start as usize,
            None => return &[],
        };
        let end = self
            .out_start
            .get(sequence as usize + 1)
            .map(|v| *v as usize)
            .unwrap_or(self.outputs.len());
        &self.outputs[start..end]
    }

    pub fn resolve(&self, sequence: u64, output_index: u32) -> Option<ResolvedOutput> {
        self.outputs_of(sequence).get(output_index as usize).copied()
    }

    /// Applies one transaction. Must be called with consecutive sequence
    /// numbers, in chain order, after the enclosing block's transactions are
    /// all present in the directory.
    pub fn apply_transaction(
        &mut self,
        arena: &mut AddressArena,
        directory: &TxDirectory,
        tx: &RawTransaction<'_>,
        block_time: u32,
        sequence: u64,
        diag: &mut Diagnostics,
    ) -> Result<(), EngineError> {
        debug_assert_eq!(sequence, self.out_start.len() as u64);
        self.out_start.push(self.outputs.len() as u64);

        let mut is_coinbase = false;
        for output in &tx.outputs {
            let address = match output.recipient {
                Some(hash) => arena.intern(hash)?,
                None => 0,
            };
            self.outputs.push(ResolvedOutput {
                address,
                value: output.value,
            });
            if address != 0 {
                let entry = arena.get_mut(address);
                entry.total_received += output.value;
                entry.output_count += 1;
                if entry.first_output_time == 0 {
                    entry.first_output_time = block_time;
                }
                if block_time > entry.last_output_time {
                    entry.last_output_time = block_time;
                }
                if entry.last_counted_tx != sequence {
                    entry.last_counted_tx = sequence;
                    entry.transaction_count += 1;
                }
            }
        }

        for input in &tx.inputs {
            if input.is_coinbase() {
                is_coinbase = true;
                continue;
            }
            let funding = match directory.lookup(&input.prev_tx) {
                Some(location) => location,
                None => {
                    diag.unresolved_input();
                    continue;
                }
            };
            let resolved = match self.resolve(funding.sequence, input.prev_index) {
                Some(resolved) => resolved,
                None => {
                    diag.unresolved_input();
                    continue;
                }
            };
            self.resolved_input_count += 1;
            if resolved.address == 0 {
                continue; // funding output had no recognizable recipient
            }
            let entry = arena.get_mut(resolved.address);
            entry.total_sent += resolved.value;
            entry.input_count += 1;
            if block_time > entry.last_input_time {
                entry.last_input_time = block_time;
            }
            if entry.last_counted_tx != sequence {
                entry.last_counted_tx = sequence;
                entry.transaction_count += 1;
            }
        }

        if is_coinbase {
            self.coinbase_value += tx.outputs.iter().map(|o| o.value).sum::<u64>();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{RawInput, RawOutput, RecipientKind, COINBASE_INDEX};
    use crate::txindex::TxLocation;
    use blockscan_support::{Hash160, Hash256};

    fn hash160(n: u8) -> Hash160 {
        Hash160([n; 20])
    }

    fn txid(n: u8) -> Hash256 {
        Hash256([n; 32])
    }

    fn coinbase_tx(id: Hash256, value: u64, to: Hash160) -> RawTransaction<'static> {
        RawTransaction {
            version: 1,
            inputs: vec![RawInput {
                prev_tx: Hash256::ZERO,
                prev_index: COINBASE_INDEX,
                script: &[],
                sequence_no: 0,
            }],
            outputs: vec![RawOutput {
                value,
                script: &[],
                recipient: Some(to),
                kind: RecipientKind::PubKey,
            }],
            lock_time: 0,
            id,
            offset_in_block: 0,
            length: 0,
            flagged: false,
        }
    }

    fn spend_tx(
        id: Hash256,
        from: (Hash256, u32),
        outputs: Vec<(u64, Option<Hash160>)>,
    ) -> RawTransaction<'static> {
        RawTransaction {
            version: 1,
            inputs: vec![RawInput {
                prev_tx: from.0,
                prev_index: from.1,
                script: &[],
                sequence_no: 0,
            }],
            outputs: outputs
                .into_iter()
                .map(|(value, recipient)| RawOutput {
                    value,
                    script: &[],
                    recipient,
                    kind: RecipientKind::PubKeyHash,
                })
                .collect(),
            lock_time: 0,
            id,
            offset_in_block: 0,
            length: 0,
            flagged: false,
        }
    }

    fn register(directory: &mut TxDirectory, id: Hash256, sequence: u64) {
        directory.insert(TxLocation {
            id,
            file_index: 0,
            file_offset: 0,
            length: 100,
            sequence,
        });
    }

    #[test]
    fn coinbase_credits_without_debiting_anyone() {
        let mut ledger = Ledger::new();
        let mut arena = AddressArena::new();
        let mut directory = TxDirectory::new();
        let mut diag = Diagnostics::new();

        let tx = coinbase_tx(txid(1), 5_000_000_000, hash160(1));
        register(&mut directory, tx.id, 0);
        ledger
            .apply_transaction(&mut arena, &directory, &tx, 1_231_006_505, 0, &mut diag)
            .unwrap();

        let miner = arena.get(1);
        assert_eq!(miner.total_received, 5_000_000_000);
        assert_eq!(miner.total_sent, 0);
        assert_eq!(miner.transaction_count, 1);
        assert_eq!(miner.first_output_time, 1_231_006_505);
        assert_eq!(ledger.coinbase_value, 5_000_000_000);
        assert_eq!(diag.unresolved_inputs, 0);
    }

    #[test]
    fn spend_debits_the_funding_address() {
        let mut ledger = Ledger::new();
        let mut arena = AddressArena::new();
        let mut directory = TxDirectory::new();
        let mut diag = Diagnostics::new();

        let fund = coinbase_tx(txid(1), 100, hash160(1));
        register(&mut directory, fund.id, 0);
        ledger
            .apply_transaction(&mut arena, &directory, &fund, 1000, 0, &mut diag)
            .unwrap();

        let spend = spend_tx(txid(2), (txid(1), 0), vec![(60, Some(hash160(2))), (40, Some(hash160(1)))]);
        register(&mut directory, spend.id, 1);
        ledger
            .apply_transaction(&mut arena, &directory, &spend, 2000, 1, &mut diag)
            .unwrap();

        let a = arena.get(1);
        assert_eq!(a.total_received, 140); // coinbase plus change
        assert_eq!(a.total_sent, 100);
        assert_eq!(a.balance(), 40);
        assert_eq!(a.last_input_time, 2000);
        // Address 1 was both source and destination of the spend; it counts
        // the transaction once.
        assert_eq!(a.transaction_count, 2);

        let b = arena.get(2);
        assert_eq!(b.total_received, 60);
        assert_eq!(b.total_sent, 0);
        assert_eq!(b.transaction_count, 1);
    }

    #[test]
    fn unresolved_input_is_counted_and_skipped() {
        let mut ledger = Ledger::new();
        let mut arena = AddressArena::new();
        let mut directory = TxDirectory::new();
        let mut diag = Diagnostics::new();

        let spend = spend_tx(txid(9), (txid(8), 0), vec![(10, Some(hash160(3)))]);
        register(&mut directory, spend.id, 0);
        ledger
            .apply_transaction(&mut arena, &directory, &spend, 3000, 0, &mut diag)
            .unwrap();

        assert_eq!(diag.unresolved_inputs, 1);
        // The output side still lands.
        assert_eq!(arena.get(1).total_received, 10);
    }

    #[test]
    fn out_of_range_prev_index_is_unresolved() {
        let mut ledger = Ledger::new();
        let mut arena = AddressArena::new();
        let mut directory = TxDirectory::new();
        let mut diag = Diagnostics::new();

        let fund = coinbase_tx(txid(1), 100, hash160(1));
        register(&mut directory, fund.id, 0);
        ledger
            .apply_transaction(&mut arena, &directory, &fund, 1000, 0, &mut diag)
            .unwrap();

        let spend = spend_tx(txid(2), (txid(1), 5), vec![(10, Some(hash160(2)))]);
        register(&mut directory, spend.id, 1);
        ledger
            .apply_transaction(&mut arena, &directory, &spend, 2000, 1, &mut diag)
            .unwrap();

        assert_eq!(diag.unresolved_inputs, 1);
        assert_eq!(arena.get(1).total_sent, 0);
    }

    #[test]
    fn received_never_drops_below_sent() {
        let mut ledger = Ledger::new();
        let mut arena = AddressArena::new();
        let mut directory = TxDirectory::new();
        let mut diag = Diagnostics::new();

        let fund = coinbase_tx(txid(1), 50, hash160(1));
        register(&mut directory, fund.id, 0);
        ledger
            .apply_transaction(&mut arena, &directory, &fund, 1000, 0, &mut diag)
            .unwrap();
        let spend = spend_tx(txid(2), (txid(1), 0), vec![(50, Some(hash160(2)))]);
        register(&mut directory, spend.id, 1);
        ledger
            .apply_transaction(&mut arena, &directory, &spend, 2000, 1, &mut diag)
            .unwrap();

        for (_, entry) in arena.iter() {
            assert!(entry.total_received >= entry.total_sent);
            assert!(entry.transaction_count <= entry.input_count + entry.output_count);
        }
    }

    #[test]
    fn conservation_against_coinbase_total() {
        let mut ledger = Ledger::new();
        let mut arena = AddressArena::new();
        let mut directory = TxDirectory::new();
        let mut diag = Diagnostics::new();

        for n in 0..3u8 {
            let tx = coinbase_tx(txid(n + 1), 5_000_000_000, hash160(n + 1));
            register(&mut directory, tx.id, n as u64);
            ledger
                .apply_transaction(&mut arena, &directory, &tx, 1000 + n as u32, n as u64, &mut diag)
                .unwrap();
        }
        let spend = spend_tx(txid(10), (txid(1), 0), vec![(5_000_000_000, Some(hash160(9)))]);
        register(&mut directory, spend.id, 3);
        ledger
            .apply_transaction(&mut arena, &directory, &spend, 2000, 3, &mut diag)
            .unwrap();

        let circulating: u64 = arena
            .iter()
            .map(|(_, e)| e.total_received - e.total_sent)
            .sum();
        assert_eq!(circulating, ledger.coinbase_value);
    }
}
