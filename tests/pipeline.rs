//! End-to-end pipeline test over a synthetic pair of container files: a
//! three-block chain with one stale fork and a stretch of zero padding, run
//! through scan, chain selection, ledger aggregation, snapshots, and both
//! report writers.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use blockscan::indexer::{Indexer, IndexerConfig};
use blockscan::report::read_address_history;
use blockscan::stats::{SnapshotPeriod, ONE_BTC};
use blockscan_support::{sha256d, Hash160, Hash256};

const MAGIC: u32 = 0xD9B4_BEF9;
const COINBASE_INDEX: u32 = 0xFFFF_FFFF;
const DAY: u32 = 86_400;
const T0: u32 = 1_231_006_505;

fn push_varint(out: &mut Vec<u8>, value: u64) {
    assert!(value < 0xFD, "test data stays in the single-byte form");
    out.push(value as u8);
}

fn p2pkh_script(hash: &Hash160) -> Vec<u8> {
    let mut script = vec![0x76, 0xA9, 0x14];
    script.extend_from_slice(&hash.0);
    script.extend_from_slice(&[0x88, 0xAC]);
    script
}

fn build_tx(inputs: &[(Hash256, u32, Vec<u8>)], outputs: &[(u64, Hash160)]) -> Vec<u8> {
    let mut tx = Vec::new();
    tx.extend_from_slice(&1u32.to_le_bytes());
    push_varint(&mut tx, inputs.len() as u64);
    for (prev, index, script) in inputs {
        tx.extend_from_slice(&prev.0);
        tx.extend_from_slice(&index.to_le_bytes());
        push_varint(&mut tx, script.len() as u64);
        tx.extend_from_slice(script);
        tx.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    }
    push_varint(&mut tx, outputs.len() as u64);
    for (value, recipient) in outputs {
        tx.extend_from_slice(&value.to_le_bytes());
        let script = p2pkh_script(recipient);
        push_varint(&mut tx, script.len() as u64);
        tx.extend_from_slice(&script);
    }
    tx.extend_from_slice(&0u32.to_le_bytes());
    tx
}

fn coinbase(tag: u8, value: u64, to: Hash160) -> Vec<u8> {
    build_tx(
        &[(Hash256::ZERO, COINBASE_INDEX, vec![0x01, tag])],
        &[(value, to)],
    )
}

fn build_block(previous_id: Hash256, timestamp: u32, txs: &[Vec<u8>]) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(&1u32.to_le_bytes());
    block.extend_from_slice(&previous_id.0);
    block.extend_from_slice(&[0u8; 32]); // merkle root, unchecked here
    block.extend_from_slice(&timestamp.to_le_bytes());
    block.extend_from_slice(&0x1d00_ffffu32.to_le_bytes());
    block.extend_from_slice(&timestamp.to_le_bytes()); // nonce
    push_varint(&mut block, txs.len() as u64);
    for tx in txs {
        block.extend_from_slice(tx);
    }
    block
}

fn block_id(block: &[u8]) -> Hash256 {
    sha256d(&block[..80])
}

fn tx_id(tx: &[u8]) -> Hash256 {
    sha256d(tx)
}

fn append_record(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

fn addr(n: u8) -> Hash160 {
    Hash160([n; 20])
}

struct Fixture {
    dir: tempfile::TempDir,
}

/// Lays the chain out on disk:
///   blk00000.dat: genesis, 97 bytes of zero padding, block one, stale fork
///   blk00001.dat: block two
/// with block one spending the genesis coinbase to a new address plus change.
fn build_fixture() -> Fixture {
    let a = addr(0xA1);
    let b = addr(0xB2);
    let c = addr(0xC3);
    let d = addr(0xD4);

    let genesis_cb = coinbase(0, 50 * ONE_BTC, a);
    let genesis = build_block(Hash256::ZERO, T0, &[genesis_cb.clone()]);

    let spend = build_tx(
        &[(tx_id(&genesis_cb), 0, vec![0x51])],
        &[(20 * ONE_BTC, c), (30 * ONE_BTC, a)],
    );
    let block_one = build_block(block_id(&genesis), T0 + DAY, &[coinbase(1, 50 * ONE_BTC, b), spend]);

    // A stale sibling of block one, stored after it but never extended.
    let fork = build_block(block_id(&genesis), T0 + DAY + 30, &[coinbase(9, 50 * ONE_BTC, d)]);

    let block_two = build_block(
        block_id(&block_one),
        T0 + 2 * DAY,
        &[coinbase(2, 50 * ONE_BTC, b)],
    );

    let mut first = Vec::new();
    append_record(&mut first, &genesis);
    first.extend_from_slice(&[0u8; 97]);
    append_record(&mut first, &block_one);
    append_record(&mut first, &fork);
    let mut second = Vec::new();
    append_record(&mut second, &block_two);

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "blk00000.dat", &first);
    write(dir.path(), "blk00001.dat", &second);
    Fixture { dir }
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    File::create(dir.join(name)).unwrap().write_all(bytes).unwrap();
}

fn run_indexer(fixture: &Fixture, record_addresses: bool) -> Indexer {
    let mut indexer = Indexer::new(IndexerConfig {
        blocks_dir: fixture.dir.path().to_path_buf(),
        output_dir: fixture.dir.path().to_path_buf(),
        max_blocks: None,
        period: SnapshotPeriod::Day,
        zombie_days: 365,
        record_addresses,
    })
    .unwrap();
    indexer.scan().unwrap();
    indexer.build_chain();
    indexer.process().unwrap();
    indexer
}

#[test]
fn reconstructs_the_chain_and_drops_the_fork() {
    let fixture = build_fixture();
    let indexer = run_indexer(&fixture, false);

    assert_eq!(indexer.header_count(), 4);
    assert_eq!(indexer.chain_len(), 3);
    assert_eq!(indexer.diag.gap_recoveries, 1);
    // The fork's coinbase address never enters the arena.
    assert_eq!(indexer.arena().lookup(&addr(0xD4)), None);
}

#[test]
fn ledger_totals_follow_the_spend() {
    let fixture = build_fixture();
    let indexer = run_indexer(&fixture, false);
    let arena = indexer.arena();

    let a = arena.lookup(&addr(0xA1)).unwrap();
    let b = arena.lookup(&addr(0xB2)).unwrap();
    let c = arena.lookup(&addr(0xC3)).unwrap();

    assert_eq!(arena.get(a).total_received, 80 * ONE_BTC);
    assert_eq!(arena.get(a).total_sent, 50 * ONE_BTC);
    assert_eq!(arena.get(a).balance(), 30 * ONE_BTC);
    assert_eq!(arena.get(b).balance(), 100 * ONE_BTC);
    assert_eq!(arena.get(c).balance(), 20 * ONE_BTC);

    assert_eq!(indexer.ledger().coinbase_value, 150 * ONE_BTC);
    let circulating: u64 = arena.iter().map(|(_, e)| e.balance()).sum();
    assert_eq!(circulating, indexer.ledger().coinbase_value);

    for (_, entry) in arena.iter() {
        assert!(entry.total_received >= entry.total_sent);
        assert!(entry.transaction_count <= entry.input_count + entry.output_count);
    }

    assert_eq!(indexer.diag.unresolved_inputs, 0);
    assert_eq!(indexer.ledger().transaction_count(), 4);
}

#[test]
fn daily_snapshots_cover_each_block() {
    let fixture = build_fixture();
    let indexer = run_indexer(&fixture, true);

    let rows = indexer.snapshots().rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].time, T0);
    assert_eq!(rows[0].address_count, 1);
    assert_eq!(rows[0].total_value, 50 * ONE_BTC);
    // After block one: A holds 30, B 50, C 20.
    assert_eq!(rows[1].total_value, 100 * ONE_BTC);
    assert_eq!(rows[2].total_value, 150 * ONE_BTC);
    assert_eq!(rows[1].new_addresses.len(), 2);
    assert_eq!(rows[1].changed_addresses.len(), 1); // A shrank
}

#[test]
fn reports_round_trip() {
    let fixture = build_fixture();
    let indexer = run_indexer(&fixture, true);
    indexer.write_reports().unwrap();

    let csv = std::fs::read_to_string(fixture.dir.path().join("stats.csv")).unwrap();
    assert!(csv.starts_with("Date,ZombieValue"));
    assert!(csv.lines().count() > 10);

    let history = read_address_history(&fixture.dir.path().join("BlockChainAddresses.bin")).unwrap();
    assert_eq!(history.rows.len(), 3);
    // A, B, and C all held one bitcoin or more at some boundary.
    assert_eq!(history.addresses.len(), 3);
    assert_eq!(history.rows[0].new.len(), 1);
    assert_eq!(history.rows[1].new.len(), 2);
    assert_eq!(history.rows[1].changed.len(), 1);
}

#[test]
fn block_printer_resolves_sources() {
    let fixture = build_fixture();
    let mut indexer = run_indexer(&fixture, false);
    indexer.print_block(1).unwrap();
    assert!(indexer.print_block(10).is_err());
}
