//! Report serializers: the `stats.csv` summary workbook and the
//! `BlockChainAddresses.bin` address-history file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, Utc};
use log::info;
use thiserror::Error;

use blockscan_support::address::hash160_to_ascii;
use blockscan_support::Hash160;

use crate::arena::{AddressArena, AddressId};
use crate::stats::{AgeBucket, BalanceClass, SnapshotAddress, StatRow, ONE_BTC};

/// NUL-terminated magic at the front of the address-history file.
pub const HISTORY_HEADER: &[u8; 22] = b"BLOCK_CHAIN_ADDRESSES\0";
pub const HISTORY_VERSION: u32 = 1;

/// Scatter sections stop after this many addresses.
const MAX_PLOT_ROWS: usize = 150_000;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an address-history file (bad header)")]
    BadHeader,
    #[error("unsupported address-history version {0}")]
    BadVersion(u32),
}

fn day_label(time: u32) -> String {
    let date = DateTime::<Utc>::from_timestamp(time as i64, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default();
    format!("{} {} {}", date.format("%B"), date.day(), date.year())
}

fn month_label(time: u32) -> String {
    let date = DateTime::<Utc>::from_timestamp(time as i64, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default();
    format!("{} {}", date.format("%B"), date.year())
}

pub fn time_label(time: u32) -> String {
    if time == 0 {
        return "NEVER".to_string();
    }
    match DateTime::<Utc>::from_timestamp(time as i64, 0) {
        Some(dt) => dt.format("%m/%d/%Y %H:%M:%S").to_string(),
        None => "NEVER".to_string(),
    }
}

/// Writes every section of `stats.csv`: the per-boundary summary, the
/// per-class count and value matrices (raw and normalized), the value-by-age
/// distribution, and the two scatter sections.
pub fn write_stats_csv(
    path: &Path,
    rows: &[StatRow],
    arena: &AddressArena,
    now: u32,
) -> Result<(), csv::Error> {
    let mut w = csv::WriterBuilder::new().flexible(true).from_path(path)?;

    write_summary_section(&mut w, rows)?;
    write_class_matrix(&mut w, rows, false)?;
    write_class_matrix(&mut w, rows, true)?;
    write_normalized_matrix(&mut w, rows, false)?;
    write_normalized_matrix(&mut w, rows, true)?;
    write_age_section(&mut w, arena, now)?;
    write_scatter_sections(&mut w, arena, now)?;

    w.flush()?;
    info!("wrote {} statistic rows to {:?}", rows.len(), path);
    Ok(())
}

fn blank_line<W: Write>(w: &mut csv::Writer<W>) -> Result<(), csv::Error> {
    w.write_record([""])
}

fn write_summary_section<W: Write>(
    w: &mut csv::Writer<W>,
    rows: &[StatRow],
) -> Result<(), csv::Error> {
    w.write_record([
        "Date",
        "ZombieValue",
        "ZombieCount",
        "TotalBTC",
        "TotalActiveBTC",
        "AddressesUsed",
        "AddressesWithBalance",
        "ZeroBalanceCount",
        "DustCount",
        "DustValue",
        "OneBtcCount",
        "OneBtcValue",
        "OneKBtcCount",
        "OneKBtcValue",
        "NewCount",
        "DeletedCount",
        "ChangedCount",
        "SameCount",
        "RoseFromDeadCount",
        "RoseFromDeadAmount",
    ])?;

    for row in rows {
        let zero = row.classes[BalanceClass::Zero.index()];
        let dust = row.classes[BalanceClass::OneMbtc.index()];

        let mut one_btc = (0u64, 0u64); // count, value: balances above one bitcoin
        let mut one_k = (0u64, 0u64);
        for class in BalanceClass::ALL {
            if class.index() >= BalanceClass::FiveBtc.index() {
                one_btc.0 += row.classes[class.index()].count as u64;
                one_btc.1 += row.classes[class.index()].value;
            }
            if class.index() >= BalanceClass::FiveKBtc.index() {
                one_k.0 += row.classes[class.index()].count as u64;
                one_k.1 += row.classes[class.index()].value;
            }
        }

        w.write_record([
            day_label(row.time),
            (row.zombie_value / ONE_BTC).to_string(),
            row.zombie_count.to_string(),
            (row.total_value / ONE_BTC).to_string(),
            ((row.total_value - row.zombie_value) / ONE_BTC).to_string(),
            row.address_count.to_string(),
            (row.address_count - zero.count).to_string(),
            zero.count.to_string(),
            dust.count.to_string(),
            (dust.value / ONE_BTC).to_string(),
            one_btc.0.to_string(),
            (one_btc.1 / ONE_BTC).to_string(),
            one_k.0.to_string(),
            (one_k.1 / ONE_BTC).to_string(),
            row.new_addresses.len().to_string(),
            row.deleted_addresses.len().to_string(),
            row.changed_addresses.len().to_string(),
            row.same_count.to_string(),
            row.rose_from_dead_count.to_string(),
            row.rose_from_dead_value.to_string(),
        ])?;
    }
    blank_line(w)
}

fn write_class_matrix<W: Write>(
    w: &mut csv::Writer<W>,
    rows: &[StatRow],
    by_value: bool,
) -> Result<(), csv::Error> {
    let title = if by_value {
        "Address distribution: total value by balance class"
    } else {
        "Address distribution: count by balance class"
    };
    w.write_record([title])?;
    let mut header = vec![String::new()];
    header.extend(BalanceClass::ALL.iter().map(|c| c.label().to_string()));
    w.write_record(&header)?;
    for row in rows {
        let mut record = vec![day_label(row.time)];
        for class in BalanceClass::ALL {
            let slot = row.classes[class.index()];
            if by_value {
                record.push(format!("{:.4}", slot.value as f64 / ONE_BTC as f64));
            } else {
                record.push(slot.count.to_string());
            }
        }
        w.write_record(&record)?;
    }
    blank_line(w)
}

fn write_normalized_matrix<W: Write>(
    w: &mut csv::Writer<W>,
    rows: &[StatRow],
    by_value: bool,
) -> Result<(), csv::Error> {
    let title = if by_value {
        "Normalized: percentage of total value by balance class"
    } else {
        "Normalized: percentage of funded addresses by balance class"
    };
    w.write_record([title])?;
    let classes = &BalanceClass::ALL[1..]; // the zero class normalizes out
    let mut header = vec![String::new()];
    header.extend(classes.iter().map(|c| c.label().to_string()));
    w.write_record(&header)?;
    for row in rows {
        let funded = row.address_count - row.classes[BalanceClass::Zero.index()].count;
        let mut record = vec![month_label(row.time)];
        for class in classes {
            let slot = row.classes[class.index()];
            let value = if by_value {
                if row.total_value == 0 {
                    0.0
                } else {
                    slot.value as f64 * 100.0 / row.total_value as f64
                }
            } else if funded == 0 {
                0.0
            } else {
                slot.count as f64 * 100.0 / funded as f64
            };
            record.push(format!("{:.4}", value));
        }
        w.write_record(&record)?;
    }
    blank_line(w)
}

fn write_age_section<W: Write>(
    w: &mut csv::Writer<W>,
    arena: &AddressArena,
    now: u32,
) -> Result<(), csv::Error> {
    let mut value = [0u64; AgeBucket::COUNT];
    let mut count = [0u32; AgeBucket::COUNT];
    for (_, entry) in arena.iter() {
        let balance = entry.balance();
        let bucket = AgeBucket::classify(entry.days_since_last_used(now)) as usize;
        value[bucket] += balance;
        if balance >= ONE_BTC {
            count[bucket] += 1;
        }
    }
    w.write_record(["Bitcoin value distribution by age of last use"])?;
    w.write_record(["Age", "Value", "Count"])?;
    for bucket in AgeBucket::ALL {
        w.write_record([
            bucket.label().to_string(),
            (value[bucket as usize] / ONE_BTC).to_string(),
            count[bucket as usize].to_string(),
        ])?;
    }
    blank_line(w)
}

fn write_scatter_sections<W: Write>(
    w: &mut csv::Writer<W>,
    arena: &AddressArena,
    now: u32,
) -> Result<(), csv::Error> {
    let mut picked: Vec<(AddressId, u64)> = arena
        .iter()
        .filter(|(_, e)| e.balance() >= ONE_BTC)
        .map(|(id, e)| (id, e.balance()))
        .collect();

    picked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    write_scatter(w, arena, now, &picked, "sorted by balance")?;

    picked.sort_by_key(|(id, _)| {
        let days = arena.get(*id).days_since_last_used(now);
        (std::cmp::Reverse(days), *id)
    });
    write_scatter(w, arena, now, &picked, "sorted by age")
}

fn write_scatter<W: Write>(
    w: &mut csv::Writer<W>,
    arena: &AddressArena,
    now: u32,
    picked: &[(AddressId, u64)],
    order: &str,
) -> Result<(), csv::Error> {
    w.write_record([format!(
        "Addresses holding one bitcoin or more, {} ({} of {})",
        order,
        picked.len().min(MAX_PLOT_ROWS),
        picked.len()
    )])?;
    w.write_record([
        "Days",
        "Value",
        "FirstUsed",
        "LastReceived",
        "LastSpent",
        "TotalSent",
        "TotalReceived",
        "TransactionCount",
        "PublicKeyAddress",
    ])?;
    for (id, balance) in picked.iter().take(MAX_PLOT_ROWS) {
        let entry = arena.get(*id);
        w.write_record([
            entry.days_since_last_used(now).to_string(),
            (balance / ONE_BTC).to_string(),
            time_label(entry.first_output_time),
            time_label(entry.last_output_time),
            time_label(entry.last_input_time),
            format!("{:.2}", entry.total_sent as f64 / ONE_BTC as f64),
            format!("{:.2}", entry.total_received as f64 / ONE_BTC as f64),
            entry.transaction_count.to_string(),
            hash160_to_ascii(&entry.hash),
        ])?;
    }
    blank_line(w)
}

/// One row of the address-history file after reading it back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryRow {
    pub start_time: u32,
    pub new: Vec<HistoryEntry>,
    pub changed: Vec<HistoryEntry>,
    pub deleted: Vec<u32>,
}

/// A snapshot entry with its address remapped to the file's compact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub address: u32,
    pub total_sent_mbtc: u32,
    pub total_received_mbtc: u32,
    pub first_time: u32,
    pub last_time: u32,
    pub transaction_count: u8,
    pub input_count: u8,
    pub output_count: u8,
}

#[derive(Debug, Default)]
pub struct AddressHistory {
    pub addresses: Vec<Hash160>,
    pub rows: Vec<HistoryRow>,
}

/// Writes the binary address-history file.
///
/// Addresses are remapped to a compact table ordered by first appearance in
/// any row, so readers never need the arena. The first row stores its full
/// address set in the "new" block; later rows store deltas only.
pub fn write_address_history(
    path: &Path,
    rows: &[StatRow],
    arena: &AddressArena,
) -> Result<(), HistoryError> {
    // AddressId -> compact id (1-based), in order of first appearance.
    fn first_seen(compact: &mut [u32], table: &mut Vec<AddressId>, id: AddressId) {
        if compact[id as usize] == 0 {
            table.push(id);
            compact[id as usize] = table.len() as u32;
        }
    }
    let mut compact: Vec<u32> = vec![0; arena.len() as usize + 1];
    let mut table: Vec<AddressId> = Vec::new();
    for row in rows {
        for sa in row.new_addresses.iter().chain(row.changed_addresses.iter()) {
            first_seen(&mut compact, &mut table, sa.address);
        }
        for id in &row.deleted_addresses {
            first_seen(&mut compact, &mut table, *id);
        }
    }

    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(HISTORY_HEADER)?;
    w.write_u32::<LittleEndian>(HISTORY_VERSION)?;
    w.write_u32::<LittleEndian>(table.len() as u32)?;
    for id in &table {
        w.write_all(&arena.get(*id).hash.0)?;
    }
    w.write_u32::<LittleEndian>(rows.len() as u32)?;
    for row in rows {
        w.write_u32::<LittleEndian>(row.time)?;
        w.write_u32::<LittleEndian>(row.new_addresses.len() as u32)?;
        w.write_u32::<LittleEndian>(row.changed_addresses.len() as u32)?;
        w.write_u32::<LittleEndian>(row.deleted_addresses.len() as u32)?;
    }
    for row in rows {
        for sa in &row.new_addresses {
            write_history_entry(&mut w, sa, &compact)?;
        }
        for sa in &row.changed_addresses {
            write_history_entry(&mut w, sa, &compact)?;
        }
        for id in &row.deleted_addresses {
            w.write_u32::<LittleEndian>(compact[*id as usize])?;
        }
    }
    w.flush()?;
    info!(
        "wrote {} addresses and {} rows to {:?}",
        table.len(),
        rows.len(),
        path
    );
    Ok(())
}

fn write_history_entry<W: Write>(
    w: &mut W,
    sa: &SnapshotAddress,
    compact: &[u32],
) -> Result<(), HistoryError> {
    w.write_u32::<LittleEndian>(compact[sa.address as usize])?;
    w.write_u32::<LittleEndian>(sa.total_sent_mbtc)?;
    w.write_u32::<LittleEndian>(sa.total_received_mbtc)?;
    w.write_u32::<LittleEndian>(sa.first_time)?;
    w.write_u32::<LittleEndian>(sa.last_time)?;
    w.write_u8(sa.transaction_count)?;
    w.write_u8(sa.input_count)?;
    w.write_u8(sa.output_count)?;
    Ok(())
}

/// Reads an address-history file back, validating the header and version.
pub fn read_address_history(path: &Path) -> Result<AddressHistory, HistoryError> {
    let mut r = BufReader::new(File::open(path)?);

    let mut header = [0u8; 22];
    r.read_exact(&mut header)?;
    if &header != HISTORY_HEADER {
        return Err(HistoryError::BadHeader);
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != HISTORY_VERSION {
        return Err(HistoryError::BadVersion(version));
    }

    let address_count = r.read_u32::<LittleEndian>()?;
    let mut addresses = Vec::with_capacity(address_count as usize);
    for _ in 0..address_count {
        let mut hash = [0u8; 20];
        r.read_exact(&mut hash)?;
        addresses.push(Hash160(hash));
    }

    let row_count = r.read_u32::<LittleEndian>()?;
    let mut rows = Vec::with_capacity(row_count as usize);
    let mut counts = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let start_time = r.read_u32::<LittleEndian>()?;
        let new = r.read_u32::<LittleEndian>()?;
        let changed = r.read_u32::<LittleEndian>()?;
        let deleted = r.read_u32::<LittleEndian>()?;
        counts.push((new, changed, deleted));
        rows.push(HistoryRow {
            start_time,
            ..HistoryRow::default()
        });
    }
    for (row, (new, changed, deleted)) in rows.iter_mut().zip(counts) {
        for _ in 0..new {
            row.new.push(read_history_entry(&mut r)?);
        }
        for _ in 0..changed {
            row.changed.push(read_history_entry(&mut r)?);
        }
        for _ in 0..deleted {
            row.deleted.push(r.read_u32::<LittleEndian>()?);
        }
    }
    Ok(AddressHistory { addresses, rows })
}

fn read_history_entry<R: Read>(r: &mut R) -> Result<HistoryEntry, HistoryError> {
    Ok(HistoryEntry {
        address: r.read_u32::<LittleEndian>()?,
        total_sent_mbtc: r.read_u32::<LittleEndian>()?,
        total_received_mbtc: r.read_u32::<LittleEndian>()?,
        first_time: r.read_u32::<LittleEndian>()?,
        last_time: r.read_u32::<LittleEndian>()?,
        transaction_count: r.read_u8()?,
        input_count: r.read_u8()?,
        output_count: r.read_u8()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{SnapshotEngine, SnapshotPeriod, ONE_BTC};
    use blockscan_support::Hash160;

    fn populated_arena() -> AddressArena {
        let mut arena = AddressArena::new();
        for n in 1..=3u8 {
            let id = arena.intern(Hash160([n; 20])).unwrap();
            let entry = arena.get_mut(id);
            entry.total_received = n as u64 * ONE_BTC;
            entry.first_output_time = 1_300_000_000;
            entry.last_output_time = 1_300_000_000;
            entry.output_count = 1;
            entry.transaction_count = 1;
        }
        arena
    }

    fn snapshot_rows(arena: &AddressArena) -> Vec<StatRow> {
        let mut engine = SnapshotEngine::new(SnapshotPeriod::Day, 365, true);
        engine.observe_block(1_300_000_000, arena);
        engine.finalize(arena);
        engine.rows().to_vec()
    }

    #[test]
    fn history_file_round_trips() {
        let arena = populated_arena();
        let rows = snapshot_rows(&arena);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BlockChainAddresses.bin");

        write_address_history(&path, &rows, &arena).unwrap();
        let history = read_address_history(&path).unwrap();

        assert_eq!(history.addresses.len(), 3);
        assert_eq!(history.rows.len(), 1);
        let row = &history.rows[0];
        assert_eq!(row.start_time, rows[0].time);
        assert_eq!(row.new.len(), 3);
        assert!(row.changed.is_empty());
        assert!(row.deleted.is_empty());
        // Entries arrive sorted by balance descending; the compact table is
        // in the same first-appearance order.
        assert_eq!(row.new[0].total_received_mbtc, 3_000);
        assert_eq!(history.addresses[0], Hash160([3; 20]));
        assert_eq!(row.new[0].address, 1);
    }

    #[test]
    fn reader_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"definitely not an address history file").unwrap();
        assert!(matches!(
            read_address_history(&path),
            Err(HistoryError::BadHeader)
        ));
    }

    #[test]
    fn reader_rejects_future_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(HISTORY_HEADER);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_address_history(&path),
            Err(HistoryError::BadVersion(7))
        ));
    }

    #[test]
    fn stats_csv_is_written_with_all_sections() {
        let arena = populated_arena();
        let rows = snapshot_rows(&arena);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");

        write_stats_csv(&path, &rows, &arena, 1_300_000_000 + 86_400).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Date,ZombieValue,ZombieCount,TotalBTC"));
        assert!(text.contains("ZERO"));
        assert!(text.contains(">100KBTC"));
        assert!(text.contains("Age,Value,Count"));
        assert!(text.contains("PublicKeyAddress"));
        // Three addresses hold one bitcoin or more.
        assert!(text.contains("one bitcoin or more, sorted by balance (3 of 3)"));
    }
}
