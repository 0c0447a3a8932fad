//! Time-bucketed statistics.
//!
//! At every day/month/year boundary crossed by the block walk the engine
//! snapshots the address population: totals, a fixed set of balance classes,
//! zombie figures, and optionally a compressed per-address table used to
//! classify every address as new, changed, deleted, or unchanged relative to
//! the previous snapshot.

use chrono::{DateTime, Datelike, Utc};

use crate::arena::{AddressArena, AddressId};

pub const ONE_BTC: u64 = 100_000_000;
pub const ONE_MBTC: u64 = ONE_BTC / 1000;

/// Addresses below one whole bitcoin are left out of per-address snapshots.
pub const SNAPSHOT_MIN_BALANCE: u64 = ONE_BTC;

/// Balance size classes, quasi-logarithmic from empty to the largest wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceClass {
    Zero,
    OneMbtc,
    FiveMbtc,
    TenMbtc,
    FiftyMbtc,
    HundredMbtc,
    FiveHundredMbtc,
    OneBtc,
    FiveBtc,
    TenBtc,
    FiftyBtc,
    HundredBtc,
    FiveHundredBtc,
    OneKBtc,
    FiveKBtc,
    TenKBtc,
    FiftyKBtc,
    HundredKBtc,
    Max,
}

impl BalanceClass {
    pub const COUNT: usize = 19;

    pub const ALL: [BalanceClass; BalanceClass::COUNT] = [
        BalanceClass::Zero,
        BalanceClass::OneMbtc,
        BalanceClass::FiveMbtc,
        BalanceClass::TenMbtc,
        BalanceClass::FiftyMbtc,
        BalanceClass::HundredMbtc,
        BalanceClass::FiveHundredMbtc,
        BalanceClass::OneBtc,
        BalanceClass::FiveBtc,
        BalanceClass::TenBtc,
        BalanceClass::FiftyBtc,
        BalanceClass::HundredBtc,
        BalanceClass::FiveHundredBtc,
        BalanceClass::OneKBtc,
        BalanceClass::FiveKBtc,
        BalanceClass::TenKBtc,
        BalanceClass::FiftyKBtc,
        BalanceClass::HundredKBtc,
        BalanceClass::Max,
    ];

    /// Upper bound of the class, inclusive.
    pub fn limit(self) -> u64 {
        match self {
            BalanceClass::Zero => 0,
            BalanceClass::OneMbtc => ONE_MBTC,
            BalanceClass::FiveMbtc => 5 * ONE_MBTC,
            BalanceClass::TenMbtc => 10 * ONE_MBTC,
            BalanceClass::FiftyMbtc => 50 * ONE_MBTC,
            BalanceClass::HundredMbtc => 100 * ONE_MBTC,
            BalanceClass::FiveHundredMbtc => 500 * ONE_MBTC,
            BalanceClass::OneBtc => ONE_BTC,
            BalanceClass::FiveBtc => 5 * ONE_BTC,
            BalanceClass::TenBtc => 10 * ONE_BTC,
            BalanceClass::FiftyBtc => 50 * ONE_BTC,
            BalanceClass::HundredBtc => 100 * ONE_BTC,
            BalanceClass::FiveHundredBtc => 500 * ONE_BTC,
            BalanceClass::OneKBtc => 1_000 * ONE_BTC,
            BalanceClass::FiveKBtc => 5_000 * ONE_BTC,
            BalanceClass::TenKBtc => 10_000 * ONE_BTC,
            BalanceClass::FiftyKBtc => 50_000 * ONE_BTC,
            BalanceClass::HundredKBtc => 100_000 * ONE_BTC,
            BalanceClass::Max => 21_000_000 * ONE_BTC,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BalanceClass::Zero => "ZERO",
            BalanceClass::OneMbtc => "<1MBTC",
            BalanceClass::FiveMbtc => "<5MBTC",
            BalanceClass::TenMbtc => "<10MBTC",
            BalanceClass::FiftyMbtc => "<50MBTC",
            BalanceClass::HundredMbtc => "<100MBTC",
            BalanceClass::FiveHundredMbtc => "<500MBTC",
            BalanceClass::OneBtc => "<1BTC",
            BalanceClass::FiveBtc => "<5BTC",
            BalanceClass::TenBtc => "<10BTC",
            BalanceClass::FiftyBtc => "<50BTC",
            BalanceClass::HundredBtc => "<100BTC",
            BalanceClass::FiveHundredBtc => "<500BTC",
            BalanceClass::OneKBtc => "<1KBTC",
            BalanceClass::FiveKBtc => "<5KBTC",
            BalanceClass::TenKBtc => "<10KBTC",
            BalanceClass::FiftyKBtc => "<50KBTC",
            BalanceClass::HundredKBtc => "<100KBTC",
            BalanceClass::Max => ">100KBTC",
        }
    }

    pub fn classify(balance: u64) -> BalanceClass {
        for class in BalanceClass::ALL {
            if balance <= class.limit() {
                return class;
            }
        }
        BalanceClass::Max
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Last-use age buckets for the value-by-age report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBucket {
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    ThreeYears,
    FourYears,
    Older,
}

impl AgeBucket {
    pub const COUNT: usize = 10;

    pub const ALL: [AgeBucket; AgeBucket::COUNT] = [
        AgeBucket::OneDay,
        AgeBucket::OneWeek,
        AgeBucket::OneMonth,
        AgeBucket::ThreeMonths,
        AgeBucket::SixMonths,
        AgeBucket::OneYear,
        AgeBucket::TwoYears,
        AgeBucket::ThreeYears,
        AgeBucket::FourYears,
        AgeBucket::Older,
    ];

    pub fn classify(days: u32) -> AgeBucket {
        match days {
            0..=1 => AgeBucket::OneDay,
            2..=7 => AgeBucket::OneWeek,
            8..=30 => AgeBucket::OneMonth,
            31..=90 => AgeBucket::ThreeMonths,
            91..=180 => AgeBucket::SixMonths,
            181..=365 => AgeBucket::OneYear,
            366..=730 => AgeBucket::TwoYears,
            731..=1095 => AgeBucket::ThreeYears,
            1096..=1460 => AgeBucket::FourYears,
            _ => AgeBucket::Older,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeBucket::OneDay => "One Day",
            AgeBucket::OneWeek => "One Week",
            AgeBucket::OneMonth => "One Month",
            AgeBucket::ThreeMonths => "1-3 Months",
            AgeBucket::SixMonths => "3-6 Months",
            AgeBucket::OneYear => "6-12 Months",
            AgeBucket::TwoYears => "1-2 Years",
            AgeBucket::ThreeYears => "2-3 Years",
            AgeBucket::FourYears => "3-4 Years",
            AgeBucket::Older => "Over 4 Years",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatValue {
    pub count: u32,
    pub value: u64,
}

/// Compressed per-address record stored in snapshots. Values are scaled to
/// millibitcoin and counts clamp at 255; equality across all fields is what
/// decides "changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotAddress {
    pub address: AddressId,
    pub total_sent_mbtc: u32,
    pub total_received_mbtc: u32,
    pub first_time: u32,
    pub last_time: u32,
    pub transaction_count: u8,
    pub input_count: u8,
    pub output_count: u8,
}

impl SnapshotAddress {
    pub fn from_entry(address: AddressId, entry: &crate::arena::AddressEntry) -> SnapshotAddress {
        SnapshotAddress {
            address,
            total_sent_mbtc: (entry.total_sent / ONE_MBTC) as u32,
            total_received_mbtc: (entry.total_received / ONE_MBTC) as u32,
            first_time: entry.first_output_time,
            last_time: entry.last_used_time(),
            transaction_count: entry.transaction_count.min(255) as u8,
            input_count: entry.input_count.min(255) as u8,
            output_count: entry.output_count.min(255) as u8,
        }
    }

    pub fn balance_mbtc(&self) -> u32 {
        self.total_received_mbtc - self.total_sent_mbtc
    }
}

/// One row of the time series.
#[derive(Debug, Clone, Default)]
pub struct StatRow {
    pub time: u32,
    pub address_count: u32,
    pub total_value: u64,
    pub zombie_count: u32,
    pub zombie_value: u64,
    pub classes: [StatValue; BalanceClass::COUNT],
    /// Full ≥1 BTC snapshot; retained only on the most recent row.
    pub addresses: Vec<SnapshotAddress>,
    pub new_addresses: Vec<SnapshotAddress>,
    pub changed_addresses: Vec<SnapshotAddress>,
    pub deleted_addresses: Vec<AddressId>,
    pub same_count: u32,
    pub rose_from_dead_count: u32,
    /// Prior balances of risen addresses, in mBTC.
    pub rose_from_dead_value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SnapshotPeriod {
    Day,
    Month,
    Year,
}

impl SnapshotPeriod {
    /// Ordinal of the bucket a timestamp falls in; rows are emitted when the
    /// ordinal increases.
    fn bucket(self, timestamp: u32) -> u32 {
        let date = DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
            .map(|dt| dt.date_naive())
            .unwrap_or_default();
        match self {
            SnapshotPeriod::Day => {
                date.year() as u32 * 10_000 + date.month() * 100 + date.day()
            }
            SnapshotPeriod::Month => date.year() as u32 * 100 + date.month(),
            SnapshotPeriod::Year => date.year() as u32,
        }
    }
}

pub struct SnapshotEngine {
    period: SnapshotPeriod,
    zombie_days: u32,
    record_addresses: bool,
    rows: Vec<StatRow>,
    scratch: Vec<u32>,
    last_time: u32,
    pending: bool,
}

impl SnapshotEngine {
    pub fn new(period: SnapshotPeriod, zombie_days: u32, record_addresses: bool) -> SnapshotEngine {
        SnapshotEngine {
            period,
            zombie_days,
            record_addresses,
            rows: Vec::new(),
            scratch: Vec::new(),
            last_time: 0,
            pending: false,
        }
    }

    pub fn rows(&self) -> &[StatRow] {
        &self.rows
    }

    /// Called once per block, in chain order, before the block's transactions
    /// are applied. A row covers every transaction whose block timestamp is
    /// at or before the row's time, so the snapshot fires before the first
    /// block of the next bucket lands. Block timestamps are allowed to
    /// wobble backwards; only a forward bucket change emits a row.
    pub fn observe_block(&mut self, timestamp: u32, arena: &AddressArena) {
        if self.pending
            && self.period.bucket(timestamp) > self.period.bucket(self.last_time)
        {
            self.take_snapshot(self.last_time, arena);
        }
        if timestamp > self.last_time {
            self.last_time = timestamp;
        }
        self.pending = true;
    }

    /// Emits the trailing partial bucket, if any blocks were seen since the
    /// last row.
    pub fn finalize(&mut self, arena: &AddressArena) {
        if self.pending {
            self.take_snapshot(self.last_time, arena);
            self.pending = false;
        }
    }

    fn zombie_threshold(&self, time: u32) -> u32 {
        (time as u64).saturating_sub(self.zombie_days as u64 * 86_400) as u32
    }

    fn take_snapshot(&mut self, time: u32, arena: &AddressArena) {
        let zombie_date = self.zombie_threshold(time);
        let mut row = StatRow {
            time,
            ..StatRow::default()
        };

        for (_, entry) in arena.iter() {
            let balance = entry.balance();
            row.address_count += 1;
            row.total_value += balance;
            let slot = &mut row.classes[BalanceClass::classify(balance).index()];
            slot.count += 1;
            slot.value += balance;
            if entry.last_used_time() < zombie_date {
                row.zombie_count += 1;
                row.zombie_value += balance;
            }
        }

        if self.record_addresses {
            let mut picked: Vec<(u64, SnapshotAddress)> = arena
                .iter()
                .filter(|(_, entry)| entry.balance() >= SNAPSHOT_MIN_BALANCE)
                .map(|(id, entry)| (entry.balance(), SnapshotAddress::from_entry(id, entry)))
                .collect();
            picked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.address.cmp(&b.1.address)));
            row.addresses = picked.into_iter().map(|(_, sa)| sa).collect();
            self.diff_against_previous(&mut row, zombie_date);
        }

        self.rows.push(row);
    }

    /// Classifies the new row's addresses against the previous row and fills
    /// the delta fields. The scratch index maps an `AddressId` to the
    /// position of its entry in the previous row (plus one; `u32::MAX` marks
    /// a slot already matched).
    fn diff_against_previous(&mut self, row: &mut StatRow, zombie_date: u32) {
        let previous = match self.rows.last_mut() {
            Some(previous) => previous,
            None => {
                // The first row: everything is new.
                row.new_addresses = row.addresses.clone();
                return;
            }
        };

        let highest = row
            .addresses
            .iter()
            .chain(previous.addresses.iter())
            .map(|sa| sa.address)
            .max()
            .unwrap_or(0) as usize;
        self.scratch.clear();
        self.scratch.resize(highest + 1, 0);
        for (position, prev) in previous.addresses.iter().enumerate() {
            self.scratch[prev.address as usize] = position as u32 + 1;
        }

        for current in &row.addresses {
            let slot = self.scratch[current.address as usize];
            if slot == 0 {
                row.new_addresses.push(*current);
                continue;
            }
            let old = &previous.addresses[(slot - 1) as usize];
            self.scratch[current.address as usize] = u32::MAX;
            if old == current {
                row.same_count += 1;
            } else {
                if old.last_time < zombie_date && current.last_time >= zombie_date {
                    row.rose_from_dead_count += 1;
                    row.rose_from_dead_value += old.balance_mbtc() as u64;
                }
                row.changed_addresses.push(*current);
            }
        }

        for prev in &previous.addresses {
            if self.scratch[prev.address as usize] != u32::MAX {
                row.deleted_addresses.push(prev.address);
            }
        }

        // Only the newest row needs its full set, for the next diff.
        previous.addresses = Vec::new();
    }
}
