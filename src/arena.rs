//! Address arena.
//!
//! Interns 20-byte recipient hashes to dense 1-based ids (0 means "none") and
//! owns the per-address ledger record each id indexes. Like the transaction
//! directory, storage is chunked slabs behind an open-addressed bucket array:
//! records never move once created.

use blockscan_support::Hash160;

use crate::error::EngineError;

/// Dense address identifier. 0 is reserved for "no address".
pub type AddressId = u32;

/// Everything the ledger tracks for one address.
#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub hash: Hash160,
    pub total_received: u64,
    pub total_sent: u64,
    pub first_output_time: u32,
    pub last_output_time: u32,
    pub last_input_time: u32,
    pub input_count: u32,
    pub output_count: u32,
    pub transaction_count: u32,
    /// Sequence of the last transaction counted for `transaction_count`, so
    /// an address touched several times by one transaction counts it once.
    pub(crate) last_counted_tx: u64,
}

impl AddressEntry {
    fn new(hash: Hash160) -> AddressEntry {
        AddressEntry {
            hash,
            total_received: 0,
            total_sent: 0,
            first_output_time: 0,
            last_output_time: 0,
            last_input_time: 0,
            input_count: 0,
            output_count: 0,
            transaction_count: 0,
            last_counted_tx: u64::MAX,
        }
    }

    pub fn balance(&self) -> u64 {
        self.total_received.saturating_sub(self.total_sent)
    }

    /// The last time the address spent; an address that never spent is dated
    /// by its first funding, since anyone can send coins to anyone.
    pub fn last_used_time(&self) -> u32 {
        if self.last_input_time != 0 {
            self.last_input_time
        } else {
            self.first_output_time
        }
    }

    pub fn days_since_last_used(&self, now: u32) -> u32 {
        now.saturating_sub(self.last_used_time()) / 86_400
    }
}

const SLAB_ENTRIES: usize = 1 << 20;
const EMPTY: u64 = u64::MAX;
const DEFAULT_BUCKETS: usize = 1 << 16;

pub struct AddressArena {
    buckets: Vec<u64>,
    slabs: Vec<Vec<AddressEntry>>,
    len: u64,
}

impl AddressArena {
    pub fn new() -> AddressArena {
        AddressArena {
            buckets: vec![EMPTY; DEFAULT_BUCKETS],
            slabs: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> u32 {
        self.len as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn entry(&self, index: u64) -> &AddressEntry {
        let index = index as usize;
        &self.slabs[index / SLAB_ENTRIES][index % SLAB_ENTRIES]
    }

    /// Finds or creates the id for a recipient hash.
    pub fn intern(&mut self, hash: Hash160) -> Result<AddressId, EngineError> {
        if let Some(id) = self.lookup(&hash) {
            return Ok(id);
        }
        if self.len >= AddressId::MAX as u64 - 1 {
            return Err(EngineError::CapacityExhausted("address arena"));
        }
        if (self.len + 1) * 4 > (self.buckets.len() as u64) * 3 {
            self.grow();
        }
        let mask = (self.buckets.len() - 1) as u64;
        let mut bucket = hash.fold() & mask;
        while self.buckets[bucket as usize] != EMPTY {
            bucket = (bucket + 1) & mask;
        }
        if self
            .slabs
            .last()
            .map(|slab| slab.len() == SLAB_ENTRIES)
            .unwrap_or(true)
        {
            self.slabs.push(Vec::with_capacity(SLAB_ENTRIES));
        }
        self.slabs.last_mut().unwrap().push(AddressEntry::new(hash));
        self.buckets[bucket as usize] = self.len;
        self.len += 1;
        Ok(self.len as AddressId)
    }

    pub fn lookup(&self, hash: &Hash160) -> Option<AddressId> {
        let mask = (self.buckets.len() - 1) as u64;
        let mut bucket = hash.fold() & mask;
        while self.buckets[bucket as usize] != EMPTY {
            let index = self.buckets[bucket as usize];
            if self.entry(index).hash == *hash {
                return Some(index as AddressId + 1);
            }
            bucket = (bucket + 1) & mask;
        }
        None
    }

    pub fn get(&self, id: AddressId) -> &AddressEntry {
        assert!(id != 0, "address id 0 is reserved");
        self.entry(id as u64 - 1)
    }

    pub fn get_mut(&mut self, id: AddressId) -> &mut AddressEntry {
        assert!(id != 0, "address id 0 is reserved");
        let index = (id - 1) as usize;
        &mut self.slabs[index / SLAB_ENTRIES][index % SLAB_ENTRIES]
    }

    /// Entries with their ids, in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (AddressId, &AddressEntry)> {
        self.slabs
            .iter()
            .flat_map(|slab| slab.iter())
            .enumerate()
            .map(|(i, entry)| (i as AddressId + 1, entry))
    }

    fn grow(&mut self) {
        let new_len = self.buckets.len() * 2;
        let mask = (new_len - 1) as u64;
        let mut buckets = vec![EMPTY; new_len];
        for index in 0..self.len {
            let mut bucket = self.entry(index).hash.fold() & mask;
            while buckets[bucket as usize] != EMPTY {
                bucket = (bucket + 1) & mask;
            }
            buckets[bucket as usize] = index;
        }
        self.buckets = buckets;
    }
}

impl Default for AddressArena {
    fn default() -> Self {
        AddressArena::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u32) -> Hash160 {
        let mut bytes = [0u8; 20];
        bytes[..4].copy_from_slice(&n.to_le_bytes());
        Hash160(bytes)
    }

    #[test]
    fn interning_is_idempotent() {
        let mut arena = AddressArena::new();
        let a = arena.intern(hash(1)).unwrap();
        let b = arena.intern(hash(2)).unwrap();
        let a_again = arena.intern(hash(1)).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(a, a_again);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn ids_start_at_one() {
        let mut arena = AddressArena::new();
        let id = arena.intern(hash(7)).unwrap();
        assert_eq!(id, 1);
        assert_eq!(arena.get(id).hash, hash(7));
        assert_eq!(arena.lookup(&hash(7)), Some(1));
        assert_eq!(arena.lookup(&hash(8)), None);
    }

    #[test]
    fn entries_are_mutable_through_their_id() {
        let mut arena = AddressArena::new();
        let id = arena.intern(hash(3)).unwrap();
        arena.get_mut(id).total_received = 500;
        arena.get_mut(id).total_sent = 200;
        assert_eq!(arena.get(id).balance(), 300);
    }

    #[test]
    fn last_used_falls_back_to_first_funding() {
        let mut entry = AddressEntry::new(hash(1));
        entry.first_output_time = 1_000_000;
        assert_eq!(entry.last_used_time(), 1_000_000);
        entry.last_input_time = 2_000_000;
        assert_eq!(entry.last_used_time(), 2_000_000);
    }

    #[test]
    fn days_since_last_used_rounds_down() {
        let mut entry = AddressEntry::new(hash(1));
        entry.first_output_time = 1_000;
        assert_eq!(entry.days_since_last_used(1_000 + 86_400 * 3 + 100), 3);
        // A clock that ran backwards never yields a negative age.
        assert_eq!(entry.days_since_last_used(0), 0);
    }

    #[test]
    fn survives_growth() {
        let mut arena = AddressArena::new();
        for n in 0..100_000u32 {
            arena.intern(hash(n)).unwrap();
        }
        assert_eq!(arena.len(), 100_000);
        assert_eq!(arena.lookup(&hash(99_999)), Some(100_000));
        assert_eq!(arena.lookup(&hash(12_345)), Some(12_346));
    }
}
