//! Main-chain reconstruction.
//!
//! Container files hold every block the node ever accepted, including stale
//! forks. The canonical order is recovered by walking `previous_id` links
//! backward from the most recently stored header and reversing the walk;
//! headers not visited are orphans and are dropped. The files come from a
//! validating node, so the last-seen chain is authoritative and no
//! stored-work comparison is made.

use std::collections::HashMap;

use blockscan_support::Hash256;
use log::info;

/// Where one block lives on disk. Created by the scanner, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRecord {
    pub id: Hash256,
    pub previous_id: Hash256,
    pub file_index: u32,
    pub file_offset: u32,
    pub payload_length: u32,
}

/// All headers discovered so far, keyed by block id, remembering which one
/// arrived last (the tentative tip).
pub struct HeaderIndex {
    map: HashMap<Hash256, HeaderRecord>,
    tip: Option<Hash256>,
}

impl HeaderIndex {
    pub fn new() -> HeaderIndex {
        HeaderIndex {
            map: HashMap::new(),
            tip: None,
        }
    }

    /// A block re-stored after a reorg replaces its earlier copy.
    pub fn insert(&mut self, record: HeaderRecord) {
        self.tip = Some(record.id);
        self.map.insert(record.id, record);
    }

    pub fn get(&self, id: &Hash256) -> Option<&HeaderRecord> {
        self.map.get(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn tip(&self) -> Option<Hash256> {
        self.tip
    }

    /// Walks backward from the tip and re-emits the visited headers in
    /// forward order, genesis first. Orphans are excluded.
    pub fn reconstruct(&self) -> Vec<HeaderRecord> {
        let mut chain = Vec::new();
        let mut cursor = self.tip;
        while let Some(id) = cursor {
            match self.map.get(&id) {
                Some(record) => {
                    chain.push(*record);
                    cursor = Some(record.previous_id);
                }
                None => break, // predecessor of genesis
            }
        }
        chain.reverse();
        info!(
            "reconstructed {} blocks, dropped {} orphans",
            chain.len(),
            self.map.len() - chain.len()
        );
        chain
    }
}

impl Default for HeaderIndex {
    fn default() -> Self {
        HeaderIndex::new()
    }
}
