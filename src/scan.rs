//! Container scanner.
//!
//! The reference client stores the chain as a sequence of append-only files
//! `blk00000.dat`, `blk00001.dat`, … where each record is
//! `[magic u32][payload_length u32][payload]`. The scanner walks those files
//! forward, computes each block's id from the 80-byte header prefix, and
//! fills the header index. It never writes.
//!
//! When the expected magic is missing (zero padding, torn writes) the scanner
//! searches forward for the next occurrence within a single block-sized
//! window; if none is found there it gives up on the file and moves to the
//! next one. Longer runs of garbage than one window are not bridged.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use blockscan_support::sha256d;
use log::{debug, info};

use crate::chain::{HeaderIndex, HeaderRecord};
use crate::error::EngineError;
use crate::logging::Diagnostics;

/// Record magic of the Bitcoin main network.
pub const MAGIC_ID: u32 = 0xD9B4_BEF9;

/// No block payload is ever larger than this; also bounds the resync window.
pub const MAX_BLOCK_SIZE: u32 = 10 * 1024 * 1024;

/// Handle-cache ceiling; the chain spans far fewer container files than this.
pub const MAX_BLOCK_FILES: usize = 512;

/// Length of the hashed block header prefix.
pub const BLOCK_HEADER_LEN: usize = 80;

enum FileSlot {
    Untried,
    Missing,
    Open(File),
}

/// Read-only view of the `blk*.dat` directory with cached file handles.
pub struct BlockFiles {
    root: PathBuf,
    slots: Vec<FileSlot>,
}

impl BlockFiles {
    /// Opens the container directory. Failing to open the very first data
    /// file is the one fatal startup condition.
    pub fn open(root: &Path) -> Result<BlockFiles, EngineError> {
        let mut files = BlockFiles {
            root: root.to_path_buf(),
            slots: Vec::new(),
        };
        if files.file(0)?.is_none() {
            return Err(EngineError::MissingData(files.path(0)));
        }
        Ok(files)
    }

    pub fn path(&self, index: u32) -> PathBuf {
        self.root.join(format!("blk{:05}.dat", index))
    }

    fn file(&mut self, index: u32) -> Result<Option<&mut File>, EngineError> {
        let index = index as usize;
        if index >= MAX_BLOCK_FILES {
            return Err(EngineError::CapacityExhausted("block file cache"));
        }
        while self.slots.len() <= index {
            self.slots.push(FileSlot::Untried);
        }
        if let FileSlot::Untried = self.slots[index] {
            self.slots[index] = match File::open(self.path(index as u32)) {
                Ok(f) => {
                    info!("opened block-chain input file {:?}", self.path(index as u32));
                    FileSlot::Open(f)
                }
                Err(_) => FileSlot::Missing,
            };
        }
        match &mut self.slots[index] {
            FileSlot::Open(f) => Ok(Some(f)),
            _ => Ok(None),
        }
    }

    pub fn has_file(&mut self, index: u32) -> bool {
        matches!(self.file(index), Ok(Some(_)))
    }

    /// Length of one container file, if present.
    pub fn file_len(&mut self, index: u32) -> Result<Option<u64>, EngineError> {
        match self.file(index)? {
            Some(f) => Ok(Some(f.metadata()?.len())),
            None => Ok(None),
        }
    }

    /// Reads exactly `buf.len()` bytes at `offset`; `Ok(false)` when the file
    /// is absent or too short.
    pub fn read_at(
        &mut self,
        index: u32,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<bool, EngineError> {
        let file = match self.file(index)? {
            Some(f) => f,
            None => return Ok(false),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }
}

/// Scans every container file and fills `headers`. Returns the number of
/// headers recovered. Stops early once `max_blocks` headers are on hand.
pub fn scan_headers(
    files: &mut BlockFiles,
    headers: &mut HeaderIndex,
    max_blocks: Option<u32>,
    diag: &mut Diagnostics,
) -> Result<u32, EngineError> {
    let mut file_index: u32 = 0;
    let mut scanned: u32 = 0;

    'files: while files.has_file(file_index) {
        let file_len = files.file_len(file_index)?.unwrap_or(0);
        let before = headers.len();
        let mut offset: u64 = 0;

        loop {
            if let Some(max) = max_blocks {
                if scanned >= max {
                    break 'files;
                }
            }
            let mut prefix = [0u8; 8];
            if !files.read_at(file_index, offset, &mut prefix)? {
                break; // end of this file
            }
            let magic = u32::from_le_bytes(prefix[0..4].try_into().unwrap());
            if magic != MAGIC_ID {
                match find_magic(files, file_index, offset, file_len)? {
                    Some(found_at) => {
                        diag.gap_recovered(file_index, found_at - offset);
                        offset = found_at;
                        continue;
                    }
                    None => break,
                }
            }
            let payload_len = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
            if payload_len < BLOCK_HEADER_LEN as u32 || payload_len >= MAX_BLOCK_SIZE {
                diag.truncated_record(file_index);
                offset += 1;
                match find_magic(files, file_index, offset, file_len)? {
                    Some(found_at) => {
                        diag.gap_recovered(file_index, found_at - offset);
                        offset = found_at;
                        continue;
                    }
                    None => break,
                }
            }
            let payload_offset = offset + 8;
            if payload_offset + payload_len as u64 > file_len {
                diag.truncated_record(file_index);
                break;
            }
            let mut header = [0u8; BLOCK_HEADER_LEN];
            if !files.read_at(file_index, payload_offset, &mut header)? {
                diag.truncated_record(file_index);
                break;
            }
            let id = sha256d(&header);
            let record = HeaderRecord {
                id,
                previous_id: blockscan_support::Hash256::from_slice(&header[4..36]),
                file_index,
                file_offset: payload_offset as u32,
                payload_length: payload_len,
            };
            debug!("header {} at blk{:05}.dat+{}", id, file_index, payload_offset);
            headers.insert(record);
            scanned += 1;
            offset = payload_offset + payload_len as u64;
        }

        info!(
            "scanned {} headers so far, {} in blk{:05}.dat",
            headers.len(),
            headers.len() - before,
            file_index
        );
        file_index += 1;
    }

    Ok(scanned)
}

/// Searches one block-sized window for the next record magic. Returns the
/// absolute offset of the magic, or `None` when the window is exhausted.
fn find_magic(
    files: &mut BlockFiles,
    file_index: u32,
    from: u64,
    file_len: u64,
) -> Result<Option<u64>, EngineError> {
    let window = (file_len.saturating_sub(from)).min(MAX_BLOCK_SIZE as u64) as usize;
    if window < 4 {
        return Ok(None);
    }
    let mut buf = vec![0u8; window];
    if !files.read_at(file_index, from, &mut buf)? {
        return Ok(None);
    }
    let needle = MAGIC_ID.to_le_bytes();
    Ok(buf
        .windows(4)
        .position(|w| w == needle)
        .map(|i| from + i as u64))
}
