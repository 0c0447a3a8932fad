//! Block decoder.
//!
//! Decodes one block payload into transactions, inputs, outputs, and the
//! recipient each output script pays to. The decoded records borrow their
//! script bytes from the caller's buffer; the decoder allocates nothing per
//! element beyond the record vectors themselves, and nothing it returns
//! outlives the buffer.
//!
//! A malformed script or an unreasonable count flags the transaction and the
//! walk continues; only truncation aborts the block, because a transaction
//! whose extent cannot be determined cannot be skipped.

use blockscan_support::{hash160, sha256d, ByteReader, Hash160, Hash256, ReadError};

use crate::error::DecodeError;
use crate::logging::Diagnostics;

pub const MAX_SCRIPT_LEN: usize = 8 * 1024;
pub const MAX_TX_INPUTS: u64 = 4096;
pub const MAX_TX_OUTPUTS: u64 = 4096;
pub const MAX_BLOCK_TRANSACTIONS: u64 = 8192;

/// The synthetic previous-output index that marks a coinbase input.
pub const COINBASE_INDEX: u32 = 0xFFFF_FFFF;

const OP_0: u8 = 0x00;
const OP_DUP: u8 = 0x76;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xA9;
const OP_CHECKSIG: u8 = 0xAC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    /// Output script carries a full public key.
    PubKey,
    /// Output script commits to a 20-byte hash160.
    PubKeyHash,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct RawInput<'a> {
    pub prev_tx: Hash256,
    pub prev_index: u32,
    pub script: &'a [u8],
    pub sequence_no: u32,
}

impl RawInput<'_> {
    pub fn is_coinbase(&self) -> bool {
        self.prev_index == COINBASE_INDEX
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RawOutput<'a> {
    pub value: u64,
    pub script: &'a [u8],
    pub recipient: Option<Hash160>,
    pub kind: RecipientKind,
}

#[derive(Debug, Clone)]
pub struct RawTransaction<'a> {
    pub version: u32,
    pub inputs: Vec<RawInput<'a>>,
    pub outputs: Vec<RawOutput<'a>>,
    pub lock_time: u32,
    /// Double-SHA-256 of the exact serialized bytes of this transaction.
    pub id: Hash256,
    /// Byte offset of this transaction within the block payload.
    pub offset_in_block: u32,
    pub length: u32,
    pub flagged: bool,
}

#[derive(Debug, Clone)]
pub struct RawBlock<'a> {
    pub version: u32,
    pub previous_id: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub transactions: Vec<RawTransaction<'a>>,
    /// Sum of every output value in the block.
    pub total_output_value: u64,
    pub flagged: bool,
}

/// Decodes one block payload. `buf` must hold exactly the payload bytes the
/// container record declared.
pub fn decode_block<'a>(
    buf: &'a [u8],
    diag: &mut Diagnostics,
) -> Result<RawBlock<'a>, DecodeError> {
    let mut r = ByteReader::new(buf);
    let version = r.read_u32()?;
    let previous_id = r.read_hash()?;
    let merkle_root = r.read_hash()?;
    let timestamp = r.read_u32()?;
    let bits = r.read_u32()?;
    let nonce = r.read_u32()?;

    let mut flagged = false;
    let tx_count = read_count(&mut r, diag, &mut flagged)?;
    if tx_count > MAX_BLOCK_TRANSACTIONS {
        return Err(DecodeError::TooManyTransactions(
            tx_count as usize,
            MAX_BLOCK_TRANSACTIONS as usize,
        ));
    }

    let mut transactions = Vec::with_capacity(tx_count as usize);
    let mut total_output_value = 0u64;
    for index in 0..tx_count {
        diag.enter_transaction(index as u32);
        let tx = decode_transaction(&mut r, diag)?;
        flagged |= tx.flagged;
        for output in &tx.outputs {
            total_output_value = total_output_value.wrapping_add(output.value);
        }
        transactions.push(tx);
    }

    Ok(RawBlock {
        version,
        previous_id,
        merkle_root,
        timestamp,
        bits,
        nonce,
        transactions,
        total_output_value,
        flagged,
    })
}

/// Decodes a single transaction at the reader's cursor. Also used to
/// re-materialize one transaction from directory-located bytes.
pub fn decode_transaction<'a>(
    r: &mut ByteReader<'a>,
    diag: &mut Diagnostics,
) -> Result<RawTransaction<'a>, DecodeError> {
    let start = r.position();
    let mut flagged = false;

    let version = r.read_u32()?;
    if version != 1 && version != 2 {
        diag.odd_tx_version(version);
        flagged = true;
    }

    let input_count = read_count(r, diag, &mut flagged)?;
    if input_count > MAX_TX_INPUTS {
        diag.excessive_count("input", input_count);
        flagged = true;
    }
    let mut inputs = Vec::with_capacity(input_count.min(MAX_TX_INPUTS) as usize);
    for _ in 0..input_count {
        let prev_tx = r.read_hash()?;
        let prev_index = r.read_u32()?;
        let script_len = read_count(r, diag, &mut flagged)? as usize;
        if script_len > MAX_SCRIPT_LEN {
            diag.oversize_script(script_len);
            flagged = true;
        }
        let script = r.read_bytes(script_len)?;
        let sequence_no = r.read_u32()?;
        inputs.push(RawInput {
            prev_tx,
            prev_index,
            script,
            sequence_no,
        });
    }

    let output_count = read_count(r, diag, &mut flagged)?;
    if output_count > MAX_TX_OUTPUTS {
        diag.excessive_count("output", output_count);
        flagged = true;
    }
    let mut outputs = Vec::with_capacity(output_count.min(MAX_TX_OUTPUTS) as usize);
    for index in 0..output_count {
        diag.output_index = index as u32;
        let value = r.read_u64()?;
        let script_len = read_count(r, diag, &mut flagged)? as usize;
        if script_len > MAX_SCRIPT_LEN {
            diag.oversize_script(script_len);
            flagged = true;
            let script = r.read_bytes(script_len)?;
            outputs.push(RawOutput {
                value,
                script,
                recipient: None,
                kind: RecipientKind::Unknown,
            });
            continue;
        }
        let script = r.read_bytes(script_len)?;
        let (recipient, kind) = classify_output_script(script, diag);
        outputs.push(RawOutput {
            value,
            script,
            recipient,
            kind,
        });
    }

    let lock_time = r.read_u32()?;
    let length = (r.position() - start) as u32;
    let id = sha256d(r.span(start));

    Ok(RawTransaction {
        version,
        inputs,
        outputs,
        lock_time,
        id,
        offset_in_block: start as u32,
        length,
        flagged,
    })
}

/// A varint that is expected to stay in the reasonable range. The eight-byte
/// form is consumed, counted, and its value used, so the walk can go on.
fn read_count(
    r: &mut ByteReader<'_>,
    diag: &mut Diagnostics,
    flagged: &mut bool,
) -> Result<u64, DecodeError> {
    match r.read_varint() {
        Ok(v) => Ok(v),
        Err(ReadError::OversizeVarint { value, .. }) => {
            diag.oversize_varint(value);
            *flagged = true;
            Ok(value)
        }
        Err(e) => Err(e.into()),
    }
}

/// Recognizes the recipient an output script pays to.
///
/// The recognized forms, in the order they are tried:
///   1. `0x41 <65-byte key> OP_CHECKSIG` (67 bytes), pay-to-public-key
///   2. `<65-byte key> OP_CHECKSIG` (66 bytes), the early pay-to-public-key form
///   3. `OP_DUP OP_HASH160 0x14 <20-byte hash> …` (at least 25 bytes)
///   4. the degenerate 5-byte `OP_DUP OP_HASH160 OP_0 OP_EQUALVERIFY
///      OP_CHECKSIG`, which pays nobody
///   5. a full `OP_DUP OP_HASH160 0x14 <20> OP_EQUALVERIFY OP_CHECKSIG`
///      window embedded anywhere in a longer script
pub fn classify_output_script(
    script: &[u8],
    diag: &mut Diagnostics,
) -> (Option<Hash160>, RecipientKind) {
    let len = script.len();

    if len == 67 && script[0] == 0x41 && script[66] == OP_CHECKSIG {
        return (Some(hash160(&script[1..66])), RecipientKind::PubKey);
    }
    if len == 66 && script[65] == OP_CHECKSIG {
        return (Some(hash160(&script[0..65])), RecipientKind::PubKey);
    }
    if len >= 25 && script[0] == OP_DUP && script[1] == OP_HASH160 && script[2] == 20 {
        return (
            Some(Hash160::from_slice(&script[3..23])),
            RecipientKind::PubKeyHash,
        );
    }
    if len == 5
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == OP_0
        && script[3] == OP_EQUALVERIFY
        && script[4] == OP_CHECKSIG
    {
        diag.unusual_script();
        return (None, RecipientKind::Unknown);
    }
    if len > 25 {
        for window in script.windows(25) {
            if window[0] == OP_DUP
                && window[1] == OP_HASH160
                && window[2] == 20
                && window[23] == OP_EQUALVERIFY
                && window[24] == OP_CHECKSIG
            {
                diag.unusual_script();
                return (
                    Some(Hash160::from_slice(&window[3..23])),
                    RecipientKind::PubKeyHash,
                );
            }
        }
    }

    diag.unknown_script(len);
    (None, RecipientKind::Unknown)
}
