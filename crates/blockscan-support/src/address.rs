//! Base58Check rendering of P2PKH recipients.
//!
//! A binary address is `version 0x00 || hash160 || checksum`, where the
//! checksum is the first four bytes of the double-SHA-256 of the first
//! 21 bytes. Decoding rejects the string unless all four checksum bytes
//! match.

use crate::hash::{hash160, Hash160};
use thiserror::Error;

/// Main-net P2PKH version byte.
pub const VERSION_P2PKH: u8 = 0x00;

/// Length of the version byte plus the hash160 payload.
pub const PAYLOAD_LEN: usize = 21;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("not valid base58check: {0}")]
    Base58(String),
    #[error("decoded address is {0} bytes, expected {PAYLOAD_LEN}")]
    Length(usize),
    #[error("unsupported address version byte {0:#04x}")]
    Version(u8),
}

/// Renders a 20-byte recipient hash as an ASCII main-net address.
pub fn hash160_to_ascii(hash: &Hash160) -> String {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[0] = VERSION_P2PKH;
    payload[1..].copy_from_slice(&hash.0);
    bs58::encode(payload).with_check().into_string()
}

/// Renders a full 65-byte ECDSA public key as an ASCII main-net address.
pub fn public_key_to_ascii(pubkey: &[u8]) -> String {
    hash160_to_ascii(&hash160(pubkey))
}

/// Parses an ASCII address back to its recipient hash. The checksum must
/// match in full and the version byte must be the main-net P2PKH prefix.
pub fn ascii_to_hash160(input: &str) -> Result<Hash160, AddressError> {
    let decoded = bs58::decode(input.trim())
        .with_check(None)
        .into_vec()
        .map_err(|e| AddressError::Base58(e.to_string()))?;
    if decoded.len() != PAYLOAD_LEN {
        return Err(AddressError::Length(decoded.len()));
    }
    if decoded[0] != VERSION_P2PKH {
        return Err(AddressError::Version(decoded[0]));
    }
    Ok(Hash160::from_slice(&decoded[1..]))
}
