use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;

/// 256-bit identifier for blocks and transactions. Stored in the byte order
/// used on disk; rendered human-reversed (big-endian) like every block
/// explorer does.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_slice(bytes: &[u8]) -> Hash256 {
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Hash256(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// XOR of the eight 32-bit lanes, widened. The value is already a
    /// cryptographic hash, so folding lanes distributes uniformly.
    pub fn fold(&self) -> u64 {
        let mut acc = 0u64;
        for lane in self.0.chunks_exact(8) {
            acc ^= u64::from_le_bytes(lane.try_into().unwrap());
        }
        acc
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// 20-byte recipient identifier: RIPEMD-160 of SHA-256 of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn from_slice(bytes: &[u8]) -> Hash160 {
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes);
        Hash160(out)
    }

    pub fn fold(&self) -> u64 {
        let mut acc = u64::from_le_bytes(self.0[0..8].try_into().unwrap());
        acc ^= u64::from_le_bytes(self.0[8..16].try_into().unwrap());
        acc ^ u32::from_le_bytes(self.0[16..20].try_into().unwrap()) as u64
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// SHA-256 applied twice; block and transaction ids.
pub fn sha256d(bytes: &[u8]) -> Hash256 {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    Hash256::from_slice(&second)
}

/// RIPEMD-160 of SHA-256; derives the recipient hash of a public key.
pub fn hash160(bytes: &[u8]) -> Hash160 {
    let sha = Sha256::digest(bytes);
    let ripe = Ripemd160::digest(sha);
    Hash160::from_slice(&ripe)
}
