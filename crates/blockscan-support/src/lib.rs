//! Primitive layer shared by the blockscan engine: fixed-size hash values,
//! double-SHA-256 and hash160 digests, Base58Check address rendering, and the
//! bounds-checked little-endian reader the container decoders are built on.

pub mod address;
pub mod hash;
pub mod reader;

pub use hash::{hash160, sha256d, Hash160, Hash256};
pub use reader::{ByteReader, ReadError};
