//! Content hashing using SHA-256.
//!
//! Every object in a repository — blob, tree, or commit — is addressed
//! by the lowercase hex SHA-256 of its serialized bytes.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded address.
pub const ADDRESS_LEN: usize = 64;

/// Compute the SHA-256 hash of arbitrary bytes, returned as a hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check that a string is a well-formed object address.
pub fn is_address(s: &str) -> bool {
    s.len() == ADDRESS_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
