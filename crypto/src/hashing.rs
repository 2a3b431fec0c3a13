//! Hashing functions using SHA-512
//!
//! SHA-512 is the digest used for namespace prefixes, state addresses and
//! payload integrity in transaction headers.

use sha2::{Digest, Sha512};

/// Compute the SHA-512 digest of data
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&result);
    bytes
}

/// Compute the SHA-512 digest of data as 128 lowercase hex characters
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(sha512(data))
}
