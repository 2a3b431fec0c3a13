//! State addressing for the record family
//!
//! An address is the family namespace (first 6 hex chars of SHA-512 of the
//! family name) followed by the first 64 hex chars of SHA-512 of the record key.

use keyledger_core::{Address, KeyledgerResult, Namespace, RecordKey, FAMILY_NAME};
use keyledger_crypto::hashing::{sha512, sha512_hex};
use std::sync::OnceLock;

static FAMILY_NAMESPACE: OnceLock<Namespace> = OnceLock::new();

/// Namespace prefix owned by `family_name`
pub fn namespace_prefix(family_name: &str) -> Namespace {
    Namespace::from_digest(&sha512(family_name.as_bytes()))
}

/// Namespace of the record family, computed once per process
pub fn family_namespace() -> &'static Namespace {
    FAMILY_NAMESPACE.get_or_init(|| namespace_prefix(FAMILY_NAME))
}

/// Address of `key` inside `namespace`
pub fn derive_address(namespace: &Namespace, key: &RecordKey) -> KeyledgerResult<Address> {
    let digest = sha512_hex(key.as_str().as_bytes());
    Address::from_parts(namespace, &digest)
}

/// Address of `key` inside the record family namespace
pub fn record_address(key: &RecordKey) -> KeyledgerResult<Address> {
    derive_address(family_namespace(), key)
}
