//! Digital signature operations using Ed25519

use ed25519_dalek::{Signer, Verifier};
use keyledger_core::{KeyledgerError, KeyledgerResult, PublicKey, Signature};

use crate::keys::{public_key_to_ed25519, KeyPair};

/// Sign a message using Ed25519
pub fn sign(keypair: &KeyPair, message: &[u8]) -> Signature {
    let signature = keypair.signing_key().sign(message);
    Signature::from_bytes(signature.to_bytes())
}

/// Verify a signature using Ed25519
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> KeyledgerResult<()> {
    let verifying_key = public_key_to_ed25519(public_key)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());

    verifying_key
        .verify(message, &sig)
        .map_err(|_| KeyledgerError::InvalidSignature)
}

/// Verify a hex-encoded signature against a hex-encoded public key
pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> KeyledgerResult<()> {
    let public_key = PublicKey::from_hex(public_key_hex)?;
    let signature = Signature::from_hex(signature_hex)?;
    verify(&public_key, message, &signature)
}
