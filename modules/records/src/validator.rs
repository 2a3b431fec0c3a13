//! Envelope validation for submitted batches
//!
//! Checks everything that can be checked without state: signatures, the
//! batch's transaction list, family routing, payload digests and declared
//! addresses. State-dependent rules belong to the handler.

use keyledger_core::{Address, KeyledgerError, KeyledgerResult, Namespace};
use keyledger_crypto::hashing::sha512_hex;
use keyledger_crypto::signing::verify_hex;

use crate::handler::TransactionHandler;
use crate::transaction::{Batch, BatchHeader, Transaction, TransactionHeader};

/// Stateless validator for one transaction family
pub struct EnvelopeValidator {
    family_name: String,
    family_versions: Vec<String>,
    namespaces: Vec<Namespace>,
}

impl EnvelopeValidator {
    pub fn new(family_name: &str, family_versions: Vec<String>, namespaces: Vec<Namespace>) -> Self {
        Self {
            family_name: family_name.to_string(),
            family_versions,
            namespaces,
        }
    }

    /// Validator accepting exactly what `handler` processes
    pub fn for_handler(handler: &dyn TransactionHandler) -> Self {
        Self::new(
            handler.family_name(),
            handler.family_versions(),
            handler.namespaces(),
        )
    }

    /// Validate batch signature and transaction list
    pub fn validate_batch_header(&self, batch: &Batch) -> KeyledgerResult<BatchHeader> {
        let header = batch.decode_header()?;

        verify_hex(&header.signer_public_key, &batch.header, &batch.header_signature)
            .map_err(|_| KeyledgerError::InvalidBatch("bad batch signature".into()))?;

        if batch.transactions.is_empty() {
            return Err(KeyledgerError::InvalidBatch("batch has no transactions".into()));
        }

        let ids: Vec<&str> = batch.transactions.iter().map(Transaction::id).collect();
        if header.transaction_ids.iter().map(String::as_str).ne(ids.iter().copied()) {
            return Err(KeyledgerError::InvalidBatch(
                "transaction ids do not match batch header".into(),
            ));
        }

        Ok(header)
    }

    /// Validate one transaction envelope inside a batch signed by `batcher`
    pub fn validate_transaction(
        &self,
        transaction: &Transaction,
        batcher: &str,
    ) -> KeyledgerResult<TransactionHeader> {
        let header = transaction.decode_header()?;

        verify_hex(&header.signer_public_key, &transaction.header, &transaction.header_signature)
            .map_err(|_| KeyledgerError::InvalidTransaction("bad transaction signature".into()))?;

        if header.batcher_public_key != batcher {
            return Err(KeyledgerError::InvalidTransaction(
                "batcher key does not match batch signer".into(),
            ));
        }

        if header.family_name != self.family_name {
            return Err(KeyledgerError::InvalidTransaction(format!(
                "unknown family {}",
                header.family_name
            )));
        }

        if !self.family_versions.contains(&header.family_version) {
            return Err(KeyledgerError::InvalidTransaction(format!(
                "unsupported {} version {}",
                header.family_name, header.family_version
            )));
        }

        if header.payload_sha512 != sha512_hex(&transaction.payload) {
            return Err(KeyledgerError::InvalidTransaction(
                "payload digest mismatch".into(),
            ));
        }

        for address in header.inputs.iter().chain(header.outputs.iter()) {
            self.check_address(address)?;
        }

        Ok(header)
    }

    /// Validate a batch and every transaction in it
    pub fn validate_batch(&self, batch: &Batch) -> KeyledgerResult<Vec<TransactionHeader>> {
        let header = self.validate_batch_header(batch)?;
        batch
            .transactions
            .iter()
            .map(|tx| self.validate_transaction(tx, &header.signer_public_key))
            .collect()
    }

    fn check_address(&self, address: &Address) -> KeyledgerResult<()> {
        Address::from_hex(address.as_str())?;
        if !self.namespaces.iter().any(|ns| address.is_in(ns)) {
            return Err(KeyledgerError::InvalidTransaction(format!(
                "address {} is outside the {} namespace",
                address, self.family_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RecordStore;
    use crate::payload::RecordPayload;
    use crate::transaction::TransactionBuilder;
    use keyledger_core::{RecordKey, Signable};
    use keyledger_crypto::keys::KeyPair;
    use keyledger_crypto::signing::sign;

    fn validator() -> EnvelopeValidator {
        EnvelopeValidator::for_handler(&RecordStore::new())
    }

    fn batch(kp: &KeyPair) -> Batch {
        let payload =
            RecordPayload::create(RecordKey::new("farmA").unwrap(), vec!["42".into()]).unwrap();
        TransactionBuilder::new(Some(kp))
            .build_batch_list(&payload)
            .unwrap()
            .batches
            .remove(0)
    }

    /// Re-sign a modified transaction header so only the intended check fails
    fn resign(kp: &KeyPair, tx: &mut Transaction, header: &TransactionHeader) {
        tx.header = header.signing_bytes().unwrap();
        tx.header_signature = sign(kp, &tx.header).to_hex();
    }

    #[test]
    fn test_valid_batch() {
        let kp = KeyPair::generate();
        let headers = validator().validate_batch(&batch(&kp)).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].signer_public_key, kp.public_key().to_hex());
    }

    #[test]
    fn test_tampered_payload() {
        let kp = KeyPair::generate();
        let mut b = batch(&kp);
        b.transactions[0].payload = b"farmA,create,43".to_vec();
        assert!(matches!(
            validator().validate_batch(&b),
            Err(KeyledgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_bad_signatures() {
        let kp = KeyPair::generate();

        let mut b = batch(&kp);
        b.header_signature = batch(&kp).header_signature;
        assert!(matches!(
            validator().validate_batch(&b),
            Err(KeyledgerError::InvalidBatch(_))
        ));

        let mut b = batch(&kp);
        let other = batch(&kp);
        b.transactions[0].header_signature = other.transactions[0].header_signature.clone();
        assert!(validator().validate_batch(&b).is_err());
    }

    #[test]
    fn test_wrong_family() {
        let kp = KeyPair::generate();
        let mut b = batch(&kp);
        let mut header = b.transactions[0].decode_header().unwrap();
        header.family_name = "intkey".into();
        resign(&kp, &mut b.transactions[0], &header);

        let batch_header = b.decode_header().unwrap();
        let err = validator()
            .validate_transaction(&b.transactions[0], &batch_header.signer_public_key)
            .unwrap_err();
        assert!(err.to_string().contains("unknown family"));
    }

    #[test]
    fn test_address_outside_namespace() {
        let kp = KeyPair::generate();
        let mut b = batch(&kp);
        let mut header = b.transactions[0].decode_header().unwrap();
        header.outputs = vec![Address::from_hex(&"a".repeat(70)).unwrap()];
        resign(&kp, &mut b.transactions[0], &header);

        let err = validator()
            .validate_transaction(&b.transactions[0], &header.batcher_public_key)
            .unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn test_foreign_batcher() {
        let kp = KeyPair::generate();
        let b = batch(&kp);
        let stranger = KeyPair::generate().public_key().to_hex();
        assert!(validator()
            .validate_transaction(&b.transactions[0], &stranger)
            .is_err());
    }

    #[test]
    fn test_transaction_list_mismatch() {
        let kp = KeyPair::generate();
        let mut b = batch(&kp);
        let extra = batch(&kp).transactions.remove(0);
        b.transactions.push(extra);
        assert!(matches!(
            validator().validate_batch_header(&b),
            Err(KeyledgerError::InvalidBatch(_))
        ));
    }
}
