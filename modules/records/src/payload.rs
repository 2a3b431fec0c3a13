//! Record payload carried inside a transaction
//!
//! Wire format is UTF-8, comma separated, always starting with `key,action`:
//!
//! | action | wire                    |
//! |--------|-------------------------|
//! | create | `key,create,<batch_nr>` |
//! | update | `key,update,<batch_nr>` |
//! | delete | `key,delete`            |
//!
//! The same table drives encoding and decoding, so a payload the client can
//! build is exactly a payload the handler accepts.

use keyledger_core::{
    Action, KeyledgerError, KeyledgerResult, Record, RecordKey, FIELD_SEPARATOR, RECORD_SEPARATOR,
};

/// Business fields stored for every record, in wire order
pub const RECORD_FIELDS: [&str; 1] = ["batch_nr"];

/// Number of comma separated parts a payload for `action` must have
pub fn payload_arity(action: Action) -> usize {
    if action.carries_fields() {
        2 + RECORD_FIELDS.len()
    } else {
        2
    }
}

/// Check a business field value can be embedded in payloads and stored blobs
pub fn validate_field(value: &str) -> KeyledgerResult<()> {
    if value.contains(FIELD_SEPARATOR) || value.contains(RECORD_SEPARATOR) {
        return Err(KeyledgerError::InvalidPayload(format!(
            "field cannot contain '{}' or '{}': {}",
            FIELD_SEPARATOR, RECORD_SEPARATOR, value
        )));
    }
    Ok(())
}

/// Decoded record payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPayload {
    key: RecordKey,
    action: Action,
    fields: Vec<String>,
}

impl RecordPayload {
    /// Validate and build a payload
    pub fn new(key: RecordKey, action: Action, fields: Vec<String>) -> KeyledgerResult<Self> {
        let expected = payload_arity(action) - 2;
        if fields.len() != expected {
            return Err(KeyledgerError::InvalidPayload(format!(
                "{} expects {} field(s), got {}",
                action,
                expected,
                fields.len()
            )));
        }
        for field in &fields {
            validate_field(field)?;
        }
        Ok(Self { key, action, fields })
    }

    pub fn create(key: RecordKey, fields: Vec<String>) -> KeyledgerResult<Self> {
        Self::new(key, Action::Create, fields)
    }

    pub fn update(key: RecordKey, fields: Vec<String>) -> KeyledgerResult<Self> {
        Self::new(key, Action::Update, fields)
    }

    pub fn delete(key: RecordKey) -> KeyledgerResult<Self> {
        Self::new(key, Action::Delete, Vec::new())
    }

    /// Encode a payload from raw parts, validating every one of them
    pub fn encode(key: &str, action: &str, fields: &[String]) -> KeyledgerResult<Vec<u8>> {
        let key = RecordKey::new(key)?;
        let action: Action = action.parse()?;
        Ok(Self::new(key, action, fields.to_vec())?.to_bytes())
    }

    /// Decode payload bytes received in a transaction
    pub fn decode(bytes: &[u8]) -> KeyledgerResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| KeyledgerError::InvalidPayload("payload is not UTF-8".into()))?;

        let parts: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        if parts.len() < 2 {
            return Err(KeyledgerError::InvalidPayload(
                "payload must start with key,action".into(),
            ));
        }

        let key = RecordKey::new(parts[0])?;
        let action: Action = parts[1].parse()?;

        if parts.len() != payload_arity(action) {
            return Err(KeyledgerError::InvalidPayload(format!(
                "{} payload expects {} parts, got {}",
                action,
                payload_arity(action),
                parts.len()
            )));
        }

        let fields = parts[2..].iter().map(|s| s.to_string()).collect();
        Ok(Self { key, action, fields })
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut parts = Vec::with_capacity(2 + self.fields.len());
        parts.push(self.key.as_str());
        parts.push(self.action.as_str());
        parts.extend(self.fields.iter().map(String::as_str));
        parts.join(&FIELD_SEPARATOR.to_string()).into_bytes()
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Record this payload would store
    pub fn to_record(&self) -> Record {
        Record::new(self.key.clone(), self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> RecordKey {
        RecordKey::new(s).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let cases = vec![
            RecordPayload::create(key("farmA"), vec!["42".into()]).unwrap(),
            RecordPayload::update(key("farm B"), vec!["".into()]).unwrap(),
            RecordPayload::delete(key("farmC")).unwrap(),
        ];
        for payload in cases {
            let decoded = RecordPayload::decode(&payload.to_bytes()).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_wire_format() {
        let bytes = RecordPayload::encode("farmA", "create", &["42".to_string()]).unwrap();
        assert_eq!(bytes, b"farmA,create,42");

        let bytes = RecordPayload::encode("farmA", "delete", &[]).unwrap();
        assert_eq!(bytes, b"farmA,delete");
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        let one = vec!["1".to_string()];
        assert!(matches!(
            RecordPayload::encode("", "create", &one),
            Err(KeyledgerError::InvalidPayload(_))
        ));
        assert!(RecordPayload::encode("a|b", "create", &one).is_err());
        assert!(RecordPayload::encode("farmA", "", &one).is_err());
        assert!(RecordPayload::encode("farmA", "list", &one).is_err());
        // Arity is frozen per action
        assert!(RecordPayload::encode("farmA", "create", &[]).is_err());
        assert!(RecordPayload::encode("farmA", "delete", &one).is_err());
        // Fields cannot smuggle separators
        assert!(RecordPayload::encode("farmA", "create", &["4,2".to_string()]).is_err());
        assert!(RecordPayload::encode("farmA", "create", &["4|2".to_string()]).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let bad: [&[u8]; 8] = [
            b"",
            b"farmA",
            b",create,1",
            b"farmA,list,1",
            b"farmA,create",
            b"farmA,create,1,2",
            b"farmA,delete,1",
            b"a|b,delete",
        ];
        for bytes in bad {
            assert!(
                matches!(RecordPayload::decode(bytes), Err(KeyledgerError::InvalidPayload(_))),
                "accepted {:?}",
                String::from_utf8_lossy(bytes)
            );
        }
        assert!(RecordPayload::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_six_field_legacy_payload_rejected() {
        // name,action,batchnr,volume,latlong,username
        let legacy = b"farmA,create,1,100,52.1;4.3,alice";
        assert!(RecordPayload::decode(legacy).is_err());
    }
}
