/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{id} -> FaxJob (JSON)
/// - `inbound`: inb:{id} -> InboundFax (JSON)
/// - `api_keys`: key:{key_id} -> ApiKeyRecord (JSON)
/// - `mailboxes`: mbx:{label} -> Mailbox (JSON)
/// - `inbound_rules`: rule:{to_number} -> InboundRule (JSON)
/// - `dedup`: cb:{provider_sid}:{event_type} -> seen-at epoch seconds
/// - `metadata`: meta:{key} -> value (string)

/// Encode a job key: job:{id}
pub fn encode_job_key(id: &str) -> Vec<u8> {
    format!("job:{}", id).into_bytes()
}

/// Encode an inbound key: inb:{id}
pub fn encode_inbound_key(id: &str) -> Vec<u8> {
    format!("inb:{}", id).into_bytes()
}

/// Encode an API key record key: key:{key_id}
pub fn encode_api_key_key(key_id: &str) -> Vec<u8> {
    format!("key:{}", key_id).into_bytes()
}

/// Encode a mailbox key: mbx:{label}
pub fn encode_mailbox_key(label: &str) -> Vec<u8> {
    format!("mbx:{}", label).into_bytes()
}

/// Encode an inbound rule key: rule:{to_number}
pub fn encode_rule_key(to_number: &str) -> Vec<u8> {
    format!("rule:{}", to_number).into_bytes()
}

/// Encode a callback dedup key: cb:{provider_sid}:{event_type}
pub fn encode_dedup_key(provider_sid: &str, event_type: &str) -> Vec<u8> {
    format!("cb:{}:{}", provider_sid, event_type).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
