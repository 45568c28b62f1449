//! Secrets bundle encoding for the destination credential store.
//!
//! [`to_records`] maps a [`SecretsBundle`] onto the key/value records a
//! Samba `secrets.tdb` expects. The key strings are an external
//! compatibility contract — Samba looks them up byte for byte — so they are
//! derived here deterministically and never made configurable.
//!
//! [`to_structured`] is the human/debug rendition; it contains the
//! cleartext password, so callers must treat the output as sensitive.

use crate::error::{JoinError, JoinResult};
use crate::extract::SecretsBundle;
use crate::sid;

/// SID records are padded to the fixed size of Samba's `dom_sid` struct
/// (8-byte header + room for 15 sub-authorities).
pub const SID_RECORD_LEN: usize = 68;

/// Secure channel type of a domain member workstation.
const SEC_CHANNEL_WKSTA: u32 = 2;

/// A record value: raw bytes stored as-is, or text stored NUL-terminated.
/// The terminator is the store writer's concern, not the encoder's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    Bytes(Vec<u8>),
    Text(String),
}

impl RecordValue {
    /// The byte string the destination store persists.
    pub fn to_store_bytes(&self) -> Vec<u8> {
        match self {
            RecordValue::Bytes(bytes) => bytes.clone(),
            RecordValue::Text(text) => {
                let mut bytes = text.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
        }
    }
}

/// Ordered key/value records; order is preserved all the way to the store.
pub type SecretsRecords = Vec<(String, RecordValue)>;

/// Derive the five Samba secrets records from a bundle.
pub fn to_records(bundle: &SecretsBundle) -> JoinResult<SecretsRecords> {
    let ads_domain = bundle.ads_domain.to_uppercase();
    let realm = bundle.dns_domain.to_uppercase();
    let salting_principal = format!(
        "host/{}.{}@{}",
        bundle.hostname.to_lowercase(),
        bundle.dns_domain,
        realm
    );

    Ok(vec![
        (
            format!("SECRETS/MACHINE_SEC_CHANNEL_TYPE/{ads_domain}"),
            RecordValue::Bytes(SEC_CHANNEL_WKSTA.to_le_bytes().to_vec()),
        ),
        (
            format!("SECRETS/MACHINE_PASSWORD/{ads_domain}"),
            RecordValue::Text(bundle.machine_password.clone()),
        ),
        (
            format!("SECRETS/SALTING_PRINCIPAL/DES/{realm}"),
            RecordValue::Text(salting_principal),
        ),
        (
            format!("SECRETS/SID/{ads_domain}"),
            RecordValue::Bytes(padded_sid(&bundle.domain_sid)?),
        ),
        (
            format!("SECRETS/SID/{}", bundle.hostname.to_uppercase()),
            RecordValue::Bytes(padded_sid(&bundle.machine_sid)?),
        ),
    ])
}

/// Structured serialization of the whole bundle, pretty-printed JSON.
pub fn to_structured(bundle: &SecretsBundle) -> JoinResult<String> {
    serde_json::to_string_pretty(bundle)
        .map_err(|e| JoinError::StoreWrite(std::io::Error::other(e)))
}

/// Encode a SID string and zero-pad it to the fixed record size.
fn padded_sid(sid_text: &str) -> JoinResult<Vec<u8>> {
    let binary = sid::encode(sid_text)?;
    let mut padded = vec![0u8; SID_RECORD_LEN];
    padded[..binary.len()].copy_from_slice(&binary);
    Ok(padded)
}
