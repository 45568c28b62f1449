//! Secrets extraction pipeline.
//!
//! Orchestrates the two-layer decryption in strict dependency order:
//! boot key (SYSTEM) → LSA encryption key (SECURITY, `PolEKList`) →
//! machine-account secret (SECURITY, `$MACHINE.ACC`). Any failed stage
//! aborts immediately with its tagged error; registry contents do not
//! change between attempts, so there is nothing to retry and no partial
//! bundle is ever returned.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::crypto;
use crate::error::{HiveKind, JoinError, JoinResult};
use crate::reader::{self, RegistryReader};

/// Byte range of the LSA encryption key inside the decrypted `PolEKList`
/// plaintext.
const LSA_KEY_START: usize = 68;
const LSA_KEY_END: usize = 100;

/// Fixed header and trailer stripped from the decrypted machine secret
/// before the UTF-16LE password decode.
const SECRET_FRAME_LEN: usize = 16;

/// Everything a credential store needs to act as this machine.
///
/// All fields are required; extraction fails rather than producing a
/// partial bundle. Carries the cleartext machine password, so `Debug`
/// redacts it — only the explicit serialization paths expose it.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct SecretsBundle {
    pub hostname: String,
    /// Short (NetBIOS-style) domain name.
    pub ads_domain: String,
    /// DNS domain, i.e. the Kerberos realm in lowercase.
    pub dns_domain: String,
    pub domain_sid: String,
    pub machine_sid: String,
    pub machine_password: String,
}

impl fmt::Debug for SecretsBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsBundle")
            .field("hostname", &self.hostname)
            .field("ads_domain", &self.ads_domain)
            .field("dns_domain", &self.dns_domain)
            .field("domain_sid", &self.domain_sid)
            .field("machine_sid", &self.machine_sid)
            .field("machine_password", &"<redacted>")
            .finish()
    }
}

/// Recover the machine-account secrets through the given registry reader.
pub fn extract<R: RegistryReader>(reader: &R) -> JoinResult<SecretsBundle> {
    // 1. Joined DNS domain and hostname.
    let host_domain = reader
        .host_domain_record()?
        .filter(|record| !record.domain.is_empty())
        .ok_or(JoinError::NotDomainJoined)?;
    info!(
        "host '{}' is joined to DNS domain '{}'",
        host_domain.hostname, host_domain.domain
    );

    // 2. Domain SID and short domain name.
    let domain = reader
        .domain_sid_record()?
        .ok_or(JoinError::DomainSidMissing)?;
    info!(
        "primary domain '{}' with SID {}",
        domain.domain_name, domain.domain_sid
    );

    // 3. Local machine SID.
    let machine_sid = reader
        .local_sid_record()?
        .ok_or(JoinError::MachineSidMissing)?;
    info!("machine SID {machine_sid}");

    // 4. Boot key; everything downstream is encrypted under it.
    let boot_key = reader
        .boot_key()?
        .ok_or_else(|| JoinError::BootKeyMissing("Lsa class-name material absent".into()))?;
    info!("boot key reconstructed");

    // 5. LSA encryption key, protected by the boot key.
    let lsa_key = extract_lsa_key(reader, &boot_key)?;
    info!("LSA encryption key recovered");

    // 6–7. Machine-account secret, protected by the LSA key.
    let machine_password = extract_machine_password(reader, &lsa_key)?;
    info!("machine account password recovered");

    // 8. Assemble; every field present by construction.
    Ok(SecretsBundle {
        hostname: host_domain.hostname,
        ads_domain: domain.domain_name,
        dns_domain: host_domain.domain,
        domain_sid: domain.domain_sid,
        machine_sid,
        machine_password,
    })
}

/// Decrypt `PolEKList` with the boot key and slice out the 32-byte LSA key.
fn extract_lsa_key<R: RegistryReader>(reader: &R, boot_key: &[u8; 16]) -> JoinResult<[u8; 32]> {
    let blob = reader
        .raw_value(HiveKind::Security, reader::LSA_ENCRYPTION_KEY_PATH)?
        .ok_or_else(|| {
            JoinError::LsaKeyExtractionFailed(format!(
                "{} not present in SECURITY hive",
                reader::LSA_ENCRYPTION_KEY_PATH
            ))
        })?;
    debug!("PolEKList blob is {} bytes", blob.len());

    let plaintext = crypto::decrypt_secret(&blob, boot_key)?;
    if plaintext.len() < LSA_KEY_END {
        return Err(JoinError::LsaKeyExtractionFailed(format!(
            "decrypted PolEKList is {} bytes, need at least {}",
            plaintext.len(),
            LSA_KEY_END
        )));
    }

    let mut lsa_key = [0u8; 32];
    lsa_key.copy_from_slice(&plaintext[LSA_KEY_START..LSA_KEY_END]);
    Ok(lsa_key)
}

/// Decrypt `$MACHINE.ACC` with the LSA key and decode the password text.
fn extract_machine_password<R: RegistryReader>(
    reader: &R,
    lsa_key: &[u8; 32],
) -> JoinResult<String> {
    let blob = reader
        .raw_value(HiveKind::Security, reader::MACHINE_ACCOUNT_SECRET_PATH)?
        .ok_or(JoinError::MachineAccountSecretNotFound)?;
    debug!("$MACHINE.ACC blob is {} bytes", blob.len());

    let plaintext = crypto::decrypt_secret(&blob, lsa_key)?;
    decode_machine_password(&plaintext)
}

/// Strip the fixed 16-byte header and trailer and decode the remainder as
/// UTF-16LE text.
fn decode_machine_password(plaintext: &[u8]) -> JoinResult<String> {
    if plaintext.len() <= 2 * SECRET_FRAME_LEN {
        return Err(JoinError::MachinePasswordDecodeFailed(format!(
            "decrypted secret is {} bytes, nothing left after framing",
            plaintext.len()
        )));
    }

    let body = &plaintext[SECRET_FRAME_LEN..plaintext.len() - SECRET_FRAME_LEN];
    if body.len() % 2 != 0 {
        return Err(JoinError::MachinePasswordDecodeFailed(format!(
            "password body is {} bytes, not an even UTF-16 length",
            body.len()
        )));
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| JoinError::MachinePasswordDecodeFailed("invalid UTF-16 sequence".into()))
}
