//! Error taxonomy for the extraction pipeline.
//!
//! Every stage fails fast with a tagged variant carrying enough context
//! (hive, registry path, offset expectation) to diagnose the hive without
//! re-running. The CLI maps each variant to a distinct exit code.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which of the three hive files an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiveKind {
    System,
    Security,
    Sam,
}

impl fmt::Display for HiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HiveKind::System => write!(f, "SYSTEM"),
            HiveKind::Security => write!(f, "SECURITY"),
            HiveKind::Sam => write!(f, "SAM"),
        }
    }
}

/// Errors that can occur while recovering the machine-account secrets.
#[derive(Debug, Error)]
pub enum JoinError {
    /// A hive file could not be opened or read.
    #[error("{hive} hive file unreadable at '{path}': {source}")]
    HiveUnreadable {
        hive: HiveKind,
        path: PathBuf,
        source: std::io::Error,
    },

    /// The SYSTEM hive carries no joined DNS domain.
    #[error("machine is not joined to a domain (no Domain value under Tcpip\\Parameters)")]
    NotDomainJoined,

    /// No primary domain SID in the SECURITY hive.
    #[error("domain SID not present in SECURITY hive (Policy\\PolPrDmS)")]
    DomainSidMissing,

    /// No local machine SID in the SAM hive.
    #[error("machine SID not present in SAM hive (SAM\\Domains\\Account)")]
    MachineSidMissing,

    /// The boot key could not be reconstructed from the SYSTEM hive.
    /// Fatal: everything downstream is encrypted under it.
    #[error("boot key missing from SYSTEM hive: {0}")]
    BootKeyMissing(String),

    /// An LSA secret blob is too short to carry a salt and ciphertext.
    #[error("malformed LSA secret blob: {len} bytes, need at least 60")]
    MalformedBlob { len: usize },

    /// Ciphertext length is not a whole number of AES blocks.
    #[error("malformed ciphertext: {len} bytes is not a multiple of the 16-byte block size")]
    MalformedCiphertext { len: usize },

    /// Decrypting Policy\PolEKList did not yield a usable LSA key.
    #[error("LSA encryption key extraction failed: {0}")]
    LsaKeyExtractionFailed(String),

    /// Policy\Secrets\$MACHINE.ACC is absent. Expected on machines that
    /// were never domain-joined; distinct from a missing boot key.
    #[error("machine account secret not found (Policy\\Secrets\\$MACHINE.ACC)")]
    MachineAccountSecretNotFound,

    /// The decrypted machine secret did not decode as UTF-16LE text.
    #[error("machine password decode failed: {0}")]
    MachinePasswordDecodeFailed(String),

    /// A SID string did not match the `S-1-5-<a>-<b>-<c>-<d>` shape.
    #[error("invalid SID '{sid}': {reason}")]
    InvalidSidFormat { sid: String, reason: String },

    /// A hive opened fine but its internal structure could not be parsed.
    #[error("registry read error in {hive} hive: {msg}")]
    RegistryRead { hive: HiveKind, msg: String },

    /// Writing to the destination store failed.
    #[error("secrets store write failed: {0}")]
    StoreWrite(#[from] std::io::Error),
}

impl JoinError {
    /// Distinct process exit code for each failure.
    ///
    /// Exit statuses are 8-bit on POSIX, so the codes live in the 101..=121
    /// range rather than the HTTP-flavored 4xx range.
    pub fn exit_code(&self) -> u8 {
        match self {
            JoinError::HiveUnreadable { hive: HiveKind::System, .. } => 101,
            JoinError::HiveUnreadable { hive: HiveKind::Security, .. } => 102,
            JoinError::HiveUnreadable { hive: HiveKind::Sam, .. } => 103,
            JoinError::NotDomainJoined => 110,
            JoinError::DomainSidMissing => 111,
            JoinError::MachineSidMissing => 112,
            JoinError::BootKeyMissing(_) => 113,
            JoinError::MalformedBlob { .. } => 114,
            JoinError::MalformedCiphertext { .. } => 115,
            JoinError::LsaKeyExtractionFailed(_) => 116,
            JoinError::MachineAccountSecretNotFound => 117,
            JoinError::MachinePasswordDecodeFailed(_) => 118,
            JoinError::InvalidSidFormat { .. } => 119,
            JoinError::RegistryRead { .. } => 120,
            JoinError::StoreWrite(_) => 121,
        }
    }
}

/// Result type for the extraction pipeline.
pub type JoinResult<T> = Result<T, JoinError>;
