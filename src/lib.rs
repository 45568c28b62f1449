//! hivejoin: recover Active Directory machine-account secrets from the
//! registry hives of an offline Windows installation.
//!
//! A domain-joined Windows machine keeps everything a Samba member server
//! needs — machine password, domain SIDs, realm — inside the SYSTEM,
//! SECURITY and SAM hives, protected by two layers of LSA encryption
//! (boot key, then LSA encryption key). This crate walks that chain:
//!
//! 1. [`reader`] pulls the boot key and the encrypted blobs out of the hives.
//! 2. [`crypto`] implements the Vista-era KDF + AES-256-ECB secret decryption.
//! 3. [`extract`] orchestrates the two decryption layers into a
//!    [`SecretsBundle`].
//! 4. [`encode`] / [`store`] republish the bundle as Samba-compatible
//!    key/value records or as a JSON file.
//!
//! No live join protocol (LDAP/Kerberos) is performed; the secrets are
//! already on disk, this crate only re-encodes them.

pub mod crypto;
pub mod encode;
pub mod error;
pub mod extract;
pub mod reader;
pub mod sid;
pub mod store;

pub use error::{JoinError, JoinResult};
pub use extract::{extract, SecretsBundle};
pub use reader::{HiveSet, RegistryReader};
