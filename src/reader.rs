//! Registry hive access for the SYSTEM, SECURITY and SAM hives.
//!
//! The extraction pipeline only consumes the [`RegistryReader`] capability;
//! [`HiveSet`] is the shipped implementation, backed by the `nt_hive` crate
//! reading the on-disk `regf` format. Any other backing (a live registry,
//! a memory image) can stand in by implementing the trait.
//!
//! Everything here is read-only: hive buffers are loaded once at open and
//! dropped with the set.

use std::fs;
use std::path::Path;

use nt_hive::{Hive, NtHiveError};
use tracing::{debug, info, warn};

use crate::error::{HiveKind, JoinError, JoinResult};
use crate::sid;

/// Fixed SECURITY-hive path of the encrypted LSA encryption key.
pub const LSA_ENCRYPTION_KEY_PATH: &str = "Policy\\PolEKList";

/// Fixed SECURITY-hive path of the encrypted machine-account secret.
pub const MACHINE_ACCOUNT_SECRET_PATH: &str = "Policy\\Secrets\\$MACHINE.ACC\\CurrVal";

/// SECURITY-hive values naming the primary (joined) domain.
const PRIMARY_DOMAIN_NAME_PATH: &str = "Policy\\PolPrDmN";
const PRIMARY_DOMAIN_SID_PATH: &str = "Policy\\PolPrDmS";

/// SAM key whose "V" value ends with the local machine SID.
const SAM_ACCOUNT_PATH: &str = "SAM\\Domains\\Account";

/// Lsa subkeys whose class names form the raw boot key material.
const BOOT_KEY_CLASS_KEYS: [&str; 4] = ["JD", "Skew1", "GBG", "Data"];

/// The fixed descrambling permutation applied to the raw class-name bytes
/// to produce the boot key.
const BOOT_KEY_PERMUTATION: [usize; 16] = [
    0x08, 0x05, 0x04, 0x02, 0x0B, 0x09, 0x0D, 0x03,
    0x00, 0x06, 0x01, 0x0C, 0x0E, 0x0A, 0x0F, 0x07,
];

/// Hostname and joined DNS domain from the SYSTEM hive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDomainRecord {
    pub hostname: String,
    /// Empty when the machine is not joined to a domain.
    pub domain: String,
}

/// Short domain name and domain SID from the SECURITY hive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSidRecord {
    pub domain_name: String,
    pub domain_sid: String,
}

/// Capability surface the extractor consumes. `Ok(None)` is the distinct
/// "key absent" signal everywhere; `Err` means the hive itself misbehaved.
pub trait RegistryReader {
    fn host_domain_record(&self) -> JoinResult<Option<HostDomainRecord>>;
    fn domain_sid_record(&self) -> JoinResult<Option<DomainSidRecord>>;
    fn local_sid_record(&self) -> JoinResult<Option<String>>;
    fn boot_key(&self) -> JoinResult<Option<[u8; 16]>>;
    fn raw_value(&self, hive: HiveKind, path: &str) -> JoinResult<Option<Vec<u8>>>;
}

// ── Hive files ───────────────────────────────────────────────────────

#[derive(Debug)]
struct HiveFile {
    kind: HiveKind,
    data: Vec<u8>,
    /// Header validation relaxed (fast-startup dirty hive).
    relaxed: bool,
}

impl HiveFile {
    fn open(kind: HiveKind, path: &Path) -> JoinResult<Self> {
        let data = fs::read(path).map_err(|source| JoinError::HiveUnreadable {
            hive: kind,
            path: path.to_owned(),
            source,
        })?;

        // Probe the header now so an unusable hive surfaces at open time,
        // not halfway through extraction. A hive left dirty by Windows
        // fast-startup has its primary sequence number one ahead; it is
        // still readable with validation relaxed.
        let relaxed = match Hive::new(data.as_slice()) {
            Ok(_) => false,
            Err(NtHiveError::SequenceNumberMismatch { primary, secondary })
                if primary == secondary + 1 =>
            {
                warn!("{kind} hive is dirty (fast startup), relaxing header validation");
                true
            }
            Err(err) => {
                return Err(JoinError::RegistryRead {
                    hive: kind,
                    msg: err.to_string(),
                })
            }
        };

        info!("found {kind} hive file at '{}'", path.display());
        Ok(HiveFile { kind, data, relaxed })
    }

    fn read_err(&self, msg: impl ToString) -> JoinError {
        JoinError::RegistryRead {
            hive: self.kind,
            msg: msg.to_string(),
        }
    }

    fn hive(&self) -> JoinResult<Hive<&[u8]>> {
        let result = if self.relaxed {
            Hive::without_validation(self.data.as_slice())
        } else {
            Hive::new(self.data.as_slice())
        };
        result.map_err(|e| self.read_err(e))
    }

    /// Raw data of a named value under `key_path`, or `None` if the key or
    /// value does not exist. The empty name addresses the default value.
    fn value_of(&self, key_path: &str, value_name: &str) -> JoinResult<Option<Vec<u8>>> {
        let hive = self.hive()?;
        let root = hive.root_key_node().map_err(|e| self.read_err(e))?;
        let key = match root.subpath(key_path) {
            None => return Ok(None),
            Some(key) => key.map_err(|e| self.read_err(e))?,
        };
        let value = match key.value(value_name) {
            None => return Ok(None),
            Some(value) => value.map_err(|e| self.read_err(e))?,
        };
        let data = value
            .data()
            .map_err(|e| self.read_err(e))?
            .into_vec()
            .map_err(|e| self.read_err(e))?;
        Ok(Some(data))
    }

    /// Class name of the key at `key_path`, or `None` if absent.
    ///
    /// nt-hive 0.2 exposes keys and values but not key class names, which
    /// is where the boot-key material hides, so these are read straight
    /// from the NK cells.
    fn class_name_of(&self, key_path: &str) -> JoinResult<Option<String>> {
        read_class_name(&self.data, key_path).map_err(|msg| self.read_err(msg))
    }
}

// ── Raw NK-cell access ───────────────────────────────────────────────
//
// Cell field offsets are relative to the cell content, i.e. the 2-byte
// "nk" signature that follows the 4-byte cell size header. Cell offsets
// stored in fields are relative to the start of the hive data area.

/// The hive data area begins after the 4096-byte base block.
const HIVE_DATA_OFFSET: usize = 4096;
/// Root cell offset field inside the base block.
const ROOT_CELL_FIELD: usize = 0x24;
/// Marker for "no cell" in offset fields.
const NO_CELL: u32 = 0xFFFF_FFFF;

const NK_FLAGS: usize = 2;
const NK_SUBKEY_COUNT: usize = 20;
const NK_SUBKEY_LIST: usize = 28;
const NK_CLASS_NAME_OFFSET: usize = 48;
const NK_NAME_LENGTH: usize = 72;
const NK_CLASS_NAME_LENGTH: usize = 74;
const NK_NAME_START: usize = 76;

/// NK flag: the key name is stored as ASCII, not UTF-16LE.
const KEY_COMP_NAME: u16 = 0x0020;

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, String> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| format!("cell truncated at offset {offset}"))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, String> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| format!("cell truncated at offset {offset}"))
}

/// Content of the allocated cell at `offset`, without its size header.
/// Allocated cells carry a negative size whose absolute value includes
/// the 4-byte header itself.
fn cell_content(data: &[u8], offset: u32) -> Result<&[u8], String> {
    let start = HIVE_DATA_OFFSET + offset as usize;
    let size = i32::from_le_bytes(
        data.get(start..start + 4)
            .ok_or_else(|| format!("cell offset {offset:#x} out of range"))?
            .try_into()
            .unwrap(),
    );
    if size >= 0 {
        return Err(format!("cell at {offset:#x} is not allocated"));
    }
    let len = size.unsigned_abs() as usize;
    if len < 4 {
        return Err(format!("cell at {offset:#x} has impossible size {len}"));
    }
    data.get(start + 4..start + len)
        .ok_or_else(|| format!("cell at {offset:#x} extends past the hive"))
}

/// Content of the NK cell at `offset`, with its signature checked.
fn nk_content(data: &[u8], offset: u32) -> Result<&[u8], String> {
    let cell = cell_content(data, offset)?;
    if cell.get(..2) != Some(b"nk".as_slice()) {
        return Err(format!("cell at {offset:#x} is not a key node"));
    }
    Ok(cell)
}

/// Name of the key whose NK cell sits at `offset`.
fn key_name(data: &[u8], offset: u32) -> Result<String, String> {
    let cell = nk_content(data, offset)?;
    let flags = read_u16(cell, NK_FLAGS)?;
    let name_len = read_u16(cell, NK_NAME_LENGTH)? as usize;
    let name = cell
        .get(NK_NAME_START..NK_NAME_START + name_len)
        .ok_or_else(|| format!("key name at {offset:#x} extends past its cell"))?;
    if flags & KEY_COMP_NAME != 0 {
        Ok(String::from_utf8_lossy(name).into_owned())
    } else {
        Ok(utf16le_string(name))
    }
}

/// Search a subkey list cell (lf/lh/li/ri) for `name`, case-insensitively.
fn find_in_subkey_list(data: &[u8], list_offset: u32, name: &str) -> Result<Option<u32>, String> {
    let cell = cell_content(data, list_offset)?;
    let signature = cell
        .get(..2)
        .ok_or_else(|| format!("subkey list at {list_offset:#x} too short"))?;
    let count = read_u16(cell, 2)? as usize;

    match signature {
        // Fast/hash leaves: 8-byte entries of cell offset + name hint.
        b"lf" | b"lh" => {
            for i in 0..count {
                let nk_offset = read_u32(cell, 4 + 8 * i)?;
                if key_name(data, nk_offset)?.eq_ignore_ascii_case(name) {
                    return Ok(Some(nk_offset));
                }
            }
        }
        // Leaf index: bare 4-byte cell offsets.
        b"li" => {
            for i in 0..count {
                let nk_offset = read_u32(cell, 4 + 4 * i)?;
                if key_name(data, nk_offset)?.eq_ignore_ascii_case(name) {
                    return Ok(Some(nk_offset));
                }
            }
        }
        // Index root: points at further list cells.
        b"ri" => {
            for i in 0..count {
                let sublist = read_u32(cell, 4 + 4 * i)?;
                if let Some(found) = find_in_subkey_list(data, sublist, name)? {
                    return Ok(Some(found));
                }
            }
        }
        other => {
            return Err(format!(
                "unknown subkey list signature {other:02x?} at {list_offset:#x}"
            ))
        }
    }
    Ok(None)
}

/// NK cell offset of the named direct subkey of the key at `nk_offset`.
fn find_subkey(data: &[u8], nk_offset: u32, name: &str) -> Result<Option<u32>, String> {
    let cell = nk_content(data, nk_offset)?;
    let count = read_u32(cell, NK_SUBKEY_COUNT)?;
    let list_offset = read_u32(cell, NK_SUBKEY_LIST)?;
    if count == 0 || list_offset == NO_CELL {
        return Ok(None);
    }
    find_in_subkey_list(data, list_offset, name)
}

/// Walk `key_path` down from the root key and return the class name of
/// the key it ends at. `None` when a path component or the class name is
/// absent; `Err` only for structural damage.
fn read_class_name(data: &[u8], key_path: &str) -> Result<Option<String>, String> {
    if data.len() < HIVE_DATA_OFFSET {
        return Err("hive is shorter than its base block".into());
    }
    let mut nk_offset = read_u32(data, ROOT_CELL_FIELD)?;
    for part in key_path.split('\\') {
        nk_offset = match find_subkey(data, nk_offset, part)? {
            Some(offset) => offset,
            None => return Ok(None),
        };
    }

    let cell = nk_content(data, nk_offset)?;
    let class_offset = read_u32(cell, NK_CLASS_NAME_OFFSET)?;
    let class_len = read_u16(cell, NK_CLASS_NAME_LENGTH)? as usize;
    if class_offset == NO_CELL || class_len == 0 {
        return Ok(None);
    }

    let class_cell = cell_content(data, class_offset)?;
    let class_bytes = class_cell
        .get(..class_len)
        .ok_or_else(|| format!("class name at {class_offset:#x} extends past its cell"))?;
    Ok(Some(utf16le_string(class_bytes)))
}

/// The three opened hive files of one Windows installation.
#[derive(Debug)]
pub struct HiveSet {
    system: HiveFile,
    security: HiveFile,
    sam: HiveFile,
}

impl HiveSet {
    /// Open `SYSTEM`, `SECURITY` and `SAM` under `dir`, probing each in
    /// order. Each missing or unreadable file fails with its own
    /// [`JoinError::HiveUnreadable`] identity.
    pub fn open(dir: &Path) -> JoinResult<Self> {
        Ok(HiveSet {
            system: HiveFile::open(HiveKind::System, &dir.join("SYSTEM"))?,
            security: HiveFile::open(HiveKind::Security, &dir.join("SECURITY"))?,
            sam: HiveFile::open(HiveKind::Sam, &dir.join("SAM"))?,
        })
    }

    fn file(&self, kind: HiveKind) -> &HiveFile {
        match kind {
            HiveKind::System => &self.system,
            HiveKind::Security => &self.security,
            HiveKind::Sam => &self.sam,
        }
    }

    /// Current control set number from `Select\Current`.
    fn current_control_set(&self) -> JoinResult<u32> {
        let data = self
            .system
            .value_of("Select", "Current")?
            .ok_or_else(|| self.system.read_err("Select\\Current value not found"))?;
        if data.len() < 4 {
            return Err(self.system.read_err("Select\\Current value too short"));
        }
        let control_set = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if control_set == 0 || control_set > 3 {
            return Err(self
                .system
                .read_err(format!("invalid control set number: {control_set}")));
        }
        Ok(control_set)
    }
}

impl RegistryReader for HiveSet {
    fn host_domain_record(&self) -> JoinResult<Option<HostDomainRecord>> {
        let control_set = self.current_control_set()?;
        let params = format!("ControlSet{control_set:03}\\Services\\Tcpip\\Parameters");
        debug!("reading hostname/domain from {params}");

        let hostname = match self.system.value_of(&params, "Hostname")? {
            None => return Ok(None),
            Some(data) => utf16le_string(&data),
        };
        let domain = self
            .system
            .value_of(&params, "Domain")?
            .map(|data| utf16le_string(&data))
            .unwrap_or_default();

        Ok(Some(HostDomainRecord { hostname, domain }))
    }

    fn domain_sid_record(&self) -> JoinResult<Option<DomainSidRecord>> {
        let name = match self.security.value_of(PRIMARY_DOMAIN_NAME_PATH, "")? {
            None => return Ok(None),
            Some(data) => utf16le_string(&data),
        };
        let sid_bytes = match self.security.value_of(PRIMARY_DOMAIN_SID_PATH, "")? {
            None => return Ok(None),
            Some(data) => data,
        };
        let domain_sid = sid::decode(&sid_bytes)?;
        debug!("primary domain '{name}' has SID {domain_sid}");

        Ok(Some(DomainSidRecord {
            domain_name: name,
            domain_sid,
        }))
    }

    fn local_sid_record(&self) -> JoinResult<Option<String>> {
        let v_value = match self.sam.value_of(SAM_ACCOUNT_PATH, "V")? {
            None => return Ok(None),
            Some(data) => data,
        };
        if v_value.len() < 12 {
            return Err(self.sam.read_err("Account\\V value too short to hold a SID"));
        }

        // The machine SID's three sub-authorities are the last 12 bytes.
        let tail = &v_value[v_value.len() - 12..];
        let mut machine_sid = String::from("S-1-5-21");
        for chunk in tail.chunks_exact(4) {
            let sub = u32::from_le_bytes(chunk.try_into().unwrap());
            machine_sid.push('-');
            machine_sid.push_str(&sub.to_string());
        }
        debug!("local machine SID is {machine_sid}");
        Ok(Some(machine_sid))
    }

    fn boot_key(&self) -> JoinResult<Option<[u8; 16]>> {
        let control_set = self.current_control_set()?;
        let mut raw_key = Vec::with_capacity(16);

        for name in &BOOT_KEY_CLASS_KEYS {
            let path = format!("ControlSet{control_set:03}\\Control\\Lsa\\{name}");
            let class_name = match self.system.class_name_of(&path)? {
                None => {
                    debug!("boot key fragment '{name}' absent");
                    return Ok(None);
                }
                Some(class_name) => class_name,
            };
            // Class names are hex-encoded key material.
            let fragment = hex::decode(class_name.trim()).map_err(|e| {
                JoinError::BootKeyMissing(format!("class name of '{name}' is not hex: {e}"))
            })?;
            raw_key.extend_from_slice(&fragment);
        }

        if raw_key.len() < 16 {
            return Err(JoinError::BootKeyMissing(format!(
                "class names yielded {} bytes of key material, need 16",
                raw_key.len()
            )));
        }

        let mut boot_key = [0u8; 16];
        for (i, &scrambled) in BOOT_KEY_PERMUTATION.iter().enumerate() {
            boot_key[i] = raw_key[scrambled];
        }
        debug!("boot key reconstructed from ControlSet{control_set:03}");
        Ok(Some(boot_key))
    }

    fn raw_value(&self, hive: HiveKind, path: &str) -> JoinResult<Option<Vec<u8>>> {
        self.file(hive).value_of(path, "")
    }
}

/// Decode UTF-16LE registry data, stopping at the first NUL.
fn utf16le_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
