//! Security identifier text/binary conversion.
//!
//! Binary layout (the one Windows and Samba share):
//! ```text
//! +0  revision (1 byte)
//! +1  sub-authority count (1 byte)
//! +2  identifier authority (6 bytes, big-endian)
//! +8  sub-authorities (count × u32, little-endian)
//! ```
//!
//! [`encode`] only accepts machine/domain SIDs of the exact shape
//! `S-1-5-<a>-<b>-<c>-<d>` — four sub-authorities under the NT authority.
//! Deeper SIDs (per-user RIDs, well-known aliases) are out of scope here;
//! [`decode`] is more lenient because the hives store SIDs of any depth.

use crate::error::{JoinError, JoinResult};

/// Encoded machine SID length: 8-byte header + 4 sub-authorities.
pub const BINARY_SID_LEN: usize = 24;

/// Fixed header for a 4-sub-authority NT-authority SID:
/// revision 1, count 4, authority 5.
const NT_SID_HEADER: [u8; 8] = [0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05];

fn invalid(sid: &str, reason: &str) -> JoinError {
    JoinError::InvalidSidFormat {
        sid: sid.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Encode a `S-1-5-<a>-<b>-<c>-<d>` SID string into its 24-byte binary form.
pub fn encode(sid: &str) -> JoinResult<[u8; BINARY_SID_LEN]> {
    let fields: Vec<&str> = sid.split('-').collect();

    if fields.len() != 7 {
        return Err(invalid(sid, "expected exactly 7 dash-separated fields"));
    }
    if fields[0] != "S" {
        return Err(invalid(sid, "missing 'S' prefix"));
    }
    if fields[1] != "1" {
        return Err(invalid(sid, "unsupported SID revision, expected 1"));
    }
    if fields[2] != "5" {
        return Err(invalid(sid, "identifier authority is not NT (5)"));
    }

    let mut binary = [0u8; BINARY_SID_LEN];
    binary[..8].copy_from_slice(&NT_SID_HEADER);
    for (i, field) in fields[3..].iter().enumerate() {
        let sub: u32 = field
            .parse()
            .map_err(|_| invalid(sid, "sub-authority is not an unsigned 32-bit integer"))?;
        binary[8 + 4 * i..8 + 4 * (i + 1)].copy_from_slice(&sub.to_le_bytes());
    }

    Ok(binary)
}

/// Decode a binary SID of any sub-authority depth into its textual form.
///
/// Used by the registry reader to render `PolPrDmS` and SAM SIDs; accepts
/// more shapes than [`encode`] because hives store SIDs of arbitrary depth.
pub fn decode(binary: &[u8]) -> JoinResult<String> {
    let fail = |reason: &str| JoinError::InvalidSidFormat {
        sid: hex::encode(binary),
        reason: reason.to_owned(),
    };

    if binary.len() < 8 {
        return Err(fail("binary SID shorter than its 8-byte header"));
    }

    let revision = binary[0];
    let count = binary[1] as usize;
    if binary.len() < 8 + 4 * count {
        return Err(fail("binary SID truncated before its last sub-authority"));
    }

    // 48-bit big-endian identifier authority
    let mut authority: u64 = 0;
    for &b in &binary[2..8] {
        authority = (authority << 8) | u64::from(b);
    }

    let mut text = format!("S-{revision}-{authority}");
    for i in 0..count {
        let chunk: [u8; 4] = binary[8 + 4 * i..8 + 4 * (i + 1)]
            .try_into()
            .map_err(|_| fail("sub-authority slice is not 4 bytes"))?;
        text.push('-');
        text.push_str(&u32::from_le_bytes(chunk).to_string());
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encodes_known_sid() {
        let binary = encode("S-1-5-21-1004336348-1177238915-682003330").unwrap();
        assert_eq!(&binary[..8], &[0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05]);
        assert_eq!(&binary[8..12], &21u32.to_le_bytes());
        assert_eq!(&binary[12..16], &1004336348u32.to_le_bytes());
        assert_eq!(&binary[16..20], &1177238915u32.to_le_bytes());
        assert_eq!(&binary[20..24], &682003330u32.to_le_bytes());
    }

    #[test]
    fn rejects_wrong_authority() {
        let err = encode("S-1-2-3-4-5-6").unwrap_err();
        match err {
            JoinError::InvalidSidFormat { reason, .. } => {
                assert!(reason.contains("authority"), "got reason: {reason}");
            }
            other => panic!("expected InvalidSidFormat, got {other:?}"),
        }
    }

    #[test]
    fn rejects_too_many_fields() {
        let err = encode("S-1-5-21-1-2-3-4").unwrap_err();
        match err {
            JoinError::InvalidSidFormat { reason, .. } => {
                assert!(reason.contains("7"), "got reason: {reason}");
            }
            other => panic!("expected InvalidSidFormat, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_prefix_and_revision() {
        assert!(encode("X-1-5-1-2-3-4").is_err());
        assert!(encode("S-2-5-1-2-3-4").is_err());
        assert!(encode("S-1-5-1-2-3-abc").is_err());
        assert!(encode("S-1-5-1-2-3-4294967296").is_err()); // > u32::MAX
    }

    #[test]
    fn decodes_deeper_sid() {
        // Machine SID plus a RID, 5 sub-authorities.
        let mut binary = vec![0x01, 0x05, 0, 0, 0, 0, 0, 0x05];
        for sub in [21u32, 1, 2, 3, 500] {
            binary.extend_from_slice(&sub.to_le_bytes());
        }
        assert_eq!(decode(&binary).unwrap(), "S-1-5-21-1-2-3-500");
    }

    #[test]
    fn decode_rejects_truncated() {
        assert!(decode(&[0x01, 0x04, 0, 0]).is_err());
        // Header claims 4 sub-authorities but only 2 are present.
        let mut binary = vec![0x01, 0x04, 0, 0, 0, 0, 0, 0x05];
        binary.extend_from_slice(&[0u8; 8]);
        assert!(decode(&binary).is_err());
    }

    proptest! {
        #[test]
        fn encode_roundtrips_any_machine_sid(
            a in any::<u32>(),
            b in any::<u32>(),
            c in any::<u32>(),
            d in any::<u32>(),
        ) {
            let text = format!("S-1-5-{a}-{b}-{c}-{d}");
            let binary = encode(&text).unwrap();
            prop_assert_eq!(binary.len(), BINARY_SID_LEN);
            prop_assert_eq!(u32::from_le_bytes(binary[8..12].try_into().unwrap()), a);
            prop_assert_eq!(u32::from_le_bytes(binary[12..16].try_into().unwrap()), b);
            prop_assert_eq!(u32::from_le_bytes(binary[16..20].try_into().unwrap()), c);
            prop_assert_eq!(u32::from_le_bytes(binary[20..24].try_into().unwrap()), d);
            prop_assert_eq!(decode(&binary).unwrap(), text);
        }
    }
}
