use crate::error::CfbError;
use crate::{le_u16, le_u32, le_u64, SectorSize, DIRECTORY_ENTRY_LEN, ENDOFCHAIN, NOSTREAM};

const NAME_BUFFER_LEN: usize = 64;
/// Longest name in UTF-16 code units, excluding the terminator.
const MAX_NAME_UNITS: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Unallocated,
    Storage,
    Stream,
    Root,
}

impl ObjectType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ObjectType::Unallocated),
            1 => Some(ObjectType::Storage),
            2 => Some(ObjectType::Stream),
            5 => Some(ObjectType::Root),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            ObjectType::Unallocated => 0,
            ObjectType::Storage => 1,
            ObjectType::Stream => 2,
            ObjectType::Root => 5,
        }
    }
}

/// Node color in a storage's red-black sibling tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Black,
}

/// One 128-byte directory record.
///
/// Sibling and child links are directory indices, or [`NOSTREAM`] when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub object_type: ObjectType,
    pub color: Color,
    pub left_sibling: u32,
    pub right_sibling: u32,
    pub child: u32,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    pub created: u64,
    pub modified: u64,
    pub start_sector: u32,
    pub size: u64,
}

impl DirectoryEntry {
    pub(crate) fn new(name: &str, object_type: ObjectType) -> Self {
        Self {
            name: name.to_string(),
            object_type,
            color: Color::Black,
            left_sibling: NOSTREAM,
            right_sibling: NOSTREAM,
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_sector: ENDOFCHAIN,
            size: 0,
        }
    }

    /// A free directory slot: no name, no links.
    pub fn unallocated() -> Self {
        Self {
            color: Color::Red,
            start_sector: 0,
            ..Self::new("", ObjectType::Unallocated)
        }
    }

    pub fn is_stream(&self) -> bool {
        self.object_type == ObjectType::Stream
    }

    /// Storages and the root entry can have children.
    pub fn is_storage(&self) -> bool {
        matches!(self.object_type, ObjectType::Storage | ObjectType::Root)
    }

    pub(crate) fn decode(
        record: &[u8],
        index: usize,
        sector_size: SectorSize,
    ) -> Result<Self, CfbError> {
        debug_assert_eq!(record.len(), DIRECTORY_ENTRY_LEN);

        // Some writers fill unused slots with 0xFF instead of unallocated records.
        if record.iter().all(|byte| *byte == 0xFF) {
            return Ok(Self::unallocated());
        }

        let type_byte = record[66];
        let object_type = ObjectType::from_byte(type_byte).ok_or_else(|| {
            CfbError::InvalidDirectory(format!("entry {index} has object type {type_byte}"))
        })?;

        let name = if object_type == ObjectType::Unallocated {
            String::new()
        } else {
            decode_name(record, index)?
        };

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&record[80..96]);

        let mut size = le_u64(record, 120);
        if sector_size == SectorSize::Legacy512 {
            // Version 3 writers may leave garbage in the high half.
            size &= u64::from(u32::MAX);
        }

        Ok(Self {
            name,
            object_type,
            color: if record[67] == 0 {
                Color::Red
            } else {
                Color::Black
            },
            left_sibling: le_u32(record, 68),
            right_sibling: le_u32(record, 72),
            child: le_u32(record, 76),
            clsid,
            state_bits: le_u32(record, 96),
            created: le_u64(record, 100),
            modified: le_u64(record, 108),
            start_sector: le_u32(record, 116),
            size,
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), CfbError> {
        let mut record = [0u8; DIRECTORY_ENTRY_LEN];

        let units: Vec<u16> = self.name.encode_utf16().collect();
        if units.len() > MAX_NAME_UNITS {
            return Err(CfbError::InvalidName {
                name: self.name.clone(),
                reason: "longer than 31 UTF-16 code units",
            });
        }
        for (slot, unit) in units.iter().enumerate() {
            record[slot * 2..slot * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        let name_len = if self.object_type == ObjectType::Unallocated {
            0
        } else {
            (units.len() as u16 + 1) * 2
        };
        record[64..66].copy_from_slice(&name_len.to_le_bytes());

        record[66] = self.object_type.to_byte();
        record[67] = match self.color {
            Color::Red => 0,
            Color::Black => 1,
        };
        record[68..72].copy_from_slice(&self.left_sibling.to_le_bytes());
        record[72..76].copy_from_slice(&self.right_sibling.to_le_bytes());
        record[76..80].copy_from_slice(&self.child.to_le_bytes());
        record[80..96].copy_from_slice(&self.clsid);
        record[96..100].copy_from_slice(&self.state_bits.to_le_bytes());
        record[100..108].copy_from_slice(&self.created.to_le_bytes());
        record[108..116].copy_from_slice(&self.modified.to_le_bytes());
        record[116..120].copy_from_slice(&self.start_sector.to_le_bytes());
        record[120..128].copy_from_slice(&self.size.to_le_bytes());

        out.extend_from_slice(&record);
        Ok(())
    }
}

fn decode_name(record: &[u8], index: usize) -> Result<String, CfbError> {
    let name_len = le_u16(record, 64) as usize;
    if name_len > NAME_BUFFER_LEN || name_len % 2 != 0 {
        return Err(CfbError::InvalidDirectory(format!(
            "entry {index} has name length {name_len}"
        )));
    }
    let units: Vec<u16> = record[..name_len]
        .chunks_exact(2)
        .map(|raw| u16::from_le_bytes([raw[0], raw[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Check that `name` can be stored as a single directory entry name.
pub fn validate_name(name: &str) -> Result<(), CfbError> {
    let invalid = |reason| CfbError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.encode_utf16().count() > MAX_NAME_UNITS {
        return Err(invalid("longer than 31 UTF-16 code units"));
    }
    if name.contains(['/', '\\', ':', '!', '\0']) {
        return Err(invalid("contains a reserved character"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encodes_name_length_including_terminator() {
        let mut entry = DirectoryEntry::new("EncryptionInfo", ObjectType::Stream);
        entry.start_sector = 3;
        entry.size = 1234;
        let mut out = Vec::new();
        entry.encode(&mut out).unwrap();

        assert_eq!(out.len(), DIRECTORY_ENTRY_LEN);
        assert_eq!(le_u16(&out, 64), 30);
        assert_eq!(out[66], 2);
        assert_eq!(out[67], 1);
        assert_eq!(le_u32(&out, 68), NOSTREAM);
        assert_eq!(le_u32(&out, 116), 3);
        assert_eq!(le_u64(&out, 120), 1234);

        let decoded = DirectoryEntry::decode(&out, 0, SectorSize::Legacy512).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn version_three_ignores_high_size_bits() {
        let mut entry = DirectoryEntry::new("x", ObjectType::Stream);
        entry.size = (7u64 << 32) | 100;
        let mut out = Vec::new();
        entry.encode(&mut out).unwrap();

        let v3 = DirectoryEntry::decode(&out, 1, SectorSize::Legacy512).unwrap();
        assert_eq!(v3.size, 100);
        let v4 = DirectoryEntry::decode(&out, 1, SectorSize::Large4096).unwrap();
        assert_eq!(v4.size, entry.size);
    }

    #[test]
    fn control_character_names_survive() {
        let entry = DirectoryEntry::new("\u{6}DataSpaces", ObjectType::Storage);
        let mut out = Vec::new();
        entry.encode(&mut out).unwrap();
        assert_eq!(&out[..4], &[6, 0, b'D', 0]);
        let decoded = DirectoryEntry::decode(&out, 2, SectorSize::Legacy512).unwrap();
        assert_eq!(decoded.name, "\u{6}DataSpaces");
    }

    #[test]
    fn rejects_unknown_object_type_and_oversized_name_length() {
        let mut out = Vec::new();
        DirectoryEntry::new("a", ObjectType::Stream)
            .encode(&mut out)
            .unwrap();

        let mut bad_type = out.clone();
        bad_type[66] = 3;
        assert!(matches!(
            DirectoryEntry::decode(&bad_type, 4, SectorSize::Legacy512),
            Err(CfbError::InvalidDirectory(_))
        ));

        let mut bad_len = out;
        bad_len[64] = 66;
        assert!(matches!(
            DirectoryEntry::decode(&bad_len, 4, SectorSize::Legacy512),
            Err(CfbError::InvalidDirectory(_))
        ));
    }

    #[test]
    fn unused_slots_decode_as_unallocated() {
        let mut out = Vec::new();
        DirectoryEntry::unallocated().encode(&mut out).unwrap();
        assert!(out[..68].iter().all(|byte| *byte == 0));
        assert_eq!(le_u32(&out, 68), NOSTREAM);
        assert_eq!(le_u32(&out, 72), NOSTREAM);
        assert_eq!(le_u32(&out, 76), NOSTREAM);
        assert!(out[80..].iter().all(|byte| *byte == 0));

        let filler = [0xFFu8; DIRECTORY_ENTRY_LEN];
        let decoded = DirectoryEntry::decode(&filler, 9, SectorSize::Legacy512).unwrap();
        assert_eq!(decoded.object_type, ObjectType::Unallocated);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("EncryptedPackage").is_ok());
        assert!(validate_name("\u{6}Primary").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(32)).is_err());
        assert!(validate_name(&"x".repeat(31)).is_ok());
    }
}
