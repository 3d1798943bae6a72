use crate::error::CfbError;
use crate::{
    le_u16, le_u32, SectorSize, ENDOFCHAIN, FREESECT, HEADER_DIFAT_SLOTS, HEADER_LEN,
    MINI_STREAM_CUTOFF, SIGNATURE,
};

const MINOR_VERSION: u16 = 0x003E;
const BYTE_ORDER_MARK: u16 = 0xFFFE;
const MINI_SECTOR_SHIFT: u16 = 6;

/// The fixed 512-byte container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub sector_size: SectorSize,
    pub minor_version: u16,
    /// Always 0 for major version 3.
    pub directory_sectors: u32,
    pub fat_sectors: u32,
    pub directory_start: u32,
    pub mini_stream_cutoff: u32,
    pub mini_fat_start: u32,
    pub mini_fat_sectors: u32,
    pub difat_start: u32,
    pub difat_sectors: u32,
    /// First 109 FAT sector locations; unused slots hold [`FREESECT`].
    pub difat: [u32; HEADER_DIFAT_SLOTS],
}

impl Header {
    pub(crate) fn new(sector_size: SectorSize) -> Self {
        Self {
            sector_size,
            minor_version: MINOR_VERSION,
            directory_sectors: 0,
            fat_sectors: 0,
            directory_start: ENDOFCHAIN,
            mini_stream_cutoff: MINI_STREAM_CUTOFF as u32,
            mini_fat_start: ENDOFCHAIN,
            mini_fat_sectors: 0,
            difat_start: ENDOFCHAIN,
            difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_SLOTS],
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CfbError> {
        if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
            return Err(CfbError::InvalidSignature);
        }
        if bytes.len() < HEADER_LEN {
            return Err(CfbError::Truncated {
                context: "header",
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let minor_version = le_u16(bytes, 24);
        let major_version = le_u16(bytes, 26);
        let byte_order = le_u16(bytes, 28);
        let sector_shift = le_u16(bytes, 30);
        let mini_shift = le_u16(bytes, 32);

        if byte_order != BYTE_ORDER_MARK {
            return Err(CfbError::InvalidHeader(format!(
                "byte order mark {byte_order:#06x}"
            )));
        }
        let sector_size = SectorSize::from_header(major_version, sector_shift).ok_or_else(|| {
            CfbError::InvalidHeader(format!(
                "major version {major_version} with sector shift {sector_shift}"
            ))
        })?;
        if mini_shift != MINI_SECTOR_SHIFT {
            return Err(CfbError::InvalidHeader(format!(
                "mini sector shift {mini_shift}"
            )));
        }

        let mini_stream_cutoff = le_u32(bytes, 56);
        if u64::from(mini_stream_cutoff) != MINI_STREAM_CUTOFF {
            return Err(CfbError::InvalidHeader(format!(
                "mini stream cutoff {mini_stream_cutoff}"
            )));
        }

        let mut difat = [FREESECT; HEADER_DIFAT_SLOTS];
        for (slot, value) in difat.iter_mut().enumerate() {
            *value = le_u32(bytes, 76 + slot * 4);
        }

        Ok(Self {
            sector_size,
            minor_version,
            directory_sectors: le_u32(bytes, 40),
            fat_sectors: le_u32(bytes, 44),
            directory_start: le_u32(bytes, 48),
            mini_stream_cutoff,
            mini_fat_start: le_u32(bytes, 60),
            mini_fat_sectors: le_u32(bytes, 64),
            difat_start: le_u32(bytes, 68),
            difat_sectors: le_u32(bytes, 72),
            difat,
        })
    }

    /// Encode the 512 header bytes. Callers pad to the sector size for major version 4.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..8].copy_from_slice(&SIGNATURE);
        // 8..24: CLSID, all zero.
        out[24..26].copy_from_slice(&self.minor_version.to_le_bytes());
        out[26..28].copy_from_slice(&self.sector_size.major_version().to_le_bytes());
        out[28..30].copy_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
        out[30..32].copy_from_slice(&self.sector_size.shift().to_le_bytes());
        out[32..34].copy_from_slice(&MINI_SECTOR_SHIFT.to_le_bytes());
        // 34..40: reserved.
        out[40..44].copy_from_slice(&self.directory_sectors.to_le_bytes());
        out[44..48].copy_from_slice(&self.fat_sectors.to_le_bytes());
        out[48..52].copy_from_slice(&self.directory_start.to_le_bytes());
        // 52..56: transaction signature, unused.
        out[56..60].copy_from_slice(&self.mini_stream_cutoff.to_le_bytes());
        out[60..64].copy_from_slice(&self.mini_fat_start.to_le_bytes());
        out[64..68].copy_from_slice(&self.mini_fat_sectors.to_le_bytes());
        out[68..72].copy_from_slice(&self.difat_start.to_le_bytes());
        out[72..76].copy_from_slice(&self.difat_sectors.to_le_bytes());
        for (slot, value) in self.difat.iter().enumerate() {
            let offset = 76 + slot * 4;
            out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}
