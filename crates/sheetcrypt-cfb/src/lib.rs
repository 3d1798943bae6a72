//! Compound File Binary (CFB, "OLE") container support.
//!
//! Office stores password-protected OOXML packages inside a CFB container: a tiny FAT-style file
//! system with a sector allocation table, a secondary 64-byte allocator (the mini-FAT) for small
//! streams, and a red-black directory tree per storage.
//!
//! This crate provides:
//! - [`CompoundFile`]: a bounds-checked reader that resolves stream paths to bytes.
//! - [`ContainerBuilder`]: a writer that plans the sector layout up front and emits the whole
//!   container in one pass.
//! - [`plan`] / [`balance`]: the layout planner and sibling-tree builder the writer is built on,
//!   exposed for inspection and testing.
//!
//! Paths use `/` as the separator and never include the root entry, e.g.
//! `"\u{6}DataSpaces/DataSpaceMap"`.

mod directory;
mod error;
mod fat;
mod header;
mod layout;
mod reader;
mod tree;
mod writer;


pub use directory::{validate_name, Color, DirectoryEntry, ObjectType};
pub use error::{CfbError, ChainFault};
pub use fat::AllocationTable;
pub use header::Header;
pub use layout::{plan, Layout, Placement, Run, StreamLocation, StreamRequest};
pub use reader::{CompoundFile, StreamChain};
pub use tree::{balance, compare_names, SiblingLinks, SiblingTree};
pub use writer::ContainerBuilder;

/// File signature shared by every compound file.
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Unallocated sector.
pub const FREESECT: u32 = 0xFFFF_FFFF;
/// Terminates a sector chain.
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
/// Marks a sector holding part of the FAT itself.
pub const FATSECT: u32 = 0xFFFF_FFFD;
/// Marks a sector holding part of the DIFAT.
pub const DIFSECT: u32 = 0xFFFF_FFFC;
/// Largest regular sector number.
pub const MAXREGSECT: u32 = 0xFFFF_FFFA;
/// "No entry" sentinel for directory sibling/child links.
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

pub const HEADER_LEN: usize = 512;
pub const DIRECTORY_ENTRY_LEN: usize = 128;
pub const MINI_SECTOR_SIZE: usize = 64;
/// Streams strictly smaller than this live in the mini-stream.
pub const MINI_STREAM_CUTOFF: u64 = 4096;
/// Number of FAT sector locations stored directly in the header.
pub const HEADER_DIFAT_SLOTS: usize = 109;

/// Sector size of a container, which also fixes its major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SectorSize {
    /// 512-byte sectors, major version 3. Readable by everything.
    #[default]
    Legacy512,
    /// 4096-byte sectors, major version 4.
    Large4096,
}

impl SectorSize {
    pub fn bytes(self) -> usize {
        match self {
            SectorSize::Legacy512 => 512,
            SectorSize::Large4096 => 4096,
        }
    }

    pub fn shift(self) -> u16 {
        match self {
            SectorSize::Legacy512 => 9,
            SectorSize::Large4096 => 12,
        }
    }

    pub fn major_version(self) -> u16 {
        match self {
            SectorSize::Legacy512 => 3,
            SectorSize::Large4096 => 4,
        }
    }

    /// Number of 32-bit allocation table slots per sector.
    pub fn entries_per_sector(self) -> usize {
        self.bytes() / 4
    }

    pub fn directory_entries_per_sector(self) -> usize {
        self.bytes() / DIRECTORY_ENTRY_LEN
    }

    pub(crate) fn from_header(major_version: u16, shift: u16) -> Option<Self> {
        match (major_version, shift) {
            (3, 9) => Some(SectorSize::Legacy512),
            (4, 12) => Some(SectorSize::Large4096),
            _ => None,
        }
    }
}

/// Cheap probe: does `bytes` start with the compound file signature?
pub fn is_compound_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}

pub(crate) fn le_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn le_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn le_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
