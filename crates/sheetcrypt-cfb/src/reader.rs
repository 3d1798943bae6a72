use std::collections::{BTreeMap, BTreeSet};

use crate::directory::{DirectoryEntry, ObjectType};
use crate::error::{CfbError, ChainFault};
use crate::fat::AllocationTable;
use crate::header::Header;
use crate::{
    le_u32, DIRECTORY_ENTRY_LEN, ENDOFCHAIN, MAXREGSECT, MINI_SECTOR_SIZE,
    MINI_STREAM_CUTOFF, NOSTREAM,
};

/// The sectors backing one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChain {
    /// `true` when `sectors` are 64-byte mini sectors inside the mini-stream.
    pub mini: bool,
    pub sectors: Vec<u32>,
}

/// A parsed compound file borrowing the underlying bytes.
#[derive(Debug)]
pub struct CompoundFile<'a> {
    data: &'a [u8],
    header: Header,
    fat: AllocationTable,
    mini_fat: AllocationTable,
    entries: Vec<DirectoryEntry>,
    paths: BTreeMap<String, usize>,
    mini_stream: Vec<u8>,
}

impl<'a> CompoundFile<'a> {
    /// Parse the header, allocation tables and directory of `data`.
    ///
    /// Stream contents are only read on demand.
    pub fn parse(data: &'a [u8]) -> Result<Self, CfbError> {
        let header = Header::parse(data)?;
        let mut file = Self {
            data,
            header,
            fat: AllocationTable::default(),
            mini_fat: AllocationTable::default(),
            entries: Vec::new(),
            paths: BTreeMap::new(),
            mini_stream: Vec::new(),
        };

        let fat_sectors = file.fat_sector_locations()?;
        let mut fat_bytes = Vec::with_capacity(fat_sectors.len() * file.sector_len());
        for sector in fat_sectors {
            fat_bytes.extend_from_slice(file.sector(sector)?);
        }
        file.fat = AllocationTable::from_le_bytes(&fat_bytes);

        file.entries = file.load_directory()?;
        let root = file
            .entries
            .first()
            .filter(|entry| entry.object_type == ObjectType::Root)
            .cloned()
            .ok_or_else(|| CfbError::InvalidDirectory("first entry is not the root".into()))?;

        if file.header.mini_fat_sectors > 0 && file.header.mini_fat_start != ENDOFCHAIN {
            let mini_fat_bytes = file.read_regular_chain(file.header.mini_fat_start, None)?;
            file.mini_fat = AllocationTable::from_le_bytes(&mini_fat_bytes);
        }
        if root.size > 0 {
            file.mini_stream = file.read_regular_chain(root.start_sector, Some(root.size))?;
        }

        file.paths = file.build_paths()?;
        log::debug!(
            "parsed compound file: {} directory entries, {} FAT slots, {} mini-FAT slots",
            file.entries.len(),
            file.fat.len(),
            file.mini_fat.len()
        );
        Ok(file)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn fat(&self) -> &AllocationTable {
        &self.fat
    }

    pub fn mini_fat(&self) -> &AllocationTable {
        &self.mini_fat
    }

    /// Every directory record, in directory order. Index 0 is the root entry.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Every reachable storage and stream with its path, sorted by path.
    pub fn paths(&self) -> impl Iterator<Item = (&str, &DirectoryEntry)> + '_ {
        self.paths
            .iter()
            .map(|(path, &index)| (path.as_str(), &self.entries[index]))
    }

    pub fn entry(&self, path: &str) -> Option<&DirectoryEntry> {
        self.paths
            .get(path.trim_start_matches('/'))
            .map(|&index| &self.entries[index])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entry(path).is_some()
    }

    fn stream_entry(&self, path: &str) -> Result<&DirectoryEntry, CfbError> {
        self.entry(path)
            .filter(|entry| entry.is_stream())
            .ok_or_else(|| CfbError::StreamNotFound(path.to_string()))
    }

    fn in_mini_stream(entry: &DirectoryEntry) -> bool {
        entry.is_stream() && entry.size < MINI_STREAM_CUTOFF
    }

    /// The sector chain backing the stream at `path`.
    pub fn stream_chain(&self, path: &str) -> Result<StreamChain, CfbError> {
        let entry = self.stream_entry(path)?;
        if entry.size == 0 {
            return Ok(StreamChain {
                mini: Self::in_mini_stream(entry),
                sectors: Vec::new(),
            });
        }
        if Self::in_mini_stream(entry) {
            Ok(StreamChain {
                mini: true,
                sectors: self.mini_fat.chain(entry.start_sector, "mini-FAT")?,
            })
        } else {
            Ok(StreamChain {
                mini: false,
                sectors: self.fat.chain(entry.start_sector, "FAT")?,
            })
        }
    }

    /// Read the full contents of the stream at `path`.
    pub fn read_stream(&self, path: &str) -> Result<Vec<u8>, CfbError> {
        let entry = self.stream_entry(path)?;
        if entry.size == 0 {
            return Ok(Vec::new());
        }
        if Self::in_mini_stream(entry) {
            self.read_mini_chain(entry.start_sector, entry.size)
        } else {
            self.read_regular_chain(entry.start_sector, Some(entry.size))
        }
    }

    /// Read every stream, keyed by path.
    pub fn streams(&self) -> Result<BTreeMap<String, Vec<u8>>, CfbError> {
        let mut out = BTreeMap::new();
        for (path, entry) in self.paths() {
            if entry.is_stream() {
                out.insert(path.to_string(), self.read_stream(path)?);
            }
        }
        Ok(out)
    }

    fn sector_len(&self) -> usize {
        self.header.sector_size.bytes()
    }

    fn sector(&self, sector: u32) -> Result<&'a [u8], CfbError> {
        let sector_len = self.sector_len();
        let offset = (sector as usize + 1) * sector_len;
        if offset >= self.data.len() {
            return Err(CfbError::Truncated {
                context: "sector",
                expected: offset + sector_len,
                actual: self.data.len(),
            });
        }
        let end = (offset + sector_len).min(self.data.len());
        if end - offset < sector_len {
            log::warn!("sector {sector} is truncated to {} bytes", end - offset);
        }
        Ok(&self.data[offset..end])
    }

    /// Sectors physically present after the header, counting a truncated last sector.
    fn sector_count(&self) -> usize {
        let sector_len = self.sector_len();
        self.data.len().saturating_sub(sector_len).div_ceil(sector_len)
    }

    fn fat_sector_locations(&self) -> Result<Vec<u32>, CfbError> {
        let available = self.sector_count();
        let declared = self.header.fat_sectors as usize;
        if declared > available {
            return Err(CfbError::InvalidHeader(format!(
                "header declares {declared} FAT sectors but the file holds {available} sectors"
            )));
        }
        let mut locations: Vec<u32> = self
            .header
            .difat
            .iter()
            .copied()
            .filter(|&sector| sector <= MAXREGSECT)
            .take(declared)
            .collect();

        let per_sector = self.header.sector_size.entries_per_sector();
        let mut current = self.header.difat_start;
        let mut visited = BTreeSet::new();
        while locations.len() < declared && current <= MAXREGSECT {
            if !visited.insert(current) || visited.len() > available {
                return Err(CfbError::BrokenChain {
                    table: "DIFAT",
                    start: self.header.difat_start,
                    reason: ChainFault::Cycle,
                });
            }
            let sector = self.sector(current)?;
            if sector.len() < per_sector * 4 {
                return Err(CfbError::Truncated {
                    context: "DIFAT sector",
                    expected: per_sector * 4,
                    actual: sector.len(),
                });
            }
            for slot in 0..per_sector - 1 {
                let location = le_u32(sector, slot * 4);
                if location <= MAXREGSECT && locations.len() < declared {
                    locations.push(location);
                }
            }
            current = le_u32(sector, (per_sector - 1) * 4);
        }

        if locations.len() < declared {
            log::warn!(
                "header declares {declared} FAT sectors but the DIFAT lists {}",
                locations.len()
            );
        }
        if locations.is_empty() {
            return Err(CfbError::InvalidHeader("no FAT sectors".into()));
        }
        Ok(locations)
    }

    fn load_directory(&self) -> Result<Vec<DirectoryEntry>, CfbError> {
        let bytes = self.read_regular_chain(self.header.directory_start, None)?;
        bytes
            .chunks_exact(DIRECTORY_ENTRY_LEN)
            .enumerate()
            .map(|(index, record)| {
                DirectoryEntry::decode(record, index, self.header.sector_size)
            })
            .collect()
    }

    /// Concatenate a FAT chain, truncated to `size` when given.
    fn read_regular_chain(&self, start: u32, size: Option<u64>) -> Result<Vec<u8>, CfbError> {
        let sectors = self.fat.chain(start, "FAT")?;
        let capacity = size.map_or(sectors.len() * self.sector_len(), |size| {
            (size as usize).min(self.data.len())
        });
        let mut out = Vec::with_capacity(capacity);
        for sector in sectors {
            out.extend_from_slice(self.sector(sector)?);
        }

        if let Some(size) = size {
            if (out.len() as u64) < size {
                return Err(CfbError::Truncated {
                    context: "stream",
                    expected: size as usize,
                    actual: out.len(),
                });
            }
            out.truncate(size as usize);
        }
        Ok(out)
    }

    fn read_mini_chain(&self, start: u32, size: u64) -> Result<Vec<u8>, CfbError> {
        let sectors = self.mini_fat.chain(start, "mini-FAT")?;
        let mut out = Vec::with_capacity(size as usize);
        for sector in sectors {
            let offset = sector as usize * MINI_SECTOR_SIZE;
            let chunk = self
                .mini_stream
                .get(offset..offset + MINI_SECTOR_SIZE)
                .ok_or(CfbError::BrokenChain {
                    table: "mini-FAT",
                    start,
                    reason: ChainFault::OutOfRange(sector),
                })?;
            out.extend_from_slice(chunk);
        }
        if (out.len() as u64) < size {
            return Err(CfbError::Truncated {
                context: "mini stream",
                expected: size as usize,
                actual: out.len(),
            });
        }
        out.truncate(size as usize);
        Ok(out)
    }

    /// Walk every storage's sibling tree and assign `parent/child` paths.
    fn build_paths(&self) -> Result<BTreeMap<String, usize>, CfbError> {
        let mut paths = BTreeMap::new();
        let mut seen = vec![false; self.entries.len()];
        seen[0] = true;

        let mut pending: Vec<(u32, String)> = vec![(self.entries[0].child, String::new())];
        while let Some((index, parent)) = pending.pop() {
            if index == NOSTREAM {
                continue;
            }
            let entry = self.entries.get(index as usize).ok_or_else(|| {
                CfbError::InvalidDirectory(format!("link to missing entry {index}"))
            })?;
            if std::mem::replace(&mut seen[index as usize], true) {
                return Err(CfbError::InvalidDirectory(format!(
                    "entry {index} is reachable twice"
                )));
            }
            match entry.object_type {
                ObjectType::Unallocated => {
                    log::warn!("sibling tree links to unallocated entry {index}");
                    continue;
                }
                ObjectType::Root => {
                    return Err(CfbError::InvalidDirectory(format!(
                        "entry {index} is a second root"
                    )));
                }
                ObjectType::Storage | ObjectType::Stream => {}
            }

            let path = if parent.is_empty() {
                entry.name.clone()
            } else {
                format!("{parent}/{}", entry.name)
            };

            pending.push((entry.left_sibling, parent.clone()));
            pending.push((entry.right_sibling, parent));
            if entry.is_storage() {
                pending.push((entry.child, path.clone()));
            }
            if paths.insert(path.clone(), index as usize).is_some() {
                log::warn!("duplicate directory path {path:?}; keeping the last entry");
            }
        }
        Ok(paths)
    }
}
