//! Sector layout planning.
//!
//! The writer decides where everything goes before emitting a single byte. Sector order is:
//!
//! 1. the first FAT sector (sector 0)
//! 2. directory sectors
//! 3. mini-FAT sectors
//! 4. mini-stream sectors
//! 5. regular streams, in request order
//! 6. the remaining FAT sectors
//! 7. DIFAT sectors, only when more than 109 FAT sectors are needed

use crate::error::CfbError;
use crate::{
    SectorSize, ENDOFCHAIN, HEADER_DIFAT_SLOTS, MAXREGSECT, MINI_SECTOR_SIZE, MINI_STREAM_CUTOFF,
};

/// Smallest mini-stream Excel allocates (30 mini sectors); some readers assume at least this much.
const MIN_MINI_STREAM_LEN: u64 = 1920;
/// Lenient readers assume the FAT spans at least this many sectors.
const MIN_FAT_SECTORS: u64 = 3;
const MAX_FAT_ROUNDS: usize = 10;

/// Where a stream's bytes should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Mini-stream below the cutoff, regular sectors otherwise.
    #[default]
    Auto,
    /// Regular sectors regardless of size.
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub len: u64,
    pub placement: Placement,
}

impl StreamRequest {
    pub fn new(len: u64) -> Self {
        Self {
            len,
            placement: Placement::Auto,
        }
    }

    fn in_mini_stream(&self) -> bool {
        self.len > 0 && self.placement == Placement::Auto && self.len < MINI_STREAM_CUTOFF
    }
}

/// A contiguous run of sectors. An empty run starts at [`ENDOFCHAIN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub start: u32,
    pub count: u32,
}

impl Run {
    pub const EMPTY: Run = Run {
        start: ENDOFCHAIN,
        count: 0,
    };

    fn at(cursor: &mut u32, count: u32) -> Run {
        if count == 0 {
            return Run::EMPTY;
        }
        let run = Run {
            start: *cursor,
            count,
        };
        *cursor += count;
        run
    }

    pub fn sectors(&self) -> impl Iterator<Item = u32> {
        let start = self.start;
        (0..self.count).map(move |offset| start + offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLocation {
    /// Zero-length stream; no sectors allocated.
    Empty,
    /// Run of 64-byte mini sectors inside the mini-stream.
    Mini(Run),
    /// Run of regular sectors.
    Regular(Run),
}

impl StreamLocation {
    pub fn start_sector(&self) -> u32 {
        match self {
            StreamLocation::Empty => ENDOFCHAIN,
            StreamLocation::Mini(run) | StreamLocation::Regular(run) => run.start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub sector_size: SectorSize,
    pub directory: Run,
    pub mini_fat: Run,
    pub mini_stream: Run,
    /// Padded mini-stream length recorded in the root entry.
    pub mini_stream_len: u64,
    /// Number of 64-byte sectors inside the padded mini-stream.
    pub mini_sectors: u32,
    pub fat_sectors: Vec<u32>,
    pub difat: Run,
    pub streams: Vec<StreamLocation>,
    pub total_sectors: u32,
}

impl Layout {
    /// File length in bytes, header sector included.
    pub fn file_len(&self) -> u64 {
        (u64::from(self.total_sectors) + 1) * self.sector_size.bytes() as u64
    }
}

fn difat_sectors_for(fat_sectors: u64, sector_size: SectorSize) -> u64 {
    let in_header = HEADER_DIFAT_SLOTS as u64;
    if fat_sectors <= in_header {
        return 0;
    }
    // The last slot of each DIFAT sector links to the next one.
    let per_sector = sector_size.entries_per_sector() as u64 - 1;
    (fat_sectors - in_header).div_ceil(per_sector)
}

fn fat_sector_counts(data_sectors: u64, sector_size: SectorSize) -> Result<(u64, u64), CfbError> {
    let per_sector = sector_size.entries_per_sector() as u64;
    let mut fat = data_sectors.div_ceil(per_sector).max(1);
    let mut difat = difat_sectors_for(fat, sector_size);

    let mut converged = false;
    for _ in 0..MAX_FAT_ROUNDS {
        let total = data_sectors + fat + difat;
        let next_fat = total.div_ceil(per_sector);
        let next_difat = difat_sectors_for(next_fat, sector_size);
        if next_fat == fat && next_difat == difat {
            converged = true;
            break;
        }
        fat = next_fat;
        difat = next_difat;
    }
    if !converged {
        return Err(CfbError::LayoutDiverged);
    }

    let fat = fat.max(MIN_FAT_SECTORS);
    Ok((fat, difat_sectors_for(fat, sector_size)))
}

fn to_sector_count(value: u64, what: &str) -> Result<u32, CfbError> {
    u32::try_from(value)
        .ok()
        .filter(|count| *count <= MAXREGSECT)
        .ok_or_else(|| CfbError::TooLarge(format!("{what} needs {value} sectors")))
}

/// Plan sector placement for `streams` (in directory order) and `directory_entries` records.
pub fn plan(
    streams: &[StreamRequest],
    directory_entries: usize,
    sector_size: SectorSize,
) -> Result<Layout, CfbError> {
    let sector_len = sector_size.bytes() as u64;
    let mini_len = MINI_SECTOR_SIZE as u64;

    if sector_size == SectorSize::Legacy512 {
        if let Some(big) = streams.iter().find(|s| s.len > u64::from(u32::MAX)) {
            return Err(CfbError::TooLarge(format!(
                "{}-byte stream needs 4096-byte sectors",
                big.len
            )));
        }
    }

    let mut mini_sectors: u64 = streams
        .iter()
        .filter(|s| s.in_mini_stream())
        .map(|s| s.len.div_ceil(mini_len))
        .sum();
    let mut mini_stream_len = mini_sectors * mini_len;
    if mini_stream_len > 0 && mini_stream_len < MIN_MINI_STREAM_LEN {
        mini_stream_len = MIN_MINI_STREAM_LEN;
        mini_sectors = MIN_MINI_STREAM_LEN / mini_len;
    }

    let directory_sectors =
        (directory_entries.max(1) as u64).div_ceil(sector_size.directory_entries_per_sector() as u64);
    let mini_fat_sectors = mini_sectors.div_ceil(sector_size.entries_per_sector() as u64);
    let mini_stream_sectors = mini_stream_len.div_ceil(sector_len);
    let regular_sectors: u64 = streams
        .iter()
        .filter(|s| s.len > 0 && !s.in_mini_stream())
        .map(|s| s.len.div_ceil(sector_len))
        .sum();

    let data_sectors = directory_sectors + mini_fat_sectors + mini_stream_sectors + regular_sectors;
    let (fat_count, difat_count) = fat_sector_counts(data_sectors, sector_size)?;
    to_sector_count(data_sectors + fat_count + difat_count, "container")?;

    let mut cursor: u32 = 1;
    let directory = Run::at(&mut cursor, to_sector_count(directory_sectors, "directory")?);
    let mini_fat = Run::at(&mut cursor, to_sector_count(mini_fat_sectors, "mini-FAT")?);
    let mini_stream = Run::at(&mut cursor, to_sector_count(mini_stream_sectors, "mini-stream")?);

    let mut mini_cursor: u32 = 0;
    let mut locations = Vec::with_capacity(streams.len());
    for stream in streams {
        let location = if stream.len == 0 {
            StreamLocation::Empty
        } else if stream.in_mini_stream() {
            let count = to_sector_count(stream.len.div_ceil(mini_len), "mini stream")?;
            StreamLocation::Mini(Run::at(&mut mini_cursor, count))
        } else {
            let count = to_sector_count(stream.len.div_ceil(sector_len), "stream")?;
            StreamLocation::Regular(Run::at(&mut cursor, count))
        };
        locations.push(location);
    }

    let mut fat_sectors = Vec::with_capacity(fat_count as usize);
    fat_sectors.push(0);
    let tail = Run::at(&mut cursor, to_sector_count(fat_count - 1, "FAT")?);
    fat_sectors.extend(tail.sectors());
    let difat = Run::at(&mut cursor, to_sector_count(difat_count, "DIFAT")?);

    Ok(Layout {
        sector_size,
        directory,
        mini_fat,
        mini_stream,
        mini_stream_len,
        mini_sectors: to_sector_count(mini_sectors, "mini-stream")?,
        fat_sectors,
        difat,
        streams: locations,
        total_sectors: cursor,
    })
}
