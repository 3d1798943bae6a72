use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use sheetcrypt_cfb::{
    CfbError, ChainFault, Color, CompoundFile, ContainerBuilder, DirectoryEntry, ObjectType,
    Placement, SectorSize, DIRECTORY_ENTRY_LEN, ENDOFCHAIN, FREESECT, MINI_SECTOR_SIZE, NOSTREAM,
};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn build(streams: &BTreeMap<String, Vec<u8>>, sector_size: SectorSize) -> Vec<u8> {
    let mut builder = ContainerBuilder::with_sector_size(sector_size);
    for (path, data) in streams {
        builder.add_stream(path, data.clone()).expect("add stream");
    }
    builder.finish().expect("finish container")
}

fn sample_streams() -> BTreeMap<String, Vec<u8>> {
    let mut streams = BTreeMap::new();
    streams.insert("under_cutoff".to_string(), pattern(4095, 1));
    streams.insert("at_cutoff".to_string(), pattern(4096, 2));
    streams.insert("tiny".to_string(), pattern(1, 3));
    streams.insert("empty".to_string(), Vec::new());
    streams.insert("storage/inner/deep".to_string(), pattern(70_000, 4));
    streams.insert("storage/sibling".to_string(), pattern(64, 5));
    streams
}

#[test]
fn reader_recovers_every_stream_written() {
    for sector_size in [SectorSize::Legacy512, SectorSize::Large4096] {
        let streams = sample_streams();
        let bytes = build(&streams, sector_size);
        let file = CompoundFile::parse(&bytes).expect("parse container");
        assert_eq!(file.streams().expect("read streams"), streams);
    }
}

#[test]
fn cutoff_boundary_uses_mini_and_regular_chains() {
    let bytes = build(&sample_streams(), SectorSize::Legacy512);
    let file = CompoundFile::parse(&bytes).unwrap();

    assert!(file.stream_chain("under_cutoff").unwrap().mini);
    assert!(!file.stream_chain("at_cutoff").unwrap().mini);
    assert_eq!(file.entry("empty").unwrap().start_sector, ENDOFCHAIN);
}

#[test]
fn every_chain_has_exactly_the_sectors_its_size_needs() {
    let bytes = build(&sample_streams(), SectorSize::Legacy512);
    let file = CompoundFile::parse(&bytes).unwrap();

    for (path, entry) in file.paths() {
        if !entry.is_stream() {
            continue;
        }
        let chain = file.stream_chain(path).unwrap();
        let unit = (if chain.mini { MINI_SECTOR_SIZE } else { 512 }) as u64;
        assert_eq!(
            chain.sectors.len() as u64,
            entry.size.div_ceil(unit),
            "sector count for {path}"
        );

        let table = if chain.mini { file.mini_fat() } else { file.fat() };
        if let Some(&last) = chain.sectors.last() {
            assert_eq!(table.get(last), Some(ENDOFCHAIN), "terminator for {path}");
        }
    }
}

#[test]
fn forced_regular_placement_keeps_large_streams_out_of_the_mini_stream() {
    let mut builder = ContainerBuilder::new();
    builder
        .add_stream_with_placement("Big", pattern(8000, 9), Placement::Regular)
        .unwrap();
    let bytes = builder.finish().unwrap();
    let file = CompoundFile::parse(&bytes).unwrap();
    assert!(!file.stream_chain("Big").unwrap().mini);
    assert_eq!(file.read_stream("Big").unwrap(), pattern(8000, 9));
    assert_eq!(file.entries()[0].size, 0);
}

#[test]
fn large_payloads_spill_fat_locations_into_difat_sectors() {
    // More than 109 FAT sectors at 512-byte sectors.
    let payload = pattern(512 * 128 * 112, 7);
    let mut builder = ContainerBuilder::new();
    builder.add_stream("EncryptedPackage", payload.clone()).unwrap();
    let bytes = builder.finish().unwrap();

    let file = CompoundFile::parse(&bytes).unwrap();
    assert!(file.header().fat_sectors > 109);
    assert_eq!(file.header().difat_sectors, 1);
    assert_ne!(file.header().difat_start, ENDOFCHAIN);
    assert_eq!(file.read_stream("EncryptedPackage").unwrap(), payload);
}

fn set_header_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A small container with one extra 512-byte sector appended: a DIFAT sector holding no FAT
/// locations whose next pointer is itself.
fn with_self_linked_difat_sector() -> Vec<u8> {
    let mut builder = ContainerBuilder::new();
    builder.add_stream("Data", pattern(8000, 6)).unwrap();
    let mut bytes = builder.finish().unwrap();

    let sector = (bytes.len() / 512 - 1) as u32;
    let mut difat = vec![FREESECT; 128];
    difat[127] = sector;
    for value in difat {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    set_header_u32(&mut bytes, 68, sector);
    set_header_u32(&mut bytes, 72, u32::MAX);
    bytes
}

#[test]
fn self_linked_difat_sector_is_a_cycle() {
    let mut bytes = with_self_linked_difat_sector();
    let sectors_in_file = (bytes.len() / 512 - 1) as u32;
    set_header_u32(&mut bytes, 44, sectors_in_file);

    let err = CompoundFile::parse(&bytes).unwrap_err();
    assert!(
        matches!(
            err,
            CfbError::BrokenChain {
                table: "DIFAT",
                reason: ChainFault::Cycle,
                ..
            }
        ),
        "{err:?}"
    );
}

#[test]
fn fat_sector_count_beyond_the_file_is_rejected() {
    let mut bytes = with_self_linked_difat_sector();
    for declared in [2_000_000, u32::MAX] {
        set_header_u32(&mut bytes, 44, declared);
        let err = CompoundFile::parse(&bytes).unwrap_err();
        assert!(matches!(err, CfbError::InvalidHeader(_)), "{err:?}");
    }
}

#[test]
fn directory_padded_with_0xff_records_reads_back() {
    let mut streams = BTreeMap::new();
    streams.insert("First".to_string(), pattern(100, 1));
    streams.insert("Second".to_string(), pattern(5000, 2));
    let mut bytes = build(&streams, SectorSize::Legacy512);

    // Root plus two streams leave one unused slot in the 512-byte directory sector.
    let directory_start = u32::from_le_bytes(bytes[48..52].try_into().unwrap()) as usize;
    let slot = (directory_start + 1) * 512 + 3 * DIRECTORY_ENTRY_LEN;
    bytes[slot..slot + DIRECTORY_ENTRY_LEN].fill(0xFF);

    let file = CompoundFile::parse(&bytes).expect("parse 0xFF-padded directory");
    assert_eq!(file.entries().len(), 4);
    assert_eq!(file.entries()[3].object_type, ObjectType::Unallocated);
    assert_eq!(file.streams().unwrap(), streams);
}

fn black_height(entries: &[DirectoryEntry], index: u32) -> Option<usize> {
    if index == NOSTREAM {
        return Some(1);
    }
    let entry = &entries[index as usize];
    for link in [entry.left_sibling, entry.right_sibling] {
        if entry.color == Color::Red
            && link != NOSTREAM
            && entries[link as usize].color == Color::Red
        {
            return None;
        }
    }
    let left = black_height(entries, entry.left_sibling)?;
    let right = black_height(entries, entry.right_sibling)?;
    (left == right).then_some(left + usize::from(entry.color == Color::Black))
}

#[test]
fn sibling_trees_are_red_black_trees() {
    let mut builder = ContainerBuilder::new();
    for i in 0..40 {
        builder
            .add_stream(&format!("Stream{i:02}"), pattern(i * 3, i as u8))
            .unwrap();
    }
    for name in ["a", "Bb", "ccc", "DDDD", "e"] {
        builder.add_stream(&format!("dir/{name}"), vec![1]).unwrap();
    }
    let bytes = builder.finish().unwrap();
    let file = CompoundFile::parse(&bytes).unwrap();
    let entries = file.entries();

    let storages = std::iter::once(&entries[0]).chain(file.entry("dir"));
    for storage in storages {
        let top = storage.child;
        assert_ne!(top, NOSTREAM);
        assert_eq!(entries[top as usize].color, Color::Black);
        assert!(black_height(entries, top).is_some(), "unbalanced under {}", storage.name);
    }
}
