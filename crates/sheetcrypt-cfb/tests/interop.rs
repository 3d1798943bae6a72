//! Cross-checks against the `cfb` crate, an independent CFB implementation.

use std::io::{Cursor, Read, Write};

use pretty_assertions::assert_eq;
use sheetcrypt_cfb::{CompoundFile, ContainerBuilder, SectorSize};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

fn read_with_cfb(bytes: &[u8], path: &str) -> Vec<u8> {
    let mut ole = cfb::CompoundFile::open(Cursor::new(bytes)).expect("cfb opens our container");
    let mut out = Vec::new();
    ole.open_stream(path)
        .unwrap_or_else(|err| panic!("open stream {path}: {err}"))
        .read_to_end(&mut out)
        .unwrap_or_else(|err| panic!("read stream {path}: {err}"));
    out
}

fn streams() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("Workbook", pattern(4096, 1)),
        ("Summary", pattern(4095, 2)),
        ("Tiny", pattern(3, 3)),
        ("Storage/Nested", pattern(20_000, 4)),
        ("Storage/Other", pattern(100, 5)),
    ]
}

#[test]
fn cfb_crate_reads_our_containers() {
    for sector_size in [SectorSize::Legacy512, SectorSize::Large4096] {
        let mut builder = ContainerBuilder::with_sector_size(sector_size);
        for (path, data) in streams() {
            builder.add_stream(path, data).unwrap();
        }
        let bytes = builder.finish().unwrap();

        for (path, data) in streams() {
            assert_eq!(read_with_cfb(&bytes, path), data, "{path} via cfb");
        }
    }
}

#[test]
fn cfb_crate_finds_names_whose_length_and_case_orders_disagree() {
    // Sorted case-insensitively these would run "aaa" < "B" < "cc" < "yyyy" < "Zz"; length-first
    // they run "B" < "Zz" < "cc" < "aaa" < "yyyy".
    let names = ["Zz", "aaa", "B", "yyyy", "cc", "Long name", "x", "MMMMMM", "nn", "QQQ"];
    let mut builder = ContainerBuilder::new();
    for (seed, name) in names.iter().enumerate() {
        builder.add_stream(name, pattern(10, seed as u8)).unwrap();
    }
    let bytes = builder.finish().unwrap();

    for (seed, name) in names.iter().enumerate() {
        assert_eq!(read_with_cfb(&bytes, name), pattern(10, seed as u8), "{name} via cfb");
    }
}

#[test]
fn we_read_cfb_crate_containers() {
    let cursor = Cursor::new(Vec::new());
    let mut ole = cfb::CompoundFile::create(cursor).expect("create cfb");
    ole.create_storage("Storage").expect("create storage");
    for (path, data) in streams() {
        ole.create_stream(path)
            .unwrap_or_else(|err| panic!("create {path}: {err}"))
            .write_all(&data)
            .unwrap_or_else(|err| panic!("write {path}: {err}"));
    }
    let bytes = ole.into_inner().into_inner();

    let file = CompoundFile::parse(&bytes).expect("parse cfb-crate container");
    for (path, data) in streams() {
        assert_eq!(file.read_stream(path).unwrap(), data, "{path} via our reader");
    }
    assert!(file.entry("Storage").unwrap().is_storage());
}
