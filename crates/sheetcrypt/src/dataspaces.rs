//! `\x06DataSpaces` compatibility streams.
//!
//! Office consults these before it reads `EncryptionInfo`. They name the encryption transform
//! applied to `EncryptedPackage` and never vary between files. The records below reproduce what
//! Excel writes, including the `DataSpaceMap` entry length that counts four bytes beyond the
//! entry payload.

pub const DATASPACES_STORAGE: &str = "\u{6}DataSpaces";
pub const VERSION_PATH: &str = "\u{6}DataSpaces/Version";
pub const DATASPACE_MAP_PATH: &str = "\u{6}DataSpaces/DataSpaceMap";
pub const DATASPACE_INFO_PATH: &str = "\u{6}DataSpaces/DataSpaceInfo/StrongEncryptionDataSpace";
pub const PRIMARY_TRANSFORM_PATH: &str =
    "\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform/\u{6}Primary";

const FEATURE_IDENTIFIER: &str = "Microsoft.Container.DataSpaces";
const ENCRYPTED_COMPONENT: &str = "EncryptedPackage";
const DATASPACE_NAME: &str = "StrongEncryptionDataSpace";
const TRANSFORM_NAME: &str = "StrongEncryptionTransform";
const TRANSFORM_ID: &str = "{FF9A3F03-56EF-4613-BDD5-5A41C1D07246}";
const TRANSFORM_TYPE: &str = "Microsoft.Container.EncryptionTransform";

/// Two alignment bytes, reader/updater/writer versions (1.0 each), then an encryption transform
/// info with an empty cipher name.
const PRIMARY_TRAILER: [u8; 30] = [
    0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
];

/// Length-prefixed UTF-16LE string: `LE32(byte length) || UTF-16LE(text)`.
fn length_prefixed(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut out = Vec::with_capacity(4 + units.len() * 2);
    out.extend_from_slice(&((units.len() * 2) as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn pad4(mut data: Vec<u8>) -> Vec<u8> {
    let padded = data.len().div_ceil(4) * 4;
    data.resize(padded, 0);
    data
}

fn push_u32s(out: &mut Vec<u8>, values: &[u32]) {
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn version() -> Vec<u8> {
    let mut out = length_prefixed(FEATURE_IDENTIFIER);
    push_u32s(&mut out, &[1, 1, 1]);
    out
}

pub fn dataspace_map() -> Vec<u8> {
    // One map entry with one stream reference (type 0).
    let mut entry = Vec::new();
    push_u32s(&mut entry, &[1, 0]);
    entry.extend_from_slice(&length_prefixed(ENCRYPTED_COMPONENT));
    entry.extend_from_slice(&length_prefixed(DATASPACE_NAME));
    let entry = pad4(entry);

    let mut out = Vec::with_capacity(12 + entry.len());
    push_u32s(&mut out, &[8, 1, entry.len() as u32 + 4]);
    out.extend_from_slice(&entry);
    out
}

pub fn dataspace_info() -> Vec<u8> {
    let mut out = Vec::new();
    push_u32s(&mut out, &[8, 1]);
    out.extend_from_slice(&pad4(length_prefixed(TRANSFORM_NAME)));
    out
}

pub fn primary_transform() -> Vec<u8> {
    let mut out = Vec::new();
    push_u32s(&mut out, &[88, 1]);
    out.extend_from_slice(&length_prefixed(TRANSFORM_ID));
    out.extend_from_slice(&length_prefixed(TRANSFORM_TYPE));
    out.extend_from_slice(&PRIMARY_TRAILER);
    out
}

/// All four compatibility streams, keyed by container path.
pub fn streams() -> [(&'static str, Vec<u8>); 4] {
    [
        (VERSION_PATH, version()),
        (DATASPACE_MAP_PATH, dataspace_map()),
        (DATASPACE_INFO_PATH, dataspace_info()),
        (PRIMARY_TRANSFORM_PATH, primary_transform()),
    ]
}
