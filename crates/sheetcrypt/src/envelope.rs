//! The CFB envelope around the encryption streams.

use sheetcrypt_cfb::{CompoundFile, ContainerBuilder};

use crate::agile::EncryptedParts;
use crate::dataspaces;
use crate::error::OfficeCryptoError;

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

/// Write the encryption streams plus the `\x06DataSpaces` tree. The path set matches Office's
/// envelope exactly, so the writer lays the directory out with Excel's fixed tree.
pub(crate) fn write(parts: &EncryptedParts) -> Result<Vec<u8>, OfficeCryptoError> {
    let mut builder = ContainerBuilder::new();
    builder.add_stream(ENCRYPTION_INFO_STREAM, parts.encryption_info.as_slice())?;
    builder.add_stream(ENCRYPTED_PACKAGE_STREAM, parts.encrypted_package.as_slice())?;
    for (path, data) in dataspaces::streams() {
        builder.add_stream(path, data)?;
    }
    let bytes = builder.finish()?;
    log::debug!("wrote {}-byte container", bytes.len());
    Ok(bytes)
}

/// Raw streams read back from an encrypted container.
pub(crate) struct Envelope {
    pub encryption_info: Vec<u8>,
    pub encrypted_package: Vec<u8>,
    pub has_dataspaces: bool,
}

pub(crate) fn read(bytes: &[u8]) -> Result<Envelope, OfficeCryptoError> {
    let container = CompoundFile::parse(bytes)?;
    let encryption_info = container.read_stream(ENCRYPTION_INFO_STREAM)?;
    let encrypted_package = container.read_stream(ENCRYPTED_PACKAGE_STREAM)?;

    let has_dataspaces = dataspaces::streams()
        .iter()
        .all(|(path, _)| container.contains(path));
    if !has_dataspaces {
        log::warn!("container has no complete \\x06DataSpaces tree; reading EncryptionInfo directly");
    }

    Ok(Envelope {
        encryption_info,
        encrypted_package,
        has_dataspaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheetcrypt_cfb::{CfbError, Color};

    fn parts() -> EncryptedParts {
        EncryptedParts {
            encryption_info: b"info".repeat(200),
            encrypted_package: vec![0xEE; 9000],
        }
    }

    #[test]
    fn writes_office_envelope() {
        let bytes = write(&parts()).unwrap();
        let container = CompoundFile::parse(&bytes).unwrap();
        let paths: Vec<&str> = container.paths().map(|(path, _)| path).collect();
        assert_eq!(
            paths,
            vec![
                "",
                "\u{6}DataSpaces",
                "\u{6}DataSpaces/DataSpaceInfo",
                "\u{6}DataSpaces/DataSpaceInfo/StrongEncryptionDataSpace",
                "\u{6}DataSpaces/DataSpaceMap",
                "\u{6}DataSpaces/TransformInfo",
                "\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform",
                "\u{6}DataSpaces/TransformInfo/StrongEncryptionTransform/\u{6}Primary",
                "\u{6}DataSpaces/Version",
                "EncryptedPackage",
                "EncryptionInfo",
            ]
        );
        assert_eq!(
            container.read_stream(dataspaces::PRIMARY_TRANSFORM_PATH).unwrap(),
            dataspaces::primary_transform()
        );
        // Root entry of the fixed envelope tree is red.
        assert_eq!(container.entries()[0].color, Color::Red);
    }

    #[test]
    fn read_returns_written_streams() {
        let parts = parts();
        let envelope = read(&write(&parts).unwrap()).unwrap();
        assert_eq!(envelope.encryption_info, parts.encryption_info);
        assert_eq!(envelope.encrypted_package, parts.encrypted_package);
        assert!(envelope.has_dataspaces);
    }

    #[test]
    fn missing_streams_are_container_errors() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("EncryptionInfo", vec![4, 0, 4, 0]).unwrap();
        let bytes = builder.finish().unwrap();
        let err = read(&bytes).err().unwrap();
        assert!(
            matches!(
                err,
                OfficeCryptoError::Container(CfbError::StreamNotFound(ref name)) if name == "EncryptedPackage"
            ),
            "{err:?}"
        );
    }

    #[test]
    fn dataspaces_are_optional_on_read() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("EncryptionInfo", vec![4, 0, 4, 0]).unwrap();
        builder.add_stream("EncryptedPackage", vec![0; 8]).unwrap();
        let envelope = read(&builder.finish().unwrap()).unwrap();
        assert!(!envelope.has_dataspaces);
    }
}
