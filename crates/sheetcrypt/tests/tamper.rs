//! Modified containers must fail the integrity check rather than decrypt to garbage.

use rand::rngs::StdRng;
use rand::SeedableRng;
use sheetcrypt::{
    decrypt, decrypt_with_options, encrypt_with_rng, DecryptOptions, EncryptOptions,
    OfficeCryptoError, ENCRYPTED_PACKAGE_STREAM,
};
use sheetcrypt_cfb::{CompoundFile, ContainerBuilder};

const PASSWORD: &str = "tamper";

fn encrypted(plain: &[u8]) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(99);
    let opts = EncryptOptions {
        spin_count: 50,
        ..EncryptOptions::default()
    };
    encrypt_with_rng(plain, PASSWORD, &opts, &mut rng).expect("encrypt")
}

/// Rebuild `container` with `edit` applied to its `EncryptedPackage` stream.
fn rewrite_package(container: &[u8], mut edit: impl FnMut(&mut Vec<u8>)) -> Vec<u8> {
    let file = CompoundFile::parse(container).expect("parse");
    let mut builder = ContainerBuilder::new();
    for (path, entry) in file.paths() {
        if !entry.is_stream() {
            continue;
        }
        let mut data = file.read_stream(path).expect("read stream");
        if path == ENCRYPTED_PACKAGE_STREAM {
            edit(&mut data);
        }
        builder.add_stream(path, data).expect("add stream");
    }
    builder.finish().expect("finish")
}

#[test]
fn untouched_rebuild_still_decrypts() {
    let plain = b"integrity".repeat(600);
    let container = rewrite_package(&encrypted(&plain), |_| {});
    assert_eq!(decrypt(&container, PASSWORD).unwrap(), plain);
}

#[test]
fn flipped_ciphertext_fails_integrity() {
    let plain = b"integrity".repeat(600);
    let original = encrypted(&plain);
    for offset in [8, 9, 100, 4096 + 8, 5000] {
        let container = rewrite_package(&original, |stream| stream[offset] ^= 0x80);
        assert!(
            matches!(
                decrypt(&container, PASSWORD),
                Err(OfficeCryptoError::IntegrityCheckFailed)
            ),
            "offset {offset}"
        );
    }
}

#[test]
fn altered_size_prefix_fails_integrity() {
    let container = rewrite_package(&encrypted(&[7u8; 100]), |stream| stream[0] = 50);
    assert!(matches!(
        decrypt(&container, PASSWORD),
        Err(OfficeCryptoError::IntegrityCheckFailed)
    ));
}

#[test]
fn appended_bytes_fail_integrity() {
    let container = rewrite_package(&encrypted(&[7u8; 100]), |stream| {
        stream.extend_from_slice(&[0u8; 16])
    });
    assert!(matches!(
        decrypt(&container, PASSWORD),
        Err(OfficeCryptoError::IntegrityCheckFailed)
    ));
}

#[test]
fn wrong_password_is_reported_before_integrity() {
    let container = rewrite_package(&encrypted(&[7u8; 100]), |stream| stream[20] ^= 1);
    assert!(matches!(
        decrypt(&container, "not it"),
        Err(OfficeCryptoError::InvalidPassword)
    ));
}

#[test]
fn skipping_integrity_decrypts_tampered_data() {
    let plain = vec![0x41u8; 64];
    let container = rewrite_package(&encrypted(&plain), |stream| stream[8] ^= 0xFF);
    let opts = DecryptOptions {
        verify_integrity: false,
        ..DecryptOptions::default()
    };
    let out = decrypt_with_options(&container, PASSWORD, &opts).unwrap();
    assert_eq!(out.len(), plain.len());
    // CBC: the damaged block is garbled; later blocks are intact.
    assert_ne!(out[..16], plain[..16]);
    assert_eq!(out[32..], plain[32..]);
}

#[test]
fn truncated_package_is_a_format_error() {
    let container = rewrite_package(&encrypted(&[7u8; 100]), |stream| stream.truncate(40));
    let opts = DecryptOptions {
        verify_integrity: false,
        ..DecryptOptions::default()
    };
    let err = decrypt_with_options(&container, PASSWORD, &opts).unwrap_err();
    assert!(err.is_format_error(), "{err:?}");
}
