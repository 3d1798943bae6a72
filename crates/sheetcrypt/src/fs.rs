//! File-level helpers. Outputs are written atomically: a temp file in the destination directory is
//! filled, synced and renamed into place, so a failed run never leaves a partial file behind.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::OfficeCryptoError;
use crate::{decrypt, decrypt_with_options, encrypt, DecryptOptions, EncryptOptions};

/// Encrypt the package at `input` and write the container to `output`.
pub fn encrypt_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    password: &str,
    opts: &EncryptOptions,
) -> Result<(), OfficeCryptoError> {
    let plain = fs::read(input.as_ref())?;
    let container = encrypt(&plain, password, opts)?;
    write_atomic(output.as_ref(), &container)
}

/// Decrypt the container at `input` and write the plaintext package to `output`.
pub fn decrypt_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    password: &str,
) -> Result<(), OfficeCryptoError> {
    decrypt_file_with_options(input, output, password, &DecryptOptions::default())
}

pub fn decrypt_file_with_options(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    password: &str,
    opts: &DecryptOptions,
) -> Result<(), OfficeCryptoError> {
    let container = fs::read(input.as_ref())?;
    let plain = decrypt_with_options(&container, password, opts)?;
    write_atomic(output.as_ref(), &plain)
}

/// Decrypt the container at `path` into memory.
pub fn decrypt_path(path: impl AsRef<Path>, password: &str) -> Result<Vec<u8>, OfficeCryptoError> {
    let container = fs::read(path.as_ref())?;
    decrypt(&container, password)
}

/// Check the CFB signature at the start of `path`. Reads at most eight bytes; unreadable files
/// are reported as not encrypted.
pub fn is_encrypted_file(path: impl AsRef<Path>) -> bool {
    let Ok(file) = File::open(path.as_ref()) else {
        return false;
    };
    let mut magic = Vec::with_capacity(sheetcrypt_cfb::SIGNATURE.len());
    match file
        .take(sheetcrypt_cfb::SIGNATURE.len() as u64)
        .read_to_end(&mut magic)
    {
        Ok(_) => crate::is_encrypted_container(&magic),
        Err(_) => false,
    }
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), OfficeCryptoError> {
    // `Path::parent` is `Some("")` for bare file names.
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|err| err.error)?;
    log::debug!("wrote {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> EncryptOptions {
        EncryptOptions {
            spin_count: 10,
            ..EncryptOptions::default()
        }
    }

    #[test]
    fn encrypt_then_decrypt_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let plain_path = dir.path().join("book.xlsx");
        let enc_path = dir.path().join("out/book.encrypted.xlsx");
        let dec_path = dir.path().join("book.decrypted.xlsx");
        fs::write(&plain_path, b"PK\x03\x04 workbook").unwrap();

        encrypt_file(&plain_path, &enc_path, "pw", &fast()).unwrap();
        assert!(is_encrypted_file(&enc_path));
        assert!(!is_encrypted_file(&plain_path));

        decrypt_file(&enc_path, &dec_path, "pw").unwrap();
        assert_eq!(decrypt_path(&enc_path, "pw").unwrap(), b"PK\x03\x04 workbook");
        assert_eq!(fs::read(&dec_path).unwrap(), b"PK\x03\x04 workbook");
    }

    #[test]
    fn failed_decrypt_leaves_no_output() {
        let dir = tempfile::tempdir().expect("temp dir");
        let plain_path = dir.path().join("book.xlsx");
        let enc_path = dir.path().join("book.enc");
        let dec_path = dir.path().join("book.out");
        fs::write(&plain_path, b"data").unwrap();
        encrypt_file(&plain_path, &enc_path, "pw", &fast()).unwrap();

        let err = decrypt_file(&enc_path, &dec_path, "nope");
        assert!(matches!(err, Err(OfficeCryptoError::InvalidPassword)));
        assert!(!dec_path.exists());
        // Only the two inputs remain; no temp file was left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn short_and_missing_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let short = dir.path().join("short");
        fs::write(&short, [0xD0, 0xCF]).unwrap();
        assert!(!is_encrypted_file(&short));
        assert!(!is_encrypted_file(dir.path().join("missing")));
        assert!(!is_encrypted_file(dir.path()));
        assert!(matches!(
            decrypt_path(dir.path().join("missing"), "pw"),
            Err(OfficeCryptoError::Io(_))
        ));
    }
}
