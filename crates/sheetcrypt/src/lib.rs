//! Password encryption and decryption of OOXML packages (`.xlsx`, `.docx`, `.pptx`).
//!
//! Office protects a package by encrypting the whole ZIP with ECMA-376 "Agile" encryption and
//! storing the result in a CFB container next to an XML `EncryptionInfo` descriptor:
//!
//! - `EncryptionInfo`: version header plus the Agile XML descriptor
//! - `EncryptedPackage`: LE64 plaintext size plus the package, encrypted in 4096-byte segments
//! - `\x06DataSpaces/...`: fixed compatibility records naming the encryption transform
//!
//! ```
//! let opts = sheetcrypt::EncryptOptions {
//!     spin_count: 1_000,
//!     ..Default::default()
//! };
//! let container = sheetcrypt::encrypt(b"PK\x03\x04...", "hunter2", &opts)?;
//! assert!(sheetcrypt::is_encrypted_container(&container));
//! assert_eq!(sheetcrypt::decrypt(&container, "hunter2")?, b"PK\x03\x04...");
//! assert!(matches!(
//!     sheetcrypt::decrypt(&container, "wrong"),
//!     Err(sheetcrypt::OfficeCryptoError::InvalidPassword)
//! ));
//! # Ok::<(), sheetcrypt::OfficeCryptoError>(())
//! ```
//!
//! Only Agile encryption is implemented. Standard (binary descriptor) and Extensible descriptors
//! are recognised and rejected with [`OfficeCryptoError::UnsupportedEncryption`].

mod agile;
mod crypto;
mod dataspaces;
mod descriptor;
mod envelope;
mod error;
mod fs;
mod integrity;
mod kdf;
mod package;
mod verifier;


use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

pub use crate::crypto::{CipherAlgorithm, HashAlgorithm};
pub use crate::descriptor::{
    detect_scheme, DataIntegrity, EncryptionInfo, EncryptionScheme, KeyData, PasswordKeyEncryptor,
};
pub use crate::envelope::{ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM};
pub use crate::error::OfficeCryptoError;
pub use crate::fs::{
    decrypt_file, decrypt_file_with_options, decrypt_path, encrypt_file, is_encrypted_file,
};
pub use crate::package::SEGMENT_LEN;

/// Upper bound on `spinCount` accepted for encryption and, by default, for decryption.
pub const MAX_SPIN_COUNT: u32 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOptions {
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
    pub spin_count: u32,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            cipher: CipherAlgorithm::Aes256,
            hash: HashAlgorithm::Sha512,
            spin_count: 100_000,
        }
    }
}

impl EncryptOptions {
    pub fn validate(&self) -> Result<(), OfficeCryptoError> {
        if self.spin_count > MAX_SPIN_COUNT {
            return Err(OfficeCryptoError::InvalidOptions(format!(
                "spin count {} exceeds the maximum of {MAX_SPIN_COUNT}",
                self.spin_count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Check the `dataIntegrity` HMAC before decrypting. A descriptor without one is rejected
    /// unless this is off.
    pub verify_integrity: bool,
    /// Descriptors asking for more password-hash iterations are refused before any hashing.
    pub max_spin_count: u32,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            verify_integrity: true,
            max_spin_count: MAX_SPIN_COUNT,
        }
    }
}

/// Encrypt a plaintext package into a CFB container, drawing randomness from the OS.
pub fn encrypt(
    plain: &[u8],
    password: &str,
    opts: &EncryptOptions,
) -> Result<Vec<u8>, OfficeCryptoError> {
    encrypt_with_rng(plain, password, opts, &mut OsRng)
}

/// Like [`encrypt`], with a caller-supplied CSPRNG.
pub fn encrypt_with_rng<R: RngCore + CryptoRng>(
    plain: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut R,
) -> Result<Vec<u8>, OfficeCryptoError> {
    let parts = agile::encrypt(plain, password, opts, rng)?;
    envelope::write(&parts)
}

/// Decrypt an encrypted container and return the plaintext package.
pub fn decrypt(container: &[u8], password: &str) -> Result<Vec<u8>, OfficeCryptoError> {
    decrypt_with_options(container, password, &DecryptOptions::default())
}

pub fn decrypt_with_options(
    container: &[u8],
    password: &str,
    opts: &DecryptOptions,
) -> Result<Vec<u8>, OfficeCryptoError> {
    let envelope = envelope::read(container)?;
    let info = EncryptionInfo::parse(&envelope.encryption_info)?;
    log::debug!(
        "parsed EncryptionInfo ({} {}, spin count {})",
        info.key_data.cipher,
        info.key_data.hash,
        info.password.spin_count
    );
    agile::decrypt(&info, &envelope.encrypted_package, password, opts)
}

/// Cheap probe: true when `bytes` start with the CFB signature. Does not parse the container.
pub fn is_encrypted_container(bytes: &[u8]) -> bool {
    sheetcrypt_cfb::is_compound_file(bytes)
}

/// Parameters of an Agile descriptor, as reported by [`inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileSummary {
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
    pub key_encryptor_cipher: CipherAlgorithm,
    pub key_encryptor_hash: HashAlgorithm,
    pub spin_count: u32,
    pub package_salt_len: usize,
    pub key_salt_len: usize,
    pub has_data_integrity: bool,
}

/// What an encrypted container declares, without a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionSummary {
    pub version_major: u16,
    pub version_minor: u16,
    pub scheme: EncryptionScheme,
    /// Present for Agile descriptors.
    pub agile: Option<AgileSummary>,
    /// Plaintext size recorded in the `EncryptedPackage` prefix.
    pub package_size: Option<u64>,
    pub has_dataspaces: bool,
}

/// Describe an encrypted container. Non-Agile descriptors are reported, not rejected.
pub fn inspect(container: &[u8]) -> Result<EncryptionSummary, OfficeCryptoError> {
    let envelope = envelope::read(container)?;
    let (version_major, version_minor) = descriptor::read_version(&envelope.encryption_info)?;
    let scheme = detect_scheme(&envelope.encryption_info)?;

    let agile = match scheme {
        EncryptionScheme::Agile => {
            let info = EncryptionInfo::parse(&envelope.encryption_info)?;
            Some(AgileSummary {
                cipher: info.key_data.cipher,
                hash: info.key_data.hash,
                key_encryptor_cipher: info.password.cipher,
                key_encryptor_hash: info.password.hash,
                spin_count: info.password.spin_count,
                package_salt_len: info.key_data.salt.len(),
                key_salt_len: info.password.salt.len(),
                has_data_integrity: info.data_integrity.is_some(),
            })
        }
        _ => None,
    };

    let package_size = package::split_stream(&envelope.encrypted_package)
        .ok()
        .map(|(size, _)| size);

    Ok(EncryptionSummary {
        version_major,
        version_minor,
        scheme,
        agile,
        package_size,
        has_dataspaces: envelope.has_dataspaces,
    })
}
