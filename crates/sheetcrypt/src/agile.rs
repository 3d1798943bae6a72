//! Agile encryption pipeline.
//!
//! Encrypt: salts generated, verifier and key built, package encrypted, integrity computed,
//! descriptor serialized. Decrypt: password verified, key recovered, integrity checked, package
//! decrypted. Each stage fails terminally; nothing is returned from a partial run.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::AES_BLOCK_SIZE;
use crate::descriptor::{EncryptionInfo, KeyData};
use crate::error::OfficeCryptoError;
use crate::package::{build_stream, split_stream, PackageCipher};
use crate::verifier::{self, VerifierParams, SALT_LEN};
use crate::{integrity, DecryptOptions, EncryptOptions};

/// The two streams an encryption produces.
pub(crate) struct EncryptedParts {
    pub encryption_info: Vec<u8>,
    pub encrypted_package: Vec<u8>,
}

pub(crate) fn encrypt<R: RngCore + CryptoRng>(
    plain: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut R,
) -> Result<EncryptedParts, OfficeCryptoError> {
    opts.validate()?;

    let mut package_salt = vec![0u8; SALT_LEN];
    rng.fill_bytes(&mut package_salt);
    let mut intermediate_key = Zeroizing::new(vec![0u8; opts.cipher.key_len()]);
    rng.fill_bytes(&mut intermediate_key);
    log::debug!("generated package salt and {}-bit intermediate key", opts.cipher.key_bits());

    let password_encryptor = verifier::build(
        password,
        &intermediate_key,
        &VerifierParams {
            cipher: opts.cipher,
            hash: opts.hash,
            spin_count: opts.spin_count,
        },
        rng,
    )?;
    log::debug!(
        "built password verifier ({} {}, spin count {})",
        opts.cipher,
        opts.hash,
        opts.spin_count
    );

    let key_data = KeyData {
        salt: package_salt,
        block_size: AES_BLOCK_SIZE,
        cipher: opts.cipher,
        hash: opts.hash,
    };
    let ciphertext = PackageCipher {
        key: &intermediate_key,
        salt: &key_data.salt,
        cipher: key_data.cipher,
        hash: key_data.hash,
    }
    .encrypt(plain)?;
    let encrypted_package = build_stream(plain.len(), &ciphertext);
    log::debug!(
        "encrypted {} package bytes into {} stream bytes",
        plain.len(),
        encrypted_package.len()
    );

    let data_integrity = integrity::seal(&encrypted_package, &intermediate_key, &key_data, rng)?;
    log::debug!("computed package HMAC");

    let info = EncryptionInfo {
        key_data,
        data_integrity: Some(data_integrity),
        password: password_encryptor,
    };
    let encryption_info = info.to_bytes()?;
    log::debug!("serialized EncryptionInfo ({} bytes)", encryption_info.len());

    Ok(EncryptedParts {
        encryption_info,
        encrypted_package,
    })
}

pub(crate) fn decrypt(
    info: &EncryptionInfo,
    encrypted_package: &[u8],
    password: &str,
    opts: &DecryptOptions,
) -> Result<Vec<u8>, OfficeCryptoError> {
    if info.password.spin_count > opts.max_spin_count {
        return Err(OfficeCryptoError::UnsupportedEncryption(format!(
            "spin count {} exceeds the configured maximum of {}",
            info.password.spin_count, opts.max_spin_count
        )));
    }
    let (plain_len, ciphertext) = split_stream(encrypted_package)?;

    let h = verifier::verify(&info.password, password)?;
    log::debug!("password verified");

    let key = verifier::recover_intermediate_key(&info.password, &h, info.key_data.cipher.key_len())?;
    log::debug!("recovered intermediate key");

    if opts.verify_integrity {
        let data_integrity = info.data_integrity.as_ref().ok_or_else(|| {
            OfficeCryptoError::InvalidFormat(
                "EncryptionInfo has no dataIntegrity element".to_string(),
            )
        })?;
        integrity::verify(encrypted_package, &key, &info.key_data, data_integrity)?;
        log::debug!("package HMAC verified");
    } else {
        log::debug!("package HMAC check skipped");
    }

    let plain = PackageCipher {
        key: &key,
        salt: &info.key_data.salt,
        cipher: info.key_data.cipher,
        hash: info.key_data.hash,
    }
    .decrypt(ciphertext, plain_len)?;
    log::debug!("decrypted {} package bytes", plain.len());
    Ok(plain)
}
