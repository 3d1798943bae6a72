use sheetcrypt_cfb::CfbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OfficeCryptoError {
    /// The compound-file container itself is malformed.
    #[error("malformed container: {0}")]
    Container(#[from] CfbError),
    /// The container parsed but its encryption streams are malformed.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),
    #[error("invalid encryption options: {0}")]
    InvalidOptions(String),
    /// Wrong password, or a verifier that cannot be decrypted. The two are not distinguished.
    #[error("invalid password")]
    InvalidPassword,
    /// The password verified but the package HMAC did not match.
    #[error("integrity check failed")]
    IntegrityCheckFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OfficeCryptoError {
    /// True for errors that mean "this is not a well-formed encrypted container".
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            OfficeCryptoError::Container(_) | OfficeCryptoError::InvalidFormat(_)
        )
    }
}
