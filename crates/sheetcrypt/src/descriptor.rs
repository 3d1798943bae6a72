//! The `EncryptionInfo` stream.
//!
//! An Agile descriptor is an 8-byte binary header (`major=4`, `minor=4`, `flags=0x40`) followed by
//! UTF-8 XML. Generation reproduces Excel's element and attribute order byte for byte; parsing is
//! keyed by local name and tolerates the variations other producers emit.

use std::borrow::Cow;
use std::fmt;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::crypto::{CipherAlgorithm, HashAlgorithm, AES_BLOCK_SIZE};
use crate::error::OfficeCryptoError;

pub const AGILE_MAJOR: u16 = 4;
pub const AGILE_MINOR: u16 = 4;
/// `fAgile` reserved flag value carried by every Agile header.
pub const AGILE_FLAGS: u32 = 0x40;

pub const ENCRYPTION_NS: &str = "http://schemas.microsoft.com/office/2006/encryption";
pub const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
pub const CERTIFICATE_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";

const CHAINING_MODE_CBC: &str = "ChainingModeCBC";
const HEADER_LEN: usize = 8;

/// Encryption scheme named by the `EncryptionInfo` version fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionScheme {
    Agile,
    Standard,
    Extensible,
    Unknown { major: u16, minor: u16 },
}

impl fmt::Display for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionScheme::Agile => f.write_str("Agile"),
            EncryptionScheme::Standard => f.write_str("Standard"),
            EncryptionScheme::Extensible => f.write_str("Extensible"),
            EncryptionScheme::Unknown { major, minor } => write!(f, "unknown ({major}.{minor})"),
        }
    }
}

/// Classify an `EncryptionInfo` stream by its version fields.
pub fn detect_scheme(encryption_info: &[u8]) -> Result<EncryptionScheme, OfficeCryptoError> {
    let (major, minor) = read_version(encryption_info)?;
    Ok(match (major, minor) {
        (4, 4) => EncryptionScheme::Agile,
        (2..=4, 2) => EncryptionScheme::Standard,
        (3 | 4, 3) => EncryptionScheme::Extensible,
        (major, minor) => EncryptionScheme::Unknown { major, minor },
    })
}

pub(crate) fn read_version(bytes: &[u8]) -> Result<(u16, u16), OfficeCryptoError> {
    match bytes {
        [a, b, c, d, ..] => Ok((u16::from_le_bytes([*a, *b]), u16::from_le_bytes([*c, *d]))),
        _ => Err(OfficeCryptoError::InvalidFormat(format!(
            "EncryptionInfo is {} bytes, too short for a version header",
            bytes.len()
        ))),
    }
}

/// `<keyData>`: parameters of the package cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyData {
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
}

/// `<dataIntegrity>`: the encrypted HMAC key and HMAC value over `EncryptedPackage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntegrity {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

/// The password `<p:encryptedKey>` key encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordKeyEncryptor {
    pub spin_count: u32,
    pub salt: Vec<u8>,
    pub block_size: usize,
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
    pub encrypted_verifier_hash_input: Vec<u8>,
    pub encrypted_verifier_hash_value: Vec<u8>,
    pub encrypted_key_value: Vec<u8>,
}

/// A parsed or to-be-written Agile descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub key_data: KeyData,
    /// Absent in some third-party output. Decryption refuses to skip the integrity check unless
    /// asked to.
    pub data_integrity: Option<DataIntegrity>,
    pub password: PasswordKeyEncryptor,
}

impl EncryptionInfo {
    /// Parse a full `EncryptionInfo` stream (header and XML).
    pub fn parse(bytes: &[u8]) -> Result<Self, OfficeCryptoError> {
        let stripped = strip_trailing_nuls(bytes);
        if stripped.len() != bytes.len() {
            log::warn!(
                "EncryptionInfo carries {} bytes of trailing NUL padding",
                bytes.len() - stripped.len()
            );
        }

        match detect_scheme(stripped)? {
            EncryptionScheme::Agile => {}
            EncryptionScheme::Standard => {
                return Err(OfficeCryptoError::UnsupportedEncryption(
                    "Standard (binary) encryption descriptors are not supported".to_string(),
                ))
            }
            other => {
                return Err(OfficeCryptoError::UnsupportedEncryption(format!(
                    "{other} EncryptionInfo version"
                )))
            }
        }

        let xml = stripped.get(HEADER_LEN..).ok_or_else(|| {
            OfficeCryptoError::InvalidFormat("EncryptionInfo header is truncated".to_string())
        })?;
        parse_agile_xml(xml)
    }

    /// Serialize to a full `EncryptionInfo` stream.
    pub fn to_bytes(&self) -> Result<Vec<u8>, OfficeCryptoError> {
        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(&AGILE_MAJOR.to_le_bytes());
        out.extend_from_slice(&AGILE_MINOR.to_le_bytes());
        out.extend_from_slice(&AGILE_FLAGS.to_le_bytes());
        out.extend_from_slice(&self.to_xml()?);
        Ok(out)
    }

    /// The XML body, in Excel's exact layout.
    pub fn to_xml(&self) -> Result<Vec<u8>, OfficeCryptoError> {
        let mut writer = Writer::new(Vec::with_capacity(1024));

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_write_error)?;
        writer
            .write_event(Event::Text(BytesText::from_escaped("\r\n")))
            .map_err(xml_write_error)?;

        let mut root = BytesStart::new("encryption");
        root.push_attribute(("xmlns", ENCRYPTION_NS));
        root.push_attribute(("xmlns:p", PASSWORD_KEY_ENCRYPTOR_NS));
        root.push_attribute(("xmlns:c", CERTIFICATE_KEY_ENCRYPTOR_NS));
        writer
            .write_event(Event::Start(root))
            .map_err(xml_write_error)?;

        let key_data = &self.key_data;
        let mut elem = BytesStart::new("keyData");
        push_cipher_params(
            &mut elem,
            key_data.salt.len(),
            key_data.block_size,
            key_data.cipher,
            key_data.hash,
        );
        elem.push_attribute(("saltValue", STANDARD.encode(&key_data.salt).as_str()));
        writer
            .write_event(Event::Empty(elem))
            .map_err(xml_write_error)?;

        if let Some(integrity) = &self.data_integrity {
            let mut elem = BytesStart::new("dataIntegrity");
            elem.push_attribute((
                "encryptedHmacKey",
                STANDARD.encode(&integrity.encrypted_hmac_key).as_str(),
            ));
            elem.push_attribute((
                "encryptedHmacValue",
                STANDARD.encode(&integrity.encrypted_hmac_value).as_str(),
            ));
            writer
                .write_event(Event::Empty(elem))
                .map_err(xml_write_error)?;
        }

        writer
            .write_event(Event::Start(BytesStart::new("keyEncryptors")))
            .map_err(xml_write_error)?;
        let mut encryptor = BytesStart::new("keyEncryptor");
        encryptor.push_attribute(("uri", PASSWORD_KEY_ENCRYPTOR_NS));
        writer
            .write_event(Event::Start(encryptor))
            .map_err(xml_write_error)?;

        let password = &self.password;
        let mut elem = BytesStart::new("p:encryptedKey");
        elem.push_attribute(("spinCount", password.spin_count.to_string().as_str()));
        push_cipher_params(
            &mut elem,
            password.salt.len(),
            password.block_size,
            password.cipher,
            password.hash,
        );
        elem.push_attribute(("saltValue", STANDARD.encode(&password.salt).as_str()));
        elem.push_attribute((
            "encryptedVerifierHashInput",
            STANDARD
                .encode(&password.encrypted_verifier_hash_input)
                .as_str(),
        ));
        elem.push_attribute((
            "encryptedVerifierHashValue",
            STANDARD
                .encode(&password.encrypted_verifier_hash_value)
                .as_str(),
        ));
        elem.push_attribute((
            "encryptedKeyValue",
            STANDARD.encode(&password.encrypted_key_value).as_str(),
        ));
        writer
            .write_event(Event::Empty(elem))
            .map_err(xml_write_error)?;

        for name in ["keyEncryptor", "keyEncryptors", "encryption"] {
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_write_error)?;
        }

        Ok(writer.into_inner())
    }
}

fn push_cipher_params(
    elem: &mut BytesStart<'_>,
    salt_size: usize,
    block_size: usize,
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
) {
    elem.push_attribute(("saltSize", salt_size.to_string().as_str()));
    elem.push_attribute(("blockSize", block_size.to_string().as_str()));
    elem.push_attribute(("keyBits", cipher.key_bits().to_string().as_str()));
    elem.push_attribute(("hashSize", hash.digest_len().to_string().as_str()));
    elem.push_attribute(("cipherAlgorithm", cipher.name()));
    elem.push_attribute(("cipherChaining", CHAINING_MODE_CBC));
    elem.push_attribute(("hashAlgorithm", hash.name()));
}

fn xml_write_error<E: fmt::Display>(err: E) -> OfficeCryptoError {
    OfficeCryptoError::InvalidFormat(format!("failed to write EncryptionInfo XML: {err}"))
}

fn strip_trailing_nuls(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |idx| idx + 1);
    &bytes[..end]
}

fn invalid(message: impl Into<String>) -> OfficeCryptoError {
    OfficeCryptoError::InvalidFormat(message.into())
}

fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[idx + 1..])
        .unwrap_or(name)
}

fn element_prefix(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[..idx])
        .unwrap_or(&[])
}

/// Attributes of one element, keyed by local name, with namespace declarations split out.
struct Attributes {
    values: Vec<(String, String)>,
    namespaces: Vec<(Vec<u8>, String)>,
}

impl Attributes {
    fn read(elem: &BytesStart<'_>) -> Result<Self, OfficeCryptoError> {
        let mut values = Vec::new();
        let mut namespaces = Vec::new();
        for attr in elem.attributes().with_checks(false) {
            let attr = attr.map_err(|err| invalid(format!("invalid XML attribute: {err}")))?;
            let key = attr.key.as_ref();
            let value = attr
                .unescape_value()
                .map_err(|err| invalid(format!("invalid XML attribute value: {err}")))?
                .into_owned();

            if key == b"xmlns" {
                namespaces.push((Vec::new(), value));
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                namespaces.push((prefix.to_vec(), value));
            } else {
                let name = String::from_utf8_lossy(local_name(key)).into_owned();
                values.push((name, value));
            }
        }
        Ok(Self { values, namespaces })
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, element: &str, name: &str) -> Result<&str, OfficeCryptoError> {
        self.get(name)
            .ok_or_else(|| invalid(format!("missing {element}.{name}")))
    }

    fn number(&self, element: &str, name: &str) -> Result<Option<u32>, OfficeCryptoError> {
        self.get(name)
            .map(|value| {
                value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| invalid(format!("{element}.{name} is not a number: {value:?}")))
            })
            .transpose()
    }

    fn base64(&self, element: &str, name: &str) -> Result<Vec<u8>, OfficeCryptoError> {
        decode_base64(self.required(element, name)?)
            .map_err(|_| invalid(format!("{element}.{name} is not valid base64")))
    }
}

/// Base64 as other producers write it: possibly wrapped with whitespace, possibly without `=`
/// padding.
fn decode_base64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let cleaned: Cow<'_, str> = if value.bytes().any(|b| b.is_ascii_whitespace()) {
        Cow::Owned(value.chars().filter(|c| !c.is_ascii_whitespace()).collect())
    } else {
        Cow::Borrowed(value)
    };
    STANDARD
        .decode(cleaned.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(cleaned.as_bytes()))
}

/// Parameters shared by `<keyData>` and `<p:encryptedKey>`.
struct CipherParams {
    salt: Vec<u8>,
    block_size: usize,
    cipher: CipherAlgorithm,
    hash: HashAlgorithm,
}

impl CipherParams {
    fn read(element: &str, attrs: &Attributes) -> Result<Self, OfficeCryptoError> {
        let hash = HashAlgorithm::from_name(attrs.required(element, "hashAlgorithm")?)?;
        let key_bits = attrs
            .number(element, "keyBits")?
            .ok_or_else(|| invalid(format!("missing {element}.keyBits")))?;
        let cipher =
            CipherAlgorithm::from_descriptor(attrs.required(element, "cipherAlgorithm")?, key_bits)?;

        if let Some(chaining) = attrs.get("cipherChaining") {
            if chaining.trim() != CHAINING_MODE_CBC {
                return Err(OfficeCryptoError::UnsupportedEncryption(format!(
                    "cipher chaining {chaining:?}"
                )));
            }
        }

        let block_size = attrs
            .number(element, "blockSize")?
            .map_or(AES_BLOCK_SIZE, |size| size as usize);
        if block_size != AES_BLOCK_SIZE {
            return Err(OfficeCryptoError::UnsupportedEncryption(format!(
                "{element}.blockSize {block_size}"
            )));
        }

        let salt = attrs.base64(element, "saltValue")?;
        if salt.is_empty() {
            return Err(invalid(format!("{element}.saltValue is empty")));
        }
        if let Some(salt_size) = attrs.number(element, "saltSize")? {
            if salt_size as usize != salt.len() {
                log::warn!(
                    "{element}.saltSize is {salt_size} but saltValue decodes to {} bytes",
                    salt.len()
                );
            }
        }
        if let Some(hash_size) = attrs.number(element, "hashSize")? {
            if hash_size as usize != hash.digest_len() {
                log::warn!(
                    "{element}.hashSize is {hash_size} but {hash} digests are {} bytes",
                    hash.digest_len()
                );
            }
        }

        Ok(Self {
            salt,
            block_size,
            cipher,
            hash,
        })
    }
}

/// One open element: its local name, namespace declarations and `uri` attribute.
struct Frame {
    local: Vec<u8>,
    namespaces: Vec<(Vec<u8>, String)>,
    uri: Option<String>,
}

/// Parser state across XML events.
#[derive(Default)]
struct AgileXmlParser {
    stack: Vec<Frame>,
    key_data: Option<KeyData>,
    data_integrity: Option<DataIntegrity>,
    password: Option<PasswordKeyEncryptor>,
}

impl AgileXmlParser {
    fn resolve_namespace(&self, prefix: &[u8]) -> Option<&str> {
        self.stack.iter().rev().find_map(|frame| {
            frame
                .namespaces
                .iter()
                .find(|(p, _)| p.as_slice() == prefix)
                .map(|(_, uri)| uri.as_str())
        })
    }

    /// `uri` of the innermost open `<keyEncryptor>`.
    fn key_encryptor_uri(&self) -> Option<&str> {
        self.stack
            .iter()
            .rev()
            .find(|frame| frame.local == b"keyEncryptor")
            .and_then(|frame| frame.uri.as_deref())
    }

    fn open(&mut self, elem: &BytesStart<'_>) -> Result<(), OfficeCryptoError> {
        let attrs = Attributes::read(elem)?;
        let name = elem.name();
        let local = local_name(name.as_ref()).to_vec();
        let prefix = element_prefix(name.as_ref()).to_vec();

        self.stack.push(Frame {
            local: local.clone(),
            namespaces: attrs.namespaces.clone(),
            uri: attrs.get("uri").map(str::to_string),
        });

        match local.as_slice() {
            b"keyData" if self.key_data.is_none() => {
                let params = CipherParams::read("keyData", &attrs)?;
                self.key_data = Some(KeyData {
                    salt: params.salt,
                    block_size: params.block_size,
                    cipher: params.cipher,
                    hash: params.hash,
                });
            }
            b"dataIntegrity" if self.data_integrity.is_none() => {
                self.data_integrity = Some(DataIntegrity {
                    encrypted_hmac_key: attrs.base64("dataIntegrity", "encryptedHmacKey")?,
                    encrypted_hmac_value: attrs.base64("dataIntegrity", "encryptedHmacValue")?,
                });
            }
            b"encryptedKey" if self.password.is_none() => {
                let namespace = self.resolve_namespace(&prefix);
                let uri = self.key_encryptor_uri();
                let is_certificate = namespace == Some(CERTIFICATE_KEY_ENCRYPTOR_NS)
                    || uri == Some(CERTIFICATE_KEY_ENCRYPTOR_NS);
                let is_password = namespace == Some(PASSWORD_KEY_ENCRYPTOR_NS)
                    || uri == Some(PASSWORD_KEY_ENCRYPTOR_NS)
                    || attrs.get("spinCount").is_some();
                if !is_certificate && is_password {
                    self.password = Some(read_password_encryptor(&attrs)?);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stack.pop();
    }

    fn finish(self) -> Result<EncryptionInfo, OfficeCryptoError> {
        Ok(EncryptionInfo {
            key_data: self
                .key_data
                .ok_or_else(|| invalid("missing <keyData> element"))?,
            data_integrity: self.data_integrity,
            password: self
                .password
                .ok_or_else(|| invalid("missing password <encryptedKey> element"))?,
        })
    }
}

fn read_password_encryptor(attrs: &Attributes) -> Result<PasswordKeyEncryptor, OfficeCryptoError> {
    const ELEMENT: &str = "encryptedKey";
    let spin_count = attrs
        .number(ELEMENT, "spinCount")?
        .ok_or_else(|| invalid("missing encryptedKey.spinCount"))?;
    let params = CipherParams::read(ELEMENT, attrs)?;
    Ok(PasswordKeyEncryptor {
        spin_count,
        salt: params.salt,
        block_size: params.block_size,
        cipher: params.cipher,
        hash: params.hash,
        encrypted_verifier_hash_input: attrs.base64(ELEMENT, "encryptedVerifierHashInput")?,
        encrypted_verifier_hash_value: attrs.base64(ELEMENT, "encryptedVerifierHashValue")?,
        encrypted_key_value: attrs.base64(ELEMENT, "encryptedKeyValue")?,
    })
}

fn parse_agile_xml(xml: &[u8]) -> Result<EncryptionInfo, OfficeCryptoError> {
    let xml = xml.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(xml);
    let xml = std::str::from_utf8(xml)
        .map_err(|_| invalid("EncryptionInfo XML is not valid UTF-8"))?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parser = AgileXmlParser::default();
    loop {
        let event = reader
            .read_event()
            .map_err(|err| invalid(format!("EncryptionInfo XML parse error: {err}")))?;
        match event {
            Event::Start(elem) => parser.open(&elem)?,
            Event::Empty(elem) => {
                parser.open(&elem)?;
                parser.close();
            }
            Event::End(_) => parser.close(),
            Event::Eof => break,
            _ => {}
        }
    }
    parser.finish()
}
