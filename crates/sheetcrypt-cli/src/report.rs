//! `inspect` output.

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;
use sheetcrypt::{AgileSummary, EncryptionScheme, EncryptionSummary};

#[derive(Debug, Serialize)]
struct JsonAgile {
    cipher: String,
    hash: String,
    key_encryptor_cipher: String,
    key_encryptor_hash: String,
    spin_count: u32,
    package_salt_len: usize,
    key_salt_len: usize,
    data_integrity: bool,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    path: &'a str,
    version: String,
    scheme: &'static str,
    agile: Option<JsonAgile>,
    package_size: Option<u64>,
    dataspaces: bool,
}

fn scheme_label(scheme: EncryptionScheme) -> &'static str {
    match scheme {
        EncryptionScheme::Agile => "agile",
        EncryptionScheme::Standard => "standard",
        EncryptionScheme::Extensible => "extensible",
        EncryptionScheme::Unknown { .. } => "unknown",
    }
}

fn present(flag: bool) -> &'static str {
    if flag {
        "present"
    } else {
        "absent"
    }
}

pub fn render_text(path: &str, summary: &EncryptionSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{path}");
    let _ = writeln!(
        out,
        "  scheme: {} ({}.{})",
        summary.scheme, summary.version_major, summary.version_minor
    );
    if let Some(AgileSummary {
        cipher,
        hash,
        key_encryptor_cipher,
        key_encryptor_hash,
        spin_count,
        package_salt_len,
        key_salt_len,
        has_data_integrity,
    }) = &summary.agile
    {
        let _ = writeln!(out, "  package cipher: {cipher} / {hash}");
        let _ = writeln!(out, "  key encryptor: {key_encryptor_cipher} / {key_encryptor_hash}");
        let _ = writeln!(out, "  spin count: {spin_count}");
        let _ = writeln!(out, "  salt sizes: package {package_salt_len}, key {key_salt_len}");
        let _ = writeln!(out, "  data integrity: {}", present(*has_data_integrity));
    }
    match summary.package_size {
        Some(size) => {
            let _ = writeln!(out, "  package size: {size}");
        }
        None => {
            let _ = writeln!(out, "  package size: (unreadable)");
        }
    }
    let _ = writeln!(out, "  dataspaces: {}", present(summary.has_dataspaces));
    out
}

pub fn render_json(path: &str, summary: &EncryptionSummary) -> Result<String> {
    let report = JsonReport {
        path,
        version: format!("{}.{}", summary.version_major, summary.version_minor),
        scheme: scheme_label(summary.scheme),
        agile: summary.agile.as_ref().map(|agile| JsonAgile {
            cipher: agile.cipher.to_string(),
            hash: agile.hash.to_string(),
            key_encryptor_cipher: agile.key_encryptor_cipher.to_string(),
            key_encryptor_hash: agile.key_encryptor_hash.to_string(),
            spin_count: agile.spin_count,
            package_salt_len: agile.package_salt_len,
            key_salt_len: agile.key_salt_len,
            data_integrity: agile.has_data_integrity,
        }),
        package_size: summary.package_size,
        dataspaces: summary.has_dataspaces,
    };
    let mut out = serde_json::to_string(&report)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheetcrypt::{CipherAlgorithm, HashAlgorithm};

    fn agile_summary() -> EncryptionSummary {
        EncryptionSummary {
            version_major: 4,
            version_minor: 4,
            scheme: EncryptionScheme::Agile,
            agile: Some(AgileSummary {
                cipher: CipherAlgorithm::Aes256,
                hash: HashAlgorithm::Sha512,
                key_encryptor_cipher: CipherAlgorithm::Aes256,
                key_encryptor_hash: HashAlgorithm::Sha512,
                spin_count: 100_000,
                package_salt_len: 16,
                key_salt_len: 16,
                has_data_integrity: true,
            }),
            package_size: Some(1234),
            has_dataspaces: true,
        }
    }

    #[test]
    fn text_report() {
        assert_eq!(
            render_text("book.xlsx", &agile_summary()),
            "book.xlsx\n\
             \x20 scheme: Agile (4.4)\n\
             \x20 package cipher: AES-256 / SHA512\n\
             \x20 key encryptor: AES-256 / SHA512\n\
             \x20 spin count: 100000\n\
             \x20 salt sizes: package 16, key 16\n\
             \x20 data integrity: present\n\
             \x20 package size: 1234\n\
             \x20 dataspaces: present\n"
        );
    }

    #[test]
    fn json_report() {
        let json = render_json("book.xlsx", &agile_summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["scheme"], "agile");
        assert_eq!(value["version"], "4.4");
        assert_eq!(value["agile"]["cipher"], "AES-256");
        assert_eq!(value["agile"]["spin_count"], 100_000);
        assert_eq!(value["package_size"], 1234);
        assert_eq!(value["dataspaces"], true);
    }

    #[test]
    fn non_agile_report_has_no_parameters() {
        let summary = EncryptionSummary {
            version_major: 3,
            version_minor: 2,
            scheme: EncryptionScheme::Standard,
            agile: None,
            package_size: None,
            has_dataspaces: false,
        };
        let text = render_text("old.xlsx", &summary);
        assert!(text.contains("scheme: Standard (3.2)"), "{text}");
        assert!(!text.contains("spin count"));
        let value: serde_json::Value =
            serde_json::from_str(&render_json("old.xlsx", &summary).unwrap()).unwrap();
        assert!(value["agile"].is_null());
        assert!(value["package_size"].is_null());
    }
}
