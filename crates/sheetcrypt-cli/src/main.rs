use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sheetcrypt::{CipherAlgorithm, DecryptOptions, EncryptOptions, HashAlgorithm, OfficeCryptoError};
use tracing_subscriber::EnvFilter;

mod report;

const PASSWORD_ENV: &str = "SHEETCRYPT_PASSWORD";

#[derive(Parser)]
#[command(
    name = "sheetcrypt",
    version,
    about = "Encrypt, decrypt and inspect password-protected OOXML (.xlsx/.docx/.pptx) files."
)]
struct Cli {
    /// Log more (-v: info, -vv: debug). Without it, `RUST_LOG` applies, defaulting to warnings.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a plaintext package into an encrypted container.
    Encrypt {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        password: PasswordArgs,

        #[arg(long, value_enum, default_value_t = CipherArg::Aes256)]
        cipher: CipherArg,

        #[arg(long, value_enum, default_value_t = HashArg::Sha512)]
        hash: HashArg,

        /// Password-hash iterations.
        #[arg(long, default_value_t = EncryptOptions::default().spin_count)]
        spin_count: u32,
    },
    /// Decrypt an encrypted container back into the plaintext package.
    Decrypt {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        password: PasswordArgs,

        /// Decrypt even when the package HMAC is missing. A present HMAC is not checked either.
        #[arg(long)]
        no_verify_integrity: bool,

        /// Refuse files that ask for more password-hash iterations than this.
        #[arg(long, default_value_t = sheetcrypt::MAX_SPIN_COUNT)]
        max_spin_count: u32,
    },
    /// Report whether each file is an encrypted container (checks the signature only).
    Probe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the encryption parameters of a container. No password needed.
    Inspect {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct PasswordArgs {
    /// Password. Falls back to the `SHEETCRYPT_PASSWORD` environment variable.
    #[arg(long)]
    password: Option<String>,

    /// Read the password from a file (trailing newlines are trimmed).
    #[arg(long, value_name = "PATH", conflicts_with = "password")]
    password_file: Option<PathBuf>,
}

impl PasswordArgs {
    fn resolve(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(path) = self.password_file.as_deref() {
            let value = std::fs::read_to_string(path)
                .with_context(|| format!("read password file {}", path.display()))?;
            return Ok(value.trim_end_matches(&['\r', '\n'][..]).to_string());
        }
        std::env::var(PASSWORD_ENV).map_err(|_| {
            anyhow::anyhow!("a password is required (--password, --password-file or {PASSWORD_ENV})")
        })
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CipherArg {
    Aes128,
    Aes192,
    Aes256,
}

impl From<CipherArg> for CipherAlgorithm {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Aes128 => CipherAlgorithm::Aes128,
            CipherArg::Aes192 => CipherAlgorithm::Aes192,
            CipherArg::Aes256 => CipherAlgorithm::Aes256,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HashArg {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl From<HashArg> for HashAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Sha1 => HashAlgorithm::Sha1,
            HashArg::Sha256 => HashAlgorithm::Sha256,
            HashArg::Sha384 => HashAlgorithm::Sha384,
            HashArg::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    // `try_init` also installs the `log` bridge.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// 2: wrong password, 3: integrity failure, 4: malformed file, 5: unsupported encryption.
fn exit_code(err: &anyhow::Error) -> u8 {
    let Some(err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<OfficeCryptoError>())
    else {
        return 1;
    };
    match err {
        OfficeCryptoError::InvalidPassword => 2,
        OfficeCryptoError::IntegrityCheckFailed => 3,
        OfficeCryptoError::Container(_) | OfficeCryptoError::InvalidFormat(_) => 4,
        OfficeCryptoError::UnsupportedEncryption(_) => 5,
        OfficeCryptoError::InvalidOptions(_) | OfficeCryptoError::Io(_) => 1,
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Encrypt {
            input,
            output,
            password,
            cipher,
            hash,
            spin_count,
        } => {
            let password = password.resolve()?;
            let opts = EncryptOptions {
                cipher: cipher.into(),
                hash: hash.into(),
                spin_count,
            };
            tracing::info!(
                input = %input.display(),
                cipher = %opts.cipher,
                hash = %opts.hash,
                spin_count,
                "encrypting"
            );
            sheetcrypt::encrypt_file(&input, &output, &password, &opts)
                .with_context(|| format!("encrypt {}", input.display()))?;
            tracing::info!(output = %output.display(), "wrote encrypted container");
            Ok(())
        }
        Command::Decrypt {
            input,
            output,
            password,
            no_verify_integrity,
            max_spin_count,
        } => {
            let password = password.resolve()?;
            let opts = DecryptOptions {
                verify_integrity: !no_verify_integrity,
                max_spin_count,
            };
            if no_verify_integrity {
                tracing::warn!("package integrity check disabled");
            }
            tracing::info!(input = %input.display(), "decrypting");
            sheetcrypt::decrypt_file_with_options(&input, &output, &password, &opts)
                .with_context(|| format!("decrypt {}", input.display()))?;
            tracing::info!(output = %output.display(), "wrote decrypted package");
            Ok(())
        }
        Command::Probe { files } => {
            let mut out = String::new();
            for file in &files {
                let state = if sheetcrypt::is_encrypted_file(file) {
                    "encrypted"
                } else {
                    "not encrypted"
                };
                out.push_str(&format!("{}: {state}\n", file.display()));
            }
            emit(&out)
        }
        Command::Inspect { file, format } => {
            let bytes = read_input(&file)?;
            let summary = sheetcrypt::inspect(&bytes)
                .with_context(|| format!("inspect {}", file.display()))?;
            let path = file.to_string_lossy();
            let out = match format {
                OutputFormat::Text => report::render_text(&path, &summary),
                OutputFormat::Json => report::render_json(&path, &summary)?,
            };
            emit(&out)
        }
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read {}", path.display()))
}

/// Write to stdout. A closed pipe (`sheetcrypt inspect ... | head`) is not an error.
fn emit(text: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match handle.write_all(text.as_bytes()).and_then(|()| handle.flush()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err).context("write to stdout"),
    }
}
