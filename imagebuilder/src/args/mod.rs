//! Argument loading: CLI flags reconciled against the optional TOML
//! profile, algorithm names resolved to container selectors, key material
//! loaded from hex strings or files.

use std::path::PathBuf;

use clap::Parser;
use fwimage::{AuthAlgo, EncAlgo, HashAlgo, SigAlgo, Version};

mod cli;
mod config;

pub use config::Error as ConfigError;

/// Program arguments loaded from the CLI and config file.
#[derive(Debug, Clone)]
pub enum Args {
    Create(Box<CreateArgs>),
    Dump { input: PathBuf },
}

#[derive(Debug, Clone)]
pub struct CreateArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub version: Version,
    pub anti_rollback: bool,
    pub vtor_align: bool,
    pub enc_algo: EncAlgo,
    pub enc_key: Vec<u8>,
    pub hash_algo: HashAlgo,
    pub auth_algo: AuthAlgo,
    pub auth_key: Vec<u8>,
    pub sign_algo: SigAlgo,
    pub sign_key: Option<PathBuf>,
    pub verbose: bool,
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    match cli.command {
        cli::Command::Dump { input } => Ok(Args::Dump { input }),
        cli::Command::Create {
            input,
            output,
            firmware_version,
            anti_rollback,
            vtor_align,
            enc_algo,
            enc_key,
            integrity_algo,
            auth_algo,
            auth_key,
            sign_algo,
            sign_key,
            config,
            verbose,
        } => {
            let config = config
                .map(|c| config::Config::load(&c))
                .transpose()?
                .unwrap_or_default();

            // Reconcile the CLI and config arguments. Error if anything is
            // specified both on the CLI and in the config file.
            let enc_algo = either(enc_algo, config.enc_algo, "enc-algo")?;
            let enc_key = either(enc_key, config.enc_key, "enc-key")?;
            let integrity_algo = either(integrity_algo, config.integrity_algo, "integrity-algo")?;
            let auth_algo = either(auth_algo, config.auth_algo, "auth-algo")?;
            let auth_key = either(auth_key, config.auth_key, "auth-key")?;
            let sign_algo = either(sign_algo, config.sign_algo, "sign-algo")?;
            let sign_key = either(sign_key, config.sign_key, "sign-key")?;

            let version = match firmware_version {
                Some(version) => plain_version(&version)?,
                None if anti_rollback => return Err(Error::VersionRequired),
                None => Version::default(),
            };

            let (enc_algo, enc_key) = match (enc_algo, enc_key) {
                (None, None) => (EncAlgo::None, Vec::new()),
                (None, Some(_)) => return Err(Error::EncAlgoMissing),
                (Some(_), None) => return Err(Error::EncKeyMissing),
                (Some(family), Some(key)) => {
                    let key = key_material(&key)?;
                    (enc_variant(&family, key.len())?, key)
                }
            };

            let hash_algo = match integrity_algo {
                None => HashAlgo::Sha256,
                Some(name) => integrity_variant(&name)?,
            };

            let (auth_algo, auth_key) = match (auth_algo, auth_key) {
                (None, None) => (AuthAlgo::None, Vec::new()),
                (None, Some(_)) => return Err(Error::AuthAlgoMissing),
                (Some(_), None) => return Err(Error::AuthKeyMissing),
                (Some(name), Some(key)) => (auth_variant(&name)?, key_material(&key)?),
            };

            let (sign_algo, sign_key) = match (sign_algo, sign_key) {
                (None, None) => (SigAlgo::None, None),
                (None, Some(_)) => return Err(Error::SignAlgoMissing),
                (Some(_), None) => return Err(Error::SignKeyMissing),
                (Some(name), Some(path)) => (sign_variant(&name)?, Some(path)),
            };

            Ok(Args::Create(Box::new(CreateArgs {
                input,
                output,
                version,
                anti_rollback,
                vtor_align,
                enc_algo,
                enc_key,
                hash_algo,
                auth_algo,
                auth_key,
                sign_algo,
                sign_key,
                verbose,
            })))
        }
    }
}

fn either<T>(cli: Option<T>, config: Option<T>, what: &'static str) -> Result<Option<T>, Error> {
    match (cli, config) {
        (None, None) => Ok(None),
        (Some(value), None) | (None, Some(value)) => Ok(Some(value)),
        (Some(_), Some(_)) => Err(Error::InConfigAndCli(what)),
    }
}

/// Only bare MAJOR.MINOR.PATCH with u16 components fits the header field.
fn plain_version(version: &semver::Version) -> Result<Version, Error> {
    if !version.pre.is_empty() || !version.build.is_empty() {
        return Err(Error::VersionNotPlain(version.clone()));
    }
    let component = |n: u64| u16::try_from(n).map_err(|_| Error::VersionNotPlain(version.clone()));
    Ok(Version::new(
        component(version.major)?,
        component(version.minor)?,
        component(version.patch)?,
    ))
}

/// Key bytes from a hex argument, a hex file or a raw binary file.
fn key_material(arg: &str) -> Result<Vec<u8>, Error> {
    if let Ok(bytes) = hex::decode(arg) {
        if !bytes.is_empty() {
            return Ok(bytes);
        }
    }
    let contents =
        std::fs::read(arg).map_err(|e| Error::ReadKeyFile(PathBuf::from(arg), e))?;
    if let Ok(text) = std::str::from_utf8(&contents) {
        if let Ok(bytes) = hex::decode(text.trim()) {
            if !bytes.is_empty() {
                return Ok(bytes);
            }
        }
    }
    if contents.is_empty() {
        return Err(Error::EmptyKey(PathBuf::from(arg)));
    }
    Ok(contents)
}

fn enc_variant(family: &str, key_len: usize) -> Result<EncAlgo, Error> {
    match (family, key_len) {
        ("aes-cbc", 16) => Ok(EncAlgo::Aes128Cbc),
        ("aes-cbc", 32) => Ok(EncAlgo::Aes256Cbc),
        ("aes-ctr", 16) => Ok(EncAlgo::Aes128Ctr),
        ("aes-ctr", 32) => Ok(EncAlgo::Aes256Ctr),
        ("aes-cbc" | "aes-ctr", len) => Err(Error::InvalidEncKeyLength(len)),
        _ => Err(Error::InvalidAlgo("enc-algo", family.to_string())),
    }
}

fn integrity_variant(name: &str) -> Result<HashAlgo, Error> {
    match name {
        "crc32" => Ok(HashAlgo::Crc32),
        "md5" => Ok(HashAlgo::Md5),
        "sha1" => Ok(HashAlgo::Sha1),
        "sha224" => Ok(HashAlgo::Sha224),
        "sha256" => Ok(HashAlgo::Sha256),
        "sha384" => Ok(HashAlgo::Sha384),
        "sha512" => Ok(HashAlgo::Sha512),
        _ => Err(Error::InvalidAlgo("integrity-algo", name.to_string())),
    }
}

fn auth_variant(name: &str) -> Result<AuthAlgo, Error> {
    match name {
        "hmac-sha256" => Ok(AuthAlgo::HmacSha256),
        "hmac-sha512" => Ok(AuthAlgo::HmacSha512),
        _ => Err(Error::InvalidAlgo("auth-algo", name.to_string())),
    }
}

fn sign_variant(name: &str) -> Result<SigAlgo, Error> {
    match name {
        "ecdsa-sha256" => Ok(SigAlgo::EcdsaP256Sha256),
        "rsa-sha256" => Ok(SigAlgo::Rsa2048Sha256),
        _ => Err(Error::InvalidAlgo("sign-algo", name.to_string())),
    }
}

#[derive(Debug)]
pub enum Error {
    AuthAlgoMissing,
    AuthKeyMissing,
    Cli(clap::Error),
    Config(ConfigError),
    EmptyKey(PathBuf),
    EncAlgoMissing,
    EncKeyMissing,
    InConfigAndCli(&'static str),
    InvalidAlgo(&'static str, String),
    InvalidEncKeyLength(usize),
    ReadKeyFile(PathBuf, std::io::Error),
    SignAlgoMissing,
    SignKeyMissing,
    VersionNotPlain(semver::Version),
    VersionRequired,
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AuthAlgoMissing => {
                write!(f, "--auth-key specified without --auth-algo")
            }
            Error::AuthKeyMissing => {
                write!(f, "--auth-algo specified without --auth-key")
            }
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::EmptyKey(path) => {
                write!(f, r#"key file is empty: "{}""#, path.display())
            }
            Error::EncAlgoMissing => {
                write!(f, "--enc-key specified without --enc-algo")
            }
            Error::EncKeyMissing => {
                write!(f, "--enc-algo specified without --enc-key")
            }
            Error::InConfigAndCli(what) => {
                write!(f, "{what} specified in both config and cli")
            }
            Error::InvalidAlgo(what, name) => {
                write!(f, r#"user specified invalid {what}: "{name}""#)
            }
            Error::InvalidEncKeyLength(len) => {
                write!(f, "encryption key must be 16 or 32 bytes, got {len}")
            }
            Error::ReadKeyFile(path, e) => {
                write!(f, r#"failed to read key file "{}": {e}"#, path.display())
            }
            Error::SignAlgoMissing => {
                write!(f, "--sign-key specified without --sign-algo")
            }
            Error::SignKeyMissing => {
                write!(f, "--sign-algo specified without --sign-key")
            }
            Error::VersionNotPlain(version) => {
                write!(
                    f,
                    r#"firmware version "{version}" must be plain MAJOR.MINOR.PATCH with components below 65536"#
                )
            }
            Error::VersionRequired => {
                write!(f, "--firmware-version is required with --anti-rollback")
            }
        }
    }
}

impl std::error::Error for Error {}
