//! Signing key loading and use.
//!
//! Accepted PEM forms: SEC1 `EC PRIVATE KEY`, PKCS#1 `RSA PRIVATE KEY`,
//! PKCS#8 `PRIVATE KEY`, and passphrase-protected `ENCRYPTED PRIVATE KEY`
//! (the passphrase is requested once through the supplied prompt).

use std::path::Path;

use fwimage::SigAlgo;
use p256::ecdsa::signature::DigestSigner;
use p256::pkcs8::DecodePrivateKey as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sec1::der::Decode;
use sha2::Sha256;

/// A loaded signing key for one of the supported signature algorithms.
pub enum Signer {
    EcdsaP256(p256::ecdsa::SigningKey),
    Rsa2048(RsaPrivateKey),
}

impl Signer {
    pub fn load(
        algo: SigAlgo,
        path: &Path,
        passphrase: impl FnOnce() -> std::io::Result<String>,
    ) -> Result<Self, Error> {
        let pem = std::fs::read(path).map_err(Error::ReadKeyFile)?;
        let key = pem::parse(pem)?;

        // Encrypted keys decrypt to a PKCS#8 document first.
        let decrypted;
        let (tag, contents) = if key.tag() == "ENCRYPTED PRIVATE KEY" {
            let passphrase = passphrase().map_err(Error::ReadPassphrase)?;
            let info = pkcs8::EncryptedPrivateKeyInfo::try_from(key.contents())
                .map_err(|_| Error::ParseEncryptedKey)?;
            decrypted = info
                .decrypt(passphrase.trim())
                .map_err(|_| Error::DecryptKeyFailed)?;
            ("PRIVATE KEY", decrypted.as_bytes())
        } else {
            (key.tag(), key.contents())
        };

        match (algo, tag) {
            (SigAlgo::EcdsaP256Sha256, "EC PRIVATE KEY") => {
                let secret = sec1::EcPrivateKey::from_der(contents)
                    .map_err(Error::ParseDerContent)?
                    .private_key;
                let key = p256::ecdsa::SigningKey::from_slice(secret)
                    .map_err(|_| Error::InvalidSecretKey)?;
                Ok(Self::EcdsaP256(key))
            }
            (SigAlgo::EcdsaP256Sha256, "PRIVATE KEY") => {
                let key = p256::ecdsa::SigningKey::from_pkcs8_der(contents)
                    .map_err(|_| Error::InvalidSecretKey)?;
                Ok(Self::EcdsaP256(key))
            }
            (SigAlgo::Rsa2048Sha256, "RSA PRIVATE KEY") => {
                let key =
                    RsaPrivateKey::from_pkcs1_der(contents).map_err(|_| Error::InvalidSecretKey)?;
                Self::rsa_checked(key)
            }
            (SigAlgo::Rsa2048Sha256, "PRIVATE KEY") => {
                let key =
                    RsaPrivateKey::from_pkcs8_der(contents).map_err(|_| Error::InvalidSecretKey)?;
                Self::rsa_checked(key)
            }
            (_, tag) => Err(Error::InvalidPemTag(tag.to_string())),
        }
    }

    fn rsa_checked(key: RsaPrivateKey) -> Result<Self, Error> {
        if key.size() != 256 {
            return Err(Error::WrongRsaKeySize(key.size() * 8));
        }
        Ok(Self::Rsa2048(key))
    }

    /// Sign the accumulated message digest; the output is sized exactly
    /// for the trailer's signature section.
    pub fn sign_digest(&self, digest: Sha256) -> Result<Vec<u8>, Error> {
        match self {
            Self::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key.sign_digest(digest);
                Ok(signature.to_bytes().to_vec())
            }
            Self::Rsa2048(key) => {
                use sha2::Digest;
                let hashed = digest.finalize();
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
                    .map_err(|_| Error::SignFailed)
            }
        }
    }
}

#[derive(Debug)]
pub enum Error {
    DecryptKeyFailed,
    InvalidPemTag(String),
    InvalidSecretKey,
    ParseDerContent(sec1::der::Error),
    ParseEncryptedKey,
    ParsePemFile(pem::PemError),
    ReadKeyFile(std::io::Error),
    ReadPassphrase(std::io::Error),
    SignFailed,
    WrongRsaKeySize(usize),
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Error::ParsePemFile(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DecryptKeyFailed => {
                write!(f, "failed to decrypt signing key; wrong passphrase?")
            }
            Error::InvalidPemTag(tag) => {
                write!(f, r#"PEM tag "{tag}" does not match the signature algorithm"#)
            }
            Error::InvalidSecretKey => write!(f, "invalid secret key"),
            Error::ParseDerContent(e) => {
                write!(f, "failed to parse DER content inside PEM file: {e}")
            }
            Error::ParseEncryptedKey => write!(f, "malformed encrypted PKCS#8 key"),
            Error::ParsePemFile(e) => write!(f, "invalid PEM file: {e}"),
            Error::ReadKeyFile(e) => write!(f, "failed to read signing key: {e}"),
            Error::ReadPassphrase(e) => write!(f, "failed to read passphrase: {e}"),
            Error::SignFailed => write!(f, "signing operation failed"),
            Error::WrongRsaKeySize(bits) => {
                write!(f, "RSA signing key must be 2048 bits, got {bits}")
            }
        }
    }
}

impl std::error::Error for Error {}
