use digest::Digest;
use fwimage::SigAlgo;
use p256::ecdsa::signature::DigestVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;

use crate::CryptoError;

/// Streaming signature verifier.
///
/// The message digest accumulates through [`update`]; [`verify`] consumes
/// the stream and checks the trailer's signature section against it.
/// Public keys are SEC1 points for ECDSA-P256 and PKCS#1 DER for RSA-2048.
///
/// [`update`]: SigVerifier::update
/// [`verify`]: SigVerifier::verify
pub enum SigVerifier {
    EcdsaP256 { key: VerifyingKey, digest: Sha256 },
    Rsa2048 { key: RsaPublicKey, digest: Sha256 },
}

impl SigVerifier {
    /// Returns `Ok(None)` for [`SigAlgo::None`].
    pub fn new(algo: SigAlgo, pubkey: &[u8]) -> Result<Option<Self>, CryptoError> {
        match algo {
            SigAlgo::None => Ok(None),
            SigAlgo::EcdsaP256Sha256 => {
                let key = VerifyingKey::from_sec1_bytes(pubkey)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                Ok(Some(Self::EcdsaP256 {
                    key,
                    digest: Sha256::new(),
                }))
            }
            SigAlgo::Rsa2048Sha256 => {
                let key = RsaPublicKey::from_pkcs1_der(pubkey)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                if key.size() != 256 {
                    return Err(CryptoError::InvalidPublicKey);
                }
                Ok(Some(Self::Rsa2048 {
                    key,
                    digest: Sha256::new(),
                }))
            }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::EcdsaP256 { digest, .. } => digest.update(data),
            Self::Rsa2048 { digest, .. } => digest.update(data),
        }
    }

    /// Check `sig` over the accumulated stream. A malformed signature
    /// encoding verifies as false rather than erroring.
    pub fn verify(self, sig: &[u8]) -> bool {
        match self {
            Self::EcdsaP256 { key, digest } => {
                let Ok(signature) = Signature::from_slice(sig) else {
                    return false;
                };
                key.verify_digest(digest, &signature).is_ok()
            }
            Self::Rsa2048 { key, digest } => {
                let hashed = digest.finalize();
                key.verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, sig)
                    .is_ok()
            }
        }
    }
}
