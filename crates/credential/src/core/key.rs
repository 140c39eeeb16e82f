//! Key material
//!
//! A [`KeyPair`] is only ever built from a parsed private key, so the public
//! half is always the one derived from it. The private half lives in
//! zeroizing memory, is not `Clone`, and never shows up in `Debug` output.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use super::error::CryptoError;

/// Normalized public key: base64 of the SubjectPublicKeyInfo DER
///
/// This is the PEM body with header, footer and line breaks removed, the
/// form remote platforms accept for "set public key" calls.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey {
    encoded: String,
    der: Vec<u8>,
}

impl PublicKey {
    /// Parse a public key from PEM or from the normalized base64 form
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        let body: String = input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("-----"))
            .collect();

        let der = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| CryptoError::KeyEncoding(format!("public key is not base64: {e}")))?;

        Self::from_der(der)
    }

    /// Build from SubjectPublicKeyInfo DER
    pub fn from_der(der: Vec<u8>) -> Result<Self, CryptoError> {
        RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| CryptoError::KeyEncoding(format!("not an RSA public key: {e}")))?;

        Ok(Self {
            encoded: STANDARD.encode(&der),
            der,
        })
    }

    /// Normalized string form
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// SubjectPublicKeyInfo DER
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Fingerprint in `SHA256:<base64>` form
    pub fn fingerprint(&self) -> String {
        format!("SHA256:{}", STANDARD.encode(Sha256::digest(&self.der)))
    }

    /// Modulus size in bits
    pub fn bits(&self) -> Result<usize, CryptoError> {
        Ok(self.rsa()?.size() * 8)
    }

    /// Check an RSASSA-PKCS1-v1_5 / SHA-256 signature
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = self.rsa() else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(key)
            .verify(message, &signature)
            .is_ok()
    }

    fn rsa(&self) -> Result<RsaPublicKey, CryptoError> {
        RsaPublicKey::from_public_key_der(&self.der)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.encoded
    }
}

/// Private key as PKCS#8 DER in zeroizing memory
pub struct PrivateKey {
    der: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Parse PKCS#8 DER
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::KeyEncoding(format!("not a PKCS#8 RSA key: {e}")))?;

        Ok(Self {
            der: Zeroizing::new(der.to_vec()),
        })
    }

    pub(crate) fn from_rsa(key: &RsaPrivateKey) -> Result<Self, CryptoError> {
        let document = key
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

        Ok(Self {
            der: Zeroizing::new(document.as_bytes().to_vec()),
        })
    }

    /// PKCS#8 DER bytes
    pub fn as_pkcs8_der(&self) -> &[u8] {
        &self.der
    }

    /// PKCS#8 PEM, zeroized on drop
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.rsa()?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }

    /// Derive the public half
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let document = self
            .rsa()?
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

        PublicKey::from_der(document.as_bytes().to_vec())
    }

    fn rsa(&self) -> Result<RsaPrivateKey, CryptoError> {
        RsaPrivateKey::from_pkcs8_der(&self.der).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Asymmetric key pair used to authenticate the service account
#[derive(Debug)]
pub struct KeyPair {
    public_key: PublicKey,
    private_key: PrivateKey,
    created_at: DateTime<Utc>,
}

impl KeyPair {
    /// Assemble a key pair from its private half
    pub fn from_private_key(
        private_key: PrivateKey,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let public_key = private_key.public_key()?;
        Ok(Self {
            public_key,
            private_key,
            created_at,
        })
    }

    /// Normalized public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// When the pair was generated
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sign `message` with the private key (RSASSA-PKCS1-v1_5 / SHA-256)
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.rsa()?);
        let signature = signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }
}
