use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// OKP JSON Web Key holding an Ed25519 key pair.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    /// Private seed, base64url.
    pub d: String,
    /// Public key, base64url.
    pub x: String,
}

/// Signing key of the uploader. Load once and pass by reference.
pub struct Wallet {
    key: SigningKey,
}

impl Wallet {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(&seed) }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(PathBuf::from(path)),
            _ => Error::Io(e),
        })?;
        let jwk: Jwk = serde_json::from_slice(&raw)
            .map_err(|e| Error::Signing(format!("{}: not a JWK: {e}", path.display())))?;
        Self::from_jwk(&jwk)
    }

    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
            return Err(Error::Signing(format!(
                "unsupported key type {}/{} (want OKP/Ed25519)",
                jwk.kty, jwk.crv
            )));
        }
        let seed = decode_32(&jwk.d, "d")?;
        let public = decode_32(&jwk.x, "x")?;
        let wallet = Self::from_seed(seed);
        if wallet.public_key() != public {
            return Err(Error::Signing("public key does not match private key".into()));
        }
        Ok(wallet)
    }

    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: "OKP".into(),
            crv: "Ed25519".into(),
            d: URL_SAFE_NO_PAD.encode(self.key.to_bytes()),
            x: URL_SAFE_NO_PAD.encode(self.public_key()),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// base64url SHA-256 of the public key.
    pub fn address(&self) -> String {
        address_of(&self.public_key())
    }

    pub(crate) fn sign_digest(&self, digest: &[u8]) -> [u8; 64] {
        self.key.sign(digest).to_bytes()
    }
}

pub fn address_of(public_key: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(public_key))
}

/// Check an Ed25519 signature made by `owner` over `digest`.
pub fn verify_signature(owner: &[u8; 32], digest: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(owner) else {
        return false;
    };
    vk.verify_strict(digest, &Signature::from_bytes(signature)).is_ok()
}

fn decode_32(field: &str, name: &str) -> Result<[u8; 32]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(field.trim_end_matches('='))
        .map_err(|e| Error::Signing(format!("JWK field {name}: {e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::Signing(format!("JWK field {name}: {} bytes, want 32", b.len())))
}
