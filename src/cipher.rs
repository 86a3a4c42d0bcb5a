//! Envelope cipher for secret tokens.
//!
//! Tokens use the Fernet layout so files written by older tooling keep
//! working:
//!
//! ```text
//! 0x80 | timestamp (u64 BE) | iv (16) | AES-128-CBC ciphertext | HMAC-SHA256 (32)
//! ```
//!
//! The whole blob is URL-safe base64 with padding. The 32-byte key splits
//! into a signing half and an encryption half.
//!
//! The process-wide key is a fixed value compiled into the binary. It only
//! keeps secrets out of casual view; anyone holding the binary can decrypt.

use std::time::{SystemTime, UNIX_EPOCH};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const VERSION: u8 = 0x80;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const HEADER_LEN: usize = 1 + 8 + IV_LEN;
const BLOCK_LEN: usize = 16;

/// Key material shared with every token producer for this deployment.
const FIXED_KEY: &str = "Vn3x5ZiaL8Tg7NU1f3TlZRYXHnVslrgQUISQIa8n5Bg=";

static FIXED: Lazy<Envelope> = Lazy::new(|| match Envelope::from_base64_key(FIXED_KEY) {
    Ok(envelope) => envelope,
    Err(err) => panic!("invalid FIXED_KEY: {err}"),
});

/// Symmetric, integrity-protected token codec.
#[derive(Clone)]
pub struct Envelope {
    /// HMAC keyed with the signing half, cloned for every tag.
    signer: HmacSha256,
    encryption_key: [u8; 16],
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope").finish_non_exhaustive()
    }
}

impl Envelope {
    /// The process-wide envelope built from the compiled-in key.
    pub fn fixed() -> &'static Envelope {
        &FIXED
    }

    /// Builds an envelope from a URL-safe base64 encoded 32-byte key.
    pub fn from_base64_key(key: &str) -> Result<Self, CryptoError> {
        let raw = URL_SAFE
            .decode(key.trim().as_bytes())
            .map_err(|e| CryptoError::Format(format!("key is not base64: {e}")))?;
        Self::from_key_bytes(&raw)
    }

    /// Builds an envelope from raw key bytes (signing half first).
    pub fn from_key_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() != 32 {
            return Err(CryptoError::Format(format!(
                "key must be 32 bytes, got {}",
                raw.len()
            )));
        }
        let signer = <HmacSha256 as Mac>::new_from_slice(&raw[..16])
            .map_err(|e| CryptoError::Format(format!("signing key rejected: {e}")))?;
        let mut encryption_key = [0u8; 16];
        encryption_key.copy_from_slice(&raw[16..]);
        Ok(Self {
            signer,
            encryption_key,
        })
    }

    /// Encrypts `plaintext` with the current time and a random IV.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.encrypt_with(plaintext.as_bytes(), now, iv)
    }

    /// Deterministic core of [`Envelope::encrypt`].
    pub fn encrypt_with(&self, plaintext: &[u8], timestamp: u64, iv: [u8; IV_LEN]) -> String {
        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
        blob.push(VERSION);
        blob.extend_from_slice(&timestamp.to_be_bytes());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        let tag = self.mac(&blob).finalize().into_bytes();
        blob.extend_from_slice(&tag);
        URL_SAFE.encode(blob)
    }

    /// Verifies and decrypts a token.
    pub fn decrypt(&self, token: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt_bytes(token)?;
        String::from_utf8(bytes)
            .map_err(|_| CryptoError::Format("plaintext is not UTF-8".to_string()))
    }

    /// Verifies and decrypts a token, returning raw plaintext bytes.
    pub fn decrypt_bytes(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        let blob = URL_SAFE
            .decode(token.trim().as_bytes())
            .map_err(|e| CryptoError::Format(format!("token is not base64: {e}")))?;

        if blob.len() < HEADER_LEN + BLOCK_LEN + TAG_LEN {
            return Err(CryptoError::Format(format!(
                "token too short ({} bytes)",
                blob.len()
            )));
        }
        if blob[0] != VERSION {
            return Err(CryptoError::Format(format!(
                "unsupported token version 0x{:02x}",
                blob[0]
            )));
        }

        let (signed, tag) = blob.split_at(blob.len() - TAG_LEN);
        self.mac(signed)
            .verify_slice(tag)
            .map_err(|_| CryptoError::Integrity)?;

        let ciphertext = &signed[HEADER_LEN..];
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::Format(
                "ciphertext is not a whole number of blocks".to_string(),
            ));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&signed[9..HEADER_LEN]);

        Aes128CbcDec::new(&self.encryption_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Format("bad padding".to_string()))
    }

    /// Timestamp carried in a token, without verifying it.
    pub fn timestamp(token: &str) -> Result<u64, CryptoError> {
        let blob = URL_SAFE
            .decode(token.trim().as_bytes())
            .map_err(|e| CryptoError::Format(format!("token is not base64: {e}")))?;
        if blob.len() < 9 {
            return Err(CryptoError::Format("token too short".to_string()));
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&blob[1..9]);
        Ok(u64::from_be_bytes(ts))
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.signer.clone();
        mac.update(data);
        mac
    }
}

/// Encrypts with the process-wide key.
pub fn encrypt(plaintext: &str) -> String {
    Envelope::fixed().encrypt(plaintext)
}

/// Decrypts with the process-wide key.
pub fn decrypt(token: &str) -> Result<String, CryptoError> {
    Envelope::fixed().decrypt(token)
}
