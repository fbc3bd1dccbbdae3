//! Encryption at rest for the configuration payload

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use types::CryptoError;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const GCM_NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_IV_LEN: usize = 16;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Symmetric cipher used for the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
}

impl CipherAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
            CipherAlgorithm::Aes256Cbc => "aes-256-cbc",
        }
    }

    /// Whether the cipher authenticates the ciphertext
    pub fn is_aead(&self) -> bool {
        matches!(self, CipherAlgorithm::Aes256Gcm)
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            "aes-256-cbc" => Ok(CipherAlgorithm::Aes256Cbc),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Key derivation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    /// PBKDF2-HMAC-SHA256, `iterations` rounds
    Pbkdf2,
    /// scrypt, `iterations` is the power-of-two cost parameter N
    Scrypt,
}

impl FromStr for KdfAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pbkdf2" => Ok(KdfAlgorithm::Pbkdf2),
            "scrypt" => Ok(KdfAlgorithm::Scrypt),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// 256-bit key, wiped on drop
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// On-disk form of an encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub algorithm: String,
    /// Hex IV / nonce
    pub iv: String,
    /// Hex ciphertext
    pub data: String,
    /// Hex authentication tag, AEAD only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
}

impl EncryptedEnvelope {
    /// Whether a parsed JSON document has the envelope shape
    pub fn looks_like(value: &Value) -> bool {
        match value.as_object() {
            Some(map) => {
                ["algorithm", "iv", "data"].iter().all(|k| map.get(*k).map(Value::is_string).unwrap_or(false))
                    && map.keys().all(|k| matches!(k.as_str(), "algorithm" | "iv" | "data" | "authTag"))
            }
            None => false,
        }
    }
}

/// Derive a symmetric key from a password
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    kdf: KdfAlgorithm,
    iterations: u32,
) -> Result<DerivedKey, CryptoError> {
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivation("Salt must not be empty".to_string()));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    match kdf {
        KdfAlgorithm::Pbkdf2 => {
            if iterations == 0 {
                return Err(CryptoError::KeyDerivation(
                    "PBKDF2 iterations must be greater than 0".to_string(),
                ));
            }
            pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key[..]);
        }
        KdfAlgorithm::Scrypt => {
            if !iterations.is_power_of_two() || iterations < 2 {
                return Err(CryptoError::KeyDerivation(format!(
                    "scrypt cost {} must be a power of two greater than 1",
                    iterations
                )));
            }
            let log_n = iterations.trailing_zeros() as u8;
            let params = scrypt::Params::new(log_n, SCRYPT_R, SCRYPT_P, KEY_LEN)
                .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
            scrypt::scrypt(password, salt, &params, &mut key[..])
                .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        }
    }

    Ok(DerivedKey(key))
}

/// Encrypt `plaintext` with a fresh random IV
pub fn encrypt(
    plaintext: &[u8],
    key: &DerivedKey,
    algorithm: CipherAlgorithm,
) -> Result<EncryptedEnvelope, CryptoError> {
    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::Encryption(e.to_string()))?;
            let mut nonce = [0u8; GCM_NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);

            let sealed = cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext)
                .map_err(|e| CryptoError::Encryption(e.to_string()))?;

            // aes-gcm appends the 16-byte tag
            if sealed.len() < GCM_TAG_LEN {
                return Err(CryptoError::Encryption("Ciphertext too short".to_string()));
            }
            let (data, tag) = sealed.split_at(sealed.len() - GCM_TAG_LEN);

            Ok(EncryptedEnvelope {
                algorithm: algorithm.as_str().to_string(),
                iv: hex::encode(nonce),
                data: hex::encode(data),
                auth_tag: Some(hex::encode(tag)),
            })
        }
        CipherAlgorithm::Aes256Cbc => {
            let mut iv = [0u8; CBC_IV_LEN];
            OsRng.fill_bytes(&mut iv);

            let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
                .map_err(|e| CryptoError::Encryption(e.to_string()))?;
            let data = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

            Ok(EncryptedEnvelope {
                algorithm: algorithm.as_str().to_string(),
                iv: hex::encode(iv),
                data: hex::encode(data),
                auth_tag: None,
            })
        }
    }
}

/// Decrypt an envelope; GCM tag mismatches fail closed
pub fn decrypt(envelope: &EncryptedEnvelope, key: &DerivedKey) -> Result<Vec<u8>, CryptoError> {
    let algorithm: CipherAlgorithm = envelope.algorithm.parse()?;
    let iv = decode_hex("iv", &envelope.iv)?;
    let data = decode_hex("data", &envelope.data)?;

    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let tag = envelope
                .auth_tag
                .as_deref()
                .ok_or_else(|| CryptoError::MalformedEnvelope("authTag is required for aes-256-gcm".to_string()))?;
            let tag = decode_hex("authTag", tag)?;

            if iv.len() != GCM_NONCE_LEN {
                return Err(CryptoError::MalformedEnvelope("Invalid nonce length".to_string()));
            }
            if tag.len() != GCM_TAG_LEN {
                return Err(CryptoError::MalformedEnvelope("Invalid tag length".to_string()));
            }

            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| CryptoError::Decryption(e.to_string()))?;

            let mut sealed = data;
            sealed.extend_from_slice(&tag);

            cipher
                .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
                .map_err(|_| CryptoError::Decryption("Authentication failed".to_string()))
        }
        CipherAlgorithm::Aes256Cbc => {
            if iv.len() != CBC_IV_LEN {
                return Err(CryptoError::MalformedEnvelope("Invalid IV length".to_string()));
            }
            let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
                .map_err(|e| CryptoError::Decryption(e.to_string()))?;
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(&data)
                .map_err(|_| CryptoError::Decryption("Invalid padding".to_string()))
        }
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|e| CryptoError::MalformedEnvelope(format!("{} is not hex: {}", field, e)))
}

/// Random salt as lowercase hex
pub fn generate_salt() -> String {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Derived key bound to the configured cipher
#[derive(Debug, Clone)]
pub struct SecureStore {
    algorithm: CipherAlgorithm,
    key: DerivedKey,
}

impl SecureStore {
    pub fn new(algorithm: CipherAlgorithm, key: DerivedKey) -> Self {
        Self { algorithm, key }
    }

    /// Derive the key for `password`; the password is not retained
    pub fn derive(
        password: &str,
        salt_hex: &str,
        kdf: KdfAlgorithm,
        iterations: u32,
        algorithm: CipherAlgorithm,
    ) -> Result<Self, CryptoError> {
        let salt = hex::decode(salt_hex)
            .map_err(|e| CryptoError::KeyDerivation(format!("Salt is not hex: {}", e)))?;
        let key = derive_key(password.as_bytes(), &salt, kdf, iterations)?;
        Ok(Self::new(algorithm, key))
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
        encrypt(plaintext, &self.key, self.algorithm)
    }

    /// Decrypt with the envelope's own algorithm
    pub fn open(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
        decrypt(envelope, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DerivedKey {
        derive_key(b"correct horse", b"battery-staple", KdfAlgorithm::Pbkdf2, 1_000).unwrap()
    }

    #[test]
    fn test_round_trip_both_algorithms() {
        let key = key();
        for algorithm in [CipherAlgorithm::Aes256Gcm, CipherAlgorithm::Aes256Cbc] {
            for plaintext in [&b""[..], b"{}", br#"{"worker":{"concurrency":4}}"#, &[0u8; 1000][..]] {
                let envelope = encrypt(plaintext, &key, algorithm).unwrap();
                assert_eq!(envelope.algorithm, algorithm.as_str());
                assert_eq!(envelope.auth_tag.is_some(), algorithm.is_aead());
                assert_eq!(decrypt(&envelope, &key).unwrap(), plaintext);
            }
        }
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = key();
        let a = encrypt(b"same", &key, CipherAlgorithm::Aes256Gcm).unwrap();
        let b = encrypt(b"same", &key, CipherAlgorithm::Aes256Gcm).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let key = key();
        let mut envelope = encrypt(b"audit payload", &key, CipherAlgorithm::Aes256Gcm).unwrap();
        let mut data = hex::decode(&envelope.data).unwrap();
        data[0] ^= 0x01;
        envelope.data = hex::encode(data);

        assert!(matches!(decrypt(&envelope, &key), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_tampered_tag_fails_closed() {
        let key = key();
        let mut envelope = encrypt(b"audit payload", &key, CipherAlgorithm::Aes256Gcm).unwrap();
        let mut tag = hex::decode(envelope.auth_tag.as_ref().unwrap()).unwrap();
        tag[15] ^= 0x80;
        envelope.auth_tag = Some(hex::encode(tag));

        assert!(matches!(decrypt(&envelope, &key), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_missing_tag_is_malformed() {
        let key = key();
        let mut envelope = encrypt(b"x", &key, CipherAlgorithm::Aes256Gcm).unwrap();
        envelope.auth_tag = None;
        assert!(matches!(decrypt(&envelope, &key), Err(CryptoError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt(b"secret", &key(), CipherAlgorithm::Aes256Gcm).unwrap();
        let other = derive_key(b"wrong", b"battery-staple", KdfAlgorithm::Pbkdf2, 1_000).unwrap();
        assert!(decrypt(&envelope, &other).is_err());
    }

    #[test]
    fn test_kdfs_are_deterministic_and_distinct() {
        let a = derive_key(b"pw", b"salt", KdfAlgorithm::Pbkdf2, 1_000).unwrap();
        let b = derive_key(b"pw", b"salt", KdfAlgorithm::Pbkdf2, 1_000).unwrap();
        let c = derive_key(b"pw", b"salt", KdfAlgorithm::Scrypt, 1_024).unwrap();
        let d = derive_key(b"pw", b"salt", KdfAlgorithm::Scrypt, 1_024).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(c.as_bytes(), d.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_invalid_kdf_parameters() {
        assert!(derive_key(b"pw", b"", KdfAlgorithm::Pbkdf2, 1_000).is_err());
        assert!(derive_key(b"pw", b"salt", KdfAlgorithm::Pbkdf2, 0).is_err());
        assert!(derive_key(b"pw", b"salt", KdfAlgorithm::Scrypt, 1_000).is_err());
    }

    #[test]
    fn test_envelope_shape_detection() {
        let envelope = encrypt(b"{}", &key(), CipherAlgorithm::Aes256Gcm).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("authTag").is_some());
        assert!(EncryptedEnvelope::looks_like(&value));
        assert!(!EncryptedEnvelope::looks_like(&serde_json::json!({"environment": "development"})));
    }

    #[test]
    fn test_secure_store_seal_open() {
        let salt = generate_salt();
        let store = SecureStore::derive("pw", &salt, KdfAlgorithm::Pbkdf2, 1_000, CipherAlgorithm::Aes256Cbc).unwrap();
        let envelope = store.seal(b"payload").unwrap();
        assert_eq!(store.open(&envelope).unwrap(), b"payload");
        assert!(format!("{:?}", store).contains("redacted"));
    }
}
