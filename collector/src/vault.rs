use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// AES-256-GCM authentication tag length.
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption key material missing or malformed: {0}")]
    Configuration(String),

    #[error("invalid credential envelope: {0}")]
    Envelope(String),

    #[error("credential integrity check failed")]
    Integrity,
}

/// Ciphertext plus the id of the key that produced it. The envelope itself
/// carries everything else decryption needs (nonce, tag, encrypted bytes).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedCredential {
    pub ciphertext: String,
    pub key_id: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    nonce: String,
    tag: String,
    data: String,
}

/// Encrypts and decrypts stored database passwords. Holds one active key for
/// encryption and any number of retired keys kept alive for decryption until
/// their ciphertexts are re-encrypted.
pub struct CredentialVault {
    active_key_id: String,
    keys: HashMap<String, Aes256Gcm>,
}

impl CredentialVault {
    pub fn new(
        active_key_id: impl Into<String>,
        active_key_hex: &str,
        retired_keys: &[(String, String)],
    ) -> Result<Self, VaultError> {
        let active_key_id = active_key_id.into();
        let mut keys = HashMap::new();
        keys.insert(active_key_id.clone(), build_cipher(&active_key_id, active_key_hex)?);
        for (id, key_hex) in retired_keys {
            keys.insert(id.clone(), build_cipher(id, key_hex)?);
        }
        Ok(Self { active_key_id, keys })
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_key_id
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedCredential, VaultError> {
        let cipher = self
            .keys
            .get(&self.active_key_id)
            .ok_or_else(|| VaultError::Configuration(format!(
                "active key {} not loaded",
                self.active_key_id
            )))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Integrity)?;

        // aes-gcm appends the tag to the ciphertext; the envelope keeps it
        // separate so the stored format is self-describing.
        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let envelope = Envelope {
            nonce: hex::encode(nonce),
            tag: hex::encode(tag),
            data: hex::encode(data),
        };
        let ciphertext = serde_json::to_string(&envelope)
            .map_err(|e| VaultError::Envelope(e.to_string()))?;

        Ok(EncryptedCredential {
            ciphertext,
            key_id: self.active_key_id.clone(),
        })
    }

    pub fn decrypt(&self, ciphertext: &str, key_id: &str) -> Result<String, VaultError> {
        let cipher = self.keys.get(key_id).ok_or_else(|| {
            VaultError::Configuration(format!("unknown encryption key id: {key_id}"))
        })?;

        let envelope: Envelope = serde_json::from_str(ciphertext)
            .map_err(|e| VaultError::Envelope(e.to_string()))?;

        let nonce_bytes = decode_hex_field(&envelope.nonce, "nonce")?;
        if nonce_bytes.len() != 12 {
            return Err(VaultError::Envelope(format!(
                "nonce must be 12 bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let tag = decode_hex_field(&envelope.tag, "tag")?;
        let mut sealed = decode_hex_field(&envelope.data, "data")?;
        sealed.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_ref())
            .map_err(|_| VaultError::Integrity)?;

        String::from_utf8(plaintext).map_err(|e| VaultError::Envelope(e.to_string()))
    }
}

fn build_cipher(key_id: &str, key_hex: &str) -> Result<Aes256Gcm, VaultError> {
    let bytes = hex::decode(key_hex.trim()).map_err(|_| {
        VaultError::Configuration(format!("key {key_id} is not valid hex"))
    })?;
    if bytes.len() != 32 {
        return Err(VaultError::Configuration(format!(
            "key {key_id} must be 64 hex characters (32 bytes), got {} bytes",
            bytes.len()
        )));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)))
}

fn decode_hex_field(value: &str, field: &str) -> Result<Vec<u8>, VaultError> {
    hex::decode(value).map_err(|_| VaultError::Envelope(format!("{field} is not valid hex")))
}
