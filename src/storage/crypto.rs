//! Envelope encryption for destination uploads.
//!
//! Each object is sealed with a fresh AES-256 data key generated under the
//! configured KMS master key. The encrypted data key, nonce, and cipher
//! identifiers travel in object metadata so a compatible client can unwrap
//! the key and decrypt the body.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit};
use aws_config::SdkConfig;
use aws_sdk_kms::types::DataKeySpec;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use snafu::prelude::*;

use crate::error::{GenerateDataKeySnafu, IncompleteDataKeySnafu, StorageError};

const CEK_ALGORITHM: &str = "AES/GCM/NoPadding";
const WRAP_ALGORITHM: &str = "kms";
const GCM_TAG_BITS: usize = 128;

/// An encrypted object body plus the metadata needed to decrypt it.
#[derive(Debug)]
pub struct SealedObject {
    pub body: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

/// KMS-backed AES-GCM envelope cipher for one destination master key.
#[derive(Debug, Clone)]
pub struct EnvelopeCipher {
    kms: aws_sdk_kms::Client,
    key_id: String,
}

impl EnvelopeCipher {
    pub fn new(config: &SdkConfig, key_id: impl Into<String>) -> Self {
        Self {
            kms: aws_sdk_kms::Client::new(config),
            key_id: key_id.into(),
        }
    }

    /// Encrypt `plaintext` under a fresh per-object data key.
    pub async fn seal(&self, plaintext: &[u8]) -> Result<SealedObject, StorageError> {
        let data_key = self
            .kms
            .generate_data_key()
            .key_id(&self.key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .context(GenerateDataKeySnafu {
                key_id: self.key_id.clone(),
            })?;
        let plaintext_key = data_key.plaintext().context(IncompleteDataKeySnafu {
            key_id: self.key_id.clone(),
        })?;
        let encrypted_key = data_key.ciphertext_blob().context(IncompleteDataKeySnafu {
            key_id: self.key_id.clone(),
        })?;

        let (nonce, body) = seal_body(plaintext_key.as_ref(), plaintext)?;

        let mut metadata = HashMap::new();
        metadata.insert("x-amz-key-v2".to_string(), BASE64.encode(encrypted_key));
        metadata.insert("x-amz-iv".to_string(), BASE64.encode(nonce));
        metadata.insert("x-amz-cek-alg".to_string(), CEK_ALGORITHM.to_string());
        metadata.insert("x-amz-wrap-alg".to_string(), WRAP_ALGORITHM.to_string());
        metadata.insert("x-amz-tag-len".to_string(), GCM_TAG_BITS.to_string());
        metadata.insert(
            "x-amz-matdesc".to_string(),
            format!("{{\"kms_cmk_id\":\"{}\"}}", self.key_id),
        );

        Ok(SealedObject { body, metadata })
    }
}

/// AES-256-GCM encrypt with a random 96-bit nonce.
///
/// Returns (nonce, ciphertext); the GCM tag is appended to the ciphertext.
fn seal_body(key: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), StorageError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| StorageError::Encrypt {
        message: format!("bad data key length: {e}"),
    })?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| StorageError::Encrypt {
            message: "AES-GCM encryption failed".to_string(),
        })?;
    Ok((nonce.to_vec(), ciphertext))
}
