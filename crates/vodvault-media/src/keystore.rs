//! Crypto key store model.
//!
//! One `crypto_key.json` per upload request maps short hex key ids to key
//! and IV material. Each HLS variant references one key id from its
//! per-variant metadata document.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key bytes used for AES-128-CBC.
pub const AES_KEY_NBYTES: usize = 16;

/// IV bytes used for AES-128-CBC.
pub const AES_IV_NBYTES: usize = 16;

/// Hex-encoded secret material with its declared length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub nbytes: usize,
    /// Hex rendering of the raw bytes.
    pub data: String,
}

impl KeyMaterial {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            nbytes: bytes.len(),
            data: hex::encode_upper(bytes),
        }
    }

    /// Decode the hex data, verifying it against the declared length.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let bytes = hex::decode(&self.data)
            .map_err(|e| Error::Cipher(format!("invalid hex in key material: {e}")))?;
        if bytes.len() != self.nbytes {
            return Err(Error::MaterialLength {
                declared: self.nbytes,
                decoded: bytes.len(),
            });
        }
        Ok(bytes)
    }
}

/// One key-store entry: key, IV, and the cipher family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: KeyMaterial,
    pub iv: KeyMaterial,
    pub alg: String,
}

impl KeyEntry {
    /// Cipher strength in bits, derived from the key length.
    pub fn key_bits(&self) -> usize {
        self.key.nbytes * 8
    }
}

/// Map of key id to entry, serialized as the `crypto_key.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyStore {
    entries: BTreeMap<String, KeyEntry>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn get(&self, key_id: &str) -> Option<&KeyEntry> {
        self.entries.get(key_id)
    }

    pub fn insert(&mut self, key_id: String, entry: KeyEntry) {
        self.entries.insert(key_id, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Generate a fresh AES entry under a random 8-hex-digit id and return
    /// the id.
    pub fn generate<R: Rng>(&mut self, rng: &mut R) -> String {
        let mut key = [0u8; AES_KEY_NBYTES];
        let mut iv = [0u8; AES_IV_NBYTES];
        rng.fill(&mut key);
        rng.fill(&mut iv);
        let key_id = loop {
            let id: u32 = rng.gen();
            let id = format!("{id:08X}");
            if !self.entries.contains_key(&id) {
                break id;
            }
        };
        self.insert(
            key_id.clone(),
            KeyEntry {
                key: KeyMaterial::from_bytes(&key),
                iv: KeyMaterial::from_bytes(&iv),
                alg: "aes".into(),
            },
        );
        key_id
    }
}

/// Per-variant metadata document referencing the variant's crypto key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub key_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_material_round_trip() {
        let material = KeyMaterial::from_bytes(&[0x5d, 0x4a, 0xf8, 0x33]);
        assert_eq!(material.nbytes, 4);
        assert_eq!(material.data, "5D4AF833");
        assert_eq!(material.decode().unwrap(), vec![0x5d, 0x4a, 0xf8, 0x33]);
    }

    #[test]
    fn test_material_length_mismatch() {
        let material = KeyMaterial {
            nbytes: 8,
            data: "5D4AF833".into(),
        };
        let err = material.decode().unwrap_err();
        assert!(matches!(
            err,
            Error::MaterialLength {
                declared: 8,
                decoded: 4
            }
        ));
    }

    #[test]
    fn test_store_parse_documented_shape() {
        let json = br#"{"8134EADF":{"key":{"nbytes":8,"data":"5D4AF8331751A309"},"iv":{"nbytes":8,"data":"296F986F0B7531A9"},"alg":"aes"}}"#;
        let store = KeyStore::from_json(json).unwrap();
        let entry = store.get("8134EADF").unwrap();
        assert_eq!(entry.alg, "aes");
        assert_eq!(entry.key_bits(), 64);
        assert_eq!(
            entry.key.decode().unwrap(),
            vec![0x5d, 0x4a, 0xf8, 0x33, 0x17, 0x51, 0xa3, 0x09]
        );
        assert!(store.get("DEADBEEF").is_none());
    }

    #[test]
    fn test_generate_and_serialize() {
        let mut store = KeyStore::new();
        let mut rng = rand::thread_rng();
        let id = store.generate(&mut rng);
        assert_eq!(id.len(), 8);
        let entry = store.get(&id).unwrap();
        assert_eq!(entry.key.nbytes, AES_KEY_NBYTES);
        assert_eq!(entry.iv.nbytes, AES_IV_NBYTES);
        assert_eq!(entry.alg, "aes");

        let round = KeyStore::from_json(&store.to_json().unwrap()).unwrap();
        assert_eq!(round, store);
    }
}
