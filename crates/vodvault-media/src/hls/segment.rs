//! Streaming AES-128-CBC segment encryption.
//!
//! Segments are stored in the clear and encrypted on the fly while the
//! response streams out. [`SegmentEncryptor::update`] accepts arbitrary
//! read sizes, passes only block-aligned data to the cipher and holds the
//! remainder; [`SegmentEncryptor::finalize`] emits the trailing PKCS#7
//! padded block at EOF.

use aes::cipher::{array::Array, BlockModeEncrypt, KeyIvInit};
use aes::Aes128;

use crate::error::{Error, Result};
use crate::keystore::KeyEntry;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Cipher block size of AES in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Incremental AES-128-CBC encryptor with PKCS#7 padding.
pub struct SegmentEncryptor {
    cipher: Aes128CbcEnc,
    pending: Vec<u8>,
}

impl SegmentEncryptor {
    /// Build the cipher from raw key and IV bytes. Both must be exactly
    /// 16 bytes.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let cipher = Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|e| Error::Cipher(format!("bad key/iv length for AES-128-CBC: {e}")))?;
        Ok(Self {
            cipher,
            pending: Vec::with_capacity(AES_BLOCK_SIZE),
        })
    }

    /// Build the cipher from a key-store entry, verifying the declared
    /// material lengths.
    pub fn from_entry(entry: &KeyEntry) -> Result<Self> {
        let key = entry.key.decode()?;
        let iv = entry.iv.decode()?;
        Self::new(&key, &iv)
    }

    /// Encrypt the block-aligned prefix of the data seen so far; the
    /// unaligned remainder is carried into the next call.
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let aligned = self.pending.len() - self.pending.len() % AES_BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..aligned).collect();
        for block in out.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.encrypt_block(Array::from_mut_slice(block));
        }
        out
    }

    /// Emit the final padded block. Always produces 1..=16 bytes rounded
    /// to a whole block, so ciphertext length is the plaintext length
    /// rounded up to the next block boundary.
    pub fn finalize(mut self) -> Vec<u8> {
        debug_assert!(self.pending.len() < AES_BLOCK_SIZE);
        let pad = AES_BLOCK_SIZE - self.pending.len();
        let mut block = self.pending;
        block.resize(AES_BLOCK_SIZE, pad as u8);
        self.cipher.encrypt_block(Array::from_mut_slice(&mut block));
        block
    }
}
