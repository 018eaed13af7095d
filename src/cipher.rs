//! AES-128-CTR codec for boundary payloads and query results
//!
//! The counter block is a full 128-bit big-endian integer incremented once per
//! 16-byte block, the same keystream produced by OpenSSL's `aes-128-ctr`.
//! The key and initial counter always come from outside; nothing here derives
//! or stores them beyond the lifetime of [`CipherMaterial`].

use crate::error::{EnclaveError, Result};
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;
/// Length of a `key || counter` provisioning record
pub const MATERIAL_SIZE: usize = KEY_SIZE + BLOCK_SIZE;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Symmetric key and counter block held inside the boundary
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherMaterial {
    key: [u8; KEY_SIZE],
    counter: [u8; BLOCK_SIZE],
}

impl CipherMaterial {
    pub fn new(key: [u8; KEY_SIZE], counter: [u8; BLOCK_SIZE]) -> Self {
        Self { key, counter }
    }

    /// Parses a `key[16] || counter[16]` record
    pub fn from_bytes(material: &[u8]) -> Result<Self> {
        if material.len() != MATERIAL_SIZE {
            return Err(EnclaveError::InvalidParameter(format!(
                "key material must be {} bytes, got {}",
                MATERIAL_SIZE,
                material.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        let mut counter = [0u8; BLOCK_SIZE];
        key.copy_from_slice(&material[..KEY_SIZE]);
        counter.copy_from_slice(&material[KEY_SIZE..]);
        Ok(Self { key, counter })
    }

    /// Fresh random key and counter from the system RNG
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key = [0u8; KEY_SIZE];
        let mut counter = [0u8; BLOCK_SIZE];
        rng.fill(&mut key)
            .map_err(|_| EnclaveError::CipherFailure("Failed to generate key".to_string()))?;
        rng.fill(&mut counter)
            .map_err(|_| EnclaveError::CipherFailure("Failed to generate counter".to_string()))?;
        Ok(Self { key, counter })
    }

    /// Serializes to the `key || counter` provisioning layout
    pub fn to_bytes(&self) -> zeroize::Zeroizing<[u8; MATERIAL_SIZE]> {
        let mut out = zeroize::Zeroizing::new([0u8; MATERIAL_SIZE]);
        out[..KEY_SIZE].copy_from_slice(&self.key);
        out[KEY_SIZE..].copy_from_slice(&self.counter);
        out
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn counter(&self) -> &[u8; BLOCK_SIZE] {
        &self.counter
    }

    /// Replaces the counter block, keeping the key
    pub fn set_counter(&mut self, counter: [u8; BLOCK_SIZE]) {
        self.counter.zeroize();
        self.counter = counter;
    }

    /// Moves the counter past `bytes` worth of consumed keystream
    pub fn advance(&mut self, bytes: usize) {
        self.counter = advance_counter(&self.counter, bytes);
    }
}

impl std::fmt::Debug for CipherMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherMaterial([REDACTED])")
    }
}

/// Number of keystream blocks needed to cover `bytes`
pub fn blocks_for(bytes: usize) -> u128 {
    bytes.div_ceil(BLOCK_SIZE) as u128
}

/// Counter block after `bytes` of keystream, wrapping at 2^128
pub fn advance_counter(counter: &[u8; BLOCK_SIZE], bytes: usize) -> [u8; BLOCK_SIZE] {
    u128::from_be_bytes(*counter)
        .wrapping_add(blocks_for(bytes))
        .to_be_bytes()
}

fn apply_chunked(
    data: &mut [u8],
    key: &[u8; KEY_SIZE],
    counter: &[u8; BLOCK_SIZE],
    chunk_size: usize,
) -> Result<()> {
    if chunk_size == 0 || chunk_size % BLOCK_SIZE != 0 {
        return Err(EnclaveError::InvalidParameter(format!(
            "chunk size {} is not a positive multiple of {}",
            chunk_size, BLOCK_SIZE
        )));
    }
    let mut cipher = Aes128Ctr::new(key.into(), counter.into());
    for chunk in data.chunks_mut(chunk_size) {
        cipher
            .try_apply_keystream(chunk)
            .map_err(|e| EnclaveError::CipherFailure(format!("keystream exhausted: {}", e)))?;
    }
    Ok(())
}

/// Encrypts `plaintext` under `key` starting at `counter`
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE], counter: &[u8; BLOCK_SIZE]) -> Result<Vec<u8>> {
    let mut out = plaintext.to_vec();
    apply_chunked(&mut out, key, counter, crate::config::CHUNK_SIZE)?;
    Ok(out)
}

/// Decrypts `ciphertext` under `key` starting at `counter`
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_SIZE], counter: &[u8; BLOCK_SIZE]) -> Result<Vec<u8>> {
    let mut out = ciphertext.to_vec();
    apply_chunked(&mut out, key, counter, crate::config::CHUNK_SIZE)?;
    Ok(out)
}

/// Decrypts in place, `chunk_size` bytes at a time on one continuous keystream
pub fn decrypt_in_place(
    data: &mut [u8],
    key: &[u8; KEY_SIZE],
    counter: &[u8; BLOCK_SIZE],
    chunk_size: usize,
) -> Result<()> {
    apply_chunked(data, key, counter, chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // NIST SP 800-38A F.5.1 CTR-AES128.Encrypt
    const NIST_KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
        0x3c,
    ];
    const NIST_CTR: [u8; 16] = [
        0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe,
        0xff,
    ];

    #[test]
    fn test_nist_vector() {
        let plaintext = hex::decode(
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51",
        )
        .unwrap();
        let expected = hex::decode(
            "874d6191b620e3261bef6864990db6ce9806f66b7970fdff8617187bb9fffdff",
        )
        .unwrap();
        let ciphertext = encrypt(&plaintext, &NIST_KEY, &NIST_CTR).unwrap();
        assert_eq!(ciphertext, expected);
    }

    #[test]
    fn test_chunked_matches_single_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let single = encrypt(&data, &NIST_KEY, &NIST_CTR).unwrap();

        let mut chunked = data.clone();
        decrypt_in_place(&mut chunked, &NIST_KEY, &NIST_CTR, 64).unwrap();
        assert_eq!(chunked, single);
    }

    #[test]
    fn test_rejects_unaligned_chunk_size() {
        let mut data = vec![0u8; 32];
        let result = decrypt_in_place(&mut data, &NIST_KEY, &NIST_CTR, 10);
        assert!(matches!(result, Err(EnclaveError::InvalidParameter(_))));
    }

    #[test]
    fn test_counter_advance_wraps() {
        assert_eq!(advance_counter(&[0u8; 16], 1)[15], 1);
        assert_eq!(advance_counter(&[0u8; 16], 16)[15], 1);
        assert_eq!(advance_counter(&[0u8; 16], 17)[15], 2);
        assert_eq!(advance_counter(&[0xff; 16], 1), [0u8; 16]);
    }

    #[test]
    fn test_material_parsing() {
        let mut raw = [0u8; MATERIAL_SIZE];
        raw[..16].copy_from_slice(&NIST_KEY);
        raw[16..].copy_from_slice(&NIST_CTR);
        let material = CipherMaterial::from_bytes(&raw).unwrap();
        assert_eq!(material.key(), &NIST_KEY);
        assert_eq!(material.counter(), &NIST_CTR);
        assert_eq!(&material.to_bytes()[..], &raw[..]);

        assert!(CipherMaterial::from_bytes(&raw[..31]).is_err());
    }

    #[test]
    fn test_material_debug_is_redacted() {
        let material = CipherMaterial::new(NIST_KEY, NIST_CTR);
        let rendered = format!("{:?}", material);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("43"));
    }

    #[test]
    fn test_generate_produces_distinct_material() {
        let a = CipherMaterial::generate().unwrap();
        let b = CipherMaterial::generate().unwrap();
        assert_ne!(a.to_bytes()[..], b.to_bytes()[..]);
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_length(
            data in prop::collection::vec(any::<u8>(), 0..5000),
            key in any::<[u8; 16]>(),
            counter in any::<[u8; 16]>(),
        ) {
            let ciphertext = encrypt(&data, &key, &counter).unwrap();
            prop_assert_eq!(ciphertext.len(), data.len());
            let plaintext = decrypt(&ciphertext, &key, &counter).unwrap();
            prop_assert_eq!(plaintext, data);
        }
    }
}
