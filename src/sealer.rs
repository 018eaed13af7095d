//! Builders for sealed blobs
//!
//! These produce exactly the byte layouts [`crate::format`] accepts, for the
//! loader side and for tests:
//!
//! - `seal_values`: sorted, deduplicated value set
//! - `seal_vectors`: reference vector set
//! - `seal_query`: single query vector
//! - `seal_encrypted_values`: `counter || AES-CTR(value blob)` test-data blob
//! - `read_material` / `read_or_generate_material`: raw `key || counter` key files

use crate::cipher::{self, CipherMaterial, BLOCK_SIZE, MATERIAL_SIZE};
use crate::error::{EnclaveError, Result};
use crate::format::{
    SealedHeader, HEADER_SIZE, MAX_VALUES, MAX_VECTORS, VALUE_RECORD_SIZE, VECTOR_DIM,
    VECTOR_RECORD_SIZE,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

fn checked_count(len: usize, max: u32, what: &str) -> Result<u32> {
    match u32::try_from(len) {
        Ok(n) if n >= 1 && n <= max => Ok(n),
        _ => Err(EnclaveError::InvalidParameter(format!(
            "{} count {} outside 1..={}",
            what, len, max
        ))),
    }
}

/// Serializes an unsorted value list as a sealed value set
pub fn seal_values(values: &[i32]) -> Result<Vec<u8>> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != values.len() {
        info!(
            removed = values.len() - sorted.len(),
            "Removed duplicate values before sealing"
        );
    }
    seal_raw_values(&sorted)
}

/// Serializes values in the given order, without sorting
///
/// Used for test-data blobs, whose order is the caller's query order.
pub fn seal_raw_values(values: &[i32]) -> Result<Vec<u8>> {
    let count = checked_count(values.len(), MAX_VALUES, "value")?;
    let mut out = Vec::with_capacity(HEADER_SIZE + values.len() * VALUE_RECORD_SIZE);
    out.extend_from_slice(&SealedHeader::new(count).encode());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

/// Serializes reference vectors
pub fn seal_vectors(vectors: &[[f32; VECTOR_DIM]]) -> Result<Vec<u8>> {
    let count = checked_count(vectors.len(), MAX_VECTORS, "vector")?;
    let mut out = Vec::with_capacity(HEADER_SIZE + vectors.len() * VECTOR_RECORD_SIZE);
    out.extend_from_slice(&SealedHeader::new(count).encode());
    for row in vectors {
        for x in row {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }
    Ok(out)
}

/// Serializes a single query vector
pub fn seal_query(query: &[f32; VECTOR_DIM]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + VECTOR_RECORD_SIZE);
    out.extend_from_slice(&SealedHeader::new(1).encode());
    for x in query {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Encrypts a test-value list into a `counter[16] || ciphertext` blob
///
/// The counter is taken from `material`; the caller must not reuse it for
/// another payload under the same key.
pub fn seal_encrypted_values(values: &[i32], material: &CipherMaterial) -> Result<Vec<u8>> {
    let plaintext = Zeroizing::new(seal_raw_values(values)?);
    let ciphertext = cipher::encrypt(&plaintext, material.key(), material.counter())?;
    let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    out.extend_from_slice(material.counter());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reads raw `key[16] || counter[16]` provisioning material from `path`
pub fn read_material(path: &Path) -> Result<CipherMaterial> {
    let bytes = Zeroizing::new(std::fs::read(path)?);
    if bytes.len() != MATERIAL_SIZE {
        return Err(EnclaveError::SizeMismatch {
            expected: MATERIAL_SIZE,
            actual: bytes.len(),
        });
    }
    CipherMaterial::from_bytes(&bytes)
}

/// Writes `material` to a new file at `path`; an existing file is an error
pub fn write_material(path: &Path, material: &CipherMaterial) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(material.to_bytes().as_slice())?;
    file.sync_all()?;
    Ok(())
}

/// Loads provisioning material, generating and saving fresh material if
/// `path` does not exist yet
///
/// Returns the material and whether it was newly generated.
pub fn read_or_generate_material(path: &Path) -> Result<(CipherMaterial, bool)> {
    match read_material(path) {
        Ok(material) => Ok((material, false)),
        Err(EnclaveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            let material = CipherMaterial::generate()?;
            write_material(path, &material)?;
            info!("Generated new key material");
            Ok((material, true))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{decode_values, validate, validate_kind, BlobKind};

    #[test]
    fn test_seal_values_sorts_and_dedups() {
        let blob = seal_values(&[5, 3, 3, 8, 1]).unwrap();
        let view = validate(&blob, VALUE_RECORD_SIZE, MAX_VALUES).unwrap();
        assert_eq!(view.count(), 4);
        assert_eq!(decode_values(&view).unwrap(), vec![1, 3, 5, 8]);
    }

    #[test]
    fn test_seal_rejects_empty() {
        assert!(seal_values(&[]).is_err());
        assert!(seal_vectors(&[]).is_err());
    }

    #[test]
    fn test_seal_vectors_layout() {
        let blob = seal_vectors(&[[0.5; VECTOR_DIM], [1.5; VECTOR_DIM]]).unwrap();
        assert_eq!(blob.len(), HEADER_SIZE + 2 * VECTOR_RECORD_SIZE);
        assert!(validate_kind(&blob, BlobKind::Vectors, MAX_VALUES, MAX_VECTORS).is_ok());
    }

    #[test]
    fn test_seal_query_layout() {
        let blob = seal_query(&[1.0; VECTOR_DIM]);
        assert!(validate_kind(&blob, BlobKind::Query, MAX_VALUES, MAX_VECTORS).is_ok());
    }

    #[test]
    fn test_encrypted_blob_decrypts_to_raw_values() {
        let material = CipherMaterial::new([7u8; 16], [0u8; 16]);
        let blob = seal_encrypted_values(&[9, -4, 9], &material).unwrap();
        assert_eq!(&blob[..BLOCK_SIZE], material.counter());

        let plain = cipher::decrypt(&blob[BLOCK_SIZE..], material.key(), material.counter()).unwrap();
        assert_eq!(plain, seal_raw_values(&[9, -4, 9]).unwrap());
    }

    #[test]
    fn test_read_raw_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aes.key");
        let mut raw = vec![0xC3u8; 16];
        raw.extend_from_slice(&[0x9F; 16]);
        std::fs::write(&path, &raw).unwrap();

        let material = read_material(&path).unwrap();
        assert_eq!(material.key(), &[0xC3; 16]);
        assert_eq!(material.counter(), &[0x9F; 16]);
    }

    #[test]
    fn test_read_key_file_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aes.key");
        std::fs::write(&path, [0u8; 31]).unwrap();
        assert!(matches!(
            read_material(&path),
            Err(EnclaveError::SizeMismatch { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_missing_key_file_is_generated_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aes.key");

        let (first, generated) = read_or_generate_material(&path).unwrap();
        assert!(generated);
        assert_eq!(std::fs::read(&path).unwrap().len(), MATERIAL_SIZE);

        let (second, generated) = read_or_generate_material(&path).unwrap();
        assert!(!generated);
        assert_eq!(second.key(), first.key());
        assert_eq!(second.counter(), first.counter());
    }

    #[test]
    fn test_write_material_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aes.key");
        let material = CipherMaterial::new([1; 16], [2; 16]);
        write_material(&path, &material).unwrap();
        assert!(matches!(
            write_material(&path, &material),
            Err(EnclaveError::Io(_))
        ));
    }
}
