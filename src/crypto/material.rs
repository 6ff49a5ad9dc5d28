/*!
 * Content crypto material and its object-metadata representation
 *
 * The material travels with the object: the wrapped key and IV are
 * stored as metadata headers on write and reconstructed on every read.
 * Older clients stored the same fields under `x-oss-meta-oss-crypto-*`
 * names; those are still honored on the read path.
 */

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::error::{OssError, Result};

use super::cipher::{AesCtrCipher, BLOCK_LEN, IV_LEN};

/// The only content cipher the SDK writes
pub const CEK_AES_CTR: &str = "AES/CTR/NoPadding";

/// Smallest part size the crypto layer accepts for multipart uploads
pub const CRYPTO_MIN_PART_SIZE: u64 = 100 * 1024;

pub const META_KEY: &str = "x-oss-meta-client-side-encryption-key";
pub const META_START: &str = "x-oss-meta-client-side-encryption-start";
pub const META_CEK_ALG: &str = "x-oss-meta-client-side-encryption-cek-alg";
pub const META_WRAP_ALG: &str = "x-oss-meta-client-side-encryption-wrap-alg";
pub const META_MAT_DESC: &str = "x-oss-meta-client-side-encryption-matdesc";
pub const META_DATA_SIZE: &str = "x-oss-meta-client-side-encryption-data-size";
pub const META_PART_SIZE: &str = "x-oss-meta-client-side-encryption-part-size";
pub const META_UNENCRYPTED_MD5: &str =
    "x-oss-meta-client-side-encryption-unencrypted-content-md5";
pub const META_UNENCRYPTED_LENGTH: &str =
    "x-oss-meta-client-side-encryption-unencrypted-content-length";

const DEPRECATED_META_KEY: &str = "x-oss-meta-oss-crypto-key";
const DEPRECATED_META_START: &str = "x-oss-meta-oss-crypto-start";
const DEPRECATED_META_CEK_ALG: &str = "x-oss-meta-oss-cek-alg";
const DEPRECATED_META_WRAP_ALG: &str = "x-oss-meta-oss-wrap-alg";

/// Everything needed to encrypt or decrypt one object.
///
/// The plaintext key and IV are transient; only the wrapped forms and
/// the algorithm identifiers are persisted.
#[derive(Clone)]
pub struct ContentCryptoMaterial {
    pub cek_alg: String,
    pub wrap_alg: String,
    pub plain_key: Zeroizing<Vec<u8>>,
    pub plain_iv: [u8; IV_LEN],
    pub wrapped_key: Vec<u8>,
    pub wrapped_iv: Vec<u8>,
    pub mat_desc: String,
    pub data_size: Option<u64>,
    pub part_size: Option<u64>,
}

impl ContentCryptoMaterial {
    /// Cipher positioned at the start of the object
    pub fn cipher(&self) -> Result<AesCtrCipher> {
        AesCtrCipher::new(&self.plain_key, &self.plain_iv)
    }

    /// Cipher positioned at an absolute (block-aligned) byte offset
    pub fn cipher_at(&self, offset: u64) -> Result<AesCtrCipher> {
        let mut cipher = self.cipher()?;
        cipher.seek(offset)?;
        Ok(cipher)
    }

    /// Cipher for one part of a multipart upload.
    ///
    /// The counter is derived from the part number alone so any worker
    /// can encrypt any part without shared session state.
    pub fn part_cipher(&self, part_number: u32) -> Result<AesCtrCipher> {
        let part_size = self.part_size.ok_or_else(|| {
            OssError::Client("crypto material has no part size; not a multipart context".into())
        })?;
        self.cipher_at((part_number as u64 - 1) * part_size)
    }

    /// Serialize into the metadata headers stored with the object
    pub fn to_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (META_KEY.to_string(), BASE64.encode(&self.wrapped_key)),
            (META_START.to_string(), BASE64.encode(&self.wrapped_iv)),
            (META_CEK_ALG.to_string(), self.cek_alg.clone()),
            (META_WRAP_ALG.to_string(), self.wrap_alg.clone()),
        ];
        if !self.mat_desc.is_empty() {
            headers.push((META_MAT_DESC.to_string(), self.mat_desc.clone()));
        }
        if let Some(size) = self.data_size {
            headers.push((META_DATA_SIZE.to_string(), size.to_string()));
        }
        if let Some(size) = self.part_size {
            headers.push((META_PART_SIZE.to_string(), size.to_string()));
        }
        headers
    }
}

/// The wrapped material as read back from object metadata, before the
/// provider unwraps it
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionMetadata {
    pub wrapped_key: Vec<u8>,
    pub wrapped_iv: Vec<u8>,
    pub cek_alg: String,
    pub wrap_alg: String,
    pub mat_desc: String,
    pub data_size: Option<u64>,
    pub part_size: Option<u64>,
}

impl EncryptionMetadata {
    /// Extract encryption metadata from lowercased response headers.
    ///
    /// Returns `Ok(None)` when the object carries no encryption
    /// metadata at all (plain object read through the crypto path).
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Result<Option<Self>> {
        let (key_name, start_name, cek_name, wrap_name) = if headers.contains_key(META_KEY) {
            (META_KEY, META_START, META_CEK_ALG, META_WRAP_ALG)
        } else if headers.contains_key(DEPRECATED_META_KEY) {
            (
                DEPRECATED_META_KEY,
                DEPRECATED_META_START,
                DEPRECATED_META_CEK_ALG,
                DEPRECATED_META_WRAP_ALG,
            )
        } else {
            return Ok(None);
        };

        let wrapped_key = decode_field(headers, key_name)?;
        let wrapped_iv = decode_field(headers, start_name)?;
        let cek_alg = headers.get(cek_name).cloned().ok_or_else(|| {
            OssError::Crypto(format!("encrypted object is missing {}", cek_name))
        })?;
        let wrap_alg = headers.get(wrap_name).cloned().ok_or_else(|| {
            OssError::Crypto(format!("encrypted object is missing {}", wrap_name))
        })?;

        Ok(Some(Self {
            wrapped_key,
            wrapped_iv,
            cek_alg,
            wrap_alg,
            mat_desc: headers.get(META_MAT_DESC).cloned().unwrap_or_default(),
            data_size: parse_size(headers, META_DATA_SIZE)?,
            part_size: parse_size(headers, META_PART_SIZE)?,
        }))
    }

    /// Reject material this SDK cannot decrypt
    pub fn check_cek_alg(&self) -> Result<()> {
        if self.cek_alg != CEK_AES_CTR {
            return Err(OssError::Inconsistent {
                expected: CEK_AES_CTR.to_string(),
                actual: self.cek_alg.clone(),
            });
        }
        Ok(())
    }
}

/// Part sizes in an encrypted multipart upload must be block-aligned
/// and large enough to be worth a round trip
pub fn validate_crypto_part_size(part_size: u64) -> Result<()> {
    if part_size % BLOCK_LEN as u64 != 0 {
        return Err(OssError::Client(format!(
            "encrypted part size {} is not a multiple of {}",
            part_size, BLOCK_LEN
        )));
    }
    if part_size < CRYPTO_MIN_PART_SIZE {
        return Err(OssError::Client(format!(
            "encrypted part size {} is below the minimum of {} bytes",
            part_size, CRYPTO_MIN_PART_SIZE
        )));
    }
    Ok(())
}

fn decode_field(headers: &BTreeMap<String, String>, name: &str) -> Result<Vec<u8>> {
    let value = headers
        .get(name)
        .ok_or_else(|| OssError::Crypto(format!("encrypted object is missing {}", name)))?;
    BASE64
        .decode(value)
        .map_err(|e| OssError::Crypto(format!("invalid base64 in {}: {}", name, e)))
}

fn parse_size(headers: &BTreeMap<String, String>, name: &str) -> Result<Option<u64>> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .parse::<u64>()
            .map(Some)
            .map_err(|e| OssError::Crypto(format!("invalid {}: {}", name, e))),
    }
}
