/*!
 * Client-side envelope encryption
 *
 * A per-object content key encrypts the payload with AES-CTR; the
 * content key travels with the object, wrapped under the customer's
 * master key. The counter construction keeps multipart writes and
 * ranged reads byte-compatible with a single-stream encryption of the
 * whole object.
 */

pub mod cipher;
pub mod material;
pub mod provider;

pub use cipher::{align_down, AesCtrCipher, BLOCK_LEN, IV_LEN, KEY_LEN};
pub use material::{
    validate_crypto_part_size, ContentCryptoMaterial, EncryptionMetadata, CEK_AES_CTR,
    CRYPTO_MIN_PART_SIZE, META_UNENCRYPTED_LENGTH, META_UNENCRYPTED_MD5,
};
pub use provider::{
    KmsApi, KmsDataKey, KmsKeyProvider, MasterKeyProvider, RsaKeyProvider, RsaWrapMode,
    WRAP_KMS, WRAP_RSA_OAEP, WRAP_RSA_PKCS1,
};

use std::io::{self, Read};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest as _, Md5};
use tracing::warn;

use crate::client::{Body, GetOptions, OssClient};
use crate::error::Result;
use crate::types::{ObjectMeta, PutObjectResult};

/// Fresh content material for one object or multipart session
pub fn new_material(
    provider: &dyn MasterKeyProvider,
    data_size: Option<u64>,
    part_size: Option<u64>,
) -> Result<ContentCryptoMaterial> {
    if let Some(part_size) = part_size {
        validate_crypto_part_size(part_size)?;
    }
    let mut material = provider.new_material()?;
    material.data_size = data_size;
    material.part_size = part_size;
    Ok(material)
}

/// Rebuild the decryption material for an object from its metadata.
///
/// Returns `Ok(None)` for objects that carry no encryption metadata.
pub fn material_from_meta(
    provider: &dyn MasterKeyProvider,
    meta: &ObjectMeta,
) -> Result<Option<ContentCryptoMaterial>> {
    let metadata = match EncryptionMetadata::from_headers(&meta.headers)? {
        Some(metadata) => metadata,
        None => return Ok(None),
    };
    metadata.check_cek_alg()?;
    let (plain_key, plain_iv) =
        provider.unwrap_material(&metadata.wrapped_key, &metadata.wrapped_iv, &metadata.mat_desc)?;
    Ok(Some(ContentCryptoMaterial {
        cek_alg: metadata.cek_alg,
        wrap_alg: metadata.wrap_alg,
        plain_key,
        plain_iv,
        wrapped_key: metadata.wrapped_key,
        wrapped_iv: metadata.wrapped_iv,
        mat_desc: metadata.mat_desc,
        data_size: metadata.data_size,
        part_size: metadata.part_size,
    }))
}

/// Encrypt and upload a whole object in one call.
///
/// The cleartext length and MD5 move into dedicated metadata headers;
/// the transport-level ones describe the ciphertext.
pub fn put_object(
    client: &OssClient,
    provider: &dyn MasterKeyProvider,
    key: &str,
    data: Vec<u8>,
) -> Result<PutObjectResult> {
    let material = new_material(provider, Some(data.len() as u64), None)?;

    let mut headers = material.to_headers();
    headers.push((
        META_UNENCRYPTED_LENGTH.to_string(),
        data.len().to_string(),
    ));
    headers.push((
        META_UNENCRYPTED_MD5.to_string(),
        BASE64.encode(Md5::digest(&data)),
    ));

    let mut buf = data;
    material.cipher()?.apply(&mut buf);
    client.put_object_with_headers(key, buf, &headers)
}

/// Fetch and decrypt an object, or an inclusive byte range of it.
///
/// The range is adjusted here: the start aligns down to a block
/// boundary before the request goes out, and the reader discards the
/// alignment prefix. Callers never pass a pre-aligned range.
pub fn get_object(
    client: &OssClient,
    provider: &dyn MasterKeyProvider,
    key: &str,
    range: Option<(u64, u64)>,
) -> Result<(ObjectMeta, DecryptingReader<Body>)> {
    let get = match range {
        Some((start, end)) => GetOptions {
            range: Some((align_down(start), Some(end))),
            ..Default::default()
        },
        None => GetOptions::default(),
    };
    let (meta, body) = client.get_object(key, &get)?;
    let material = material_from_meta(provider, &meta)?;

    // The response may not honor the range (some deployments answer a
    // ranged GET with the full object and no content-range); key the
    // stream position off what the server actually returned
    let body_start = match meta.headers.get("content-range") {
        Some(range) => parse_content_range_start(range).unwrap_or(0),
        None => {
            if range.is_some() {
                warn!(key, "ranged response carries no content-range, assuming full object");
            }
            0
        }
    };
    let discard = match range {
        Some((start, _)) => start.saturating_sub(body_start),
        None => 0,
    };

    let cipher = match &material {
        Some(material) => Some(material.cipher_at(body_start)?),
        None => None,
    };
    Ok((meta, DecryptingReader::new(body, cipher, discard)))
}

/// Encrypt one part buffer in place using its derived counter
pub fn encrypt_part(
    material: &ContentCryptoMaterial,
    part_number: u32,
    buf: &mut [u8],
) -> Result<()> {
    material.part_cipher(part_number)?.apply(buf);
    Ok(())
}

/// Streaming decryption adapter over a response body.
///
/// Applies the keystream as bytes arrive and drops the first `discard`
/// decrypted bytes (the block-alignment prefix of a ranged read).
pub struct DecryptingReader<R: Read> {
    inner: R,
    cipher: Option<AesCtrCipher>,
    discard: u64,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(inner: R, cipher: Option<AesCtrCipher>, discard: u64) -> Self {
        Self {
            inner,
            cipher,
            discard,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn read_to_vec(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)
            .map_err(|e| crate::error::OssError::Request(format!("reading body: {}", e)))?;
        Ok(buf)
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut scratch = [0u8; 4096];
        while self.discard > 0 {
            let want = scratch.len().min(self.discard as usize);
            let n = self.inner.read(&mut scratch[..want])?;
            if n == 0 {
                return Ok(0);
            }
            if let Some(cipher) = &mut self.cipher {
                cipher.apply(&mut scratch[..n]);
            }
            self.discard -= n as u64;
        }

        let n = self.inner.read(buf)?;
        if let Some(cipher) = &mut self.cipher {
            cipher.apply(&mut buf[..n]);
        }
        Ok(n)
    }
}

fn parse_content_range_start(value: &str) -> Option<u64> {
    // "bytes 1024-2047/8192"
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = rest.split_once('-')?;
    start.parse().ok()
}
