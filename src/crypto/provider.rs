/*!
 * Master key providers: local RSA and remote KMS
 *
 * A provider turns long-term customer keys into per-object content
 * material. The set is closed: either an in-process RSA keypair wraps
 * the content key, or a remote KMS does. Plaintext key material never
 * leaves the process and is zeroized on drop.
 */

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{OssError, Result};

use super::cipher::{IV_LEN, KEY_LEN};
use super::material::{ContentCryptoMaterial, CEK_AES_CTR};

pub const WRAP_RSA_PKCS1: &str = "RSA/NONE/PKCS1Padding";
pub const WRAP_RSA_OAEP: &str = "RSA/NONE/OAEPWithSHA-1AndMGF1Padding";
pub const WRAP_KMS: &str = "KMS/ALICLOUD";

/// Fixed plaintext used to prove at construction time that the loaded
/// public and private keys belong together
const KEY_CHECK_MAGIC: &[u8] = b"oss-client key consistency check v1";

/// Material-description entry carrying the key fingerprint
const MAT_DESC_KEY_CHECKSUM: &str = "key-checksum";

/// Produces and unwraps per-object content key material
pub trait MasterKeyProvider: Send + Sync {
    /// Identifier recorded in object metadata as the wrap algorithm
    fn wrap_alg(&self) -> &str;

    /// Opaque description stored alongside the wrapped key
    fn mat_desc(&self) -> &str;

    /// Fresh content material for one object
    fn new_material(&self) -> Result<ContentCryptoMaterial>;

    /// Recover the plaintext key and IV from their stored wrapped forms
    fn unwrap_material(
        &self,
        wrapped_key: &[u8],
        wrapped_iv: &[u8],
        mat_desc: &str,
    ) -> Result<(Zeroizing<Vec<u8>>, [u8; IV_LEN])>;
}

/// RSA wrap flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaWrapMode {
    /// PKCS#1 v1.5 padding
    Pkcs1,
    /// OAEP with SHA-1 and MGF1
    OaepSha1,
}

impl RsaWrapMode {
    fn wrap_alg(self) -> &'static str {
        match self {
            RsaWrapMode::Pkcs1 => WRAP_RSA_PKCS1,
            RsaWrapMode::OaepSha1 => WRAP_RSA_OAEP,
        }
    }
}

/// Local asymmetric provider backed by a 2048-bit RSA keypair
pub struct RsaKeyProvider {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    mode: RsaWrapMode,
    mat_desc: String,
}

impl RsaKeyProvider {
    /// Generate a fresh 2048-bit keypair
    pub fn generate(mode: RsaWrapMode) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| OssError::Crypto(format!("RSA key generation failed: {}", e)))?;
        Self::from_private_key(private_key, mode, BTreeMap::new())
    }

    /// Load a private key from PEM (PKCS#8 or PKCS#1)
    pub fn from_pem(private_pem: &str, mode: RsaWrapMode) -> Result<Self> {
        Self::from_pem_with_description(private_pem, mode, BTreeMap::new())
    }

    /// Load a private key from PEM with user material-description entries
    pub fn from_pem_with_description(
        private_pem: &str,
        mode: RsaWrapMode,
        description: BTreeMap<String, String>,
    ) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| OssError::Crypto(format!("cannot parse RSA private key: {}", e)))?;
        Self::from_private_key(private_key, mode, description)
    }

    fn from_private_key(
        private_key: RsaPrivateKey,
        mode: RsaWrapMode,
        mut description: BTreeMap<String, String>,
    ) -> Result<Self> {
        let public_key = private_key.to_public_key();
        let provider = Self {
            private_key,
            public_key,
            mode,
            mat_desc: String::new(),
        };
        provider.self_test()?;

        description.insert(MAT_DESC_KEY_CHECKSUM.to_string(), provider.key_checksum());
        let mat_desc = serde_json::to_string(&description)
            .map_err(|e| OssError::Crypto(format!("cannot encode material description: {}", e)))?;
        Ok(Self { mat_desc, ..provider })
    }

    /// Wrap the magic constant with the public key and unwrap it with
    /// the private key; a mismatched pair fails construction instead of
    /// producing undecryptable objects later
    fn self_test(&self) -> Result<()> {
        let encrypted = self.wrap(KEY_CHECK_MAGIC)?;
        let decrypted = self.unwrap(&encrypted)?;
        if decrypted.as_slice() != KEY_CHECK_MAGIC {
            return Err(OssError::Crypto(
                "RSA public and private keys do not match".to_string(),
            ));
        }
        Ok(())
    }

    /// Deterministic fingerprint: HMAC of the magic constant keyed by
    /// the public modulus. Recorded in the material description so a
    /// reader detects a wrong master key before touching payload.
    fn key_checksum(&self) -> String {
        let modulus = self.public_key.n().to_bytes_be();
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&modulus)
            .expect("HMAC accepts any key length");
        mac.update(KEY_CHECK_MAGIC);
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn wrap(&self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self.mode {
            RsaWrapMode::Pkcs1 => self.public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, data),
            RsaWrapMode::OaepSha1 => {
                self.public_key
                    .encrypt(&mut OsRng, Oaep::new::<Sha1>(), data)
            }
        };
        result.map_err(|e| OssError::Crypto(format!("RSA wrap failed: {}", e)))
    }

    fn unwrap(&self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self.mode {
            RsaWrapMode::Pkcs1 => self.private_key.decrypt(Pkcs1v15Encrypt, data),
            RsaWrapMode::OaepSha1 => self.private_key.decrypt(Oaep::new::<Sha1>(), data),
        };
        result.map_err(|e| OssError::Crypto(format!("RSA unwrap failed: {}", e)))
    }

    fn check_stored_description(&self, mat_desc: &str) -> Result<()> {
        if mat_desc.is_empty() {
            return Ok(());
        }
        let stored: BTreeMap<String, String> = match serde_json::from_str(mat_desc) {
            Ok(map) => map,
            // Foreign descriptions are opaque; nothing to check against
            Err(_) => return Ok(()),
        };
        if let Some(stored_checksum) = stored.get(MAT_DESC_KEY_CHECKSUM) {
            if *stored_checksum != self.key_checksum() {
                return Err(OssError::Crypto(
                    "object was encrypted under a different master key".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl MasterKeyProvider for RsaKeyProvider {
    fn wrap_alg(&self) -> &str {
        self.mode.wrap_alg()
    }

    fn mat_desc(&self) -> &str {
        &self.mat_desc
    }

    fn new_material(&self) -> Result<ContentCryptoMaterial> {
        let mut plain_key = Zeroizing::new(vec![0u8; KEY_LEN]);
        let mut plain_iv = [0u8; IV_LEN];
        OsRng.fill_bytes(plain_key.as_mut_slice());
        OsRng.fill_bytes(&mut plain_iv);

        let wrapped_key = self.wrap(&plain_key)?;
        let wrapped_iv = self.wrap(&plain_iv)?;

        Ok(ContentCryptoMaterial {
            cek_alg: CEK_AES_CTR.to_string(),
            wrap_alg: self.wrap_alg().to_string(),
            plain_key,
            plain_iv,
            wrapped_key,
            wrapped_iv,
            mat_desc: self.mat_desc.clone(),
            data_size: None,
            part_size: None,
        })
    }

    fn unwrap_material(
        &self,
        wrapped_key: &[u8],
        wrapped_iv: &[u8],
        mat_desc: &str,
    ) -> Result<(Zeroizing<Vec<u8>>, [u8; IV_LEN])> {
        self.check_stored_description(mat_desc)?;

        let plain_key = Zeroizing::new(self.unwrap(wrapped_key)?);
        let iv_bytes = Zeroizing::new(self.unwrap(wrapped_iv)?);
        let plain_iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            OssError::Crypto(format!(
                "unwrapped IV has length {}, expected {}",
                iv_bytes.len(),
                IV_LEN
            ))
        })?;
        Ok((plain_key, plain_iv))
    }
}

/// A data key generated by the KMS service
pub struct KmsDataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext_blob: String,
}

/// The three KMS calls the provider depends on. The remote client lives
/// outside this crate; tests substitute an in-process fake.
pub trait KmsApi: Send + Sync {
    fn generate_data_key(&self, encryption_context: &str) -> Result<KmsDataKey>;
    fn encrypt(&self, plaintext: &[u8], encryption_context: &str) -> Result<String>;
    fn decrypt(&self, ciphertext_blob: &str, encryption_context: &str) -> Result<Zeroizing<Vec<u8>>>;
}

/// Provider backed by a remote KMS
pub struct KmsKeyProvider {
    api: Arc<dyn KmsApi>,
    encryption_context: String,
    mat_desc: String,
}

impl KmsKeyProvider {
    pub fn new(api: Arc<dyn KmsApi>, encryption_context: impl Into<String>) -> Self {
        Self {
            api,
            encryption_context: encryption_context.into(),
            mat_desc: String::new(),
        }
    }

    /// Fold a passphrase into the encryption context so unwrapping
    /// requires the same value
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.encryption_context = format!("{}#{}", self.encryption_context, passphrase);
        self
    }

    pub fn with_description(mut self, mat_desc: impl Into<String>) -> Self {
        self.mat_desc = mat_desc.into();
        self
    }
}

impl MasterKeyProvider for KmsKeyProvider {
    fn wrap_alg(&self) -> &str {
        WRAP_KMS
    }

    fn mat_desc(&self) -> &str {
        &self.mat_desc
    }

    fn new_material(&self) -> Result<ContentCryptoMaterial> {
        let data_key = self.api.generate_data_key(&self.encryption_context)?;
        if data_key.plaintext.len() != KEY_LEN {
            return Err(OssError::Crypto(format!(
                "KMS data key has length {}, expected {}",
                data_key.plaintext.len(),
                KEY_LEN
            )));
        }

        let mut plain_iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut plain_iv);
        let wrapped_iv = self.api.encrypt(&plain_iv, &self.encryption_context)?;

        Ok(ContentCryptoMaterial {
            cek_alg: CEK_AES_CTR.to_string(),
            wrap_alg: WRAP_KMS.to_string(),
            plain_key: data_key.plaintext,
            plain_iv,
            wrapped_key: data_key.ciphertext_blob.into_bytes(),
            wrapped_iv: wrapped_iv.into_bytes(),
            mat_desc: self.mat_desc.clone(),
            data_size: None,
            part_size: None,
        })
    }

    fn unwrap_material(
        &self,
        wrapped_key: &[u8],
        wrapped_iv: &[u8],
        _mat_desc: &str,
    ) -> Result<(Zeroizing<Vec<u8>>, [u8; IV_LEN])> {
        let key_blob = std::str::from_utf8(wrapped_key)
            .map_err(|_| OssError::Crypto("KMS wrapped key is not valid UTF-8".to_string()))?;
        let iv_blob = std::str::from_utf8(wrapped_iv)
            .map_err(|_| OssError::Crypto("KMS wrapped IV is not valid UTF-8".to_string()))?;

        let plain_key = self.api.decrypt(key_blob, &self.encryption_context)?;
        let iv_bytes = self.api.decrypt(iv_blob, &self.encryption_context)?;
        let plain_iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            OssError::Crypto(format!(
                "KMS returned an IV of length {}, expected {}",
                iv_bytes.len(),
                IV_LEN
            ))
        })?;
        Ok((plain_key, plain_iv))
    }
}
