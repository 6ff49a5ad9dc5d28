/*!
 * Durable checkpoint records for resumable transfers
 *
 * One JSON file per in-flight session, keyed by the (bucket, key,
 * local path) triple. The record is rewritten whole after every
 * completed part and deleted only when the transfer commits.
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest as _, Md5};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::{ContentCryptoMaterial, MasterKeyProvider};
use crate::error::{OssError, Result};
use crate::options::TransferOptions;
use crate::types::Part;

const UPLOAD_DIR: &str = ".oss-client-upload";
const DOWNLOAD_DIR: &str = ".oss-client-download";

/// File-backed store for one checkpoint directory
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            OssError::Checkpoint(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    /// Store for upload records, honoring an explicit directory override
    pub fn for_upload(options: &TransferOptions) -> Result<Self> {
        match &options.checkpoint_dir {
            Some(dir) => Self::new(dir.join("upload")),
            None => Self::new(default_dir(UPLOAD_DIR)?),
        }
    }

    /// Store for download records
    pub fn for_download(options: &TransferOptions) -> Result<Self> {
        match &options.checkpoint_dir {
            Some(dir) => Self::new(dir.join("download")),
            None => Self::new(default_dir(DOWNLOAD_DIR)?),
        }
    }

    /// Write a record atomically (temp file, then rename)
    pub fn put<T: Serialize>(&self, name: &str, record: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| OssError::Checkpoint(format!("cannot encode record: {}", e)))?;
        fs::write(&tmp, json)
            .map_err(|e| OssError::Checkpoint(format!("cannot write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| OssError::Checkpoint(format!("cannot commit {}: {}", path.display(), e)))
    }

    /// Load a record; any parse or validation failure invalidates it
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OssError::Checkpoint(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        match serde_json::from_str(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(record = name, error = %e, "discarding malformed checkpoint");
                Ok(None)
            }
        }
    }

    /// Remove a record; removing an absent record is a no-op
    pub fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OssError::Checkpoint(format!("cannot delete record: {}", e))),
        }
    }
}

fn default_dir(name: &str) -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OssError::Checkpoint("cannot locate home directory".to_string()))?;
    Ok(home.join(name))
}

/// Record file name for a session: md5 of the remote address, md5 of
/// the local path, and a marker separating download records from
/// upload records for the same pair
pub fn record_key(bucket: &str, key: &str, abspath: &Path, download: bool) -> String {
    let remote = md5_hex(format!("oss://{}/{}", bucket, key).as_bytes());
    let local = md5_hex(abspath.to_string_lossy().as_bytes());
    if download {
        format!("{}-{}-download", remote, local)
    } else {
        format!("{}-{}", remote, local)
    }
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Progress record for a multipart upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCheckpoint {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub abspath: String,
    pub size: u64,
    /// Local file mtime, seconds since the epoch
    pub mtime: i64,
    pub part_size: u64,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_crypto_material: Option<CryptoMaterialRecord>,
}

impl UploadCheckpoint {
    /// A record only resumes the exact same local file and destination
    pub fn matches(&self, bucket: &str, key: &str, abspath: &Path, size: u64, mtime: i64) -> bool {
        self.bucket == bucket
            && self.key == key
            && self.abspath == abspath.to_string_lossy()
            && self.size == size
            && self.mtime == mtime
    }
}

/// Progress record for a resumable download session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadCheckpoint {
    pub bucket: String,
    pub key: String,
    pub abspath: String,
    /// Random token appended to the temp file name, fixed at session
    /// creation so concurrent downloads to the same path don't collide
    pub tmp_suffix: String,
    pub size: u64,
    /// Remote Last-Modified exactly as served
    pub mtime: String,
    pub etag: String,
    pub part_size: u64,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl DownloadCheckpoint {
    /// A record only resumes while the remote object is unchanged
    pub fn matches(
        &self,
        bucket: &str,
        key: &str,
        abspath: &Path,
        size: u64,
        mtime: &str,
        etag: &str,
    ) -> bool {
        self.bucket == bucket
            && self.key == key
            && self.abspath == abspath.to_string_lossy()
            && self.size == size
            && self.mtime == mtime
            && self.etag == etag
    }
}

/// Wrapped crypto material as embedded in a checkpoint record.
///
/// Only wrapped (ciphertext) fields are persisted; the plaintext key is
/// re-derived through the provider on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoMaterialRecord {
    pub wrap_alg: String,
    pub cek_alg: String,
    pub encrypted_key: String,
    pub encrypted_iv: String,
    #[serde(default)]
    pub mat_desc: String,
}

impl CryptoMaterialRecord {
    pub fn from_material(material: &ContentCryptoMaterial) -> Self {
        Self {
            wrap_alg: material.wrap_alg.clone(),
            cek_alg: material.cek_alg.clone(),
            encrypted_key: BASE64.encode(&material.wrapped_key),
            encrypted_iv: BASE64.encode(&material.wrapped_iv),
            mat_desc: material.mat_desc.clone(),
        }
    }

    /// Rebuild usable material by unwrapping through the provider
    pub fn rebuild(
        &self,
        provider: &dyn MasterKeyProvider,
        data_size: Option<u64>,
        part_size: Option<u64>,
    ) -> Result<ContentCryptoMaterial> {
        let wrapped_key = BASE64
            .decode(&self.encrypted_key)
            .map_err(|e| OssError::Checkpoint(format!("invalid encrypted_key: {}", e)))?;
        let wrapped_iv = BASE64
            .decode(&self.encrypted_iv)
            .map_err(|e| OssError::Checkpoint(format!("invalid encrypted_iv: {}", e)))?;
        let (plain_key, plain_iv) =
            provider.unwrap_material(&wrapped_key, &wrapped_iv, &self.mat_desc)?;
        Ok(ContentCryptoMaterial {
            cek_alg: self.cek_alg.clone(),
            wrap_alg: self.wrap_alg.clone(),
            plain_key,
            plain_iv,
            wrapped_key,
            wrapped_iv,
            mat_desc: self.mat_desc.clone(),
            data_size,
            part_size,
        })
    }
}
