/*!
 * Resumable multipart upload
 *
 * Given the same (bucket, key, local path) arguments, a rerun after a
 * crash resumes from the checkpoint record instead of starting over.
 */

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use tracing::{debug, info, warn};

use crate::client::OssClient;
use crate::crc64;
use crate::crypto::{
    self, ContentCryptoMaterial, MasterKeyProvider, BLOCK_LEN, CRYPTO_MIN_PART_SIZE,
};
use crate::error::{OssError, Result};
use crate::options::TransferOptions;
use crate::types::Part;

use super::checkpoint::{self, CheckpointStore, CryptoMaterialRecord, UploadCheckpoint};
use super::pool::TaskPool;
use super::{clamp_part_size, split_parts};

/// Outcome of an upload, whether single-shot or multipart
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub etag: String,
    pub crc64: Option<u64>,
    pub request_id: String,
}

/// Upload a local file, resuming a previous interrupted attempt if its
/// checkpoint is still valid
pub fn upload_file(
    client: &OssClient,
    key: &str,
    path: &Path,
    options: &TransferOptions,
) -> Result<UploadResult> {
    upload_impl(client, key, path, options, None)
}

/// Same contract with client-side encryption through `provider`
pub fn upload_file_encrypted(
    client: &OssClient,
    key: &str,
    path: &Path,
    options: &TransferOptions,
    provider: &dyn MasterKeyProvider,
) -> Result<UploadResult> {
    upload_impl(client, key, path, options, Some(provider))
}

fn upload_impl(
    client: &OssClient,
    key: &str,
    path: &Path,
    options: &TransferOptions,
    provider: Option<&dyn MasterKeyProvider>,
) -> Result<UploadResult> {
    let abspath = std::fs::canonicalize(path)?;
    let metadata = std::fs::metadata(&abspath)?;
    let size = metadata.len();
    let mtime = file_mtime(&metadata);

    if size < options.multipart_threshold {
        return upload_single(client, key, &abspath, options, provider);
    }

    let mut part_size = clamp_part_size(size, options.part_size);
    if provider.is_some() {
        part_size = crypto_part_size(part_size);
    }

    let store = match options.enable_checkpoint {
        true => Some(CheckpointStore::for_upload(options)?),
        false => None,
    };
    let record_name = checkpoint::record_key(client.bucket(), key, &abspath, false);

    let resumed = match &store {
        Some(store) => validate_record(
            store.get(&record_name)?,
            client,
            key,
            &abspath,
            size,
            mtime,
            provider.is_some(),
        )?,
        None => None,
    };

    let (record, material) = match resumed {
        Some(record) => {
            info!(
                key,
                upload_id = %record.upload_id,
                completed = record.parts.len(),
                "resuming multipart upload"
            );
            let material = match (&record.content_crypto_material, provider) {
                (Some(stored), Some(provider)) => {
                    Some(stored.rebuild(provider, Some(size), Some(record.part_size))?)
                }
                _ => None,
            };
            (record, material)
        }
        None => {
            let material = match provider {
                Some(provider) => {
                    Some(crypto::new_material(provider, Some(size), Some(part_size))?)
                }
                None => None,
            };
            let headers = material
                .as_ref()
                .map(ContentCryptoMaterial::to_headers)
                .unwrap_or_default();
            let init = client.initiate_multipart_upload(key, &headers)?;
            info!(key, upload_id = %init.upload_id, size, part_size, "starting multipart upload");
            let record = UploadCheckpoint {
                upload_id: init.upload_id,
                bucket: client.bucket().to_string(),
                key: key.to_string(),
                abspath: abspath.to_string_lossy().into_owned(),
                size,
                mtime,
                part_size,
                parts: Vec::new(),
                content_crypto_material: material.as_ref().map(CryptoMaterialRecord::from_material),
            };
            if let Some(store) = &store {
                store.put(&record_name, &record)?;
            }
            (record, material)
        }
    };

    let upload_id = record.upload_id.clone();
    let completed: HashSet<u32> = record.parts.iter().map(|p| p.part_number).collect();
    let todo: Vec<Part> = split_parts(size, record.part_size)
        .into_iter()
        .filter(|p| !completed.contains(&p.part_number))
        .collect();
    debug!(key, remaining = todo.len(), "computed part work set");

    let session = Mutex::new(record);
    let pool = TaskPool::new(options.workers);
    pool.run(todo, |part| {
        let mut buf = read_part(&abspath, &part)?;
        if let Some(material) = &material {
            crypto::encrypt_part(material, part.part_number, &mut buf)?;
        }
        let local_crc = options.enable_crc.then(|| crc64::checksum(&buf));

        let result = client.upload_part(key, &upload_id, part.part_number, buf)?;
        if let (Some(local), Some(server)) = (local_crc, result.crc64) {
            if local != server {
                return Err(OssError::Inconsistent {
                    expected: local.to_string(),
                    actual: server.to_string(),
                });
            }
        }

        let mut record = session.lock().unwrap();
        record.parts.push(Part {
            etag: result.etag,
            crc64: result.crc64.or(local_crc),
            ..part
        });
        record.parts.sort_by_key(|p| p.part_number);
        if let Some(store) = &store {
            store.put(&record_name, &*record)?;
        }
        Ok(())
    })?;

    let record = session.into_inner().unwrap();
    let result = client.complete_multipart_upload(key, &upload_id, &record.parts)?;

    if options.enable_crc {
        if let Some(server_crc) = result.crc64 {
            let combined = record.parts.iter().try_fold(0u64, |acc, p| {
                p.crc64.map(|crc| crc64::combine(acc, crc, p.size()))
            });
            match combined {
                Some(expected) if expected != server_crc => {
                    return Err(OssError::Inconsistent {
                        expected: expected.to_string(),
                        actual: server_crc.to_string(),
                    });
                }
                None => warn!(key, "per-part CRCs incomplete, skipping object verification"),
                _ => debug!(key, crc = server_crc, "combined CRC matches"),
            }
        }
    }

    if let Some(store) = &store {
        store.delete(&record_name)?;
    }
    Ok(UploadResult {
        etag: result.etag,
        crc64: result.crc64,
        request_id: result.request_id,
    })
}

/// Below the multipart threshold the whole flow is a single PUT and no
/// checkpoint file is ever written
fn upload_single(
    client: &OssClient,
    key: &str,
    abspath: &Path,
    options: &TransferOptions,
    provider: Option<&dyn MasterKeyProvider>,
) -> Result<UploadResult> {
    let data = std::fs::read(abspath)?;
    debug!(key, size = data.len(), "uploading below multipart threshold");

    let result = match provider {
        Some(provider) => crypto::put_object(client, provider, key, data)?,
        None => {
            let local_crc = options.enable_crc.then(|| crc64::checksum(&data));
            let result = client.put_object(key, data)?;
            if let (Some(local), Some(server)) = (local_crc, result.crc64) {
                if local != server {
                    return Err(OssError::Inconsistent {
                        expected: local.to_string(),
                        actual: server.to_string(),
                    });
                }
            }
            result
        }
    };
    Ok(UploadResult {
        etag: result.etag,
        crc64: result.crc64,
        request_id: result.request_id,
    })
}

/// A stored record resumes only if the local file and destination are
/// unchanged, its crypto shape matches this invocation, and the server
/// still knows the upload ID
fn validate_record(
    record: Option<UploadCheckpoint>,
    client: &OssClient,
    key: &str,
    abspath: &Path,
    size: u64,
    mtime: i64,
    encrypting: bool,
) -> Result<Option<UploadCheckpoint>> {
    let record = match record {
        Some(record) => record,
        None => return Ok(None),
    };
    if !record.matches(client.bucket(), key, abspath, size, mtime) {
        info!(key, "checkpoint no longer matches local file, restarting");
        return Ok(None);
    }
    if record.content_crypto_material.is_some() != encrypting {
        info!(key, "checkpoint encryption mode differs, restarting");
        return Ok(None);
    }
    match client.list_parts(key, &record.upload_id) {
        Ok(_) => Ok(Some(record)),
        Err(OssError::NoSuchUpload(_)) => {
            info!(key, upload_id = %record.upload_id, "upload unknown to server, restarting");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn read_part(path: &Path, part: &Part) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(part.start))?;
    let mut buf = vec![0u8; part.size() as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn file_mtime(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Encrypted parts must start on a cipher block boundary and respect
/// the crypto layer's minimum
fn crypto_part_size(part_size: u64) -> u64 {
    let block = BLOCK_LEN as u64;
    let aligned = part_size.div_ceil(block) * block;
    aligned.max(CRYPTO_MIN_PART_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_part_size_alignment() {
        assert_eq!(crypto_part_size(100 * 1024), 100 * 1024);
        assert_eq!(crypto_part_size(100 * 1024 + 1), 100 * 1024 + 16);
        assert_eq!(crypto_part_size(1), CRYPTO_MIN_PART_SIZE);
    }
}
