/*!
 * Resumable ranged download
 *
 * Parts land in a temp file at their exact offsets; the atomic rename
 * onto the destination path is the only globally visible commit. The
 * remote object is pinned with If-Match / If-Unmodified-Since so a
 * concurrent mutation aborts the transfer instead of mixing versions.
 */

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::client::{Body, GetOptions, OssClient};
use crate::crc64::{self, Crc64};
use crate::crypto::{self, ContentCryptoMaterial, DecryptingReader, MasterKeyProvider, BLOCK_LEN};
use crate::error::{OssError, Result};
use crate::options::TransferOptions;
use crate::types::{ObjectMeta, Part};

use super::checkpoint::{self, CheckpointStore, DownloadCheckpoint};
use super::pool::TaskPool;
use super::{clamp_part_size, split_parts};

/// Download an object to a local path, resuming a previous interrupted
/// attempt if its checkpoint is still valid
pub fn download_file(
    client: &OssClient,
    key: &str,
    path: &Path,
    options: &TransferOptions,
) -> Result<()> {
    download_impl(client, key, path, options, None)
}

/// Same contract, decrypting through `provider`
pub fn download_file_encrypted(
    client: &OssClient,
    key: &str,
    path: &Path,
    options: &TransferOptions,
    provider: &dyn MasterKeyProvider,
) -> Result<()> {
    download_impl(client, key, path, options, Some(provider))
}

fn download_impl(
    client: &OssClient,
    key: &str,
    path: &Path,
    options: &TransferOptions,
    provider: Option<&dyn MasterKeyProvider>,
) -> Result<()> {
    let abspath = absolute_path(path)?;
    let meta = client.head_object(key)?;
    let material = match provider {
        Some(provider) => crypto::material_from_meta(provider, &meta)?,
        None => None,
    };

    if meta.size < options.multipart_threshold {
        return download_single(client, key, &abspath, &meta, material.as_ref());
    }

    let mut part_size = clamp_part_size(meta.size, options.part_size);
    if material.is_some() {
        // Part boundaries must fall on cipher blocks
        let block = BLOCK_LEN as u64;
        part_size = part_size.div_ceil(block) * block;
    }

    let store = match options.enable_checkpoint {
        true => Some(CheckpointStore::for_download(options)?),
        false => None,
    };
    let record_name = checkpoint::record_key(client.bucket(), key, &abspath, true);

    let resumed = match &store {
        Some(store) => {
            validate_record(store.get(&record_name)?, client, key, &abspath, &meta)?
        }
        None => None,
    };

    let record = match resumed {
        Some(record) => {
            info!(key, completed = record.parts.len(), "resuming download");
            record
        }
        None => {
            let record = DownloadCheckpoint {
                bucket: client.bucket().to_string(),
                key: key.to_string(),
                abspath: abspath.to_string_lossy().into_owned(),
                tmp_suffix: fresh_tmp_suffix(),
                size: meta.size,
                mtime: meta.last_modified.clone(),
                etag: meta.etag.clone(),
                part_size,
                parts: Vec::new(),
            };
            info!(key, size = meta.size, part_size, "starting download");
            if let Some(store) = &store {
                store.put(&record_name, &record)?;
            }
            record
        }
    };

    let temp_path = temp_path_for(&abspath, &record.tmp_suffix);
    prepare_temp_file(&temp_path, meta.size)?;

    let completed: HashSet<u32> = record.parts.iter().map(|p| p.part_number).collect();
    let todo: Vec<Part> = split_parts(meta.size, record.part_size)
        .into_iter()
        .filter(|p| !completed.contains(&p.part_number))
        .collect();
    debug!(key, remaining = todo.len(), "computed part work set");

    // CRC verification only applies to plain objects: the server-side
    // checksum covers the stored ciphertext, not what we decrypt
    let verify_crc = options.enable_crc && material.is_none();

    let session = Mutex::new(record);
    let pool = TaskPool::new(options.workers);
    pool.run(todo, |part| {
        let get = GetOptions {
            range: Some((part.start, Some(part.end - 1))),
            if_match: Some(format!("\"{}\"", meta.etag)),
            if_unmodified_since: Some(meta.last_modified.clone()),
        };
        let (_, body) = client.get_object(key, &get)?;

        let mut file = OpenOptions::new().write(true).open(&temp_path)?;
        file.seek(SeekFrom::Start(part.start))?;

        let written;
        let mut crc = verify_crc.then(Crc64::new);
        match &material {
            Some(material) => {
                let reader = DecryptingReader::new(body, Some(material.cipher_at(part.start)?), 0);
                written = copy_part(reader, &mut file, crc.as_mut())?;
            }
            None => {
                written = copy_part(body, &mut file, crc.as_mut())?;
            }
        }
        if written != part.size() {
            return Err(OssError::Inconsistent {
                expected: format!("{} bytes for part {}", part.size(), part.part_number),
                actual: format!("{} bytes", written),
            });
        }

        let mut record = session.lock().unwrap();
        record.parts.push(Part {
            crc64: crc.map(|c| c.sum()),
            ..part
        });
        record.parts.sort_by_key(|p| p.part_number);
        if let Some(store) = &store {
            store.put(&record_name, &*record)?;
        }
        Ok(())
    })?;

    let record = session.into_inner().unwrap();

    if verify_crc {
        if let Some(server_crc) = meta.crc64 {
            let combined = record.parts.iter().try_fold(0u64, |acc, p| {
                p.crc64.map(|crc| crc64::combine(acc, crc, p.size()))
            });
            match combined {
                Some(expected) if expected != server_crc => {
                    return Err(OssError::Inconsistent {
                        expected: server_crc.to_string(),
                        actual: expected.to_string(),
                    });
                }
                None => warn!(key, "per-part CRCs incomplete, skipping verification"),
                _ => debug!(key, crc = server_crc, "combined CRC matches"),
            }
        }
    }

    // The rename is the commit point
    fs::rename(&temp_path, &abspath)?;
    if let Some(store) = &store {
        store.delete(&record_name)?;
    }
    info!(key, path = %abspath.display(), "download complete");
    Ok(())
}

/// Below the threshold: one GET into a temp file, then rename
fn download_single(
    client: &OssClient,
    key: &str,
    abspath: &Path,
    meta: &ObjectMeta,
    material: Option<&ContentCryptoMaterial>,
) -> Result<()> {
    let get = GetOptions {
        if_match: Some(format!("\"{}\"", meta.etag)),
        ..Default::default()
    };
    let (_, body) = client.get_object(key, &get)?;

    let temp_path = temp_path_for(abspath, &fresh_tmp_suffix());
    let mut file = File::create(&temp_path)?;
    let result = write_single(body, &mut file, material);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }
    drop(file);
    fs::rename(&temp_path, abspath)?;
    Ok(())
}

fn write_single(
    body: Body,
    file: &mut File,
    material: Option<&ContentCryptoMaterial>,
) -> Result<()> {
    match material {
        Some(material) => {
            let reader = DecryptingReader::new(body, Some(material.cipher()?), 0);
            copy_part(reader, file, None)?;
        }
        None => {
            copy_part(body, file, None)?;
        }
    }
    Ok(())
}

/// Stream a response body into the file, optionally feeding a CRC.
/// Returns the byte count and verifies the body arrived whole.
fn copy_part<R: BodyReader>(mut reader: R, file: &mut File, mut crc: Option<&mut Crc64>) -> Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| OssError::Request(format!("reading part body: {}", e)))?;
        if n == 0 {
            break;
        }
        if let Some(crc) = &mut crc {
            crc.update(&buf[..n]);
        }
        file.write_all(&buf[..n])?;
        written += n as u64;
    }
    reader.check_complete()?;
    Ok(written)
}

/// Readers that can report whether the underlying response body was
/// truncated by the transport
trait BodyReader: Read {
    fn check_complete(&self) -> Result<()>;
}

impl BodyReader for Body {
    fn check_complete(&self) -> Result<()> {
        Body::check_complete(self)
    }
}

impl BodyReader for DecryptingReader<Body> {
    fn check_complete(&self) -> Result<()> {
        self.get_ref().check_complete()
    }
}

/// A stored record resumes only while the remote identity is unchanged
/// and its temp file still exists
fn validate_record(
    record: Option<DownloadCheckpoint>,
    client: &OssClient,
    key: &str,
    abspath: &Path,
    meta: &ObjectMeta,
) -> Result<Option<DownloadCheckpoint>> {
    let record = match record {
        Some(record) => record,
        None => return Ok(None),
    };
    let temp_path = temp_path_for(abspath, &record.tmp_suffix);
    if !record.matches(
        client.bucket(),
        key,
        abspath,
        meta.size,
        &meta.last_modified,
        &meta.etag,
    ) {
        info!(key, "remote object changed, restarting download");
        let _ = fs::remove_file(&temp_path);
        return Ok(None);
    }
    if !temp_path.exists() {
        info!(key, "temp file is gone, restarting download");
        return Ok(None);
    }
    Ok(Some(record))
}

fn prepare_temp_file(temp_path: &Path, size: u64) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(temp_path)?;
    file.set_len(size)?;
    Ok(())
}

fn temp_path_for(abspath: &Path, suffix: &str) -> PathBuf {
    let mut name = abspath.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn fresh_tmp_suffix() -> String {
    let token: u32 = rand::thread_rng().gen();
    format!(".tmp-{:08x}", token)
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_appends_suffix() {
        let path = temp_path_for(Path::new("/data/file.bin"), ".tmp-00ff00ff");
        assert_eq!(path, Path::new("/data/file.bin.tmp-00ff00ff"));
    }

    #[test]
    fn test_tmp_suffixes_are_unique() {
        let a = fresh_tmp_suffix();
        let b = fresh_tmp_suffix();
        assert_ne!(a, b);
        assert!(a.starts_with(".tmp-"));
    }
}
