/*!
 * oss-client - SDK for OSS-compatible object storage
 *
 * A client library with:
 * - V1/V2/V4 request signing and presigned URLs
 * - Resumable multipart uploads and ranged downloads with on-disk
 *   checkpoints and CRC64 verification
 * - Client-side envelope encryption (AES-CTR content keys wrapped by
 *   RSA or KMS master keys)
 * - Bounded parallel part transfers over a shared connection pool
 */

pub mod auth;
pub mod client;
pub mod crc64;
pub mod crypto;
pub mod error;
pub mod http;
pub mod logging;
pub mod options;
pub mod transfer;
pub mod types;
pub mod xml;

// Re-export commonly used types
pub use auth::{Credentials, CredentialsProvider, StaticCredentialsProvider};
pub use client::{GetOptions, OssClient};
pub use crypto::{KmsKeyProvider, MasterKeyProvider, RsaKeyProvider, RsaWrapMode};
pub use error::{OssError, Result};
pub use options::{ClientOptions, SignatureVersion, TransferOptions};
pub use transfer::{download_file, download_file_encrypted, upload_file, upload_file_encrypted};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
