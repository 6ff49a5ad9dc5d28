/*!
 * Configuration types for the OSS client
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Signature version used for authenticating requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureVersion {
    /// HMAC-SHA1 over the legacy canonical string
    #[default]
    V1,
    /// HMAC-SHA256, every query parameter signed
    V2,
    /// OSS4-HMAC-SHA256 with date/region scope
    V4,
    /// No authentication material emitted
    Anonymous,
}

/// Configuration for a client bound to one bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Service endpoint, e.g. "oss-cn-hangzhou.aliyuncs.com" or "203.0.113.9:8080"
    pub endpoint: String,

    /// Bucket name
    pub bucket: String,

    /// Signature version for all requests
    #[serde(default)]
    pub signature_version: SignatureVersion,

    /// Region, required for V4 signing (e.g. "cn-hangzhou")
    #[serde(default)]
    pub region: Option<String>,

    /// Treat the endpoint as a user CNAME (bare host, no bucket prefix)
    #[serde(default)]
    pub cname: bool,

    /// Use HTTPS for all requests
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Overall per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Bounded retries for transport errors and idempotent 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Connection pool size, normally sized to the worker count
    #[serde(default = "default_pool_size")]
    pub pool_max_idle_per_host: usize,
}

impl ClientOptions {
    /// Create options for a bucket with all defaults
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            signature_version: SignatureVersion::default(),
            region: None,
            cname: false,
            secure: true,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            pool_max_idle_per_host: default_pool_size(),
        }
    }
}

/// Configuration for resumable uploads and downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Preferred part size in bytes; clamped up so an object fits in 10,000 parts
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Files below this size go through a single PUT/GET without checkpointing
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Number of parallel part workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Persist checkpoint records so interrupted transfers can resume
    #[serde(default = "default_true")]
    pub enable_checkpoint: bool,

    /// Directory for checkpoint records (default: per-user directory)
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Verify part and whole-object CRC64 against server-reported values
    #[serde(default = "default_true")]
    pub enable_crc: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            multipart_threshold: default_multipart_threshold(),
            workers: default_workers(),
            enable_checkpoint: true,
            checkpoint_dir: None,
            enable_crc: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_pool_size() -> usize {
    10
}

fn default_part_size() -> u64 {
    8 * 1024 * 1024
}

fn default_multipart_threshold() -> u64 {
    10 * 1024 * 1024
}

fn default_workers() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_options_defaults() {
        let opts = ClientOptions::new("oss-cn-hangzhou.aliyuncs.com", "my-bucket");
        assert_eq!(opts.signature_version, SignatureVersion::V1);
        assert!(opts.secure);
        assert_eq!(opts.max_retries, 3);
    }

    #[test]
    fn test_transfer_options_deserialize_partial() {
        let opts: TransferOptions = serde_json::from_str(r#"{"part_size": 1048576}"#).unwrap();
        assert_eq!(opts.part_size, 1048576);
        assert!(opts.enable_checkpoint);
        assert!(opts.enable_crc);
        assert_eq!(opts.workers, 3);
    }

    #[test]
    fn test_signature_version_roundtrip() {
        let v: SignatureVersion = serde_json::from_str(r#""v4""#).unwrap();
        assert_eq!(v, SignatureVersion::V4);
        assert_eq!(serde_json::to_string(&SignatureVersion::V1).unwrap(), r#""v1""#);
    }
}
