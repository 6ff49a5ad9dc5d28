/*!
 * Typed results for the object and multipart operations
 */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One contiguous byte range of an object, transferred as a single call.
///
/// Part numbers form a dense 1..N sequence. `etag` and `crc64` are empty
/// until the server confirms the part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: u32,
    pub start: u64,
    /// Exclusive end offset
    pub end: u64,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub crc64: Option<u64>,
}

impl Part {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

/// Remote object identity and metadata from a HEAD or GET response
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Content length of the response body
    pub size: u64,
    /// ETag with surrounding quotes stripped
    pub etag: String,
    /// Last-Modified exactly as served (fed back into If-Unmodified-Since)
    pub last_modified: String,
    /// Server-side CRC64 of the stored object
    pub crc64: Option<u64>,
    pub request_id: String,
    /// All response headers, lowercased
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PutObjectResult {
    pub etag: String,
    pub crc64: Option<u64>,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct AppendObjectResult {
    /// Where the next append must start
    pub next_position: u64,
    pub crc64: Option<u64>,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct InitiateMultipartResult {
    pub upload_id: String,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadPartResult {
    pub etag: String,
    pub crc64: Option<u64>,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartResult {
    pub etag: String,
    pub location: String,
    pub crc64: Option<u64>,
    pub request_id: String,
}
