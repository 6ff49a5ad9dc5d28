/*!
 * XML codecs for the control payloads the transfer engine touches
 */

use serde::{Deserialize, Serialize};

use crate::error::{OssError, Result};
use crate::types::Part;

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUploadBody {
    #[serde(rename = "Part")]
    parts: Vec<CompletePart>,
}

#[derive(Debug, Serialize)]
struct CompletePart {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

/// Body for complete-multipart. Parts must already be sorted by number.
pub fn complete_multipart_body(parts: &[Part]) -> Result<String> {
    let body = CompleteMultipartUploadBody {
        parts: parts
            .iter()
            .map(|p| CompletePart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect(),
    };
    quick_xml::se::to_string(&body)
        .map_err(|e| OssError::Client(format!("cannot encode complete-multipart body: {}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompleteMultipartUploadResult {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    pub e_tag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListPartsResult {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub next_part_number_marker: Option<u32>,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default, rename = "Part")]
    pub parts: Vec<ListedPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListedPart {
    pub part_number: u32,
    pub e_tag: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash_crc64ecma: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

pub fn parse_initiate(xml: &str) -> Result<InitiateMultipartUploadResult> {
    quick_xml::de::from_str(xml)
        .map_err(|e| OssError::Request(format!("invalid initiate-multipart response: {}", e)))
}

pub fn parse_complete(xml: &str) -> Result<CompleteMultipartUploadResult> {
    quick_xml::de::from_str(xml)
        .map_err(|e| OssError::Request(format!("invalid complete-multipart response: {}", e)))
}

pub fn parse_list_parts(xml: &str) -> Result<ListPartsResult> {
    quick_xml::de::from_str(xml)
        .map_err(|e| OssError::Request(format!("invalid list-parts response: {}", e)))
}

/// Parse a service `<Error>` body; tolerant of bodies that are not XML
pub fn parse_error_body(xml: &str) -> Option<ErrorBody> {
    quick_xml::de::from_str(xml).ok()
}
