/*!
 * Canonical-string construction and authorization material
 *
 * Four signature variants are supported. The canonical string is a pure
 * function of the prepared request; the clock is injected by the caller,
 * so identical inputs always produce identical signatures. Bit-exact
 * construction is a hard contract with the service: a single byte off
 * yields an opaque 403.
 */

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{OssError, Result};
use crate::options::SignatureVersion;

use super::credentials::Credentials;

/// RFC 3986 unreserved characters, with `/` kept literal (URI paths)
const PATH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// RFC 3986 unreserved characters only (query keys and values)
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Sub-resources that participate in the V1 canonical resource
const SIGNED_SUBRESOURCES: &[&str] = &[
    "acl",
    "append",
    "bucketInfo",
    "callback",
    "callback-var",
    "cname",
    "comp",
    "cors",
    "delete",
    "encryption",
    "endTime",
    "inventory",
    "inventoryId",
    "lifecycle",
    "live",
    "location",
    "logging",
    "objectMeta",
    "partNumber",
    "policy",
    "position",
    "qos",
    "referer",
    "replication",
    "replicationLocation",
    "replicationProgress",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "security-token",
    "startTime",
    "stat",
    "status",
    "style",
    "styleName",
    "symlink",
    "tagging",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "vod",
    "website",
    "worm",
    "wormExtend",
    "wormId",
    "x-oss-process",
    "x-oss-traffic-limit",
];

const V4_PRODUCT: &str = "oss";
const V4_REQUEST: &str = "aliyun_v4_request";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// The parts of a prepared HTTP request the signer reads.
///
/// Header names must already be lowercased; query values are the decoded
/// forms (the signer applies its own percent-encoding where a variant
/// requires it).
#[derive(Debug)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub bucket: Option<&'a str>,
    pub key: Option<&'a str>,
    pub headers: &'a BTreeMap<String, String>,
    pub query: &'a BTreeMap<String, String>,
}

/// Builds authorization material for prepared requests
#[derive(Debug, Clone)]
pub struct Signer {
    version: SignatureVersion,
    region: Option<String>,
}

impl Signer {
    pub fn new(version: SignatureVersion, region: Option<String>) -> Self {
        Self { version, region }
    }

    pub fn version(&self) -> SignatureVersion {
        self.version
    }

    /// Insert the date and token headers a signed request carries.
    ///
    /// Must run before `authorization` so the inserted headers
    /// participate in the canonical string.
    pub fn prepare_headers(
        &self,
        headers: &mut BTreeMap<String, String>,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) {
        if self.version == SignatureVersion::Anonymous {
            return;
        }

        headers.insert("date".to_string(), http_date(now));
        if self.version == SignatureVersion::V4 {
            headers.insert("x-oss-date".to_string(), iso8601(now));
            headers.insert(
                "x-oss-content-sha256".to_string(),
                UNSIGNED_PAYLOAD.to_string(),
            );
        }
        if let Some(token) = &credentials.security_token {
            headers.insert("x-oss-security-token".to_string(), token.clone());
        }
    }

    /// Compute the Authorization header value, or `None` for anonymous
    pub fn authorization(
        &self,
        req: &SignableRequest<'_>,
        credentials: &Credentials,
        additional_headers: &[String],
    ) -> Result<Option<String>> {
        match self.version {
            SignatureVersion::Anonymous => Ok(None),
            SignatureVersion::V1 => {
                let date = header_value(req.headers, "date");
                let string_to_sign = canonical_string_v1(req, &date);
                let sig = BASE64.encode(hmac_sha1(
                    credentials.access_key_secret.as_bytes(),
                    string_to_sign.as_bytes(),
                ));
                Ok(Some(format!("OSS {}:{}", credentials.access_key_id, sig)))
            }
            SignatureVersion::V2 => {
                let date = header_value(req.headers, "date");
                let additional = normalize_additional(req.headers, additional_headers);
                let string_to_sign = canonical_string_v2(req, &date, &additional);
                let sig = BASE64.encode(hmac_sha256(
                    credentials.access_key_secret.as_bytes(),
                    string_to_sign.as_bytes(),
                ));
                if additional.is_empty() {
                    Ok(Some(format!(
                        "OSS2 AccessKeyId:{},Signature:{}",
                        credentials.access_key_id, sig
                    )))
                } else {
                    Ok(Some(format!(
                        "OSS2 AccessKeyId:{},AdditionalHeaders:{},Signature:{}",
                        credentials.access_key_id,
                        additional.join(";"),
                        sig
                    )))
                }
            }
            SignatureVersion::V4 => {
                let region = self.require_region()?;
                let datetime = header_value(req.headers, "x-oss-date");
                let date = datetime.get(..8).unwrap_or_default().to_string();
                let additional = normalize_additional(req.headers, additional_headers);

                let scope = format!("{}/{}/{}/{}", date, region, V4_PRODUCT, V4_REQUEST);
                let canonical = canonical_request_v4(req, &additional);
                let string_to_sign = format!(
                    "OSS4-HMAC-SHA256\n{}\n{}\n{}",
                    datetime,
                    scope,
                    hex::encode(Sha256::digest(canonical.as_bytes()))
                );
                let sig = hex::encode(hmac_sha256(
                    &signing_key_v4(&credentials.access_key_secret, &date, region),
                    string_to_sign.as_bytes(),
                ));

                if additional.is_empty() {
                    Ok(Some(format!(
                        "OSS4-HMAC-SHA256 Credential={}/{},Signature={}",
                        credentials.access_key_id, scope, sig
                    )))
                } else {
                    Ok(Some(format!(
                        "OSS4-HMAC-SHA256 Credential={}/{},AdditionalHeaders={},Signature={}",
                        credentials.access_key_id,
                        scope,
                        additional.join(";"),
                        sig
                    )))
                }
            }
        }
    }

    /// Query parameters for a presigned URL.
    ///
    /// `req.query` must already hold every business parameter; the
    /// returned pairs are appended by the caller. Supported for V1 and
    /// V4; V2 presigning is not part of the service contract this SDK
    /// implements.
    pub fn presign(
        &self,
        req: &SignableRequest<'_>,
        credentials: &Credentials,
        now: DateTime<Utc>,
        expires_secs: u64,
    ) -> Result<Vec<(String, String)>> {
        match self.version {
            SignatureVersion::Anonymous => Ok(Vec::new()),
            SignatureVersion::V2 => Err(OssError::Client(
                "presigned URLs are not supported with signature V2".to_string(),
            )),
            SignatureVersion::V1 => {
                let expires = (now.timestamp() as u64 + expires_secs).to_string();

                let mut query = req.query.clone();
                if let Some(token) = &credentials.security_token {
                    query.insert("security-token".to_string(), token.clone());
                }
                let signed_req = SignableRequest {
                    method: req.method,
                    bucket: req.bucket,
                    key: req.key,
                    headers: req.headers,
                    query: &query,
                };
                let string_to_sign = canonical_string_v1(&signed_req, &expires);
                let sig = BASE64.encode(hmac_sha1(
                    credentials.access_key_secret.as_bytes(),
                    string_to_sign.as_bytes(),
                ));

                let mut params = Vec::new();
                if let Some(token) = &credentials.security_token {
                    params.push(("security-token".to_string(), token.clone()));
                }
                params.push((
                    "OSSAccessKeyId".to_string(),
                    credentials.access_key_id.clone(),
                ));
                params.push(("Expires".to_string(), expires));
                params.push(("Signature".to_string(), sig));
                Ok(params)
            }
            SignatureVersion::V4 => {
                let region = self.require_region()?;
                let datetime = iso8601(now);
                let date = datetime.get(..8).unwrap_or_default().to_string();
                let scope = format!("{}/{}/{}/{}", date, region, V4_PRODUCT, V4_REQUEST);

                let mut query = req.query.clone();
                query.insert(
                    "x-oss-signature-version".to_string(),
                    "OSS4-HMAC-SHA256".to_string(),
                );
                query.insert(
                    "x-oss-credential".to_string(),
                    format!("{}/{}", credentials.access_key_id, scope),
                );
                query.insert("x-oss-date".to_string(), datetime.clone());
                query.insert("x-oss-expires".to_string(), expires_secs.to_string());
                if let Some(token) = &credentials.security_token {
                    query.insert("x-oss-security-token".to_string(), token.clone());
                }

                let signed_req = SignableRequest {
                    method: req.method,
                    bucket: req.bucket,
                    key: req.key,
                    headers: req.headers,
                    query: &query,
                };
                let canonical = canonical_request_v4(&signed_req, &[]);
                let string_to_sign = format!(
                    "OSS4-HMAC-SHA256\n{}\n{}\n{}",
                    datetime,
                    scope,
                    hex::encode(Sha256::digest(canonical.as_bytes()))
                );
                let sig = hex::encode(hmac_sha256(
                    &signing_key_v4(&credentials.access_key_secret, &date, region),
                    string_to_sign.as_bytes(),
                ));

                let mut params: Vec<(String, String)> = query
                    .iter()
                    .filter(|(k, _)| k.starts_with("x-oss-") && !req.query.contains_key(k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                params.push(("x-oss-signature".to_string(), sig));
                Ok(params)
            }
        }
    }

    fn require_region(&self) -> Result<&str> {
        self.region.as_deref().ok_or_else(|| {
            OssError::Client("signature V4 requires a region to be configured".to_string())
        })
    }
}

/// V1: `VERB\nContent-MD5\nContent-Type\nDate\nCanonHeaders CanonResource`.
/// For presigned URLs the `date` slot carries the Expires value instead.
pub fn canonical_string_v1(req: &SignableRequest<'_>, date: &str) -> String {
    let mut out = String::new();
    out.push_str(req.method);
    out.push('\n');
    out.push_str(&header_value(req.headers, "content-md5"));
    out.push('\n');
    out.push_str(&header_value(req.headers, "content-type"));
    out.push('\n');
    out.push_str(date);
    out.push('\n');
    for (name, value) in req.headers {
        if name.starts_with("x-oss-") {
            out.push_str(name);
            out.push(':');
            out.push_str(value.trim());
            out.push('\n');
        }
    }
    out.push_str(&canonical_resource_v1(req.bucket, req.key, req.query));
    out
}

/// V1 canonical resource: `/bucket/key` plus the whitelisted sub-resources
pub fn canonical_resource_v1(
    bucket: Option<&str>,
    key: Option<&str>,
    query: &BTreeMap<String, String>,
) -> String {
    let mut resource = String::from("/");
    if let Some(bucket) = bucket {
        resource.push_str(bucket);
        resource.push('/');
        if let Some(key) = key {
            resource.push_str(key);
        }
    }

    let mut tail = String::new();
    for (name, value) in query {
        if !SIGNED_SUBRESOURCES.contains(&name.as_str()) {
            continue;
        }
        tail.push(if tail.is_empty() { '?' } else { '&' });
        tail.push_str(name);
        if !value.is_empty() {
            tail.push('=');
            tail.push_str(value);
        }
    }
    resource.push_str(&tail);
    resource
}

/// V2: HMAC-SHA256 string to sign; every query parameter participates
pub fn canonical_string_v2(req: &SignableRequest<'_>, date: &str, additional: &[String]) -> String {
    let mut out = String::new();
    out.push_str(req.method);
    out.push('\n');
    out.push_str(&header_value(req.headers, "content-md5"));
    out.push('\n');
    out.push_str(&header_value(req.headers, "content-type"));
    out.push('\n');
    out.push_str(date);
    out.push('\n');
    for (name, value) in req.headers {
        if name.starts_with("x-oss-") || additional.contains(name) {
            out.push_str(name);
            out.push(':');
            out.push_str(value.trim());
            out.push('\n');
        }
    }
    out.push_str(&additional.join(";"));
    out.push('\n');
    out.push_str(&canonical_resource_v2(req.bucket, req.key, req.query));
    out
}

/// V2 canonical resource: encoded `/bucket/key` with every query parameter
fn canonical_resource_v2(
    bucket: Option<&str>,
    key: Option<&str>,
    query: &BTreeMap<String, String>,
) -> String {
    let mut resource = String::from("/");
    if let Some(bucket) = bucket {
        resource.push_str(bucket);
        resource.push('/');
        if let Some(key) = key {
            resource.push_str(&utf8_percent_encode(key, PATH_ENCODE).to_string());
        }
    }

    let mut tail = String::new();
    for (name, value) in query {
        tail.push(if tail.is_empty() { '?' } else { '&' });
        tail.push_str(&utf8_percent_encode(name, QUERY_ENCODE).to_string());
        if !value.is_empty() {
            tail.push('=');
            tail.push_str(&utf8_percent_encode(value, QUERY_ENCODE).to_string());
        }
    }
    resource.push_str(&tail);
    resource
}

/// V4 canonical request with an `UNSIGNED-PAYLOAD` hash slot
pub fn canonical_request_v4(req: &SignableRequest<'_>, additional: &[String]) -> String {
    let mut uri = String::from("/");
    if let Some(bucket) = req.bucket {
        uri.push_str(bucket);
        uri.push('/');
        if let Some(key) = req.key {
            uri.push_str(&utf8_percent_encode(key, PATH_ENCODE).to_string());
        }
    }

    let mut query = String::new();
    for (name, value) in req.query {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&utf8_percent_encode(name, QUERY_ENCODE).to_string());
        if !value.is_empty() {
            query.push('=');
            query.push_str(&utf8_percent_encode(value, QUERY_ENCODE).to_string());
        }
    }

    let mut headers = String::new();
    for (name, value) in req.headers {
        if is_default_signed_v4(name) || additional.contains(name) {
            headers.push_str(name);
            headers.push(':');
            headers.push_str(value.trim());
            headers.push('\n');
        }
    }

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        uri,
        query,
        headers,
        additional.join(";"),
        UNSIGNED_PAYLOAD
    )
}

fn is_default_signed_v4(name: &str) -> bool {
    name.starts_with("x-oss-") || name == "content-type" || name == "content-md5"
}

/// V4 signing key: HMAC chain over date, region, product and terminator
fn signing_key_v4(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = hmac_sha256(format!("aliyun_v4{}", secret).as_bytes(), date.as_bytes());
    let key = hmac_sha256(&key, region.as_bytes());
    let key = hmac_sha256(&key, V4_PRODUCT.as_bytes());
    hmac_sha256(&key, V4_REQUEST.as_bytes())
}

/// Additional headers, lowercased, deduplicated against the default-signed
/// set, restricted to headers actually present, sorted
fn normalize_additional(headers: &BTreeMap<String, String>, requested: &[String]) -> Vec<String> {
    let mut list: Vec<String> = requested
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .filter(|h| !h.starts_with("x-oss-") && h != "content-type" && h != "content-md5")
        .filter(|h| headers.contains_key(h))
        .collect();
    list.sort();
    list.dedup();
    list
}

fn header_value(headers: &BTreeMap<String, String>, name: &str) -> String {
    headers.get(name).cloned().unwrap_or_default()
}

fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn iso8601(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        <Hmac<Sha1> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_canonical_resource_v1_whitelist() {
        let mut query = BTreeMap::new();
        query.insert("uploadId".to_string(), "abc".to_string());
        query.insert("partNumber".to_string(), "3".to_string());
        query.insert("not-signed".to_string(), "x".to_string());

        let resource = canonical_resource_v1(Some("bucket"), Some("key"), &query);
        assert_eq!(resource, "/bucket/key?partNumber=3&uploadId=abc");
    }

    #[test]
    fn test_canonical_resource_v1_valueless_subresource() {
        let mut query = BTreeMap::new();
        query.insert("uploads".to_string(), String::new());
        let resource = canonical_resource_v1(Some("bucket"), Some("key"), &query);
        assert_eq!(resource, "/bucket/key?uploads");
    }

    #[test]
    fn test_canonical_string_v1_shape() {
        let mut headers = BTreeMap::new();
        headers.insert("content-md5".to_string(), "md5value".to_string());
        headers.insert("content-type".to_string(), "text/plain".to_string());
        headers.insert("x-oss-meta-a".to_string(), "va".to_string());
        headers.insert("x-oss-meta-b".to_string(), "vb".to_string());
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "PUT",
            bucket: Some("bucket"),
            key: Some("key"),
            headers: &headers,
            query: &query,
        };
        let s = canonical_string_v1(&req, "Mon, 01 Jan 2024 00:00:00 GMT");
        assert_eq!(
            s,
            "PUT\nmd5value\ntext/plain\nMon, 01 Jan 2024 00:00:00 GMT\n\
             x-oss-meta-a:va\nx-oss-meta-b:vb\n/bucket/key"
        );
    }

    #[test]
    fn test_v1_signature_golden() {
        let mut headers = BTreeMap::new();
        headers.insert(
            "date".to_string(),
            "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
        );
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("bucket"),
            key: Some("key"),
            headers: &headers,
            query: &query,
        };
        let signer = Signer::new(SignatureVersion::V1, None);
        let auth = signer
            .authorization(&req, &Credentials::new("ak", "sk"), &[])
            .unwrap()
            .unwrap();
        assert_eq!(auth, "OSS ak:2vkYxBkdGOT/qHErRUvkvYTZDyY=");
    }

    #[test]
    fn test_v4_authorization_golden() {
        let cred = Credentials::new("ak", "sk");
        let signer = Signer::new(SignatureVersion::V4, Some("cn-hangzhou".to_string()));

        let mut headers = BTreeMap::new();
        signer.prepare_headers(&mut headers, &cred, fixed_time());
        assert_eq!(headers.get("x-oss-date").unwrap(), "20240101T000000Z");

        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("bucket"),
            key: Some("key"),
            headers: &headers,
            query: &query,
        };
        let auth = signer.authorization(&req, &cred, &[]).unwrap().unwrap();
        assert_eq!(
            auth,
            "OSS4-HMAC-SHA256 Credential=ak/20240101/cn-hangzhou/oss/aliyun_v4_request,\
             Signature=ab9b052075cf8809b51a2dae73fa6dd755906a4e1acdf513f6352c3549fe1737"
        );
    }

    #[test]
    fn test_v4_requires_region() {
        let signer = Signer::new(SignatureVersion::V4, None);
        let headers = BTreeMap::new();
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("b"),
            key: Some("k"),
            headers: &headers,
            query: &query,
        };
        let err = signer
            .authorization(&req, &Credentials::new("ak", "sk"), &[])
            .unwrap_err();
        assert!(matches!(err, OssError::Client(_)));
    }

    #[test]
    fn test_signature_is_pure() {
        let cred = Credentials::new("ak", "sk");
        let signer = Signer::new(SignatureVersion::V4, Some("cn-hangzhou".to_string()));
        let mut headers = BTreeMap::new();
        signer.prepare_headers(&mut headers, &cred, fixed_time());
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("bucket"),
            key: Some("key"),
            headers: &headers,
            query: &query,
        };
        let a = signer.authorization(&req, &cred, &[]).unwrap();
        let b = signer.authorization(&req, &cred, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_anonymous_emits_nothing() {
        let signer = Signer::new(SignatureVersion::Anonymous, None);
        let headers = BTreeMap::new();
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("b"),
            key: Some("k"),
            headers: &headers,
            query: &query,
        };
        let auth = signer
            .authorization(&req, &Credentials::new("", ""), &[])
            .unwrap();
        assert!(auth.is_none());
    }

    #[test]
    fn test_v2_additional_headers_in_authorization() {
        let cred = Credentials::new("ak", "sk");
        let signer = Signer::new(SignatureVersion::V2, None);
        let mut headers = BTreeMap::new();
        headers.insert(
            "date".to_string(),
            "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
        );
        headers.insert("range".to_string(), "bytes=0-99".to_string());
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("bucket"),
            key: Some("key"),
            headers: &headers,
            query: &query,
        };
        let auth = signer
            .authorization(&req, &cred, &["Range".to_string()])
            .unwrap()
            .unwrap();
        assert!(auth.starts_with("OSS2 AccessKeyId:ak,AdditionalHeaders:range,Signature:"));
    }

    #[test]
    fn test_v1_presign_places_expires_in_date_slot() {
        let cred = Credentials::new("ak", "sk").with_token("tok");
        let signer = Signer::new(SignatureVersion::V1, None);
        let headers = BTreeMap::new();
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("bucket"),
            key: Some("key"),
            headers: &headers,
            query: &query,
        };
        let params = signer.presign(&req, &cred, fixed_time(), 3600).unwrap();
        let expires = params.iter().find(|(k, _)| k == "Expires").unwrap();
        assert_eq!(expires.1, (fixed_time().timestamp() as u64 + 3600).to_string());
        assert!(params.iter().any(|(k, _)| k == "OSSAccessKeyId"));
        assert!(params.iter().any(|(k, _)| k == "Signature"));
        assert!(params.iter().any(|(k, _)| k == "security-token"));
    }

    #[test]
    fn test_v2_presign_rejected() {
        let signer = Signer::new(SignatureVersion::V2, None);
        let headers = BTreeMap::new();
        let query = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("b"),
            key: Some("k"),
            headers: &headers,
            query: &query,
        };
        assert!(signer
            .presign(&req, &Credentials::new("ak", "sk"), fixed_time(), 60)
            .is_err());
    }

    #[test]
    fn test_v4_query_encoding_includes_slash() {
        let mut query = BTreeMap::new();
        query.insert("response-content-disposition".to_string(), "a/b".to_string());
        let headers = BTreeMap::new();
        let req = SignableRequest {
            method: "GET",
            bucket: Some("bucket"),
            key: Some("dir/key"),
            headers: &headers,
            query: &query,
        };
        let canonical = canonical_request_v4(&req, &[]);
        let mut lines = canonical.lines();
        assert_eq!(lines.next().unwrap(), "GET");
        // Path keeps the slash literal; query encodes it
        assert_eq!(lines.next().unwrap(), "/bucket/dir/key");
        assert_eq!(
            lines.next().unwrap(),
            "response-content-disposition=a%2Fb"
        );
    }
}
