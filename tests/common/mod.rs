/*!
 * In-process OSS test double
 *
 * A minimal HTTP server speaking just enough of the object and
 * multipart protocol for the transfer engine: put/get/head with ranges
 * and conditional headers, the multipart session calls, CRC64 echo
 * headers, and deterministic failure injection for resume tests.
 */

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use oss_client::crc64;

const LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    last_modified: String,
    meta: Vec<(String, String)>,
}

struct UploadSession {
    key: String,
    parts: BTreeMap<u32, (Vec<u8>, String)>,
    meta: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, UploadSession>,
    next_upload: u32,
    counters: HashMap<String, u32>,
    /// Fail the next PUT of this part number once with a 500
    fail_part_once: Option<u32>,
    /// Fail ranged GETs with a 500 once this many have succeeded
    fail_ranges_after: Option<u32>,
    range_successes: u32,
    last_range: Option<String>,
}

impl State {
    fn bump(&mut self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }
}

pub struct MockOssServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl MockOssServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&accept_state);
                thread::spawn(move || handle_connection(stream, state));
            }
        });

        Self { addr, state }
    }

    /// Endpoint string for ClientOptions (path-style addressing)
    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn counter(&self, name: &str) -> u32 {
        *self
            .state
            .lock()
            .unwrap()
            .counters
            .get(name)
            .unwrap_or(&0)
    }

    pub fn reset_counters(&self) {
        self.state.lock().unwrap().counters.clear();
    }

    /// Seed an object directly, bypassing the protocol
    pub fn put_object_direct(&self, key: &str, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let object = stored(data, Vec::new());
        state.objects.insert(key.to_string(), object);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|o| o.data.clone())
    }

    /// Forget every multipart session, as an external abort would
    pub fn drop_all_uploads(&self) {
        self.state.lock().unwrap().uploads.clear();
    }

    pub fn fail_part_once(&self, part_number: u32) {
        self.state.lock().unwrap().fail_part_once = Some(part_number);
    }

    pub fn fail_ranges_after(&self, successes: u32) {
        let mut state = self.state.lock().unwrap();
        state.fail_ranges_after = Some(successes);
        state.range_successes = 0;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_part_once = None;
        state.fail_ranges_after = None;
        state.range_successes = 0;
    }

    pub fn last_range(&self) -> Option<String> {
        self.state.lock().unwrap().last_range.clone()
    }
}

fn stored(data: Vec<u8>, meta: Vec<(String, String)>) -> StoredObject {
    let etag = format!("{:016X}", crc64::checksum(&data));
    StoredObject {
        data,
        etag,
        last_modified: LAST_MODIFIED.to_string(),
        meta,
    }
}

struct Request {
    method: String,
    key: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    fn ok() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn error(status: u16, code: &str, message: &str) -> Self {
        let body = format!(
            "<Error><Code>{}</Code><Message>{}</Message>\
             <RequestId>mock-request</RequestId></Error>",
            code, message
        );
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/xml".to_string())],
            body: body.into_bytes(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

fn handle_connection(stream: TcpStream, state: Arc<Mutex<State>>) {
    let Some(request) = read_request(&stream) else {
        return;
    };
    let head_only = request.method == "HEAD";
    let response = route(request, &state);
    write_response(stream, response, head_only);
}

fn read_request(stream: &TcpStream) -> Option<Request> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut pieces = request_line.split_whitespace();
    let method = pieces.next()?.to_string();
    let target = pieces.next()?;

    let (path, raw_query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    let mut query = HashMap::new();
    for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((k, v)) => query.insert(url_decode(k), url_decode(v)),
            None => query.insert(url_decode(pair), String::new()),
        };
    }

    // Path style: /bucket/key...
    let key = path
        .trim_start_matches('/')
        .split_once('/')
        .map(|(_, key)| key.to_string())
        .unwrap_or_default();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    if length > 0 {
        reader.read_exact(&mut body).ok()?;
    }

    Some(Request {
        method,
        key,
        query,
        headers,
        body,
    })
}

fn url_decode(value: &str) -> String {
    let mut out = Vec::new();
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn route(request: Request, state: &Arc<Mutex<State>>) -> Response {
    let mut state = state.lock().unwrap();
    match request.method.as_str() {
        "POST" if request.query.contains_key("uploads") => initiate(&mut state, request),
        "POST" if request.query.contains_key("uploadId") => complete(&mut state, request),
        "POST" if request.query.contains_key("append") => append(&mut state, request),
        "PUT" if request.query.contains_key("partNumber") => upload_part(&mut state, request),
        "PUT" => put_object(&mut state, request),
        "GET" if request.query.contains_key("uploadId") => list_parts(&mut state, request),
        "GET" => get_object(&mut state, request),
        "HEAD" => head_object(&mut state, request),
        "DELETE" if request.query.contains_key("uploadId") => abort(&mut state, request),
        "DELETE" => {
            state.bump("delete_object");
            state.objects.remove(&request.key);
            Response {
                status: 204,
                headers: Vec::new(),
                body: Vec::new(),
            }
        }
        _ => Response::error(405, "MethodNotAllowed", "unsupported"),
    }
}

fn initiate(state: &mut State, request: Request) -> Response {
    state.bump("initiate");
    state.next_upload += 1;
    let upload_id = format!("upload-{}", state.next_upload);
    let meta = request
        .headers
        .iter()
        .filter(|(name, _)| name.starts_with("x-oss-meta-"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    state.uploads.insert(
        upload_id.clone(),
        UploadSession {
            key: request.key.clone(),
            parts: BTreeMap::new(),
            meta,
        },
    );
    let body = format!(
        "<InitiateMultipartUploadResult><Bucket>bucket</Bucket>\
         <Key>{}</Key><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
        request.key, upload_id
    );
    Response::ok().body(body.into_bytes())
}

fn upload_part(state: &mut State, request: Request) -> Response {
    state.bump("upload_part");
    let part_number: u32 = request
        .query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if state.fail_part_once == Some(part_number) {
        state.fail_part_once = None;
        return Response::error(500, "InternalError", "injected part failure");
    }
    let upload_id = request.query.get("uploadId").cloned().unwrap_or_default();
    let Some(session) = state.uploads.get_mut(&upload_id) else {
        return Response::error(404, "NoSuchUpload", "unknown upload id");
    };

    let crc = crc64::checksum(&request.body);
    let etag = format!("{:016X}-{}", crc, part_number);
    session
        .parts
        .insert(part_number, (request.body, etag.clone()));
    state.bump("upload_part_success");
    Response::ok()
        .header("etag", format!("\"{}\"", etag))
        .header("x-oss-hash-crc64ecma", crc.to_string())
}

fn complete(state: &mut State, request: Request) -> Response {
    state.bump("complete");
    let upload_id = request.query.get("uploadId").cloned().unwrap_or_default();
    let Some(session) = state.uploads.remove(&upload_id) else {
        return Response::error(404, "NoSuchUpload", "unknown upload id");
    };

    let mut data = Vec::new();
    for (_, (part, _)) in &session.parts {
        data.extend_from_slice(part);
    }
    let object = stored(data, session.meta);
    let crc = crc64::checksum(&object.data);
    let etag = object.etag.clone();
    state.objects.insert(session.key.clone(), object);

    let body = format!(
        "<CompleteMultipartUploadResult><Location>mock</Location>\
         <Bucket>bucket</Bucket><Key>{}</Key><ETag>\"{}\"</ETag>\
         </CompleteMultipartUploadResult>",
        session.key, etag
    );
    Response::ok()
        .header("x-oss-hash-crc64ecma", crc.to_string())
        .body(body.into_bytes())
}

fn abort(state: &mut State, request: Request) -> Response {
    state.bump("abort");
    let upload_id = request.query.get("uploadId").cloned().unwrap_or_default();
    state.uploads.remove(&upload_id);
    Response {
        status: 204,
        headers: Vec::new(),
        body: Vec::new(),
    }
}

fn list_parts(state: &mut State, request: Request) -> Response {
    state.bump("list_parts");
    let upload_id = request.query.get("uploadId").cloned().unwrap_or_default();
    let Some(session) = state.uploads.get(&upload_id) else {
        return Response::error(404, "NoSuchUpload", "unknown upload id");
    };

    let mut parts = String::new();
    for (number, (data, etag)) in &session.parts {
        parts.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag>\
             <Size>{}</Size></Part>",
            number,
            etag,
            data.len()
        ));
    }
    let body = format!(
        "<ListPartsResult><Bucket>bucket</Bucket><Key>{}</Key>\
         <UploadId>{}</UploadId><IsTruncated>false</IsTruncated>{}\
         </ListPartsResult>",
        session.key, upload_id, parts
    );
    Response::ok().body(body.into_bytes())
}

fn put_object(state: &mut State, request: Request) -> Response {
    state.bump("put_object");
    let meta = request
        .headers
        .iter()
        .filter(|(name, _)| name.starts_with("x-oss-meta-"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let crc = crc64::checksum(&request.body);
    let object = stored(request.body, meta);
    let etag = object.etag.clone();
    state.objects.insert(request.key.clone(), object);
    Response::ok()
        .header("etag", format!("\"{}\"", etag))
        .header("x-oss-hash-crc64ecma", crc.to_string())
}

fn append(state: &mut State, request: Request) -> Response {
    state.bump("append");
    let position: u64 = request
        .query
        .get("position")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let existing = state
        .objects
        .get(&request.key)
        .map(|o| o.data.clone())
        .unwrap_or_default();
    if existing.len() as u64 != position {
        return Response::error(409, "PositionNotEqualToLength", "bad position");
    }
    let mut data = existing;
    data.extend_from_slice(&request.body);
    let next = data.len() as u64;
    let crc = crc64::checksum(&data);
    state.objects.insert(request.key.clone(), stored(data, Vec::new()));
    Response::ok()
        .header("x-oss-next-append-position", next.to_string())
        .header("x-oss-hash-crc64ecma", crc.to_string())
}

fn head_object(state: &mut State, request: Request) -> Response {
    state.bump("head");
    let Some(object) = state.objects.get(&request.key) else {
        return Response::error(404, "NoSuchKey", "missing object");
    };
    let mut response = Response::ok()
        .header("content-length", object.data.len().to_string())
        .header("etag", format!("\"{}\"", object.etag))
        .header("last-modified", object.last_modified.clone())
        .header(
            "x-oss-hash-crc64ecma",
            crc64::checksum(&object.data).to_string(),
        );
    for (name, value) in &object.meta {
        response = response.header(name, value.clone());
    }
    response
}

fn get_object(state: &mut State, request: Request) -> Response {
    state.bump("get_object");
    let Some(object) = state.objects.get(&request.key).cloned() else {
        return Response::error(404, "NoSuchKey", "missing object");
    };

    if let Some(expected) = request.headers.get("if-match") {
        if expected.trim_matches('"') != object.etag {
            return Response::error(412, "PreconditionFailed", "etag mismatch");
        }
    }
    if let Some(since) = request.headers.get("if-unmodified-since") {
        if *since != object.last_modified {
            return Response::error(412, "PreconditionFailed", "object modified");
        }
    }

    let range = request.headers.get("range").cloned();
    if let Some(range) = &range {
        state.bump("get_range");
        state.last_range = Some(range.clone());
        if let Some(limit) = state.fail_ranges_after {
            if state.range_successes >= limit {
                return Response::error(500, "InternalError", "injected range failure");
            }
            state.range_successes += 1;
        }

        let Some((start, end)) = parse_range(range, object.data.len() as u64) else {
            return Response::error(416, "InvalidRange", "unparseable range");
        };
        let slice = object.data[start as usize..=end as usize].to_vec();
        let mut response = Response {
            status: 206,
            headers: Vec::new(),
            body: Vec::new(),
        };
        response = response
            .header("content-length", slice.len().to_string())
            .header(
                "content-range",
                format!("bytes {}-{}/{}", start, end, object.data.len()),
            )
            .header("etag", format!("\"{}\"", object.etag))
            .header("last-modified", object.last_modified.clone())
            .header(
                "x-oss-hash-crc64ecma",
                crc64::checksum(&object.data).to_string(),
            );
        for (name, value) in &object.meta {
            response = response.header(name, value.clone());
        }
        return response.body(slice);
    }

    let mut response = Response::ok()
        .header("content-length", object.data.len().to_string())
        .header("etag", format!("\"{}\"", object.etag))
        .header("last-modified", object.last_modified.clone())
        .header(
            "x-oss-hash-crc64ecma",
            crc64::checksum(&object.data).to_string(),
        );
    for (name, value) in &object.meta {
        response = response.header(name, value.clone());
    }
    response.body(object.data)
}

fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    let (start, end) = ranges.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = match end {
        "" => total - 1,
        end => end.parse().ok()?,
    };
    if start > end || end >= total {
        return None;
    }
    Some((start, end))
}

fn write_response(mut stream: TcpStream, response: Response, head_only: bool) {
    let reason = match response.status {
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        412 => "Precondition Failed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    let mut has_length = false;
    for (name, value) in &response.headers {
        if name == "content-length" {
            has_length = true;
        }
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !has_length {
        head.push_str(&format!("content-length: {}\r\n", response.body.len()));
    }
    head.push_str("x-oss-request-id: mock-request\r\n");
    head.push_str("connection: close\r\n\r\n");

    let _ = stream.write_all(head.as_bytes());
    if !head_only {
        let _ = stream.write_all(&response.body);
    }
    let _ = stream.flush();
    let _ = stream.shutdown(Shutdown::Both);
}
