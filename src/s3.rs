//! S3 object exchange through the workspace storage broker.
//!
//! The broker mediates all object access; the SDK never talks to S3 directly.
//! Reads are windowed ranged GETs exposed as a standard [`Read`]/[`BufRead`]
//! stream, writes are a single chunked POST fed from either an in-memory
//! buffer or a sequential reader, so neither direction requires the full
//! object in memory.

use std::io::{self, BufRead, Read};
use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, RANGE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{check_status, Client};
use crate::error::Result;

/// Default ranged-read window. Must stay constant for a stream's lifetime;
/// memory use is bounded by one window regardless of object size.
pub const DEFAULT_WINDOW_BYTES: usize = 64 * 1024;

/// Smallest permitted window (one system page).
const MIN_WINDOW_BYTES: usize = 4096;

/// Reference to a blob in the workspace bucket (or a named secondary
/// storage). Owns only the addressing, never the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct S3Object {
    #[serde(rename = "s3")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

impl S3Object {
    pub fn new(key: impl Into<String>) -> Self {
        S3Object {
            key: key.into(),
            storage: None,
        }
    }

    pub fn with_storage(key: impl Into<String>, storage: impl Into<String>) -> Self {
        S3Object {
            key: key.into(),
            storage: Some(storage.into()),
        }
    }
}

/// Parse `s3://storage/key` addressing into an [`S3Object`].
///
/// An empty storage segment means the default bucket. Unparseable strings
/// yield a reference with an empty key rather than an error, matching the
/// tolerant parsing contract of the read/write paths.
pub fn parse_s3_object(s: &str) -> S3Object {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^s3://([^/]*)/(.*)$").expect("static regex"));
    match re.captures(s) {
        Some(caps) => {
            let storage = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let key = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            S3Object {
                key: key.to_string(),
                storage: (!storage.is_empty()).then(|| storage.to_string()),
            }
        }
        None => S3Object::default(),
    }
}

/// Content to upload: either an in-memory buffer or a lazy sequential source
/// streamed as the request body without materialization. The reader variant
/// is finite and not restartable.
pub enum FileContent {
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send + 'static>),
}

impl FileContent {
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        FileContent::Reader(Box::new(reader))
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        FileContent::Bytes(bytes)
    }
}

impl From<&[u8]> for FileContent {
    fn from(bytes: &[u8]) -> Self {
        FileContent::Bytes(bytes.to_vec())
    }
}

/// Options for [`write_s3_file`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// S3 resource to write through instead of the workspace default.
    pub s3_resource_path: Option<String>,
    /// MIME type recorded on the object (guessed from the key extension when
    /// absent).
    pub content_type: Option<String>,
    /// `Content-Disposition` recorded on the object.
    pub content_disposition: Option<String>,
}

/// Lazily-filled byte stream over a brokered S3 object.
///
/// Each window crossing triggers exactly one ranged GET; already-consumed
/// ranges are never re-fetched. End of stream is reached when a window comes
/// back short or the broker answers 416. Dropping the reader releases the
/// connection; no explicit close is needed.
pub struct S3FileReader {
    http: reqwest::blocking::Client,
    url: String,
    token: String,
    query: Vec<(&'static str, String)>,
    window_size: usize,
    offset: u64,
    window: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl S3FileReader {
    /// Override the window size before the first read. Values below one page
    /// are clamped. The size then stays fixed for the stream's lifetime.
    pub fn with_window_size(mut self, size: usize) -> Self {
        debug_assert!(self.offset == 0 && self.window.is_empty());
        self.window_size = size.max(MIN_WINDOW_BYTES);
        self
    }

    /// Fetch the next window at the current offset. Sets `eof` when the
    /// broker returns fewer bytes than requested or 416.
    fn fill_window(&mut self) -> io::Result<()> {
        let end = self.offset + self.window_size as u64 - 1;
        let resp = self
            .http
            .get(&self.url)
            .bearer_auth(&self.token)
            .query(&self.query)
            .header(RANGE, format!("bytes={}-{}", self.offset, end))
            .send()
            .map_err(io::Error::other)?;

        if resp.status().as_u16() == 416 {
            // Offset is past the end of the object.
            self.eof = true;
            self.window.clear();
            self.pos = 0;
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(io::Error::other(format!(
                "ranged read failed url={} status={}",
                self.url,
                resp.status().as_u16()
            )));
        }

        let bytes = resp.bytes().map_err(io::Error::other)?;
        debug!(
            "S3 window fetched offset={} requested={} received={}",
            self.offset,
            self.window_size,
            bytes.len()
        );
        if bytes.len() < self.window_size {
            self.eof = true;
        }
        self.offset += bytes.len() as u64;
        self.window = bytes.to_vec();
        self.pos = 0;
        Ok(())
    }
}

impl BufRead for S3FileReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.window.len() && !self.eof {
            self.fill_window()?;
        }
        let start = self.pos.min(self.window.len());
        Ok(&self.window[start..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.window.len());
    }
}

impl Read for S3FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

/// Open a streaming reader over an object in the workspace bucket.
pub fn load_s3_file_reader(
    client: &Client,
    object: &S3Object,
    s3_resource_path: Option<&str>,
) -> S3FileReader {
    let endpoint = format!("/w/{}/job_helpers/download_s3_file", client.workspace());
    let mut query: Vec<(&'static str, String)> = vec![("file_key", object.key.clone())];
    if let Some(storage) = &object.storage {
        query.push(("storage", storage.clone()));
    }
    if let Some(path) = s3_resource_path {
        query.push(("s3_resource_path", path.to_string()));
    }
    S3FileReader {
        http: client.http().clone(),
        url: client.url(&endpoint),
        token: client.token().to_string(),
        query,
        window_size: DEFAULT_WINDOW_BYTES,
        offset: 0,
        window: Vec::new(),
        pos: 0,
        eof: false,
    }
}

/// Load an entire object into memory.
pub fn load_s3_file(
    client: &Client,
    object: &S3Object,
    s3_resource_path: Option<&str>,
) -> Result<Vec<u8>> {
    let mut reader = load_s3_file_reader(client, object, s3_resource_path);
    let mut contents = Vec::new();
    reader.read_to_end(&mut contents)?;
    Ok(contents)
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file_key: String,
}

/// Stream `content` to the workspace bucket as one chunked POST.
///
/// `object` supplies the destination key and storage; with no key the server
/// assigns one. An empty source still performs exactly one request and yields
/// a valid (empty) object. Returns the reference with the key the server
/// actually used.
pub fn write_s3_file(
    client: &Client,
    object: Option<&S3Object>,
    content: FileContent,
    opts: &UploadOptions,
) -> Result<S3Object> {
    let endpoint = format!("/w/{}/job_helpers/upload_s3_file", client.workspace());

    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(object) = object {
        if !object.key.is_empty() {
            query.push(("file_key", object.key.clone()));
        }
        if let Some(storage) = &object.storage {
            query.push(("storage", storage.clone()));
        }
    }
    if let Some(path) = &opts.s3_resource_path {
        query.push(("s3_resource_path", path.clone()));
    }
    if let Some(content_type) = &opts.content_type {
        query.push(("content_type", content_type.clone()));
    }
    if let Some(disposition) = &opts.content_disposition {
        query.push(("content_disposition", disposition.clone()));
    }

    let request = client
        .http()
        .post(client.url(&endpoint))
        .bearer_auth(client.token())
        .header(CONTENT_TYPE, "application/octet-stream")
        .query(&query);
    let request = match content {
        FileContent::Bytes(bytes) => request.body(bytes),
        FileContent::Reader(reader) => request.body(reqwest::blocking::Body::new(reader)),
    };

    let resp = check_status("POST", request.send()?)?;
    let upload: UploadResponse = resp.json()?;
    Ok(S3Object {
        key: upload.file_key,
        storage: object.and_then(|o| o.storage.clone()),
    })
}

/// Sign objects for use by anonymous users in public apps.
pub fn sign_s3_objects(client: &Client, objects: &[S3Object]) -> Result<Vec<S3Object>> {
    let endpoint = format!("/w/{}/apps/sign_s3_objects", client.workspace());
    Ok(client
        .post(&endpoint, &json!({ "s3_objects": objects }))?
        .json()?)
}

/// Sign a single object. See [`sign_s3_objects`].
pub fn sign_s3_object(client: &Client, object: &S3Object) -> Result<S3Object> {
    let mut signed = sign_s3_objects(client, std::slice::from_ref(object))?;
    signed.pop().ok_or_else(|| {
        crate::error::Error::Config("sign_s3_objects returned an empty list".into())
    })
}

/// Connection settings for the S3 resource backing the workspace storage.
#[derive(Debug, Clone, Deserialize)]
pub struct S3ConnectionSettings {
    #[serde(rename = "endPoint")]
    pub endpoint: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename = "useSSL", default)]
    pub use_ssl: bool,
    #[serde(rename = "accessKey", default)]
    pub access_key: Option<String>,
    #[serde(rename = "secretKey", default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
}

/// Fetch the settings needed to open a direct S3 connection from another
/// tool, using the workspace default resource or an explicit one.
pub fn get_s3_resource_info(
    client: &Client,
    s3_resource_path: Option<&str>,
) -> Result<S3ConnectionSettings> {
    let endpoint = format!("/w/{}/job_helpers/v2/s3_resource_info", client.workspace());
    let body = match s3_resource_path {
        Some(path) => json!({ "s3_resource_path": path }),
        None => json!({}),
    };
    Ok(client.post(&endpoint, &body)?.json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("s3://archive/reports/2026.csv", "reports/2026.csv", Some("archive"))]
    #[case("s3:///reports/2026.csv", "reports/2026.csv", None)]
    #[case("s3://bucket/", "", Some("bucket"))]
    fn test_parse_s3_object(
        #[case] input: &str,
        #[case] key: &str,
        #[case] storage: Option<&str>,
    ) {
        let object = parse_s3_object(input);
        assert_eq!(object.key, key);
        assert_eq!(object.storage.as_deref(), storage);
    }

    #[rstest]
    #[case("reports/2026.csv")]
    #[case("s3:/missing-slash")]
    #[case("")]
    fn test_parse_s3_object_unparseable_yields_empty_key(#[case] input: &str) {
        let object = parse_s3_object(input);
        assert_eq!(object.key, "");
        assert!(object.storage.is_none());
    }

    #[test]
    fn test_s3_object_wire_format() {
        let object = S3Object::with_storage("a/b.txt", "cold");
        let encoded = serde_json::to_value(&object).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({"s3": "a/b.txt", "storage": "cold"})
        );

        let bare = serde_json::to_value(S3Object::new("a/b.txt")).unwrap();
        assert_eq!(bare, serde_json::json!({"s3": "a/b.txt"}));
    }

    #[test]
    fn test_window_size_clamped_to_page() {
        let server = mockito::Server::new();
        let client = Client::builder()
            .base_url(server.url())
            .workspace("test-ws")
            .build()
            .unwrap();
        let reader =
            load_s3_file_reader(&client, &S3Object::new("k"), None).with_window_size(1);
        assert_eq!(reader.window_size, MIN_WINDOW_BYTES);
    }
}
