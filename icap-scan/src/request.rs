//! RESPMOD request framing.
//!
//! A scan is sent as an ICAP `RESPMOD` whose encapsulated area holds a
//! synthetic HTTP `GET` for the file followed by an HTTP `200 OK` response
//! head announcing a chunked body. [`RespmodPreamble::build`] produces the
//! ICAP head plus both HTTP heads; the payload itself is streamed afterwards
//! with [`crate::parser::wire::write_chunked`].
//!
//! ```text
//! RESPMOD icap://10.0.0.5:1344/wwreqmod ICAP/1.0
//! Allow: 204
//! Connection: close
//! Host: 10.0.0.5
//! Encapsulated: req-hdr=0, res-hdr=L1, res-body=L1+L2
//!
//! GET http://10.0.0.5/202501311200/report.pdf HTTP/1.1      <- L1 bytes
//! Host: 10.0.0.5
//!
//! HTTP/1.1 200 OK                                           <- L2 bytes
//! Transfer-Encoding: chunked
//! Content-Length: 1234
//!
//! ```

use http::{Method, StatusCode, Version};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write as _;
use tracing::{debug, trace};

/// Characters left as-is in the file name segment of the embedded URL.
const FILENAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'*')
    .remove(b'(')
    .remove(b')');

/// The only ICAP method this client sends.
pub const ICAP_METHOD: &str = "RESPMOD";

/// Format of the path segment that makes each embedded URL unique per minute.
pub const STAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Byte offsets written into the `Encapsulated` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encapsulated {
    pub res_hdr: usize,
    pub res_body: usize,
}

impl Encapsulated {
    fn header_value(&self) -> String {
        format!(
            "req-hdr=0, res-hdr={}, res-body={}",
            self.res_hdr, self.res_body
        )
    }
}

/// Everything about the request head that stays fixed for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespmodPreamble {
    host: String,
    port: u16,
    service: String,
    version: String,
}

impl RespmodPreamble {
    pub fn new(host: &str, port: u16, service: &str, version: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            service: trim_leading_slash(service).to_string(),
            version: version.to_string(),
        }
    }

    /// `icap://host:port/service`
    pub fn icap_uri(&self) -> String {
        format!(
            "icap://{}:{}/{}",
            uri_host(&self.host),
            self.port,
            self.service
        )
    }

    /// Build the preamble stamped with the current local time.
    pub fn build_now(&self, file_size: usize, filename: &str) -> Vec<u8> {
        let stamp = chrono::Local::now().format(STAMP_FORMAT).to_string();
        self.build(file_size, filename, &stamp)
    }

    /// Build ICAP head + embedded HTTP request head + HTTP response head.
    pub fn build(&self, file_size: usize, filename: &str, stamp: &str) -> Vec<u8> {
        let http_req = self.http_request_head(filename, stamp);
        let http_res = http_response_head(file_size);
        let enc = Encapsulated {
            res_hdr: http_req.len(),
            res_body: http_req.len() + http_res.len(),
        };

        let mut head = String::with_capacity(256);
        write!(
            head,
            "{} {} {}\r\n",
            ICAP_METHOD,
            self.icap_uri(),
            self.version
        )
        .unwrap();
        head.push_str("Allow: 204\r\n");
        head.push_str("Connection: close\r\n");
        write!(head, "Host: {}\r\n", self.host).unwrap();
        write!(head, "Encapsulated: {}\r\n", enc.header_value()).unwrap();
        head.push_str("\r\n");

        debug!(
            "RESPMOD {} file_size={} encapsulated=({})",
            self.icap_uri(),
            file_size,
            enc.header_value()
        );

        let mut out = head.into_bytes();
        out.reserve(enc.res_body);
        out.extend_from_slice(http_req.as_bytes());
        out.extend_from_slice(http_res.as_bytes());
        trace!("preamble: {} bytes", out.len());
        out
    }

    fn http_request_head(&self, filename: &str, stamp: &str) -> String {
        let mut out = String::new();
        write!(
            out,
            "{} http://{}/{}/{} {}\r\n",
            Method::GET,
            uri_host(&self.host),
            stamp,
            url_safe_filename(filename),
            http_version_str(Version::HTTP_11)
        )
        .unwrap();
        write!(out, "Host: {}\r\n\r\n", self.host).unwrap();
        out
    }
}

fn http_response_head(file_size: usize) -> String {
    let code = StatusCode::OK;
    format!(
        "{} {} {}\r\nTransfer-Encoding: chunked\r\nContent-Length: {}\r\n\r\n",
        http_version_str(Version::HTTP_11),
        code.as_u16(),
        code.canonical_reason().unwrap_or(""),
        file_size
    )
}

/// Final path component of `filename`, percent-encoded for use in a URL path.
pub fn url_safe_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    utf8_percent_encode(base, FILENAME_SAFE).to_string()
}

pub fn http_version_str(v: Version) -> &'static str {
    match v {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn uri_host(host: &str) -> std::borrow::Cow<'_, str> {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]").into()
    } else {
        host.into()
    }
}

fn trim_leading_slash(s: &str) -> &str {
    s.strip_prefix('/').unwrap_or(s)
}
