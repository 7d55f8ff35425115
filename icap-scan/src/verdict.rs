//! Turning an ICAP response into a [`ScanResult`].
//!
//! The ICAP status code drives a one-shot state machine:
//!
//! | status | action                                                      |
//! |--------|-------------------------------------------------------------|
//! | 204    | done, the file is clean                                     |
//! | 200    | read the encapsulated HTTP response, extract a block reason |
//! | other  | [`Error::UnrecognizedStatus`]                               |
//!
//! Block reasons are pulled out of the gateway's HTML block page by a
//! [`VerdictExtractor`]. [`ContentDataTemplate`] handles the
//! `<td class="contentData">` layout; a different vendor page only needs a
//! different extractor. A page the extractor cannot read still yields a
//! (failed) [`ScanResult`] carrying [`TEMPLATE_FALLBACK`].

use crate::error::{Error, IcapResult};
use crate::parser::header::{ParsedHeader, parse_header, parse_status};
use crate::parser::wire::{CHUNKED_TERMINATOR, HEADER_TERMINATOR, decode_chunked, read_until};
use std::borrow::Cow;
use std::fmt;
use std::io::BufRead;
use tracing::{debug, warn};

pub const SCANNED_OK: &str = "file scanned successfully";
pub const TEMPLATE_FALLBACK: &str = "Invalid content data due to change of template format";

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// `true` only when the gateway answered `204`.
    pub success: bool,
    pub icap_status_code: u16,
    /// Status of the encapsulated HTTP response, `0` when there is none.
    pub http_status_code: u16,
    pub message: String,
}

impl ScanResult {
    fn clean() -> Self {
        Self {
            success: true,
            icap_status_code: 204,
            http_status_code: 0,
            message: SCANNED_OK.to_string(),
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.success { "clean" } else { "blocked" };
        write!(f, "ICAP {} {}", self.icap_status_code, verdict)?;
        if self.http_status_code != 0 {
            write!(f, " (HTTP {})", self.http_status_code)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Pulls a human-readable verdict out of a block page body.
pub trait VerdictExtractor: fmt::Debug + Send + Sync {
    /// Return `None` if the body does not match the expected template.
    fn extract(&self, body: &str) -> Option<String>;
}

/// Text found a fixed distance after a marker, up to a closing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDataTemplate {
    pub marker: String,
    /// Distance from the start of the marker to the start of the message.
    pub offset: usize,
    pub closing: String,
}

impl Default for ContentDataTemplate {
    fn default() -> Self {
        Self {
            marker: "contentData".to_string(),
            offset: 14,
            closing: "</td>".to_string(),
        }
    }
}

impl VerdictExtractor for ContentDataTemplate {
    fn extract(&self, body: &str) -> Option<String> {
        let start = body.find(&self.marker)?;
        let end = start + body[start..].find(&self.closing)?;
        let text = body.get(start + self.offset..end)?;
        Some(text.trim().to_string())
    }
}

/// Next step after looking at the ICAP status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Done(ScanResult),
    ReadHttpBody,
}

/// Apply the status transition table.
pub fn on_icap_status(head: &ParsedHeader) -> IcapResult<Step> {
    match head.status {
        204 => Ok(Step::Done(ScanResult::clean())),
        200 => Ok(Step::ReadHttpBody),
        other => Err(Error::UnrecognizedStatus(other.to_string())),
    }
}

/// Build the blocked result from the raw encapsulated HTTP response.
pub fn on_http_body(raw: &[u8], extractor: &dyn VerdictExtractor) -> ScanResult {
    let text = String::from_utf8_lossy(raw);
    let http_status_code = embedded_http_status(&text);
    let body = embedded_body(raw, &text);

    let message = match extractor.extract(&body) {
        Some(message) => message,
        None => {
            warn!("block page did not match {extractor:?}, using fallback message");
            TEMPLATE_FALLBACK.to_string()
        }
    };
    debug!("blocked: http_status={http_status_code} message={message:?}");

    ScanResult {
        success: false,
        icap_status_code: 200,
        http_status_code,
        message,
    }
}

/// Read the ICAP head from `reader` and, for `200`, the HTTP response.
///
/// Each read is bounded by `cap` bytes. The HTTP response is read up to the
/// first `0\r\n\r\n`, so an embedded head whose last header value ends in
/// `0` (`Expires: 0`) stops the read before the block page and the message
/// falls back to [`TEMPLATE_FALLBACK`].
pub fn interpret_response<R>(
    reader: &mut R,
    cap: usize,
    extractor: &dyn VerdictExtractor,
) -> IcapResult<ScanResult>
where
    R: BufRead + ?Sized,
{
    let head_bytes = read_until(reader, HEADER_TERMINATOR, cap)?;
    let head = parse_header(&String::from_utf8_lossy(&head_bytes))?;
    debug!(
        "ICAP status {} istag={:?}",
        head.status,
        head.get_ignore_case("ISTag")
    );

    match on_icap_status(&head)? {
        Step::Done(result) => Ok(result),
        Step::ReadHttpBody => {
            let raw = read_until(reader, CHUNKED_TERMINATOR, cap)?;
            Ok(on_http_body(&raw, extractor))
        }
    }
}

fn embedded_http_status(text: &str) -> u16 {
    let first = text.split("\r\n").next().unwrap_or_default();
    if !first.starts_with("HTTP/") {
        return 0;
    }
    parse_status(first).unwrap_or(0)
}

/// Dechunked HTTP body when it decodes cleanly, otherwise the whole text.
fn embedded_body<'a>(raw: &[u8], text: &'a str) -> Cow<'a, str> {
    let decoded = memchr::memmem::find(raw, HEADER_TERMINATOR)
        .and_then(|i| decode_chunked(&raw[i + HEADER_TERMINATOR.len()..]));
    match decoded {
        Some(body) => Cow::Owned(String::from_utf8_lossy(&body).into_owned()),
        None => Cow::Borrowed(text),
    }
}
