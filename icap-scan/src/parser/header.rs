//! Status line and header parsing for ICAP (and embedded HTTP) heads.

use crate::error::{Error, IcapResult};
use std::collections::HashMap;
use tracing::trace;

/// Status code and headers of a response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub status: u16,
    /// Header name as sent by the peer to its value; the last duplicate wins.
    pub headers: HashMap<String, String>,
}

impl ParsedHeader {
    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Case-insensitive lookup.
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a head such as
///
/// ```text
/// ICAP/1.0 204 Unmodified
/// Server: C-ICAP/0.1.6
/// ISTag: CI0001-000-0978-6918203
/// ```
///
/// The status code is the token after the first space of the first line, so
/// any protocol version is accepted. Header values start two characters after
/// the colon (`Key: Value`); lines without a colon are ignored.
pub fn parse_header(text: &str) -> IcapResult<ParsedHeader> {
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = parse_status(status_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.find(':') else {
            trace!("parse_header: skipping line without colon: {line:?}");
            continue;
        };
        let key = &line[..colon];
        let value = line.get(colon + 2..).unwrap_or_default();
        headers.insert(key.to_string(), value.to_string());
    }

    Ok(ParsedHeader { status, headers })
}

/// Extract the status code from a status line like `ICAP/1.0 200 OK`.
pub fn parse_status(status_line: &str) -> IcapResult<u16> {
    let (_version, rest) = status_line
        .split_once(' ')
        .ok_or_else(|| Error::UnrecognizedStatus(status_line.to_string()))?;
    let token = rest.split(' ').next().unwrap_or_default();
    if token.is_empty() {
        return Err(Error::UnrecognizedStatus(status_line.to_string()));
    }
    token
        .parse::<u16>()
        .map_err(|_| Error::UnrecognizedStatus(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_204_with_istag() {
        let h = parse_header("ICAP/1.0 204 Unmodified\r\nISTag: CI0001\r\n\r\n").expect("parse");
        assert_eq!(h.status, 204);
        assert_eq!(h.get("ISTag"), Some("CI0001"));
        assert_eq!(h.headers.len(), 1);
    }

    #[test]
    fn parses_sample_head() {
        let h = parse_header(
            "ICAP/1.0 200 OK\r\n\
             Server: C-ICAP/0.1.6\r\n\
             Connection: keep-alive\r\n\
             ISTag: CI0001-000-0978-6918203\r\n\
             Encapsulated: res-hdr=0, res-body=212\r\n\
             \r\n",
        )
        .expect("parse");
        assert_eq!(h.status, 200);
        assert_eq!(h.get("Server"), Some("C-ICAP/0.1.6"));
        assert_eq!(
            h.get_ignore_case("encapsulated"),
            Some("res-hdr=0, res-body=212")
        );
        assert_eq!(h.get("encapsulated"), None);
    }

    #[test]
    fn last_duplicate_header_wins() {
        let h = parse_header("ICAP/1.0 204 X\r\nISTag: a\r\nISTag: b\r\n\r\n").expect("parse");
        assert_eq!(h.get("ISTag"), Some("b"));
    }

    #[test]
    fn value_keeps_colons_and_skips_two_chars() {
        let h = parse_header("ICAP/1.0 204 X\r\nX-Url: http://a:1/\r\nX-Tight:ab\r\n\r\n")
            .expect("parse");
        assert_eq!(h.get("X-Url"), Some("http://a:1/"));
        assert_eq!(h.get("X-Tight"), Some("b"));
    }

    #[test]
    fn stops_at_blank_line() {
        let h = parse_header("ICAP/1.0 200 OK\r\nA: 1\r\n\r\nB: 2\r\n").expect("parse");
        assert_eq!(h.get("A"), Some("1"));
        assert_eq!(h.get("B"), None);
    }

    #[test]
    fn version_agnostic() {
        assert_eq!(parse_status("HTTP/1.1 403 Forbidden").expect("http"), 403);
        assert_eq!(parse_status("ICAP/2.0 204").expect("no reason phrase"), 204);
    }

    #[rstest]
    #[case("")]
    #[case("ICAP/1.0")]
    #[case("ICAP/1.0 ")]
    #[case("ICAP/1.0 OK")]
    #[case("ICAP/1.0 2O4 Unmodified")]
    #[case("ICAP/1.0  204 double space")]
    fn rejects_bad_status_lines(#[case] line: &str) {
        let err = parse_header(&format!("{line}\r\n\r\n")).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedStatus(_)), "got {err:?}");
        assert!(err.is_protocol());
    }
}
