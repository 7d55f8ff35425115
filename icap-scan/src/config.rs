//! Typed scanner configuration.
//!
//! [`ScanConfig`] carries every setting a [`crate::Session`] needs: the ICAP
//! service and protocol version, framing limits, socket timeouts and the
//! pre-flight [`FilePolicy`]. It is passed by value into
//! [`crate::Session::open`]; nothing is read from ambient state mid-scan.
//!
//! Configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! service = "wwreqmod"
//! icap_version = "ICAP/1.0"
//! max_header_bytes = 65536
//! send_partition = 4
//! send_timeout_ms = 5000
//! receive_timeout_ms = 30000
//! keep_alive = false
//!
//! [policy]
//! max_name_length = 255
//! max_file_size = 10485760
//! allowed_extensions = "pdf, tif, rtf"
//! excluded_substrings = [".", "/", "\\"]
//! ```
//!
//! List settings accept either a TOML array or a comma-separated string.

use crate::error::{Error, IcapResult};
use crate::net::ConnectionConfig;
use crate::validate::FilePolicy;
use crate::{DEFAULT_SERVICE, ICAP_VERSION, MAX_HDR_BYTES};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Smallest header cap that can hold a status line and its terminator.
const MIN_HEADER_BYTES: usize = 16;

/// Settings consumed by [`crate::Session`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// ICAP service path appended to `icap://host:port/`.
    pub service: String,
    /// Protocol version token written on the request line.
    pub icap_version: String,
    /// Upper bound for each terminator-seeking read.
    pub max_header_bytes: usize,
    /// Number of chunks the payload is split into.
    pub send_partition: usize,
    /// Write (and connect) timeout in milliseconds, `0` disables it.
    pub send_timeout_ms: u64,
    /// Read timeout in milliseconds, `0` disables it.
    pub receive_timeout_ms: u64,
    /// Enable TCP keep-alive probes on the socket.
    pub keep_alive: bool,
    /// File policy used by [`crate::Session::validate`].
    pub policy: FilePolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            icap_version: ICAP_VERSION.to_string(),
            max_header_bytes: MAX_HDR_BYTES,
            send_partition: 1,
            send_timeout_ms: 0,
            receive_timeout_ms: 0,
            keep_alive: false,
            policy: FilePolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Parse and check a TOML document.
    pub fn from_toml_str(text: &str) -> IcapResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and check a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> IcapResult<Self> {
        let path = path.as_ref();
        debug!("loading scan config from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the framing code cannot work with.
    pub fn check(&self) -> IcapResult<()> {
        if self.service.trim().is_empty() {
            return Err(Error::configuration("service must not be empty"));
        }
        if self.icap_version.trim().is_empty() || self.icap_version.contains(char::is_whitespace) {
            return Err(crate::icap_config_error!(
                "invalid icap_version: {:?}",
                self.icap_version
            ));
        }
        if self.send_partition == 0 {
            return Err(Error::configuration("send_partition must be at least 1"));
        }
        if self.max_header_bytes < MIN_HEADER_BYTES {
            return Err(crate::icap_config_error!(
                "max_header_bytes must be at least {MIN_HEADER_BYTES}, got {}",
                self.max_header_bytes
            ));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        millis(self.receive_timeout_ms)
    }

    /// Socket-level subset handed to [`crate::net::Connection::open`].
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            send_timeout: self.send_timeout(),
            receive_timeout: self.receive_timeout(),
            keep_alive: self.keep_alive,
        }
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn send_partition(mut self, n: usize) -> Self {
        self.send_partition = n;
        self
    }

    pub fn max_header_bytes(mut self, n: usize) -> Self {
        self.max_header_bytes = n;
        self
    }

    pub fn receive_timeout_ms(mut self, ms: u64) -> Self {
        self.receive_timeout_ms = ms;
        self
    }

    pub fn send_timeout_ms(mut self, ms: u64) -> Self {
        self.send_timeout_ms = ms;
        self
    }

    pub fn keep_alive(mut self, yes: bool) -> Self {
        self.keep_alive = yes;
        self
    }

    pub fn policy(mut self, policy: FilePolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Deserialize either `["a", "b"]` or `"a, b"` into trimmed, non-empty items.
pub(crate) fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrCsv {
        List(Vec<String>),
        Csv(String),
    }

    let items = match ListOrCsv::deserialize(deserializer)? {
        ListOrCsv::List(v) => v,
        ListOrCsv::Csv(s) => s.split(',').map(str::to_string).collect(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_pass_check() {
        let cfg = ScanConfig::default();
        cfg.check().expect("defaults are valid");
        assert_eq!(cfg.icap_version, "ICAP/1.0");
        assert_eq!(cfg.send_timeout(), None);
        assert!(!cfg.connection().keep_alive);
    }

    #[test]
    fn parses_full_document_with_csv_lists() {
        let cfg = ScanConfig::from_toml_str(
            r#"
            service = "avscan"
            icap_version = "ICAP/1.0"
            max_header_bytes = 4096
            send_partition = 3
            send_timeout_ms = 1500
            receive_timeout_ms = 2500
            keep_alive = true

            [policy]
            max_name_length = 64
            max_file_size = 1000
            allowed_extensions = "pdf, TIF ,rtf,"
            excluded_substrings = [".", "/"]
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.service, "avscan");
        assert_eq!(cfg.send_partition, 3);
        assert_eq!(cfg.send_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(cfg.receive_timeout(), Some(Duration::from_millis(2500)));
        assert!(cfg.keep_alive);
        assert_eq!(cfg.policy.allowed_extensions, vec!["pdf", "TIF", "rtf"]);
        assert_eq!(cfg.policy.excluded_substrings, vec![".", "/"]);
        assert_eq!(cfg.policy.max_file_size, 1000);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = ScanConfig::from_toml_str("service = \"x\"\n").expect("parse");
        assert_eq!(cfg.max_header_bytes, MAX_HDR_BYTES);
        assert_eq!(cfg.policy, FilePolicy::default());
    }

    #[test]
    fn zero_partition_is_a_configuration_error() {
        let err = ScanConfig::from_toml_str("send_partition = 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("send_partition")));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = ScanConfig::from_toml_str("servce = \"typo\"\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn version_with_spaces_is_rejected() {
        let err = ScanConfig::default().check().and_then(|_| {
            ScanConfig {
                icap_version: "ICAP 1.0".into(),
                ..ScanConfig::default()
            }
            .check()
        });
        assert!(err.is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "service = \"from-file\"\nsend_partition = 2").expect("write");
        let cfg = ScanConfig::from_path(file.path()).expect("load");
        assert_eq!(cfg.service, "from-file");
        assert_eq!(cfg.send_partition, 2);
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = ScanConfig::from_path("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("cannot read")));
    }
}
