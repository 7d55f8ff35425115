//! One connection, one scan.
//!
//! A [`Session`] owns the [`Connection`] for its whole lifetime: the socket is
//! opened in [`Session::open`] and released by [`Session::close`] or, on any
//! other exit path, when the session is dropped. Requests are sent with
//! `Connection: close`, so the gateway ends the connection after answering
//! and each file needs its own session.
//!
//! ```no_run
//! use icap_scan::{ScanConfig, Session};
//!
//! let bytes = std::fs::read("report.pdf")?;
//! let config = ScanConfig::default().service("avscan").send_partition(4);
//!
//! let mut session = Session::open("10.0.0.5", 1344, config)?;
//! let check = session.validate(bytes.len() as u64, "report.pdf");
//! if check.is_validated {
//!     let result = session.scan_file(&bytes, "report.pdf")?;
//!     println!("{result}");
//! }
//! session.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::ScanConfig;
use crate::error::{Error, IcapResult};
use crate::net::Connection;
use crate::parser::wire::write_chunked;
use crate::request::RespmodPreamble;
use crate::validate::{ValidationResult, validate};
use crate::verdict::{ContentDataTemplate, ScanResult, VerdictExtractor, interpret_response};
use std::io::{self, BufReader};
use std::net::SocketAddr;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Session {
    config: ScanConfig,
    preamble: RespmodPreamble,
    extractor: Box<dyn VerdictExtractor>,
    conn: Option<BufReader<Connection>>,
}

impl Session {
    /// Check `config` and connect to `host:port`.
    pub fn open(host: &str, port: u16, config: ScanConfig) -> IcapResult<Self> {
        config.check()?;
        let conn = Connection::open(host, port, config.connection())?;
        let preamble = RespmodPreamble::new(host, port, &config.service, &config.icap_version);
        Ok(Self {
            conn: Some(BufReader::with_capacity(
                config.max_header_bytes.min(8 * 1024),
                conn,
            )),
            preamble,
            config,
            extractor: Box::new(ContentDataTemplate::default()),
        })
    }

    /// Replace the block page reader.
    pub fn with_extractor(mut self, extractor: impl VerdictExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|c| c.get_ref().peer_addr())
    }

    /// Run the configured [`crate::FilePolicy`] against a candidate file.
    pub fn validate(&self, size: u64, filename: &str) -> ValidationResult {
        validate(size, filename, &self.config.policy)
    }

    /// Send `payload` as a RESPMOD and wait for the verdict.
    ///
    /// Fails with [`Error::EmptyPayload`] before writing anything if `payload`
    /// is empty.
    pub fn scan_file(&mut self, payload: &[u8], filename: &str) -> IcapResult<ScanResult> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        debug!(
            "scanning {filename:?} ({} bytes) via {}",
            payload.len(),
            self.preamble.icap_uri()
        );

        let preamble = self.preamble.build_now(payload.len(), filename);
        let partitions = self.config.send_partition;
        let cap = self.config.max_header_bytes;
        let timeouts = self.config.connection();

        let conn = self.conn.as_mut().ok_or_else(closed)?;
        conn.get_mut().send(&preamble)?;
        write_chunked(conn.get_mut(), payload, partitions)
            .map_err(|e| remap_io(e, |io| Error::from_io(io, timeouts.send_timeout)))?;

        let result = interpret_response(conn, cap, self.extractor.as_ref())
            .map_err(|e| remap_io(e, |io| Error::from_io(io, timeouts.receive_timeout)))?;
        debug!("scan of {filename:?} finished: {result}");
        Ok(result)
    }

    /// Scan one file, then close the session.
    ///
    /// The scan outcome is returned as-is; a failure to close afterwards is
    /// only logged.
    pub fn scan_and_close(mut self, payload: &[u8], filename: &str) -> IcapResult<ScanResult> {
        let result = self.scan_file(payload, filename);
        if let Err(e) = self.close() {
            warn!("closing session after scanning {filename:?}: {e}");
        }
        result
    }

    /// Shut the connection down and release the socket.
    pub fn close(mut self) -> IcapResult<()> {
        match self.conn.take() {
            Some(conn) => conn.into_inner().close(),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err(e) = conn.into_inner().close()
        {
            debug!("closing dropped session: {e}");
        }
    }
}

fn closed() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "session is closed",
    ))
}

fn remap_io(err: Error, map: impl FnOnce(io::Error) -> Error) -> Error {
    match err {
        Error::Io(io) => map(io),
        other => other,
    }
}
