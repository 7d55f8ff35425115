//! Connection wrapper used by [`crate::Session`].
//!
//! A [`Connection`] owns exactly one blocking `TcpStream`. It resolves the
//! target, connects, applies the send/receive timeouts and the keep-alive
//! flag, and implements [`Read`]/[`Write`] by delegating to the inner stream.
//! Timeouts that fire during I/O surface as [`Error::Timeout`].

use crate::error::{Error, IcapResult};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// Socket-level settings, derived from [`crate::ScanConfig::connection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connect and write timeout.
    pub send_timeout: Option<Duration>,
    /// Read timeout.
    pub receive_timeout: Option<Duration>,
    pub keep_alive: bool,
}

#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    config: ConnectionConfig,
}

impl Connection {
    /// Resolve `host:port` and connect, trying each resolved address in turn.
    pub fn open(host: &str, port: u16, config: ConnectionConfig) -> IcapResult<Self> {
        let target = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::connect(&target, e))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::connect(
                &target,
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no resolved socket address",
                ),
            ));
        }

        let mut last_err = None;
        for addr in addrs {
            let attempt = match config.send_timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Self::configure(stream, addr, config),
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(Error::connect(
            &target,
            last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected)),
        ))
    }

    fn configure(
        stream: TcpStream,
        peer: SocketAddr,
        config: ConnectionConfig,
    ) -> IcapResult<Self> {
        let fail = |e| Error::connect(peer, e);
        stream.set_read_timeout(config.receive_timeout).map_err(fail)?;
        stream.set_write_timeout(config.send_timeout).map_err(fail)?;
        SockRef::from(&stream)
            .set_keepalive(config.keep_alive)
            .map_err(fail)?;
        debug!(
            "connected to {peer} (send_timeout={:?}, receive_timeout={:?}, keep_alive={})",
            config.send_timeout, config.receive_timeout, config.keep_alive
        );
        Ok(Self {
            stream,
            peer,
            config,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write the whole buffer, mapping timeouts.
    pub fn send(&mut self, bytes: &[u8]) -> IcapResult<()> {
        trace!("send: {} bytes", bytes.len());
        self.stream
            .write_all(bytes)
            .map_err(|e| Error::from_io(e, self.config.send_timeout))
    }

    /// Shut down both directions and release the socket.
    pub fn close(self) -> IcapResult<()> {
        debug!("closing connection to {}", self.peer);
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // the peer already closed its side after `Connection: close`
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
