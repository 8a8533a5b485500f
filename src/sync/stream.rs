use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;

#[cfg(feature = "tls")]
use native_tls::TlsStream;

use crate::error::{Error, Result};
use crate::opts::Opts;
#[cfg(feature = "tls")]
use crate::opts::SslMode;

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Open the transport described by `opts`: a Unix socket when a socket
    /// path or directory is configured, TCP otherwise.
    pub fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = opts.socket_path() {
            return Ok(Self::unix(UnixStream::connect(&path)?));
        }

        let host = opts.hostaddr.as_deref().unwrap_or(&opts.host);
        if host.is_empty() {
            return Err(Error::Misuse("host is empty".into()));
        }

        let mut last_error = None;
        for addr in (host, opts.port).to_socket_addrs()? {
            let attempt = match opts.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(tcp) => {
                    tcp.set_nodelay(true)?;
                    return Ok(Self::tcp(tcp));
                }
                Err(e) => {
                    tracing::debug!("connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) => e.into(),
            None => Error::Connection(format!("could not resolve host \"{}\"", host)),
        })
    }

    /// Run the TLS handshake over an established TCP stream.
    #[cfg(feature = "tls")]
    pub fn upgrade_to_tls(self, host: &str, ssl_mode: SslMode) -> Result<Self> {
        let tcp = match self {
            Stream::Tcp(reader) => reader.into_inner(),
            _ => return Err(Error::Unsupported("TLS is only available over TCP".into())),
        };

        let mut builder = native_tls::TlsConnector::builder();
        match ssl_mode {
            SslMode::VerifyFull => {}
            SslMode::VerifyCa => {
                builder.danger_accept_invalid_hostnames(true);
            }
            _ => {
                builder
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true);
            }
        }
        let connector = builder.build()?;
        let tls = connector
            .connect(host, tcp)
            .map_err(|e| Error::Connection(format!("TLS handshake failed: {}", e)))?;
        Ok(Self::Tls(BufReader::new(tls)))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Unix(r) => r.read_exact(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
            Stream::Unix(r) => r.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().flush(),
            Stream::Unix(r) => r.get_mut().flush(),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_ref().set_nonblocking(nonblocking),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_ref().get_ref().set_nonblocking(nonblocking),
            Stream::Unix(r) => r.get_ref().set_nonblocking(nonblocking),
        }
    }

    /// Whether a read would return immediately (data buffered, data on the
    /// socket, or EOF). Never blocks.
    pub fn has_pending_input(&mut self) -> std::io::Result<bool> {
        self.set_nonblocking(true)?;
        let filled = match self {
            Stream::Tcp(r) => r.fill_buf().map(|_| ()),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.fill_buf().map(|_| ()),
            Stream::Unix(r) => r.fill_buf().map(|_| ()),
        };
        self.set_nonblocking(false)?;

        match filled {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}
