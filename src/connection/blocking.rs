use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(feature = "transport-tls")]
use rustls::{ClientConnection, StreamOwned};

use super::{Error, Result, TlsConfig};

#[cfg(feature = "transport-tls")]
pub(crate) enum Transport {
    Plain {
        inner: TcpStream,
    },

    Tls {
        inner: Box<StreamOwned<ClientConnection, TcpStream>>,
    },
}

#[cfg(not(feature = "transport-tls"))]
pub(crate) enum Transport {
    Plain { inner: TcpStream },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain { inner } => f.debug_struct("Plain").field("inner", inner).finish(),

            #[cfg(feature = "transport-tls")]
            Self::Tls { inner } => f
                .debug_struct("Tls")
                .field("inner", &inner.sock)
                .finish_non_exhaustive(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain { inner } => inner.read(buf),

            #[cfg(feature = "transport-tls")]
            Self::Tls { inner } => inner.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain { inner } => inner.write(buf),

            #[cfg(feature = "transport-tls")]
            Self::Tls { inner } => inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain { inner } => inner.flush(),

            #[cfg(feature = "transport-tls")]
            Self::Tls { inner } => inner.flush(),
        }
    }
}

impl Transport {
    pub(crate) fn connect(
        host: &str,
        port: u16,
        tls_config: TlsConfig,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let tcp_stream = Self::connect_tcp(host, port, timeout)?;
        tcp_stream.set_read_timeout(timeout)?;
        tcp_stream.set_write_timeout(timeout)?;
        Self::wrap_tls(tcp_stream, host, tls_config)
    }

    fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
        match timeout {
            None => Ok(TcpStream::connect((host, port))?),
            Some(timeout) => {
                let mut last_error = None;
                for addr in (host, port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => return Ok(stream),
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(last_error
                    .map(Error::IO)
                    .unwrap_or_else(|| Error::Resolve(host.to_owned(), port)))
            }
        }
    }

    #[cfg(feature = "transport-tls")]
    fn wrap_tls(tcp_stream: TcpStream, host: &str, tls_config: TlsConfig) -> Result<Self> {
        match tls_config {
            Some(config) => {
                let server_name = rustls::pki_types::ServerName::try_from(host.to_owned())?;
                let connection = ClientConnection::new(config, server_name)?;
                Ok(Self::Tls {
                    inner: Box::new(StreamOwned::new(connection, tcp_stream)),
                })
            }
            None => Ok(Self::Plain { inner: tcp_stream }),
        }
    }

    #[cfg(not(feature = "transport-tls"))]
    fn wrap_tls(tcp_stream: TcpStream, _host: &str, _tls_config: TlsConfig) -> Result<Self> {
        Ok(Self::Plain { inner: tcp_stream })
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Self::Plain { inner } => inner,

            #[cfg(feature = "transport-tls")]
            Self::Tls { inner } => &inner.sock,
        }
    }

    /// Applies the read/write timeout to the live socket.
    pub(crate) fn set_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.socket().set_read_timeout(timeout)?;
        self.socket().set_write_timeout(timeout)
    }

    /// Orderly shutdown of both directions; failures are of no consequence
    /// at this point.
    pub(crate) fn shutdown(&self) {
        let _ = self.socket().shutdown(Shutdown::Both);
    }
}
