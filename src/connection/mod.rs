//! Stream transports carrying a channel session.
//!
//! A session owns exactly one transport endpoint: plain TCP, or TCP wrapped
//! in TLS when a [`TlsConfig`] is supplied. The async flavour lives in
//! [`transport`], the blocking one in [`blocking`].

use thiserror::Error;

pub(crate) mod blocking;
pub(crate) mod transport;

#[cfg(feature = "transport-tls")]
use std::sync::Arc;

#[cfg(feature = "transport-tls")]
pub type TlsConfig = Option<Arc<rustls::ClientConfig>>;

#[cfg(not(feature = "transport-tls"))]
#[allow(missing_copy_implementations)]
#[derive(Debug, Clone, Default)]
pub struct TlsConfig();

#[derive(Debug, Error)]
#[non_exhaustive]
pub(crate) enum Error {
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Cannot resolve address: {0}:{1}")]
    Resolve(String, u16),

    #[cfg(feature = "transport-tls")]
    #[error("Invalid Hostname: {0}")]
    BadHostname(#[from] rustls::pki_types::InvalidDnsNameError),

    #[cfg(feature = "transport-tls")]
    #[error("Cannot establish TLS session: {0}")]
    Tls(#[from] rustls::Error),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
