//! Unified error type.

use std::fmt;
use std::net::SocketAddr;

/// The error type returned by the server's fallible operations.
///
/// Panics raised by handlers never become an `Error`: they are recovered by
/// the middleware in [`crate::middleware`] or by the router's terminal
/// recovery and turned into responses. This type surfaces infrastructure
/// failures only.
#[derive(Debug)]
pub enum Error {
    /// The listener could not bind to the configured address.
    Bind { addr: SocketAddr, source: std::io::Error },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "bind {addr}: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn bind_error_names_the_address() {
        let err = Error::Bind {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("bind 127.0.0.1:80: "));
        assert!(err.source().is_some());
    }
}
