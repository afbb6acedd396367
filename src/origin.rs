//! The `Origin` key: the normalized `(scheme, host, port)` triple that the pool uses to
//! decide which connections can serve which requests.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// The two schemes this pool understands. Anything else is rejected with
/// [`ErrorKind::UnsupportedProtocol`](crate::error::ErrorKind::UnsupportedProtocol) before a
/// connection is ever attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// The lowercase wire form of this scheme.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Whether connections using this scheme should be wrapped in TLS.
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https)
    }

    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A reusable HTTP endpoint. Two requests share a connection only if their origins are equal.
///
/// Host comparison is case-insensitive (per the URI grammar); scheme and port comparison is
/// exact. `Origin` itself stores the host already lowercased so that `PartialEq`/`Hash` need no
/// special-casing and can be derived.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Origin {
    /// Extracts the origin from a request URL, rejecting anything but `http`/`https`.
    ///
    /// This is the one piece of URL handling the pool performs itself; everything else about
    /// the URL (path, query, fragment) is the caller's concern.
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(Error::unsupported_protocol(other)),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::unsupported_protocol(url.scheme()))?
            .to_ascii_lowercase();
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Self { scheme, host, port })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/").unwrap();
        let err = Origin::from_url(&url).unwrap_err();
        assert!(matches!(
            &*err.kind,
            crate::error::ErrorKind::UnsupportedProtocol { .. }
        ));
    }

    #[test]
    fn host_is_case_insensitive() {
        let a = Origin::from_url(&Url::parse("https://Example.com/").unwrap()).unwrap();
        let b = Origin::from_url(&Url::parse("https://example.COM/").unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn default_ports_applied() {
        let http = Origin::from_url(&Url::parse("http://example.com/").unwrap()).unwrap();
        assert_eq!(http.port, 80);
        let https = Origin::from_url(&Url::parse("https://example.com/").unwrap()).unwrap();
        assert_eq!(https.port, 443);
        let explicit = Origin::from_url(&Url::parse("https://example.com:8443/").unwrap()).unwrap();
        assert_eq!(explicit.port, 8443);
    }

    #[test]
    fn distinct_ports_are_distinct_origins() {
        let a = Origin::from_url(&Url::parse("https://example.com/").unwrap()).unwrap();
        let b = Origin::from_url(&Url::parse("https://example.com:8443/").unwrap()).unwrap();
        assert_ne!(a, b);
    }
}
