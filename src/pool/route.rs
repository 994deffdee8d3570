//! Destination key for per-route limits.

use std::fmt;
use std::str::FromStr;

use hyper::Uri;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteScheme {
    Http,
    Https,
}

impl RouteScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteScheme::Http => "http",
            RouteScheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            RouteScheme::Http => 80,
            RouteScheme::Https => 443,
        }
    }
}

/// A distinct destination: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    scheme: RouteScheme,
    host: String,
    port: u16,
}

impl Route {
    pub fn new(scheme: RouteScheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Derive the route from an absolute URI.
    pub fn from_uri(uri: &Uri) -> Result<Self, ProxyError> {
        let invalid = |reason| ProxyError::InvalidTarget {
            uri: uri.to_string(),
            reason,
        };

        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("http") => RouteScheme::Http,
            Some(s) if s.eq_ignore_ascii_case("https") => RouteScheme::Https,
            Some(_) => return Err(invalid("unsupported scheme")),
            None => return Err(invalid("target must be an absolute uri")),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());

        Ok(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> RouteScheme {
        self.scheme
    }

    /// Host as it appears in the URI (IPv6 literals keep their brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == RouteScheme::Https
    }

    /// Host suitable for socket address resolution and TLS server names.
    pub fn connect_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Value for the outbound `host` header; default ports are omitted.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for Route {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri: Uri = s.parse().map_err(|_| ProxyError::InvalidTarget {
            uri: s.to_string(),
            reason: "unparsable uri",
        })?;
        Self::from_uri(&uri)
    }
}
