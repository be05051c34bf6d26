use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Indicates failures when resolving a [`ServiceAddress`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Raised if the DNS lookup for the host failed.
    #[error("dns lookup failed")]
    LookupFailed(#[source] io::Error),
    /// Raised if the DNS lookup succeeded but an empty result was returned.
    #[error("dns lookup returned no results")]
    EmptyLookupResult,
}

/// Raised if a string cannot be parsed into a [`ServiceAddress`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseServiceAddressError {
    /// The address has no port.
    #[error("invalid service address: missing port")]
    MissingPort,
    /// The port is not a number between 0 and 65535.
    #[error("invalid service address: bad port")]
    BadPort,
    /// An IPv6 host is missing its closing bracket.
    #[error("invalid service address: bad host")]
    BadHost,
}

/// The address a server mode input listens on.
///
/// Accepts the following forms:
///
///  - `:3210` listens on all interfaces.
///  - `3210` is the same as `:3210`.
///  - `localhost:3210`, `127.0.0.1:3210` or `[::1]:3210` listen on the given host only.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    host: Option<String>,
    port: u16,
}

impl ServiceAddress {
    /// Creates an address listening on all interfaces.
    pub fn any(port: u16) -> Self {
        Self { host: None, port }
    }

    /// Creates an address listening on a specific host.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
        }
    }

    /// Resolves the socket address to bind to.
    ///
    /// This might perform a DNS lookup if the host is a name.
    pub fn socket_addr(&self) -> Result<SocketAddr, ResolveError> {
        let host = self.host.as_deref().unwrap_or("0.0.0.0");
        (host, self.port)
            .to_socket_addrs()
            .map_err(ResolveError::LookupFailed)?
            .next()
            .ok_or(ResolveError::EmptyLookupResult)
    }
}

impl Default for ServiceAddress {
    fn default() -> Self {
        Self::any(3210)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            None => write!(f, ":{}", self.port),
            Some(host) if host.contains(':') => write!(f, "[{host}]:{}", self.port),
            Some(host) => write!(f, "{host}:{}", self.port),
        }
    }
}

impl FromStr for ServiceAddress {
    type Err = ParseServiceAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let Some((host, port)) = s.rsplit_once(':') else {
            if s.is_empty() {
                return Err(ParseServiceAddressError::MissingPort);
            }
            let port = s.parse().map_err(|_| ParseServiceAddressError::BadPort)?;
            return Ok(Self::any(port));
        };

        let port = port
            .parse()
            .map_err(|_| ParseServiceAddressError::BadPort)?;

        let host = match host.strip_prefix('[') {
            Some(bracketed) => bracketed
                .strip_suffix(']')
                .ok_or(ParseServiceAddressError::BadHost)?,
            None if host.contains(':') => return Err(ParseServiceAddressError::BadHost),
            None => host,
        };

        Ok(Self {
            host: (!host.is_empty()).then(|| host.to_owned()),
            port,
        })
    }
}

impl Serialize for ServiceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServiceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AddressVisitor;

        impl Visitor<'_> for AddressVisitor {
            type Value = ServiceAddress;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a service address such as `:3210` or `localhost:3210`")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<ServiceAddress, E> {
                u16::try_from(value)
                    .map(ServiceAddress::any)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<ServiceAddress, E> {
                u16::try_from(value)
                    .map(ServiceAddress::any)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ServiceAddress, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AddressVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn test_parse_forms() {
        let parse = |s: &str| s.parse::<ServiceAddress>();

        assert_eq!(parse(":3210"), Ok(ServiceAddress::any(3210)));
        assert_eq!(parse("8080"), Ok(ServiceAddress::any(8080)));
        assert_eq!(
            parse("localhost:3210"),
            Ok(ServiceAddress::new("localhost", 3210))
        );
        assert_eq!(parse("[::1]:0"), Ok(ServiceAddress::new("::1", 0)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "".parse::<ServiceAddress>(),
            Err(ParseServiceAddressError::MissingPort)
        );
        assert_eq!(
            "localhost:http".parse::<ServiceAddress>(),
            Err(ParseServiceAddressError::BadPort)
        );
        assert_eq!(
            ":99999".parse::<ServiceAddress>(),
            Err(ParseServiceAddressError::BadPort)
        );
        assert_eq!(
            "::1:3210".parse::<ServiceAddress>(),
            Err(ParseServiceAddressError::BadHost)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ServiceAddress::any(3210).to_string(), ":3210");
        assert_eq!(ServiceAddress::new("::1", 80).to_string(), "[::1]:80");
        assert_eq!(ServiceAddress::new("127.0.0.1", 80).to_string(), "127.0.0.1:80");
    }

    #[test]
    fn test_socket_addr() {
        let addr = ServiceAddress::any(3210).socket_addr().unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(addr.port(), 3210);

        let addr = ServiceAddress::new("127.0.0.1", 0).socket_addr().unwrap();
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_deserialize() {
        let address: ServiceAddress = serde_yaml::from_str("\":3210\"").unwrap();
        assert_eq!(address, ServiceAddress::any(3210));

        let address: ServiceAddress = serde_yaml::from_str("4000").unwrap();
        assert_eq!(address, ServiceAddress::any(4000));
    }
}
