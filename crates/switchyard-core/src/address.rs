use crate::{Error, Result};
use core::str::FromStr;
use std::fmt;

/// A transport endpoint address, either `tcp://host:port` or `inproc://name`.
///
/// The broker never inspects addresses beyond handing them to the transport;
/// parsing only exists so malformed input fails at bind time with
/// [`Error::AddressError`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// TCP endpoint. A host of `*` binds every interface.
    Tcp { host: String, port: u16 },
    /// In-process endpoint, shared by every socket of one context.
    Inproc { name: String },
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| Error::address(raw, "missing `scheme://` prefix"))?;

        match scheme {
            "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| Error::address(raw, "expected `host:port`"))?;
                if host.is_empty() {
                    return Err(Error::address(raw, "empty host"));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::address(raw, format!("invalid port `{port}`")))?;
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "inproc" => {
                if rest.is_empty() {
                    return Err(Error::address(raw, "empty in-process name"));
                }
                Ok(Self::Inproc {
                    name: rest.to_string(),
                })
            }
            other => Err(Error::address(raw, format!("unsupported scheme `{other}`"))),
        }
    }

    /// Host and port in the form tokio's socket APIs accept, mapping the `*`
    /// wildcard to every IPv4 interface.
    pub fn socket_target(&self) -> Option<String> {
        match self {
            Self::Tcp { host, port } if host == "*" => Some(format!("0.0.0.0:{port}")),
            Self::Tcp { host, port } => Some(format!("{host}:{port}")),
            Self::Inproc { .. } => None,
        }
    }

    pub const fn is_inproc(&self) -> bool {
        matches!(self, Self::Inproc { .. })
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Inproc { name } => write!(f, "inproc://{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_and_inproc() {
        assert_eq!(
            Address::parse("tcp://localhost:5570").unwrap(),
            Address::Tcp {
                host: "localhost".into(),
                port: 5570
            }
        );
        assert_eq!(
            Address::parse("inproc://backend").unwrap(),
            Address::Inproc {
                name: "backend".into()
            }
        );
    }

    #[test]
    fn wildcard_host_binds_all_interfaces() {
        let addr: Address = "tcp://*:5570".parse().unwrap();
        assert_eq!(addr.socket_target().as_deref(), Some("0.0.0.0:5570"));
        assert_eq!(addr.to_string(), "tcp://*:5570");
    }

    #[test]
    fn malformed_addresses_are_address_errors() {
        for raw in [
            "localhost:5570",
            "tcp://localhost",
            "tcp://:5570",
            "tcp://host:99999",
            "inproc://",
            "udp://host:1",
        ] {
            assert!(
                matches!(Address::parse(raw), Err(Error::AddressError { .. })),
                "{raw} should be rejected"
            );
        }
    }
}
