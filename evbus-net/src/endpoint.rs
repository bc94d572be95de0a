//! ## evbus-net::endpoint
//! Network identity of a bus: a dial/listen address plus the path its RPC
//! operations are exposed under. Several buses can share an address as long
//! as their paths differ.
//!
//! Addresses of the form `:port` listen on every interface and are dialled on
//! loopback.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub path: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
        }
    }

    /// Address handed to the listener.
    pub fn bind_address(&self) -> String {
        match self.address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.address.clone(),
        }
    }

    /// Address used to connect to this endpoint.
    pub fn dial_address(&self) -> String {
        match self.address.strip_prefix(':') {
            Some(port) => format!("127.0.0.1:{port}"),
            None => self.address.clone(),
        }
    }

    /// Endpoint other nodes should use to reach a listener bound at `bound`.
    ///
    /// An explicit `advertise` address wins; a wildcard bind is advertised on
    /// loopback.
    pub fn advertised(bound: SocketAddr, path: &str, advertise: Option<&str>) -> Self {
        if let Some(address) = advertise {
            return Self::new(address, path);
        }
        let ip = match bound.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Self::new(SocketAddr::new(ip, bound.port()).to_string(), path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.address, self.path)
    }
}
