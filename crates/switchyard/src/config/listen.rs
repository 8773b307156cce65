//! Listen ports and TLS certificate configuration.

use crate::error::StartupError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Certificate/key pair for the TLS listener (PEM files)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CertificatePair {
    /// Path to the certificate chain file
    pub certificate: String,
    /// Path to the private key file
    pub key: String,
}

/// Ports the gateway listens on; every port serves both HTTP and TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    pub host: IpAddr,
    pub ports: Vec<u16>,
}

impl ListenConfig {
    /// Parse a comma-separated port list such as `80,443`.
    pub fn parse_ports(list: &str) -> Result<Self, StartupError> {
        let ports = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u16>().map_err(|_| StartupError::InvalidPort(s.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        if ports.is_empty() {
            return Err(StartupError::InvalidPort(list.to_string()));
        }

        Ok(Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ports,
        })
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.ports
            .iter()
            .map(|port| SocketAddr::new(self.host, *port))
            .collect()
    }
}
