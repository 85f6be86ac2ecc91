//! The `<protocol>@<address>` scheme used everywhere an endpoint is named,
//! e.g. `tcp@127.0.0.1:9999`, `unix@/tmp/minirpc.sock`, `http@host:80`.

use std::fmt;
use std::str::FromStr;

use crate::error::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Unix,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Unix => "unix",
            Protocol::Http => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcAddr {
    pub protocol: Protocol,
    pub address: String,
}

impl RpcAddr {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            address: address.into(),
        }
    }
}

impl FromStr for RpcAddr {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, address) = s
            .split_once('@')
            .ok_or_else(|| RpcError::InvalidAddress(format!("{s}: expected protocol@addr")))?;
        let protocol = match protocol {
            "tcp" => Protocol::Tcp,
            "unix" => Protocol::Unix,
            "http" => Protocol::Http,
            other => {
                return Err(RpcError::InvalidAddress(format!(
                    "{s}: unknown protocol {other}"
                )))
            }
        };
        if address.is_empty() {
            return Err(RpcError::InvalidAddress(format!("{s}: empty address")));
        }
        Ok(RpcAddr {
            protocol,
            address: address.to_string(),
        })
    }
}

impl fmt::Display for RpcAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.protocol.as_str(), self.address)
    }
}
