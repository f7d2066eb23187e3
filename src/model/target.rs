use std::fmt;
use std::net::IpAddr;

/// Transport protocol of a resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// One candidate endpoint produced by the resolver. Equality covers all
/// fields; the executor relies on it for sticky-first reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub address: IpAddr,
    pub port: u16,
    pub transport: Protocol,
}

impl Target {
    pub fn tcp(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            transport: Protocol::Tcp,
        }
    }

    /// Printable `ip:port` form, with IPv6 addresses bracketed.
    pub fn endpoint(&self) -> String {
        match self.address {
            IpAddr::V4(v4) => format!("{}:{}", v4, self.port),
            IpAddr::V6(v6) => format!("[{}]:{}", v6, self.port),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint())
    }
}
