//! Startup configuration: the proxy port map and the endpoint registry

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

/// One proxied server: the port the proxy listens on and the upstream port
/// traffic is forwarded to.
#[derive(Debug, Clone, Deserialize)]
pub struct PortMapping {
    pub name: String,
    pub proxy_port: u16,
    pub server_port: u16,
}

/// The full set of proxied servers.
#[derive(Debug, Clone, Deserialize)]
pub struct PortMap {
    pub mappings: Vec<PortMapping>,
}

impl PortMap {
    /// The standard Blue Burst server set. The patch and data servers are
    /// opt-in since most deployments front an already-patched client.
    pub fn builtin(with_patch: bool) -> Self {
        let mut mappings = Vec::new();
        if with_patch {
            mappings.push(mapping("PATCH", 11000, 11010));
            mappings.push(mapping("DATA", 11001, 11011));
        }
        mappings.push(mapping("LOGIN", 12000, 12010));
        mappings.push(mapping("CHARACTER", 12001, 12011));
        mappings.push(mapping("SHIPGATE", 13000, 13010));
        mappings.push(mapping("SHIP", 15000, 15010));
        mappings.push(mapping("BLOCK1", 15001, 15011));
        mappings.push(mapping("BLOCK2", 15002, 15012));
        Self { mappings }
    }

    /// Load a custom port map from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read port map: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse port map: {}", e)))
    }
}

fn mapping(name: &str, proxy_port: u16, server_port: u16) -> PortMapping {
    PortMapping {
        name: name.to_string(),
        proxy_port,
        server_port,
    }
}

/// One proxied server's addresses. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    pub server_name: String,
    pub listen_addr: SocketAddr,
    pub upstream_host: String,
    pub upstream_port: u16,
}

impl ProxyEndpoint {
    /// The upstream dial target as `host:port`.
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.upstream_host, self.upstream_port)
    }
}

/// The process-wide endpoint registry, shared by every listener and used by
/// the redirect rewriter to translate server ports into proxy ports.
/// Immutable after startup; read concurrently without locks.
#[derive(Debug)]
pub struct ProxyRegistry {
    endpoints: Vec<ProxyEndpoint>,
    redirect_ip: [u8; 4],
}

impl ProxyRegistry {
    /// Build the registry for `map`, listening on `host` and forwarding to
    /// `server_host`. `host` is also the address stamped into rewritten
    /// redirects.
    pub fn new(host: Ipv4Addr, server_host: &str, map: &PortMap) -> Self {
        let endpoints = map
            .mappings
            .iter()
            .map(|m| ProxyEndpoint {
                server_name: m.name.clone(),
                listen_addr: SocketAddr::V4(SocketAddrV4::new(host, m.proxy_port)),
                upstream_host: server_host.to_string(),
                upstream_port: m.server_port,
            })
            .collect();
        Self::from_endpoints(endpoints, host.octets())
    }

    /// Build from pre-constructed endpoints. Useful when listen ports are
    /// only known after binding.
    pub fn from_endpoints(endpoints: Vec<ProxyEndpoint>, redirect_ip: [u8; 4]) -> Self {
        Self {
            endpoints,
            redirect_ip,
        }
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }

    /// The 4-byte address stamped into rewritten redirect packets.
    pub fn redirect_ip(&self) -> [u8; 4] {
        self.redirect_ip
    }

    /// Map an upstream server port to the proxy port fronting it.
    pub fn translate_port(&self, upstream_port: u16) -> Option<u16> {
        self.endpoints
            .iter()
            .find(|e| e.upstream_port == upstream_port)
            .map(|e| e.listen_addr.port())
    }
}
