//! The interception pipeline
//!
//! One [`ProxyListener`] per proxied server port. Each accepted client
//! connection is paired with a fresh upstream connection; the server's
//! welcome packet is captured to key the session ciphers, then two
//! half-sessions relay and decrypt the two directions until either side
//! goes away. Every frame crosses the packet bus so a single consumer can
//! log and forward it in order.

mod bus;
mod consumer;
mod interceptor;
mod redirect;

pub use bus::{channel, PacketMsg, PacketReceiver, PacketSender, BUS_CAPACITY};
pub use consumer::run_consumer;
pub use interceptor::SessionError;

use crate::config::{ProxyEndpoint, ProxyRegistry};
use crate::crypto::Cipher;
use crate::protocol::{
    Header, PatchWelcomePkt, ProtocolError, Variant, WelcomePkt, PATCH_WELCOME_TYPE,
};
use interceptor::Interceptor;
use redirect::RedirectRewriter;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Upper bound on the welcome blob; both welcome variants fit well inside.
const WELCOME_BUF_SIZE: usize = 256;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server closed the connection before sending a welcome packet")]
    EmptyWelcome,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("packet bus closed")]
    BusClosed,
}

/// A listener fronting one proxied server port.
pub struct ProxyListener {
    endpoint: ProxyEndpoint,
    listener: TcpListener,
}

impl ProxyListener {
    /// Bind the listen socket. A bind failure means the port map is wrong
    /// and is fatal to the process, so it surfaces here rather than in
    /// [`run`](Self::run).
    pub async fn bind(mut endpoint: ProxyEndpoint) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(endpoint.listen_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: endpoint.listen_addr,
                source,
            })?;
        // Record the actual address for ephemeral-port binds.
        endpoint.listen_addr = listener.local_addr()?;
        Ok(Self { endpoint, listener })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.listen_addr
    }

    /// The endpoint this listener fronts, with the actual bound address.
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    /// Accept clients forever. Per-session setup failures are logged and
    /// the loop keeps accepting; only the accept loop itself ending is an
    /// error.
    pub async fn run(self, registry: Arc<ProxyRegistry>, bus: PacketSender) {
        info!(
            "Forwarding {} connections on {} to {}",
            self.endpoint.server_name,
            self.endpoint.listen_addr,
            self.endpoint.upstream_addr()
        );

        loop {
            let client = match self.listener.accept().await {
                Ok((client, peer)) => {
                    info!(
                        "Accepted {} proxy connection from {}",
                        self.endpoint.server_name, peer
                    );
                    client
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let endpoint = self.endpoint.clone();
            let registry = registry.clone();
            let bus = bus.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_session(endpoint, registry, bus, client).await {
                    warn!("Failed to set up session: {}", e);
                }
            });
        }
    }
}

/// Set up one intercepted session: dial the upstream server, capture its
/// welcome packet, key the ciphers, and start the two half-sessions.
/// Dropping the sockets on any error here is the whole cleanup.
async fn handle_session(
    endpoint: ProxyEndpoint,
    registry: Arc<ProxyRegistry>,
    bus: PacketSender,
    client: TcpStream,
) -> Result<(), ProxyError> {
    let mut server = TcpStream::connect(endpoint.upstream_addr()).await?;
    info!(
        "Opened {} server connection to {}",
        endpoint.server_name,
        endpoint.upstream_addr()
    );

    // The welcome arrives in one write; a single read is enough as long as
    // it covers the whole welcome packet for the variant in use.
    let mut welcome = vec![0u8; WELCOME_BUF_SIZE];
    let n = server.read(&mut welcome).await?;
    if n == 0 {
        return Err(ProxyError::EmptyWelcome);
    }
    welcome.truncate(n);

    let header = Header::decode(&welcome)?;
    let (variant, client_cipher, server_cipher) = build_ciphers(&welcome, header)?;

    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();
    let client_write = Arc::new(Mutex::new(client_write));
    let server_write = Arc::new(Mutex::new(server_write));

    let client_stop = Arc::new(AtomicBool::new(false));
    let server_stop = Arc::new(AtomicBool::new(false));
    let server_name: Arc<str> = Arc::from(endpoint.server_name.as_str());

    // Publish the welcome before the half-sessions start so it is the
    // first frame the consumer forwards for this session. It established
    // the ciphers and was never itself encrypted, so plaintext and
    // ciphertext coincide.
    bus.send(PacketMsg {
        command: header.ptype,
        size: n as u16,
        data: welcome.clone(),
        plaintext: welcome,
        received_at: Instant::now(),
        server_name: server_name.clone(),
        from_name: "Server",
        to_name: "Client",
        dest: client_write.clone(),
    })
    .await
    .map_err(|_| ProxyError::BusClosed)?;

    let client_side = Interceptor {
        server_name: server_name.clone(),
        from_name: "Client",
        to_name: "Server",
        variant,
        reader: client_read,
        cipher: client_cipher,
        dest: server_write,
        bus: bus.clone(),
        stop: client_stop.clone(),
        partner_stop: server_stop.clone(),
        rewriter: None,
    };
    let server_side = Interceptor {
        server_name,
        from_name: "Server",
        to_name: "Client",
        variant,
        reader: server_read,
        cipher: server_cipher,
        dest: client_write,
        bus,
        stop: server_stop,
        partner_stop: client_stop,
        rewriter: Some(RedirectRewriter::new(registry, variant)),
    };

    tokio::spawn(client_side.run());
    tokio::spawn(server_side.run());
    Ok(())
}

/// Key both directions' ciphers from the welcome blob. The packet type
/// selects the dialect: 0x02 is the Patch welcome, everything else is the
/// Blue Burst welcome.
fn build_ciphers(
    welcome: &[u8],
    header: Header,
) -> Result<(Variant, Cipher, Cipher), ProtocolError> {
    if header.ptype == PATCH_WELCOME_TYPE {
        let pkt = PatchWelcomePkt::decode(welcome)?;
        Ok((
            Variant::Patch,
            Cipher::new_patch(pkt.client_vector),
            Cipher::new_patch(pkt.server_vector),
        ))
    } else {
        let pkt = WelcomePkt::decode(welcome)?;
        Ok((
            Variant::BlueBurst,
            Cipher::new_bb(pkt.client_vector),
            Cipher::new_bb(pkt.server_vector),
        ))
    }
}
