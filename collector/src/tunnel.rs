use std::net::SocketAddr;
use tokio::io;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, error, info};

/// SOCKS5 proxy endpoint, e.g. "tunnel.internal:1080".
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    pub endpoint: String,
}

/// Local forwarder that carries connector traffic through a SOCKS5 proxy.
///
/// The database drivers only dial plain TCP, so when a tunnel is configured
/// the connector binds this forwarder on a loopback port and points its pool
/// at it; every accepted session is SOCKS5-dialed to the real target and the
/// two streams are pumped until either side closes.
pub struct TunnelForwarder {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TunnelForwarder {
    pub async fn start(
        tunnel: &TunnelConfig,
        target_host: &str,
        target_port: u16,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let local_addr = listener.local_addr()?;

        info!(
            local = %local_addr,
            proxy = %tunnel.endpoint,
            target_host = %target_host,
            target_port = target_port,
            "Tunnel forwarder listening"
        );

        let proxy = tunnel.endpoint.clone();
        let host = target_host.to_string();
        let accept_task = tokio::spawn(accept_loop(listener, proxy, host, target_port));

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new sessions. In-flight relays finish on their own.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for TunnelForwarder {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, proxy: String, host: String, port: u16) {
    loop {
        let (inbound, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Tunnel forwarder failed to accept");
                continue;
            }
        };

        debug!(peer = %peer, "Tunnel session accepted");

        let proxy = proxy.clone();
        let host = host.clone();
        tokio::spawn(async move {
            if let Err(e) = relay(inbound, &proxy, &host, port).await {
                error!(peer = %peer, error = %e, "Tunnel session failed");
            }
        });
    }
}

async fn relay(mut inbound: TcpStream, proxy: &str, host: &str, port: u16) -> io::Result<()> {
    let mut outbound = Socks5Stream::connect(proxy, (host, port))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;

    let (sent, received) = io::copy_bidirectional(&mut inbound, &mut outbound).await?;
    debug!(sent = sent, received = received, "Tunnel session closed");
    Ok(())
}
