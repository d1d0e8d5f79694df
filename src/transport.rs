use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};

/// Transport used by the connection to reach the server.
///
/// The connection applies `resolve_timeout` and `connect_timeout` around
/// these calls; a TLS transport performs its handshake inside `connect` and
/// should honor `ssl_handshake_timeout` itself.
pub trait Connector: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Resolve the host name to candidate endpoints.
    fn resolve(
        &mut self,
        host: &str,
        port: u16,
    ) -> impl std::future::Future<Output = io::Result<Vec<SocketAddr>>> + Send;

    /// Open a duplex byte stream to one endpoint.
    fn connect(
        &mut self,
        addr: SocketAddr,
    ) -> impl std::future::Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn resolve(&mut self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = lookup_host((host, port)).await?.collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            ));
        }
        Ok(addrs)
    }

    async fn connect(&mut self, addr: SocketAddr) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
