//! Transport abstraction (plain TCP vs TLS)

use crate::Result;
use bytes::BytesMut;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Byte stream under a connection: plain for `ws://`, TLS for `wss://`
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
        }
    }
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Plain(stream))
    }

    /// Connect via TCP and complete a TLS handshake with the given client
    /// configuration. The trust decision runs inside the handshake through
    /// whatever verifier the configuration carries.
    pub async fn connect_tls(
        host: &str,
        port: u16,
        client_config: Arc<ClientConfig>,
    ) -> Result<Self> {
        let tcp_stream = TcpStream::connect((host, port)).await?;
        tcp_stream.set_nodelay(true)?;

        let server_name = super::tls::server_name(host)?;
        let tls_connector = tokio_rustls::TlsConnector::from(client_config);
        let tls_stream = tls_connector.connect(server_name, tcp_stream).await?;

        Ok(Transport::Tls(tls_stream))
    }

    /// Whether the transport is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write all bytes to the stream
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            Transport::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the stream
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read into buffer; returns the number of bytes read (0 = EOF)
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        // Port 1 on localhost is essentially never listening
        let result = Transport::connect("127.0.0.1", 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_plain_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = Transport::connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(!transport.is_tls());
        transport.write_all(b"ping").await.unwrap();
        transport.flush().await.unwrap();

        let mut buf = BytesMut::new();
        while buf.len() < 4 {
            let n = transport.read_buf(&mut buf).await.unwrap();
            assert_ne!(n, 0);
        }
        assert_eq!(&buf[..], b"ping");
        server.await.unwrap();
    }
}
