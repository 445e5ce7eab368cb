use crate::config::ClientConfig;
use crate::error::Error;
use pki_types::CertificateDer;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::{TlsConnector, TlsStream};

/// The byte stream a connection runs on, with or without TLS on top. The
/// whole pipeline is generic only over this enum, so the codec never knows
/// which one it got.
pub enum WsStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            WsStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            WsStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            WsStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            WsStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens the TCP leg of a client connection, applying the socket tuning
/// from the configuration before connecting. Every resolved address is
/// tried in order.
pub(crate) async fn connect_tcp(
    host_with_port: &str,
    config: &ClientConfig,
) -> Result<TcpStream, Error> {
    let mut last_err = None;

    for addr in tokio::net::lookup_host(host_with_port).await? {
        match connect_addr(addr, config).await {
            Ok(stream) => {
                stream.set_nodelay(config.tcp_nodelay)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::InvalidURL(host_with_port.to_string())))
}

async fn connect_addr(addr: SocketAddr, config: &ClientConfig) -> Result<TcpStream, Error> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if config.reuse_address {
        socket.set_reuseaddr(true)?;
    }
    if let Some(size) = config.tcp_send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = config.tcp_receive_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(device) = &config.bind_device {
        bind_device(&socket, device)?;
    }

    Ok(socket.connect(addr).await?)
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_device(socket: &TcpSocket, device: &str) -> Result<(), Error> {
    socket
        .bind_device(Some(device.as_bytes()))
        .map_err(|_| Error::InvalidDevice(device.to_string()))
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_device(_socket: &TcpSocket, device: &str) -> Result<(), Error> {
    Err(Error::InvalidDevice(device.to_string()))
}

/// Builds the rustls connector for `wss` targets: webpki roots, plus any
/// extra roots from the configured PEM file.
pub(crate) fn build_tls_connector(ca_file: Option<&str>) -> Result<TlsConnector, Error> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_file {
        let pem =
            std::fs::read(path).map_err(|err| Error::TLSInitializationFailed(err.to_string()))?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<CertificateDer>, _>>()
            .map_err(|err| Error::TLSInitializationFailed(err.to_string()))?;
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|err| Error::TLSInitializationFailed(err.to_string()))?;
        }
    }

    let tls_config = RustlsClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}
