use crate::config::{AcceptDecision, ClientConfig, LeftoverBytes, ServerConfig, WebSocketConfig};
use crate::connection::{ConnState, ConnectionState, WSConnection};
use crate::deflate::{DeflateDecoder, DeflateEncoder};
use crate::error::Error;
use crate::extensions::{accept_client, negotiate_server, NegotiatedDeflate};
use crate::keepalive::{spawn_keepalive, PingTracker};
use crate::read::{ReadStream, ReaderKind};
use crate::request::{construct_http_request, HttpRequest, HttpResponse};
use crate::split::{WSReader, WSWriter};
use crate::stream::{build_tls_connector, connect_tcp, WsStream};
use crate::utils::{generate_websocket_accept_value, generate_websocket_key, status_reason};
use crate::write::{Writer, WriterKind};
use log::debug;
use pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::TlsStream;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_CHANNEL_SIZE: usize = 100;

/// Accepts a WebSocket upgrade on an already-established stream using the
/// default configuration.
pub async fn accept_async(stream: WsStream) -> Result<WSConnection, Error> {
    accept_async_with_config(stream, None).await
}

/// Accepts a WebSocket upgrade on an already-established stream. Runs the
/// full server side of the opening handshake: request validation, the
/// acceptance hook, extension negotiation and the 101 response. After this
/// returns, the stream speaks frames only.
pub async fn accept_async_with_config(
    stream: WsStream,
    config: Option<ServerConfig>,
) -> Result<WSConnection, Error> {
    let config = config.unwrap_or_default();
    let ws_config = config.web_socket_config.clone().unwrap_or_default();
    ws_config.validate()?;

    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    let request = HttpRequest::parse(&mut buf_reader, ws_config.connection_timeout).await?;

    if request.method != "GET" {
        reject(&mut write_half, 405).await;
        return Err(Error::MethodNotAllowed);
    }
    if request.version != "HTTP/1.1" {
        reject(&mut write_half, 400).await;
        return Err(Error::InvalidHTTPHandshake);
    }
    if !request.uri.starts_with('/') {
        reject(&mut write_half, 400).await;
        return Err(Error::InvalidURL(request.uri.clone()));
    }

    if let Err(error) = validate_upgrade_headers(&request) {
        reject(&mut write_half, 400).await;
        return Err(error);
    }

    let key = match request.header("sec-websocket-key") {
        Some(key) => key.to_string(),
        None => {
            reject(&mut write_half, 400).await;
            return Err(Error::NoSecWebsocketKey);
        }
    };

    // The embedder gets a veto, and a chance to decorate the response
    let mut extra_headers = Vec::new();
    if let Some(hook) = &config.accept_hook {
        match hook(&request) {
            AcceptDecision::Accept(headers) => extra_headers = headers,
            AcceptDecision::Reject(status) => {
                reject(&mut write_half, status).await;
                return Err(Error::NotUpgraded);
            }
        }
    }

    let negotiated = match &ws_config.extensions {
        Some(options) => {
            let offered = request.header_values("sec-websocket-extensions");
            match negotiate_server(options, &offered) {
                Ok(result) => result,
                Err(error) => {
                    reject(&mut write_half, 400).await;
                    return Err(error);
                }
            }
        }
        None => None,
    };

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n",
        generate_websocket_accept_value(&key),
    );
    if let Some((_, extension_header)) = &negotiated {
        response.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", extension_header));
    }
    for (name, value) in extra_headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");

    write_half.write_all(response.as_bytes()).await?;
    write_half.flush().await?;

    debug!("accepted websocket upgrade for {}", request.uri);

    Ok(build_connection(
        buf_reader,
        write_half,
        ReaderKind::Server,
        ws_config,
        negotiated.map(|(params, _)| params),
    ))
}

fn validate_upgrade_headers(request: &HttpRequest) -> Result<(), Error> {
    let upgrade = request.header("upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.to_lowercase().contains("websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    let connection = request
        .header("connection")
        .ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection.to_lowercase().contains("upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }

    if request.header("host").is_none() {
        return Err(Error::NoHostHeaderPresent);
    }

    if request.header("sec-websocket-version") != Some("13") {
        return Err(Error::InvalidHTTPHandshake);
    }

    Ok(())
}

// A refused upgrade gets an empty HTTP response and loses the channel, the
// TCP connection never reaches the frame layer. Best effort: the refusal
// itself is what the caller needs to hear about, not a broken pipe while
// delivering it.
async fn reject(write_half: &mut WriteHalf<WsStream>, status: u16) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status,
        status_reason(status),
    );
    if write_half.write_all(response.as_bytes()).await.is_ok() {
        let _ = write_half.shutdown().await;
    }
}

/// Connects to a `ws://` or `wss://` endpoint with default configuration.
pub async fn connect_async(addr: &str) -> Result<WSConnection, Error> {
    connect_async_with_config(addr, None, ClientConfig::default()).await
}

/// Connects to a WebSocket endpoint: TCP (with the configured socket
/// tuning), optional TLS, then the upgrade exchange. Additional headers
/// are merged into the request without touching the protocol ones. The
/// whole bootstrap is bounded by `connection_timeout`.
pub async fn connect_async_with_config(
    addr: &str,
    extra_headers: Option<Vec<(String, String)>>,
    config: ClientConfig,
) -> Result<WSConnection, Error> {
    let ws_config = config.web_socket_config.clone();
    ws_config.validate()?;

    timeout(
        ws_config.connection_timeout,
        client_upgrade(addr, extra_headers.unwrap_or_default(), config, ws_config),
    )
    .await?
}

async fn client_upgrade(
    addr: &str,
    extra_headers: Vec<(String, String)>,
    config: ClientConfig,
    ws_config: WebSocketConfig,
) -> Result<WSConnection, Error> {
    let key = generate_websocket_key();
    let (request, host_with_port, host, use_tls) = construct_http_request(
        addr,
        &key,
        ws_config.extensions.as_ref(),
        &extra_headers,
    )?;

    let tcp_stream = connect_tcp(&host_with_port, &config).await?;

    let stream = if use_tls {
        let connector = build_tls_connector(config.ca_file.as_deref())?;
        let server_name = ServerName::try_from(host)?;
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        WsStream::Secure(TlsStream::from(tls_stream))
    } else {
        WsStream::Plain(tcp_stream)
    };

    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    write_half.write_all(request.as_bytes()).await?;
    write_half.flush().await?;

    let response = HttpResponse::parse(&mut buf_reader, ws_config.connection_timeout).await?;

    if response.status != 101 {
        return Err(Error::NotUpgraded);
    }
    if !response
        .header("upgrade")
        .map(|value| value.to_lowercase().contains("websocket"))
        .unwrap_or_default()
    {
        return Err(Error::NoUpgradeHeaderPresent);
    }
    if !response
        .header("connection")
        .map(|value| value.to_lowercase().contains("upgrade"))
        .unwrap_or_default()
    {
        return Err(Error::NoConnectionHeaderPresent);
    }
    if response.header("sec-websocket-accept") != Some(generate_websocket_accept_value(&key).as_str())
    {
        return Err(Error::InvalidAcceptKey);
    }

    let negotiated = match &ws_config.extensions {
        Some(options) => {
            accept_client(options, &response.header_values("sec-websocket-extensions"))?
        }
        None => None,
    };

    // Bytes the server pushed right behind its 101 are still sitting in
    // the buffered reader. Forward keeps them for the codec, Drop starts
    // clean from the next socket read.
    if ws_config.leftover_bytes == LeftoverBytes::Drop {
        let buffered = buf_reader.buffer().len();
        buf_reader.consume(buffered);
    }

    Ok(build_connection(
        buf_reader,
        write_half,
        ReaderKind::Client,
        ws_config,
        negotiated,
    ))
}

// Wires one upgraded stream into the running connection: the shared
// writer, the reader task, the deflate session halves and the keep-alive
// schedule. Used identically by both roles.
fn build_connection(
    buf_reader: BufReader<ReadHalf<WsStream>>,
    write_half: WriteHalf<WsStream>,
    kind: ReaderKind,
    config: WebSocketConfig,
    negotiated: Option<NegotiatedDeflate>,
) -> WSConnection {
    let writer_kind = match kind {
        ReaderKind::Client => WriterKind::Client,
        ReaderKind::Server => WriterKind::Server,
    };
    let writer = Arc::new(Mutex::new(Writer::new(
        write_half,
        writer_kind,
        config.write_buffer_low_watermark,
        config.write_buffer_high_watermark,
    )));

    let state = ConnState::new(ConnectionState::Open);
    let ping_tracker = Arc::new(PingTracker::default());
    let (read_tx, read_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    let decoder = negotiated.as_ref().map(DeflateDecoder::new);
    let encoder = negotiated.as_ref().map(DeflateEncoder::new);

    let keepalive = config.auto_ping.map(|auto_ping| {
        spawn_keepalive(
            auto_ping,
            writer.clone(),
            ping_tracker.clone(),
            state.clone(),
            read_tx.clone(),
        )
    });

    let read_stream = ReadStream::new(
        kind,
        buf_reader,
        read_tx,
        writer.clone(),
        config.clone(),
        decoder,
        state.clone(),
        ping_tracker,
    );
    tokio::spawn(read_stream.run(keepalive));

    let reader = WSReader::new(ReceiverStream::new(read_rx));
    let writer = WSWriter::new(writer, config, state, encoder);
    WSConnection::new(reader, writer)
}
