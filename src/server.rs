use crate::config::ServerConfig;
use crate::error::Error;
use crate::event::{generate_new_uuid, Event, EventStream, ShutdownHandle, WSEvent, ID};
use crate::handshake::accept_async_with_config;
use crate::stream::WsStream;
use futures::StreamExt;
use log::{debug, info};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::Sender;
use tokio_rustls::{TlsAcceptor, TlsStream};

/// A ready to use websockets server
///
/// Spawns a websockets server with just several lines of code, accepting
/// the port where it should listen and an optional configuration (frame
/// limits, TLS, permessage-deflate, the acceptance hook). Returns an
/// `EventStream` which implements the Stream trait, delivering every new
/// client connection, message, control event, disconnection and error in
/// order. The stream's shutdown handle stops the accept loop, first call
/// wins and later calls are no-ops.
pub async fn start_server_with_config(
    port: u16,
    config: Option<ServerConfig>,
) -> Result<EventStream, Error> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let (tx, rx) = mpsc::channel(1000);
    let shutdown = ShutdownHandle::new();
    let config = config.unwrap_or_default();

    info!("websocket server listening on port {}", port);

    let accept_shutdown = shutdown.clone();
    // The returned EventStream holds the receiving half, this task keeps
    // feeding it while connections come and go.
    tokio::spawn(async move {
        loop {
            // we are using UUID, which is more flexible and secure than
            // incrementing IDs
            let uuid = generate_new_uuid();
            tokio::select! {
                _ = accept_shutdown.wait() => {
                    debug!("server shutdown requested, leaving the accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_new_connection(
                            uuid,
                            stream,
                            config.clone(),
                            tx.clone(),
                        ));
                    }
                    Err(error) => {
                        if tx.send(Event::Error(uuid, error.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(EventStream::new(rx, shutdown))
}

pub async fn start_server(port: u16) -> Result<EventStream, Error> {
    start_server_with_config(port, None).await
}

async fn handle_new_connection(
    uuid: ID,
    stream: TcpStream,
    config: ServerConfig,
    tx: Sender<Event>,
) {
    let socket_stream = if let Some(tls_config) = config.tls_config.clone() {
        let acceptor = TlsAcceptor::from(tls_config);
        match acceptor.accept(stream).await {
            Ok(tls_stream) => WsStream::Secure(TlsStream::from(tls_stream)),
            Err(error) => {
                let _ = tx.send(Event::Error(uuid, error.into())).await;
                return;
            }
        }
    } else {
        WsStream::Plain(stream)
    };

    let ws_connection = match accept_async_with_config(socket_stream, Some(config)).await {
        Ok(connection) => connection,
        Err(error) => {
            let _ = tx.send(Event::Error(uuid, error)).await;
            return;
        }
    };

    // Splitting the connection, so incoming events are monitored here
    // while the writer half is handed over to the end-user
    let (mut ws_reader, ws_writer) = ws_connection.split();

    if tx.send(Event::NewClient(uuid, ws_writer)).await.is_err() {
        return;
    }

    while let Some(result) = ws_reader.next().await {
        let event = match result {
            Ok(WSEvent::Message(message)) => Event::NewMessage(uuid, message),
            Ok(WSEvent::Ping(payload)) => Event::Ping(uuid, payload),
            Ok(WSEvent::Pong(payload)) => Event::Pong(uuid, payload),
            Ok(WSEvent::Closing(close_frame)) => Event::Closing(uuid, close_frame),
            Err(error) => {
                let _ = tx.send(Event::Error(uuid, error)).await;
                break;
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }

    // The reader draining out means the connection is gone, one way or
    // the other
    let _ = tx.send(Event::Disconnect(uuid)).await;
}
