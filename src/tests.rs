#[cfg(test)]
mod tests {
    use crate::config::{AutoPingConfig, ClientConfig, ServerConfig, WebSocketConfig};
    use crate::connection::ConnectionState;
    use crate::error::Error;
    use crate::event::WSEvent;
    use crate::extensions::DeflateOptions;
    use crate::frame::{CloseFrame, OpCode};
    use crate::handshake::{accept_async_with_config, connect_async, connect_async_with_config};
    use crate::message::Message;
    use crate::request::construct_http_request;
    use crate::server::start_server_with_config;
    use crate::stream::WsStream;
    use crate::utils::generate_websocket_accept_value;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    #[test]
    fn test_opcode() {
        let res = OpCode::from(0x0).unwrap();
        assert_eq!(res, OpCode::Continue);

        assert_eq!(OpCode::Text.as_u8(), 0x1);
        assert_eq!(OpCode::Close.is_control(), true);
        assert_eq!(OpCode::Text.is_control(), false);

        // the reserved opcode ranges must be refused outright
        for reserved in (0x3..=0x7).chain(0xB..=0xF) {
            assert!(matches!(
                OpCode::from(reserved),
                Err(Error::UnknownOpCode(byte)) if byte == reserved
            ));
        }
    }

    #[test]
    fn test_close_frame_parsing() {
        assert!(CloseFrame::parse(&[]).unwrap().is_none());
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(Error::InvalidClosePayload)
        ));

        let close_frame = CloseFrame::parse(&[0x03, 0xE8, b'b', b'y', b'e'])
            .unwrap()
            .unwrap();
        assert_eq!(close_frame.code, 1000);
        assert_eq!(close_frame.reason, "bye");
        assert_eq!(close_frame.to_payload(), vec![0x03, 0xE8, b'b', b'y', b'e']);

        // reasons must be valid UTF-8
        assert!(matches!(
            CloseFrame::parse(&[0x03, 0xE8, 0xFF, 0xFE]),
            Err(Error::InvalidUTF8String)
        ));
    }

    #[test]
    fn test_close_code_filtering() {
        for allowed in [1000, 1001, 1003, 1007, 1011, 3000, 4999] {
            assert!(CloseFrame::is_allowed_on_wire(allowed), "{}", allowed);
        }
        for forbidden in [999, 1004, 1005, 1006, 1012, 2999, 5000] {
            assert!(!CloseFrame::is_allowed_on_wire(forbidden), "{}", forbidden);
        }

        assert_eq!(CloseFrame::sanitize_code(1005), 1000);
        assert_eq!(CloseFrame::sanitize_code(1006), 1000);
        assert_eq!(CloseFrame::sanitize_code(4000), 4000);

        for forbidden in [1005u16, 1006] {
            let parsed = CloseFrame::parse(&forbidden.to_be_bytes());
            assert!(matches!(parsed, Err(Error::InvalidCloseCode(code)) if code == forbidden));
        }
    }

    #[test]
    fn test_construct_http_request() {
        let (request, host_with_port, host, use_tls) = construct_http_request(
            "ws://localhost:8080/chat?room=1",
            "dGhlIHNhbXBsZSBub25jZQ==",
            None,
            &[],
        )
        .unwrap();
        assert_eq!(host_with_port, "localhost:8080");
        assert_eq!(host, "localhost");
        assert!(!use_tls);
        assert!(request.starts_with("GET /chat?room=1 HTTP/1.1"));
        assert!(request.contains("Host: localhost:8080"));
        assert!(request.contains("Upgrade: websocket"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ=="));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_construct_http_request_defaults_and_tls() {
        let (request, host_with_port, _, use_tls) =
            construct_http_request("wss://example.com", "a2V5", None, &[]).unwrap();
        assert!(use_tls);
        assert_eq!(host_with_port, "example.com:443");
        // no explicit port in the URL, none in the Host header
        assert!(request.contains("Host: example.com\r\n"));
    }

    #[test]
    fn test_construct_http_request_headers() {
        let options = DeflateOptions {
            client_max_window_bits: Some(10),
            ..Default::default()
        };
        let extra = vec![
            ("Authorization".to_string(), "Bearer token".to_string()),
            // protocol headers can't be overridden by the caller
            ("Upgrade".to_string(), "h2c".to_string()),
        ];
        let (request, _, _, _) =
            construct_http_request("ws://localhost:9000", "a2V5", Some(&options), &extra).unwrap();
        assert!(request
            .contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits=10"));
        assert!(request.contains("Authorization: Bearer token"));
        assert!(!request.contains("h2c"));
    }

    #[test]
    fn test_construct_http_request_invalid_urls() {
        assert!(matches!(
            construct_http_request("ftp://localhost:8080", "a2V5", None, &[]),
            Err(Error::InvalidURL(_))
        ));
        assert!(construct_http_request("ws://:8080", "a2V5", None, &[]).is_err());
    }

    #[test]
    fn test_message_fragmentation_composition() {
        let message = Message::Binary((0u8..10).collect());
        let frames = message.clone().into_frames(3);

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert!(!frames[0].final_fragment);
        for frame in &frames[1..] {
            assert_eq!(frame.opcode, OpCode::Continue);
        }
        assert!(frames[3].final_fragment);

        let reassembled: Vec<u8> = frames.iter().flat_map(|frame| frame.payload.clone()).collect();
        assert_eq!(reassembled, message.into_payload());

        // small enough payloads stay whole
        let frames = Message::Text("hi".to_string()).into_frames(1024);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].final_fragment);
    }

    #[test]
    fn test_config_validation() {
        let config = WebSocketConfig {
            write_buffer_low_watermark: 128 << 10,
            write_buffer_high_watermark: 64 << 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidWatermarks)));

        let config = WebSocketConfig {
            extensions: Some(DeflateOptions {
                server_max_window_bits: Some(16),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidMaxWindowBits)));

        assert!(WebSocketConfig::default().validate().is_ok());
    }

    fn url(port: u16) -> String {
        format!("ws://127.0.0.1:{}", port)
    }

    // A plain echo endpoint accepting a single configuration for all of
    // its connections.
    async fn spawn_echo_server(config: Option<ServerConfig>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let config = config.clone();
                tokio::spawn(async move {
                    let connection =
                        accept_async_with_config(WsStream::Plain(stream), config).await;
                    if let Ok(connection) = connection {
                        let (mut reader, mut writer) = connection.split();
                        while let Some(Ok(event)) = reader.next().await {
                            if let WSEvent::Message(message) = event {
                                if writer.send_message(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        port
    }

    #[tokio::test]
    async fn echo_text_round_trip() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Open);

        connection.send_as_text("hello".to_string()).await.unwrap();

        match timeout(Duration::from_secs(5), connection.next()).await.unwrap() {
            Some(Ok(WSEvent::Message(Message::Text(text)))) => assert_eq!(text, "hello"),
            other => panic!("expected the text echoed back, got {:?}", other),
        }

        connection.close(1000, "done").await.unwrap();
    }

    #[tokio::test]
    async fn fragmented_binary_delivers_one_message() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        let payload = vec![1u8, 2, 3, 4, 5, 6];
        connection
            .send_fragmented(Message::Binary(payload.clone()), 3)
            .await
            .unwrap();

        match timeout(Duration::from_secs(5), connection.next()).await.unwrap() {
            Some(Ok(WSEvent::Message(Message::Binary(data)))) => assert_eq!(data, payload),
            other => panic!("expected the binary echoed back, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn caller_sequenced_fragments_deliver_one_message() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        connection
            .send_frame(vec![1, 2, 3], OpCode::Binary, false)
            .await
            .unwrap();
        connection
            .send_frame(vec![4, 5, 6], OpCode::Continue, true)
            .await
            .unwrap();

        match timeout(Duration::from_secs(5), connection.next()).await.unwrap() {
            Some(Ok(WSEvent::Message(Message::Binary(data)))) => {
                assert_eq!(data, vec![1, 2, 3, 4, 5, 6])
            }
            other => panic!("expected the assembled binary echoed back, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ping_is_answered_with_matching_pong() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        connection.send_ping(b"probe".to_vec()).await.unwrap();

        match timeout(Duration::from_secs(5), connection.next()).await.unwrap() {
            Some(Ok(WSEvent::Pong(payload))) => assert_eq!(payload, b"probe"),
            other => panic!("expected a pong, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn client_initiated_close_handshake_completes() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        connection.close(1000, "bye").await.unwrap();

        // the server's echo finishes the handshake and the stream drains
        let drained = timeout(Duration::from_secs(5), async {
            while connection.next().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn server_initiated_close_reaches_the_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let connection = accept_async_with_config(WsStream::Plain(stream), None)
                .await
                .unwrap();
            let (mut reader, mut writer) = connection.split();
            // close as soon as the first message shows up
            while let Some(Ok(event)) = reader.next().await {
                if matches!(event, WSEvent::Message(_)) {
                    writer.close(1000, "bye").await.unwrap();
                }
            }
        });

        let mut connection = connect_async(&url(port)).await.unwrap();
        connection.send_as_text("trigger".to_string()).await.unwrap();

        let closing = timeout(Duration::from_secs(5), async {
            while let Some(event) = connection.next().await {
                if let Ok(WSEvent::Closing(close_frame)) = event {
                    return close_frame;
                }
            }
            None
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(closing.code, 1000);
        assert_eq!(closing.reason, "bye");
    }

    #[tokio::test]
    async fn oversize_close_reason_is_rejected_locally() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        let reason = "x".repeat(124);
        assert!(matches!(
            connection.close(1000, &reason).await,
            Err(Error::CloseReasonTooLong)
        ));

        // nothing was sent, the connection is still healthy
        assert_eq!(connection.state(), ConnectionState::Open);
        connection.send_as_text("still alive".to_string()).await.unwrap();
        match timeout(Duration::from_secs(5), connection.next()).await.unwrap() {
            Some(Ok(WSEvent::Message(Message::Text(text)))) => assert_eq!(text, "still alive"),
            other => panic!("expected an echo, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn deflate_round_trip_over_the_wire() {
        let server_config = ServerConfig {
            web_socket_config: Some(WebSocketConfig {
                extensions: Some(DeflateOptions::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let port = spawn_echo_server(Some(server_config)).await;

        let client_config = ClientConfig {
            web_socket_config: WebSocketConfig {
                extensions: Some(DeflateOptions::default()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut connection = connect_async_with_config(&url(port), None, client_config)
            .await
            .unwrap();

        let text = "A".repeat(1024);
        connection.send_as_text(text.clone()).await.unwrap();

        match timeout(Duration::from_secs(5), connection.next()).await.unwrap() {
            Some(Ok(WSEvent::Message(Message::Text(echoed)))) => assert_eq!(echoed, text),
            other => panic!("expected the compressed text echoed back, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn small_fragments_close_the_connection() {
        let server_config = ServerConfig {
            web_socket_config: Some(WebSocketConfig {
                min_non_final_fragment_size: 5,
                ..Default::default()
            }),
            ..Default::default()
        };
        let port = spawn_echo_server(Some(server_config)).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        connection
            .send_fragmented(Message::Binary(vec![0u8; 9]), 3)
            .await
            .unwrap();

        let closing = timeout(Duration::from_secs(5), async {
            while let Some(event) = connection.next().await {
                if let Ok(WSEvent::Closing(close_frame)) = event {
                    return close_frame;
                }
            }
            None
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(closing.code, 1002);
    }

    async fn read_http_head(stream: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer hung up during the HTTP exchange");
            head.extend_from_slice(&chunk[..n]);
            if head.windows(4).any(|window| window == b"\r\n\r\n") {
                return String::from_utf8_lossy(&head).to_string();
            }
        }
    }

    // Wire-level checks against a raw TCP socket, with the handshake
    // request from RFC 6455 section 1.2.
    async fn raw_upgrade(port: u16) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = "GET / HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();

        let head = read_http_head(&mut stream).await;
        assert!(head.starts_with("HTTP/1.1 101"));
        assert!(head.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        stream
    }

    #[tokio::test]
    async fn masked_hello_echoes_unmasked() {
        let port = spawn_echo_server(None).await;
        let mut stream = raw_upgrade(port).await;

        // "Hello" under the mask 37 fa 21 3d, RFC 6455 5.7
        let frame = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        stream.write_all(&frame).await.unwrap();

        // the server echoes without a mask: two header bytes + payload
        let mut echoed = [0u8; 7];
        timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&echoed, &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn unmasked_client_frame_fails_the_connection() {
        let port = spawn_echo_server(None).await;
        let mut stream = raw_upgrade(port).await;

        stream
            .write_all(&[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'])
            .await
            .unwrap();

        let mut close = [0u8; 4];
        timeout(Duration::from_secs(5), stream.read_exact(&mut close))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(close[0], 0x88);
        assert_eq!(close[1], 0x02);
        assert_eq!(u16::from_be_bytes([close[2], close[3]]), 1002);
    }

    #[tokio::test]
    async fn invalid_utf8_text_closes_with_1007() {
        let port = spawn_echo_server(None).await;
        let mut stream = raw_upgrade(port).await;

        // masked with an all-zero key, the payload bytes are not UTF-8
        stream
            .write_all(&[0x81, 0x82, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFE])
            .await
            .unwrap();

        let mut close = [0u8; 4];
        timeout(Duration::from_secs(5), stream.read_exact(&mut close))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(close[0], 0x88);
        assert_eq!(u16::from_be_bytes([close[2], close[3]]), 1007);
    }

    // Speaks just enough HTTP to upgrade, then ignores every frame, so
    // auto-ping timeouts have nothing answering them.
    async fn spawn_silent_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let head = read_http_head(&mut stream).await;
            let key = head
                .lines()
                .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
                .unwrap()
                .trim()
                .to_string();
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                generate_websocket_accept_value(&key),
            );
            stream.write_all(response.as_bytes()).await.unwrap();

            let mut chunk = [0u8; 1024];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        port
    }

    #[tokio::test]
    async fn unanswered_ping_times_out_the_connection() {
        let port = spawn_silent_server().await;

        let client_config = ClientConfig {
            web_socket_config: WebSocketConfig {
                auto_ping: Some(AutoPingConfig {
                    interval: Duration::from_millis(50),
                    timeout: Duration::from_millis(100),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut connection = connect_async_with_config(&url(port), None, client_config)
            .await
            .unwrap();

        let timed_out = timeout(Duration::from_secs(5), async {
            while let Some(event) = connection.next().await {
                if matches!(event, Err(Error::WebSocketTimeout)) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();

        assert!(timed_out);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn answered_pings_keep_the_connection_alive() {
        // the peer's automatic pongs echo our correlation ids, so no
        // expiry timer should ever fire
        let port = spawn_echo_server(None).await;

        let client_config = ClientConfig {
            web_socket_config: WebSocketConfig {
                auto_ping: Some(AutoPingConfig {
                    interval: Duration::from_millis(50),
                    timeout: Duration::from_millis(150),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut connection = connect_async_with_config(&url(port), None, client_config)
            .await
            .unwrap();

        // enough wall time for several ping cycles
        let survived = timeout(Duration::from_millis(600), async {
            while let Some(event) = connection.next().await {
                if matches!(event, Err(Error::WebSocketTimeout)) {
                    return false;
                }
            }
            false
        })
        .await
        .is_err();

        assert!(survived);
        assert_eq!(connection.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn oversize_frame_closes_with_1009() {
        let server_config = ServerConfig {
            web_socket_config: Some(WebSocketConfig {
                max_frame_size: Some(8),
                ..Default::default()
            }),
            ..Default::default()
        };
        let port = spawn_echo_server(Some(server_config)).await;
        let mut stream = raw_upgrade(port).await;

        // a 16-byte masked binary frame against an 8-byte limit
        let mut frame = vec![0x82, 0x90, 0x00, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0xAB; 16]);
        stream.write_all(&frame).await.unwrap();

        let mut close = [0u8; 4];
        timeout(Duration::from_secs(5), stream.read_exact(&mut close))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(close[0], 0x88);
        assert_eq!(u16::from_be_bytes([close[2], close[3]]), 1009);
    }

    #[tokio::test]
    async fn sending_while_closed_is_rejected() {
        let port = spawn_echo_server(None).await;
        let mut connection = connect_async(&url(port)).await.unwrap();

        connection.close(1000, "").await.unwrap();
        assert!(matches!(
            connection.send_as_text("late".to_string()).await,
            Err(Error::WebSocketNotConnected)
        ));
        // a second close while the first is in flight is a quiet no-op
        assert!(connection.close(1000, "").await.is_ok());
    }

    #[tokio::test]
    async fn server_shutdown_is_idempotent() {
        let events = start_server_with_config(0, None).await.unwrap();
        let shutdown = events.shutdown_handle();

        assert!(shutdown.shutdown());
        assert!(!shutdown.shutdown());
        assert!(shutdown.is_shutdown());
    }
}
