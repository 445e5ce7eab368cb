#![no_main]

use libfuzzer_sys::fuzz_target;
use socket_tide::handshake::accept_async;
use socket_tide::stream::WsStream;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

// Feeds arbitrary bytes into the server side of the opening handshake. The
// upgrade must either succeed or fail with a proper error, never panic.
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();
    let data = data.to_vec();

    runtime.block_on(async move {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok(mut socket) = TcpStream::connect(addr).await {
                let _ = socket.write_all(&data).await;
                let _ = socket.shutdown().await;
            }
        });

        if let Ok((stream, _)) = listener.accept().await {
            let _ = accept_async(WsStream::Plain(stream)).await;
        }
    });
});
