use futures::StreamExt;
use rand::distr::Alphanumeric;
use rand::Rng;
use socket_tide::handshake::connect_async;
use socket_tide::WSEvent;
use tokio::select;
use tokio::time::{interval, Duration};

async fn handle_connection(addr: &str) {
    match connect_async(addr).await {
        Ok(mut connection) => {
            let mut ticker = interval(Duration::from_secs(5));
            // it will be used for closing the connection
            let mut counter = 0;

            loop {
                select! {
                    event = connection.next() => {
                        match event {
                            Some(Ok(WSEvent::Message(message))) => {
                                println!("Received message: {}", message.as_text().unwrap_or_default());
                                counter += 1;
                                // close the connection once 3 messages went back and forth
                                if counter >= 3 {
                                    if connection.close(1000, "done").await.is_err() {
                                        eprintln!("Error occurred when closing connection");
                                    }
                                    break;
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                eprintln!("Received error from the stream: {}", err);
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let random_string = generate_random_string();

                        if connection.send_as_text(random_string).await.is_err() {
                            eprintln!("Failed to send message");
                            break;
                        }
                    }
                }
            }
        }
        Err(err) => eprintln!("Error when performing handshake: {}", err),
    }
}

#[tokio::main]
async fn main() {
    handle_connection("ws://127.0.0.1:9002").await;
}

fn generate_random_string() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}
