use futures::StreamExt;
use log::*;
use socket_tide::server::start_server_with_config;
use socket_tide::{DeflateOptions, Event, ServerConfig, WebSocketConfig};
use std::collections::HashMap;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig {
        web_socket_config: Some(WebSocketConfig {
            extensions: Some(DeflateOptions::default()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut events = start_server_with_config(9002, Some(config))
        .await
        .expect("Can't listen");
    let mut clients = HashMap::new();

    while let Some(event) = events.next().await {
        match event {
            Event::NewClient(id, writer) => {
                info!("client {} connected", id);
                clients.insert(id, writer);
            }
            Event::NewMessage(id, message) => {
                if let Some(writer) = clients.get_mut(&id) {
                    if let Err(err) = writer.send_message(message).await {
                        error!("failed to echo to {}: {}", id, err);
                    }
                }
            }
            Event::Closing(id, close_frame) => {
                info!("client {} started closing: {:?}", id, close_frame)
            }
            Event::Disconnect(id) => {
                info!("client {} disconnected", id);
                clients.remove(&id);
            }
            Event::Error(id, err) => warn!("client {} error: {}", id, err),
            Event::Ping(..) | Event::Pong(..) => {}
        }
    }
}
