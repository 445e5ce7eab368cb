use crate::config::AutoPingConfig;
use crate::connection::{ConnState, ConnectionState};
use crate::error::Error;
use crate::event::{generate_new_uuid, WSEvent};
use crate::frame::Frame;
use crate::write::Writer;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

/// A hyphenated UUID, the correlation token carried in every auto-ping.
pub(crate) const PING_ID_SIZE: usize = 36;

fn new_ping_id() -> [u8; PING_ID_SIZE] {
    let mut id = [0u8; PING_ID_SIZE];
    id.copy_from_slice(generate_new_uuid().hyphenated().to_string().as_bytes());
    id
}

/// Outstanding pings, keyed by correlation id. Each entry holds the expiry
/// task that tears the connection down if the pong never arrives.
#[derive(Default)]
pub(crate) struct PingTracker {
    pending: Mutex<HashMap<[u8; PING_ID_SIZE], JoinHandle<()>>>,
}

impl PingTracker {
    async fn register(&self, id: [u8; PING_ID_SIZE], expiry: JoinHandle<()>) {
        self.pending.lock().await.insert(id, expiry);
    }

    /// Cancels the expiry timer matching this pong payload. Pongs that
    /// don't carry a known correlation id are simply not ours to track.
    pub async fn resolve(&self, payload: &[u8]) -> bool {
        let id: [u8; PING_ID_SIZE] = match payload.try_into() {
            Ok(id) => id,
            Err(_) => return false,
        };
        match self.pending.lock().await.remove(&id) {
            Some(expiry) => {
                expiry.abort();
                true
            }
            None => false,
        }
    }

    /// Takes an id out of the map without touching its task. The expiry
    /// task uses this to check it wasn't cancelled in the meantime.
    async fn claim(&self, id: &[u8; PING_ID_SIZE]) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    pub async fn abort_all(&self) {
        for (_, expiry) in self.pending.lock().await.drain() {
            expiry.abort();
        }
    }
}

/// Drives the auto-ping schedule for one connection: every interval a ping
/// with a fresh correlation id goes out, and an expiry task closes the
/// connection with a timeout when the pong stays away.
pub(crate) fn spawn_keepalive(
    config: AutoPingConfig,
    writer: Arc<Mutex<Writer>>,
    tracker: Arc<PingTracker>,
    state: ConnState,
    events: Sender<Result<WSEvent, Error>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval);
        // the first tick completes immediately, pings start one interval in
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if state.get() != ConnectionState::Open {
                break;
            }

            let id = new_ping_id();
            let expiry = tokio::spawn(expire(
                id,
                config,
                writer.clone(),
                tracker.clone(),
                state.clone(),
                events.clone(),
            ));
            // Registered before the ping leaves, so even an instant pong
            // finds its entry.
            tracker.register(id, expiry).await;

            let sent = writer.lock().await.write_frame(Frame::ping(id.to_vec())).await;
            if let Err(err) = sent {
                debug!("keep-alive ping failed, stopping the schedule: {}", err);
                tracker.resolve(&id).await;
                break;
            }
        }
    })
}

async fn expire(
    id: [u8; PING_ID_SIZE],
    config: AutoPingConfig,
    writer: Arc<Mutex<Writer>>,
    tracker: Arc<PingTracker>,
    state: ConnState,
    events: Sender<Result<WSEvent, Error>>,
) {
    sleep(config.timeout).await;

    // A matching pong already claimed the id, nothing to do.
    if !tracker.claim(&id).await {
        return;
    }

    warn!("ping was not answered within {:?}, closing", config.timeout);
    state.set(ConnectionState::Closed);
    let _ = events.send(Err(Error::WebSocketTimeout)).await;
    let _ = writer.lock().await.shutdown().await;
}
