use crate::error::Error;
use crate::frame::CloseFrame;
use crate::message::Message;
use crate::split::WSWriter;
use futures::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::Receiver;
use tokio::sync::Notify;
use uuid::Uuid;

pub type ID = Uuid;

// Used for generating a new UUID, every time a new client connects the server
pub fn generate_new_uuid() -> Uuid {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let buf = rng.random::<[u8; 16]>();

    Uuid::new_v8(buf)
}

/// Everything a single connection reports to its embedder, in wire order.
/// Pings are answered automatically before the event is delivered, and a
/// `Closing` event means the peer started the closing handshake.
#[derive(Debug)]
pub enum WSEvent {
    Message(Message),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Closing(Option<CloseFrame>),
}

// Base enum, used as the structure to represent every single event within
// the websockets server, offering the end-user a practical way of spawning
// a server and handling connections
pub enum Event {
    NewClient(ID, WSWriter),
    NewMessage(ID, Message),
    Ping(ID, Vec<u8>),
    Pong(ID, Vec<u8>),
    Closing(ID, Option<CloseFrame>),
    Disconnect(ID),
    Error(ID, Error),
}

/// Idempotent endpoint shutdown: the first caller flips the flag and wakes
/// the accept loop, every later call is a no-op.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true for the caller that actually performed the shutdown.
    pub fn shutdown(&self) -> bool {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown() {
            return;
        }
        notified.await;
    }
}

// This struct will be used for implementing Stream trait. Thus, the
// end-user doesn't need to interact with the mpsc tokio channel directly
pub struct EventStream {
    receiver: Receiver<Event>,
    shutdown: ShutdownHandle,
}

impl EventStream {
    pub(crate) fn new(receiver: Receiver<Event>, shutdown: ShutdownHandle) -> Self {
        Self { receiver, shutdown }
    }

    /// Handle for stopping the accept loop from anywhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_recv(cx)
    }
}
