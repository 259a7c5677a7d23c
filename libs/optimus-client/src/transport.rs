//! Transports backing the result channel
//!
//! - `RedisTransport`: judge frames arrive on a per-session pub/sub channel,
//!   control frames are published on its outbound twin
//! - `MemoryTransport`: in-process fake driven by a [`MemoryHandle`] (testing)

use crate::channel::{Link, Transport};
use crate::error::ChannelError;
use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use optimus_common::redis as keys;
use redis::aio::ConnectionManager;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RedisTransport
// ---------------------------------------------------------------------------

pub struct RedisTransport {
    client: redis::Client,
    inbound: String,
    outbound: String,
}

impl RedisTransport {
    pub fn new(redis_url: &str, session_id: &Uuid) -> Result<Self, ChannelError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            inbound: keys::inbound_channel(session_id),
            outbound: keys::outbound_channel(session_id),
        })
    }
}

type MessageStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

struct RedisLink {
    messages: MessageStream,
    publisher: ConnectionManager,
    outbound: String,
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&self) -> Result<Box<dyn Link>, ChannelError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&self.inbound).await?;

        let publisher = ConnectionManager::new(self.client.clone()).await?;

        info!(inbound = %self.inbound, outbound = %self.outbound, "Subscribed to session channel");
        Ok(Box::new(RedisLink {
            messages: Box::pin(pubsub.into_on_message()),
            publisher,
            outbound: self.outbound.clone(),
        }))
    }
}

#[async_trait]
impl Link for RedisLink {
    async fn recv(&mut self) -> Option<String> {
        let msg = self.messages.next().await?;
        Some(String::from_utf8_lossy(msg.get_payload_bytes()).into_owned())
    }

    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        keys::publish_frame(&mut self.publisher, &self.outbound, &frame).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    refuse: bool,
    connect_attempts: u32,
    inbound_tx: Option<mpsc::UnboundedSender<String>>,
    sent: Vec<String>,
}

type SharedState = Arc<Mutex<MemoryState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MemoryState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory transport for tests; one live link at a time
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: SharedState,
}

/// Test-side controls for a [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: SharedState,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryHandle) {
        let state = SharedState::default();
        (
            Self {
                state: state.clone(),
            },
            MemoryHandle { state },
        )
    }
}

impl MemoryHandle {
    /// Deliver a raw frame on the live link; false when not connected
    pub fn push_frame(&self, frame: &str) -> bool {
        let state = lock(&self.state);
        match &state.inbound_tx {
            Some(tx) => tx.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    /// Drop the live link as if the network went away
    pub fn drop_connection(&self) {
        lock(&self.state).inbound_tx = None;
    }

    /// Make further connection attempts fail
    pub fn set_refuse(&self, refuse: bool) {
        lock(&self.state).refuse = refuse;
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).connect_attempts
    }

    pub fn sent_frames(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }
}

struct MemoryLink {
    inbound_rx: mpsc::UnboundedReceiver<String>,
    state: SharedState,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn Link>, ChannelError> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        if state.refuse {
            return Err(ChannelError::Transport("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound_tx = Some(tx);
        debug!(attempt = state.connect_attempts, "Memory link established");

        Ok(Box::new(MemoryLink {
            inbound_rx: rx,
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn recv(&mut self) -> Option<String> {
        self.inbound_rx.recv().await
    }

    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        lock(&self.state).sent.push(frame);
        Ok(())
    }
}
