/// Result Channel - Reconnecting Duplex Connection
///
/// **Core Responsibility:**
/// Own the session's single connection to the judge, decode inbound frames
/// into typed messages and fan them out to subscribers.
///
/// **Connection Policy:**
/// - Initial connect and every reconnect use the same budget
///   (reference: 10 attempts, 2 seconds apart)
/// - Budget exhausted → subscribers receive a terminal `Unavailable`
/// - Each successful connect starts a new epoch
///
/// **Guarantees:**
/// - Frames are delivered in arrival order within one epoch
/// - Nothing is promised across a reconnect; frames in flight are lost
/// - `send` never queues: it fails immediately unless connected, and frames
///   accepted for an epoch that has since dropped are discarded
/// - Undecodable frames are logged, counted and dropped

use crate::error::ChannelError;
use async_trait::async_trait;
use optimus_common::config::ClientConfig;
use optimus_common::wire::{self, InboundMessage, OutboundMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One live connection epoch
#[async_trait]
pub trait Link: Send {
    /// Next raw inbound frame; `None` once the connection dropped
    async fn recv(&mut self) -> Option<String>;

    async fn send(&mut self, frame: String) -> Result<(), ChannelError>;
}

/// Factory for connection epochs
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Link>, ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts.max(1),
            interval: config.reconnect_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected { epoch: u64 },
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted, terminal
    Unavailable,
    Closed,
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected { epoch: u64 },
    Message { epoch: u64, message: InboundMessage },
    Unavailable,
}

#[derive(Debug, Default)]
pub struct ChannelStats {
    pub frames_received: AtomicU64,
    pub decode_failures: AtomicU64,
    pub stale_outbound: AtomicU64,
}

/// Receiving end of a subscription
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    /// Next event, `None` once the channel has shut down
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>>;

struct OutboundFrame {
    epoch: u64,
    frame: String,
}

pub struct ResultChannel {
    state_rx: watch::Receiver<ChannelState>,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    shutdown_tx: watch::Sender<bool>,
    subscribers: Subscribers,
    stats: Arc<ChannelStats>,
    task: JoinHandle<()>,
}

impl ResultChannel {
    /// Start the connection task; must be called inside a tokio runtime
    pub fn connect(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(ChannelStats::default());

        let worker = ConnectionWorker {
            transport,
            policy,
            state_tx,
            outbound_rx,
            shutdown_rx,
            subscribers: subscribers.clone(),
            stats: stats.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            state_rx,
            outbound_tx,
            shutdown_tx,
            subscribers,
            stats,
            task,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ChannelState::Connected { .. })
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Register a subscriber for every event from now on
    ///
    /// Once the channel is `Unavailable` or `Closed` the subscription is
    /// already finished and `next` yields `None`.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        // the worker publishes its terminal state before clearing subscribers
        if !matches!(self.state(), ChannelState::Unavailable | ChannelState::Closed) {
            subs.push(tx);
        }
        Subscription { rx }
    }

    /// Send one message on the current epoch, failing fast if not connected
    pub fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let epoch = match self.state() {
            ChannelState::Connected { epoch } => epoch,
            ChannelState::Closed => return Err(ChannelError::Closed),
            _ => return Err(ChannelError::Unavailable),
        };
        let frame =
            wire::encode_outbound(message).map_err(|e| ChannelError::Transport(e.to_string()))?;
        self.outbound_tx
            .send(OutboundFrame { epoch, frame })
            .map_err(|_| ChannelError::Closed)
    }

    /// Wait until connected, returning the epoch
    pub async fn wait_connected(&self) -> Result<u64, ChannelError> {
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ChannelState::Connected { epoch } => return Ok(epoch),
                ChannelState::Unavailable => return Err(ChannelError::Unavailable),
                ChannelState::Closed => return Err(ChannelError::Closed),
                ChannelState::Connecting | ChannelState::Reconnecting { .. } => {}
            }
            if rx.changed().await.is_err() {
                return Err(ChannelError::Closed);
            }
        }
    }

    /// Stop the connection task; subscribers see their streams end
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ResultChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ConnectionWorker {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ChannelState>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    shutdown_rx: watch::Receiver<bool>,
    subscribers: Subscribers,
    stats: Arc<ChannelStats>,
}

enum EpochEnd {
    Dropped,
    Shutdown,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let mut epoch = 0u64;
        let mut reconnecting = false;

        loop {
            let link = match self.establish(reconnecting).await {
                Some(link) => link,
                None => break,
            };

            epoch += 1;
            info!(epoch, "Result channel connected");
            let _ = self.state_tx.send(ChannelState::Connected { epoch });
            self.dispatch(ChannelEvent::Connected { epoch });

            match self.pump(link, epoch).await {
                EpochEnd::Dropped => {
                    warn!(epoch, "Result channel dropped, reconnecting");
                    reconnecting = true;
                }
                EpochEnd::Shutdown => {
                    let _ = self.state_tx.send(ChannelState::Closed);
                    break;
                }
            }
        }

        self.clear_subscribers();
        info!("Result channel task finished");
    }

    /// Connect within the retry budget; `None` when exhausted or shut down
    async fn establish(&mut self, reconnecting: bool) -> Option<Box<dyn Link>> {
        for attempt in 1..=self.policy.max_attempts {
            if reconnecting || attempt > 1 {
                let _ = self.state_tx.send(ChannelState::Reconnecting { attempt });
                if self.sleep_or_shutdown(self.policy.interval).await {
                    let _ = self.state_tx.send(ChannelState::Closed);
                    return None;
                }
            }

            match self.transport.connect().await {
                Ok(link) => return Some(link),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Connection attempt failed"
                    );
                }
            }
        }

        error!(
            attempts = self.policy.max_attempts,
            "Result channel unavailable, giving up"
        );
        let _ = self.state_tx.send(ChannelState::Unavailable);
        self.dispatch(ChannelEvent::Unavailable);
        None
    }

    /// Returns true when shutdown was requested during the wait
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        if *self.shutdown_rx.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.shutdown_rx.changed() => true,
        }
    }

    async fn pump(&mut self, mut link: Box<dyn Link>, epoch: u64) -> EpochEnd {
        loop {
            tokio::select! {
                frame = link.recv() => match frame {
                    Some(frame) => self.handle_frame(epoch, &frame),
                    None => return EpochEnd::Dropped,
                },
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(out) if out.epoch == epoch => {
                        if let Err(e) = link.send(out.frame).await {
                            warn!(epoch, error = %e, "Outbound send failed");
                            return EpochEnd::Dropped;
                        }
                    }
                    Some(out) => {
                        self.stats.stale_outbound.fetch_add(1, Ordering::Relaxed);
                        debug!(epoch, frame_epoch = out.epoch, "Dropping outbound frame from a previous epoch");
                    }
                    None => return EpochEnd::Shutdown,
                },
                _ = self.shutdown_rx.changed() => return EpochEnd::Shutdown,
            }
        }
    }

    fn handle_frame(&self, epoch: u64, frame: &str) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        match wire::decode_frame(frame) {
            Ok(message) => self.dispatch(ChannelEvent::Message { epoch, message }),
            Err(e) => {
                let failures = self.stats.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(epoch, error = %e, failures, "Dropping undecodable frame");
            }
        }
    }

    fn dispatch(&self, event: ChannelEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn clear_subscribers(&self) {
        match self.subscribers.lock() {
            Ok(mut subs) => subs.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use optimus_common::types::RunKind;
    use tokio::time::Instant;

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            interval: Duration::from_secs(2),
        }
    }

    const VERDICT: &str =
        r#"{"number":1,"notes":"","time":0.1,"memory":100,"result_id":1,"is_pretest_run":true}"#;

    #[test]
    fn test_policy_from_config() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.interval, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_decoded_frames_in_order() {
        let (transport, handle) = MemoryTransport::new();
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(3));
        let mut sub = channel.subscribe();

        assert_eq!(channel.wait_connected().await, Ok(1));
        assert_eq!(sub.next().await, Some(ChannelEvent::Connected { epoch: 1 }));

        assert!(handle.push_frame(VERDICT));
        assert!(handle.push_frame("{garbage"));
        assert!(handle.push_frame(
            r#"{"type":"total","submission_id":3,"score":100,"result":"OK","is_pretest_run":true}"#
        ));

        match sub.next().await {
            Some(ChannelEvent::Message { epoch: 1, message: InboundMessage::Verdict(v) }) => {
                assert_eq!(v.ordinal, 1)
            }
            other => panic!("unexpected event {:?}", other),
        }
        match sub.next().await {
            Some(ChannelEvent::Message { message: InboundMessage::Total(t), .. }) => {
                assert_eq!(t.submission_id, 3);
                assert_eq!(t.run_kind(), RunKind::Pretest);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(channel.stats().decode_failures.load(Ordering::Relaxed), 1);
        assert_eq!(channel.stats().frames_received.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let (transport, handle) = MemoryTransport::new();
        handle.set_refuse(true);
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(2));
        let watch = OutboundMessage::Watch {
            submission_id: 1,
            is_pretest_run: false,
        };

        assert_eq!(channel.send(&watch), Err(ChannelError::Unavailable));
        assert_eq!(channel.wait_connected().await, Err(ChannelError::Unavailable));
        assert_eq!(channel.state(), ChannelState::Unavailable);
        assert_eq!(handle.connect_attempts(), 2);
        assert!(handle.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reaches_link() {
        let (transport, handle) = MemoryTransport::new();
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(3));
        channel.wait_connected().await.unwrap();

        channel
            .send(&OutboundMessage::Watch {
                submission_id: 8,
                is_pretest_run: true,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#""submission_id":8"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_with_new_epoch() {
        let (transport, handle) = MemoryTransport::new();
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(10));
        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, Some(ChannelEvent::Connected { epoch: 1 }));

        handle.drop_connection();
        assert_eq!(sub.next().await, Some(ChannelEvent::Connected { epoch: 2 }));
        assert_eq!(channel.state(), ChannelState::Connected { epoch: 2 });
        assert_eq!(handle.connect_attempts(), 2);

        assert!(handle.push_frame(VERDICT));
        assert!(matches!(
            sub.next().await,
            Some(ChannelEvent::Message { epoch: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let (transport, handle) = MemoryTransport::new();
        let started = Instant::now();
        let channel = ResultChannel::connect(Arc::new(transport), ReconnectPolicy::default());
        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, Some(ChannelEvent::Connected { epoch: 1 }));
        assert_eq!(started.elapsed(), Duration::ZERO);

        handle.set_refuse(true);
        let dropped_at = Instant::now();
        handle.drop_connection();

        assert_eq!(sub.next().await, Some(ChannelEvent::Unavailable));
        // ten attempts, each preceded by the two second interval
        assert_eq!(dropped_at.elapsed(), Duration::from_secs(20));
        assert_eq!(sub.next().await, None);
        assert_eq!(channel.state(), ChannelState::Unavailable);
        assert_eq!(handle.connect_attempts(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_attempt_is_immediate() {
        let (transport, handle) = MemoryTransport::new();
        handle.set_refuse(true);
        let started = Instant::now();
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(3));

        assert_eq!(channel.wait_connected().await, Err(ChannelError::Unavailable));
        assert_eq!(handle.connect_attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscription_ends_immediately() {
        let (transport, handle) = MemoryTransport::new();
        handle.set_refuse(true);
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(1));
        assert_eq!(channel.wait_connected().await, Err(ChannelError::Unavailable));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_after_close_ends_immediately() {
        let (transport, _handle) = MemoryTransport::new();
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(3));
        channel.wait_connected().await.unwrap();

        channel.close();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(channel.state(), ChannelState::Closed);

        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_ends_subscriptions() {
        let (transport, _handle) = MemoryTransport::new();
        let channel = ResultChannel::connect(Arc::new(transport), fast_policy(3));
        let mut sub = channel.subscribe();
        assert_eq!(sub.next().await, Some(ChannelEvent::Connected { epoch: 1 }));

        channel.close();
        assert_eq!(sub.next().await, None);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(
            channel.send(&OutboundMessage::Watch {
                submission_id: 1,
                is_pretest_run: true
            }),
            Err(ChannelError::Closed)
        );
    }
}
