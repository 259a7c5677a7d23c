/// Session - Problem-Solving Context
///
/// **Core Responsibility:**
/// Own the session's result channel, its test suite and the correlator, and
/// drive them from one event-processing path ([`Session::next_event`]).
///
/// **Architecture:**
/// 1. ArchiveValidator runs on the blocking pool; its result comes back as a
///    single `ArchiveLoaded` event so it never delays verdict delivery
/// 2. ResultChannel events are applied to the correlator in arrival order
/// 3. An optional deadline sweep fails tracks that never receive a total
///
/// Every mutation happens inside `&mut self` methods called from the caller's
/// event loop, so the correlator needs no locking.

use crate::aggregation::{self, Summary};
use crate::archive::{self, ArchiveOptions};
use crate::channel::{ChannelEvent, ReconnectPolicy, ResultChannel, Subscription};
use crate::correlator::{Applied, DiscardStats, SubmissionCorrelator, TrackSnapshot};
use crate::error::{ArchiveError, ChannelError, SessionError};
use crate::suite::TestSuite;
use crate::transport::RedisTransport;
use optimus_common::config::ClientConfig;
use optimus_common::types::{RunKind, SubmissionIntent};
use optimus_common::wire::OutboundMessage;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Something the caller may want to re-render for
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ChannelConnected { epoch: u64 },
    ChannelUnavailable,
    Applied { kind: RunKind, outcome: Applied },
    ArchiveLoaded(Result<usize, ArchiveError>),
    TracksExpired(Vec<RunKind>),
}

pub struct Session {
    id: Uuid,
    config: ClientConfig,
    channel: ResultChannel,
    events: Option<Subscription>,
    correlator: SubmissionCorrelator,
    suite: Option<Arc<TestSuite>>,
    pending_archive: Option<JoinHandle<Result<TestSuite, ArchiveError>>>,
}

impl Session {
    pub fn new(id: Uuid, channel: ResultChannel, config: ClientConfig) -> Self {
        let events = Some(channel.subscribe());
        Self {
            id,
            correlator: SubmissionCorrelator::new(config.track_timeout()),
            config,
            channel,
            events,
            suite: None,
            pending_archive: None,
        }
    }

    /// Open a session whose results stream over redis pub/sub
    pub fn open_redis(config: ClientConfig) -> Result<Self, ChannelError> {
        let id = Uuid::new_v4();
        let transport = RedisTransport::new(&config.redis_url, &id)?;
        let channel =
            ResultChannel::connect(Arc::new(transport), ReconnectPolicy::from_config(&config));
        info!(session_id = %id, redis_url = %config.redis_url, "Session opened");
        Ok(Self::new(id, channel, config))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &ResultChannel {
        &self.channel
    }

    pub fn test_suite(&self) -> Option<&TestSuite> {
        self.suite.as_deref()
    }

    pub fn set_test_suite(&mut self, suite: TestSuite) {
        info!(session_id = %self.id, cases = suite.len(), "Test suite installed");
        self.suite = Some(Arc::new(suite));
    }

    /// Start validating an archive in the background
    ///
    /// Without explicit options the session's [`archive_options`] apply.
    /// Completion is reported once through `next_event`. A newer load
    /// supersedes one still running.
    ///
    /// [`archive_options`]: Session::archive_options
    pub fn begin_archive_load(&mut self, bytes: Vec<u8>, options: Option<ArchiveOptions>) {
        let options = options.unwrap_or_else(|| self.archive_options());
        if let Some(previous) = self.pending_archive.take() {
            warn!(session_id = %self.id, "Superseding archive load still in progress");
            previous.abort();
        }
        debug!(session_id = %self.id, archive_size = bytes.len(), "Archive load started");
        self.pending_archive = Some(archive::spawn_validation(bytes, options));
    }

    /// Archive options carrying this session's configured points pool
    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            pool: self.config.points_pool,
            ..ArchiveOptions::default()
        }
    }

    pub fn is_loading_archive(&self) -> bool {
        self.pending_archive.is_some()
    }

    /// Arm the track for `intent.kind` and ask the judge to stream its results
    ///
    /// Checks run in order: suite loaded, no run of the same kind in flight,
    /// channel connected. A failed submit leaves the track untouched.
    #[instrument(skip(self, intent), fields(session_id = %self.id, submission_id = intent.id, kind = %intent.kind))]
    pub fn submit(&mut self, intent: &SubmissionIntent) -> Result<(), SessionError> {
        if self.suite.is_none() {
            return Err(SessionError::NoTestSuite);
        }
        self.correlator.ensure_can_submit(intent.kind)?;

        self.channel.send(&OutboundMessage::Watch {
            submission_id: intent.id,
            is_pretest_run: intent.kind.is_pretest(),
        })?;

        self.correlator.submit(intent)?;
        Ok(())
    }

    pub fn track(&self, kind: RunKind) -> TrackSnapshot {
        self.correlator.snapshot(kind)
    }

    pub fn summary(&self, kind: RunKind) -> Option<Summary> {
        let suite = self.suite.as_deref()?;
        Some(aggregation::summarize(suite, &self.correlator.snapshot(kind)))
    }

    pub fn discards(&self) -> DiscardStats {
        self.correlator.discards()
    }

    /// Wait for and process the next event
    ///
    /// Returns `None` once the channel has shut down and nothing else is
    /// pending.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let deadline = self.correlator.next_deadline();

            let step = {
                let events = self.events.as_mut();
                let pending = self.pending_archive.as_mut();
                if events.is_none() && pending.is_none() && deadline.is_none() {
                    return None;
                }

                tokio::select! {
                    event = async move {
                        match events {
                            Some(sub) => sub.next().await,
                            None => std::future::pending().await,
                        }
                    } => Step::Channel(event),
                    joined = async move {
                        match pending {
                            Some(handle) => handle.await,
                            None => std::future::pending().await,
                        }
                    } => Step::Archive(joined),
                    _ = async move {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending().await,
                        }
                    } => Step::Deadline,
                }
            };

            if let Some(event) = self.process(step) {
                return Some(event);
            }
        }
    }

    fn process(&mut self, step: Step) -> Option<SessionEvent> {
        match step {
            Step::Channel(None) => {
                debug!(session_id = %self.id, "Channel subscription ended");
                self.events = None;
                None
            }
            Step::Channel(Some(event)) => Some(self.handle_channel_event(event)),
            Step::Archive(joined) => {
                self.pending_archive = None;
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => Err(ArchiveError::Decode(format!("validation task failed: {}", e))),
                };
                Some(SessionEvent::ArchiveLoaded(result.map(|suite| {
                    let cases = suite.len();
                    self.set_test_suite(suite);
                    cases
                })))
            }
            Step::Deadline => {
                let expired = self.correlator.expire_stale(tokio::time::Instant::now());
                if expired.is_empty() {
                    None
                } else {
                    Some(SessionEvent::TracksExpired(expired))
                }
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) -> SessionEvent {
        match event {
            ChannelEvent::Connected { epoch } => SessionEvent::ChannelConnected { epoch },
            ChannelEvent::Unavailable => {
                warn!(session_id = %self.id, "Result channel unavailable; resubmit once it is back");
                SessionEvent::ChannelUnavailable
            }
            ChannelEvent::Message { epoch, message } => {
                let kind = message.run_kind();
                let outcome = match self.suite.as_deref() {
                    Some(suite) => self.correlator.apply(suite, message),
                    None => self.correlator.apply(&TestSuite::default(), message),
                };
                debug!(session_id = %self.id, epoch, kind = %kind, outcome = ?outcome, "Message applied");
                SessionEvent::Applied { kind, outcome }
            }
        }
    }

    /// Stop the channel; pending archive work is abandoned
    pub fn close(&mut self) {
        if let Some(handle) = self.pending_archive.take() {
            handle.abort();
        }
        self.channel.close();
        info!(session_id = %self.id, "Session closed");
    }
}

enum Step {
    Channel(Option<ChannelEvent>),
    Archive(Result<Result<TestSuite, ArchiveError>, tokio::task::JoinError>),
    Deadline,
}
