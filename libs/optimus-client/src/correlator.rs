/// Submission Correlator - Verdict → Track Routing
///
/// **Core Responsibility:**
/// Keep one state machine per run kind and attribute every inbound verdict
/// or total to the run that produced it.
///
/// **Track Lifecycle:**
/// ```text
/// Idle ──submit──▶ Armed ──verdict──▶ Collecting ──total──▶ Finalized
///                    │                    │
///                    └──── timeout ───────┴──────────────▶ Failed
/// Finalized / Failed ──submit──▶ Armed (verdicts cleared)
/// ```
///
/// **Routing Rules:**
/// - Messages pick their track by `is_pretest_run`
/// - Accepted only while the track is Armed or Collecting
/// - Verdicts must name a case judged by that run kind
/// - Totals must carry the submission id the track was armed with
/// - A repeated verdict for the same ordinal replaces the earlier one
///
/// Anything else is dropped and counted in [`DiscardStats`]. The two tracks
/// share no state, so their events may interleave freely.
///
/// The correlator is not thread-safe by itself: all mutations happen on the
/// session's single event-processing path.

use crate::error::CorrelatorError;
use crate::suite::TestSuite;
use optimus_common::types::{RunKind, SubmissionIntent, TotalResult, Verdict};
use optimus_common::wire::InboundMessage;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackStatus {
    Idle,
    Armed,
    Collecting,
    Finalized,
    /// No total arrived within the configured timeout
    Failed,
}

impl TrackStatus {
    /// Armed or Collecting
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TrackStatus::Armed | TrackStatus::Collecting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackStatus::Finalized | TrackStatus::Failed)
    }
}

/// Why a message was not applied to any track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// Track idle, finalized or failed
    TrackNotInFlight,
    /// Ordinal is not a case of the track's partition
    UnknownOrdinal,
    /// Total names a different submission than the armed one
    ForeignSubmission,
}

/// Outcome of feeding one message to the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    Replaced,
    Finalized,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardStats {
    pub track_not_in_flight: u64,
    pub unknown_ordinal: u64,
    pub foreign_submission: u64,
}

impl DiscardStats {
    fn record(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::TrackNotInFlight => self.track_not_in_flight += 1,
            DiscardReason::UnknownOrdinal => self.unknown_ordinal += 1,
            DiscardReason::ForeignSubmission => self.foreign_submission += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.track_not_in_flight + self.unknown_ordinal + self.foreign_submission
    }
}

/// Read-only view of one track for display
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub kind: RunKind,
    pub status: TrackStatus,
    pub submission_id: Option<u64>,
    pub verdicts: Vec<Verdict>,
    pub total: Option<TotalResult>,
}

#[derive(Debug)]
struct Track {
    kind: RunKind,
    status: TrackStatus,
    submission_id: Option<u64>,
    verdicts: Vec<Verdict>,
    total: Option<TotalResult>,
    armed_at: Option<Instant>,
}

impl Track {
    fn new(kind: RunKind) -> Self {
        Self {
            kind,
            status: TrackStatus::Idle,
            submission_id: None,
            verdicts: Vec::new(),
            total: None,
            armed_at: None,
        }
    }

    fn arm(&mut self, submission_id: u64, now: Instant) {
        self.status = TrackStatus::Armed;
        self.submission_id = Some(submission_id);
        self.verdicts.clear();
        self.total = None;
        self.armed_at = Some(now);
    }

    fn accept_verdict(&mut self, verdict: Verdict) -> Applied {
        self.status = TrackStatus::Collecting;
        match self
            .verdicts
            .iter_mut()
            .find(|v| v.ordinal == verdict.ordinal)
        {
            Some(existing) => {
                *existing = verdict;
                Applied::Replaced
            }
            None => {
                self.verdicts.push(verdict);
                Applied::Appended
            }
        }
    }

    fn finalize(&mut self, total: TotalResult) {
        self.status = TrackStatus::Finalized;
        self.total = Some(total);
        self.armed_at = None;
    }

    fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            kind: self.kind,
            status: self.status,
            submission_id: self.submission_id,
            verdicts: self.verdicts.clone(),
            total: self.total.clone(),
        }
    }
}

/// Two independent run tracks fed by one channel
#[derive(Debug)]
pub struct SubmissionCorrelator {
    pretest: Track,
    full: Track,
    timeout: Option<Duration>,
    discards: DiscardStats,
}

impl Default for SubmissionCorrelator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SubmissionCorrelator {
    /// `timeout` bounds how long a track may stay in flight; `None` waits forever
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pretest: Track::new(RunKind::Pretest),
            full: Track::new(RunKind::Full),
            timeout,
            discards: DiscardStats::default(),
        }
    }

    fn track(&self, kind: RunKind) -> &Track {
        match kind {
            RunKind::Pretest => &self.pretest,
            RunKind::Full => &self.full,
        }
    }

    fn track_mut(&mut self, kind: RunKind) -> &mut Track {
        match kind {
            RunKind::Pretest => &mut self.pretest,
            RunKind::Full => &mut self.full,
        }
    }

    /// Fails with `Conflict` while a run of this kind is in flight
    pub fn ensure_can_submit(&self, kind: RunKind) -> Result<(), CorrelatorError> {
        if self.track(kind).status.is_in_flight() {
            return Err(CorrelatorError::Conflict { kind });
        }
        Ok(())
    }

    /// Arm the track for `intent.kind`, clearing whatever it held before
    pub fn submit(&mut self, intent: &SubmissionIntent) -> Result<(), CorrelatorError> {
        self.submit_at(intent, Instant::now())
    }

    pub fn submit_at(
        &mut self,
        intent: &SubmissionIntent,
        now: Instant,
    ) -> Result<(), CorrelatorError> {
        if let Err(e) = self.ensure_can_submit(intent.kind) {
            warn!(
                submission_id = intent.id,
                kind = %intent.kind,
                "Rejected submit while a run of the same kind is in flight"
            );
            return Err(e);
        }

        let track = self.track_mut(intent.kind);
        let previous = track.status;
        track.arm(intent.id, now);

        info!(
            submission_id = intent.id,
            kind = %intent.kind,
            problem_id = intent.problem_id,
            previous = ?previous,
            "Track armed"
        );
        Ok(())
    }

    /// Route one decoded message to its track
    pub fn apply(&mut self, suite: &TestSuite, message: InboundMessage) -> Applied {
        let kind = message.run_kind();
        let outcome = match message {
            InboundMessage::Verdict(verdict) => self.apply_verdict(suite, verdict),
            InboundMessage::Total(total) => self.apply_total(total),
        };

        if let Applied::Discarded(reason) = outcome {
            self.discards.record(reason);
            debug!(
                kind = %kind,
                reason = ?reason,
                discarded = self.discards.total(),
                "Discarded stale or unroutable message"
            );
        }
        outcome
    }

    fn apply_verdict(&mut self, suite: &TestSuite, verdict: Verdict) -> Applied {
        let kind = verdict.run_kind();
        let track = self.track_mut(kind);

        if !track.status.is_in_flight() {
            return Applied::Discarded(DiscardReason::TrackNotInFlight);
        }
        if !suite.contains(kind, verdict.ordinal) {
            return Applied::Discarded(DiscardReason::UnknownOrdinal);
        }

        let ordinal = verdict.ordinal;
        let result = verdict.result;
        let outcome = track.accept_verdict(verdict);
        debug!(
            submission_id = ?track.submission_id,
            kind = %kind,
            ordinal,
            result = %result,
            received = track.verdicts.len(),
            replaced = outcome == Applied::Replaced,
            "Verdict accepted"
        );
        outcome
    }

    fn apply_total(&mut self, total: TotalResult) -> Applied {
        let kind = total.run_kind();
        let track = self.track_mut(kind);

        if !track.status.is_in_flight() {
            return Applied::Discarded(DiscardReason::TrackNotInFlight);
        }
        if track.submission_id != Some(total.submission_id) {
            return Applied::Discarded(DiscardReason::ForeignSubmission);
        }

        info!(
            submission_id = total.submission_id,
            kind = %kind,
            score = total.score,
            result = %total.result_text,
            verdicts = track.verdicts.len(),
            "Track finalized"
        );
        track.finalize(total);
        Applied::Finalized
    }

    /// Fail every in-flight track armed longer than the timeout
    ///
    /// Returns the kinds that transitioned to `Failed`.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<RunKind> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        for kind in RunKind::ALL {
            let track = self.track_mut(kind);
            let stale = track.status.is_in_flight()
                && track
                    .armed_at
                    .map(|armed| now.saturating_duration_since(armed) >= timeout)
                    .unwrap_or(false);
            if stale {
                warn!(
                    submission_id = ?track.submission_id,
                    kind = %kind,
                    verdicts = track.verdicts.len(),
                    timeout_secs = timeout.as_secs(),
                    "No total received in time, failing track"
                );
                track.status = TrackStatus::Failed;
                track.armed_at = None;
                expired.push(kind);
            }
        }
        expired
    }

    /// Earliest instant at which an in-flight track would time out
    pub fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.timeout?;
        RunKind::ALL
            .iter()
            .map(|kind| self.track(*kind))
            .filter(|track| track.status.is_in_flight())
            .filter_map(|track| track.armed_at)
            .map(|armed| armed + timeout)
            .min()
    }

    pub fn status(&self, kind: RunKind) -> TrackStatus {
        self.track(kind).status
    }

    pub fn snapshot(&self, kind: RunKind) -> TrackSnapshot {
        self.track(kind).snapshot()
    }

    pub fn discards(&self) -> DiscardStats {
        self.discards
    }
}
