//! Client-side evaluation pipeline for Optimus
//!
//! Validates uploaded test-case archives and correlates verdicts streamed
//! by the judge with the submissions that produced them.

pub mod aggregation;
pub mod archive;
pub mod channel;
pub mod correlator;
pub mod error;
pub mod session;
pub mod suite;
pub mod transport;

pub use aggregation::{summarize, CaseRow, CaseStatus, ScoreLine, Summary};
pub use archive::{spawn_validation, validate_archive, validate_archive_with, ArchiveOptions};
pub use channel::{ChannelEvent, ChannelState, ReconnectPolicy, ResultChannel, Subscription};
pub use correlator::{Applied, DiscardReason, SubmissionCorrelator, TrackSnapshot, TrackStatus};
pub use error::{ArchiveError, ChannelError, CorrelatorError, SessionError};
pub use session::{Session, SessionEvent};
pub use suite::TestSuite;
