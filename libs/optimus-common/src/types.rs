use serde::{Deserialize, Serialize};
use std::fmt;

/// Run kind of a submission
///
/// Pretest runs only judge the example cases; full runs count toward the
/// official submission record. Each kind owns an independent track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Pretest,
    Full,
}

impl RunKind {
    pub const ALL: [RunKind; 2] = [RunKind::Pretest, RunKind::Full];

    /// Map the `is_pretest_run` wire flag onto a run kind
    pub fn from_pretest_flag(is_pretest_run: bool) -> Self {
        if is_pretest_run {
            RunKind::Pretest
        } else {
            RunKind::Full
        }
    }

    pub fn is_pretest(&self) -> bool {
        matches!(self, RunKind::Pretest)
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Pretest => write!(f, "pretest"),
            RunKind::Full => write!(f, "full"),
        }
    }
}

/// One ordinal-indexed input/output pair of a problem's test oracle
///
/// Created once when an archive is validated, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub ordinal: u32,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
    pub is_pretest: bool,
    pub points: u32,
}

/// Payload a caller hands to the grading queue and then to the correlator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionIntent {
    pub id: u64,
    pub kind: RunKind,
    pub problem_id: u64,
    pub language_id: u64,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contest_id: Option<u64>,
}

/// Grading outcome reported by the judge for a single test case
///
/// Decoded from the numeric `result_id` carried by verdict frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ResultKind {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    PresentationError,
    InternalError,
    Unknown(i64),
}

impl ResultKind {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ResultKind::Accepted)
    }

    /// Short verdict code as shown on standings pages
    pub fn code(&self) -> &'static str {
        match self {
            ResultKind::Accepted => "AC",
            ResultKind::WrongAnswer => "WA",
            ResultKind::TimeLimitExceeded => "TLE",
            ResultKind::MemoryLimitExceeded => "MLE",
            ResultKind::RuntimeError => "RE",
            ResultKind::CompilationError => "CE",
            ResultKind::PresentationError => "PE",
            ResultKind::InternalError => "IE",
            ResultKind::Unknown(_) => "??",
        }
    }
}

impl From<i64> for ResultKind {
    fn from(id: i64) -> Self {
        match id {
            1 => ResultKind::Accepted,
            2 => ResultKind::WrongAnswer,
            3 => ResultKind::TimeLimitExceeded,
            4 => ResultKind::MemoryLimitExceeded,
            5 => ResultKind::RuntimeError,
            6 => ResultKind::CompilationError,
            7 => ResultKind::PresentationError,
            8 => ResultKind::InternalError,
            other => ResultKind::Unknown(other),
        }
    }
}

impl From<ResultKind> for i64 {
    fn from(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Accepted => 1,
            ResultKind::WrongAnswer => 2,
            ResultKind::TimeLimitExceeded => 3,
            ResultKind::MemoryLimitExceeded => 4,
            ResultKind::RuntimeError => 5,
            ResultKind::CompilationError => 6,
            ResultKind::PresentationError => 7,
            ResultKind::InternalError => 8,
            ResultKind::Unknown(id) => id,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Accepted => write!(f, "Accepted"),
            ResultKind::WrongAnswer => write!(f, "Wrong Answer"),
            ResultKind::TimeLimitExceeded => write!(f, "Time Limit Exceeded"),
            ResultKind::MemoryLimitExceeded => write!(f, "Memory Limit Exceeded"),
            ResultKind::RuntimeError => write!(f, "Runtime Error"),
            ResultKind::CompilationError => write!(f, "Compilation Error"),
            ResultKind::PresentationError => write!(f, "Presentation Error"),
            ResultKind::InternalError => write!(f, "Internal Error"),
            ResultKind::Unknown(id) => write!(f, "Unknown ({})", id),
        }
    }
}

/// Single test-case grading outcome streamed from the judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "number")]
    pub ordinal: u32,
    #[serde(rename = "result_id")]
    pub result: ResultKind,
    #[serde(rename = "time")]
    pub time_seconds: f64,
    #[serde(rename = "memory")]
    pub memory_kb: u64,
    #[serde(default)]
    pub notes: String,
    pub is_pretest_run: bool,
}

impl Verdict {
    pub fn run_kind(&self) -> RunKind {
        RunKind::from_pretest_flag(self.is_pretest_run)
    }
}

/// Terminal aggregate outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalResult {
    pub submission_id: u64,
    pub score: f64,
    #[serde(rename = "result")]
    pub result_text: String,
    pub is_pretest_run: bool,
}

impl TotalResult {
    pub fn run_kind(&self) -> RunKind {
        RunKind::from_pretest_flag(self.is_pretest_run)
    }
}
