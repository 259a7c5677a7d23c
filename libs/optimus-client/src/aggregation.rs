/// Aggregation View - Track → Render-Ready Summary
///
/// **Core Responsibility:**
/// Project a track snapshot and the session's test suite into per-case rows
/// and a score line. Holds no state of its own.
///
/// **Scoring Rules:**
/// - Provisional score = sum of points of accepted verdicts received so far,
///   counting only cases scored for the track's run kind
/// - Once the track is Finalized the judge's `total.score` is authoritative
/// - Displayed fraction = `min(1, score / max_points)`, never negative
/// - Anything short of Finalized is marked provisional and rendered with `~`

use crate::correlator::{TrackSnapshot, TrackStatus};
use crate::suite::TestSuite;
use optimus_common::types::{ResultKind, RunKind};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Pending,
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseRow {
    pub ordinal: u32,
    pub points: u32,
    pub status: CaseStatus,
    pub result: Option<ResultKind>,
    pub time_seconds: Option<f64>,
    pub memory_kb: Option<u64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLine {
    pub score: f64,
    pub max_points: f64,
    /// Clamped to [0, 1]
    pub fraction: f64,
    /// True until the judge's total has been received
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub kind: RunKind,
    pub status: TrackStatus,
    pub submission_id: Option<u64>,
    pub rows: Vec<CaseRow>,
    pub score: ScoreLine,
    pub received: usize,
    pub expected: usize,
    pub result_text: Option<String>,
}

impl Summary {
    /// Share of expected verdicts received so far, in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        (self.received as f64 / self.expected as f64).min(1.0)
    }
}

pub fn clamp_fraction(score: f64, max_points: f64) -> f64 {
    if max_points <= 0.0 || !score.is_finite() {
        return 0.0;
    }
    (score / max_points).clamp(0.0, 1.0)
}

/// Build the summary for one track
pub fn summarize(suite: &TestSuite, snapshot: &TrackSnapshot) -> Summary {
    let mut provisional_score = 0u32;
    let mut received = 0usize;

    let rows: Vec<CaseRow> = suite
        .partition(snapshot.kind)
        .map(|tc| {
            let points = if suite.is_scored(snapshot.kind, tc) {
                tc.points
            } else {
                0
            };
            let verdict = snapshot.verdicts.iter().find(|v| v.ordinal == tc.ordinal);
            let status = match verdict {
                None => CaseStatus::Pending,
                Some(v) if v.result.is_accepted() => CaseStatus::Passed,
                Some(_) => CaseStatus::Failed,
            };
            if let Some(v) = verdict {
                received += 1;
                if v.result.is_accepted() {
                    provisional_score += points;
                }
            }
            CaseRow {
                ordinal: tc.ordinal,
                points,
                status,
                result: verdict.map(|v| v.result),
                time_seconds: verdict.map(|v| v.time_seconds),
                memory_kb: verdict.map(|v| v.memory_kb),
                notes: verdict.map(|v| v.notes.clone()).filter(|n| !n.is_empty()),
            }
        })
        .collect();

    let max_points = suite.max_points(snapshot.kind) as f64;
    let finalized = snapshot.status == TrackStatus::Finalized;
    let score = match (&snapshot.total, finalized) {
        (Some(total), true) => total.score,
        _ => provisional_score as f64,
    };

    Summary {
        kind: snapshot.kind,
        status: snapshot.status,
        submission_id: snapshot.submission_id,
        expected: rows.len(),
        rows,
        score: ScoreLine {
            score,
            max_points,
            fraction: clamp_fraction(score, max_points),
            provisional: !finalized,
        },
        received,
        result_text: snapshot
            .total
            .as_ref()
            .filter(|_| finalized)
            .map(|t| t.result_text.clone()),
    }
}

fn bar(fraction: f64, width: usize) -> String {
    let filled = (fraction * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

impl fmt::Display for ScoreLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.provisional { "~" } else { "" };
        write!(
            f,
            "{}{} / {} {} {:>5.1}%",
            marker,
            self.score,
            self.max_points,
            bar(self.fraction, 20),
            self.fraction * 100.0
        )?;
        if self.provisional {
            write!(f, " (provisional)")?;
        }
        Ok(())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .submission_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(f, "{} run #{} [{:?}]", self.kind, id, self.status)?;
        for row in &self.rows {
            let mark = match row.status {
                CaseStatus::Pending => "…",
                CaseStatus::Passed => "✓",
                CaseStatus::Failed => "✗",
            };
            write!(f, "  {} test {:>3} ({:>3} pts)", mark, row.ordinal, row.points)?;
            if let (Some(result), Some(time), Some(memory)) =
                (row.result, row.time_seconds, row.memory_kb)
            {
                write!(f, "  {:<4} {:.3}s {}KB", result.code(), time, memory)?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "  progress {} {}/{}",
            bar(self.progress(), 20),
            self.received,
            self.expected
        )?;
        write!(f, "  score    {}", self.score)?;
        if let Some(text) = &self.result_text {
            write!(f, "  {}", text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimus_common::types::{TestCase, TotalResult, Verdict};

    fn suite() -> TestSuite {
        TestSuite::new(
            [(1, true, 50), (2, true, 50), (3, false, 50), (4, false, 50)]
                .into_iter()
                .map(|(ordinal, is_pretest, points)| TestCase {
                    ordinal,
                    input: Vec::new(),
                    output: Vec::new(),
                    is_pretest,
                    points,
                })
                .collect(),
        )
    }

    fn verdict(ordinal: u32, result: ResultKind) -> Verdict {
        Verdict {
            ordinal,
            result,
            time_seconds: 0.25,
            memory_kb: 512,
            notes: String::new(),
            is_pretest_run: false,
        }
    }

    fn snapshot(status: TrackStatus, verdicts: Vec<Verdict>, total: Option<f64>) -> TrackSnapshot {
        TrackSnapshot {
            kind: RunKind::Full,
            status,
            submission_id: Some(4),
            verdicts,
            total: total.map(|score| TotalResult {
                submission_id: 4,
                score,
                result_text: "Partial".to_string(),
                is_pretest_run: false,
            }),
        }
    }

    #[test]
    fn test_rows_follow_verdicts() {
        let snap = snapshot(
            TrackStatus::Collecting,
            vec![verdict(1, ResultKind::Accepted), verdict(3, ResultKind::TimeLimitExceeded)],
            None,
        );
        let summary = summarize(&suite(), &snap);

        let statuses: Vec<CaseStatus> = summary.rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                CaseStatus::Passed,
                CaseStatus::Pending,
                CaseStatus::Failed,
                CaseStatus::Pending
            ]
        );
        assert_eq!(summary.rows[2].result, Some(ResultKind::TimeLimitExceeded));
        assert_eq!(summary.received, 2);
        assert_eq!(summary.expected, 4);
    }

    #[test]
    fn test_provisional_score() {
        let snap = snapshot(
            TrackStatus::Collecting,
            vec![verdict(1, ResultKind::Accepted), verdict(3, ResultKind::Accepted)],
            None,
        );
        let summary = summarize(&suite(), &snap);

        // pretest case 1 is judged by the full run but scored only in pretests
        assert_eq!(summary.rows[0].points, 0);
        assert_eq!(summary.rows[2].points, 50);
        assert_eq!(summary.score.score, 50.0);
        assert_eq!(summary.score.max_points, 100.0);
        assert!(summary.score.provisional);
        assert_eq!(summary.score.fraction, 0.5);
        assert!(summary.score.to_string().starts_with('~'));
        assert!(summary.result_text.is_none());
    }

    #[test]
    fn test_final_score_from_total() {
        let snap = snapshot(
            TrackStatus::Finalized,
            vec![verdict(1, ResultKind::Accepted)],
            Some(80.0),
        );
        let summary = summarize(&suite(), &snap);

        assert_eq!(summary.score.score, 80.0);
        assert!(!summary.score.provisional);
        assert!(!summary.score.to_string().contains("provisional"));
        assert_eq!(summary.result_text.as_deref(), Some("Partial"));
    }

    #[test]
    fn test_fraction_clamped() {
        assert_eq!(clamp_fraction(150.0, 100.0), 1.0);
        assert_eq!(clamp_fraction(-5.0, 100.0), 0.0);
        assert_eq!(clamp_fraction(10.0, 0.0), 0.0);
        assert_eq!(clamp_fraction(f64::NAN, 100.0), 0.0);
    }

    #[test]
    fn test_pretest_partition_only() {
        let snap = TrackSnapshot {
            kind: RunKind::Pretest,
            status: TrackStatus::Armed,
            submission_id: Some(1),
            verdicts: Vec::new(),
            total: None,
        };
        let summary = summarize(&suite(), &snap);

        assert_eq!(summary.rows.len(), 2);
        assert_eq!(summary.score.max_points, 100.0);
        assert_eq!(summary.progress(), 0.0);
        assert!(summary.rows.iter().all(|r| r.status == CaseStatus::Pending));
    }

    #[test]
    fn test_render_contains_rows() {
        let snap = snapshot(
            TrackStatus::Collecting,
            vec![verdict(1, ResultKind::Accepted)],
            None,
        );
        let rendered = summarize(&suite(), &snap).to_string();
        assert!(rendered.contains("full run #4"));
        assert!(rendered.contains("AC"));
        assert!(rendered.contains("1/4"));
    }

    #[test]
    fn test_finalized_pretest_fraction_uses_partition_pool() {
        let snap = TrackSnapshot {
            kind: RunKind::Pretest,
            status: TrackStatus::Finalized,
            submission_id: Some(7),
            verdicts: Vec::new(),
            total: Some(TotalResult {
                submission_id: 7,
                score: 80.0,
                result_text: "Partial".to_string(),
                is_pretest_run: true,
            }),
        };
        let summary = summarize(&suite(), &snap);

        assert_eq!(summary.score.max_points, 100.0);
        assert!((summary.score.fraction - 0.8).abs() < 1e-9);
    }
}
