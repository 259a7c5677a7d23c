use crate::archive::assign_points;
use optimus_common::types::{RunKind, TestCase};
use std::collections::BTreeSet;

/// Ordered, read-only set of test cases for one problem session
///
/// Ordinals are unique and contiguous from 1. Pretest runs judge only the
/// cases flagged `is_pretest`; full runs judge every case.
///
/// Points are split per `is_pretest` partition, so each partition is worth
/// the whole pool. A pretest run is scored on the pretest cases; a full run
/// on the remaining cases, or on every case when all of them are pretests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSuite {
    cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(mut cases: Vec<TestCase>) -> Self {
        cases.sort_by_key(|tc| tc.ordinal);
        Self { cases }
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn get(&self, ordinal: u32) -> Option<&TestCase> {
        self.cases
            .binary_search_by_key(&ordinal, |tc| tc.ordinal)
            .ok()
            .map(|idx| &self.cases[idx])
    }

    /// Cases judged by a run of the given kind, in ordinal order
    pub fn partition(&self, kind: RunKind) -> impl Iterator<Item = &TestCase> + '_ {
        self.cases
            .iter()
            .filter(move |tc| kind == RunKind::Full || tc.is_pretest)
    }

    /// Whether `ordinal` names a case judged by a run of `kind`
    pub fn contains(&self, kind: RunKind, ordinal: u32) -> bool {
        self.get(ordinal)
            .map(|tc| kind == RunKind::Full || tc.is_pretest)
            .unwrap_or(false)
    }

    pub fn case_count(&self, kind: RunKind) -> usize {
        self.partition(kind).count()
    }

    /// Whether `tc` contributes its points to the score of a run of `kind`
    pub fn is_scored(&self, kind: RunKind, tc: &TestCase) -> bool {
        match kind {
            RunKind::Pretest => tc.is_pretest,
            RunKind::Full => !tc.is_pretest || self.cases.iter().all(|c| c.is_pretest),
        }
    }

    pub fn max_points(&self, kind: RunKind) -> u32 {
        self.cases
            .iter()
            .filter(|tc| self.is_scored(kind, tc))
            .map(|tc| tc.points)
            .sum()
    }

    /// Replace the pretest flags before the suite is persisted
    ///
    /// Points are redistributed so each partition still sums to `pool`.
    pub fn set_pretests(&mut self, ordinals: &BTreeSet<u32>, pool: u32) {
        for tc in &mut self.cases {
            tc.is_pretest = ordinals.contains(&tc.ordinal);
        }
        assign_points(&mut self.cases, pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(ordinal: u32, is_pretest: bool, points: u32) -> TestCase {
        TestCase {
            ordinal,
            input: Vec::new(),
            output: Vec::new(),
            is_pretest,
            points,
        }
    }

    #[test]
    fn test_lookup_and_order() {
        let suite = TestSuite::new(vec![case(2, false, 50), case(1, true, 50)]);
        assert_eq!(suite.cases()[0].ordinal, 1);
        assert_eq!(suite.get(2).unwrap().points, 50);
        assert!(suite.get(3).is_none());
    }

    #[test]
    fn test_partitions() {
        let suite = TestSuite::new(vec![case(1, true, 50), case(2, false, 100), case(3, true, 50)]);
        assert_eq!(suite.case_count(RunKind::Pretest), 2);
        assert_eq!(suite.case_count(RunKind::Full), 3);
        assert_eq!(suite.max_points(RunKind::Pretest), 100);
        assert_eq!(suite.max_points(RunKind::Full), 100);
        assert!(suite.contains(RunKind::Full, 2));
        assert!(!suite.contains(RunKind::Pretest, 2));
        assert!(!suite.contains(RunKind::Full, 4));
        assert!(!suite.is_scored(RunKind::Full, suite.get(1).unwrap()));
        assert!(suite.is_scored(RunKind::Full, suite.get(2).unwrap()));
    }

    #[test]
    fn test_full_run_scores_everything_when_all_pretests() {
        let suite = TestSuite::new(vec![case(1, true, 50), case(2, true, 50)]);
        assert_eq!(suite.max_points(RunKind::Full), 100);
        assert_eq!(suite.max_points(RunKind::Pretest), 100);
    }

    #[test]
    fn test_set_pretests_redistributes_points() {
        let mut suite = TestSuite::new((1..=4).map(|o| case(o, false, 25)).collect());
        suite.set_pretests(&BTreeSet::from([1, 2]), 100);

        assert!(suite.get(1).unwrap().is_pretest);
        assert!(!suite.get(3).unwrap().is_pretest);
        let points: Vec<u32> = suite.cases().iter().map(|tc| tc.points).collect();
        assert_eq!(points, vec![50, 50, 50, 50]);
        assert_eq!(suite.max_points(RunKind::Pretest), 100);
        assert_eq!(suite.max_points(RunKind::Full), 100);

        suite.set_pretests(&BTreeSet::from([2]), 100);
        let points: Vec<u32> = suite.cases().iter().map(|tc| tc.points).collect();
        assert_eq!(points, vec![33, 100, 33, 34]);

        suite.set_pretests(&BTreeSet::new(), 100);
        assert!(suite.cases().iter().all(|tc| tc.points == 25));
    }
}
