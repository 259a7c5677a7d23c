/// Archive Validator - Untrusted Bundle → Test Cases
///
/// **Core Responsibility:**
/// Turn an uploaded test-case archive into an ordered list of [`TestCase`]s,
/// or reject it with a structural error naming the offending entry.
///
/// **Archive Format:**
/// - A tar bundle, optionally gzip-compressed (detected by magic bytes)
/// - Entries named `case.<n>.in` / `case.<n>.out`, `n` a positive decimal
/// - Directory entries are ignored, only the final path component is checked
///
/// **Check Order:**
/// 1. Zero entries → `Empty`
/// 2. Any name outside the pattern → `Malformed`
/// 3. Odd entry count → `OddEntryCount` (before pairing is attempted)
/// 4. Sort by (ordinal, `.in` before `.out`), walk in pairs → `UnpairedCase`
///
/// **Points:**
/// Pretest and non-pretest cases are two partitions, each worth `pool`. In a
/// partition of `N` cases every case gets `floor(pool / N)` and the last one
/// in ordinal order takes the remainder, so each partition sums to `pool`.
///
/// Validation is pure. Decoding large bundles is CPU-bound, so the session
/// runs it through [`spawn_validation`] on the blocking pool.

use crate::error::ArchiveError;
use crate::suite::TestSuite;
use flate2::read::GzDecoder;
use optimus_common::config::DEFAULT_POINTS_POOL;
use optimus_common::types::TestCase;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Which half of a test case an entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntrySide {
    In,
    Out,
}

/// Raw named entry extracted from a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub pool: u32,
    /// Ordinals flagged as pretests; the archive itself cannot express this
    pub pretest_ordinals: BTreeSet<u32>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            pool: DEFAULT_POINTS_POOL,
            pretest_ordinals: BTreeSet::new(),
        }
    }
}

/// Parse `case.<n>.in` / `case.<n>.out`
///
/// `n` is the archive's own numbering and may be sparse, so it is kept as
/// `u64`; cases are renumbered from 1 once paired.
pub fn parse_entry_name(name: &str) -> Option<(u64, EntrySide)> {
    let rest = name.strip_prefix("case.")?;
    let (number, suffix) = rest.split_once('.')?;
    let side = match suffix {
        "in" => EntrySide::In,
        "out" => EntrySide::Out,
        _ => return None,
    };
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ordinal: u64 = number.parse().ok()?;
    if ordinal == 0 {
        return None;
    }
    Some((ordinal, side))
}

/// Split `pool` points over `count` cases, remainder on the last one
pub fn distribute_points(pool: u32, count: usize) -> Vec<u32> {
    if count == 0 {
        return Vec::new();
    }
    let share = pool / count as u32;
    let mut points = vec![share; count];
    points[count - 1] = pool - share * (count as u32 - 1);
    points
}

/// Split `pool` over each `is_pretest` partition of ordinal-sorted cases
pub fn assign_points(cases: &mut [TestCase], pool: u32) {
    for is_pretest in [true, false] {
        let count = cases.iter().filter(|tc| tc.is_pretest == is_pretest).count();
        let shares = distribute_points(pool, count);
        for (tc, points) in cases
            .iter_mut()
            .filter(|tc| tc.is_pretest == is_pretest)
            .zip(shares)
        {
            tc.points = points;
        }
    }
}

/// Read every file entry out of a (possibly gzipped) tar bundle
pub fn read_entries(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        debug!(compressed_size = bytes.len(), "Decompressing gzip archive");
        read_tar(GzDecoder::new(bytes))
    } else {
        read_tar(bytes)
    }
}

fn read_tar<R: Read>(reader: R) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    let iter = archive
        .entries()
        .map_err(|e| ArchiveError::Decode(e.to_string()))?;

    for entry in iter {
        let mut entry = entry.map_err(|e| ArchiveError::Decode(e.to_string()))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| ArchiveError::Decode(e.to_string()))?
            .into_owned();
        let name = entry_file_name(&path);

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::Decode(format!("{}: {}", name, e)))?;

        entries.push(ArchiveEntry { name, data });
    }

    Ok(entries)
}

fn entry_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Validate already-extracted entries
pub fn validate_entries(
    entries: Vec<ArchiveEntry>,
    options: &ArchiveOptions,
) -> Result<Vec<TestCase>, ArchiveError> {
    if entries.is_empty() {
        return Err(ArchiveError::Empty);
    }

    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_entry_name(&entry.name) {
            Some((ordinal, side)) => parsed.push((ordinal, side, entry.data)),
            None => return Err(ArchiveError::Malformed { name: entry.name }),
        }
    }

    if parsed.len() % 2 != 0 {
        return Err(ArchiveError::OddEntryCount {
            count: parsed.len(),
        });
    }

    parsed.sort_by_key(|(ordinal, side, _)| (*ordinal, *side));

    let mut pairs = Vec::with_capacity(parsed.len() / 2);
    let mut iter = parsed.into_iter();
    while let Some((ordinal, side, input)) = iter.next() {
        if side != EntrySide::In {
            return Err(ArchiveError::UnpairedCase { ordinal });
        }
        match iter.next() {
            Some((out_ordinal, EntrySide::Out, output)) if out_ordinal == ordinal => {
                pairs.push((ordinal, input, output));
            }
            _ => return Err(ArchiveError::UnpairedCase { ordinal }),
        }
    }

    let mut cases: Vec<TestCase> = pairs
        .into_iter()
        .enumerate()
        .map(|(idx, (archive_ordinal, input, output))| {
            let ordinal = idx as u32 + 1;
            if u64::from(ordinal) != archive_ordinal {
                warn!(archive_ordinal, ordinal, "Renumbering test case to close ordinal gap");
            }
            TestCase {
                ordinal,
                input,
                output,
                is_pretest: options.pretest_ordinals.contains(&ordinal),
                points: 0,
            }
        })
        .collect();

    assign_points(&mut cases, options.pool);
    Ok(cases)
}

/// Decode and validate a bundle with default options
pub fn validate_archive(bytes: &[u8]) -> Result<Vec<TestCase>, ArchiveError> {
    validate_archive_with(bytes, &ArchiveOptions::default())
}

pub fn validate_archive_with(
    bytes: &[u8],
    options: &ArchiveOptions,
) -> Result<Vec<TestCase>, ArchiveError> {
    let entries = read_entries(bytes)?;
    let cases = validate_entries(entries, options)?;
    info!(
        archive_size = bytes.len(),
        cases = cases.len(),
        pretests = cases.iter().filter(|tc| tc.is_pretest).count(),
        "Archive validated"
    );
    Ok(cases)
}

/// Run validation on the blocking pool, off the message-delivery path
///
/// The handle resolves exactly once with the validated suite.
pub fn spawn_validation(
    bytes: Vec<u8>,
    options: ArchiveOptions,
) -> JoinHandle<Result<TestSuite, ArchiveError>> {
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        validate_archive_with(&bytes, &options).map(TestSuite::new)
    })
}
