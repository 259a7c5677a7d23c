// CLI commands for validating archives and following submissions
use anyhow::{bail, Context, Result};
use optimus_client::{spawn_validation, ArchiveOptions, Session, SessionEvent, TrackStatus};
use optimus_common::config::ClientConfig;
use optimus_common::types::{RunKind, SubmissionIntent, TestCase};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::signal;
use tracing::{info, warn};

const CONFIG_PATH: &str = "config/client.json";

pub struct WatchArgs {
    pub archive: PathBuf,
    pub code_file: PathBuf,
    pub problem_id: u64,
    pub language_id: u64,
    pub contest_id: Option<u64>,
    pub submission_id: Option<u64>,
    pub pretest_run: bool,
    pub pretest: Vec<u32>,
}

/// Load config from an explicit path, else defaults overlaid with env
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::load(path),
        None => ClientConfig::from_env(),
    }
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > 24 {
        format!("{}…", line.chars().take(24).collect::<String>())
    } else {
        line.to_string()
    }
}

fn print_cases(cases: &[TestCase]) {
    println!("  {:>4}  {:>6}  {:<7}  {:<26}  {:<26}", "#", "points", "pretest", "input", "output");
    for tc in cases {
        println!(
            "  {:>4}  {:>6}  {:<7}  {:<26}  {:<26}",
            tc.ordinal,
            tc.points,
            if tc.is_pretest { "yes" } else { "" },
            preview(&tc.input),
            preview(&tc.output)
        );
    }
}

/// Validate an archive and print its test cases
pub async fn validate(archive: &Path, pool: u32, pretest: &[u32]) -> Result<()> {
    println!("🔍 Validating archive: {}", archive.display());

    let bytes = tokio::fs::read(archive)
        .await
        .with_context(|| format!("Failed to read {}", archive.display()))?;

    let options = ArchiveOptions {
        pool,
        pretest_ordinals: pretest.iter().copied().collect(),
    };
    let suite = spawn_validation(bytes, options)
        .await
        .context("Validation task failed")?
        .with_context(|| format!("Archive {} rejected", archive.display()))?;

    print_cases(suite.cases());
    println!();
    println!(
        "✅ {} test cases, {} pretests, {} points",
        suite.len(),
        suite.case_count(RunKind::Pretest),
        suite.max_points(RunKind::Full)
    );
    Ok(())
}

fn default_submission_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Pump session events until the channel is up and the archive is loaded
async fn prepare(session: &mut Session) -> Result<()> {
    let mut connected = session.channel().is_connected();
    let mut loaded = session.test_suite().is_some();

    while !(connected && loaded) {
        match session.next_event().await {
            Some(SessionEvent::ChannelConnected { epoch }) => {
                info!(epoch, "Connected to result channel");
                connected = true;
            }
            Some(SessionEvent::ArchiveLoaded(Ok(cases))) => {
                println!("📦 Loaded {} test cases", cases);
                loaded = true;
            }
            Some(SessionEvent::ArchiveLoaded(Err(e))) => bail!("Archive rejected: {}", e),
            Some(SessionEvent::ChannelUnavailable) | None => {
                bail!("Result channel unavailable, check REDIS_URL and retry")
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Follow one track until it is finalized or failed
async fn follow(session: &mut Session, kind: RunKind) -> Result<TrackStatus> {
    loop {
        match session.next_event().await {
            Some(SessionEvent::Applied { kind: applied, .. }) if applied == kind => {
                if let Some(summary) = session.summary(kind) {
                    println!("{}\n", summary);
                }
                let status = session.track(kind).status;
                if status.is_terminal() {
                    return Ok(status);
                }
            }
            Some(SessionEvent::TracksExpired(kinds)) if kinds.contains(&kind) => {
                return Ok(TrackStatus::Failed);
            }
            Some(SessionEvent::ChannelConnected { epoch }) => {
                warn!(epoch, "Reconnected; verdicts sent during the outage may be missing");
            }
            Some(SessionEvent::ChannelUnavailable) | None => {
                bail!("Result channel lost before the run finished; resubmit to retry")
            }
            Some(_) => {}
        }
    }
}

/// Submit code and render its verdicts as they stream in
pub async fn watch(config: ClientConfig, args: WatchArgs) -> Result<()> {
    let code = tokio::fs::read_to_string(&args.code_file)
        .await
        .with_context(|| format!("Failed to read {}", args.code_file.display()))?;
    let bundle = tokio::fs::read(&args.archive)
        .await
        .with_context(|| format!("Failed to read {}", args.archive.display()))?;

    let kind = if args.pretest_run {
        RunKind::Pretest
    } else {
        RunKind::Full
    };
    let intent = SubmissionIntent {
        id: args.submission_id.unwrap_or_else(default_submission_id),
        kind,
        problem_id: args.problem_id,
        language_id: args.language_id,
        code,
        contest_id: args.contest_id,
    };

    let redis_url = config.redis_url.clone();
    let mut session = Session::open_redis(config)?;

    let mut options = session.archive_options();
    options.pretest_ordinals = args.pretest.iter().copied().collect::<BTreeSet<u32>>();
    session.begin_archive_load(bundle, Some(options));
    prepare(&mut session).await?;

    if kind == RunKind::Pretest && session.test_suite().map(|s| s.case_count(kind)) == Some(0) {
        bail!("No pretests flagged; pass --pretest with the example ordinals");
    }

    // Arm the track before queueing so early verdicts are not discarded
    session.submit(&intent)?;

    let client = redis::Client::open(redis_url.as_str())?;
    let mut conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    optimus_common::redis::push_intent(&mut conn, &session.id(), &intent)
        .await
        .context("Failed to queue submission")?;

    println!("🚀 Submitted #{} ({} run), waiting for verdicts...\n", intent.id, kind);

    let outcome = tokio::select! {
        status = follow(&mut session, kind) => Some(status?),
        _ = signal::ctrl_c() => None,
    };

    let discards = session.discards();
    if discards.total() > 0 {
        info!(
            not_in_flight = discards.track_not_in_flight,
            unknown_ordinal = discards.unknown_ordinal,
            foreign_submission = discards.foreign_submission,
            "Discarded stale messages"
        );
    }
    session.close();

    match outcome {
        Some(TrackStatus::Finalized) => println!("✅ Run finalized"),
        Some(TrackStatus::Failed) => println!("⚠️  No final result received in time"),
        Some(status) => println!("Run ended in state {:?}", status),
        None => println!("Interrupted"),
    }
    Ok(())
}

/// Write a default client config under `path`
pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing Optimus client config at: {}", path);

    let config_path = Path::new(path).join(CONFIG_PATH);
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if config_path.exists() {
        println!("  ⚠️  {} already exists, leaving it untouched", config_path.display());
    } else {
        let json_content = serde_json::to_string_pretty(&ClientConfig::default())
            .context("Failed to serialize client config")?;
        fs::write(&config_path, json_content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("  ✅ Created: {}", config_path.display());
    }

    println!("\n📋 Next steps:");
    println!("  1. Point redis_url at the grading queue");
    println!("  2. Validate an archive: optimus-cli validate --archive tests.tar");
    Ok(())
}
