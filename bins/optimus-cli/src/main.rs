mod commands;

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "optimus-cli")]
#[command(about = "Optimus CLI - Validate test archives and follow submissions", long_about = None)]
struct Cli {
    /// Client config file (defaults plus REDIS_URL / OPTIMUS_* env when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a test-case archive and print the resulting cases
    Validate {
        /// Archive path (tar or tar.gz with case.<n>.in / case.<n>.out entries)
        #[arg(short, long)]
        archive: PathBuf,

        /// Points distributed over all cases
        #[arg(short, long)]
        pool: Option<u32>,

        /// Ordinals to flag as pretests (e.g. 1,2)
        #[arg(long, value_delimiter = ',')]
        pretest: Vec<u32>,
    },

    /// Submit code and follow its verdicts until the run is finalized
    Watch {
        /// Archive holding the problem's test cases
        #[arg(short, long)]
        archive: PathBuf,

        /// Source file to submit
        #[arg(long)]
        code_file: PathBuf,

        #[arg(long)]
        problem_id: u64,

        #[arg(long)]
        language_id: u64,

        #[arg(long)]
        contest_id: Option<u64>,

        /// Submission id issued by the grading queue (generated when omitted)
        #[arg(long)]
        submission_id: Option<u64>,

        /// Run only the pretests instead of the full suite
        #[arg(long, default_value = "false")]
        pretest_run: bool,

        /// Ordinals to flag as pretests (e.g. 1,2)
        #[arg(long, value_delimiter = ',')]
        pretest: Vec<u32>,
    },

    /// Write a default client config
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Validate {
            archive,
            pool,
            pretest,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::validate(&archive, pool.unwrap_or(config.points_pool), &pretest).await?;
        }
        Commands::Watch {
            archive,
            code_file,
            problem_id,
            language_id,
            contest_id,
            submission_id,
            pretest_run,
            pretest,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::watch(
                config,
                commands::WatchArgs {
                    archive,
                    code_file,
                    problem_id,
                    language_id,
                    contest_id,
                    submission_id,
                    pretest_run,
                    pretest,
                },
            )
            .await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
    }

    Ok(())
}
