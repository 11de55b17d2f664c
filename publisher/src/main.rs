//! Post-build publisher CLI.
//!
//! The host runs `publisher publish` once a build's result is final. The exit
//! code tells the host what happened (see `exit_codes`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use publisher::core::types::{BuildIdentity, BuildOutcome};
use publisher::exit_codes;
use publisher::io::build_record::{BuildRecordStore, JsonRecordStore};
use publisher::io::config::{PublisherConfig, load_config};
use publisher::io::env::{EnvFile, EnvResolver, InheritedEnv};
use publisher::io::git::GitBinder;
use publisher::io::log_sink::{LogSink, WriterSink};
use publisher::logging;
use publisher::publish::{Build, DESCRIPTOR, PublishStep, StepReport, report_failure};

#[derive(Parser)]
#[command(
    name = "publisher",
    version,
    about = "Commit, tag and push a finished build to its git remote"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Commit the workspace, tag the build and push both to the first remote.
    Publish(PublishArgs),
    /// Print the stored build record as JSON.
    Record {
        #[arg(long)]
        project: String,
        #[arg(long = "build")]
        number: u64,
        /// Directory holding build records.
        #[arg(long)]
        state_dir: PathBuf,
    },
    /// Print what this step is and when it runs.
    Describe,
}

#[derive(Args)]
struct PublishArgs {
    #[arg(long)]
    project: String,
    #[arg(long = "build")]
    number: u64,
    /// Final result of the build (success, unstable, failure, not_built, aborted).
    #[arg(long)]
    outcome: BuildOutcome,
    /// Git working copy the build ran in.
    #[arg(long)]
    workspace: PathBuf,
    /// Directory holding build records. Keep it outside the workspace.
    #[arg(long)]
    state_dir: PathBuf,
    #[arg(long, default_value = "publisher.toml")]
    config: PathBuf,
    /// dotenv file with the build's environment variables.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Append the build log here instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Publish(args) => cmd_publish(&args),
        Command::Record {
            project,
            number,
            state_dir,
        } => cmd_record(&project, number, &state_dir),
        Command::Describe => {
            cmd_describe();
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_publish(args: &PublishArgs) -> Result<i32> {
    let log: Box<dyn LogSink> = match &args.log_file {
        Some(path) => Box::new(WriterSink::append_to(path)?),
        None => Box::new(WriterSink::new(std::io::stdout())),
    };

    let report = match prepare(args) {
        Ok((cfg, mut build)) => {
            let store = JsonRecordStore::new(&args.state_dir);
            match &args.env_file {
                Some(path) => perform(&cfg, &store, &EnvFile::new(path), &mut build, log.as_ref()),
                None => perform(&cfg, &store, &InheritedEnv, &mut build, log.as_ref()),
            }
        }
        // The build never started publishing, but the host still sees a failed step.
        Err(err) => report_failure(&err, log.as_ref()),
    };

    Ok(match report {
        StepReport::Published(_) => exit_codes::OK,
        StepReport::NoAction | StepReport::Declined => exit_codes::SKIPPED,
        StepReport::Failed { category, .. } => {
            eprintln!(
                "publish failed ({category}); build {}#{} marked {}",
                args.project,
                args.number,
                BuildOutcome::Failure
            );
            exit_codes::FAILED
        }
    })
}

fn prepare(args: &PublishArgs) -> Result<(PublisherConfig, Build)> {
    let identity =
        BuildIdentity::new(&args.project, args.number).context("resolve build identity")?;
    let cfg = load_config(&args.config)?;
    Ok((cfg, Build::new(identity, &args.workspace, args.outcome)))
}

fn perform<E: EnvResolver>(
    cfg: &PublisherConfig,
    store: &JsonRecordStore,
    env: &E,
    build: &mut Build,
    log: &dyn LogSink,
) -> StepReport {
    PublishStep::new(cfg, store, env, &GitBinder).perform(build, log)
}

fn cmd_record(project: &str, number: u64, state_dir: &Path) -> Result<i32> {
    let identity = BuildIdentity::new(project, number)?;
    let store = JsonRecordStore::new(state_dir);
    let record = store
        .get(&identity)?
        .ok_or_else(|| anyhow!("no build record for {identity}"))?;
    let json = serde_json::to_string_pretty(&record).context("serialize build record")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn cmd_describe() {
    println!("{}", DESCRIPTOR.display_name);
    println!("runs after finalized: {}", DESCRIPTOR.runs_after_finalized);
    println!("applicable to all jobs: {}", DESCRIPTOR.applicable_to_all_jobs);
}
