//! statekit CLI - persistent, content-addressed compute

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use statekit::{
    DiffReport, Engine, EngineConfig, Error, Layer, RunOutcome, DEFAULT_STATE_DIR,
};

#[derive(Parser)]
#[command(name = "statekit")]
#[command(about = "persistent, content-addressed compute - instructions captured as layers")]
#[command(version)]
struct Cli {
    /// state directory (default: .statekit, env: STATEKIT_DIR)
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// working directory (default: <state-dir>/work, env: STATEKIT_WORK)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// execute an instruction and capture its effect as a layer
    Run {
        /// shell instruction
        instruction: String,
    },

    /// execute an instruction without capturing anything
    Exec {
        /// shell instruction
        instruction: String,
    },

    /// run a JSON array of instructions in order
    Batch {
        /// path to a JSON file holding an array of instruction strings
        file: PathBuf,
    },

    /// show the chain from root to head
    History,

    /// show uncommitted workdir changes relative to head
    Status,

    /// show differences between two layer states
    Diff {
        /// base layer ref (default: empty state)
        from: Option<String>,

        /// target layer ref (default: head)
        to: Option<String>,
    },

    /// materialize an ancestor layer and move head to it
    Checkout {
        /// tag, hash prefix, or full hash
        r#ref: String,
    },

    /// create or replace a tag
    Tag {
        /// tag name
        name: String,

        /// layer ref (default: head)
        r#ref: Option<String>,
    },

    /// list tags
    Tags,

    /// remove a tag
    Untag {
        /// tag name
        name: String,
    },

    /// show one layer's metadata
    Inspect {
        /// tag, hash prefix, or full hash
        r#ref: String,
    },

    /// reconstruct the workdir from the chain
    Rebuild,

    /// delete the state directory and start over
    Reset,

    /// print the current head
    Head,

    /// check store integrity
    Verify,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> statekit::Result<ExitCode> {
    let config = engine_config(&cli);
    let mut engine = Engine::new(config)?;

    match cli.command {
        Commands::Run { instruction } => {
            print_outcome(&engine.run(&instruction)?);
        }

        Commands::Exec { instruction } => {
            engine.exec(&instruction)?;
        }

        Commands::Batch { file } => {
            let content = fs::read_to_string(&file).map_err(|source| Error::Io {
                path: file.clone(),
                source,
            })?;
            let instructions: Vec<String> =
                serde_json::from_str(&content).map_err(|e| Error::Io {
                    path: file.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                })?;
            for outcome in engine.batch(&instructions)? {
                print_outcome(&outcome);
            }
        }

        Commands::History => {
            for layer in engine.history() {
                print_history_line(&layer);
            }
        }

        Commands::Status => {
            let report = engine.status()?;
            if report.is_clean() {
                println!("clean");
            } else {
                print_report(&report);
            }
        }

        Commands::Diff { from, to } => {
            let report = engine.diff(from.as_deref(), to.as_deref())?;
            print_report(&report);
        }

        Commands::Checkout { r#ref } => {
            let hash = engine.checkout(&r#ref)?;
            println!("head is now {}", hash.short());
        }

        Commands::Tag { name, r#ref } => {
            let hash = engine.tag(&name, r#ref.as_deref())?;
            println!("{} -> {}", name, hash.short());
        }

        Commands::Tags => {
            for (name, hash) in engine.tags() {
                println!("{} {}", hash.short(), name);
            }
        }

        Commands::Untag { name } => {
            engine.untag(&name)?;
        }

        Commands::Inspect { r#ref } => {
            let info = engine.inspect(&r#ref)?;
            println!("hash:        {}", info.layer.hash);
            println!("instruction: {}", info.layer.instruction);
            match &info.layer.parent {
                Some(parent) => println!("parent:      {}", parent),
                None => println!("parent:      (root)"),
            }
            println!("time:        {}", format_time(info.layer.time));
            println!("size:        {} bytes", info.size);
        }

        Commands::Rebuild => {
            let count = engine.rebuild()?;
            println!("rebuilt {} layers", count);
        }

        Commands::Reset => {
            engine.reset()?;
            println!("reset");
        }

        Commands::Head => match engine.head() {
            Some(hash) => println!("{}", hash.short()),
            None => println!("(empty)"),
        },

        Commands::Verify => {
            let report = engine.verify()?;
            println!("layers checked: {}", report.layers_checked);
            for hash in &report.missing_blobs {
                println!("missing blob: {}", hash);
            }
            for hash in &report.corrupt_blobs {
                println!("corrupt blob: {}", hash);
            }
            for hash in &report.dangling_parents {
                println!("dangling parent on: {}", hash);
            }
            for name in &report.broken_tags {
                println!("broken tag: {}", name);
            }
            for hash in &report.unverified {
                println!("unverified (deletion layer): {}", hash.short());
            }
            if !report.is_ok() {
                return Ok(ExitCode::FAILURE);
            }
            println!("ok");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// resolve configuration from flags, environment, then defaults
fn engine_config(cli: &Cli) -> EngineConfig {
    let state_dir = cli
        .state_dir
        .clone()
        .or_else(|| env_path("STATEKIT_DIR"))
        .or_else(|| env_path("SEQUENTIAL_MACHINE_DIR"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

    let mut config = EngineConfig::new(state_dir);

    if let Some(workdir) = cli
        .workdir
        .clone()
        .or_else(|| env_path("STATEKIT_WORK"))
        .or_else(|| env_path("SEQUENTIAL_MACHINE_WORK"))
    {
        config = config.with_workdir(workdir);
    }

    config
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Created { hash } => println!("created {}", hash.short()),
        RunOutcome::Cached { hash } => println!("cached {}", hash.short()),
        RunOutcome::Empty { .. } => println!("no changes"),
    }
}

fn print_history_line(layer: &Layer) {
    let parent = layer
        .parent
        .map(|p| p.short())
        .unwrap_or_else(|| "-".to_string());
    println!("{} {} {}", layer.hash.short(), parent, layer.instruction);
}

fn print_report(report: &DiffReport) {
    for path in &report.added {
        println!("A {}", path);
    }
    for path in &report.modified {
        println!("M {}", path);
    }
    for path in &report.deleted {
        println!("D {}", path);
    }
}

/// render a millisecond epoch timestamp as UTC `YYYY-MM-DD HH:MM:SS`
///
/// uses the era-based civil-calendar conversion, so leap years and month
/// lengths come out exact without pulling in a date crate.
fn format_time(ms: i64) -> String {
    let secs = ms.div_euclid(1000);
    let days = secs.div_euclid(86_400);
    let tod = secs.rem_euclid(86_400);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = era * 400 + yoe + i64::from(month <= 2);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60
    )
}
