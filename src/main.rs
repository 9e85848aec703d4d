//! Command-line front-end.
//!
//! `run` chunks a document; `eval` scores predicted chunk files against a
//! gold directory. Exit codes: 0 success, 1 unrecoverable pipeline error,
//! 2 configuration error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use topicseam::config::{Config, ProviderMode};
use topicseam::evaluation::evaluate_dirs;
use topicseam::pipeline::run_file;

#[derive(Parser)]
#[command(name = "topicseam", version, about = "Topic-boundary document chunker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk a text file into topic-coherent JSONL records.
    Run {
        /// Input text file.
        input: PathBuf,
        /// YAML configuration file; defaults apply when omitted.
        #[arg(long)]
        conf: Option<PathBuf>,
        /// Override llm.provider to `remote` for this invocation.
        #[arg(long)]
        force_remote: bool,
        /// Output path; defaults to `<input>.chunks.jsonl`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compute boundary F1 of predicted chunk files against a gold set.
    Eval {
        /// Directory of gold JSONL files.
        #[arg(long)]
        gold: PathBuf,
        /// Directory of predicted JSONL files, matched by file name.
        #[arg(long)]
        pred: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            input,
            conf,
            force_remote,
            out,
        } => run_command(input, conf, force_remote, out).await,
        Command::Eval { gold, pred } => eval_command(gold, pred),
    }
}

async fn run_command(
    input: PathBuf,
    conf: Option<PathBuf>,
    force_remote: bool,
    out: Option<PathBuf>,
) -> ExitCode {
    let mut cfg = match conf {
        Some(path) => match Config::load(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error: ConfigError: {e}");
                return ExitCode::from(2);
            }
        },
        None => Config::default(),
    };
    if force_remote {
        cfg.llm.provider = ProviderMode::Remote;
    }
    if let Err(e) = cfg.validate() {
        eprintln!("error: ConfigError: {e}");
        return ExitCode::from(2);
    }

    match run_file(&cfg, &input, out.as_deref()).await {
        Ok(report) => {
            println!(
                "wrote {} chunks ({} sentences) to {}",
                report.chunks,
                report.sentences,
                report.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!(
                "error: {} after line {}: {}",
                e.source.kind(),
                e.last_line,
                e.source
            );
            ExitCode::from(1)
        }
    }
}

fn eval_command(gold: PathBuf, pred: PathBuf) -> ExitCode {
    match evaluate_dirs(&gold, &pred) {
        Ok(score) => {
            println!("Topic-Boundary F1: {:.4}", score.f1);
            println!(
                "precision: {:.4}  recall: {:.4}  files: {}",
                score.precision, score.recall, score.files
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}: {e}", e.kind());
            ExitCode::from(1)
        }
    }
}
