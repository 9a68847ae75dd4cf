use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{LevelFilter, warn};

use kpipe::config::{DEFAULT_BROKERS, DEFAULT_CLIENT_ID};
use kpipe::track::{DEFAULT_SAMPLE_INTERVAL, DEFAULT_TRACE_FILE, ProcessTracker};

mod commands;

use commands::*;

#[derive(Parser)]
#[command(
    name = "kpipe",
    about = "Inspect a Kafka cluster and pipe records between Kafka, files and standard streams",
    version,
    long_about = None
)]
pub struct Cli {
    /// Bootstrap brokers, comma separated host:port
    #[arg(
        short = 'b',
        long = "broker",
        env = "KPIPE_BROKERS",
        default_value = DEFAULT_BROKERS,
        global = true
    )]
    pub brokers: String,

    /// Client id sent with every request
    #[arg(long, default_value = DEFAULT_CLIENT_ID, global = true)]
    pub client_id: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Write a memory trace as CSV
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = DEFAULT_TRACE_FILE
    )]
    pub trace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cluster status and topic administration
    #[command(subcommand)]
    Kafka(KafkaCommands),

    /// Cluster status, same as `kafka ls`
    #[command(after_help = ROLLUP_NOTE)]
    Status(LsArgs),

    /// Read from a source to stdout
    #[command(subcommand)]
    Read(ReadCommands),

    /// Write stdin to a destination
    #[command(subcommand)]
    Write(WriteCommands),

    /// Export a topic as a sequence of parts
    #[command(subcommand)]
    Export(ExportCommands),
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose || cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // RUST_LOG, when set, wins over the flags
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let tracker = ProcessTracker::start(cli.trace.as_deref(), DEFAULT_SAMPLE_INTERVAL)?;

    let result = tokio::select! {
        result = execute(&cli) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    tracker.stop();
    result
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Kafka(cmd) => kafka::execute(cmd, cli).await,
        Commands::Status(args) => kafka::list(args, cli).await,
        Commands::Read(cmd) => read::execute(cmd, cli).await,
        Commands::Write(cmd) => write::execute(cmd).await,
        Commands::Export(cmd) => export::execute(cmd, cli).await,
    }
}
