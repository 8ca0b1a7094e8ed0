use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "podlog-capture")]
#[command(about = "Capture PostgreSQL cluster and operator pod logs to disk")]
pub struct Cli {
    /// Kubeconfig context (defaults to the current one)
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Tail every cluster pod into <output-dir>/cluster_logs
    Cluster(TailArgs),

    /// Tail the operator pods into <output-dir>/operator_logs
    Operator(TailArgs),

    /// Follow the operator log, then dump one namespace's lines when stopped
    Capture(CaptureArgs),

    /// Filter a saved raw operator log down to one namespace
    Dump(DumpArgs),

    /// Remove the captured cluster logs of a namespace
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TailArgs {
    /// Directory receiving the log directories
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Lookback for newly discovered containers, in seconds
    #[arg(long, default_value_t = 48 * 60 * 60)]
    pub since: u64,

    /// Maximum number of concurrent log requests
    #[arg(long, default_value_t = 50)]
    pub max_log_requests: usize,

    /// Only follow pods whose name matches this regex
    #[arg(long, default_value = ".*")]
    pub pod_query: String,

    /// Only follow containers whose name matches this regex
    #[arg(long, default_value = ".*")]
    pub container_query: String,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct DumpTarget {
    /// Namespace whose lines are kept
    #[arg(short = 'n', long)]
    pub namespace: String,

    /// Name of the test spec, used in the output file name
    #[arg(long, default_value = "capture")]
    pub spec_name: String,

    /// Directory receiving the dump file
    #[arg(short, long, default_value = "out")]
    pub output_dir: PathBuf,

    /// Number of warning/error lines printed at the end
    #[arg(long, default_value_t = 10)]
    pub cap_lines: usize,

    /// Prefix of the dump file name
    #[arg(long, default_value = "operator_logs")]
    pub logs_type: String,
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub target: DumpTarget,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    #[command(flatten)]
    pub target: DumpTarget,

    /// Raw log file to read, "-" for stdin
    pub input: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Namespace whose logs are removed
    pub namespace: String,

    /// Directory holding cluster_logs
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Keep the logs (e.g. because the test failed)
    #[arg(long)]
    pub keep: bool,
}
