mod cli;

use clap::Parser;
use kube::{Client, config};
use podlog_capture::kubernetes::{TailOptions, find_operator_pod, tail_pod_logs};
use podlog_capture::layout::{CLUSTER_LOGS_DIR, cleanup_namespace_logs};
use podlog_capture::utils::{ContainerFilter, compile_query};
use podlog_capture::{SessionState, TailSession, dump_namespace_logs};
use std::io::Read;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::{CaptureArgs, CleanupArgs, Cli, Command, DumpArgs, DumpTarget, TailArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Cluster(args) => {
            let client = initialize_client(cli.context).await?;
            let options = tail_options(&args)?;
            let cancel = CancellationToken::new();
            let session = podlog_capture::tail_cluster_logs(client, cancel.clone(), &options);
            run_session(session, cancel, args.duration).await
        }
        Command::Operator(args) => {
            let client = initialize_client(cli.context).await?;
            let options = tail_options(&args)?;
            let cancel = CancellationToken::new();
            let session = podlog_capture::tail_operator_logs(client, cancel.clone(), &options);
            run_session(session, cancel, args.duration).await
        }
        Command::Capture(args) => {
            let client = initialize_client(cli.context).await?;
            run_capture(client, args).await
        }
        Command::Dump(args) => run_dump(args).await,
        Command::Cleanup(args) => run_cleanup(args).await,
    }
}

async fn initialize_client(context: Option<String>) -> anyhow::Result<Client> {
    let client = match context {
        None => {
            let config = config::Config::infer().await?;
            info!("Using current context");
            Client::try_from(config)?
        }
        Some(ctx) => {
            let config = config::Config::from_kubeconfig(&config::KubeConfigOptions {
                context: Some(ctx.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("Context '{}' not found in kubeconfig: {}", ctx, e))?;
            info!("Initialized client for context: {}", ctx);
            Client::try_from(config)?
        }
    };
    Ok(client)
}

fn tail_options(args: &TailArgs) -> anyhow::Result<TailOptions> {
    Ok(TailOptions {
        output_root: args.output_dir.clone(),
        since: Duration::from_secs(args.since),
        max_log_requests: args.max_log_requests,
        filter: ContainerFilter {
            pod_query: compile_query("pod", &args.pod_query)?,
            container_query: compile_query("container", &args.container_query)?,
            ..Default::default()
        },
    })
}

/// Cancel `cancel` on Ctrl-C, or once `duration` seconds have passed.
fn cancel_on_stop(cancel: CancellationToken, duration: Option<u64>) {
    tokio::spawn(async move {
        match duration {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    _ = tokio::signal::ctrl_c() => {}
                    _ = cancel.cancelled() => {}
                }
            }
            None => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
        cancel.cancel();
    });
}

async fn run_session(
    session: TailSession,
    cancel: CancellationToken,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    cancel_on_stop(cancel, duration);
    let (state, report) = session.wait().await;
    info!(
        "Session {:?}: {} lines written to {} files",
        state, report.tally.written, report.files_closed
    );
    if report.tally.dropped() > 0 {
        warn!(
            "{} lines dropped ({} malformed, {} without target, {} open failures, {} write failures)",
            report.tally.dropped(),
            report.tally.malformed,
            report.tally.no_target,
            report.tally.open_failed,
            report.tally.write_failed
        );
    }
    if state == SessionState::Drained {
        info!("Log source ended before being stopped");
    }
    Ok(())
}

async fn dump(raw_logs: Vec<u8>, target: DumpTarget) -> anyhow::Result<()> {
    let (path, dump) = tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout().lock();
        dump_namespace_logs(
            &raw_logs,
            &target.logs_type,
            &target.namespace,
            &target.spec_name,
            &target.output_dir,
            target.cap_lines,
            &mut stdout,
        )
    })
    .await??;
    info!(
        "{} lines for the namespace saved to {}",
        dump.lines_written,
        path.display()
    );
    Ok(())
}

async fn run_capture(client: Client, args: CaptureArgs) -> anyhow::Result<()> {
    let pod = find_operator_pod(&client).await?;
    let pod_name = kube::ResourceExt::name_any(&pod);
    let namespace = kube::ResourceExt::namespace(&pod).unwrap_or_default();
    info!("Following operator pod {}/{}", namespace, pod_name);

    let cancel = CancellationToken::new();
    cancel_on_stop(cancel.clone(), args.duration);

    let mut raw_logs = Vec::new();
    match tail_pod_logs(&client, &namespace, &pod_name, None, &mut raw_logs, &cancel).await {
        Ok(lines) => info!("Captured {} operator log lines", lines),
        Err(e) => warn!("Error tailing operator logs, dumping what was captured: {}", e),
    }
    cancel.cancel();
    dump(raw_logs, args.target).await
}

async fn run_dump(args: DumpArgs) -> anyhow::Result<()> {
    let raw_logs = if args.input.as_os_str() == "-" {
        tokio::task::spawn_blocking(|| {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).map(|_| buf)
        })
        .await??
    } else {
        tokio::fs::read(&args.input)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", args.input.display(), e))?
    };
    dump(raw_logs, args.target).await
}

async fn run_cleanup(args: CleanupArgs) -> anyhow::Result<()> {
    let base = args.output_dir.join(CLUSTER_LOGS_DIR);
    if cleanup_namespace_logs(&base, &args.namespace, args.keep).await? {
        info!("Removed logs of namespace {}", args.namespace);
    } else {
        info!("Nothing removed for namespace {}", args.namespace);
    }
    Ok(())
}
