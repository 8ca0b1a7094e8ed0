use crate::error::{CaptureError, Result};
use crate::layout::{CLUSTER_LOGS_DIR, OPERATOR_LOGS_DIR};
use crate::streamer::{LineSink, LogSource, MultiPodLogStreamer, TailSession};
use crate::types::{ContainerKey, TaggedLine};
use crate::utils::{
    ContainerFilter, OPERATOR_SELECTOR, fleet_selector, running_containers, selector_to_string,
};
use chrono::{DateTime, Utc};
use futures::io::AsyncBufReadExt;
use futures::stream::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{Config as WatcherConfig, Event, watcher};
use kube::{Api, Client, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default lookback for a freshly discovered container.
pub const DEFAULT_SINCE: Duration = Duration::from_secs(48 * 60 * 60);

/// Default cap on concurrently open log requests.
pub const DEFAULT_MAX_LOG_REQUESTS: usize = 50;

const LINE_CHANNEL_SIZE: usize = 1024;

/// Settings shared by the cluster and operator tails.
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Directory under which `cluster_logs/` and `operator_logs/` are created.
    pub output_root: PathBuf,
    pub since: Duration,
    pub max_log_requests: usize,
    pub filter: ContainerFilter,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            since: DEFAULT_SINCE,
            max_log_requests: DEFAULT_MAX_LOG_REQUESTS,
            filter: ContainerFilter::default(),
        }
    }
}

/// Follows the logs of every running container of the pods matching a label
/// selector, in all namespaces.
pub struct KubeLogSource {
    client: Client,
    label_selector: String,
    options: TailOptions,
}

impl KubeLogSource {
    pub fn new(client: Client, label_selector: impl Into<String>, options: TailOptions) -> Self {
        Self {
            client,
            label_selector: label_selector.into(),
            options,
        }
    }
}

/// Bookkeeping of the per-container stream tasks.
/// Whole seconds of lookback for the log API, at least one.
fn since_seconds(since: Duration) -> i64 {
    i64::try_from(since.as_secs().max(1)).unwrap_or(i64::MAX)
}

struct ContainerStreams {
    client: Client,
    options: TailOptions,
    permits: Arc<Semaphore>,
    lines: mpsc::Sender<TaggedLine>,
    active: HashSet<ContainerKey>,
    /// When the last stream of a container ended, so a re-attach does not
    /// replay lines already written.
    ended_at: HashMap<ContainerKey, DateTime<Utc>>,
    tasks: JoinSet<ContainerKey>,
}

impl ContainerStreams {
    fn lookback_seconds(&self, key: &ContainerKey) -> i64 {
        match self.ended_at.get(key) {
            Some(ended) => (Utc::now() - *ended).num_seconds().max(1),
            None => since_seconds(self.options.since),
        }
    }

    fn handle_event(&mut self, event: Event<Pod>) {
        match event {
            Event::Apply(pod) | Event::InitApply(pod) => {
                for key in running_containers(&pod, &self.options.filter) {
                    if !self.active.contains(&key) {
                        self.start(key);
                    }
                }
            }
            Event::Delete(pod) => {
                let name = pod.name_any();
                let namespace = pod.namespace().unwrap_or_default();
                debug!("Pod {}/{} deleted", namespace, name);
                self.ended_at
                    .retain(|k, _| k.namespace != namespace || k.pod_name != name);
            }
            Event::Init => debug!("Initializing pod watcher"),
            Event::InitDone => debug!("Pod watcher initialization complete"),
        }
    }

    fn start(&mut self, key: ContainerKey) {
        let params = LogParams {
            follow: true,
            container: Some(key.container_name.clone()),
            since_seconds: Some(self.lookback_seconds(&key)),
            ..Default::default()
        };
        info!("Tailing {}", key);
        self.active.insert(key.clone());
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        self.tasks.spawn(tail_container(
            api,
            key,
            params,
            self.permits.clone(),
            self.lines.clone(),
        ));
    }

    fn finished(&mut self, joined: std::result::Result<ContainerKey, tokio::task::JoinError>) {
        match joined {
            Ok(key) => {
                self.active.remove(&key);
                self.ended_at.insert(key, Utc::now());
            }
            Err(e) => error!("Container log task failed: {}", e),
        }
    }
}

async fn tail_container(
    api: Api<Pod>,
    key: ContainerKey,
    params: LogParams,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<TaggedLine>,
) -> ContainerKey {
    let Ok(_permit) = permits.acquire_owned().await else {
        return key;
    };
    match api.log_stream(&key.pod_name, &params).await {
        Ok(stream) => {
            let mut lines = stream.lines();
            while let Some(line_result) = lines.next().await {
                match line_result {
                    Ok(line) => {
                        let msg = TaggedLine {
                            message: line,
                            namespace: key.namespace.clone(),
                            pod_name: key.pod_name.clone(),
                            container_name: key.container_name.clone(),
                        };
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error reading log line from {}: {}", key, e);
                        break;
                    }
                }
            }
            debug!("Log stream ended for {}", key);
        }
        Err(e) => warn!("Failed to get log stream for {}: {}", key, e),
    }
    key
}

impl LogSource for KubeLogSource {
    async fn pump(self, mut sink: LineSink) -> Result<()> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let cfg = WatcherConfig::default().labels(&self.label_selector);
        let mut pods = watcher(api, cfg).default_backoff().boxed();

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_SIZE);
        let mut lines = ReceiverStream::new(rx);
        let mut streams = ContainerStreams {
            client: self.client,
            permits: Arc::new(Semaphore::new(self.options.max_log_requests.max(1))),
            options: self.options,
            lines: tx,
            active: HashSet::new(),
            ended_at: HashMap::new(),
            tasks: JoinSet::new(),
        };

        debug!("Starting pod watcher for selector: {}", self.label_selector);
        loop {
            tokio::select! {
                event = pods.next() => match event {
                    Some(Ok(event)) => streams.handle_event(event),
                    Some(Err(e)) => warn!("Pod watcher with selector {} failed: {}", self.label_selector, e),
                    None => break,
                },
                Some(line) = lines.next() => sink.send(&line).await?,
                Some(joined) = streams.tasks.join_next(), if !streams.tasks.is_empty() => {
                    streams.finished(joined);
                }
            }
        }
        Ok(())
    }
}

fn start_tail(
    client: Client,
    cancel: CancellationToken,
    label_selector: String,
    output_dir: PathBuf,
    options: &TailOptions,
) -> TailSession {
    let source = KubeLogSource::new(client, label_selector, options.clone());
    MultiPodLogStreamer::new(output_dir).start(cancel, source)
}

/// Tail every pod of the managed clusters into `<output_root>/cluster_logs/`.
pub fn tail_cluster_logs(
    client: Client,
    cancel: CancellationToken,
    options: &TailOptions,
) -> TailSession {
    let selector = selector_to_string(&fleet_selector()).unwrap_or_default();
    start_tail(
        client,
        cancel,
        selector,
        options.output_root.join(CLUSTER_LOGS_DIR),
        options,
    )
}

/// Tail the operator pods into `<output_root>/operator_logs/`.
pub fn tail_operator_logs(
    client: Client,
    cancel: CancellationToken,
    options: &TailOptions,
) -> TailSession {
    start_tail(
        client,
        cancel,
        OPERATOR_SELECTOR.to_string(),
        options.output_root.join(OPERATOR_LOGS_DIR),
        options,
    )
}

/// Locate the operator pod, preferring a running one.
pub async fn find_operator_pod(client: &Client) -> Result<Pod> {
    let api: Api<Pod> = Api::all(client.clone());
    let pods = api
        .list(&ListParams::default().labels(OPERATOR_SELECTOR))
        .await?;
    let mut candidates = pods.items;
    candidates.sort_by_key(|pod| {
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        phase != Some("Running")
    });
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| CaptureError::NoOperatorPod(OPERATOR_SELECTOR.to_string()))
}

/// Follow one pod's raw log into `writer` until the stream ends or `cancel`
/// fires. Returns the number of lines copied.
pub async fn tail_pod_logs<W>(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    container: Option<String>,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = LogParams {
        follow: true,
        container,
        ..Default::default()
    };
    let stream = api.log_stream(pod_name, &params).await?;
    let mut lines = stream.lines();
    let mut copied = 0;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.try_next() => line,
        };
        match line {
            Ok(Some(mut line)) => {
                line.push('\n');
                writer
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| CaptureError::io(format!("{}/{}", namespace, pod_name), e))?;
                copied += 1;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading log of {}/{}: {}", namespace, pod_name, e);
                break;
            }
        }
    }
    if let Err(e) = writer.flush().await {
        warn!("Error flushing log of {}/{}: {}", namespace, pod_name, e);
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_seconds_is_clamped() {
        assert_eq!(since_seconds(DEFAULT_SINCE), 48 * 60 * 60);
        assert_eq!(since_seconds(Duration::ZERO), 1);
        assert_eq!(since_seconds(Duration::from_millis(300)), 1);
        assert_eq!(since_seconds(Duration::from_secs(u64::MAX)), i64::MAX);
    }
}
