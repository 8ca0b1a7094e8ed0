//! On-disk layout of the captured logs.

use crate::error::{CaptureError, Result};
use crate::types::ContainerKey;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Base directory for the fleet-wide tail.
pub const CLUSTER_LOGS_DIR: &str = "cluster_logs";

/// Base directory for the operator tail. Kept apart from the cluster logs so
/// both sessions can run at once.
pub const OPERATOR_LOGS_DIR: &str = "operator_logs";

/// Directory receiving the namespace-filtered dumps.
pub const DUMP_DIR: &str = "out";

/// A path component is usable only if it stays a single normal segment.
fn is_safe_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
        && !name.contains('\\')
}

/// `<base>/<namespace>/<pod>/<container>.log`, or `None` if any part of the
/// key would escape its directory.
pub fn container_log_path(base: &Path, key: &ContainerKey) -> Option<PathBuf> {
    let parts = [&key.namespace, &key.pod_name, &key.container_name];
    if !parts.iter().all(|p| is_safe_component(p)) {
        return None;
    }
    Some(
        base.join(&key.namespace)
            .join(&key.pod_name)
            .join(format!("{}.log", key.container_name)),
    )
}

/// `<logsType>_ns-<namespace>_<specName>.log`, spaces in the spec name
/// replaced by underscores.
pub fn dump_file_name(logs_type: &str, namespace: &str, spec_name: &str) -> String {
    format!(
        "{}_ns-{}_{}.log",
        logs_type,
        namespace,
        spec_name.replace(' ', "_")
    )
}

/// Drop the captured logs of a namespace unless they should be kept, e.g.
/// because the test that used the namespace failed.
pub async fn cleanup_namespace_logs(base: &Path, namespace: &str, keep: bool) -> Result<bool> {
    if keep || !is_safe_component(namespace) {
        return Ok(false);
    }
    let dir = base.join(namespace);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => {
            debug!("Removed captured logs in {}", dir.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CaptureError::io(dir, e)),
    }
}
