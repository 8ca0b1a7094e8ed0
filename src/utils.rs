use crate::error::{CaptureError, Result};
use crate::types::ContainerKey;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::ResourceExt;
use regex::Regex;

/// Label carried by every pod belonging to a managed PostgreSQL cluster.
pub const FLEET_LABEL: &str = "cnpg.io/cluster";

/// Label selector matching the operator pods.
pub const OPERATOR_SELECTOR: &str = "app.kubernetes.io/name=cloudnative-pg";

/// Selects every pod that carries the fleet label, whatever its value.
pub fn fleet_selector() -> LabelSelector {
    LabelSelector {
        match_labels: None,
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: FLEET_LABEL.to_string(),
            operator: "Exists".to_string(),
            values: None,
        }]),
    }
}

fn requirement_to_string(expr: &LabelSelectorRequirement) -> Option<String> {
    let values = || expr.values.as_deref().unwrap_or_default().join(",");
    match expr.operator.as_str() {
        "Exists" => Some(expr.key.clone()),
        "DoesNotExist" => Some(format!("!{}", expr.key)),
        "In" => Some(format!("{} in ({})", expr.key, values())),
        "NotIn" => Some(format!("{} notin ({})", expr.key, values())),
        _ => None,
    }
}

/// Render a LabelSelector in the string form accepted by list/watch calls.
///
/// Returns `None` for an empty selector or one with an unknown operator.
pub fn selector_to_string(selector: &LabelSelector) -> Option<String> {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    for expr in selector.match_expressions.iter().flatten() {
        parts.push(requirement_to_string(expr)?);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// Compile a pod or container name filter.
pub fn compile_query(what: &'static str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| CaptureError::Pattern {
        what,
        pattern: pattern.to_string(),
        source,
    })
}

/// Which container kinds to follow besides the regular ones.
#[derive(Debug, Clone)]
pub struct ContainerFilter {
    pub pod_query: Regex,
    pub container_query: Regex,
    pub init_containers: bool,
    pub ephemeral_containers: bool,
}

impl Default for ContainerFilter {
    fn default() -> Self {
        let any = Regex::new(".*").expect("static pattern");
        Self {
            pod_query: any.clone(),
            container_query: any,
            init_containers: true,
            ephemeral_containers: true,
        }
    }
}

fn is_running(status: &ContainerStatus) -> bool {
    status
        .state
        .as_ref()
        .is_some_and(|state| state.running.is_some())
}

/// Containers of `pod` that are running and pass the filter.
pub fn running_containers(pod: &Pod, filter: &ContainerFilter) -> Vec<ContainerKey> {
    let pod_name = pod.name_any();
    let Some(namespace) = pod.namespace() else {
        return Vec::new();
    };
    if !filter.pod_query.is_match(&pod_name) {
        return Vec::new();
    }
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };

    let mut groups = vec![status.container_statuses.as_deref()];
    if filter.init_containers {
        groups.push(status.init_container_statuses.as_deref());
    }
    if filter.ephemeral_containers {
        groups.push(status.ephemeral_container_statuses.as_deref());
    }

    groups
        .into_iter()
        .flatten()
        .flatten()
        .filter(|c| is_running(c) && filter.container_query.is_match(&c.name))
        .map(|c| ContainerKey {
            namespace: namespace.clone(),
            pod_name: pod_name.clone(),
            container_name: c.name.clone(),
        })
        .collect()
}
