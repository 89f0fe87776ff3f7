//! Selector Extractor: derive a label query from a workload selector.
//!
//! Workloads carry `spec.selector` either as equality labels
//! (`matchLabels`) or as set-based requirements (`matchExpressions`).
//! The pod and ReplicaSet listings take a single comma-joined query string
//! in the Kubernetes label-selector dialect.
//!
//! Equality labels win: when any are present the expressions are ignored.
//! `In`/`NotIn` encode only the first listed value.

use serde_json::Value;

use crate::document::Document;

/// Label query for a workload, or `""` when the selector is empty or
/// unrecognized. Callers fall back to [`fallback_query`] on `""`.
pub fn extract_label_selector(workload: &Document) -> String {
    let Some(selector) = workload.get_map("spec.selector") else {
        return String::new();
    };

    if let Some(match_labels) = selector.get("matchLabels").and_then(Value::as_object) {
        let labels: Vec<String> = match_labels
            .iter()
            .filter_map(|(key, value)| value.as_str().map(|v| format!("{key}={v}")))
            .collect();
        if !labels.is_empty() {
            return labels.join(",");
        }
    }

    let Some(expressions) = selector.get("matchExpressions").and_then(Value::as_array) else {
        return String::new();
    };
    expressions
        .iter()
        .filter_map(encode_expression)
        .collect::<Vec<_>>()
        .join(",")
}

fn encode_expression(raw: &Value) -> Option<String> {
    let expr = raw.as_object()?;
    let key = expr.get("key")?.as_str()?;
    let operator = expr.get("operator")?.as_str()?;
    let first_value = || {
        expr.get("values")?
            .as_array()?
            .iter()
            .find_map(Value::as_str)
    };

    match operator {
        "In" => first_value().map(|v| format!("{key} in ({v})")),
        "NotIn" => first_value().map(|v| format!("{key} notin ({v})")),
        "Exists" => Some(key.to_string()),
        "DoesNotExist" => Some(format!("!{key}")),
        _ => None,
    }
}

/// Name-based query used when a workload has no usable selector.
pub fn fallback_query(workload_name: &str) -> String {
    format!("app={workload_name}")
}
