use crate::execution::{StepStatus, WorkflowExecution};
use regex::Regex;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("template pattern is valid"))
}

/// Resolves `{{...}}` references in a step input against the workflow
/// input and prior step results.
///
/// Supported forms:
/// - `{{input.key}}` — a workflow input field
/// - `{{steps.<id>.output.<path>}}` — a field of a prior step's output
/// - `{{prev.key}}` — a field of the most recently completed step's output
///
/// A string that consists of exactly one reference is replaced by the
/// referenced JSON value; references embedded in longer strings are
/// stringified in place. Unresolvable references become empty strings.
pub fn resolve_references(
    input: &serde_json::Value,
    execution: &WorkflowExecution,
    workflow_input: &serde_json::Value,
) -> serde_json::Value {
    match input {
        serde_json::Value::String(s) => resolve_string(s, execution, workflow_input),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_references(v, execution, workflow_input)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| resolve_references(v, execution, workflow_input))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(
    raw: &str,
    execution: &WorkflowExecution,
    workflow_input: &serde_json::Value,
) -> serde_json::Value {
    let re = template_re();

    // A lone reference keeps the referenced value's JSON type.
    if let Some(captures) = re.captures(raw) {
        if let Some(whole) = captures.get(0) {
            if whole.start() == 0 && whole.end() == raw.len() {
                let resolved = lookup(&captures[1], execution, workflow_input);
                return resolved.unwrap_or(serde_json::Value::String(String::new()));
            }
        }
    }

    let replaced = re.replace_all(raw, |captures: &regex::Captures<'_>| {
        match lookup(&captures[1], execution, workflow_input) {
            Some(serde_json::Value::String(s)) => s,
            Some(value) => value.to_string(),
            None => String::new(),
        }
    });
    serde_json::Value::String(replaced.into_owned())
}

fn lookup(
    reference: &str,
    execution: &WorkflowExecution,
    workflow_input: &serde_json::Value,
) -> Option<serde_json::Value> {
    let reference = reference.trim();

    if let Some(key) = reference.strip_prefix("input.") {
        return navigate(workflow_input, key);
    }

    if let Some(rest) = reference.strip_prefix("steps.") {
        let mut parts = rest.splitn(3, '.');
        let step_id = parts.next()?;
        // The canonical form is steps.<id>.output.<path>.
        if parts.next() != Some("output") {
            return None;
        }
        let result = execution.step_results.get(step_id)?;
        let output = result.output.as_ref()?;
        return match parts.next() {
            Some(path) => navigate(output, path),
            None => Some(output.clone()),
        };
    }

    if let Some(key) = reference.strip_prefix("prev.") {
        let last = execution
            .completion_order
            .iter()
            .rev()
            .filter_map(|id| execution.step_results.get(id))
            .find(|r| r.status == StepStatus::Completed && r.output.is_some())?;
        return navigate(last.output.as_ref()?, key);
    }

    None
}

fn navigate(value: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::execution::WorkflowStepResult;
    use ensemble_core::AgentType;

    fn execution_with_output(step_id: &str, output: serde_json::Value) -> WorkflowExecution {
        let mut exec = WorkflowExecution::new("wf", None);
        exec.step_results.insert(
            step_id.to_string(),
            WorkflowStepResult {
                step_id: step_id.to_string(),
                status: StepStatus::Completed,
                output: Some(output),
                error: None,
                execution_time_ms: 1,
                agent_type: AgentType::Research,
            },
        );
        exec.completion_order.push(step_id.to_string());
        exec
    }

    #[test]
    fn test_workflow_input_reference() {
        let exec = WorkflowExecution::new("wf", None);
        let input = serde_json::json!({"topic": "{{input.topic}}"});
        let resolved = resolve_references(
            &input,
            &exec,
            &serde_json::json!({"topic": "machine learning"}),
        );
        assert_eq!(resolved["topic"], serde_json::json!("machine learning"));
    }

    #[test]
    fn test_step_output_reference_keeps_json_type() {
        let exec = execution_with_output("gather", serde_json::json!({"count": 7}));
        let input = serde_json::json!({"n": "{{steps.gather.output.count}}"});
        let resolved = resolve_references(&input, &exec, &serde_json::json!({}));
        assert_eq!(resolved["n"], serde_json::json!(7));
    }

    #[test]
    fn test_embedded_reference_stringifies() {
        let exec = execution_with_output("gather", serde_json::json!({"count": 7}));
        let input = serde_json::json!({"summary": "found {{steps.gather.output.count}} sources"});
        let resolved = resolve_references(&input, &exec, &serde_json::json!({}));
        assert_eq!(resolved["summary"], serde_json::json!("found 7 sources"));
    }

    #[test]
    fn test_prev_reference() {
        let exec = execution_with_output("gather", serde_json::json!({"title": "Results"}));
        let input = serde_json::json!({"heading": "{{prev.title}}"});
        let resolved = resolve_references(&input, &exec, &serde_json::json!({}));
        assert_eq!(resolved["heading"], serde_json::json!("Results"));
    }

    #[test]
    fn test_nested_path_navigation() {
        let exec = execution_with_output(
            "gather",
            serde_json::json!({"meta": {"source": {"name": "arxiv"}}}),
        );
        let input = serde_json::json!({"from": "{{steps.gather.output.meta.source.name}}"});
        let resolved = resolve_references(&input, &exec, &serde_json::json!({}));
        assert_eq!(resolved["from"], serde_json::json!("arxiv"));
    }

    #[test]
    fn test_unresolvable_reference_becomes_empty() {
        let exec = WorkflowExecution::new("wf", None);
        let input = serde_json::json!({"x": "{{steps.ghost.output.y}}"});
        let resolved = resolve_references(&input, &exec, &serde_json::json!({}));
        assert_eq!(resolved["x"], serde_json::json!(""));
    }

    #[test]
    fn test_arrays_and_non_strings_untouched() {
        let exec = WorkflowExecution::new("wf", None);
        let input = serde_json::json!({
            "items": ["{{input.a}}", 42, true],
            "plain": "no references here"
        });
        let resolved =
            resolve_references(&input, &exec, &serde_json::json!({"a": "resolved"}));
        assert_eq!(
            resolved["items"],
            serde_json::json!(["resolved", 42, true])
        );
        assert_eq!(resolved["plain"], serde_json::json!("no references here"));
    }
}
