use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// One agent run. Created by a user or synthesised by a TaskSpawner;
/// realised as a batch Job owned by this resource.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kelos.dev",
    version = "v1alpha1",
    kind = "Task",
    namespaced,
    status = "TaskStatus",
    shortname = "ktask"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Agent type, e.g. `claude-code`. Unknown types are rejected when
    /// the Job is built.
    #[serde(rename = "type")]
    pub agent_type: String,

    pub prompt: String,

    pub credentials: CredentialsSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Agent container image override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_config_ref: Option<String>,

    /// Branch the agent works on. Checked out (or created) by an init
    /// container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Advisory only: names of Tasks this one relates to. The
    /// reconciler does not block on them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Seconds after termination before the Task deletes itself. 0
    /// means as soon as possible; unset means never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_overrides: Option<PodOverrides>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSpec {
    #[serde(rename = "type")]
    pub kind: CredentialsKind,

    /// Secret whose key named after the chosen env var holds the value.
    pub secret_ref: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Display)]
pub enum CredentialsKind {
    #[serde(rename = "api-key")]
    #[strum(serialize = "api-key")]
    ApiKey,
    #[serde(rename = "oauth")]
    #[strum(serialize = "oauth")]
    Oauth,
}

/// Narrow set of pod-level knobs a Task may override. Env entries lose
/// against operator-provided names; the rest apply unconditionally.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodOverrides {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarOverride>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesOverride>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarOverride {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesOverride {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// RFC3339. Set when the first pod start is observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// RFC3339. Set once, when the terminal condition is first seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Structured outputs scraped from the agent's log markers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Display, EnumString,
)]
pub enum TaskPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

impl Task {
    pub fn phase(&self) -> TaskPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Completion time parsed back from status, when set and valid.
    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.status
            .as_ref()
            .and_then(|s| s.completion_time.as_deref())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_terminality() {
        assert!(!TaskPhase::Pending.is_terminal());
        assert!(!TaskPhase::Running.is_terminal());
        assert!(TaskPhase::Succeeded.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
    }

    #[test]
    fn task_spec_round_trips_camel_case() {
        // given
        let json = r#"{
            "type": "claude-code",
            "prompt": "Hello",
            "credentials": {"type": "api-key", "secretRef": "s"},
            "workspaceRef": "main-repo",
            "ttlSecondsAfterFinished": 60
        }"#;

        // when
        let spec: TaskSpec = serde_json::from_str(json).unwrap();

        // then
        assert_eq!(spec.agent_type, "claude-code");
        assert_eq!(spec.credentials.kind, CredentialsKind::ApiKey);
        assert_eq!(spec.credentials.secret_ref, "s");
        assert_eq!(spec.workspace_ref.as_deref(), Some("main-repo"));
        assert_eq!(spec.ttl_seconds_after_finished, Some(60));
        assert!(spec.depends_on.is_empty());
    }

    #[test]
    fn completion_time_parses_rfc3339() {
        let mut task = Task::new("t", serde_json::from_value(serde_json::json!({
            "type": "claude-code",
            "prompt": "p",
            "credentials": {"type": "api-key", "secretRef": "s"}
        })).unwrap());
        assert_eq!(task.completion_time(), None);

        task.status = Some(TaskStatus {
            phase: TaskPhase::Succeeded,
            completion_time: Some("2026-07-01T10:00:00Z".to_string()),
            ..Default::default()
        });
        let parsed = task.completion_time().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-07-01T10:00:00+00:00");
    }
}
