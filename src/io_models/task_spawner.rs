use super::task::{CredentialsSpec, PodOverrides};
use crate::constants;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum_macros::Display;

/// A recurring source of Tasks: discovers external work items (GitHub
/// issues/PRs, Jira tickets or cron ticks) and materialises Tasks from a
/// template, under concurrency and lifetime budgets.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kelos.dev",
    version = "v1alpha1",
    kind = "TaskSpawner",
    namespaced,
    status = "TaskSpawnerStatus",
    shortname = "kspawn"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpawnerSpec {
    pub when: WhenSpec,

    pub task_template: TaskTemplateSpec,

    /// Duration string ("30s", "5m"). GitHub/Jira default to 5 minutes;
    /// cron spawners always poll on a one minute tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,

    /// Cap on simultaneously active (non-terminal) spawned Tasks.
    /// 0 or unset means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i32>,

    /// Cap on Tasks existing for this spawner, counted from the cluster
    /// rather than from the status counter. 0 or unset means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_tasks: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,
}

/// Discriminated union of discovery modes. Exactly one variant must be
/// set; an empty or multiply-set `when` is rejected.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhenSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_issues: Option<GithubIssuesSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira: Option<JiraSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<CronSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum SpawnerMode {
    #[strum(serialize = "github-issues")]
    GithubIssues,
    #[strum(serialize = "jira")]
    Jira,
    #[strum(serialize = "cron")]
    Cron,
}

impl WhenSpec {
    /// The selected mode, or an explanation of why the union is invalid.
    pub fn mode(&self) -> Result<SpawnerMode, String> {
        let mut modes = vec![];
        if self.github_issues.is_some() {
            modes.push(SpawnerMode::GithubIssues);
        }
        if self.jira.is_some() {
            modes.push(SpawnerMode::Jira);
        }
        if self.cron.is_some() {
            modes.push(SpawnerMode::Cron);
        }
        match modes.as_slice() {
            [one] => Ok(*one),
            [] => Err("when: one of githubIssues, jira or cron must be set".to_string()),
            many => Err(format!(
                "when: exactly one mode must be set, found {}",
                many.iter().map(|m| m.to_string()).join(", ")
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubIssuesSpec {
    pub owner: String,
    pub repo: String,

    /// Enterprise API endpoint, e.g. `https://github.example.com/api/v3`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// Which item kinds to discover: `issues`, `pulls`. Default issues
    /// only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,

    /// Issue state filter (`open`, `closed`, `all`). Default `open`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Server-side label filter; items must carry all of these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,

    /// Items carrying any of these labels are dropped client-side.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_labels: Vec<String>,

    /// Command that must appear on its own comment line for the item to
    /// be accepted. Also enables retriggering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_comment: Option<String>,

    /// Commands that reject an item when they appear on their own
    /// comment line.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_comments: Vec<String>,

    /// Labels defining admission order; earlier entries win, unmatched
    /// items sort last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority_labels: Vec<String>,
}

impl GithubIssuesSpec {
    pub fn wants_issues(&self) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t == "issues")
    }

    pub fn wants_pulls(&self) -> bool {
        self.types.iter().any(|t| t == "pulls")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JiraSpec {
    /// e.g. `https://yourcompany.atlassian.net`.
    pub base_url: String,

    pub project: String,

    /// Extra JQL, combined as `project = <project> AND (<jql>)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jql: Option<String>,

    /// Secret holding `JIRA_TOKEN` and optionally `JIRA_USER`, injected
    /// into the spawner pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronSpec {
    /// Standard five-field cron expression, interpreted in UTC.
    pub schedule: String,
}

/// The Task each discovered work item is rendered into. Mirrors TaskSpec
/// except that prompt and branch are templates bound over the work item.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplateSpec {
    #[serde(rename = "type")]
    pub agent_type: String,

    pub prompt_template: String,

    pub credentials: CredentialsSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_config_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_overrides: Option<PodOverrides>,
}

impl TaskSpawnerSpec {
    pub fn is_suspended(&self) -> bool {
        self.suspend.unwrap_or(false)
    }

    /// Effective polling interval. Cron spawners tick every minute;
    /// others parse `pollInterval` and fall back to 5 minutes.
    pub fn effective_poll_interval(&self) -> Duration {
        if matches!(self.when.mode(), Ok(SpawnerMode::Cron)) {
            return Duration::from_secs(constants::CRON_POLL_INTERVAL_SECS);
        }
        match self.poll_interval.as_deref() {
            None => Duration::from_secs(constants::DEFAULT_POLL_INTERVAL_SECS),
            Some(raw) => match duration_str::parse(raw) {
                Ok(d) => d,
                Err(err) => {
                    warn!("invalid pollInterval {raw:?} ({err}), using default");
                    Duration::from_secs(constants::DEFAULT_POLL_INTERVAL_SECS)
                }
            },
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpawnerStatus {
    #[serde(default)]
    pub phase: SpawnerPhase,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    #[serde(default)]
    pub total_discovered: i32,

    #[serde(default)]
    pub total_tasks_created: i32,

    #[serde(default)]
    pub active_tasks: i32,

    /// RFC3339 time of the last successful discovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_discovery_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SpawnerCondition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Display)]
pub enum SpawnerPhase {
    #[default]
    Pending,
    Running,
    Failed,
    Suspended,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpawnerCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    /// `True`, `False` or `Unknown`, matching Kubernetes conventions.
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub last_transition_time: String,
}

pub const CONDITION_SUSPENDED: &str = "Suspended";
pub const CONDITION_BUDGET_EXHAUSTED: &str = "TaskBudgetExhausted";

/// Set `condition_type` to the given status, updating the transition
/// time only when the status actually changes.
pub fn set_condition(
    conditions: &mut Vec<SpawnerCondition>,
    condition_type: &str,
    status: bool,
    reason: Option<&str>,
    message: Option<&str>,
    now: DateTime<Utc>,
) {
    let status_str = if status { "True" } else { "False" };
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        if existing.status != status_str {
            existing.last_transition_time = now.to_rfc3339();
        }
        existing.status = status_str.to_string();
        existing.reason = reason.map(str::to_string);
        existing.message = message.map(str::to_string);
    } else {
        conditions.push(SpawnerCondition {
            condition_type: condition_type.to_string(),
            status: status_str.to_string(),
            reason: reason.map(str::to_string),
            message: message.map(str::to_string),
            last_transition_time: now.to_rfc3339(),
        });
    }
}
