pub mod cron;
pub mod github;
pub mod jira;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strum_macros::Display;

/// A single unit of discovered work. In-memory only; the spawner turns
/// accepted items into Tasks named `<spawner>-<id>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkItem {
    /// Stable, DNS-label-safe identifier within the source.
    pub id: String,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub labels: Vec<String>,
    /// Concatenated comment bodies, oldest first, bounded.
    pub comments: String,
    pub kind: WorkItemKind,
    /// RFC3339 creation/tick time.
    pub time: String,
    /// Source cron expression, for cron items only.
    pub schedule: String,
    /// Creation time of the most recent trigger comment, when the
    /// source is configured with one. Drives retriggering.
    pub trigger_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum WorkItemKind {
    #[default]
    #[strum(serialize = "issue")]
    Issue,
    #[strum(serialize = "pull-request")]
    PullRequest,
    #[strum(serialize = "jira")]
    Jira,
    #[strum(serialize = "cron")]
    CronTick,
}

/// Inputs a source may need beyond its own configuration.
#[derive(Clone, Copy, Debug)]
pub struct DiscoveryContext {
    /// Last successful discovery, from spawner status. None on the
    /// first ever cycle.
    pub last_discovery_time: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// A pluggable discovery backend. Sources are pure fetch+filter: they
/// never read or write cluster state, and they are stateless between
/// calls.
#[async_trait]
pub trait Source: Send + Sync {
    async fn discover(&self, ctx: &DiscoveryContext) -> anyhow::Result<Vec<WorkItem>>;

    /// Labels defining admission order for this source's items.
    fn priority_labels(&self) -> &[String] {
        &[]
    }
}
