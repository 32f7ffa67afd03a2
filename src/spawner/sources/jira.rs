use super::{DiscoveryContext, Source, WorkItem, WorkItemKind};
use crate::constants::{ENV_JIRA_TOKEN, ENV_JIRA_USER};
use crate::string::to_label_safe;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::io_models::task_spawner::JiraSpec;

const MAX_RESULTS: usize = 100;

/// Discovers Jira issues through a JQL search. Auth is Basic
/// (email + API token) when `JIRA_USER` is set, Bearer PAT otherwise.
pub struct JiraSource {
    config: JiraSpec,
    http_client: reqwest::Client,
}

impl JiraSource {
    pub fn new(config: JiraSpec) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent("kelos-spawner")
            .build()
            .context("cannot create jira http client")?;
        Ok(JiraSource { config, http_client })
    }

    /// `project = <project>` with the user's JQL ANDed in parentheses so
    /// its operator precedence cannot widen the project scope.
    fn jql(&self) -> String {
        match self.config.jql.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => {
                format!("project = {} AND ({})", self.config.project, extra)
            }
            _ => format!("project = {}", self.config.project),
        }
    }

    fn search_url(&self, start_at: usize) -> String {
        format!(
            "{}/rest/api/2/search?jql={}&fields=summary,description,labels,created,updated&maxResults={}&startAt={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.jql()),
            MAX_RESULTS,
            start_at,
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
        let token = std::env::var(ENV_JIRA_TOKEN).context("JIRA_TOKEN is not set")?;
        Ok(match std::env::var(ENV_JIRA_USER) {
            Ok(user) => request.basic_auth(user, Some(token)),
            Err(_) => request.bearer_auth(token),
        })
    }
}

#[async_trait]
impl Source for JiraSource {
    async fn discover(&self, _ctx: &DiscoveryContext) -> anyhow::Result<Vec<WorkItem>> {
        let mut items = vec![];
        let mut start_at = 0usize;

        loop {
            let request = self.authorize(self.http_client.get(self.search_url(start_at)))?;
            let response = request.send().await.context("jira search request failed")?;
            if !response.status().is_success() {
                return Err(anyhow!(
                    "jira search returned {} for project {}",
                    response.status(),
                    self.config.project
                ));
            }
            let page: JiraSearchResponse =
                response.json().await.context("cannot decode jira search response")?;
            let fetched = page.issues.len();

            for issue in page.issues {
                items.push(self.issue_to_work_item(issue));
            }

            start_at += fetched;
            if fetched < MAX_RESULTS || start_at >= page.total {
                return Ok(items);
            }
        }
    }
}

impl JiraSource {
    fn issue_to_work_item(&self, issue: JiraIssue) -> WorkItem {
        let number = issue
            .key
            .rsplit('-')
            .next()
            .and_then(|n| n.parse::<i64>().ok())
            .unwrap_or(0);
        WorkItem {
            id: to_label_safe(&issue.key),
            number,
            title: issue.fields.summary.unwrap_or_default(),
            body: issue.fields.description.unwrap_or_default(),
            url: format!(
                "{}/browse/{}",
                self.config.base_url.trim_end_matches('/'),
                issue.key
            ),
            labels: issue.fields.labels,
            comments: String::new(),
            kind: WorkItemKind::Jira,
            time: issue.fields.created.unwrap_or_default(),
            schedule: String::new(),
            trigger_time: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Default, Deserialize)]
struct JiraFields {
    summary: Option<String>,
    description: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    created: Option<String>,
}
