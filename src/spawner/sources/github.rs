use super::{DiscoveryContext, Source, WorkItem, WorkItemKind};
use crate::constants::MAX_COMMENT_BYTES;
use crate::io_models::task_spawner::GithubIssuesSpec;
use crate::spawner::policy::{CommentFilter, CommentRecord, FilterDecision};
use crate::string::to_label_safe;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const PER_PAGE: usize = 100;

/// Where the source reads its token from on every discovery. File mode
/// backs GitHub App installations: the token-refresher sidecar rewrites
/// the file as tokens expire.
#[derive(Clone, Debug)]
pub enum GithubToken {
    Env,
    File(PathBuf),
}

impl GithubToken {
    fn resolve(&self) -> anyhow::Result<String> {
        match self {
            GithubToken::Env => std::env::var(crate::constants::ENV_GITHUB_TOKEN)
                .context("GITHUB_TOKEN is not set"),
            GithubToken::File(path) => std::fs::read_to_string(path)
                .map(|t| t.trim().to_string())
                .with_context(|| format!("cannot read token file {}", path.display())),
        }
    }
}

/// Discovers GitHub issues and pull requests through the paginated REST
/// API, applying label and comment policies client-side.
pub struct GithubSource {
    config: GithubIssuesSpec,
    token: GithubToken,
    api_base_url: String,
    http_client: reqwest::Client,
}

impl GithubSource {
    pub fn new(config: GithubIssuesSpec, token: GithubToken) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        // All api calls must have an user agent set
        // https://docs.github.com/en/rest/using-the-rest-api/getting-started-with-the-rest-api?apiVersion=2022-11-28#user-agent
        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent("kelos-spawner")
            .build()
            .context("cannot create github http client")?;

        let api_base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| "https://api.github.com".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(GithubSource { config, token, api_base_url, http_client })
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.api_base_url, self.config.owner, self.config.repo
        )
    }

    async fn fetch_issues(&self, token: &str) -> anyhow::Result<Vec<GhIssue>> {
        let mut all = vec![];
        let mut page = 1usize;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("state", self.config.state.clone().unwrap_or_else(|| "open".to_string())),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            if !self.config.labels.is_empty() {
                query.push(("labels", self.config.labels.join(",")));
            }
            if let Some(assignee) = &self.config.assignee {
                query.push(("assignee", assignee.clone()));
            }
            if let Some(creator) = &self.config.creator {
                query.push(("creator", creator.clone()));
            }

            let response = self
                .http_client
                .get(self.issues_url())
                .bearer_auth(token)
                .query(&query)
                .send()
                .await
                .context("github issues request failed")?;
            if !response.status().is_success() {
                return Err(anyhow!(
                    "github issues request returned {} for {}/{}",
                    response.status(),
                    self.config.owner,
                    self.config.repo
                ));
            }
            let batch: Vec<GhIssue> = response.json().await.context("cannot decode github issues")?;
            let len = batch.len();
            all.extend(batch);
            if len < PER_PAGE {
                return Ok(all);
            }
            page += 1;
        }
    }

    /// Fetch an item's comments, oldest first, until the byte budget is
    /// spent.
    async fn fetch_comments(&self, token: &str, number: i64) -> anyhow::Result<Vec<GhComment>> {
        let mut all: Vec<GhComment> = vec![];
        let mut bytes = 0usize;
        let mut page = 1usize;
        loop {
            let response = self
                .http_client
                .get(format!("{}/{}/comments", self.issues_url(), number))
                .bearer_auth(token)
                .query(&[("per_page", &PER_PAGE.to_string()), ("page", &page.to_string())])
                .send()
                .await
                .context("github comments request failed")?;
            if !response.status().is_success() {
                return Err(anyhow!("github comments request returned {}", response.status()));
            }
            let batch: Vec<GhComment> = response.json().await.context("cannot decode github comments")?;
            let len = batch.len();
            for comment in batch {
                bytes += comment.body.as_deref().map(str::len).unwrap_or(0);
                all.push(comment);
                if bytes >= MAX_COMMENT_BYTES {
                    return Ok(all);
                }
            }
            if len < PER_PAGE {
                return Ok(all);
            }
            page += 1;
        }
    }

    fn comment_filter(&self) -> CommentFilter {
        CommentFilter::new(
            self.config.trigger_comment.clone(),
            self.config.exclude_comments.clone(),
        )
    }
}

#[async_trait]
impl Source for GithubSource {
    async fn discover(&self, _ctx: &DiscoveryContext) -> anyhow::Result<Vec<WorkItem>> {
        let token = self.token.resolve()?;
        let filter = self.comment_filter();
        let mut items = vec![];

        for issue in self.fetch_issues(&token).await? {
            let is_pull = issue.pull_request.is_some();
            if is_pull && !self.config.wants_pulls() {
                continue;
            }
            if !is_pull && !self.config.wants_issues() {
                continue;
            }
            if issue_has_any_label(&issue, &self.config.exclude_labels) {
                continue;
            }

            // Comments are only worth a round-trip when a filter needs
            // them or templates may bind them.
            let comments = if issue.comments > 0 {
                self.fetch_comments(&token, issue.number).await?
            } else {
                vec![]
            };

            let records: Vec<CommentRecord> = comments
                .iter()
                .map(|c| CommentRecord {
                    body: c.body.clone().unwrap_or_default(),
                    created_at: c.created_at,
                })
                .collect();

            let trigger_time = match filter.evaluate(&records) {
                FilterDecision::Reject => continue,
                FilterDecision::Accept(trigger_time) => trigger_time,
            };

            items.push(issue_to_work_item(issue, &records, trigger_time));
        }

        Ok(items)
    }

    fn priority_labels(&self) -> &[String] {
        &self.config.priority_labels
    }
}

fn issue_has_any_label(issue: &GhIssue, labels: &[String]) -> bool {
    issue
        .labels
        .iter()
        .any(|l| labels.iter().any(|excluded| &l.name == excluded))
}

fn issue_to_work_item(
    issue: GhIssue,
    comments: &[CommentRecord],
    trigger_time: Option<DateTime<Utc>>,
) -> WorkItem {
    let kind = if issue.pull_request.is_some() {
        WorkItemKind::PullRequest
    } else {
        WorkItemKind::Issue
    };

    let mut comments_text = String::new();
    for record in comments {
        if comments_text.len() + record.body.len() > MAX_COMMENT_BYTES {
            break;
        }
        if !comments_text.is_empty() {
            comments_text.push_str("\n\n");
        }
        comments_text.push_str(&record.body);
    }

    WorkItem {
        id: to_label_safe(&issue.number.to_string()),
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        url: issue.html_url,
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        comments: comments_text,
        kind,
        time: issue.created_at.to_rfc3339(),
        schedule: String::new(),
        trigger_time,
    }
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: i64,
    title: String,
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    /// Present on pull requests only; its content is irrelevant.
    pull_request: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    comments: i64,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    body: Option<String>,
    created_at: DateTime<Utc>,
}
