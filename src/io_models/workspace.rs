use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

pub const PUBLIC_GITHUB_HOST: &str = "github.com";

/// A named git repository plus the auth needed to clone and push it.
/// Referenced by name from Tasks and TaskSpawners; deleting a Workspace
/// does not cascade to anything.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kelos.dev",
    version = "v1alpha1",
    kind = "Workspace",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Clone URL, e.g. `https://github.com/org/repo.git`.
    pub repo: String,

    /// Base branch to clone. Defaults to the remote HEAD.
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    /// Secret holding a `GITHUB_TOKEN` key (classic/app token), or a
    /// GitHub App credential bundle (`appId`, `installationId`,
    /// `privateKey`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Extra git remotes added after the clone. `origin` is reserved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteSpec>,

    /// Files written into the fresh clone before the agent starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<WorkspaceFileSpec>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSpec {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFileSpec {
    /// Path relative to the repository root.
    pub path: String,
    pub content: String,
}

impl WorkspaceSpec {
    /// Hostname of the repository URL, when parseable.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.repo)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// A workspace is "enterprise" when its host is not public GitHub.
    /// Enterprise workspaces get `GH_ENTERPRISE_TOKEN`/`GH_HOST` instead
    /// of `GH_TOKEN`.
    pub fn is_enterprise(&self) -> bool {
        match self.host() {
            Some(host) => host != PUBLIC_GITHUB_HOST,
            None => false,
        }
    }

    /// `owner/repo` of the remote named `upstream`, when present and
    /// parseable. Hints the agent at the fork parent.
    pub fn upstream_repo(&self) -> Option<String> {
        let upstream = self.remotes.iter().find(|r| r.name == "upstream")?;
        parse_owner_repo(&upstream.url)
    }
}

/// Extract `owner/repo` from a git URL, tolerating a trailing `.git`.
pub fn parse_owner_repo(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let path = parsed.path().trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut segments = path.split('/');
    let owner = segments.next().filter(|s| !s.is_empty())?;
    let repo = segments.next().filter(|s| !s.is_empty())?;
    if segments.next().is_some() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(repo: &str) -> WorkspaceSpec {
        WorkspaceSpec {
            repo: repo.to_string(),
            git_ref: None,
            secret_ref: None,
            remotes: vec![],
            files: vec![],
        }
    }

    #[test]
    fn public_github_is_not_enterprise() {
        assert!(!spec("https://github.com/ex/r.git").is_enterprise());
    }

    #[test]
    fn custom_host_is_enterprise() {
        assert!(spec("https://github.example.com/ex/r.git").is_enterprise());
        assert_eq!(
            spec("https://github.example.com/ex/r.git").host().as_deref(),
            Some("github.example.com")
        );
    }

    #[test]
    fn upstream_repo_requires_matching_remote() {
        let mut ws = spec("https://github.com/fork/r.git");
        assert_eq!(ws.upstream_repo(), None);

        ws.remotes.push(RemoteSpec {
            name: "upstream".to_string(),
            url: "https://github.com/parent/r.git".to_string(),
        });
        assert_eq!(ws.upstream_repo().as_deref(), Some("parent/r"));
    }

    #[test]
    fn owner_repo_parsing_rejects_deep_paths() {
        assert_eq!(parse_owner_repo("https://github.com/a/b.git").as_deref(), Some("a/b"));
        assert_eq!(parse_owner_repo("https://github.com/a/b").as_deref(), Some("a/b"));
        assert_eq!(parse_owner_repo("https://github.com/a"), None);
        assert_eq!(parse_owner_repo("https://github.com/a/b/c"), None);
        assert_eq!(parse_owner_repo("not a url"), None);
    }
}
