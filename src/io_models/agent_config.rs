use super::SecretRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shared user-level agent configuration: instructions file, plugins and
/// MCP server declarations. Referenced by name from Tasks and spawner
/// task templates.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kelos.dev",
    version = "v1alpha1",
    kind = "AgentConfig",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigSpec {
    /// Content handed to the agent as its AGENTS.md, verbatim.
    #[serde(rename = "agentsMD", skip_serializing_if = "Option::is_none")]
    pub agents_md: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerSpec>,

    /// Marketplace plugin identifiers installed by the agent image
    /// itself, passed through as a comma list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marketplace_plugins: Vec<String>,
}

/// One plugin materialised under the plugin root. Sourced either from a
/// GitHub repository or from inline skills/agents; the two are mutually
/// exclusive.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    /// Directory name under the plugin root. Validated as a single path
    /// component.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubPluginSource>,

    /// Inline skills, written as `<plugin>/skills/<name>/SKILL.md`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<InlineSkillSpec>,

    /// Inline agents, written as `<plugin>/agents/<name>.md`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<InlineAgentSpec>,
}

impl PluginSpec {
    pub fn has_inline_content(&self) -> bool {
        !self.skills.is_empty() || !self.agents.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubPluginSource {
    /// `owner/repo` on github.com.
    pub repo: String,

    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    /// Secret with a `GITHUB_TOKEN` key used for the plugin clone. When
    /// unset, the workspace token is the fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InlineSkillSpec {
    pub name: String,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InlineAgentSpec {
    pub name: String,
    pub content: String,
}

/// Declaration of one MCP server the agent may talk to. Rendered into
/// the `KELOS_MCP_SERVERS` JSON document; empty fields are omitted.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    /// Key in the rendered JSON. Validated as a single path component.
    pub name: String,

    /// Transport type, e.g. `stdio` or `http`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Inline header defaults. Secrets referenced by `headersFrom` are
    /// merged over these at reconcile time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Inline env defaults. Secrets referenced by `envFrom` are merged
    /// over these at reconcile time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Secrets whose data is merged into `headers`, overriding inline
    /// values on collision. Cleared once resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_from: Vec<SecretRef>,

    /// Secrets whose data is merged into `env`, overriding inline
    /// values on collision. Cleared once resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<SecretRef>,
}
