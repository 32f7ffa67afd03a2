use super::BuildError;
use super::paths::validate_path_component;
use crate::io_models::agent_config::McpServerSpec;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Wire shape of `KELOS_MCP_SERVERS`: a `mcpServers` object keyed by
/// server name, empty fields omitted.
#[derive(Serialize)]
struct McpServersDocument {
    #[serde(rename = "mcpServers")]
    mcp_servers: BTreeMap<String, McpServerJson>,
}

#[derive(Serialize)]
struct McpServerJson {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    server_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
}

/// Render the declared MCP servers into the JSON document handed to the
/// agent. Server names are validated path components and must be unique.
///
/// `headersFrom`/`envFrom` references must already be resolved (see
/// `secret_manager`); leftovers are a programming error upstream, not a
/// user error, so they are simply not rendered.
pub fn render_mcp_servers(servers: &[McpServerSpec]) -> Result<String, BuildError> {
    let mut seen = HashSet::new();
    let mut rendered = BTreeMap::new();

    for server in servers {
        validate_path_component("mcp server", &server.name)?;
        if !seen.insert(server.name.clone()) {
            return Err(BuildError::DuplicateMcpServer(server.name.clone()));
        }
        rendered.insert(
            server.name.clone(),
            McpServerJson {
                server_type: server.server_type.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
                url: server.url.clone(),
                headers: server.headers.clone(),
                env: server.env.clone(),
            },
        );
    }

    serde_json::to_string(&McpServersDocument { mcp_servers: rendered })
        .map_err(|e| BuildError::McpSerialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn stdio_server(name: &str) -> McpServerSpec {
        McpServerSpec {
            name: name.to_string(),
            server_type: Some("stdio".to_string()),
            command: Some("uvx".to_string()),
            args: vec!["mcp-server-git".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn renders_fields_and_omits_empty_ones() {
        // given
        let servers = vec![
            stdio_server("git"),
            McpServerSpec {
                name: "tracker".to_string(),
                url: Some("https://mcp.example.com".to_string()),
                headers: btreemap! {"Authorization".to_string() => "Bearer t".to_string()},
                ..Default::default()
            },
        ];

        // when
        let json = render_mcp_servers(&servers).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        // then
        assert_eq!(value["mcpServers"]["git"]["type"], "stdio");
        assert_eq!(value["mcpServers"]["git"]["command"], "uvx");
        assert_eq!(value["mcpServers"]["git"]["args"][0], "mcp-server-git");
        assert!(value["mcpServers"]["git"].get("url").is_none());
        assert!(value["mcpServers"]["git"].get("headers").is_none());
        assert_eq!(value["mcpServers"]["tracker"]["url"], "https://mcp.example.com");
        assert_eq!(
            value["mcpServers"]["tracker"]["headers"]["Authorization"],
            "Bearer t"
        );
        assert!(value["mcpServers"]["tracker"].get("command").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = render_mcp_servers(&[stdio_server("git"), stdio_server("git")]).unwrap_err();
        assert_eq!(err, BuildError::DuplicateMcpServer("git".to_string()));
    }

    #[test]
    fn traversal_names_are_rejected() {
        let err = render_mcp_servers(&[stdio_server("../etc")]).unwrap_err();
        assert!(matches!(err, BuildError::UnsafePathComponent { .. }));
    }

    #[test]
    fn empty_list_renders_an_empty_document() {
        assert_eq!(render_mcp_servers(&[]).unwrap(), r#"{"mcpServers":{}}"#);
    }
}
