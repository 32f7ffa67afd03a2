use super::BuildError;

/// Validate a user-supplied name that becomes a single directory or file
/// name (plugin, skill, agent, MCP server). Anything that could walk the
/// filesystem is rejected.
pub fn validate_path_component(field: &'static str, value: &str) -> Result<(), BuildError> {
    let safe = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains('/')
        && !value.contains('\\')
        && !value.contains('\0');
    if safe {
        Ok(())
    } else {
        Err(BuildError::UnsafePathComponent {
            field,
            value: value.to_string(),
        })
    }
}

/// Validate a workspace file path: relative, backslash-free, and unable
/// to resolve outside the repository root.
pub fn validate_workspace_file_path(path: &str) -> Result<(), BuildError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        Err(BuildError::UnsafeFilePath(path.to_string()))
    } else {
        Ok(())
    }
}

/// The directory part of a validated relative file path, if any.
pub fn parent_dir(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_path_component("plugin", "review-helper").is_ok());
        assert!(validate_path_component("skill", "summarize_diffs").is_ok());
        assert!(validate_path_component("mcp server", "github.enterprise").is_ok());
    }

    #[test]
    fn rejects_traversal_names() {
        for bad in ["", ".", "..", "a/b", "a\\b", "..\\x"] {
            let err = validate_path_component("plugin", bad).unwrap_err();
            assert!(
                matches!(err, BuildError::UnsafePathComponent { field: "plugin", .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_nested_relative_file_paths() {
        assert!(validate_workspace_file_path("README.md").is_ok());
        assert!(validate_workspace_file_path("docs/setup/guide.md").is_ok());
        assert_eq!(parent_dir("docs/setup/guide.md"), Some("docs/setup"));
        assert_eq!(parent_dir("README.md"), None);
    }

    #[test]
    fn rejects_escaping_file_paths() {
        for bad in [
            "",
            "/etc/passwd",
            "../outside",
            "a/../../b",
            "a//b",
            "a/./b",
            "a\\b",
        ] {
            assert!(
                validate_workspace_file_path(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }
}
