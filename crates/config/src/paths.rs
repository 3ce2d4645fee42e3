//! Path utilities

use std::path::{Path, PathBuf};

/// File name of the tool-server launch configuration
pub const TOOL_CONFIG_FILE: &str = "mcp_config.json";

/// Resolve the tool-server configuration path.
///
/// An explicit path wins; otherwise the file is looked up in the current
/// working directory.
pub fn tool_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(TOOL_CONFIG_FILE),
    }
}
