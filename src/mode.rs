//! Build mode resolution.
//!
//! The mode is read from the environment exactly once at process start and
//! then handed to every component through the [`BuildContext`](crate::build::BuildContext).

use serde::{Deserialize, Serialize};

/// Environment variable that selects the build mode.
pub const MODE_ENV_VAR: &str = "ASSETFLOW_ENV";

/// Whether the build targets the local preview or the distribution tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Source maps, unminified output, dev server and watcher
    #[default]
    Development,
    /// Clean dist tree, minified output, dual output trees
    Production,
}

impl BuildMode {
    /// Map a raw environment value to a mode.
    ///
    /// Only `production` or `prod` (case-insensitive, surrounding whitespace
    /// ignored) select [`BuildMode::Production`]; anything else, including an
    /// unset variable, is development.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "production" || v == "prod" => BuildMode::Production,
            _ => BuildMode::Development,
        }
    }

    pub fn is_development(self) -> bool {
        self == BuildMode::Development
    }

    pub fn is_production(self) -> bool {
        self == BuildMode::Production
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Development => write!(f, "development"),
            BuildMode::Production => write!(f, "production"),
        }
    }
}

/// Read [`MODE_ENV_VAR`] and resolve the build mode.
///
/// Call once per process; pass the result along instead of re-reading.
pub fn resolve_mode() -> BuildMode {
    let value = std::env::var(MODE_ENV_VAR).ok();
    BuildMode::from_env_value(value.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_missing_value_is_development() {
        assert_eq!(BuildMode::from_env_value(None), BuildMode::Development);
    }

    #[test]
    fn test_production_markers() {
        assert_eq!(BuildMode::from_env_value(Some("production")), BuildMode::Production);
        assert_eq!(BuildMode::from_env_value(Some("prod")), BuildMode::Production);
        assert_eq!(BuildMode::from_env_value(Some(" Production\n")), BuildMode::Production);
    }

    #[test]
    fn test_unrecognized_values_are_development() {
        assert_eq!(BuildMode::from_env_value(Some("")), BuildMode::Development);
        assert_eq!(BuildMode::from_env_value(Some("development")), BuildMode::Development);
        assert_eq!(BuildMode::from_env_value(Some("staging")), BuildMode::Development);
        assert_eq!(BuildMode::from_env_value(Some("production-ish")), BuildMode::Development);
    }

    #[test]
    fn test_display() {
        assert_eq!(BuildMode::Development.to_string(), "development");
        assert_eq!(BuildMode::Production.to_string(), "production");
    }

    #[test]
    #[serial]
    fn test_resolve_mode_reads_env() {
        std::env::set_var(MODE_ENV_VAR, "production");
        assert_eq!(resolve_mode(), BuildMode::Production);

        std::env::remove_var(MODE_ENV_VAR);
        assert_eq!(resolve_mode(), BuildMode::Development);
    }
}
