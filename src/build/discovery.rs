//! Source file discovery for pipelines.
//!
//! Each source pattern is paired with its base directory, the literal path
//! prefix before the first wildcard component. A matched file's output path is
//! its path relative to that base, so `src/sass/**/*.sass` maps
//! `src/sass/blocks/header.sass` to `blocks/header.sass`.

use glob::{glob, MatchOptions, Pattern};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Error during source discovery.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    InvalidPattern(String, glob::PatternError),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::InvalidPattern(pattern, err) => {
                write!(f, "Invalid glob pattern '{}': {}", pattern, err)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the glob base, used as the output path
    pub relative: PathBuf,
}

/// A source pattern and its base directory, both relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGlob {
    pattern: String,
    base: PathBuf,
}

impl AssetGlob {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let base = glob_base(&pattern);
        Self { pattern, base }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Whether the pattern contains no wildcard at all.
    pub fn is_literal(&self) -> bool {
        !has_wildcard(&self.pattern)
    }

    /// Compile for matching project-relative paths.
    pub fn compile(&self) -> Result<Pattern, DiscoveryError> {
        Pattern::new(&self.pattern)
            .map_err(|e| DiscoveryError::InvalidPattern(self.pattern.clone(), e))
    }

    /// Find matching files under `project_root`, sorted.
    pub fn discover(&self, project_root: &Path) -> Result<Vec<SourceFile>, DiscoveryError> {
        let escaped_root = Pattern::escape(&project_root.to_string_lossy());
        let full_pattern = format!("{}/{}", escaped_root.trim_end_matches('/'), self.pattern);
        let base = project_root.join(&self.base);

        let paths = glob(&full_pattern)
            .map_err(|e| DiscoveryError::InvalidPattern(self.pattern.clone(), e))?;

        let mut files = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => {
                    let relative = path
                        .strip_prefix(&base)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default());
                    files.push(SourceFile { path, relative });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("error reading path: {}", e),
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Literal directory prefix of a pattern. For a pattern without wildcards
/// the base is the file's parent directory.
pub fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    let path = Path::new(pattern);
    let components: Vec<Component<'_>> = path.components().collect();

    for (i, component) in components.iter().enumerate() {
        let is_last = i + 1 == components.len();
        let text = component.as_os_str().to_string_lossy();
        if has_wildcard(&text) || is_last {
            break;
        }
        if !matches!(component, Component::CurDir) {
            base.push(component);
        }
    }
    base
}

const EXCLUDE_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Discover sources for a list of globs: glob order first, sorted within a
/// glob, each file at most once. Files whose project-relative path matches an
/// `exclude` glob are dropped.
pub fn discover_sources(
    project_root: &Path,
    globs: &[AssetGlob],
    exclude: &[AssetGlob],
) -> Result<Vec<SourceFile>, DiscoveryError> {
    let exclude = exclude.iter().map(AssetGlob::compile).collect::<Result<Vec<_>, _>>()?;
    let excluded = |path: &Path| {
        let relative = path.strip_prefix(project_root).unwrap_or(path);
        exclude.iter().any(|p| p.matches_path_with(relative, EXCLUDE_OPTIONS))
    };

    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for asset_glob in globs {
        for file in asset_glob.discover(project_root)? {
            if excluded(&file.path) {
                continue;
            }
            if seen.insert(file.path.clone()) {
                result.push(file);
            }
        }
    }

    Ok(result)
}
