//! Configuration loading and discovery for `assetflow.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::{
    AssetflowConfig, CacheConfig, PipelineConfig, ProjectConfig, ServerConfig, Stage,
    WatchBindingConfig, WatchConfig,
};
use crate::mode::BuildMode;
use crate::transform::{BrowserTargets, CommandStep, PipelineStep, TransformStep};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = "assetflow.toml";

/// Configuration error. Always fatal: the build graph never starts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse assetflow.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
    /// A configured directory does not exist
    #[error("{what} not found: {}", .path.display())]
    MissingPath {
        /// Human-readable role of the path
        what: String,
        /// Resolved path
        path: PathBuf,
    },
    /// A required pipeline matched no files
    #[error("pipeline '{pipeline}' is required but no file matches {}", .patterns.join(", "))]
    MissingSources {
        /// Pipeline name
        pipeline: String,
        /// Its source globs
        patterns: Vec<String>,
    },
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the preview server port
    pub port: Option<u16>,
    /// Disable the transform cache
    pub no_cache: bool,
}

/// Find assetflow.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_config_from)
}

/// Find assetflow.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from an assetflow.toml file.
///
/// If a path is provided, loads from that file. Otherwise uses
/// [`find_config()`]; when nothing is found the built-in layout from
/// [`default_config()`] is returned.
pub fn load_config(path: Option<&Path>) -> Result<AssetflowConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => load_config_file(&p),
        None => Ok(default_config()),
    }
}

/// Load and validate configuration from a specific file path.
fn load_config_file(path: &Path) -> Result<AssetflowConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: AssetflowConfig = toml::from_str(&contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    Ok(config)
}

/// The built-in project layout.
///
/// Markup (pug), indented sass, a concatenated/minified stylesheet, a babel
/// script bundle, plus production-only font copying and image optimization.
pub fn default_config() -> AssetflowConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());

    let html = PipelineConfig {
        name: "html".to_string(),
        sources: vec!["src/pug/index.pug".to_string()],
        exclude: vec![],
        dest: Some(PathBuf::from("src")),
        dist: Some(PathBuf::from(".")),
        stage: Stage::Build,
        after: vec![],
        source_maps: true,
        required: false,
        steps: vec![PipelineStep::always(TransformStep::Command(CommandStep {
            program: "pug".to_string(),
            args: vec!["--pretty".to_string()],
            source_map_args: vec![],
            extension: Some("html".to_string()),
            cache: false,
        }))],
    };

    let sass = PipelineConfig {
        name: "sass".to_string(),
        sources: vec!["src/sass/**/*.sass".to_string()],
        exclude: vec!["src/sass/**/_*.sass".to_string()],
        dest: Some(PathBuf::from("src/css")),
        dist: None,
        stage: Stage::Build,
        after: vec![],
        source_maps: true,
        required: false,
        steps: vec![
            PipelineStep::always(TransformStep::Command(CommandStep {
                program: "sass".to_string(),
                args: vec![
                    "--stdin".to_string(),
                    "--indented".to_string(),
                    "--load-path=src/sass".to_string(),
                ],
                source_map_args: vec!["--embed-source-map".to_string()],
                extension: Some("css".to_string()),
                cache: false,
            })),
            PipelineStep::always(TransformStep::Autoprefix { targets: BrowserTargets::legacy() }),
        ],
    };

    let css = PipelineConfig {
        name: "css".to_string(),
        sources: vec!["src/css/libs/libs.css".to_string(), "src/css/main.css".to_string()],
        exclude: vec![],
        dest: Some(PathBuf::from("src/css")),
        dist: Some(PathBuf::from("css")),
        stage: Stage::Build,
        after: vec!["sass".to_string()],
        source_maps: false,
        required: false,
        steps: vec![
            PipelineStep::always(TransformStep::Concat { output: "main.css".to_string() }),
            PipelineStep::always(TransformStep::MinifyCss),
            PipelineStep::always(TransformStep::Rename {
                suffix: Some(".min".to_string()),
                extension: None,
            }),
        ],
    };

    let js = PipelineConfig {
        name: "js".to_string(),
        sources: vec![
            "src/vendors/jquery/dist/jquery.min.js".to_string(),
            "src/js/scripts/**/*.js".to_string(),
        ],
        exclude: vec![],
        dest: Some(PathBuf::from("src/js")),
        dist: Some(PathBuf::from("js")),
        stage: Stage::Build,
        after: vec![],
        source_maps: true,
        required: false,
        steps: vec![
            PipelineStep::always(TransformStep::Command(CommandStep {
                program: "npx".to_string(),
                args: vec![
                    "babel".to_string(),
                    "--presets".to_string(),
                    "@babel/preset-env".to_string(),
                    "--filename".to_string(),
                    "{file}".to_string(),
                ],
                source_map_args: vec!["--source-maps".to_string(), "inline".to_string()],
                extension: None,
                cache: true,
            })),
            PipelineStep::always(TransformStep::Concat { output: "bundle.js".to_string() }),
            PipelineStep::only(
                BuildMode::Production,
                TransformStep::Command(CommandStep {
                    program: "npx".to_string(),
                    args: vec!["terser".to_string(), "--compress".to_string(), "--mangle".to_string()],
                    source_map_args: vec![],
                    extension: None,
                    cache: true,
                }),
            ),
        ],
    };

    let fonts = PipelineConfig {
        name: "fonts".to_string(),
        sources: vec!["src/fonts/**/*".to_string()],
        exclude: vec![],
        dest: None,
        dist: Some(PathBuf::from("fonts")),
        stage: Stage::Assets,
        after: vec![],
        source_maps: false,
        required: false,
        steps: vec![],
    };

    let img = PipelineConfig {
        name: "img".to_string(),
        sources: vec!["src/img/**/*".to_string()],
        exclude: vec![],
        dest: None,
        dist: Some(PathBuf::from("img")),
        stage: Stage::Assets,
        after: vec![],
        source_maps: false,
        required: false,
        steps: vec![PipelineStep::always(TransformStep::OptimizeImages)],
    };

    AssetflowConfig {
        project: ProjectConfig {
            name: project_name,
            src: PathBuf::from("src"),
            dist: PathBuf::from("dist"),
        },
        cache: CacheConfig::default(),
        server: ServerConfig::default(),
        watch: WatchConfig {
            bindings: vec![
                WatchBindingConfig {
                    globs: vec!["src/pug/index.pug".to_string()],
                    pipelines: vec!["html".to_string()],
                },
                WatchBindingConfig {
                    globs: vec![
                        "src/sass/**/*.sass".to_string(),
                        "src/css/libs/libs.css".to_string(),
                    ],
                    pipelines: vec!["sass".to_string(), "css".to_string()],
                },
                WatchBindingConfig {
                    globs: vec!["src/js/scripts/**/*.js".to_string()],
                    pipelines: vec!["js".to_string()],
                },
            ],
            ..WatchConfig::default()
        },
        pipelines: vec![html, sass, css, js, fonts, img],
    }
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut AssetflowConfig, overrides: &CliOverrides) {
    if let Some(port) = overrides.port {
        config.server.port = port;
    }

    if overrides.no_cache {
        config.cache.enabled = false;
    }
}

/// Get the project root directory from a config file path.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_in_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        File::create(&config_path)
            .expect("should create config file")
            .write_all(b"[project]\nname = \"test\"")
            .expect("should write config content");

        let found = find_config_from(temp.path().to_path_buf());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        File::create(&config_path)
            .expect("should create config file")
            .write_all(b"[project]\nname = \"test\"")
            .expect("should write config content");

        let subdir = temp.path().join("src").join("sass");
        fs::create_dir_all(&subdir).expect("should create subdirectories");

        let found = find_config_from(subdir);
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_not_found() {
        let temp = TempDir::new().expect("should create temp dir");
        assert_eq!(find_config_from(temp.path().to_path_buf()), None);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            r#"
[project]
name = "landing"

[[pipeline]]
name = "fonts"
stage = "assets"
sources = ["src/fonts/**/*"]
dist = "fonts"
"#,
        )
        .expect("should write config content");

        let config = load_config(Some(&config_path)).expect("should load valid config");
        assert_eq!(config.project.name, "landing");
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.pipelines[0].stage, Stage::Assets);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let temp = TempDir::new().expect("should create temp dir");
        let result = load_config(Some(&temp.path().join("nonexistent.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "this is not valid toml {{{").expect("should write");

        let result = load_config(Some(&config_path));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_validation_error() {
        let temp = TempDir::new().expect("should create temp dir");
        let config_path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[project]\nname = \"\"\n").expect("should write");

        let result = load_config(Some(&config_path));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(config.is_valid(), "{:?}", config.validate());
        assert_eq!(config.project.src, PathBuf::from("src"));
        assert_eq!(config.project.dist, PathBuf::from("dist"));
        assert_eq!(config.server.port, 3000);

        let names: Vec<_> = config.pipelines.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["html", "sass", "css", "js", "fonts", "img"]);

        let build_stage = config.pipelines.iter().filter(|p| p.stage == Stage::Build).count();
        assert_eq!(build_stage, 4);
    }

    #[test]
    fn test_default_config_style_binding_chains_sass_then_css() {
        let config = default_config();
        let binding = config
            .watch
            .bindings
            .iter()
            .find(|b| b.globs.iter().any(|g| g.ends_with(".sass")))
            .expect("sass binding");
        assert_eq!(binding.pipelines, vec!["sass", "css"]);
    }

    #[test]
    fn test_default_config_survives_toml_round_trip() {
        let config = default_config();
        let text = toml::to_string_pretty(&config).expect("should serialize");
        let parsed: AssetflowConfig = toml::from_str(&text).expect("should parse back");

        assert_eq!(parsed.pipelines.len(), config.pipelines.len());
        assert_eq!(parsed.watch.bindings, config.watch.bindings);
        assert_eq!(parsed.pipelines[3].steps[2].only, Some(BuildMode::Production));
    }

    #[test]
    fn test_merge_cli_overrides() {
        let mut config = default_config();
        let overrides = CliOverrides { port: Some(4000), no_cache: true };

        merge_cli_overrides(&mut config, &overrides);
        assert_eq!(config.server.port, 4000);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_merge_cli_overrides_empty_keeps_config() {
        let mut config = default_config();
        merge_cli_overrides(&mut config, &CliOverrides::default());
        assert_eq!(config.server.port, 3000);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, Path::new("/other/path")), PathBuf::from("/other/path"));
        assert_eq!(resolve_path(root, Path::new("src/css")), PathBuf::from("/project/src/css"));
    }

    #[test]
    fn test_project_root() {
        let config_path = Path::new("/project/assetflow.toml");
        assert_eq!(project_root(config_path), Some(Path::new("/project")));
    }
}
