//! Transform steps: the uniform contract around each transformation engine.
//!
//! Every step consumes the full set of [`AssetFile`]s produced so far and
//! returns a new set, or a [`TransformError`] naming the offending file and
//! the engine's diagnostic. Steps never touch destination directories; the
//! pipeline writes only after the whole chain succeeded.
//!
//! Engines:
//! - [`TransformStep::Command`] shells out to an external tool (template
//!   renderer, preprocessor, transpiler, JS minifier)
//! - [`TransformStep::Autoprefix`] and [`TransformStep::MinifyCss`] use lightningcss
//! - [`TransformStep::OptimizeImages`] re-encodes PNGs with the `image` crate
//! - [`TransformStep::Concat`] and [`TransformStep::Rename`] are plain file plumbing

mod command;
mod css;
mod images;

pub use command::CommandStep;
pub use css::BrowserTargets;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::TransformCache;
use crate::mode::BuildMode;

/// A file flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    /// Absolute path of the source this file came from
    pub source: PathBuf,
    /// Output path relative to a destination root
    pub path: PathBuf,
    /// Current contents
    pub contents: Vec<u8>,
}

impl AssetFile {
    pub fn new(source: impl Into<PathBuf>, path: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        Self { source: source.into(), path: path.into(), contents }
    }

    /// Lowercased extension of the output path.
    pub fn extension(&self) -> Option<String> {
        self.path.extension().map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Contents as UTF-8, or a transform error for binary input.
    pub fn text(&self, step: &str) -> Result<&str, TransformError> {
        std::str::from_utf8(&self.contents).map_err(|e| {
            TransformError::new(step, format!("not valid UTF-8: {}", e)).with_file(&self.source)
        })
    }
}

/// A transform failure.
///
/// Non-fatal: it aborts the current pipeline invocation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    /// Pipeline the failing step belongs to (filled in at the pipeline boundary)
    pub pipeline: Option<String>,
    /// Step kind, e.g. `command:sass` or `minify-css`
    pub step: String,
    /// Offending source file, when one can be blamed
    pub file: Option<PathBuf>,
    /// Tool diagnostic
    pub message: String,
}

impl TransformError {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self { pipeline: None, step: step.into(), file: None, message: message.into() }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn in_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pipeline) = &self.pipeline {
            write!(f, "[{}] ", pipeline)?;
        }
        write!(f, "{} failed", self.step)?;
        if let Some(file) = &self.file {
            write!(f, " on {}", file.display())?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for TransformError {}

/// Per-invocation settings handed to every step.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Active build mode
    pub mode: BuildMode,
    /// Whether steps should emit (inline) source maps
    pub source_maps: bool,
    /// Working directory for external tools
    pub project_root: &'a Path,
    /// Output cache for expensive steps
    pub cache: &'a TransformCache,
}

/// One transformation engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransformStep {
    /// Pipe each file through an external program
    Command(CommandStep),
    /// Join every file, in order, into a single output
    Concat {
        /// Output file name
        output: String,
    },
    /// Rewrite output names
    Rename {
        /// Inserted before the extension (`.min`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suffix: Option<String>,
        /// Replacement extension, without the dot
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension: Option<String>,
    },
    /// Add vendor prefixes for the given browsers
    Autoprefix {
        #[serde(default)]
        targets: BrowserTargets,
    },
    /// Minify stylesheets
    MinifyCss,
    /// Losslessly recompress images
    OptimizeImages,
}

impl TransformStep {
    /// Short label used in logs and errors.
    pub fn label(&self) -> String {
        match self {
            TransformStep::Command(cmd) => format!("command:{}", cmd.program),
            TransformStep::Concat { .. } => "concat".to_string(),
            TransformStep::Rename { .. } => "rename".to_string(),
            TransformStep::Autoprefix { .. } => "autoprefix".to_string(),
            TransformStep::MinifyCss => "minify-css".to_string(),
            TransformStep::OptimizeImages => "optimize-images".to_string(),
        }
    }

    /// Stable description of the step configuration, part of every cache key.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.label())
    }

    /// Run the step over the current file set.
    pub fn apply(
        &self,
        files: Vec<AssetFile>,
        ctx: &TransformContext<'_>,
    ) -> Result<Vec<AssetFile>, TransformError> {
        match self {
            TransformStep::Command(cmd) => {
                let fingerprint = self.fingerprint();
                files.into_iter().map(|file| cmd.run(file, &fingerprint, ctx)).collect()
            }
            TransformStep::Concat { output } => Ok(concat(files, output)),
            TransformStep::Rename { suffix, extension } => Ok(files
                .into_iter()
                .map(|mut file| {
                    file.path = rename(&file.path, suffix.as_deref(), extension.as_deref());
                    file
                })
                .collect()),
            TransformStep::Autoprefix { targets } => {
                files.into_iter().map(|file| css::autoprefix(file, targets)).collect()
            }
            TransformStep::MinifyCss => files.into_iter().map(css::minify).collect(),
            TransformStep::OptimizeImages => {
                let fingerprint = self.fingerprint();
                files.into_iter().map(|file| images::optimize(file, &fingerprint, ctx)).collect()
            }
        }
    }
}

/// A step plus the build mode it is restricted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    #[serde(flatten)]
    pub step: TransformStep,
    /// Run only in this mode; `None` runs in both
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<BuildMode>,
}

impl PipelineStep {
    /// A step that runs in every mode.
    pub fn always(step: TransformStep) -> Self {
        Self { step, only: None }
    }

    /// A step restricted to one mode.
    pub fn only(mode: BuildMode, step: TransformStep) -> Self {
        Self { step, only: Some(mode) }
    }

    pub fn applies_to(&self, mode: BuildMode) -> bool {
        self.only.map_or(true, |only| only == mode)
    }
}

/// Join files into one. An empty input set stays empty.
fn concat(files: Vec<AssetFile>, output: &str) -> Vec<AssetFile> {
    let Some(first) = files.first() else {
        return files;
    };
    let source = first.source.clone();

    let mut contents = Vec::new();
    for file in &files {
        contents.extend_from_slice(&file.contents);
        if !file.contents.ends_with(b"\n") {
            contents.push(b'\n');
        }
    }
    vec![AssetFile::new(source, output, contents)]
}

fn rename(path: &Path, suffix: Option<&str>, extension: Option<&str>) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = match extension {
        Some(ext) => Some(ext.to_string()),
        None => path.extension().map(|e| e.to_string_lossy().into_owned()),
    };

    let mut name = stem;
    if let Some(suffix) = suffix {
        name.push_str(suffix);
    }
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(&ext);
    }
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, contents: &str) -> AssetFile {
        AssetFile::new(format!("/project/{}", path), path, contents.as_bytes().to_vec())
    }

    fn with_ctx<R>(mode: BuildMode, f: impl FnOnce(&TransformContext<'_>) -> R) -> R {
        let cache = TransformCache::disabled();
        let ctx = TransformContext {
            mode,
            source_maps: false,
            project_root: Path::new("/project"),
            cache: &cache,
        };
        f(&ctx)
    }

    #[test]
    fn test_concat_preserves_order() {
        let files = vec![file("libs.css", "a{}"), file("main.css", "b{}\n")];
        let out = concat(files, "main.css");

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, PathBuf::from("main.css"));
        assert_eq!(out[0].contents, b"a{}\nb{}\n");
        assert_eq!(out[0].source, PathBuf::from("/project/libs.css"));
    }

    #[test]
    fn test_concat_empty_input() {
        assert!(concat(vec![], "bundle.js").is_empty());
    }

    #[test]
    fn test_rename_suffix_and_extension() {
        assert_eq!(
            rename(Path::new("css/main.css"), Some(".min"), None),
            PathBuf::from("css/main.min.css")
        );
        assert_eq!(rename(Path::new("index.pug"), None, Some("html")), PathBuf::from("index.html"));
        assert_eq!(rename(Path::new("LICENSE"), Some("-copy"), None), PathBuf::from("LICENSE-copy"));
    }

    #[test]
    fn test_pipeline_step_mode_filter() {
        let always = PipelineStep::always(TransformStep::MinifyCss);
        let prod = PipelineStep::only(BuildMode::Production, TransformStep::MinifyCss);

        assert!(always.applies_to(BuildMode::Development));
        assert!(always.applies_to(BuildMode::Production));
        assert!(!prod.applies_to(BuildMode::Development));
        assert!(prod.applies_to(BuildMode::Production));
    }

    #[test]
    fn test_apply_rename_step() {
        let step = TransformStep::Rename { suffix: Some(".min".to_string()), extension: None };
        let out = with_ctx(BuildMode::Development, |ctx| {
            step.apply(vec![file("bundle.js", "x")], ctx).unwrap()
        });
        assert_eq!(out[0].path, PathBuf::from("bundle.min.js"));
    }

    #[test]
    fn test_step_labels() {
        let cmd = TransformStep::Command(CommandStep::new("sass"));
        assert_eq!(cmd.label(), "command:sass");
        assert_eq!(TransformStep::OptimizeImages.label(), "optimize-images");
    }

    #[test]
    fn test_fingerprint_changes_with_configuration() {
        let a = TransformStep::Concat { output: "a.js".to_string() };
        let b = TransformStep::Concat { output: "b.js".to_string() };
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn test_transform_error_display() {
        let err = TransformError::new("command:pug", "unexpected token")
            .with_file("/project/src/pug/index.pug")
            .in_pipeline("html");
        assert_eq!(
            err.to_string(),
            "[html] command:pug failed on /project/src/pug/index.pug: unexpected token"
        );
    }

    #[test]
    fn test_text_rejects_binary() {
        let f = AssetFile::new("/p/logo.png", "logo.png", vec![0xff, 0xfe, 0x00]);
        let err = f.text("minify-css").unwrap_err();
        assert_eq!(err.file, Some(PathBuf::from("/p/logo.png")));
    }
}
