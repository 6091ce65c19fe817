//! External-tool adapter: pipes each file through a program's stdin/stdout.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};

use super::{AssetFile, TransformContext, TransformError};
use crate::cache::TransformCache;

/// Placeholder in `args` replaced with the absolute source path.
const FILE_PLACEHOLDER: &str = "{file}";

/// An external program invocation.
///
/// The program reads the file on stdin and writes the transformed file to
/// stdout. A non-zero exit status is a transform failure carrying stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Executable, resolved through `PATH`
    pub program: String,
    /// Arguments; `{file}` expands to the source path
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra arguments appended when source maps are enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_map_args: Vec<String>,
    /// Rewrite the output extension (e.g. `pug` to `html`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Reuse outputs for identical entry files. Only safe for tools whose
    /// output depends on stdin alone (no imports, includes or partials).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache: bool,
}

impl CommandStep {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            source_map_args: Vec::new(),
            extension: None,
            cache: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn label(&self) -> String {
        format!("command:{}", self.program)
    }

    fn command_args(&self, file: &AssetFile, source_maps: bool) -> Vec<String> {
        let source = file.source.to_string_lossy();
        let extra: &[String] = if source_maps { &self.source_map_args } else { &[] };
        self.args
            .iter()
            .chain(extra)
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &source))
            .collect()
    }

    /// Transform one file.
    pub(super) fn run(
        &self,
        mut file: AssetFile,
        fingerprint: &str,
        ctx: &TransformContext<'_>,
    ) -> Result<AssetFile, TransformError> {
        let args = self.command_args(&file, ctx.source_maps);

        let output = if self.cache {
            let source = file.source.to_string_lossy();
            let maps: &[u8] = if ctx.source_maps { b"maps" } else { b"" };
            let key = TransformCache::key(&[
                fingerprint.as_bytes(),
                maps,
                source.as_bytes(),
                &file.contents,
            ]);
            ctx.cache.get_or_insert_with(&key, || self.execute(&args, &file, ctx))?
        } else {
            self.execute(&args, &file, ctx)?
        };

        file.contents = output;
        if let Some(ext) = &self.extension {
            file.path.set_extension(ext);
        }
        Ok(file)
    }

    fn execute(
        &self,
        args: &[String],
        file: &AssetFile,
        ctx: &TransformContext<'_>,
    ) -> Result<Vec<u8>, TransformError> {
        let label = self.label();
        tracing::debug!("{} {} < {}", self.program, args.join(" "), file.source.display());

        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(ctx.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TransformError::new(&label, format!("failed to launch '{}': {}", self.program, e))
                    .with_file(&file.source)
            })?;

        // stdin is fed on its own thread while wait_with_output drains stdout
        let stdin = child.stdin.take();
        let input = file.contents.clone();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
            }
            Ok(())
        });

        let output = child.wait_with_output().map_err(|e| {
            TransformError::new(&label, format!("failed to wait for '{}': {}", self.program, e))
                .with_file(&file.source)
        })?;
        // Broken pipe here is expected when the tool ignores stdin
        let _ = writer.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let status = match output.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            let message = if stderr.is_empty() { status } else { format!("{} ({})", stderr, status) };
            return Err(TransformError::new(&label, message).with_file(&file.source));
        }

        Ok(output.stdout)
    }
}
