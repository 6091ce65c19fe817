//! Build result types.
//!
//! Contains types for representing the outcome of pipeline invocations and
//! whole graph runs.

use std::path::PathBuf;
use std::time::Duration;

/// Status of a single pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    /// All steps ran and outputs were written
    Success,
    /// Failed with the given diagnostic; nothing was written
    Failed(String),
}

impl PipelineStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineStatus::Success)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineStatus::Failed(_))
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Success => write!(f, "success"),
            PipelineStatus::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Result of invoking one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline: String,
    /// Invocation status
    pub status: PipelineStatus,
    /// Files written, in write order
    pub outputs: Vec<PathBuf>,
    /// Invocation duration
    pub duration: Duration,
}

impl PipelineResult {
    /// Create a successful result.
    pub fn success(pipeline: String, outputs: Vec<PathBuf>, duration: Duration) -> Self {
        Self { pipeline, status: PipelineStatus::Success, outputs, duration }
    }

    /// Create a failed result.
    pub fn failed(pipeline: String, error: String, duration: Duration) -> Self {
        Self { pipeline, status: PipelineStatus::Failed(error), outputs: vec![], duration }
    }

    /// Check if this result is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of running an execution graph.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Results for each pipeline invocation, in completion order
    pub pipelines: Vec<PipelineResult>,
    /// Total duration
    pub total_duration: Duration,
}

impl BuildReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pipeline result.
    pub fn add_result(&mut self, result: PipelineResult) {
        self.pipelines.push(result);
    }

    /// Append every result of another report.
    pub fn merge(&mut self, other: BuildReport) {
        self.pipelines.extend(other.pipelines);
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    /// Get the number of successful invocations.
    pub fn success_count(&self) -> usize {
        self.pipelines.iter().filter(|r| r.is_success()).count()
    }

    /// Get the number of failed invocations.
    pub fn failed_count(&self) -> usize {
        self.pipelines.iter().filter(|r| r.status.is_failure()).count()
    }

    /// Check if every invocation succeeded.
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Result for a pipeline by name (the first invocation).
    pub fn result(&self, pipeline: &str) -> Option<&PipelineResult> {
        self.pipelines.iter().find(|r| r.pipeline == pipeline)
    }

    /// Get all outputs produced.
    pub fn all_outputs(&self) -> Vec<&PathBuf> {
        self.pipelines.iter().flat_map(|r| r.outputs.iter()).collect()
    }

    /// Get failed results.
    pub fn failures(&self) -> Vec<&PipelineResult> {
        self.pipelines.iter().filter(|r| r.status.is_failure()).collect()
    }

    /// Format a summary of the report.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let failed = self.failed_count();
        let files = self.all_outputs().len();

        if failed > 0 {
            lines.push(format!(
                "Build finished with errors: {} succeeded, {} failed ({} files written) in {:?}",
                success, failed, files, self.total_duration
            ));
            for result in self.failures() {
                lines.push(format!("  - {}: {}", result.pipeline, result.status));
            }
        } else {
            lines.push(format!(
                "Build succeeded: {} pipelines, {} files written in {:?}",
                success, files, self.total_duration
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_status() {
        assert!(PipelineStatus::Success.is_success());
        assert!(!PipelineStatus::Success.is_failure());

        let failed = PipelineStatus::Failed("error".to_string());
        assert!(failed.is_failure());
        assert_eq!(failed.to_string(), "failed: error");
    }

    #[test]
    fn test_report_counts() {
        let mut report = BuildReport::new();
        report.add_result(PipelineResult::success(
            "html".to_string(),
            vec![PathBuf::from("/p/src/index.html")],
            Duration::from_millis(5),
        ));
        report.add_result(PipelineResult::failed(
            "js".to_string(),
            "babel exited 1".to_string(),
            Duration::from_millis(2),
        ));

        assert_eq!(report.success_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_success());
        assert_eq!(report.all_outputs().len(), 1);
        assert!(report.result("js").unwrap().status.is_failure());
    }

    #[test]
    fn test_merge() {
        let mut a = BuildReport::new();
        a.add_result(PipelineResult::success("html".to_string(), vec![], Duration::ZERO));
        let mut b = BuildReport::new();
        b.add_result(PipelineResult::success("css".to_string(), vec![], Duration::ZERO));

        a.merge(b);
        assert_eq!(a.pipelines.len(), 2);
    }

    #[test]
    fn test_summary_success() {
        let mut report = BuildReport::new();
        report.add_result(PipelineResult::success(
            "css".to_string(),
            vec![PathBuf::from("a"), PathBuf::from("b")],
            Duration::ZERO,
        ));
        let summary = report.summary();
        assert!(summary.contains("Build succeeded"));
        assert!(summary.contains("2 files written"));
    }

    #[test]
    fn test_summary_failure_lists_pipelines() {
        let mut report = BuildReport::new();
        report.add_result(PipelineResult::failed(
            "sass".to_string(),
            "bad indent".to_string(),
            Duration::ZERO,
        ));
        let summary = report.summary();
        assert!(summary.contains("finished with errors"));
        assert!(summary.contains("sass: failed: bad indent"));
    }
}
