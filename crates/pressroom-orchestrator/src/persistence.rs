use crate::job::DocumentJob;
use crate::report::RunReport;
use async_trait::async_trait;
use pressroom_core::{PressroomError, PressroomResult};
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a persisted run ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRun {
    /// The JSON report.
    pub report_path: PathBuf,
    /// The Markdown summary.
    pub summary_path: PathBuf,
    /// Every artifact file written.
    pub artifact_paths: Vec<PathBuf>,
}

/// Receives the finalized run report and the artifacts of every job.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist one run.
    async fn persist(
        &self,
        report: &RunReport,
        jobs: &[DocumentJob],
    ) -> PressroomResult<PersistedRun>;
}

/// JSON-based persistence for run reports and produced content.
///
/// Layout under the base directory:
///
/// ```text
/// reports/run_<timestamp>.json
/// reports/run_<timestamp>.md
/// content/<document id>/<artifact file>
/// ```
pub struct JsonReportStore {
    base_dir: PathBuf,
}

impl JsonReportStore {
    /// Create a store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn reports_dir(&self) -> PathBuf {
        self.base_dir.join("reports")
    }

    fn content_dir(&self) -> PathBuf {
        self.base_dir.join("content")
    }

    /// Save the report and its Markdown summary.
    /// Returns the paths of both files.
    pub async fn save_report(&self, report: &RunReport) -> PressroomResult<(PathBuf, PathBuf)> {
        let dir = self.reports_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(PressroomError::Io)?;

        let stem = format!("run_{}", report.finished_at.format("%Y%m%d_%H%M%S_%3f"));
        let report_path = dir.join(format!("{stem}.json"));
        let summary_path = dir.join(format!("{stem}.md"));

        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&report_path, json)
            .await
            .map_err(PressroomError::Io)?;
        tokio::fs::write(&summary_path, report.to_markdown())
            .await
            .map_err(PressroomError::Io)?;

        Ok((report_path, summary_path))
    }

    /// Write the artifacts of one job under `content/<document id>/`.
    pub async fn save_artifacts(&self, job: &DocumentJob) -> PressroomResult<Vec<PathBuf>> {
        if job.artifacts.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.content_dir().join(sanitize(job.id()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(PressroomError::Io)?;

        let mut written = Vec::with_capacity(job.artifacts.len());
        for artifact in &job.artifacts {
            let path = dir.join(sanitize(&artifact.resolved_file_name()));
            tokio::fs::write(&path, &artifact.content)
                .await
                .map_err(PressroomError::Io)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Load the most recent report, if any.
    pub async fn load_latest(&self) -> PressroomResult<Option<RunReport>> {
        let reports = self.list_reports().await?;

        match reports.last() {
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(PressroomError::Io)?;
                let report: RunReport = serde_json::from_str(&content)?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// List all JSON report files, sorted by name (ascending = oldest first).
    pub async fn list_reports(&self) -> PressroomResult<Vec<PathBuf>> {
        let dir = self.reports_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(PressroomError::Io)?;

        while let Ok(Some(entry)) = reader.next_entry().await {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("run_") && name.ends_with(".json") {
                    entries.push(path);
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    /// Base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl ReportSink for JsonReportStore {
    async fn persist(
        &self,
        report: &RunReport,
        jobs: &[DocumentJob],
    ) -> PressroomResult<PersistedRun> {
        let mut artifact_paths = Vec::new();
        for job in jobs {
            artifact_paths.extend(self.save_artifacts(job).await?);
        }
        let (report_path, summary_path) = self.save_report(report).await?;

        info!(
            report = %report_path.display(),
            artifacts = artifact_paths.len(),
            "Run persisted"
        );
        Ok(PersistedRun {
            report_path,
            summary_path,
            artifact_paths,
        })
    }
}

/// Keep a path component inside its parent directory.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    }
}
