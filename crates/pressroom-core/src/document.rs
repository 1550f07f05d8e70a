use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifies one source document handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Stable identifier, unique within a run.
    pub id: String,
    /// Where the document lives.
    pub source: PathBuf,
}

impl DocumentRef {
    /// Create a reference with an explicit id.
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }

    /// Derive the id from the file stem of `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        Self::new(id, path)
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// Kind of artifact produced by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Extracted source text or its summary.
    Analysis,
    /// Theme coverage analysis.
    Themes,
    /// Content strategy (topics, calendar).
    Strategy,
    /// Long-form article.
    Article,
    /// Social network posts.
    SocialPost,
    /// Prompts for image generation.
    VisualPrompt,
    /// Validation verdict.
    Validation,
}

impl ArtifactKind {
    /// File extension used when the artifact is persisted.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Article => "md",
            ArtifactKind::Analysis => "txt",
            _ => "json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Analysis => write!(f, "analysis"),
            ArtifactKind::Themes => write!(f, "themes"),
            ArtifactKind::Strategy => write!(f, "strategy"),
            ArtifactKind::Article => write!(f, "article"),
            ArtifactKind::SocialPost => write!(f, "social_post"),
            ArtifactKind::VisualPrompt => write!(f, "visual_prompt"),
            ArtifactKind::Validation => write!(f, "validation"),
        }
    }
}

/// An artifact produced by a step while processing a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// What the artifact is.
    pub kind: ArtifactKind,
    /// Rendered content.
    pub content: String,
    /// Suggested file name, relative to the document's output directory.
    pub file_name: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact with no file name.
    pub fn new(kind: ArtifactKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            file_name: None,
            created_at: Utc::now(),
        }
    }

    /// Set the file name used on persistence.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// The file name to persist under, falling back to `<kind>.<ext>`.
    pub fn resolved_file_name(&self) -> String {
        match &self.file_name {
            Some(name) => name.clone(),
            None => format!("{}.{}", self.kind, self.kind.extension()),
        }
    }
}
