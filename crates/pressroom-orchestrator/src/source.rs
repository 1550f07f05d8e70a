use async_trait::async_trait;
use pressroom_core::{DocumentRef, PressroomError, PressroomResult};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Supplies the ordered list of documents for a run.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents in processing order, with unique ids.
    async fn documents(&self) -> PressroomResult<Vec<DocumentRef>>;
}

/// Lists the `*.pdf` and `*.txt` files of a directory, sorted by file name.
///
/// Ids are file stems; when two files share a stem, later ones get the
/// extension appended (`notes_txt`).
pub struct DirectoryScanner {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl DirectoryScanner {
    /// Scan `dir` for PDF and text files.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extensions: vec!["pdf".to_string(), "txt".to_string()],
        }
    }

    /// Accept these extensions instead (case-insensitive, without the dot).
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
        self
    }
}

#[async_trait]
impl DocumentSource for DirectoryScanner {
    async fn documents(&self) -> PressroomResult<Vec<DocumentRef>> {
        let mut reader = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            PressroomError::Config(format!("cannot read input directory {}: {e}", self.dir.display()))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(PressroomError::Io)? {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }
            let accepted = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .is_some_and(|ext| self.extensions.contains(&ext));
            if accepted {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let mut doc = DocumentRef::from_path(&path);
            if !seen.insert(doc.id.clone()) {
                doc.id = format!("{}_{}", doc.id, doc.extension().unwrap_or_default());
                seen.insert(doc.id.clone());
            }
            documents.push(doc);
        }

        debug!(dir = %self.dir.display(), count = documents.len(), "Input documents listed");
        Ok(documents)
    }
}
