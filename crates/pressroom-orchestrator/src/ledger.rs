use parking_lot::{Mutex, RwLock};
use pressroom_agents::template::string_list;
use pressroom_agents::{StepOutput, ThemeSnapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Theme coverage accumulated across the documents of a run.
///
/// Readers take an immutable [`ThemeSnapshot`]; each fold publishes a new
/// snapshot with a higher version.
///
/// Jobs contribute through [`publish`](Self::publish), which folds
/// contributions strictly in admission order. [`snapshot_before`](Self::snapshot_before)
/// therefore returns, for job `i`, the coverage of jobs `0..i` whatever
/// order they finished in, so reruns of the same inputs see the same
/// snapshots.
#[derive(Debug)]
pub struct ThemeLedger {
    current: RwLock<Arc<ThemeSnapshot>>,
    pending: Mutex<PendingFolds>,
    folded: watch::Sender<usize>,
}

/// Contributions published out of order, waiting for their predecessors.
#[derive(Debug, Default)]
struct PendingFolds {
    next: usize,
    waiting: BTreeMap<usize, Option<StepOutput>>,
}

impl Default for ThemeLedger {
    fn default() -> Self {
        let (folded, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::default()),
            pending: Mutex::new(PendingFolds::default()),
            folded,
        }
    }
}

impl ThemeLedger {
    /// An empty ledger at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ThemeSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Number of jobs, counted from admission index 0, already folded.
    pub fn folded_jobs(&self) -> usize {
        *self.folded.borrow()
    }

    /// Wait until every job admitted before `index` has published, then
    /// return the snapshot covering exactly those jobs.
    ///
    /// Must be called by job `index` before it publishes itself.
    pub async fn snapshot_before(&self, index: usize) -> Arc<ThemeSnapshot> {
        let mut folded = self.folded.subscribe();
        // The sender lives in `self`, so the wait cannot fail.
        if folded.wait_for(|next| *next >= index).await.is_err() {
            debug!(index, "Theme ledger closed while waiting");
        }
        self.snapshot()
    }

    /// Record job `index`'s contribution: its theme step output, or `None`
    /// when it produced none. Later calls for the same index are ignored.
    ///
    /// Contributions are folded in index order; one published ahead of its
    /// predecessors waits until they arrive.
    pub fn publish(&self, index: usize, theme_output: Option<&StepOutput>) {
        let mut pending = self.pending.lock();
        if index < pending.next || pending.waiting.contains_key(&index) {
            return;
        }
        pending.waiting.insert(index, theme_output.cloned());

        let start = pending.next;
        loop {
            let next = pending.next;
            let Some(contribution) = pending.waiting.remove(&next) else {
                break;
            };
            if let Some(output) = contribution {
                self.fold(&output);
            }
            pending.next += 1;
        }
        if pending.next != start {
            self.folded.send_replace(pending.next);
        }
    }

    /// Fold the themes of one document's theme step output.
    ///
    /// Each distinct keyword (and the main theme) counts once per document.
    /// Returns the new version, or `None` when the output carried no themes.
    pub fn fold(&self, theme_output: &StepOutput) -> Option<u64> {
        let mut themes: BTreeSet<String> = string_list(&theme_output.data, "keywords")
            .into_iter()
            .map(|k| k.to_lowercase())
            .collect();
        if let Some(main) = theme_output.str_field("main_theme") {
            let main = main.trim().to_lowercase();
            if !main.is_empty() {
                themes.insert(main);
            }
        }
        if themes.is_empty() {
            return None;
        }

        let mut current = self.current.write();
        let mut next = ThemeSnapshot::clone(&current);
        for theme in themes {
            *next.coverage.entry(theme).or_insert(0) += 1;
        }
        next.version += 1;
        let version = next.version;
        *current = Arc::new(next);
        debug!(version, themes = current.coverage.len(), "Theme ledger updated");
        Some(version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fold_counts_once_per_document() {
        let ledger = ThemeLedger::new();
        let before = ledger.snapshot();

        let out = StepOutput::new(json!({
            "main_theme": "Qi",
            "keywords": ["qi", "Meridians", "meridians"]
        }));
        assert_eq!(ledger.fold(&out), Some(1));
        assert_eq!(ledger.fold(&out), Some(2));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.coverage["qi"], 2);
        assert_eq!(snapshot.coverage["meridians"], 2);

        // Earlier snapshots are unaffected.
        assert_eq!(before.version, 0);
        assert!(before.is_empty());
    }

    fn theme(keyword: &str) -> StepOutput {
        StepOutput::new(json!({"keywords": [keyword]}))
    }

    #[test]
    fn test_publish_folds_in_admission_order() {
        let ledger = ThemeLedger::new();

        ledger.publish(2, Some(&theme("c")));
        ledger.publish(1, None);
        assert_eq!(ledger.folded_jobs(), 0);
        assert_eq!(ledger.snapshot().version, 0);

        ledger.publish(0, Some(&theme("a")));
        assert_eq!(ledger.folded_jobs(), 3);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.coverage.keys().collect::<Vec<_>>(), vec!["a", "c"]);

        // Republishing an index is a no-op.
        ledger.publish(0, Some(&theme("a")));
        assert_eq!(ledger.snapshot().version, 2);
    }

    #[tokio::test]
    async fn test_snapshot_before_waits_for_predecessors() {
        let ledger = Arc::new(ThemeLedger::new());
        assert_eq!(ledger.snapshot_before(0).await.version, 0);

        let waiter = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.snapshot_before(2).await })
        };
        ledger.publish(1, Some(&theme("b")));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        ledger.publish(0, Some(&theme("a")));
        let snapshot = waiter.await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.coverage.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_fold_without_themes_keeps_version() {
        let ledger = ThemeLedger::new();
        assert_eq!(ledger.fold(&StepOutput::new(json!({"keywords": []}))), None);
        assert_eq!(ledger.snapshot().version, 0);
    }
}
