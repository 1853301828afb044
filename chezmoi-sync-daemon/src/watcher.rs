//! Source-tree change notifications.
//!
//! [`Watcher`] hands the push reactor batches of changed paths. The
//! production provider wraps `notify`; tests drive a [`ChannelWatcher`].

use std::fs;
use std::path::{Component, Path, PathBuf};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode};
use tokio::sync::mpsc;

use crate::error::{io_err, DaemonError};

const CHANNEL_CAPACITY: usize = 256;

/// Paths touched by one filesystem event, `.git/` already filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub paths: Vec<PathBuf>,
}

pub trait Watcher: Send {
    fn events(&mut self) -> &mut mpsc::Receiver<ChangeBatch>;

    /// Stop producing events. Idempotent.
    fn close(&mut self);
}

/// Recursive `notify` watch on the source tree.
pub struct NotifyWatcher {
    root: PathBuf,
    inner: Option<RecommendedWatcher>,
    rx: mpsc::Receiver<ChangeBatch>,
}

impl NotifyWatcher {
    pub fn start(root: &Path) -> Result<Self, DaemonError> {
        // FSEvents reports real paths (/private/var/...), so compare canonical ones.
        let root = fs::canonicalize(root).map_err(|e| io_err(root, e))?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let filter_root = root.clone();
        let mut inner = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => {
                if let Some(batch) = to_batch(event, &filter_root) {
                    // A full channel already guarantees a pending run.
                    let _ = tx.try_send(batch);
                }
            }
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        })?;
        notify::Watcher::watch(&mut inner, &root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching source tree");

        Ok(Self {
            root,
            inner: Some(inner),
            rx,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Watcher for NotifyWatcher {
    fn events(&mut self) -> &mut mpsc::Receiver<ChangeBatch> {
        &mut self.rx
    }

    fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            let _ = notify::Watcher::unwatch(&mut inner, &self.root);
        }
        self.rx.close();
    }
}

/// In-memory provider; the sender half injects batches.
pub struct ChannelWatcher {
    rx: mpsc::Receiver<ChangeBatch>,
}

impl ChannelWatcher {
    pub fn new() -> (mpsc::Sender<ChangeBatch>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (tx, Self { rx })
    }
}

impl Watcher for ChannelWatcher {
    fn events(&mut self) -> &mut mpsc::Receiver<ChangeBatch> {
        &mut self.rx
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// True for anything inside a `.git` directory.
pub fn is_ignored(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .any(|c| matches!(c, Component::Normal(name) if name == ".git"))
}

fn to_batch(event: Event, root: &Path) -> Option<ChangeBatch> {
    if !is_relevant_event_kind(&event.kind) {
        return None;
    }
    let paths: Vec<PathBuf> = event
        .paths
        .into_iter()
        .filter(|p| !is_ignored(p, root))
        .collect();
    (!paths.is_empty()).then_some(ChangeBatch { paths })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn git_internals_are_ignored() {
        let root = Path::new("/src");
        assert!(is_ignored(Path::new("/src/.git/index.lock"), root));
        assert!(is_ignored(Path::new("/src/.git"), root));
        assert!(!is_ignored(Path::new("/src/dot_gitconfig"), root));
        assert!(!is_ignored(Path::new("/src/dot_config/git/config"), root));
    }

    #[test]
    fn batches_drop_ignored_paths_and_access_events() {
        let root = Path::new("/src");
        let mixed = event(
            EventKind::Modify(ModifyKind::Any),
            &["/src/.git/HEAD", "/src/dot_zshrc"],
        );
        assert_eq!(
            to_batch(mixed, root),
            Some(ChangeBatch {
                paths: vec![PathBuf::from("/src/dot_zshrc")]
            })
        );

        let only_git = event(EventKind::Create(CreateKind::File), &["/src/.git/ORIG_HEAD"]);
        assert_eq!(to_batch(only_git, root), None);

        let access = event(EventKind::Access(AccessKind::Any), &["/src/dot_zshrc"]);
        assert_eq!(to_batch(access, root), None);
    }

    #[tokio::test]
    async fn channel_watcher_delivers_and_closes() {
        let (tx, mut watcher) = ChannelWatcher::new();
        tx.send(ChangeBatch {
            paths: vec!["a".into()],
        })
        .await
        .unwrap();
        assert!(watcher.events().recv().await.is_some());
        watcher.close();
        assert!(tx.send(ChangeBatch { paths: vec![] }).await.is_err());
    }

    #[tokio::test]
    async fn notify_watcher_reports_file_writes() {
        let dir = TempDir::new().unwrap();
        let mut watcher = NotifyWatcher::start(dir.path()).unwrap();
        // give the backend a moment to register
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("dot_zshrc"), "x").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), watcher.events().recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert!(batch
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == "dot_zshrc")));
        watcher.close();
    }
}
