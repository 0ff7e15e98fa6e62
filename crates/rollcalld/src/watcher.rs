use crate::engine::EngineHandle;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rollcall_io::manifest::is_manifest;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Remembers the last modification time each inbox file was triggered at.
#[derive(Debug, Default)]
pub struct InboxTracker {
    seen: HashMap<PathBuf, SystemTime>,
}

impl InboxTracker {
    /// Whether `path` at `modified` has not been triggered yet.
    pub fn should_trigger(&mut self, path: &Path, modified: SystemTime) -> bool {
        if !is_manifest(path) {
            return false;
        }
        match self.seen.get(path) {
            Some(previous) if *previous == modified => false,
            _ => {
                self.seen.insert(path.to_path_buf(), modified);
                true
            }
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Watch `inbox` and queue an attendance run for every new or changed
/// manifest. The returned watcher stops when dropped.
pub fn spawn_watcher(inbox: &Path, engine: EngineHandle) -> notify::Result<RecommendedWatcher> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        if events_tx.send(result).is_err() {
            tracing::error!("inbox event dropped; watcher task has exited");
        }
    })?;
    watcher.watch(inbox, RecursiveMode::NonRecursive)?;
    tracing::info!(inbox = %inbox.display(), "watching inbox");

    tokio::spawn(async move {
        let mut tracker = InboxTracker::default();
        while let Some(result) = events_rx.recv().await {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "inbox watch error");
                    continue;
                }
            };
            if !is_relevant(&event.kind) {
                continue;
            }
            for path in event.paths {
                // The file may already be gone again; nothing to run then.
                let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) else {
                    continue;
                };
                if !tracker.should_trigger(&path, modified) {
                    continue;
                }
                tracing::info!(scene = %path.display(), "new scene in inbox");
                if let Err(err) = engine.submit(path).await {
                    tracing::error!(error = %err, "cannot queue attendance run");
                    return;
                }
            }
        }
    });

    Ok(watcher)
}
