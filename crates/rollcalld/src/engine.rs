use rollcall_core::{EmbeddingStore, MatchConfig};
use rollcall_io::{
    enroll_directory, run_attendance, Config, EnrollmentError, EnrollmentSummary, Gallery,
    GalleryError, ManifestBackend, PipelineError, RunSettings, RunSummary,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("attendance run failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("enrollment failed: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("cannot spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Everything the engine thread needs besides the store itself.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub run: RunSettings,
    pub enroll_dir: PathBuf,
    pub gallery_path: PathBuf,
    pub queue_depth: usize,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            run: RunSettings::from(config),
            enroll_dir: config.enroll_dir.clone(),
            gallery_path: config.gallery_path.clone(),
            queue_depth: config.queue_depth,
        }
    }
}

/// Snapshot reported by `Status()`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub identities: usize,
    pub references: usize,
    pub dimension: Option<usize>,
    pub matching: MatchConfig,
    pub runs_completed: u64,
    pub runs_failed: u64,
    /// Triggers queued but not yet started.
    pub pending: usize,
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityEntry {
    pub identity: String,
    pub references: usize,
}

/// Messages sent from the watcher and D-Bus handlers to the engine thread.
pub(crate) enum EngineRequest {
    Attendance {
        scene: PathBuf,
        /// `None` for fire-and-forget triggers from the inbox watcher.
        reply: Option<oneshot::Sender<Result<RunSummary, EngineError>>>,
    },
    Enroll {
        reply: oneshot::Sender<Result<EnrollmentSummary, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Identities {
        reply: oneshot::Sender<Vec<IdentityEntry>>,
    },
}

type PendingSet = Arc<Mutex<HashSet<PathBuf>>>;

fn lock(pending: &PendingSet) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    pending: PendingSet,
}

impl EngineHandle {
    /// A handle with no engine thread behind it; requests pile up in the
    /// returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<EngineRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            tx,
            pending: PendingSet::default(),
        };
        (handle, rx)
    }

    /// Run attendance on `scene` and wait for the result.
    pub async fn take_attendance(&self, scene: PathBuf) -> Result<RunSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Attendance {
                scene,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Queue a run on `scene` without waiting for it.
    ///
    /// Returns `false` when the same scene is already queued and has not
    /// started yet; the two triggers collapse into one run.
    pub async fn submit(&self, scene: PathBuf) -> Result<bool, EngineError> {
        if !lock(&self.pending).insert(scene.clone()) {
            tracing::debug!(scene = %scene.display(), "trigger coalesced");
            return Ok(false);
        }
        let request = EngineRequest::Attendance {
            scene: scene.clone(),
            reply: None,
        };
        if self.tx.send(request).await.is_err() {
            lock(&self.pending).remove(&scene);
            return Err(EngineError::ChannelClosed);
        }
        Ok(true)
    }

    /// Rebuild the store from the enrollment directory and persist it.
    pub async fn enroll(&self) -> Result<EnrollmentSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn identities(&self) -> Result<Vec<IdentityEntry>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identities { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Enroll from `dir` and replace the gallery at `gallery_path` with the result.
pub fn enroll_and_save(
    dir: &Path,
    gallery_path: &Path,
    backend: &mut ManifestBackend,
) -> Result<(EmbeddingStore, EnrollmentSummary), EngineError> {
    let (store, summary) = enroll_directory(dir, backend)?;
    Gallery::open(gallery_path)?.save(&store)?;
    Ok((store, summary))
}

/// State owned by the engine thread. Requests are served one at a time, so
/// enrollment never overlaps a run and at most one run is in flight.
struct Engine {
    backend: ManifestBackend,
    store: EmbeddingStore,
    settings: EngineSettings,
    pending: PendingSet,
    runs_completed: u64,
    runs_failed: u64,
    last_run: Option<RunSummary>,
}

impl Engine {
    fn new(settings: EngineSettings, store: EmbeddingStore, pending: PendingSet) -> Self {
        Self {
            backend: ManifestBackend,
            store,
            settings,
            pending,
            runs_completed: 0,
            runs_failed: 0,
            last_run: None,
        }
    }

    fn serve(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Attendance { scene, reply } => match reply {
                Some(reply) => {
                    // Awaited runs never entered the pending set; a queued
                    // trigger for the same scene keeps its entry.
                    let _ = reply.send(self.attendance(&scene));
                }
                None => {
                    lock(&self.pending).remove(&scene);
                    if let Err(err) = self.attendance(&scene) {
                        tracing::warn!(scene = %scene.display(), error = %err, "triggered run failed");
                    }
                }
            },
            EngineRequest::Enroll { reply } => {
                let _ = reply.send(self.enroll());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            EngineRequest::Identities { reply } => {
                let identities = self
                    .store
                    .iter()
                    .map(|(identity, references)| IdentityEntry {
                        identity: identity.to_string(),
                        references: references.len(),
                    })
                    .collect();
                let _ = reply.send(identities);
            }
        }
    }

    fn attendance(&mut self, scene: &Path) -> Result<RunSummary, EngineError> {
        let now = chrono::Local::now().naive_local();
        let scenes = [scene.to_path_buf()];
        match run_attendance(
            &mut self.backend,
            &self.store,
            &self.settings.run,
            &scenes,
            now,
        ) {
            Ok(outcome) => {
                self.runs_completed += 1;
                self.last_run = Some(outcome.summary.clone());
                Ok(outcome.summary)
            }
            Err(err) => {
                self.runs_failed += 1;
                Err(err.into())
            }
        }
    }

    fn enroll(&mut self) -> Result<EnrollmentSummary, EngineError> {
        // The current store stays in service if enrollment or the save fails.
        let (store, summary) = enroll_and_save(
            &self.settings.enroll_dir,
            &self.settings.gallery_path,
            &mut self.backend,
        )?;
        self.store = store;
        Ok(summary)
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            identities: self.store.len(),
            references: self.store.total_references(),
            dimension: self.store.dimension(),
            matching: self.settings.run.matching,
            runs_completed: self.runs_completed,
            runs_failed: self.runs_failed,
            pending: lock(&self.pending).len(),
            last_run: self.last_run.clone(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread that owns `store`.
pub fn spawn_engine(
    settings: EngineSettings,
    store: EmbeddingStore,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(settings.queue_depth.max(1));
    let pending = PendingSet::default();

    tracing::info!(
        identities = store.len(),
        references = store.total_references(),
        metric = %settings.run.matching.metric,
        threshold = settings.run.matching.threshold,
        "engine ready"
    );

    let mut engine = Engine::new(settings, store, Arc::clone(&pending));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                engine.serve(request);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, pending })
}
