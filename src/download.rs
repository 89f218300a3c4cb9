use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::constants::DOWNLOAD_EXTENSION;
use crate::extractor::{fetch_with_fallback, resolve_with_fallback, ExtractorError, MediaExtractor, RequestOptions};
use crate::parsing::{title_to_file_stem, DomainFilter};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("`{0}` is not a link I'm allowed to download")]
    UnsupportedUrl(String),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("download failed: {0}")]
    Failed(String),
    #[error("download was dropped before it finished")]
    Abandoned,
}

#[derive(Clone, Debug, PartialEq)]
enum JobStatus {
    Pending,
    Finished(Result<PathBuf, String>),
}

#[derive(Clone)]
struct Job {
    url: String,
    destination: PathBuf,
    options: RequestOptions,
    status: Arc<watch::Sender<JobStatus>>,
}

impl Job {
    fn is_for(&self, url: &str, destination: &Path) -> bool {
        self.url == url && self.destination == destination
    }

    fn handle(&self) -> DownloadHandle {
        DownloadHandle {
            path: self.destination.clone(),
            status: self.status.subscribe(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Job>,
    in_flight: Option<Job>,
    // only one worker drains the queue at a time
    running: bool,
    resolved: HashMap<String, PathBuf>,
}

struct Inner {
    extractor: Arc<dyn MediaExtractor>,
    directory: PathBuf,
    domains: DomainFilter,
    user_agents: Vec<String>,
    state: Mutex<QueueState>,
}

/// Completion of one scheduled download.
#[derive(Debug)]
pub struct DownloadHandle {
    path: PathBuf,
    status: watch::Receiver<JobStatus>,
}

impl DownloadHandle {
    fn finished(path: PathBuf) -> Self {
        let (_, status) = watch::channel(JobStatus::Finished(Ok(path.clone())));
        Self { path, status }
    }

    /// Where the file will be once the download finished.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn wait(mut self) -> Result<PathBuf, DownloadError> {
        loop {
            let status = self.status.borrow_and_update().clone();
            if let JobStatus::Finished(result) = status {
                return result.map_err(DownloadError::Failed);
            }
            if self.status.changed().await.is_err() {
                return Err(DownloadError::Abandoned);
            }
        }
    }
}

/// Serializes downloads: one in flight per process, the rest wait in FIFO order.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        directory: impl Into<PathBuf>,
        domains: DomainFilter,
        user_agents: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                extractor,
                directory: directory.into(),
                domains,
                user_agents,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.inner.domains.allows(url)
    }

    /// Schedule an audio download into the downloads directory.
    ///
    /// The returned handle knows the destination right away; the bytes arrive
    /// once every earlier request has been processed.
    pub async fn enqueue(&self, url: &str) -> Result<DownloadHandle, DownloadError> {
        let destination = self.url_to_file_path(url).await?;
        Ok(self.enqueue_to(url, destination, RequestOptions::audio(DOWNLOAD_EXTENSION)))
    }

    /// Schedule a download to an explicit destination with per-request options.
    pub fn enqueue_to(&self, url: &str, destination: PathBuf, options: RequestOptions) -> DownloadHandle {
        let mut state = self.inner.lock();

        let pending = state
            .in_flight
            .iter()
            .chain(state.queue.iter())
            .find(|job| job.is_for(url, &destination));
        if let Some(job) = pending {
            return job.handle();
        }

        if destination.is_file() {
            return DownloadHandle::finished(destination);
        }

        let (status, _) = watch::channel(JobStatus::Pending);
        let job = Job {
            url: url.to_string(),
            destination,
            options,
            status: Arc::new(status),
        };
        let handle = job.handle();
        info!(url, destination = ?job.destination, queued = state.queue.len(), "download enqueued");
        state.queue.push_back(job);

        if !state.running {
            state.running = true;
            tokio::spawn(Arc::clone(&self.inner).process());
        }

        handle
    }

    /// Whether `url` is waiting or currently downloading.
    pub fn is_enqueued(&self, url: &str) -> bool {
        let state = self.inner.lock();
        state.in_flight.iter().chain(state.queue.iter()).any(|job| job.url == url)
    }

    pub async fn is_downloaded(&self, url: &str) -> Result<bool, DownloadError> {
        Ok(self.url_to_file_path(url).await?.is_file())
    }

    /// Destination of `url` inside the downloads directory, derived from its title.
    pub async fn url_to_file_path(&self, url: &str) -> Result<PathBuf, DownloadError> {
        if !self.is_supported(url) {
            warn!(url, "provided link is not on the allow-list");
            return Err(DownloadError::UnsupportedUrl(url.to_string()));
        }

        if let Some(path) = self.inner.lock().resolved.get(url) {
            return Ok(path.clone());
        }

        let info = resolve_with_fallback(
            self.inner.extractor.as_ref(),
            url,
            &RequestOptions::default(),
            &self.inner.user_agents,
        )
        .await?;

        let mut stem = title_to_file_stem(&info.title);
        if stem.trim_matches('_').is_empty() {
            stem = title_to_file_stem(&info.id);
        }
        let path = self
            .inner
            .directory
            .join(format!("{stem}.{DOWNLOAD_EXTENSION}"));

        self.inner.lock().resolved.insert(url.to_string(), path.clone());
        Ok(path)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // a panic while holding the lock can't leave the queue half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn process(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.lock();
                match state.queue.pop_front() {
                    Some(job) => {
                        state.in_flight = Some(job.clone());
                        job
                    }
                    None => {
                        state.in_flight = None;
                        state.running = false;
                        return;
                    }
                }
            };

            let result = fetch_with_fallback(
                self.extractor.as_ref(),
                &job.url,
                &job.destination,
                &job.options,
                &self.user_agents,
            )
            .await;

            let outcome = match result {
                Ok(()) => Ok(job.destination.clone()),
                Err(e) => {
                    error!(url = %job.url, destination = ?job.destination, error = %e, "error downloading");
                    Err(e.to_string())
                }
            };

            self.lock().in_flight = None;
            job.status.send_replace(JobStatus::Finished(outcome));
        }
    }
}
