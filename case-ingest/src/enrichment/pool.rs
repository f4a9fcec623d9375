//! Bounded pool running enrichment tasks off the foreground.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::results::EnrichmentListener;
use super::task::{EnrichmentTask, TaskOutcome};
use crate::case::{Content, ContentProvider, ObjectId};
use crate::error::{Error, Result};
use crate::node::DisplayPreferences;

/// Configuration for an [`EnrichmentPool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentPoolConfig {
    /// Maximum number of tasks running at once.
    pub max_in_flight: usize,
}

impl Default for EnrichmentPoolConfig {
    fn default() -> Self {
        Self { max_in_flight: 10 }
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time counters of an [`EnrichmentPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrichmentPoolStats {
    pub queued: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub stale: u64,
    pub failed: u64,
}

/// Shared, bounded pool for enrichment tasks.
///
/// Submissions are queued without limit and started in FIFO order; at most
/// `max_in_flight` tasks run at once. The synchronous lookups of a task run
/// on the blocking thread pool while it holds its permit.
pub struct EnrichmentPool {
    config: EnrichmentPoolConfig,
    provider: Arc<dyn ContentProvider>,
    sender: mpsc::UnboundedSender<EnrichmentTask>,
    stats: Arc<PoolStats>,
    cancellation_token: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EnrichmentPool {
    /// Create the pool and start its dispatcher. Must be called within a
    /// tokio runtime.
    pub fn new(
        config: EnrichmentPoolConfig,
        provider: Arc<dyn ContentProvider>,
        prefs: Arc<DisplayPreferences>,
    ) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(PoolStats::default());
        let cancellation_token = CancellationToken::new();

        let dispatcher = tokio::spawn(Self::dispatch_loop(
            receiver,
            Arc::new(Semaphore::new(max_in_flight)),
            Arc::clone(&provider),
            prefs,
            Arc::clone(&stats),
            cancellation_token.clone(),
        ));

        info!(max_in_flight, "Started enrichment pool");
        Self {
            config,
            provider,
            sender,
            stats,
            cancellation_token,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn config(&self) -> &EnrichmentPoolConfig {
        &self.config
    }

    /// Queue enrichment for `content`, reporting to `listener`.
    ///
    /// Returns `false` when the content is already gone or the pool has shut
    /// down; either way nothing is queued.
    pub fn submit(&self, content: Weak<Content>, listener: Weak<dyn EnrichmentListener>) -> bool {
        let Some(content) = content.upgrade() else {
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        self.enqueue(EnrichmentTask::new(&content, listener))
    }

    /// Resolve `content_id` through the content provider and queue enrichment
    /// for it.
    pub fn request_enrichment(
        &self,
        content_id: ObjectId,
        listener: Weak<dyn EnrichmentListener>,
    ) -> Result<()> {
        let content = self.provider.content(content_id)?;
        if self.enqueue(EnrichmentTask::new(&content, listener)) {
            Ok(())
        } else {
            Err(Error::scheduler("enrichment pool is shut down"))
        }
    }

    fn enqueue(&self, task: EnrichmentTask) -> bool {
        if self.cancellation_token.is_cancelled() {
            return false;
        }
        let content_id = task.content_id();
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(task).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        trace!(content_id, "Queued enrichment task");
        true
    }

    async fn dispatch_loop(
        mut receiver: mpsc::UnboundedReceiver<EnrichmentTask>,
        semaphore: Arc<Semaphore>,
        provider: Arc<dyn ContentProvider>,
        prefs: Arc<DisplayPreferences>,
        stats: Arc<PoolStats>,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let task = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                task = receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            // The next task is only taken once this one has a permit.
            let permit = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            stats.in_flight.fetch_add(1, Ordering::Relaxed);
            stats.queued.fetch_sub(1, Ordering::Relaxed);

            let provider = Arc::clone(&provider);
            let prefs = Arc::clone(&prefs);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let content_id = task.content_id();
                let result =
                    tokio::task::spawn_blocking(move || task.run(provider.as_ref(), &prefs)).await;

                match result {
                    Ok(TaskOutcome::Delivered { events }) => {
                        trace!(content_id, events, "Enrichment task delivered");
                        stats.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(TaskOutcome::Stale) => {
                        trace!(content_id, "Enrichment task skipped stale reference");
                        stats.stale.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!(content_id, error = %e, "Enrichment task panicked");
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                stats.in_flight.fetch_sub(1, Ordering::Relaxed);
                drop(permit);
            });
        }

        receiver.close();
        let mut discarded = 0usize;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        stats.queued.fetch_sub(discarded, Ordering::Relaxed);
        debug!(discarded, "Enrichment dispatcher stopped");
    }

    /// Tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::Relaxed)
    }

    /// Tasks waiting for a permit.
    pub fn queued(&self) -> usize {
        self.stats.queued.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EnrichmentPoolStats {
        EnrichmentPoolStats {
            queued: self.queued(),
            in_flight: self.in_flight(),
            completed: self.stats.completed.load(Ordering::Relaxed),
            stale: self.stats.stale.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop dispatching. Queued tasks are discarded; running tasks finish.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher
            && let Err(e) = dispatcher.await
        {
            error!(error = %e, "Enrichment dispatcher failed");
        }
        info!("Enrichment pool shut down");
    }
}

impl Drop for EnrichmentPool {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{ContentTag, CorrelationRecord, HashSetHit, InMemoryCase, StorageError};
    use crate::enrichment::results::NodeEvent;
    use std::time::Duration;

    /// Provider whose tag lookup blocks until released, tracking concurrency.
    #[derive(Default)]
    struct GatedProvider {
        inner: InMemoryCase,
        running: AtomicUsize,
        max_running: AtomicUsize,
        started: AtomicUsize,
        releases: AtomicUsize,
    }

    impl GatedProvider {
        fn release(&self, n: usize) {
            self.releases.fetch_add(n, Ordering::SeqCst);
        }

        fn wait_for_release(&self) {
            loop {
                let available = self.releases.load(Ordering::SeqCst);
                if available > 0
                    && self
                        .releases
                        .compare_exchange(available, available - 1, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    impl ContentProvider for GatedProvider {
        fn content(&self, id: ObjectId) -> std::result::Result<Arc<Content>, StorageError> {
            self.inner.content(id)
        }

        fn data_source_files(
            &self,
            data_source: &crate::case::DataSource,
        ) -> std::result::Result<Vec<Arc<Content>>, StorageError> {
            self.inner.data_source_files(data_source)
        }

        fn content_tags(&self, id: ObjectId) -> std::result::Result<Vec<ContentTag>, StorageError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.wait_for_release();
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.inner.content_tags(id)
        }

        fn hash_set_hits(&self, id: ObjectId) -> std::result::Result<Vec<HashSetHit>, StorageError> {
            self.inner.hash_set_hits(id)
        }

        fn correlation(
            &self,
            content: &Content,
        ) -> std::result::Result<Option<CorrelationRecord>, StorageError> {
            self.inner.correlation(content)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ObjectId, NodeEvent)>>,
    }

    impl EnrichmentListener for Recorder {
        fn on_node_event(&self, content_id: ObjectId, event: NodeEvent) {
            self.events.lock().push((content_id, event));
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_never_exceeds_bound() {
        let provider = Arc::new(GatedProvider::default());
        let files: Vec<_> = (1..=3)
            .map(|id| provider.inner.add_file(Content::new(id, 1, format!("{id}.bin"))))
            .collect();
        let pool = EnrichmentPool::new(
            EnrichmentPoolConfig { max_in_flight: 2 },
            provider.clone(),
            Arc::new(DisplayPreferences::new()),
        );
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn EnrichmentListener> = recorder.clone();

        for file in &files {
            assert!(pool.submit(Arc::downgrade(file), Arc::downgrade(&listener)));
        }

        wait_until(|| provider.started.load(Ordering::SeqCst) == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.started.load(Ordering::SeqCst), 2);
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.queued(), 1);

        provider.release(1);
        wait_until(|| provider.started.load(Ordering::SeqCst) == 3).await;

        provider.release(2);
        wait_until(|| pool.stats().completed == 3).await;
        assert_eq!(provider.max_running.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.events.lock().len(), 3);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_discarded_entity_is_not_queued() {
        let case = Arc::new(InMemoryCase::new());
        let pool = EnrichmentPool::new(
            EnrichmentPoolConfig::default(),
            case,
            Arc::new(DisplayPreferences::new()),
        );
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn EnrichmentListener> = recorder.clone();

        let content = Arc::new(Content::new(1, 1, "gone.txt"));
        let weak_content = Arc::downgrade(&content);
        drop(content);

        assert!(!pool.submit(weak_content, Arc::downgrade(&listener)));
        assert_eq!(pool.stats().stale, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_enrichment_by_id() {
        let case = Arc::new(InMemoryCase::new());
        case.add_file(Content::new(5, 1, "a.txt"));
        let pool = EnrichmentPool::new(
            EnrichmentPoolConfig::default(),
            case,
            Arc::new(DisplayPreferences::new()),
        );
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn EnrichmentListener> = recorder.clone();

        pool.request_enrichment(5, Arc::downgrade(&listener)).unwrap();
        wait_until(|| !recorder.events.lock().is_empty()).await;
        assert_eq!(recorder.events.lock()[0].0, 5);

        assert!(pool.request_enrichment(99, Arc::downgrade(&listener)).is_err());
        pool.shutdown().await;
        assert!(pool.request_enrichment(5, Arc::downgrade(&listener)).is_err());
    }
}
