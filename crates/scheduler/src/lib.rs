use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use wayscan_cdx::CdxSeeder;
use wayscan_core::config::AppConfig;
use wayscan_core::{urls, CrawlError, PageFetcher, QueueItem};
use wayscan_frontier::Frontier;
use wayscan_parser::Parser;
use wayscan_storage::{MatchStore, Stats, VisitedSet};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);
const DRAIN_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub max_depth: u32,
    pub queue_size: usize,
    pub batch_size: usize,
    pub auto_save_interval: Duration,
    pub poison_pill: String,
    pub seeds: Vec<String>,
    /// How long an idle worker waits on the queue before polling the
    /// shutdown flag.
    pub pop_timeout: Duration,
}

impl SchedulerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.worker_count(),
            max_depth: config.crawl_depth(),
            queue_size: config.queue_capacity(),
            batch_size: config.batch_size,
            auto_save_interval: Duration::from_secs(config.auto_save_interval),
            poison_pill: config.scheduler.poison_pill.clone(),
            seeds: config.scheduler.seeds.clone(),
            pop_timeout: Duration::from_secs(5),
        }
    }
}

/// The crawl engine: owns the frontier, runs the worker pool, enforces
/// depth, dedup and capacity policy, and drives orderly shutdown.
pub struct Scheduler {
    opts: SchedulerOptions,
    frontier: Frontier,
    visited: Arc<VisitedSet>,
    matches: Arc<MatchStore>,
    stats: Arc<Stats>,
    parser: Arc<Parser>,
    fetcher: Arc<dyn PageFetcher>,
    seeder: Option<CdxSeeder>,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    aux_tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Guards shutdown: the first caller does the work, later callers wait
    /// on the mutex and find it already done.
    shutdown_done: Mutex<bool>,
}

impl Scheduler {
    pub fn new(
        opts: SchedulerOptions,
        visited: Arc<VisitedSet>,
        matches: Arc<MatchStore>,
        stats: Arc<Stats>,
        parser: Arc<Parser>,
        fetcher: Arc<dyn PageFetcher>,
        seeder: Option<CdxSeeder>,
    ) -> Self {
        let frontier = Frontier::new(opts.queue_size);
        Self {
            opts,
            frontier,
            visited,
            matches,
            stats,
            parser,
            fetcher,
            seeder,
            running: AtomicBool::new(true),
            workers: Mutex::new(Vec::new()),
            aux_tasks: Mutex::new(Vec::new()),
            shutdown_done: Mutex::new(false),
        }
    }

    /// Admit one URL. The visited test-and-insert is a single critical
    /// section, so no URL is both unseen and being enqueued at once.
    pub async fn enqueue(&self, url: &str, priority: i64, depth: u32) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        if depth > self.opts.max_depth {
            return false;
        }
        let Some(normalized) = urls::normalize(url) else {
            debug!(url, "unparseable URL skipped");
            return false;
        };
        if !self.visited.insert(&normalized).await {
            return false;
        }
        self.frontier
            .push(QueueItem::new(priority.max(0), depth, normalized))
            .await
    }

    /// Start the pool, bootstrap seeds, run to drain or external shutdown,
    /// then shut down. Workers start first so a seed wave larger than the
    /// queue capacity drains while the bootstrap is still pushing.
    pub async fn run(self: Arc<Self>) -> Result<(), CrawlError> {
        {
            let mut workers = self.workers.lock().await;
            for worker_id in 0..self.opts.workers {
                let scheduler = Arc::clone(&self);
                workers.push(tokio::spawn(async move {
                    scheduler.worker_loop(worker_id).await;
                }));
            }
        }
        info!(workers = self.opts.workers, "worker pool started");
        self.spawn_background_tasks().await;

        self.bootstrap().await;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if self.frontier.unfinished() == 0 {
                info!("queue drained");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.shutdown().await;
        Ok(())
    }

    /// Seeds arrive in two waves at depth 0, priority 0: CDX snapshots per
    /// target domain, then any static seeds from configuration. Only the
    /// CDX wave counts toward the progress denominator.
    async fn bootstrap(&self) {
        if let Some(seeder) = &self.seeder {
            let seeds = seeder.collect_seeds(&self.visited, &self.stats).await;
            self.stats.set_total_urls(seeds.len() as u64).await;
            info!(count = seeds.len(), "CDX seed wave ready");
            for chunk in seeds.chunks(self.opts.batch_size.max(1)) {
                for url in chunk {
                    self.enqueue(url, 0, 0).await;
                }
                tokio::task::yield_now().await;
            }
        }
        let static_seeds = self.opts.seeds.clone();
        for url in &static_seeds {
            self.enqueue(url, 0, 0).await;
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "worker started");
        loop {
            // The flag check bounds shutdown latency: a worker finishes its
            // in-flight URL, not the whole backlog. Pills wake idle pops.
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let Some(item) = self.frontier.pop(self.opts.pop_timeout).await else {
                continue;
            };
            if item.url == self.opts.poison_pill {
                debug!(worker_id, "poison pill received");
                self.frontier.task_done();
                break;
            }
            // A panicking page must not take the worker down with it.
            let processing = AssertUnwindSafe(self.process(worker_id, &item)).catch_unwind();
            if processing.await.is_err() {
                error!(worker_id, url = %item.url, "processing panicked");
                self.stats.increment("errors", 1).await;
            }
            self.frontier.task_done();
        }
        debug!(worker_id, "worker stopped");
    }

    async fn process(&self, worker_id: usize, item: &QueueItem) {
        let fetched = self.fetcher.fetch(&item.url).await;
        let Some(body) = fetched.body.as_deref().filter(|b| !b.is_empty()) else {
            return;
        };

        let (matches, discovered) = self.parser.parse(body, &fetched.final_url);
        let match_count = matches.len();
        if match_count > 0 {
            self.matches.save(&fetched.final_url, matches).await;
            self.stats
                .increment("match_count", match_count as u64)
                .await;
        }
        self.stats.increment("processed_urls", 1).await;

        let processed = self.stats.get("processed_urls").await;
        let total = self.stats.get_total_urls().await;
        info!(
            worker_id,
            processed,
            total,
            matches = match_count,
            depth = item.depth,
            url = %fetched.final_url,
            "processed"
        );

        let child_depth = item.depth + 1;
        let mut priority = i64::from(child_depth);
        if match_count > 0 {
            // Matched pages promote their outbound links.
            priority = (priority - 1).max(0);
        }
        for url in &discovered {
            self.enqueue(url, priority, child_depth).await;
        }
    }

    async fn spawn_background_tasks(self: &Arc<Self>) {
        let progress = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(PROGRESS_INTERVAL).await;
                    if !scheduler.running.load(Ordering::SeqCst) {
                        break;
                    }
                    let processed = scheduler.stats.get("processed_urls").await;
                    let total = scheduler.stats.get_total_urls().await;
                    let matches = scheduler.stats.get("match_count").await;
                    let errors = scheduler.stats.get("errors").await;
                    let percent = scheduler.stats.get_progress().await;
                    info!(
                        processed,
                        total,
                        matches,
                        errors,
                        "progress {:.2}%",
                        percent
                    );
                }
            })
        };
        let saver = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(scheduler.opts.auto_save_interval).await;
                    if !scheduler.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = scheduler.matches.persist().await {
                        error!("auto-save of matches failed: {}", e);
                        scheduler.stats.increment("errors", 1).await;
                    }
                    if let Err(e) = scheduler.stats.persist().await {
                        error!("auto-save of statistics failed: {}", e);
                    }
                    debug!("auto-save completed");
                }
            })
        };
        self.aux_tasks.lock().await.extend([progress, saver]);
    }

    /// Idempotent orderly shutdown: stop admission, deliver one poison pill
    /// per worker, join the pool, persist everything, close the fetcher. A
    /// second caller waits for the first to finish and returns.
    pub async fn shutdown(&self) {
        let mut done = self.shutdown_done.lock().await;
        if *done {
            return;
        }
        info!("shutting down scheduler");
        self.running.store(false, Ordering::SeqCst);
        self.frontier.close();

        for _ in 0..self.opts.workers {
            self.frontier
                .push_pill(QueueItem::new(
                    i64::MAX,
                    0,
                    self.opts.poison_pill.clone(),
                ))
                .await;
        }
        let worker_handles = {
            let mut workers = self.workers.lock().await;
            std::mem::take(&mut *workers)
        };
        for handle in worker_handles {
            let _ = handle.await;
        }
        let aux = {
            let mut aux = self.aux_tasks.lock().await;
            std::mem::take(&mut *aux)
        };
        for task in aux {
            task.abort();
        }

        if let Err(e) = self.matches.persist().await {
            error!("final match persistence failed: {}", e);
        }
        if let Err(e) = self.stats.persist().await {
            error!("final statistics persistence failed: {}", e);
        }
        self.visited.persist().await;
        self.fetcher.close().await;

        let (total_snapshots, new_snapshots) = self.stats.total_snapshots().await;
        let processed = self.stats.get("processed_urls").await;
        let match_count = self.stats.get("match_count").await;
        let errors = self.stats.get("errors").await;
        info!(
            total_snapshots,
            new_snapshots,
            processed,
            match_count,
            errors,
            "crawl finished"
        );
        let failed = self.stats.get_failed_domains().await;
        if !failed.is_empty() {
            warn!(domains = ?failed, "problem domains");
        }
        *done = true;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
