use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use wayscan_core::config::ParserConfig;
use wayscan_core::{Fetched, PageFetcher};
use wayscan_parser::Parser;
use wayscan_scheduler::{Scheduler, SchedulerOptions};
use wayscan_storage::{MatchStore, Stats, VisitedSet};

const ARCHIVE: &str = "http://archive/web/20040101000000id_";

fn page(path: &str) -> String {
    format!("{ARCHIVE}/http://example.jp{path}")
}

/// Serves canned bodies and records every fetched URL.
struct StubFetcher {
    pages: HashMap<String, String>,
    hits: Mutex<Vec<String>>,
    delay: Duration,
}

impl StubFetcher {
    fn new(pages: HashMap<String, String>, delay: Duration) -> Self {
        Self {
            pages,
            hits: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Fetched {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.hits.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some(body) => Fetched {
                body: Some(body.clone()),
                final_url: url.to_string(),
            },
            None => Fetched::empty(url),
        }
    }

    async fn close(&self) {}
}

struct Harness {
    scheduler: Arc<Scheduler>,
    fetcher: Arc<StubFetcher>,
    stats: Arc<Stats>,
    results_path: std::path::PathBuf,
    stats_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(
    pages: HashMap<String, String>,
    patterns: &str,
    seeds: Vec<String>,
    workers: usize,
    max_depth: u32,
    delay: Duration,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("results.json");
    let stats_path = dir.path().join("stats.json");

    let patterns_path = dir.path().join("keywords.txt");
    let mut patterns_file = std::fs::File::create(&patterns_path).unwrap();
    patterns_file.write_all(patterns.as_bytes()).unwrap();

    let parser_cfg = ParserConfig {
        patterns_file: patterns_path.to_string_lossy().into_owned(),
        url_filters: vec![],
        case_sensitive: false,
    };
    let parser = Arc::new(
        Parser::new(&parser_cfg, "archive", vec!["example.jp".to_string()]).unwrap(),
    );

    let visited = Arc::new(VisitedSet::new(
        100_000,
        0.001,
        dir.path().join("bloom_state.json"),
    ));
    let matches = Arc::new(MatchStore::new(results_path.clone()));
    let stats = Arc::new(Stats::new(stats_path.clone()));
    let fetcher = Arc::new(StubFetcher::new(pages, delay));

    let opts = SchedulerOptions {
        workers,
        max_depth,
        queue_size: 1000,
        batch_size: 50,
        auto_save_interval: Duration::from_secs(3600),
        poison_pill: "__POISON_PILL__".to_string(),
        seeds,
        pop_timeout: Duration::from_millis(200),
    };
    let scheduler = Arc::new(Scheduler::new(
        opts,
        visited,
        matches,
        Arc::clone(&stats),
        parser,
        Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
        None,
    ));
    Harness {
        scheduler,
        fetcher,
        stats,
        results_path,
        stats_path,
        _dir: dir,
    }
}

#[tokio::test]
async fn single_seed_single_match() {
    let seed = page("");
    let pages = HashMap::from([(
        seed.clone(),
        "<html><body><p>Pale Face</p></body></html>".to_string(),
    )]);
    let h = harness(
        pages,
        "pale face\n",
        vec![seed.clone()],
        2,
        3,
        Duration::ZERO,
    );

    Arc::clone(&h.scheduler).run().await.unwrap();

    assert_eq!(h.stats.get("processed_urls").await, 1);
    assert_eq!(h.stats.get("match_count").await, 1);

    let raw = std::fs::read_to_string(&h.results_path).unwrap();
    let results: HashMap<String, Vec<serde_json::Value>> = serde_json::from_str(&raw).unwrap();
    assert_eq!(results.len(), 1);
    let records = &results[&seed];
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["value"], "Pale Face");
    assert_eq!(records[0]["type"], "text");
}

#[tokio::test]
async fn depth_cap_stops_the_chain() {
    let seed = page("");
    let a = page("/a");
    let b = page("/b");
    let pages = HashMap::from([
        (seed.clone(), format!(r#"<a href="{a}">a</a>"#)),
        (a.clone(), format!(r#"<a href="{b}">b</a>"#)),
        (b.clone(), "<p>should never be fetched</p>".to_string()),
    ]);
    let h = harness(pages, "unused\n", vec![seed.clone()], 2, 1, Duration::ZERO);

    Arc::clone(&h.scheduler).run().await.unwrap();

    let hits = h.fetcher.hits();
    assert!(hits.contains(&seed));
    assert!(hits.contains(&a));
    assert!(!hits.contains(&b), "depth 2 must never be enqueued");
    assert_eq!(h.stats.get("processed_urls").await, 2);
}

#[tokio::test]
async fn concurrent_discoveries_of_one_url_are_deduped() {
    let shared = page("/shared");
    let mut pages = HashMap::from([(shared.clone(), "<p>leaf</p>".to_string())]);
    let mut seeds = Vec::new();
    for i in 0..10 {
        let seed = page(&format!("/seed{i}"));
        pages.insert(seed.clone(), format!(r#"<a href="{shared}">s</a>"#));
        seeds.push(seed);
    }
    let h = harness(pages, "unused\n", seeds, 10, 3, Duration::ZERO);

    Arc::clone(&h.scheduler).run().await.unwrap();

    let shared_fetches = h
        .fetcher
        .hits()
        .iter()
        .filter(|u| **u == shared)
        .count();
    assert_eq!(shared_fetches, 1, "visited set must admit the URL once");
    assert_eq!(h.stats.get("processed_urls").await, 11);
}

#[tokio::test]
async fn matched_pages_promote_their_children() {
    // One worker makes dequeue order observable: the matched page's child
    // (priority 0) overtakes the unmatched page's child (priority 1).
    let plain = page("/plain");
    let spooky = page("/spooky");
    let plain_child = page("/plain/child");
    let spooky_child = page("/spooky/child");
    let pages = HashMap::from([
        (plain.clone(), format!(r#"<a href="{plain_child}">c</a>"#)),
        (
            spooky.clone(),
            format!(r#"<p>ghostly smile</p><a href="{spooky_child}">c</a>"#),
        ),
        (plain_child.clone(), "<p>leaf</p>".to_string()),
        (spooky_child.clone(), "<p>leaf</p>".to_string()),
    ]);
    // The small delay lets both seeds land before the first page finishes.
    let h = harness(
        pages,
        "ghostly smile\n",
        vec![plain.clone(), spooky.clone()],
        1,
        3,
        Duration::from_millis(20),
    );

    Arc::clone(&h.scheduler).run().await.unwrap();

    let hits = h.fetcher.hits();
    assert_eq!(hits[0], plain);
    assert_eq!(hits[1], spooky);
    assert_eq!(hits[2], spooky_child, "boosted child should run first");
    assert_eq!(hits[3], plain_child);
}

#[tokio::test]
async fn shutdown_mid_run_persists_consistent_state() {
    let mut pages = HashMap::new();
    let mut seeds = Vec::new();
    for i in 0..40 {
        let seed = page(&format!("/s{i}"));
        pages.insert(seed.clone(), "<p>pale face</p>".to_string());
        seeds.push(seed);
    }
    let h = harness(
        pages,
        "pale face\n",
        seeds,
        2,
        3,
        Duration::from_millis(30),
    );

    let run = tokio::spawn(Arc::clone(&h.scheduler).run());
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.scheduler.shutdown().await;
    run.await.unwrap().unwrap();

    let processed = h.stats.get("processed_urls").await;
    assert!(processed >= 1, "some URLs were processed before the signal");
    assert!(
        processed < 40,
        "shutdown should preempt the rest of the queue"
    );

    // Both documents exist and decode, reflecting at least the processed URLs.
    let results: HashMap<String, Vec<serde_json::Value>> =
        serde_json::from_str(&std::fs::read_to_string(&h.results_path).unwrap()).unwrap();
    assert_eq!(results.len() as u64, processed);
    let stats: HashMap<String, u64> =
        serde_json::from_str(&std::fs::read_to_string(&h.stats_path).unwrap()).unwrap();
    assert_eq!(stats["processed_urls"], processed);
    assert_eq!(stats["match_count"], processed);
}

#[tokio::test]
async fn second_shutdown_is_a_no_op() {
    let seed = page("");
    let pages = HashMap::from([(seed.clone(), "<p>x</p>".to_string())]);
    let h = harness(pages, "unused\n", vec![seed], 2, 3, Duration::ZERO);

    Arc::clone(&h.scheduler).run().await.unwrap();
    // run() already shut down; both of these must return immediately.
    h.scheduler.shutdown().await;
    h.scheduler.shutdown().await;
    assert!(!h.scheduler.is_running());
}

#[tokio::test]
async fn enqueue_rejects_beyond_depth_and_duplicates() {
    let h = harness(HashMap::new(), "unused\n", vec![], 1, 2, Duration::ZERO);
    let url = page("/x");

    assert!(h.scheduler.enqueue(&url, 0, 0).await);
    assert!(!h.scheduler.enqueue(&url, 0, 0).await, "duplicate");
    assert!(
        !h.scheduler.enqueue(&page("/y"), 3, 3).await,
        "beyond max_depth"
    );
    assert!(!h.scheduler.enqueue("not a url", 0, 0).await);

    h.scheduler.shutdown().await;
}
