use std::io::Write;
use std::time::Instant;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wayscan_cdx::{CdxClient, CdxSeeder};
use wayscan_core::config::CdxConfig;
use wayscan_core::CrawlError;
use wayscan_storage::{Stats, VisitedSet};

fn config(server: &MockServer, max_pages: u32) -> CdxConfig {
    CdxConfig {
        request_timeout: 5,
        max_pages,
        backoff_factor: 1.0,
        target_domains_file: String::new(),
        page_size: 5000,
        from: "20040101000000".to_string(),
        to: "20041231235959".to_string(),
        archive_host: server.uri(),
    }
}

fn rows_body(rows: &[(&str, &str)]) -> String {
    let mut body = vec![vec![
        "timestamp".to_string(),
        "original".to_string(),
        "statuscode".to_string(),
        "mimetype".to_string(),
    ]];
    for (timestamp, original) in rows {
        body.push(vec![
            timestamp.to_string(),
            original.to_string(),
            "200".to_string(),
            "text/html".to_string(),
        ]);
    }
    serde_json::to_string(&body).unwrap()
}

#[tokio::test]
async fn rate_limited_twice_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rows_body(&[
            ("20040212000000", "http://example.jp/"),
            ("20040310000000", "http://example.jp/page"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxClient::new(&config(&server, 100), 3).unwrap();
    let started = Instant::now();
    let urls = client
        .fetch_snapshots("example.jp", "20040101000000", "20041231235959")
        .await
        .unwrap();

    assert_eq!(urls.len(), 2);
    assert!(urls[0].ends_with("/web/20040212000000id_/http://example.jp/"));
    assert!(urls[1].ends_with("/web/20040310000000id_/http://example.jp/page"));
    // Two honored Retry-After sleeps of one second each.
    assert!(started.elapsed().as_secs_f64() >= 2.0);
}

#[tokio::test]
async fn malformed_payload_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_string("snapshot data unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxClient::new(&config(&server, 100), 3).unwrap();
    let result = client
        .fetch_snapshots("example.jp", "20040101000000", "20041231235959")
        .await;
    assert!(matches!(result, Err(CrawlError::MalformedCdx(_))));
    // expect(1) on the mock verifies the single attempt on drop.
}

#[tokio::test]
async fn server_errors_are_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = CdxClient::new(&config(&server, 100), 2).unwrap();
    let result = client
        .fetch_snapshots("example.jp", "20040101000000", "20041231235959")
        .await;
    assert!(matches!(result, Err(CrawlError::Status(503))));
}

#[tokio::test]
async fn resume_key_pagination_unions_and_dedups() {
    let server = MockServer::start().await;
    // First request carries no resumeKey; this mock expires after one hit.
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Resume-Key", "tok123")
                .set_body_string(rows_body(&[
                    ("20040101000000", "http://example.jp/a"),
                    ("20040102000000", "http://example.jp/b"),
                ])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("resumeKey", "tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rows_body(&[
            ("20040102000000", "http://example.jp/b"),
            ("20040103000000", "http://example.jp/c"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxClient::new(&config(&server, 100), 0).unwrap();
    let urls = client
        .fetch_snapshots("example.jp", "20040101000000", "20041231235959")
        .await
        .unwrap();

    let suffixes: Vec<&str> = urls
        .iter()
        .map(|u| u.rsplit("id_/").next().unwrap())
        .collect();
    assert_eq!(
        suffixes,
        vec![
            "http://example.jp/a",
            "http://example.jp/b",
            "http://example.jp/c"
        ]
    );
}

#[tokio::test]
async fn page_cap_stops_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Resume-Key", "more")
                .set_body_string(rows_body(&[("20040101000000", "http://example.jp/a")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxClient::new(&config(&server, 1), 0).unwrap();
    let urls = client
        .fetch_snapshots("example.jp", "20040101000000", "20041231235959")
        .await
        .unwrap();
    assert_eq!(urls.len(), 1);
}

#[tokio::test]
async fn seeder_demotes_failing_domains_and_keeps_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("url", "bad.example/*"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("url", "good.example/*"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rows_body(&[
            ("20040101000000", "http://good.example/"),
            ("20040201000000", "http://good.example/two"),
        ])))
        .mount(&server)
        .await;

    let mut domains_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(domains_file, "bad.example\ngood.example").unwrap();

    let mut cfg = config(&server, 100);
    cfg.target_domains_file = domains_file.path().to_string_lossy().into_owned();
    let seeder = CdxSeeder::new(&cfg, 0).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let visited = VisitedSet::new(1000, 0.001, dir.path().join("bloom_state.json"));
    let stats = Stats::new(dir.path().join("stats.json"));

    let seeds = seeder.collect_seeds(&visited, &stats).await;
    assert_eq!(seeds.len(), 2);
    assert!(seeds.iter().all(|u| u.contains("good.example")));
    assert_eq!(stats.get_failed_domains().await, vec!["bad.example"]);
    assert_eq!(stats.total_snapshots().await, (2, 2));
}

#[tokio::test]
async fn seeder_filters_already_visited_snapshots() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rows_body(&[
            ("20040101000000", "http://example.jp/seen"),
            ("20040102000000", "http://example.jp/new"),
        ])))
        .mount(&server)
        .await;

    let mut domains_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(domains_file, "example.jp").unwrap();
    let mut cfg = config(&server, 100);
    cfg.target_domains_file = domains_file.path().to_string_lossy().into_owned();
    let seeder = CdxSeeder::new(&cfg, 0).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let visited = VisitedSet::new(1000, 0.001, dir.path().join("bloom_state.json"));
    let stats = Stats::new(dir.path().join("stats.json"));

    let seen = format!(
        "{}/web/20040101000000id_/http://example.jp/seen",
        server.uri()
    );
    visited
        .insert(&wayscan_core::urls::normalize(&seen).unwrap())
        .await;

    let seeds = seeder.collect_seeds(&visited, &stats).await;
    assert_eq!(seeds.len(), 1);
    assert!(seeds[0].ends_with("/http://example.jp/new"));
    assert_eq!(stats.total_snapshots().await, (2, 1));
}
