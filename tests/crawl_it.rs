use std::sync::Arc;
use std::time::Duration;

use product_crawler::config::CrawlSettings;
use product_crawler::crawler::Crawler;
use product_crawler::db::{self, queue, records};
use product_crawler::fetch::{Exhaustion, FetchOutcome, HttpProductClient, ProductSource};
use product_crawler::model::{Destination, QueueStatus};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_pool(dir: &TempDir) -> sqlx::SqlitePool {
    let url = format!("sqlite://{}/crawler.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn fast_settings() -> CrawlSettings {
    CrawlSettings {
        batch_size: 5000,
        concurrency: 8,
        retries: 5,
        request_timeout: Duration::from_secs(5),
        backoff_unit: Duration::from_millis(5),
    }
}

fn client(server: &MockServer, settings: &CrawlSettings) -> HttpProductClient {
    let base = format!("{}/products", server.uri());
    HttpProductClient::new(&base, "crawler-test", settings).unwrap()
}

fn product_body(name: &str) -> serde_json::Value {
    json!({
        "id": 0,
        "name": name,
        "url_key": format!("{}-key", name.to_lowercase()),
        "price": 199000,
        "description": "<p>Sturdy and <b>cheap</b></p>",
        "images": [{ "base_url": format!("https://cdn.local/{}.jpg", name.to_lowercase()) }]
    })
}

async fn mount_product(server: &MockServer, id: i64, name: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/products/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_body(name)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn status_of(pool: &sqlx::SqlitePool, id: i64) -> QueueStatus {
    queue::get_item(pool, id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn not_found_is_recorded_and_never_retried_within_a_run() {
    let server = MockServer::start().await;
    mount_product(&server, 1, "Lamp", 1).await;
    mount_product(&server, 3, "Desk", 1).await;
    Mock::given(method("GET"))
        .and(path("/products/2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = setup_pool(&dir).await;
    let settings = fast_settings();
    let crawler = Crawler::new(pool.clone(), Arc::new(client(&server, &settings)), settings);

    let summary = crawler.run(&[1, 2, 3]).await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.batches.len(), 1);

    assert_eq!(status_of(&pool, 1).await, QueueStatus::Done);
    assert_eq!(status_of(&pool, 2).await, QueueStatus::Error);
    assert_eq!(status_of(&pool, 3).await, QueueStatus::Done);

    assert_eq!(records::count(&pool, Destination::Errors).await.unwrap(), 1);
    let failed = records::get_record(&pool, 2, Destination::Errors).await.unwrap().unwrap();
    assert_eq!(failed.missing_fields, "all_fields");
    let item = queue::get_item(&pool, 2).await.unwrap().unwrap();
    assert_eq!(item.last_error.as_deref(), Some("404 Not Found"));

    let lamp = records::get_record(&pool, 1, Destination::Products).await.unwrap().unwrap();
    assert_eq!(lamp.name.as_deref(), Some("lamp"));
    assert_eq!(lamp.description.as_deref(), Some("sturdy and cheap"));
    assert_eq!(lamp.image_url.as_deref(), Some("https://cdn.local/lamp.jpg"));
    assert_eq!(lamp.price, Some(199000.0));
    assert_eq!(lamp.missing_fields, "");
}

#[tokio::test]
async fn second_run_skips_done_and_retries_errors() {
    let server = MockServer::start().await;
    // each successful id is fetched exactly once across both runs
    mount_product(&server, 1, "Lamp", 1).await;
    mount_product(&server, 3, "Desk", 1).await;
    Mock::given(method("GET"))
        .and(path("/products/2"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = setup_pool(&dir).await;
    let settings = fast_settings();
    let crawler = Crawler::new(pool.clone(), Arc::new(client(&server, &settings)), settings);

    crawler.run(&[1, 2, 3]).await.unwrap();
    let second = crawler.run(&[1, 2, 3]).await.unwrap();

    assert_eq!(second.newly_queued, 0);
    assert_eq!(second.processed, 1);
    assert_eq!(second.failed, 1);
    assert_eq!(queue::select_outstanding(&pool).await.unwrap(), vec![2]);
    assert_eq!(records::count(&pool, Destination::Products).await.unwrap(), 2);
    assert_eq!(records::count(&pool, Destination::Errors).await.unwrap(), 1);
}

#[tokio::test]
async fn three_unavailable_responses_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/7"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    mount_product(&server, 7, "Kettle", 1).await;

    let settings = fast_settings();
    let fetched = client(&server, &settings).fetch(7).await;
    assert!(matches!(fetched.outcome, FetchOutcome::Success(_)));
    assert_eq!(fetched.attempts, 4);
    assert_eq!(fetched.backoffs, 3);
}

#[tokio::test]
async fn transient_failures_recover_through_the_crawler() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/7"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    mount_product(&server, 7, "Kettle", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let pool = setup_pool(&dir).await;
    let settings = fast_settings();
    let crawler = Crawler::new(pool.clone(), Arc::new(client(&server, &settings)), settings);

    let summary = crawler.run(&[7]).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(status_of(&pool, 7).await, QueueStatus::Done);
    assert_eq!(queue::get_item(&pool, 7).await.unwrap().unwrap().last_error, None);
    assert_eq!(records::count(&pool, Destination::Errors).await.unwrap(), 0);
}

#[tokio::test]
async fn retries_stop_at_the_configured_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/8"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let settings = CrawlSettings {
        retries: 3,
        ..fast_settings()
    };
    let fetched = client(&server, &settings).fetch(8).await;
    assert_eq!(
        fetched.outcome,
        FetchOutcome::Exhausted(Exhaustion::RetriesExhausted)
    );
    assert_eq!(fetched.attempts, 3);
    // no sleep after the final attempt
    assert_eq!(fetched.backoffs, 2);
}

#[tokio::test]
async fn unexpected_status_is_not_retried() {
    let server = MockServer::start().await;
    // one direct fetch plus one through the crawler
    Mock::given(method("GET"))
        .and(path("/products/9"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = setup_pool(&dir).await;
    let settings = fast_settings();
    let http = client(&server, &settings);

    let fetched = http.fetch(9).await;
    assert_eq!(
        fetched.outcome,
        FetchOutcome::Exhausted(Exhaustion::UnexpectedStatus(403))
    );
    assert_eq!(fetched.attempts, 1);
    assert_eq!(fetched.backoffs, 0);

    let crawler = Crawler::new(pool.clone(), Arc::new(http), settings);
    crawler.run(&[9]).await.unwrap();
    let item = queue::get_item(&pool, 9).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Error);
    assert_eq!(item.last_error.as_deref(), Some("Unexpected status 403"));
}

#[tokio::test]
async fn unreadable_body_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/4"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_product(&server, 4, "Chair", 1).await;

    let fetched = client(&server, &fast_settings()).fetch(4).await;
    assert!(matches!(fetched.outcome, FetchOutcome::Success(_)));
    assert_eq!(fetched.attempts, 2);
    assert_eq!(fetched.backoffs, 1);
}

#[tokio::test]
async fn timeouts_and_refused_connections_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/11"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
        .mount(&server)
        .await;

    let settings = CrawlSettings {
        retries: 2,
        request_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let fetched = client(&server, &settings).fetch(11).await;
    assert_eq!(
        fetched.outcome,
        FetchOutcome::Exhausted(Exhaustion::RetriesExhausted)
    );
    assert_eq!(fetched.attempts, 2);

    let refused = HttpProductClient::new("http://127.0.0.1:1/products", "crawler-test", &settings)
        .unwrap()
        .fetch(12)
        .await;
    assert_eq!(
        refused.outcome,
        FetchOutcome::Exhausted(Exhaustion::RetriesExhausted)
    );
    assert_eq!(refused.attempts, 2);
}

#[tokio::test]
async fn sends_configured_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/1"))
        .and(header("user-agent", "crawler-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(product_body("Lamp")))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = client(&server, &fast_settings()).fetch(1).await;
    assert!(matches!(fetched.outcome, FetchOutcome::Success(_)));
}

#[tokio::test]
async fn missing_images_still_succeeds_but_empty_payload_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Notebook",
            "url_key": "notebook",
            "price": 12000,
            "description": "A5 ruled",
            "images": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/products/6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": null,
            "images": []
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = setup_pool(&dir).await;
    let settings = fast_settings();
    let crawler = Crawler::new(pool.clone(), Arc::new(client(&server, &settings)), settings);
    crawler.run(&[5, 6]).await.unwrap();

    assert_eq!(status_of(&pool, 5).await, QueueStatus::Done);
    let notebook = records::get_record(&pool, 5, Destination::Products).await.unwrap().unwrap();
    assert_eq!(notebook.image_url, None);
    assert_eq!(notebook.missing_fields, "image_url");

    let empty = queue::get_item(&pool, 6).await.unwrap().unwrap();
    assert_eq!(empty.status, QueueStatus::Error);
    assert_eq!(empty.last_error.as_deref(), Some("Empty payload"));
    assert!(records::get_record(&pool, 6, Destination::Products).await.unwrap().is_none());
    assert!(records::get_record(&pool, 6, Destination::Errors).await.unwrap().is_some());
}

#[tokio::test]
async fn recovered_id_leaves_error_storage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/21"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pool = setup_pool(&dir).await;
    let settings = CrawlSettings {
        retries: 2,
        ..fast_settings()
    };
    let crawler = Crawler::new(pool.clone(), Arc::new(client(&server, &settings)), settings);

    crawler.run(&[21]).await.unwrap();
    let failed = queue::get_item(&pool, 21).await.unwrap().unwrap();
    assert_eq!(failed.status, QueueStatus::Error);
    assert_eq!(failed.last_error.as_deref(), Some("Failed after retries"));
    assert_eq!(records::count(&pool, Destination::Errors).await.unwrap(), 1);

    server.reset().await;
    mount_product(&server, 21, "Shelf", 1).await;
    let summary = crawler.run(&[]).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);

    let item = queue::get_item(&pool, 21).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Done);
    assert_eq!(item.last_error, None);
    assert_eq!(records::count(&pool, Destination::Errors).await.unwrap(), 0);
    assert_eq!(records::count(&pool, Destination::Products).await.unwrap(), 1);
}
