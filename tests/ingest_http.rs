// tests/ingest_http.rs
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use news_ingest::config::FetchSettings;
use news_ingest::error::SourceFetchError;
use news_ingest::ingest::fetch::HttpFetcher;
use news_ingest::ingest::providers::provider_for;
use news_ingest::ingest::{fetch_sources, FetchJob};
use news_ingest::strategy::{JsonMapping, SourceKind, SourceSpec};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TECH_XML: &str = include_str!("fixtures/tech_feed.xml");
const HOT_JSON: &str = include_str!("fixtures/hot_list.json");

fn fetcher(max_body_bytes: u64) -> HttpFetcher {
    HttpFetcher::new(&FetchSettings {
        timeout: Duration::from_secs(5),
        max_body_bytes,
        ..FetchSettings::default()
    })
    .unwrap()
}

#[tokio::test]
async fn fetches_text_with_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header_exists("user-agent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml; charset=utf-8")
                .set_body_string(TECH_XML),
        )
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(1 << 20)
        .get_text(&format!("{}/feed.xml", server.uri()))
        .await
        .unwrap();
    assert!(body.contains("io_uring"));
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetcher(1 << 20)
        .get_text(&format!("{}/gone", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceFetchError::Status(404)), "{err}");
}

#[tokio::test]
async fn binary_content_types_are_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .mount(&server)
        .await;

    let err = fetcher(1 << 20)
        .get_text(&format!("{}/logo.png", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceFetchError::ContentType(ct) if ct == "image/png"));
}

#[tokio::test]
async fn oversized_bodies_are_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string("x".repeat(4096)),
        )
        .mount(&server)
        .await;

    let err = fetcher(1024)
        .get_text(&format!("{}/big.xml", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceFetchError::TooLarge { limit: 1024 }), "{err}");
}

/// Serves one chunked response that never ends, and no Content-Length.
async fn endless_chunked_server() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut req = [0u8; 1024];
        let _ = socket.read(&mut req).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-type: application/rss+xml\r\ntransfer-encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = format!("200\r\n{}\r\n", "x".repeat(0x200));
        while socket.write_all(chunk.as_bytes()).await.is_ok() {}
    });
    format!("http://{addr}/stream.xml")
}

#[tokio::test]
async fn chunked_bodies_are_cut_off_at_the_limit() {
    let url = endless_chunked_server().await;
    let err = tokio::time::timeout(Duration::from_secs(3), fetcher(4096).get_text(&url))
        .await
        .expect("gave up reading at the limit")
        .unwrap_err();
    assert!(matches!(err, SourceFetchError::TooLarge { limit: 4096 }), "{err}");
}

#[tokio::test]
async fn providers_over_http_keep_going_past_a_broken_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(TECH_XML),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hot"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(HOT_JSON),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body>maintenance</body></html>"),
        )
        .mount(&server)
        .await;

    let http = Arc::new(fetcher(1 << 20));
    let specs = [
        ("Tech/feed", "/feed.xml", SourceKind::Feed),
        ("Hot/board", "/hot", SourceKind::Json(JsonMapping::default())),
        ("Tech/broken", "/broken", SourceKind::Feed),
    ];
    let jobs = specs
        .into_iter()
        .map(|(id, route, kind)| FetchJob {
            category: id.split('/').next().unwrap_or_default().to_string(),
            provider: provider_for(
                &SourceSpec {
                    source_id: id.to_string(),
                    url: format!("{}{route}", server.uri()),
                    kind,
                },
                http.clone(),
            ),
        })
        .collect();

    let mut outcomes: Vec<_> = fetch_sources(jobs, 2, Duration::from_secs(5))
        .collect()
        .await;
    outcomes.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].source_id, "Hot/board");
    assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 3);
    assert_eq!(outcomes[1].source_id, "Tech/broken");
    assert!(matches!(
        outcomes[1].result,
        Err(SourceFetchError::Parse(_))
    ));
    assert_eq!(outcomes[2].result.as_ref().unwrap().len(), 4);
}
