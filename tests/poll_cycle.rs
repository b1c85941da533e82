//! End-to-end poll cycles against a mock tracker.
//!
//! Each test starts its own server (wiremock, or a raw TCP listener where a
//! connection has to be cut) and drives a real `HttpTransport`, the configured
//! extractor, and a `LineSink` writing into memory.

use std::time::Duration;
use torrent_feed::config::Config;
use torrent_feed::feed::{Extractor, HttpTransport};
use torrent_feed::poller::{CycleOutcome, PollError, PollState, Poller, RunExit};
use torrent_feed::sink::{EmitMode, LineSink};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type TestPoller = Poller<HttpTransport, LineSink<Vec<u8>>>;

fn row(id: u32, title: &str) -> String {
    format!(
        r#"<tr class="hl-tr">
  <td class="tLeft"><a class="tLink" href="viewtopic.php?t={id}">{title}</a></td>
  <td class="small"><a class="tr-dl" href="dl.php?t={id}">1.2 GB</a></td>
</tr>"#
    )
}

fn listing(rows: &[(u32, &str)]) -> String {
    let rows: String = rows.iter().map(|(id, title)| row(*id, title)).collect();
    format!("<html><body><table id=\"tor-tbl\">{rows}</table></body></html>")
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

fn config(server: &MockServer, extra: &str) -> Config {
    Config::from_json(&format!(
        r#"{{
            "cache_limit": 100,
            "parser": {{
                "url": "{}/tracker.php",
                "interval": 1,
                "timeout": 5,
                "cookies": {{ "bb_session": "s3cret" }}
                {extra}
            }}
        }}"#,
        server.uri()
    ))
    .unwrap()
}

fn poller(config: &Config, mode: EmitMode) -> TestPoller {
    let transport = HttpTransport::new(&config.parser).unwrap();
    let extractor = Extractor::new(&config.parser).unwrap();
    Poller::new(config, transport, extractor, LineSink::new(Vec::new(), mode))
}

async fn cycle(p: &mut TestPoller) {
    match p.fetch_and_extract().await {
        CycleOutcome::Items(items) => {
            p.process(items).await.unwrap();
        }
        CycleOutcome::Empty => {}
        CycleOutcome::Fatal(e) => panic!("unexpected fatal error: {e}"),
    }
}

fn output(p: TestPoller) -> String {
    String::from_utf8(p.into_sink().into_inner()).unwrap()
}

#[tokio::test]
async fn test_new_rows_emitted_after_seed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tracker.php"))
        .and(header("cookie", "bb_session=s3cret"))
        .respond_with(html(listing(&[(2, "Old Two"), (1, "Old One")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tracker.php"))
        .respond_with(html(listing(&[(3, "New Three"), (2, "Old Two"), (1, "Old One")])))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let mut p = poller(&config, EmitMode::TitleAndUrl);

    cycle(&mut p).await;
    assert_eq!(p.state(), PollState::Polling);
    cycle(&mut p).await;
    cycle(&mut p).await;

    let expected = format!("New Three\n{}/dl.php?t=3\n", server.uri());
    assert_eq!(output(p), expected);
}

#[tokio::test]
async fn test_title_only_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(listing(&[(1, "One")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html(listing(&[(2, "Two"), (1, "One")])))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let mut p = poller(&config, EmitMode::TitleOnly);
    cycle(&mut p).await;
    cycle(&mut p).await;

    assert_eq!(output(p), "Two\n");
}

#[tokio::test]
async fn test_rejected_session_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let mut p = poller(&config, EmitMode::TitleAndUrl);
    let result = p.run(std::future::pending::<()>()).await;
    assert!(matches!(result, Err(PollError::Auth(_))));
}

#[tokio::test]
async fn test_login_redirect_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login.php"))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let p = poller(&config, EmitMode::TitleAndUrl);
    assert!(matches!(
        p.fetch_and_extract().await,
        CycleOutcome::Fatal(PollError::Auth(_))
    ));
}

#[tokio::test]
async fn test_login_page_without_rows_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<html><form id=\"login\"></form></html>".to_string()))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let p = poller(&config, EmitMode::TitleAndUrl);
    assert!(matches!(
        p.fetch_and_extract().await,
        CycleOutcome::Fatal(PollError::Auth(_))
    ));
}

#[tokio::test]
async fn test_server_error_after_seed_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(listing(&[(1, "One")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html(listing(&[(2, "Two"), (1, "One")])))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let mut p = poller(&config, EmitMode::TitleOnly);
    cycle(&mut p).await;
    assert!(matches!(p.fetch_and_extract().await, CycleOutcome::Empty));
    cycle(&mut p).await;

    assert_eq!(output(p), "Two\n");
}

#[tokio::test]
async fn test_rss_feed_end_to_end() {
    let server = MockServer::start().await;
    let feed = |items: &[&str]| {
        let items: String = items
            .iter()
            .map(|id| {
                format!(
                    r#"<item><guid>{id}</guid><title>Release {id}</title>
<enclosure url="http://t.example/dl/{id}.torrent" type="application/x-bittorrent" length="1"/></item>"#
                )
            })
            .collect();
        ResponseTemplate::new(200).set_body_raw(
            format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>{items}</channel></rss>"#),
            "application/rss+xml",
        )
    };
    Mock::given(method("GET"))
        .respond_with(feed(&["a"]))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(feed(&["b", "a"]))
        .mount(&server)
        .await;

    let config = config(&server, r#", "format": "rss""#);
    let mut p = poller(&config, EmitMode::TitleAndUrl);
    cycle(&mut p).await;
    cycle(&mut p).await;

    assert_eq!(output(p), "Release b\nhttp://t.example/dl/b.torrent\n");
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(listing(&[(1, "One")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html(listing(&[(2, "Two"), (1, "One")])))
        .mount(&server)
        .await;

    let config = config(&server, "");
    let mut p = poller(&config, EmitMode::TitleOnly);

    // Seed at t=0, poll at t=1s, stop during the following sleep.
    let exit = p
        .run(tokio::time::sleep(Duration::from_millis(1500)))
        .await
        .unwrap();

    assert_eq!(exit, RunExit::Interrupted);
    assert_eq!(p.state(), PollState::ShuttingDown);
    assert_eq!(output(p), "Two\n");
}

/// Serves one scripted reply per connection; `None` drops the connection
/// after reading the request.
async fn raw_server(replies: Vec<Option<String>>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for reply in replies {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            if let Some(body) = reply {
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_dropped_connection_while_polling_is_skipped() {
    let uri = raw_server(vec![
        Some(listing(&[(1, "One")])),
        None,
        Some(listing(&[(2, "Two"), (1, "One")])),
    ])
    .await;

    let config = Config::from_json(&format!(
        r#"{{ "cache_limit": 10, "parser": {{ "url": "{uri}/tracker.php", "timeout": 5 }} }}"#
    ))
    .unwrap();
    let mut p = poller(&config, EmitMode::TitleOnly);

    cycle(&mut p).await;
    assert!(matches!(p.fetch_and_extract().await, CycleOutcome::Empty));
    assert_eq!(p.state(), PollState::Polling);
    cycle(&mut p).await;

    assert_eq!(output(p), "Two\n");
}
