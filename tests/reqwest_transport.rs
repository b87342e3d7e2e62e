use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, stream};
use picup::{
    ContextReceiver, DEFAULT_ERROR_MESSAGE, ERROR_SERVER, FilePart, Outcome, ProgressEvent,
    ReqwestTransport, Transport, TransportError, TransportRequest, Uploader, completion_fn,
};
use tempfile::tempdir;
use tokio::runtime::Handle;
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Run {
    outcome: Outcome,
    progress: Vec<ProgressEvent>,
}

async fn drain(context: &mut ContextReceiver, outcomes: &Arc<Mutex<Vec<Outcome>>>) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while outcomes.lock().unwrap().is_empty() {
            assert!(context.run_next().await);
        }
    })
    .await
    .expect("no outcome delivered");
}

async fn upload(url: Url, file: &Path) -> Run {
    let (sender, mut context) = picup::context();
    let uploader = Uploader::new(
        url,
        ReqwestTransport::new().unwrap(),
        sender,
        Handle::current(),
    );

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let progress = Arc::new(Mutex::new(Vec::new()));
    {
        let outcomes = outcomes.clone();
        uploader.set_completion_listener(completion_fn(move |outcome| {
            outcomes.lock().unwrap().push(outcome)
        }));
    }
    {
        let progress = progress.clone();
        uploader.set_progress_listener(move |event: &ProgressEvent| {
            progress.lock().unwrap().push(*event)
        });
    }

    uploader.upload_picture(file).unwrap();
    drain(&mut context, &outcomes).await;

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    let progress = progress.lock().unwrap().clone();
    Run {
        outcome: outcomes[0].clone(),
        progress,
    }
}

#[tokio::test]
async fn test_upload_success_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header_exists("content-type"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"code":0,"message":"ok","result":"https://x/y.png"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let file = dir.path().join("holiday.png");
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&file, &data).unwrap();

    let url = Url::parse(&format!("{}/upload", server.uri())).unwrap();
    let run = upload(url, &file).await;

    assert_eq!(run.outcome, Outcome::success("https://x/y.png"));
    assert!(run.progress.iter().all(|e| e.percent <= 99));
    assert!(run.progress.last().is_some_and(|e| e.done));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let content_type = request
        .headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart content type");

    let head = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"files\"; filename=\"holiday.png\"\r\n\
         Content-Type: image/png\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    assert!(request.body.starts_with(head.as_bytes()));
    assert!(request.body.ends_with(tail.as_bytes()));
    assert_eq!(&request.body[head.len()..request.body.len() - tail.len()], &data[..]);
}

#[tokio::test]
async fn test_upload_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let file = dir.path().join("a.png");
    std::fs::write(&file, b"png").unwrap();

    let url = Url::parse(&format!("{}/upload", server.uri())).unwrap();
    let run = upload(url, &file).await;

    assert_eq!(run.outcome, Outcome::failure(503, DEFAULT_ERROR_MESSAGE));
}

#[tokio::test]
async fn test_upload_reports_server_failure_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"code":500,"message":"bad file"}"#),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let file = dir.path().join("a.png");
    std::fs::write(&file, b"png").unwrap();

    let url = Url::parse(&format!("{}/upload", server.uri())).unwrap();
    let run = upload(url, &file).await;

    assert_eq!(run.outcome, Outcome::failure(500, "bad file"));
}

#[tokio::test]
async fn test_upload_reports_connection_failure() {
    // Bind and release a port so nothing is listening on it.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let dir = tempdir().unwrap();
    let file = dir.path().join("a.png");
    std::fs::write(&file, b"png").unwrap();

    let url = Url::parse(&format!("http://127.0.0.1:{port}/upload")).unwrap();
    let run = upload(url, &file).await;

    assert_eq!(run.outcome, Outcome::failure(ERROR_SERVER, ""));
}

fn text_part(chunks: &[&'static str]) -> FilePart {
    let content_length = chunks.iter().map(|c| c.len() as u64).sum();
    let chunks: Vec<io::Result<Bytes>> = chunks
        .iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    let body = Box::pin(stream::iter(chunks));
    FilePart::from_stream("notes.txt", "text/plain", content_length, body)
}

fn with_short_read_timeout() -> ReqwestTransport {
    ReqwestTransport::with_timeouts(
        Duration::from_secs(15),
        Duration::from_secs(1),
        Duration::from_secs(10),
    )
    .unwrap()
}

#[tokio::test]
async fn test_transport_sends_declared_length() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&server)
        .await;

    let request = TransportRequest {
        url: Url::parse(&server.uri()).unwrap(),
        field_name: "files",
        part: text_part(&["hello ", "world"]),
    };

    let response = ReqwestTransport::new()
        .unwrap()
        .execute(request)
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert!(response.is_success());
    assert_eq!(&response.body[..], b"created");

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let content_length: usize = request
        .headers
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(content_length, request.body.len());
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains(
        "filename=\"notes.txt\"\r\nContent-Type: text/plain\r\n\r\nhello world\r\n"
    ));
}

#[tokio::test]
async fn test_slow_steady_body_is_not_a_read_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let body = stream::iter(0..10).then(|_| async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok::<_, io::Error>(Bytes::from_static(b"0123456789"))
    });
    let request = TransportRequest {
        url: Url::parse(&server.uri()).unwrap(),
        field_name: "files",
        part: FilePart::from_stream("slow.png", "image/png", 100, Box::pin(body)),
    };

    let response = with_short_read_timeout().execute(request).await.unwrap();

    assert_eq!(response.status, 200);
    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(&"0123456789".repeat(10)));
}

#[tokio::test]
async fn test_late_response_is_a_read_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let request = TransportRequest {
        url: Url::parse(&server.uri()).unwrap(),
        field_name: "files",
        part: text_part(&["hello"]),
    };

    let result = with_short_read_timeout().execute(request).await;

    assert!(
        matches!(result, Err(TransportError::Timeout { phase: "reading" })),
        "{result:?}"
    );
}
