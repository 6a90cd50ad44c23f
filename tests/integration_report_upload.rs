use anyhow::Result;
use api_loadgen::{
    client::{ApiClient, HttpApiClient},
    controller::ShutdownSummary,
    error::LoadError,
    operation::OperationKind,
    payload::{PayloadSource, SensorPayloadGenerator},
    results::{FinalReport, ResultsManager, RunContext},
    CallError, LoadMode, MetricsAggregator,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One HTTP/1.1 request as seen on the wire.
struct CapturedRequest {
    head: String,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with(&prefix))
            .map(|line| line[prefix.len()..].trim().to_string())
    }

    fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }
}

async fn read_request(stream: &mut TcpStream) -> Result<CapturedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed before headers were complete");
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8(buffer[..head_end].to_vec())?;
    let mut request = CapturedRequest {
        head,
        body: buffer[head_end..].to_vec(),
    };
    let length: usize = request
        .header("content-length")
        .map(|value| value.parse())
        .transpose()?
        .unwrap_or(0);

    while request.body.len() < length {
        let n = stream.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed before body was complete");
        request.body.extend_from_slice(&chunk[..n]);
    }
    Ok(request)
}

/// Accept one connection, capture its request and answer with `status`.
async fn serve_once(status: u16) -> Result<(String, JoinHandle<Result<CapturedRequest>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        let request = read_request(&mut stream).await?;
        let response = format!(
            "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(request)
    });

    Ok((url, handle))
}

async fn sample_report() -> FinalReport {
    let metrics = MetricsAggregator::start(64, Duration::from_secs(1));
    metrics.push_sent(OperationKind::ReadWrite);
    metrics.push_completed(OperationKind::ReadWrite, Duration::from_millis(12), 3, true);
    metrics.shutdown().await;
    metrics.final_report(RunContext {
        run_id: "upload-test".to_string(),
        mode: LoadMode::Concurrency,
        target: 4,
        server_url: "http://fake".to_string(),
        controller: ShutdownSummary::default(),
    })
}

/// The report is posted as JSON with the key in both identifying headers.
#[tokio::test]
async fn upload_posts_report_with_team_headers() -> Result<()> {
    let (url, server) = serve_once(200).await?;
    let manager = ResultsManager::new(sample_report().await);

    manager.upload(&format!("{}/report", url), "team-42").await?;

    let request = server.await??;
    assert_eq!(request.request_line(), "POST /report HTTP/1.1");
    assert_eq!(
        request.header("content-type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(request.header("x-team-id").as_deref(), Some("team-42"));
    assert_eq!(request.header("x-team-name").as_deref(), Some("team-42"));

    let uploaded: FinalReport = serde_json::from_slice(&request.body)?;
    assert_eq!(uploaded.metadata.run_id, "upload-test");
    assert_eq!(uploaded.total_completed, 1);
    assert_eq!(uploaded.high_priority_count, 1);
    Ok(())
}

#[tokio::test]
async fn upload_rejects_non_ok_status() -> Result<()> {
    let (url, server) = serve_once(201).await?;
    let manager = ResultsManager::new(sample_report().await);

    let result = manager.upload(&url, "team-42").await;
    assert!(matches!(result, Err(LoadError::Upload(_))), "{:?}", result);

    server.await??;
    Ok(())
}

/// The HTTP client posts to the per-operation endpoint and reports the status.
#[tokio::test]
async fn http_client_maps_statuses() -> Result<()> {
    let payloads = SensorPayloadGenerator::new(10, 8, 8, 2);

    let (url, server) = serve_once(204).await?;
    let client = HttpApiClient::new(&url, Duration::from_secs(5))?;
    let response = client
        .call(OperationKind::BatchReadWrite, &payloads.generate(OperationKind::BatchReadWrite))
        .await?;
    assert!(response.is_success());

    let request = server.await??;
    assert_eq!(request.request_line(), "POST /api/batch-sensor-rw HTTP/1.1");
    let body: serde_json::Value = serde_json::from_slice(&request.body)?;
    assert_eq!(body["requests"].as_array().map(Vec::len), Some(2));

    let (url, server) = serve_once(503).await?;
    let client = HttpApiClient::new(&url, Duration::from_secs(5))?;
    let response = client
        .call(OperationKind::Query, &payloads.generate(OperationKind::Query))
        .await?;
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    server.await??;

    Ok(())
}

/// A server that accepts but never answers trips the request timeout.
#[tokio::test]
async fn http_client_timeout_is_transport_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
        anyhow::Ok(())
    });

    let payloads = SensorPayloadGenerator::new(10, 8, 8, 2);
    let client = HttpApiClient::new(&url, Duration::from_millis(200))?;
    let result = client
        .call(OperationKind::SensorUpload, &payloads.generate(OperationKind::SensorUpload))
        .await;
    assert!(matches!(result, Err(CallError::Transport(_))), "{:?}", result);

    server.abort();
    Ok(())
}
