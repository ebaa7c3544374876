//! Health & Status API endpoints
//!
//! Provides HTTP endpoints for monitoring and status:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Uptime and relay progress

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics;

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: u64,
    client_last_block: u64,
    last_processed_block: u64,
}

fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// Build the response for the first line of an HTTP request
fn route(request: &str, started: Instant) -> Vec<u8> {
    if request.starts_with("GET /metrics") {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return http_response("500 Internal Server Error", "text/plain", b"");
        }
        http_response("200 OK", "text/plain; charset=utf-8", &buffer)
    } else if request.starts_with("GET /health") {
        http_response("200 OK", "text/plain", b"OK")
    } else if request.starts_with("GET /status") {
        let status = StatusResponse {
            status: "ok",
            uptime_seconds: started.elapsed().as_secs(),
            client_last_block: metrics::CLIENT_HEIGHT.get() as u64,
            last_processed_block: metrics::LAST_PROCESSED_BLOCK.get() as u64,
        };
        let body = serde_json::to_vec(&status).unwrap_or_else(|_| b"{}".to_vec());
        http_response("200 OK", "application/json", &body)
    } else {
        http_response("404 Not Found", "text/plain", b"")
    }
}

async fn serve_connection(mut socket: TcpStream, started: Instant) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let read = socket.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..read]);
    socket.write_all(&route(&request, started)).await
}

async fn handle(socket: TcpStream, started: Instant) {
    if let Err(e) = serve_connection(socket, started).await {
        warn!(error = %e, "API connection failed");
    }
}

/// Start the API server; returns when `shutdown` is cancelled
pub async fn start_api_server(addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    let started = Instant::now();
    metrics::UP.set(1.0);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, _) = accepted?;
                tokio::spawn(handle(socket, started));
            }
        }
    }

    metrics::UP.set(0.0);
    Ok(())
}
