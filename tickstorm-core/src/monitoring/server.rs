//! Prometheus scrape endpoint for the stream metrics
//!
//! `/metrics` serves the text exposition format, `/health` answers liveness checks.

use super::metrics::StreamMetrics;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Bind address, e.g. "0.0.0.0:9100"
    pub listen_addr: SocketAddr,
    /// Scrape path, "/metrics" unless overridden
    pub metrics_path: String,
}

impl MetricsServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            metrics_path: "/metrics".to_string(),
        }
    }

    /// Parse a `host:port` string
    pub fn from_addr(addr: &str) -> Result<Self> {
        let listen_addr = addr
            .parse()
            .with_context(|| format!("Invalid metrics address {}", addr))?;
        Ok(Self::new(listen_addr))
    }
}

pub struct MetricsServer {
    config: MetricsServerConfig,
    metrics: Arc<StreamMetrics>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, metrics: Arc<StreamMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Serve until the task is dropped
    ///
    /// Spawn this on a tokio runtime.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind metrics exporter on {}", self.config.listen_addr))?;

        info!(
            "Stream metrics exported on http://{}{}",
            self.config.listen_addr, self.config.metrics_path
        );

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Metrics exporter accept failed: {}", e);
                    continue;
                }
            };

            let metrics = Arc::clone(&self.metrics);
            let metrics_path = self.config.metrics_path.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let response = route(req.uri().path(), &metrics, &metrics_path);
                    async move { Ok::<_, hyper::Error>(response) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %remote_addr, "metrics connection closed with error: {}", err);
                }
            });
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn route(path: &str, metrics: &StreamMetrics, metrics_path: &str) -> Response<Full<Bytes>> {
    debug!("Metrics request: {}", path);

    if path == "/health" || path == "/healthz" {
        return text_response(StatusCode::OK, "OK");
    }

    if path == metrics_path {
        return match encode_metrics(metrics) {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
                response
            }
            Err(e) => {
                error!("Metrics encoding failed: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
            }
        };
    }

    if path == "/" {
        let help = format!(
            "tickstorm stream metrics\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Health check\n",
            metrics_path
        );
        return text_response(StatusCode::OK, help);
    }

    warn!(path, "unknown exporter path");
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Gather every registered family into the text exposition format
pub fn encode_metrics(metrics: &StreamMetrics) -> Result<String> {
    let encoder = TextEncoder::new();
    let families = metrics.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .context("Failed to encode metric families")?;

    String::from_utf8(buffer).context("Metric exposition was not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_addr() {
        let config = MetricsServerConfig::from_addr("127.0.0.1:9100").unwrap();
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.listen_addr.port(), 9100);
        assert!(MetricsServerConfig::from_addr("not-an-addr").is_err());
    }

    #[test]
    fn test_routes() {
        let metrics = StreamMetrics::new().unwrap();
        metrics.ticks_total.inc();

        assert_eq!(route("/health", &metrics, "/metrics").status(), StatusCode::OK);
        assert_eq!(route("/nope", &metrics, "/metrics").status(), StatusCode::NOT_FOUND);

        let ok = route("/metrics", &metrics, "/metrics");
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(
            ok.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }

    #[test]
    fn test_encode_metrics() {
        let metrics = StreamMetrics::new().unwrap();
        metrics.record_orders("processed", 5);
        let encoded = encode_metrics(&metrics).unwrap();
        assert!(encoded.contains("tickstorm_orders_total"));
        assert!(encoded.contains("TYPE"));
    }

    #[tokio::test]
    async fn test_serve_binds_and_answers() {
        let metrics = Arc::new(StreamMetrics::new().unwrap());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = MetricsServer::new(MetricsServerConfig::new(addr), metrics);
        let handle = tokio::spawn(server.serve());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"));
        assert!(reply.ends_with("OK"));
        handle.abort();
    }
}
