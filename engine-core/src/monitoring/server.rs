//! HTTP server exposing Prometheus metrics for scraping, plus a bare
//! health-check endpoint.

use super::EngineMetrics;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
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
    pub listen_addr: SocketAddr,
    pub metrics_path: String,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self { listen_addr: "127.0.0.1:9090".parse().unwrap(), metrics_path: "/metrics".to_string() }
    }
}

pub struct MetricsServer {
    config: MetricsServerConfig,
    metrics: Arc<EngineMetrics>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Runs indefinitely; spawn in its own task.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await.context("failed to bind metrics server")?;
        info!("metrics server listening on http://{}{}", self.config.listen_addr, self.config.metrics_path);

        let metrics = self.metrics.clone();
        let metrics_path = self.config.metrics_path.clone();

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let metrics = metrics.clone();
            let metrics_path = metrics_path.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = metrics.clone();
                    let metrics_path = metrics_path.clone();
                    async move { handle_request(req, metrics, metrics_path).await }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }

    #[allow(dead_code)]
    pub fn serve_metrics_once(&self) -> Result<String> {
        encode_metrics(&self.metrics)
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<EngineMetrics>,
    metrics_path: String,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    debug!("metrics request: {} {}", req.method(), path);

    if path == "/health" || path == "/healthz" {
        return Ok(Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("OK"))).unwrap());
    }

    if path == metrics_path {
        return match encode_metrics(&metrics) {
            Ok(text) => Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(text)))
                .unwrap()),
            Err(e) => {
                error!("failed to encode metrics: {}", e);
                Ok(Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Full::new(Bytes::from(format!("error: {e}")))).unwrap())
            }
        };
    }

    if path == "/" {
        let help_text = format!("Execution engine metrics\n\nEndpoints:\n  {metrics_path} - Prometheus metrics\n  /health - Health check\n");
        return Ok(Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from(help_text))).unwrap());
    }

    warn!("unknown metrics endpoint requested: {}", path);
    Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Full::new(Bytes::from("Not Found"))).unwrap())
}

fn encode_metrics(metrics: &EngineMetrics) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).context("failed to encode metrics")?;
    String::from_utf8(buffer).context("invalid UTF-8 in metrics")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_to_9090_and_metrics_path() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.listen_addr.port(), 9090);
    }

    #[test]
    fn serve_metrics_once_encodes_recorded_values() {
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let server = MetricsServer::new(MetricsServerConfig::default(), metrics.clone());

        metrics.trading().orders_total.with_label_values(&["BTCUSDT", "buy", "limit"]).inc();
        metrics.risk().margin_usage_ratio.set(0.3);

        let text = server.serve_metrics_once().unwrap();
        assert!(text.contains("engine_orders_total"));
        assert!(text.contains("engine_risk_margin_usage_ratio"));
        assert!(text.contains("TYPE"));
        assert!(text.contains("HELP"));
    }

    #[test]
    fn encode_metrics_reflects_recorded_volume() {
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        metrics.trading().volume_usd_total.inc_by(12_345.67);

        let encoded = encode_metrics(&metrics).unwrap();
        assert!(encoded.contains("engine_volume_usd_total"));
    }
}
