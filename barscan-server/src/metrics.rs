//! Prometheus metrics: HTTP request accounting middleware and RAM gauges

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Namespace shared by every exported metric
pub const METRIC_NAMESPACE: &str = "barcode_recognizer";

/// Response extension naming the error that produced the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionType(pub String);

/// Metric handles plus the registry that owns them
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    responses: IntCounterVec,
    in_progress: IntGaugeVec,
    exceptions: IntCounterVec,
    used_ram: IntGauge,
    total_used_ram: IntGauge,
    filter_unhandled_paths: bool,
}

impl Metrics {
    pub fn new(filter_unhandled_paths: bool) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total count of requests by method and path.")
                .namespace(METRIC_NAMESPACE),
            &["method", "path_template"],
        )?;
        let responses = IntCounterVec::new(
            Opts::new(
                "http_responses_total",
                "Total count of responses by method, path and status codes.",
            )
            .namespace(METRIC_NAMESPACE),
            &["method", "path_template", "status_code"],
        )?;
        let in_progress = IntGaugeVec::new(
            Opts::new(
                "requests_in_progress",
                "Gauge of requests by method currently being processed",
            )
            .namespace(METRIC_NAMESPACE),
            &["method"],
        )?;
        let exceptions = IntCounterVec::new(
            Opts::new(
                "http_exceptions_total",
                "Total count of exceptions raised by path and exception type",
            )
            .namespace(METRIC_NAMESPACE),
            &["method", "path_template", "exception_type"],
        )?;
        let used_ram = IntGauge::with_opts(
            Opts::new("used_ram", "Gauge of ram currently being used by the process in bytes")
                .namespace(METRIC_NAMESPACE),
        )?;
        let total_used_ram = IntGauge::with_opts(
            Opts::new("total_used_ram", "Gauge of ram currently being used in bytes")
                .namespace(METRIC_NAMESPACE),
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(responses.clone()))?;
        registry.register(Box::new(in_progress.clone()))?;
        registry.register(Box::new(exceptions.clone()))?;
        registry.register(Box::new(used_ram.clone()))?;
        registry.register(Box::new(total_used_ram.clone()))?;

        Ok(Self {
            registry,
            requests,
            responses,
            in_progress,
            exceptions,
            used_ram,
            total_used_ram,
            filter_unhandled_paths,
        })
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Record one RAM sample
    pub fn set_ram(&self, process_bytes: u64, system_used_bytes: u64) {
        self.used_ram.set(process_bytes as i64);
        self.total_used_ram.set(system_used_bytes as i64);
    }

    fn request_started(&self, method: &str, path: &str) {
        self.in_progress.with_label_values(&[method]).inc();
        self.requests.with_label_values(&[method, path]).inc();
    }

    fn request_finished(&self, method: &str, path: &str, status: StatusCode, exception: Option<&ExceptionType>) {
        if let Some(ExceptionType(kind)) = exception {
            self.exceptions.with_label_values(&[method, path, kind.as_str()]).inc();
        }
        self.responses
            .with_label_values(&[method, path, status.as_str()])
            .inc();
        self.in_progress.with_label_values(&[method]).dec();
    }
}

/// Decrements the in-progress gauge even if the handler future is dropped
struct InFlight<'a> {
    metrics: &'a Metrics,
    method: String,
    path: String,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn finish(mut self, status: StatusCode, exception: Option<&ExceptionType>) {
        self.finished = true;
        self.metrics.request_finished(&self.method, &self.path, status, exception);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.in_progress.with_label_values(&[self.method.as_str()]).dec();
        }
    }
}

/// Middleware counting requests, responses, in-flight requests and errors per route template
pub async fn track_metrics(State(metrics): State<Metrics>, request: Request, next: Next) -> Response<Body> {
    let matched = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());

    let path = match matched {
        Some(template) => template,
        None if metrics.filter_unhandled_paths => return next.run(request).await,
        None => request.uri().path().to_string(),
    };
    let method = request.method().as_str().to_string();

    metrics.request_started(&method, &path);
    let guard = InFlight {
        metrics: &metrics,
        method,
        path,
        finished: false,
    };

    let response = next.run(request).await;
    guard.finish(response.status(), response.extensions().get::<ExceptionType>());
    response
}

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Metrics>) -> Response<Body> {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Resident set size of this process in bytes (Linux)
pub fn process_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_status_rss(&status)
}

/// System memory in use (`MemTotal - MemAvailable`) in bytes (Linux)
pub fn system_used_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_used(&meminfo)
}

/// Value of a `Name:   123 kB` line from a procfs text file, in kB
fn kb_field(text: &str, name: &str) -> Option<u64> {
    text.lines()
        .find(|line| line.starts_with(name))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

fn parse_status_rss(status: &str) -> Option<u64> {
    Some(kb_field(status, "VmRSS:")? * 1024)
}

fn parse_meminfo_used(meminfo: &str) -> Option<u64> {
    let total = kb_field(meminfo, "MemTotal:")?;
    let available = kb_field(meminfo, "MemAvailable:")?;
    Some(total.saturating_sub(available) * 1024)
}

/// Sample RAM usage into the gauges every `interval`, forever
pub async fn monitor_ram(metrics: Metrics, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match (process_memory_bytes(), system_used_memory_bytes()) {
            (Some(process), Some(system)) => {
                metrics.set_ram(process, system);
                debug!("RAM: process {} bytes, system {} bytes", process, system);
            }
            _ => warn!("RAM statistics unavailable on this platform"),
        }
    }
}
