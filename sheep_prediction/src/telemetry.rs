use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::{collections::HashSet, sync::Arc};

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

pub struct Metrics {
    request_counter: IntCounterVec,
    prediction_duration: HistogramVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of requests"),
            &["route", "status"],
        )?;

        let boundaries = generate_boundaries((10, 50, 100, 500, 2000), (10, 10, 50, 250));

        let prediction_duration = HistogramVec::new(
            HistogramOpts::new(
                "prediction_duration_ms",
                "Duration of prediction operations in milliseconds",
            )
            .buckets(boundaries),
            &["route"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(prediction_duration.clone()))?;

        Ok(Metrics {
            request_counter,
            prediction_duration,
            registry,
        })
    }

    pub fn record_request(&self, route: &str, status: StatusCode) {
        self.request_counter
            .with_label_values(&[route, status.as_str()])
            .inc();
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        self.prediction_duration
            .with_label_values(&[route])
            .observe(duration_ms as f64);
    }

    /// Prometheus text exposition of everything in the registry.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Counts every response by matched route template and status.
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let response = next.run(request).await;
    metrics.record_request(&route, response.status());
    response
}

/// Histogram buckets that are dense where predictions usually land and
/// sparse in the tail. `parts` are the segment edges, `steps` the spacing
/// inside each of the four segments.
fn generate_boundaries(parts: (u64, u64, u64, u64, u64), steps: (u64, u64, u64, u64)) -> Vec<f64> {
    let first_part = (parts.0..=parts.1).step_by(steps.0 as usize);
    let middle_part = (parts.1..=parts.2).step_by(steps.1 as usize);
    let end_part = (parts.2..=parts.3).step_by(steps.2 as usize);
    let tail_part = (parts.3..=parts.4).step_by(steps.3 as usize);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
