use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static RATE_LIMITED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static WEBSOCKET_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "dashboard_http_requests_total",
                    "Dashboard HTTP request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create dashboard_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "dashboard_http_request_duration_seconds",
                    "Dashboard HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method"],
            )
            .expect("create dashboard_http_request_duration_seconds"),
        )
    })
}

fn rate_limited_total() -> &'static IntCounter {
    RATE_LIMITED_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "dashboard_rate_limited_total",
                "Requests rejected by the rate limiter.",
            )
            .expect("create dashboard_rate_limited_total"),
        )
    })
}

fn websocket_connections() -> &'static IntGauge {
    WEBSOCKET_CONNECTIONS.get_or_init(|| {
        register_collector(
            IntGauge::new(
                "dashboard_websocket_connections",
                "Currently open log websocket connections.",
            )
            .expect("create dashboard_websocket_connections"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();
    http_request_duration_seconds()
        .with_label_values(&[route, method])
        .observe(duration.as_secs_f64());
}

pub fn inc_rate_limited() {
    rate_limited_total().inc();
}

pub fn inc_ws_connections() {
    websocket_connections().inc();
}

pub fn dec_ws_connections() {
    websocket_connections().dec();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = rate_limited_total();
    let _ = websocket_connections();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
