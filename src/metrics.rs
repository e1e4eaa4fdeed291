use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Instant;

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "board_chat_http_requests_total",
            "Total HTTP requests handled by board-chat-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create board_chat_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register board_chat_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "board_chat_http_request_duration_seconds",
            "HTTP request latencies for board-chat-service",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
        ]),
        &["method", "path", "status"],
    )
    .expect("failed to create board_chat_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register board_chat_http_request_duration_seconds");
    histogram
});

static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "board_chat_ws_connections",
        "Open WebSocket connections on this instance",
    )
    .expect("failed to create board_chat_ws_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register board_chat_ws_connections");
    gauge
});

static FANOUT_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "board_chat_fanout_deliveries_total",
            "Frames pushed to local connections, by event kind",
        ),
        &["kind"],
    )
    .expect("failed to create board_chat_fanout_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register board_chat_fanout_deliveries_total");
    counter
});

static FANOUT_MALFORMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "board_chat_fanout_malformed_total",
        "Channel payloads dropped because they could not be decoded",
    )
    .expect("failed to create board_chat_fanout_malformed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register board_chat_fanout_malformed_total");
    counter
});

static FANOUT_PUBLISH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "board_chat_fanout_publish_failures_total",
        "Events persisted but not published to the shared channel",
    )
    .expect("failed to create board_chat_fanout_publish_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register board_chat_fanout_publish_failures_total");
    counter
});

pub fn ws_connection_opened() {
    WS_CONNECTIONS.inc();
}

pub fn ws_connection_closed() {
    WS_CONNECTIONS.dec();
}

pub fn record_delivery(kind: &str, delivered: usize) {
    FANOUT_DELIVERIES_TOTAL
        .with_label_values(&[kind])
        .inc_by(delivered as u64);
}

pub fn record_malformed_payload() {
    FANOUT_MALFORMED_TOTAL.inc();
}

pub fn record_publish_failure() {
    FANOUT_PUBLISH_FAILURES_TOTAL.inc();
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Request counter and latency histogram per route
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = MetricsMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let start = Instant::now();
        let method = req.method().to_string();
        // route pattern keeps label cardinality bounded
        let path = req
            .match_pattern()
            .unwrap_or_else(|| req.path().to_string());

        Box::pin(async move {
            let res = service.call(req).await?;
            let status = res.status().as_u16().to_string();

            HTTP_REQUESTS_TOTAL
                .with_label_values(&[&method, &path, &status])
                .inc();
            HTTP_REQUEST_DURATION_SECONDS
                .with_label_values(&[&method, &path, &status])
                .observe(start.elapsed().as_secs_f64());

            Ok(res)
        })
    }
}
