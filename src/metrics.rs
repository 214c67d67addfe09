use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, TextEncoder,
    register_counter, register_gauge, register_histogram_vec, register_int_counter_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: IntCounterVec = register_int_counter_vec!(
        "page_reader_requests_total",
        "Total number of requests per route",
        &["route"]
    )
    .expect("request counter registers once");
    pub static ref CACHE_HITS: Counter =
        register_counter!("page_reader_cache_hits_total", "Total analyze cache hits")
            .expect("cache hit counter registers once");
    pub static ref CACHE_MISSES: Counter =
        register_counter!("page_reader_cache_misses_total", "Total analyze cache misses")
            .expect("cache miss counter registers once");
    pub static ref CACHE_SIZE: Gauge =
        register_gauge!("page_reader_cache_size", "Current number of items in cache")
            .expect("cache size gauge registers once");
    pub static ref UPSTREAM_LATENCY: HistogramVec = register_histogram_vec!(
        HistogramOpts::new(
            "page_reader_upstream_latency_seconds",
            "Upstream response latency in seconds (until headers)"
        ),
        &["task"]
    )
    .expect("latency histogram registers once");
    pub static ref UPSTREAM_ERRORS: IntCounterVec = register_int_counter_vec!(
        "page_reader_upstream_errors_total",
        "Upstream calls that failed, by task and kind",
        &["task", "kind"]
    )
    .expect("upstream error counter registers once");
}

// Register everything up front so /metrics lists all series from the start
pub fn init() {
    lazy_static::initialize(&REQUEST_TOTAL);
    lazy_static::initialize(&CACHE_HITS);
    lazy_static::initialize(&CACHE_MISSES);
    lazy_static::initialize(&CACHE_SIZE);
    lazy_static::initialize(&UPSTREAM_LATENCY);
    lazy_static::initialize(&UPSTREAM_ERRORS);
}

// Render every registered metric in the text exposition format
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("metrics encoding failed: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("metrics are not utf-8: {}", e))
}
