use crate::cache::{InFlight, TtlCache};
use crate::config::CacheKeyMode;
use crate::models::AnalyzeResult;
use crate::upstream::UpstreamClient;

// app's shared state, handed to every route through `Arc`
pub struct AppState {
    pub upstream: UpstreamClient,
    pub cache: TtlCache<AnalyzeResult>, // fingerprint -> finished analysis
    pub in_flight: InFlight<AnalyzeResult>, // analyses still waiting on the upstream
    pub cache_key_mode: CacheKeyMode,
}

impl AppState {
    pub fn new(
        upstream: UpstreamClient,
        cache: TtlCache<AnalyzeResult>,
        cache_key_mode: CacheKeyMode,
    ) -> Self {
        Self {
            upstream,
            cache,
            in_flight: InFlight::default(),
            cache_key_mode,
        }
    }
}
