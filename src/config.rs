use clap::{Parser, ValueEnum};
use std::time::Duration;

// 72 hours
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60 * 72;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "page-reader-gateway")]
#[command(about = "Transcribe, summarize and chat about photographed pages")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Upstream API key. Missing key is not fatal at startup,
    // every request that needs the upstream fails with 500 instead.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    // Base url of the Responses API
    #[arg(short, long, env = "UPSTREAM_URL", default_value = "https://api.openai.com/v1")]
    pub upstream_url: String,

    // Model used for every upstream call
    #[arg(short, long, env = "OPENAI_MODEL", default_value = "gpt-4.1")]
    pub model: String,

    // Analyze cache TTL in seconds
    #[arg(short, long, env = "CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl: u64,

    // How analyze cache keys are derived from the image payload
    #[arg(long, env = "CACHE_KEY_MODE", value_enum, default_value_t = CacheKeyMode::Fnv)]
    pub cache_key: CacheKeyMode,

    // Upstream request timeout in seconds (covers the whole streamed body too)
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 120)]
    pub upstream_timeout: u64,

    // Largest accepted request body; base64 photos easily pass axum's 2MB default
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub max_body_bytes: usize,

    // Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    // Treat an empty env var the same as an unset one
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKeyMode {
    // 32-bit FNV-1a plus input length, cheap but collisions are possible
    Fnv,
    // SHA-256 content hash plus input length
    Sha256,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["page-reader-gateway"]).unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.model, "gpt-4.1");
        assert_eq!(args.cache_ttl(), Duration::from_secs(259_200));
        assert_eq!(args.cache_key, CacheKeyMode::Fnv);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let args =
            Args::try_parse_from(["page-reader-gateway", "--api-key", "  "]).unwrap();
        assert_eq!(args.api_key(), None);

        let args =
            Args::try_parse_from(["page-reader-gateway", "--api-key", "sk-test"]).unwrap();
        assert_eq!(args.api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn sha256_key_mode() {
        let args =
            Args::try_parse_from(["page-reader-gateway", "--cache-key", "sha256"]).unwrap();
        assert_eq!(args.cache_key, CacheKeyMode::Sha256);
    }
}
