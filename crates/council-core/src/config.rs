use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Process-wide settings, resolved from the environment once at startup
/// and passed down by the composition root.
#[derive(Debug, Clone)]
pub struct Settings {
    /// C13 cap: concurrent analyses admitted by the API-layer pool.
    pub max_concurrent_analyses: usize,
    /// C9 cap: concurrent workflow tasks dispatched by the scheduler.
    pub max_concurrent_workflows: usize,
    pub max_queue_size: usize,
    pub analysis_timeout: Duration,
    pub tool_cache_ttl: Duration,
    pub max_tool_retries: u32,

    pub default_model: Option<String>,
    pub default_temperature: f64,
    pub default_max_tokens: u32,

    pub redis_url: Option<String>,
    pub database_url: String,
    pub memory_service_url: Option<String>,
    pub priority_config_path: Option<String>,

    pub host: String,
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_analyses: env_parse("MAX_CONCURRENT_ANALYSES", 10),
            max_concurrent_workflows: env_parse("MAX_CONCURRENT_WORKFLOWS", 3),
            max_queue_size: env_parse("MAX_QUEUE_SIZE", 100),
            analysis_timeout: Duration::from_secs(env_parse("ANALYSIS_TIMEOUT", 300u64)),
            tool_cache_ttl: Duration::from_secs(env_parse("TOOL_CACHE_TTL", 3600u64)),
            max_tool_retries: env_parse("MAX_TOOL_RETRIES", 3),
            default_model: env_opt("DEFAULT_MODEL"),
            default_temperature: env_parse("DEFAULT_TEMPERATURE", 0.1),
            default_max_tokens: env_parse("DEFAULT_MAX_TOKENS", 1500),
            redis_url: env_opt("REDIS_URL"),
            database_url: env_opt("DATABASE_URL")
                .unwrap_or_else(|| "sqlite::memory:".to_string()),
            memory_service_url: env_opt("MEMORY_SERVICE_URL"),
            priority_config_path: env_opt("PRIORITY_CONFIG_PATH"),
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8000),
        }
    }
}
