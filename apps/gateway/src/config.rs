use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// The only origin allowed to make cross-origin requests.
    pub cors_origin: String,
    /// Connection string for the shared counter store and channel bus.
    pub redis_url: String,
    /// How long draining sessions get to close on their own before the
    /// shared counter is corrected for them.
    pub shutdown_grace: Duration,
    /// Upper bound on any single store or bus call.
    pub store_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if no store URL is set.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed_var("PORT").unwrap_or(3001),
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .or_else(|_| std::env::var("UPSTASH_REDIS_REST_URL"))
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| panic!("REDIS_URL (or UPSTASH_REDIS_REST_URL) env var is required")),
            shutdown_grace: Duration::from_millis(parsed_var("SHUTDOWN_GRACE_MS").unwrap_or(5000)),
            store_timeout: Duration::from_millis(parsed_var("STORE_TIMEOUT_MS").unwrap_or(2000)),
        }
    }

    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
