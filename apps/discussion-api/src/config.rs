use std::time::Duration;

use crate::gateway::policy::DeliveryPolicy;

/// Discussion API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Shared HS256 secret for bearer credentials.
    pub jwt_secret: String,
    /// Expected `iss` claim on bearer credentials.
    pub jwt_issuer: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Upper bound on a single reply-persistence call.
    pub persist_timeout: Duration,
    /// Gateway liveness, size and queue limits.
    pub delivery: DeliveryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing or
    /// a gateway deadline is set to zero.
    pub fn from_env() -> Self {
        let defaults = DeliveryPolicy::default();

        let pong_wait = optional_secs("WS_PONG_WAIT_SECS").unwrap_or(defaults.pong_wait);

        let delivery = DeliveryPolicy {
            write_wait: optional_secs("WS_WRITE_WAIT_SECS").unwrap_or(defaults.write_wait),
            max_message_size: optional_var("WS_MAX_MESSAGE_SIZE").unwrap_or(defaults.max_message_size),
            outbound_capacity: optional_var("WS_OUTBOUND_CAPACITY")
                .unwrap_or(defaults.outbound_capacity)
                .max(1),
            ..defaults
        }
        .with_pong_wait(pong_wait);

        Self {
            database_url: required_var("DATABASE_URL"),
            jwt_secret: required_var("JWT_SECRET"),
            jwt_issuer: std::env::var("JWT_ISSUER")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| crate::auth::tokens::DEFAULT_ISSUER.to_string()),
            port: optional_var("PORT").unwrap_or(8080),
            persist_timeout: optional_var("PERSIST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(3)),
            delivery,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn optional_secs(name: &str) -> Option<Duration> {
    positive_secs(name, std::env::var(name).ok().as_deref())
}

/// Parse a whole number of seconds. Gateway deadlines must be non-zero.
fn positive_secs(name: &str, raw: Option<&str>) -> Option<Duration> {
    let secs: u64 = raw?.trim().parse().ok()?;
    if secs == 0 {
        panic!("{name} must be greater than zero");
    }
    Some(Duration::from_secs(secs))
}
