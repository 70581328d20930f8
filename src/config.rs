//! Runtime configuration, loaded from environment variables (optionally via
//! a `.env` file). Every option has a documented default so the binary runs
//! out of the box in a single-process demo configuration.

use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub thread_pool_size: usize,
    pub queue_capacity: usize,
    pub cancel_queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct SagaTimeouts {
    pub order: Duration,
    pub matching: Duration,
    pub account: Duration,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 10, reset_timeout: Duration::from_secs(30), half_open_probes: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub database_url: String,
    pub matching: MatchingConfig,
    pub saga_timeouts: SagaTimeouts,
    pub lock_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl AppConfig {
    /// Load configuration from the process environment. `.env` (if present)
    /// should already have been applied by the caller via `dotenvy::dotenv()`
    /// before this is called — mirrors the order `main` does it in.
    pub fn load() -> anyhow::Result<Self> {
        let default_threads = num_cpus() * 2;
        Ok(Self {
            environment: env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/trading_core".to_string()),
            matching: MatchingConfig {
                thread_pool_size: env_or("MATCHING_THREAD_POOL_SIZE", default_threads),
                queue_capacity: env_or("MATCHING_QUEUE_CAPACITY", 100_000),
                cancel_queue_capacity: env_or("MATCHING_CANCEL_QUEUE_CAPACITY", 10_000),
            },
            saga_timeouts: SagaTimeouts {
                order: Duration::from_secs(env_or("SAGA_TIMEOUT_ORDER_SECS", 30)),
                matching: Duration::from_secs(env_or("SAGA_TIMEOUT_MATCHING_SECS", 10)),
                account: Duration::from_secs(env_or("SAGA_TIMEOUT_ACCOUNT_SECS", 5)),
            },
            lock_timeout: Duration::from_millis(env_or("LOCK_TIMEOUT_MS", 3000)),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env_or("CIRCUIT_BREAKER_THRESHOLD", 10),
                reset_timeout: Duration::from_secs(env_or("CIRCUIT_BREAKER_RESET_SECS", 30)),
                half_open_probes: env_or("CIRCUIT_BREAKER_HALF_OPEN_PROBES", 5),
            },
        })
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // SAFETY: tests run single-threaded within this module; no other test
        // mutates these keys.
        for key in ["MATCHING_QUEUE_CAPACITY", "SAGA_TIMEOUT_ORDER_SECS", "CIRCUIT_BREAKER_THRESHOLD"] {
            env::remove_var(key);
        }
        let config = AppConfig::load().unwrap();
        assert_eq!(config.matching.queue_capacity, 100_000);
        assert_eq!(config.saga_timeouts.order, Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.failure_threshold, 10);
        assert_eq!(config.circuit_breaker.half_open_probes, 5);
    }
}
