//! Application configuration, bound from environment variables the same
//! way the teacher's `models::Config::from_env` does.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `routing.strategy`, spec.md §4.5 / §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategyKind {
    WeightedRoundRobin,
    LeastConnections,
    CostBased,
    ResponseTimeBased,
    Hybrid,
}

impl std::str::FromStr for RoutingStrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted_round_robin" | "weighted-round-robin" => Ok(Self::WeightedRoundRobin),
            "least_connections" | "least-connections" => Ok(Self::LeastConnections),
            "cost_based" | "cost-based" => Ok(Self::CostBased),
            "response_time_based" | "response-time-based" => Ok(Self::ResponseTimeBased),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategyKind,
    pub failover_enabled: bool,
    pub failover_max_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub window_size: usize,
    pub min_calls: usize,
    pub failure_rate_threshold: f64,
    pub open_duration: Duration,
    pub half_open_successes_to_close: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: env_or("BREAKER_WINDOW_SIZE", 10),
            min_calls: env_or("BREAKER_MIN_CALLS", 5),
            failure_rate_threshold: env_or("BREAKER_FAILURE_RATE_THRESHOLD", 0.5),
            open_duration: Duration::from_secs(env_or("BREAKER_OPEN_DURATION_SECS", 30)),
            half_open_successes_to_close: env_or("BREAKER_HALF_OPEN_SUCCESSES", 2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub wait_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", 3),
            wait_duration: Duration::from_millis(env_or("RETRY_WAIT_DURATION_MS", 50)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub engine_enabled: bool,
    pub ml_enabled: bool,
    pub ml_service_url: Option<String>,
    pub ml_timeout_ms: u64,
    pub high_failure_rate_threshold: f64,
    pub velocity_1min_threshold: u64,
    pub alert_score_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            engine_enabled: env_or("RISK_ENGINE_ENABLED", true),
            ml_enabled: env_or("RISK_ML_ENABLED", false),
            ml_service_url: std::env::var("RISK_ML_SERVICE_URL").ok(),
            ml_timeout_ms: env_or("RISK_ML_TIMEOUT_MS", 2000),
            high_failure_rate_threshold: env_or("RISK_THRESHOLD_HIGH_FAILURE_RATE", 0.5),
            velocity_1min_threshold: env_or("RISK_THRESHOLD_VELOCITY_1MIN", 10),
            alert_score_threshold: env_or("RISK_THRESHOLD_ALERT_SCORE", 0.4),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VelocityConfig {
    pub max_per_email_per_60s: u32,
    pub max_per_ip_per_60s: u32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            max_per_email_per_60s: env_or("VELOCITY_MAX_PER_EMAIL_PER_60S", 20),
            max_per_ip_per_60s: env_or("VELOCITY_MAX_PER_IP_PER_60S", 30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub routing: RoutingConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub risk: RiskConfig,
    pub velocity: VelocityConfig,
    pub idempotency_ttl: Duration,
    pub webhook_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./payorch.db".to_string());
        let port = env_or("PORT", 8080u16);

        let strategy = std::env::var("ROUTING_STRATEGY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(RoutingStrategyKind::Hybrid);

        let routing = RoutingConfig {
            strategy,
            failover_enabled: env_or("ROUTING_FAILOVER_ENABLED", true),
            failover_max_attempts: env_or("ROUTING_FAILOVER_MAX_ATTEMPTS", 3),
        };

        Ok(Self {
            database_path,
            port,
            routing,
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            risk: RiskConfig::default(),
            velocity: VelocityConfig::default(),
            idempotency_ttl: Duration::from_secs(env_or("IDEMPOTENCY_TTL_SECS", 24 * 3600)),
            webhook_timeout: Duration::from_millis(env_or("WEBHOOK_TIMEOUT_MS", 5000)),
        })
    }
}

/// CLI overrides layered on top of `Config::from_env`, grounded in the
/// teacher's `clap` usage (env-aware derive args).
#[derive(Debug, clap::Parser)]
#[command(name = "payorch", about = "Payment orchestration & risk platform")]
pub struct Cli {
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<String>,
}

impl Cli {
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = self.database_path {
            config.database_path = path;
        }
    }
}
