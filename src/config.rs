use crate::circuit_breaker::{BreakerSettings, TripPolicy};
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db_gateway: DbGatewayConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String, // e.g., "0.0.0.0"
    #[serde(default = "default_port")]
    pub port: u16,
}
fn default_bind_addr() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr(), port: default_port() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbGatewayConfig {
    /// `host:port` or a full URL.
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}
fn default_gateway_url() -> String { "db-gateway-service:8086".to_string() }
fn default_call_timeout_ms() -> u64 { 5_000 }

impl Default for DbGatewayConfig {
    fn default() -> Self {
        Self { url: default_gateway_url(), call_timeout_ms: default_call_timeout_ms() }
    }
}

impl DbGatewayConfig {
    pub fn base_url(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("http://{}", self.url)
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_name")]
    pub name: String,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
}
fn default_breaker_name() -> String { "DBGateway".to_string() }
fn default_max_requests() -> u32 { 3 }
fn default_interval_s() -> u64 { 10 }
fn default_timeout_s() -> u64 { 30 }
fn default_min_requests() -> u32 { 3 }
fn default_failure_ratio() -> f64 { 0.6 }

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: default_breaker_name(),
            max_requests: default_max_requests(),
            interval_s: default_interval_s(),
            timeout_s: default_timeout_s(),
            min_requests: default_min_requests(),
            failure_ratio: default_failure_ratio(),
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings::new(self.name.clone())
            .max_requests(self.max_requests)
            .interval(Duration::from_secs(self.interval_s))
            .timeout(Duration::from_secs(self.timeout_s))
            .trip_policy(TripPolicy { min_requests: self.min_requests, failure_ratio: self.failure_ratio })
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut cfg: Self = serde_yaml::from_str(&content)?;
        apply_env_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`load_from_path`](Self::load_from_path), falling back to
    /// defaults (plus environment) when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::load_from_path(path);
        }
        let mut cfg = Self::default();
        apply_env_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.breaker.name.is_empty(), "breaker.name must not be empty");
        ensure!(self.breaker.max_requests > 0, "breaker.max_requests must be greater than 0");
        ensure!(
            self.breaker.failure_ratio > 0.0 && self.breaker.failure_ratio <= 1.0,
            "breaker.failure_ratio must be in (0, 1], got {}",
            self.breaker.failure_ratio
        );
        ensure!(self.breaker.min_requests >= 2, "breaker.min_requests must be at least 2");
        ensure!(self.breaker.timeout_s > 0, "breaker.timeout_s must be greater than 0");
        ensure!(self.db_gateway.call_timeout_ms > 0, "db_gateway.call_timeout_ms must be greater than 0");
        Ok(())
    }
}

pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| env::var(key).ok());
}

pub fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = var("DB_GATEWAY_ADDR") { cfg.db_gateway.url = addr; }
    if let Some(addr) = var("USR_HTTP_ADDR") { cfg.server.bind_addr = addr; }
    if let Some(port) = var("SERVICE_PORT") {
        if let Ok(p) = port.parse::<u16>() { cfg.server.port = p; }
    }
    if let Some(ms) = var("USR_CALL_TIMEOUT_MS") {
        if let Ok(v) = ms.parse::<u64>() { cfg.db_gateway.call_timeout_ms = v.max(100); }
    }
    if let Some(sec) = var("USR_BREAKER_TIMEOUT_S") {
        if let Ok(v) = sec.parse::<u64>() { cfg.breaker.timeout_s = v; }
    }
}
